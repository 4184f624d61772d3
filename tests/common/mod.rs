//! Shared fixtures for the integration tests
//!
//! [`FakeFetcher`] serves manifests from a map and writes each segment's URL as
//! its body. Downloads can be held behind a gate to observe in-flight state.

#![allow(dead_code)]

use async_trait::async_trait;
use offline_core::api::client::HttpFetcher;
use offline_core::api::models::SongResponse;
use offline_core::storage::SharedStore;
use offline_core::{DownloadManager, OfflineConfig, OfflineError, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

pub const CDN: &str = "https://cdn.example.com";

pub struct FakeFetcher {
    texts: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    requests: Mutex<Vec<String>>,
    gate_tx: watch::Sender<bool>,
    gate_rx: watch::Receiver<bool>,
    /// Signalled when a file download starts
    pub started: Notify,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        let (gate_tx, gate_rx) = watch::channel(true);
        Arc::new(Self {
            texts: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            requests: Mutex::new(Vec::new()),
            gate_tx,
            gate_rx,
            started: Notify::new(),
        })
    }

    /// File downloads wait until [`FakeFetcher::open_gate`] or cancellation
    pub fn close_gate(&self) {
        let _ = self.gate_tx.send(false);
    }

    pub fn open_gate(&self) {
        let _ = self.gate_tx.send(true);
    }

    pub fn serve_text(&self, url: &str, body: &str) {
        self.texts.lock().insert(url.to_string(), body.to_string());
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().insert(url.to_string());
    }

    /// Serve a manifest of `count` segments named `seg{i}.ts` for song `id`
    pub fn serve_song(&self, id: &str, count: usize) -> SongResponse {
        let url = format!("{}/{}/index.m3u8", CDN, id);
        self.serve_text(&url, &manifest(count));
        SongResponse::new(id, format!("Song {}", id), url)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn record(&self, url: &str) -> Result<()> {
        self.requests.lock().push(url.to_string());
        if self.failing.lock().contains(url) {
            return Err(OfflineError::UnexpectedStatusCode {
                status_code: 404,
                url: url.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl HttpFetcher for FakeFetcher {
    async fn get_text(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(OfflineError::Cancelled);
        }
        self.record(url)?;
        self.texts
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| OfflineError::UnexpectedStatusCode {
                status_code: 404,
                url: url.to_string(),
            })
    }

    async fn download_to_file(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        self.started.notify_one();

        let mut gate = self.gate_rx.clone();
        loop {
            let open = *gate.borrow_and_update();
            if open {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OfflineError::Cancelled),
                changed = gate.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.record(url)?;
        tokio::fs::write(destination, url.as_bytes()).await?;
        Ok(url.len() as u64)
    }
}

/// `#EXTINF` + `seg{i}.ts` pairs between the usual header and end tag
pub fn manifest(count: usize) -> String {
    let mut text = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n");
    for i in 0..count {
        text.push_str(&format!("#EXTINF:10.0,\nseg{}.ts\n", i));
    }
    text.push_str("#EXT-X-ENDLIST\n");
    text
}

pub fn config(root: &Path) -> OfflineConfig {
    OfflineConfig::default().with_downloads_dir(root.join("downloads"))
}

pub fn manager_with_config(config: OfflineConfig, fetcher: &Arc<FakeFetcher>) -> Arc<DownloadManager> {
    let fetcher: Arc<dyn HttpFetcher> = fetcher.clone();
    Arc::new(DownloadManager::new(
        config,
        fetcher,
        Arc::new(SharedStore::in_memory()),
    ))
}

pub fn manager(root: &Path, fetcher: &Arc<FakeFetcher>) -> Arc<DownloadManager> {
    manager_with_config(config(root), fetcher)
}
