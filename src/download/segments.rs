// Offline Core - Offline downloads for a mobile music client
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Batched segment downloads
//!
//! # Batching
//! - Segments are split into fixed batches (default 3)
//! - A batch runs concurrently and every outcome is awaited; one failure does
//!   not stop its siblings
//! - Cancellation is checked before and after each batch, and the task yields
//!   between batches
//!
//! # Resume
//! A segment whose final file already exists is not fetched again. Bodies are
//! streamed to a temp file unique to this attempt (`<name>.{pid}-{n}.part`)
//! and renamed once complete, so a final file is never a truncated segment and
//! two fetches into the same directory never share a temp file.

use crate::api::client::HttpFetcher;
use crate::config::DEFAULT_SEGMENT_BATCH_SIZE;
use crate::error::{OfflineError, Result};
use crate::file::manager::FileManager;
use crate::file::paths::{unique_segment_filenames, unique_temp_path};
use futures_util::future::join_all;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cumulative count of attempted segments, reported once per batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

/// Per-segment results of one fetch
#[derive(Debug, Clone, Default)]
pub struct SegmentFetchOutcome {
    /// Saved filename for each input URI, in input order
    pub saved: Vec<Option<String>>,
    /// Stopped early because the token fired
    pub was_cancelled: bool,
}

impl SegmentFetchOutcome {
    pub fn succeeded(&self) -> usize {
        self.saved.iter().filter(|s| s.is_some()).count()
    }

    pub fn failed(&self) -> usize {
        self.saved.len() - self.succeeded()
    }

    pub fn total(&self) -> usize {
        self.saved.len()
    }
}

/// Downloads a manifest's segments in fixed-size concurrent batches
#[derive(Clone)]
pub struct SegmentFetcher {
    fetcher: Arc<dyn HttpFetcher>,
    batch_size: usize,
}

impl SegmentFetcher {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, batch_size: usize) -> Self {
        Self {
            fetcher,
            batch_size: if batch_size == 0 {
                DEFAULT_SEGMENT_BATCH_SIZE
            } else {
                batch_size
            },
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Fetch every URI into `destination_dir`
    ///
    /// Individual failures are logged and left as `None` in the outcome. The
    /// only errors returned are failures to create `destination_dir`.
    pub async fn fetch_segments<F>(
        &self,
        uris: &[String],
        destination_dir: &Path,
        cancel: &CancellationToken,
        mut on_batch: F,
    ) -> Result<SegmentFetchOutcome>
    where
        F: FnMut(BatchProgress),
    {
        let total = uris.len();
        let mut outcome = SegmentFetchOutcome {
            saved: vec![None; total],
            was_cancelled: false,
        };

        if total == 0 {
            return Ok(outcome);
        }

        tokio::fs::create_dir_all(destination_dir).await.map_err(|e| {
            OfflineError::FileIoError(format!(
                "Failed to create segments directory {}: {}",
                destination_dir.display(),
                e
            ))
        })?;

        let filenames = unique_segment_filenames(uris);
        let mut completed = 0;

        for (batch_index, batch) in uris.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                outcome.was_cancelled = true;
                break;
            }

            let offset = batch_index * self.batch_size;
            let results = join_all(batch.iter().enumerate().map(|(i, uri)| {
                let index = offset + i;
                let destination = destination_dir.join(&filenames[index]);
                async move { (index, self.fetch_one(uri, &destination, cancel).await) }
            }))
            .await;

            for (index, result) in results {
                match result {
                    Ok(()) => outcome.saved[index] = Some(filenames[index].clone()),
                    Err(e) if e.is_cancellation() => {
                        debug!(segment = index, "segment fetch cancelled");
                    }
                    Err(e) => {
                        warn!(segment = index, uri = %uris[index], error = %e, "segment failed");
                    }
                }
            }

            completed += batch.len();
            on_batch(BatchProgress { completed, total });

            if cancel.is_cancelled() {
                outcome.was_cancelled = true;
                break;
            }

            tokio::task::yield_now().await;
        }

        debug!(
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            cancelled = outcome.was_cancelled,
            "segment fetch finished"
        );

        Ok(outcome)
    }

    async fn fetch_one(
        &self,
        uri: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if FileManager::file_exists(destination).await {
            return Ok(());
        }

        let partial = unique_temp_path(destination, ".part");
        match self.fetcher.download_to_file(uri, &partial, cancel).await {
            Ok(_) => FileManager::move_or_keep_existing(&partial, destination).await,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                if e.is_cancellation() {
                    Err(e)
                } else {
                    Err(OfflineError::segment_failed(uri, e.to_string()))
                }
            }
        }
    }
}

impl std::fmt::Debug for SegmentFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentFetcher")
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[derive(Default)]
    struct ScriptedFetcher {
        failing: HashSet<String>,
        requested: Mutex<Vec<String>>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    #[async_trait]
    impl HttpFetcher for ScriptedFetcher {
        async fn get_text(&self, _url: &str, _cancel: &CancellationToken) -> Result<String> {
            Ok(String::new())
        }

        async fn download_to_file(
            &self,
            url: &str,
            destination: &Path,
            _cancel: &CancellationToken,
        ) -> Result<u64> {
            let count = {
                let mut requested = self.requested.lock();
                requested.push(url.to_string());
                requested.len()
            };
            if let Some((after, token)) = &self.cancel_after {
                if count >= *after {
                    token.cancel();
                }
            }
            if self.failing.contains(url) {
                return Err(OfflineError::UnexpectedStatusCode {
                    status_code: 404,
                    url: url.to_string(),
                });
            }
            tokio::fs::write(destination, url.as_bytes()).await?;
            Ok(url.len() as u64)
        }
    }

    fn uris(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://cdn/s/{}.ts", i)).collect()
    }

    #[tokio::test]
    async fn test_batches_settle_all_and_report_progress() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher {
            failing: ["https://cdn/s/1.ts".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let segments = SegmentFetcher::new(fetcher.clone(), 3);
        let mut reports = Vec::new();

        let outcome = segments
            .fetch_segments(&uris(7), temp_dir.path(), &CancellationToken::new(), |p| {
                reports.push(p.completed)
            })
            .await
            .unwrap();

        assert_eq!(reports, vec![3, 6, 7]);
        assert_eq!(outcome.succeeded(), 6);
        assert_eq!(outcome.failed(), 1);
        assert!(outcome.saved[1].is_none());
        assert_eq!(outcome.saved[2].as_deref(), Some("2.ts"));
        assert!(!outcome.was_cancelled);
        assert!(temp_dir.path().join("6.ts").exists());
        let leftovers = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".part"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_into_same_directory() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        let segments = SegmentFetcher::new(fetcher.clone(), 3);
        let uris = uris(6);
        let token = CancellationToken::new();

        let (a, b) = tokio::join!(
            segments.fetch_segments(&uris, temp_dir.path(), &token, |_| {}),
            segments.fetch_segments(&uris, temp_dir.path(), &token, |_| {})
        );

        assert_eq!(a.unwrap().succeeded(), 6);
        assert_eq!(b.unwrap().succeeded(), 6);
        for i in 0..6 {
            let body = std::fs::read_to_string(temp_dir.path().join(format!("{}.ts", i))).unwrap();
            assert_eq!(body, format!("https://cdn/s/{}.ts", i));
        }
    }

    #[tokio::test]
    async fn test_existing_segments_are_not_refetched() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("0.ts"), b"done").unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());

        let outcome = SegmentFetcher::new(fetcher.clone(), 3)
            .fetch_segments(&uris(2), temp_dir.path(), &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.succeeded(), 2);
        assert_eq!(*fetcher.requested.lock(), vec!["https://cdn/s/1.ts".to_string()]);
        assert_eq!(std::fs::read(temp_dir.path().join("0.ts")).unwrap(), b"done");
    }

    #[tokio::test]
    async fn test_cancellation_stops_after_current_batch() {
        let temp_dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let fetcher = Arc::new(ScriptedFetcher {
            cancel_after: Some((2, token.clone())),
            ..Default::default()
        });

        let outcome = SegmentFetcher::new(fetcher.clone(), 2)
            .fetch_segments(&uris(6), temp_dir.path(), &token, |_| {})
            .await
            .unwrap();

        assert!(outcome.was_cancelled);
        assert_eq!(fetcher.requested.lock().len(), 2);
        assert_eq!(outcome.succeeded(), 2);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("never_created");
        let outcome = SegmentFetcher::new(Arc::new(ScriptedFetcher::default()), 3)
            .fetch_segments(&[], &dir, &CancellationToken::new(), |_| panic!("no batches"))
            .await
            .unwrap();

        assert_eq!(outcome.total(), 0);
        assert!(!dir.exists());
    }

    #[test]
    fn test_zero_batch_size_falls_back() {
        let fetcher = SegmentFetcher::new(Arc::new(ScriptedFetcher::default()), 0);
        assert_eq!(fetcher.batch_size(), DEFAULT_SEGMENT_BATCH_SIZE);
    }
}
