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


//! Runtime configuration
//!
//! `OfflineConfig` is supplied by the host application (usually as JSON over the
//! FFI bridge) and drives file layout, segment batching and store persistence.
//! Every field has a default, so a host only needs to send what it overrides:
//!
//! ```json
//! { "downloads_dir": "/var/mobile/.../Documents/downloads",
//!   "store": { "kind": "sqlite", "path": "/var/mobile/.../offline.db" } }
//! ```

use crate::error::{OfflineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Number of segments fetched concurrently per batch
pub const DEFAULT_SEGMENT_BATCH_SIZE: usize = 3;

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Where the download store snapshot is kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreBackend {
    /// Nothing survives a restart
    Memory,
    /// Single JSON document written atomically
    Json { path: PathBuf },
    /// Key-value table in a SQLite database
    Sqlite { path: PathBuf },
}

/// Offline download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Root directory for manifests, segment folders and cover images
    pub downloads_dir: PathBuf,

    /// Segments downloaded concurrently per batch
    pub segment_batch_size: usize,

    /// Path extensions (without dot) that mark a manifest line as a segment
    pub segment_extensions: Vec<String>,

    /// Image extensions accepted from cover URLs; anything else becomes `jpg`
    pub image_extensions: Vec<String>,

    /// Keep a song whose manifest had some failed segments
    pub allow_partial_segments: bool,

    /// Per-request timeout
    pub request_timeout_secs: u64,

    /// User agent sent with every request
    pub user_agent: String,

    /// Store persistence backend
    pub store: StoreBackend,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from("./downloads"),
            segment_batch_size: DEFAULT_SEGMENT_BATCH_SIZE,
            segment_extensions: ["ts", "m4s", "mp4", "aac", "seg"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            image_extensions: ["jpg", "jpeg", "png", "webp", "gif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allow_partial_segments: true,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: format!("offline-core/{}", env!("CARGO_PKG_VERSION")),
            store: StoreBackend::Memory,
        }
    }
}

impl OfflineConfig {
    /// Config rooted at the app's documents directory
    ///
    /// Files go to `<documents>/downloads` and the store is a JSON document
    /// next to it.
    pub fn for_documents_dir<P: AsRef<Path>>(documents_dir: P) -> Self {
        let documents_dir = documents_dir.as_ref();
        Self {
            downloads_dir: documents_dir.join("downloads"),
            store: StoreBackend::Json {
                path: documents_dir.join("downloads-storage.json"),
            },
            ..Self::default()
        }
    }

    pub fn with_downloads_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.downloads_dir = dir.into();
        self
    }

    pub fn with_segment_batch_size(mut self, size: usize) -> Self {
        self.segment_batch_size = size;
        self
    }

    pub fn with_allow_partial_segments(mut self, allow: bool) -> Self {
        self.allow_partial_segments = allow;
        self
    }

    pub fn with_store(mut self, store: StoreBackend) -> Self {
        self.store = store;
        self
    }

    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Parse and validate a JSON config document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON config file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            OfflineError::InvalidConfiguration(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&json)
    }

    /// Check the config for values the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.segment_batch_size == 0 {
            return Err(OfflineError::InvalidConfiguration(
                "segment_batch_size must be at least 1".to_string(),
            ));
        }
        if self.segment_extensions.is_empty() {
            return Err(OfflineError::InvalidConfiguration(
                "segment_extensions must not be empty".to_string(),
            ));
        }
        if self.downloads_dir.as_os_str().is_empty() {
            return Err(OfflineError::InvalidConfiguration(
                "downloads_dir must not be empty".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(OfflineError::InvalidConfiguration(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
