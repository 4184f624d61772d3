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


//! Offline Core
//!
//! Offline downloads for a mobile music client: HLS manifests and their
//! segments are fetched in small concurrent batches, rewritten to point at
//! local files, and tracked in a persisted download store.
//!
//! # Modules
//! - [`manifest`]: parse segment references, rewrite to local paths
//! - [`download`]: song/playlist/album pipelines, batching, cancellation
//! - [`storage`]: download records and their persistence
//! - [`file`]: on-disk layout and file operations
//! - [`api`]: HTTP fetcher and upstream response shapes
//! - [`ffi`]: C bridge for the native app shell

uniffi::setup_scaffolding!();

pub mod api;
pub mod config;
pub mod download;
pub mod error;
pub mod ffi;
pub mod file;
pub mod logging;
pub mod manifest;
pub mod storage;

pub use config::{OfflineConfig, StoreBackend};
pub use download::{DownloadManager, DownloadProgress, ProgressCallback};
pub use error::{OfflineError, Result};
pub use manifest::ManifestCodec;
pub use storage::SharedStore;

/// Absolute segment URIs of a manifest, with the default segment extensions
#[uniffi::export]
pub fn parse_manifest_segments(manifest_text: String, manifest_url: String) -> Vec<String> {
    ManifestCodec::default().parse_segments(&manifest_text, &manifest_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest_segments() {
        let segments = parse_manifest_segments(
            "#EXTM3U\n#EXTINF:10,\nseg0.ts\n#EXTINF:10,\nseg1.ts\n".to_string(),
            "https://cdn.example.com/a/index.m3u8".to_string(),
        );
        assert_eq!(
            segments,
            vec![
                "https://cdn.example.com/a/seg0.ts",
                "https://cdn.example.com/a/seg1.ts"
            ]
        );
    }
}
