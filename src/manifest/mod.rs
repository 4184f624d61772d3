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


//! HLS manifest codec
//!
//! Line-oriented: segments are found by extension, not by a full M3U8
//! grammar. Master playlists and variant selection are not handled.
//!
//! # Example
//! ```
//! use offline_core::manifest::ManifestCodec;
//!
//! let codec = ManifestCodec::default();
//! let text = "#EXTM3U\n#EXTINF:10,\na.ts\n#EXT-X-ENDLIST\n";
//! let segments = codec.parse(text, "https://cdn.example.com/song/index.m3u8");
//! assert_eq!(segments[0].uri, "https://cdn.example.com/song/a.ts");
//!
//! let local = codec.rewrite(text, &segments, &[Some("a.ts".to_string())], |name| {
//!     format!("1_Song_segments/{}", name)
//! });
//! assert!(local.contains("\n1_Song_segments/a.ts\n"));
//! ```

pub mod parser;
pub mod rewriter;

pub use parser::{parse_manifest, ManifestSegment};
pub use rewriter::rewrite_manifest;

use crate::config::OfflineConfig;

/// Parser and rewriter sharing one set of segment extensions
#[derive(Debug, Clone)]
pub struct ManifestCodec {
    extensions: Vec<String>,
}

impl Default for ManifestCodec {
    fn default() -> Self {
        Self::from_config(&OfflineConfig::default())
    }
}

impl ManifestCodec {
    pub fn new(extensions: Vec<String>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &OfflineConfig) -> Self {
        Self::new(config.segment_extensions.clone())
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn is_segment_line(&self, line: &str) -> bool {
        parser::is_segment_line(line, &self.extensions)
    }

    /// Segment lines with their positions and absolute URIs
    pub fn parse(&self, manifest_text: &str, manifest_url: &str) -> Vec<ManifestSegment> {
        parse_manifest(manifest_text, manifest_url, &self.extensions)
    }

    /// Absolute segment URIs in manifest order
    pub fn parse_segments(&self, manifest_text: &str, manifest_url: &str) -> Vec<String> {
        self.parse(manifest_text, manifest_url)
            .into_iter()
            .map(|s| s.uri)
            .collect()
    }

    /// See [`rewrite_manifest`]
    pub fn rewrite<F>(
        &self,
        manifest_text: &str,
        segments: &[ManifestSegment],
        saved: &[Option<String>],
        to_local: F,
    ) -> String
    where
        F: Fn(&str) -> String,
    {
        rewrite_manifest(manifest_text, segments, saved, &self.extensions, to_local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_extensions() {
        let codec = ManifestCodec::new(vec![".FLAC".to_string()]);
        assert!(codec.is_segment_line("track.flac"));
        assert!(!codec.is_segment_line("track.ts"));
    }

    #[test]
    fn test_parse_segments_in_order() {
        let codec = ManifestCodec::default();
        let text = "#EXTM3U\n#EXTINF:1,\n3.ts\n#EXTINF:1,\n1.ts\n#EXTINF:1,\n2.ts\n";
        assert_eq!(
            codec.parse_segments(text, "https://h/p/m.m3u8"),
            vec!["https://h/p/3.ts", "https://h/p/1.ts", "https://h/p/2.ts"]
        );
    }
}
