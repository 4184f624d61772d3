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


//! Segment extraction
//!
//! # Line rules
//! - Blank lines and `#` lines (tags, comments) are not segments
//! - A line is a segment when its path extension is a known segment extension
//! - `http(s)://...` references are kept as they are
//! - `/path` resolves against the manifest's scheme and host
//! - anything else resolves against the manifest's directory

use crate::file::paths::url_extension;
use tracing::warn;
use url::Url;

/// A segment reference found in a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSegment {
    /// Zero-based line number in the manifest text
    pub line_index: usize,
    /// Absolute URI
    pub uri: String,
}

/// Whether `line` references a segment
pub fn is_segment_line(line: &str, extensions: &[String]) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return false;
    }
    match url_extension(trimmed) {
        Some(ext) => extensions.iter().any(|known| known.eq_ignore_ascii_case(&ext)),
        None => false,
    }
}

fn is_absolute(reference: &str) -> bool {
    let lower = reference.get(..8).unwrap_or(reference).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Find every segment line and resolve it to an absolute URI
///
/// Relative references are dropped (with a warning) when the manifest URL
/// itself cannot be parsed.
pub fn parse_manifest(
    manifest_text: &str,
    manifest_url: &str,
    extensions: &[String],
) -> Vec<ManifestSegment> {
    let base = match Url::parse(manifest_url) {
        Ok(base) => Some(base),
        Err(e) => {
            warn!(manifest_url, error = %e, "manifest URL does not parse; relative segments skipped");
            None
        }
    };

    manifest_text
        .split('\n')
        .enumerate()
        .filter(|(_, line)| is_segment_line(line, extensions))
        .filter_map(|(line_index, line)| {
            let reference = line.trim();
            let uri = if is_absolute(reference) {
                reference.to_string()
            } else {
                base.as_ref()?.join(reference).ok()?.to_string()
            };
            Some(ManifestSegment { line_index, uri })
        })
        .collect()
}
