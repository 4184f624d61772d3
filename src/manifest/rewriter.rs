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


//! Rewrite a manifest to point at local segment files

use super::parser::{is_segment_line, ManifestSegment};
use std::collections::HashMap;

/// Tags that describe the next segment line and go wherever it goes
const SEGMENT_TAGS: [&str; 2] = ["#EXTINF", "#EXT-X-BYTERANGE"];

fn describes_next_segment(line: &str) -> bool {
    let trimmed = line.trim_start();
    SEGMENT_TAGS.iter().any(|tag| trimmed.starts_with(tag))
}

/// Replace segment lines with local references
///
/// `saved[i]` is the local filename of `segments[i]`, or `None` if it was not
/// saved. Every other line is copied unchanged. A segment line with nothing
/// saved is dropped together with the `#EXTINF`/`#EXT-X-BYTERANGE` lines in
/// front of it, so durations never shift onto the wrong segment.
pub fn rewrite_manifest<F>(
    manifest_text: &str,
    segments: &[ManifestSegment],
    saved: &[Option<String>],
    extensions: &[String],
    to_local: F,
) -> String
where
    F: Fn(&str) -> String,
{
    let saved_by_line: HashMap<usize, &str> = segments
        .iter()
        .zip(saved.iter())
        .filter_map(|(segment, name)| name.as_deref().map(|n| (segment.line_index, n)))
        .collect();

    let mut output: Vec<String> = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for (index, line) in manifest_text.split('\n').enumerate() {
        if describes_next_segment(line) {
            pending.push(line);
            continue;
        }

        if is_segment_line(line, extensions) {
            match saved_by_line.get(&index) {
                Some(name) => {
                    output.extend(pending.drain(..).map(str::to_string));
                    output.push(to_local(name));
                }
                None => pending.clear(),
            }
            continue;
        }

        output.extend(pending.drain(..).map(str::to_string));
        output.push(line.to_string());
    }

    output.extend(pending.drain(..).map(str::to_string));
    output.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::parser::parse_manifest;

    const URL: &str = "https://cdn.example.com/s/index.m3u8";

    fn exts() -> Vec<String> {
        ["ts", "m4s", "mp4", "aac", "seg"].iter().map(|s| s.to_string()).collect()
    }

    fn local(name: &str) -> String {
        format!("1_Song_segments/{}", name)
    }

    #[test]
    fn test_all_saved() {
        let text = "#EXTM3U\n#EXTINF:10,\na.seg\n#EXTINF:10,\nb.seg\n#EXTINF:10,\nc.seg\n#EXT-X-ENDLIST\n";
        let segments = parse_manifest(text, URL, &exts());
        let saved: Vec<Option<String>> =
            vec![Some("a.seg".into()), Some("b.seg".into()), Some("c.seg".into())];

        let rewritten = rewrite_manifest(text, &segments, &saved, &exts(), local);

        assert_eq!(
            rewritten,
            "#EXTM3U\n#EXTINF:10,\n1_Song_segments/a.seg\n#EXTINF:10,\n1_Song_segments/b.seg\n\
             #EXTINF:10,\n1_Song_segments/c.seg\n#EXT-X-ENDLIST\n"
        );
    }

    #[test]
    fn test_failed_segment_keeps_alignment() {
        let text = "#EXTM3U\n#EXTINF:4,\na.seg\n#EXTINF:5,\nb.seg\n#EXTINF:6,\nc.seg\n#EXT-X-ENDLIST";
        let segments = parse_manifest(text, URL, &exts());
        let saved = vec![Some("a.seg".to_string()), None, Some("c.seg".to_string())];

        let rewritten = rewrite_manifest(text, &segments, &saved, &exts(), local);

        assert_eq!(
            rewritten,
            "#EXTM3U\n#EXTINF:4,\n1_Song_segments/a.seg\n#EXTINF:6,\n1_Song_segments/c.seg\n#EXT-X-ENDLIST"
        );
    }

    #[test]
    fn test_byterange_dropped_with_segment() {
        let text = "#EXTINF:4,\n#EXT-X-BYTERANGE:100@0\nx.mp4\n#EXTINF:4,\n#EXT-X-BYTERANGE:100@100\ny.mp4";
        let segments = parse_manifest(text, URL, &exts());
        let saved = vec![None, Some("y.mp4".to_string())];

        let rewritten = rewrite_manifest(text, &segments, &saved, &exts(), |n| n.to_string());

        assert_eq!(rewritten, "#EXTINF:4,\n#EXT-X-BYTERANGE:100@100\ny.mp4");
    }

    #[test]
    fn test_non_segment_lines_unchanged() {
        let text = "#EXTM3U\n#EXT-X-KEY:METHOD=NONE\n\n#EXTINF:3,\nhttps://other/a.ts?t=1\n";
        let segments = parse_manifest(text, URL, &exts());
        let saved = vec![Some("a.ts".to_string())];

        let rewritten = rewrite_manifest(text, &segments, &saved, &exts(), local);

        assert_eq!(
            rewritten,
            "#EXTM3U\n#EXT-X-KEY:METHOD=NONE\n\n#EXTINF:3,\n1_Song_segments/a.ts\n"
        );
    }
}
