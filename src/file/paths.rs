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


//! Local file layout
//!
//! Everything lives flat under the downloads directory:
//!
//! ```text
//! downloads/
//!   {songId}_{Sanitized_Name}.manifest      standalone song
//!   {songId}_{Sanitized_Name}_segments/     its segments
//!   {songId}.manifest                       song downloaded as part of a collection
//!   {songId}_segments/
//!   {songId}_image.{ext}                    cover image
//! ```
//!
//! Collection copies of a song share `{songId}.manifest` across playlists and
//! albums; deletes check the store for remaining references before removing.
//! Song ids go through [`file_safe_id`] before they reach a file name.

use crate::config::OfflineConfig;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Extension of rewritten local manifests
pub const MANIFEST_EXTENSION: &str = "manifest";

/// Fallback when a cover URL has no usable extension
pub const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

const SEGMENTS_DIR_SUFFIX: &str = "_segments";

lazy_static! {
    static ref NON_ALPHANUMERIC: Regex = Regex::new(r"[^a-zA-Z0-9]").expect("valid regex");
    static ref UNSAFE_ID_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").expect("valid regex");
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Replace every character outside `[a-zA-Z0-9]` with `_`
pub fn sanitize_name(name: &str) -> String {
    NON_ALPHANUMERIC.replace_all(name, "_").into_owned()
}

/// Song id as it appears in file names
///
/// Anything outside `[a-zA-Z0-9_-]` becomes `_`, so an id can never add a
/// path component or climb out of the downloads directory.
pub fn file_safe_id(id: &str) -> String {
    UNSAFE_ID_CHARS.replace_all(id, "_").into_owned()
}

/// A temp sibling of `path` that no other writer in this process will pick
///
/// `a.ts` becomes `a.ts.{pid}-{n}{suffix}`.
pub fn unique_temp_path(path: &Path, suffix: &str) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    append_suffix(path, &format!(".{}-{}{}", std::process::id(), n, suffix))
}

/// `path` with `suffix` appended to its last component (`a.ts` -> `a.ts.part`)
pub fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Last path component of a URL with query and fragment removed
fn url_basename(uri: &str) -> &str {
    let without_fragment = uri.split('#').next().unwrap_or(uri);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    without_query.rsplit('/').next().unwrap_or(without_query)
}

/// Extension (lowercase, no dot) of a URL's last path component
pub fn url_extension(uri: &str) -> Option<String> {
    let name = url_basename(uri);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_ascii_lowercase()),
        _ => None,
    }
}

/// Local filename for the segment at `index`
///
/// The URL's last path component with the query stripped; anything without an
/// extension becomes `segment_{index:03}.ts`.
pub fn segment_filename(uri: &str, index: usize) -> String {
    let name = url_basename(uri);
    if name.is_empty() || name == "." || name == ".." || !name.contains('.') {
        format!("segment_{:03}.ts", index)
    } else {
        name.to_string()
    }
}

/// Segment filenames for a whole manifest, in order, never repeating
///
/// A name already taken by an earlier segment gets its index as a prefix.
pub fn unique_segment_filenames(uris: &[String]) -> Vec<String> {
    let mut used = HashSet::with_capacity(uris.len());
    uris.iter()
        .enumerate()
        .map(|(index, uri)| {
            let mut name = segment_filename(uri, index);
            if used.contains(&name) {
                name = format!("{:03}_{}", index, name);
            }
            used.insert(name.clone());
            name
        })
        .collect()
}

/// File naming under the downloads directory
#[derive(Debug, Clone)]
pub struct DownloadLayout {
    root: PathBuf,
    image_extensions: Vec<String>,
}

impl DownloadLayout {
    pub fn new<P: Into<PathBuf>>(root: P, image_extensions: Vec<String>) -> Self {
        Self {
            root: root.into(),
            image_extensions: image_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &OfflineConfig) -> Self {
        Self::new(config.downloads_dir.clone(), config.image_extensions.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{songId}_{sanitizedName}.manifest`
    pub fn standalone_manifest_path(&self, song_id: &str, song_name: &str) -> PathBuf {
        self.root.join(format!(
            "{}_{}.{}",
            file_safe_id(song_id),
            sanitize_name(song_name),
            MANIFEST_EXTENSION
        ))
    }

    /// `{songId}.manifest`
    pub fn collection_manifest_path(&self, song_id: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", file_safe_id(song_id), MANIFEST_EXTENSION))
    }

    /// Manifest path without its extension, plus `_segments`
    pub fn segments_dir(manifest_path: &Path) -> PathBuf {
        let stem = manifest_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = format!("{}{}", stem, SEGMENTS_DIR_SUFFIX);
        match manifest_path.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        }
    }

    /// Extension to save a cover under, from its URL
    pub fn image_extension(&self, image_url: &str) -> String {
        url_extension(image_url)
            .filter(|ext| self.image_extensions.iter().any(|known| known == ext))
            .unwrap_or_else(|| DEFAULT_IMAGE_EXTENSION.to_string())
    }

    /// `{songId}_image.{ext}`
    pub fn image_path(&self, song_id: &str, image_url: &str) -> PathBuf {
        self.root
            .join(format!("{}_image.{}", file_safe_id(song_id), self.image_extension(image_url)))
    }

    /// Every image path a song could have been saved under
    pub fn image_candidates(&self, song_id: &str) -> Vec<PathBuf> {
        let mut extensions: Vec<&str> = self.image_extensions.iter().map(String::as_str).collect();
        if !extensions.contains(&DEFAULT_IMAGE_EXTENSION) {
            extensions.push(DEFAULT_IMAGE_EXTENSION);
        }
        let id = file_safe_id(song_id);
        extensions
            .into_iter()
            .map(|ext| self.root.join(format!("{}_image.{}", id, ext)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> DownloadLayout {
        DownloadLayout::from_config(&OfflineConfig::default().with_downloads_dir("/docs/downloads"))
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Hello, World!"), "Hello__World_");
        assert_eq!(sanitize_name("Señor"), "Se_or");
        assert_eq!(sanitize_name("abc123"), "abc123");
    }

    #[test]
    fn test_manifest_paths() {
        let layout = layout();
        assert_eq!(
            layout.standalone_manifest_path("42", "My Song"),
            PathBuf::from("/docs/downloads/42_My_Song.manifest")
        );
        assert_eq!(
            layout.collection_manifest_path("42"),
            PathBuf::from("/docs/downloads/42.manifest")
        );
    }

    #[test]
    fn test_segments_dir() {
        assert_eq!(
            DownloadLayout::segments_dir(Path::new("/docs/downloads/42_My_Song.manifest")),
            PathBuf::from("/docs/downloads/42_My_Song_segments")
        );
        assert_eq!(
            DownloadLayout::segments_dir(Path::new("/docs/downloads/42.manifest")),
            PathBuf::from("/docs/downloads/42_segments")
        );
    }

    #[test]
    fn test_image_extension_inference() {
        let layout = layout();
        assert_eq!(layout.image_extension("https://img.example.com/a/cover.PNG?w=300"), "png");
        assert_eq!(layout.image_extension("https://img.example.com/a/cover.webp#x"), "webp");
        assert_eq!(layout.image_extension("https://img.example.com/a/cover.bmp"), "jpg");
        assert_eq!(layout.image_extension("https://img.example.com/a/cover"), "jpg");
        assert_eq!(
            layout.image_path("7", "https://img/c.gif"),
            PathBuf::from("/docs/downloads/7_image.gif")
        );
    }

    #[test]
    fn test_image_candidates_cover_all_extensions() {
        let candidates = layout().image_candidates("7");
        assert_eq!(candidates.len(), 5);
        assert!(candidates.contains(&PathBuf::from("/docs/downloads/7_image.jpeg")));
    }

    #[test]
    fn test_segment_filename() {
        assert_eq!(segment_filename("https://cdn/a/seg1.ts?token=abc", 0), "seg1.ts");
        assert_eq!(segment_filename("https://cdn/a/chunk", 4), "segment_004.ts");
        assert_eq!(segment_filename("https://cdn/a/", 12), "segment_012.ts");
    }

    #[test]
    fn test_unique_segment_filenames() {
        let uris = vec![
            "https://cdn/hi/index.ts".to_string(),
            "https://cdn/lo/index.ts".to_string(),
            "https://cdn/a.ts".to_string(),
        ];
        assert_eq!(
            unique_segment_filenames(&uris),
            vec!["index.ts", "001_index.ts", "a.ts"]
        );
    }

    #[test]
    fn test_ids_cannot_escape_downloads_dir() {
        let layout = layout();
        let root = Path::new("/docs/downloads");

        let paths = [
            layout.standalone_manifest_path("../x", "Song"),
            layout.collection_manifest_path("../../etc/x"),
            layout.image_path("a/b", "https://img/c.png"),
            DownloadLayout::segments_dir(&layout.collection_manifest_path("..")),
        ];
        for path in paths.iter().chain(layout.image_candidates("..").iter()) {
            assert_eq!(path.parent(), Some(root), "{}", path.display());
        }
        assert_eq!(
            layout.collection_manifest_path("../x"),
            PathBuf::from("/docs/downloads/___x.manifest")
        );
        assert_eq!(file_safe_id("abc-12_Z"), "abc-12_Z");
    }

    #[test]
    fn test_unique_temp_paths_differ() {
        let target = Path::new("/d/x_segments/a.ts");
        let first = unique_temp_path(target, ".part");
        let second = unique_temp_path(target, ".part");

        assert_ne!(first, second);
        assert_eq!(first.parent(), target.parent());
        assert!(first.to_string_lossy().ends_with(".part"));
    }

    #[test]
    fn test_append_suffix() {
        assert_eq!(
            append_suffix(Path::new("/d/x_segments/a.ts"), ".part"),
            PathBuf::from("/d/x_segments/a.ts.part")
        );
    }
}
