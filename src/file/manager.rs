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


//! File operations and management
//!
//! # Key Operations
//! - Atomic writes (temp file + rename, with retry)
//! - Deletes that treat a missing target as success
//! - Directory creation
//!
//! Deletes are confined to the downloads directory: paths read back from a
//! persisted store are never trusted to point anywhere else.

use crate::error::{OfflineError, Result};
use crate::file::paths::unique_temp_path;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;
use tracing::warn;

/// Maximum retry attempts for file operations
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay between retry attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// File manager for the downloads directory
#[derive(Debug, Clone)]
pub struct FileManager {
    root: PathBuf,
}

impl FileManager {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` is inside the downloads directory
    pub fn is_within_root(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
            && !path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
    }

    /// Ensure directory exists, creating parent directories as needed
    pub async fn ensure_directory_exists(&self, path: &Path) -> Result<()> {
        if Self::file_exists(path).await {
            return Ok(());
        }

        fs::create_dir_all(path).await.map_err(|e| {
            OfflineError::FileIoError(format!(
                "Failed to create directory {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Check if file or directory exists
    pub async fn file_exists(path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    /// Write `contents` to a sibling temp file, then rename it over `path`
    pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    OfflineError::FileIoError(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let temp_path = unique_temp_path(path, ".tmp");
        fs::write(&temp_path, contents).await.map_err(|e| {
            OfflineError::FileIoError(format!("Write failed: {}: {}", temp_path.display(), e))
        })?;

        if let Err(e) = Self::move_into_place(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        Ok(())
    }

    /// Rename `source` over `destination` with retry
    pub async fn move_into_place(source: &Path, destination: &Path) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match fs::rename(source, destination).await {
                Ok(()) => return Ok(()),
                Err(e) if attempts >= MAX_RETRY_ATTEMPTS => {
                    return Err(OfflineError::FileIoError(format!(
                        "Failed to move file after {} attempts: {} -> {}: {}",
                        MAX_RETRY_ATTEMPTS,
                        source.display(),
                        destination.display(),
                        e
                    )));
                }
                Err(_) => {
                    sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    /// Like [`FileManager::move_into_place`], for downloads of immutable content
    ///
    /// When the rename fails but `destination` exists, another writer already
    /// placed the same file: `source` is discarded and the move counts as done.
    pub async fn move_or_keep_existing(source: &Path, destination: &Path) -> Result<()> {
        match Self::move_into_place(source, destination).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(source).await;
                if Self::file_exists(destination).await {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Delete a file; missing files are not an error
    ///
    /// Returns whether a file was removed. Paths outside the downloads
    /// directory are skipped.
    pub async fn remove_file_if_exists(&self, path: &Path) -> Result<bool> {
        if !self.is_within_root(path) {
            warn!(path = %path.display(), "refusing to delete outside downloads directory");
            return Ok(false);
        }

        let mut attempts = 0;

        loop {
            attempts += 1;

            match fs::remove_file(path).await {
                Ok(()) => return Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
                Err(e) if attempts >= MAX_RETRY_ATTEMPTS => {
                    return Err(OfflineError::FileIoError(format!(
                        "Failed to delete file after {} attempts: {}: {}",
                        MAX_RETRY_ATTEMPTS,
                        path.display(),
                        e
                    )));
                }
                Err(_) => {
                    sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    /// Recursively delete a directory; missing directories are not an error
    pub async fn remove_dir_all_if_exists(&self, path: &Path) -> Result<bool> {
        if !self.is_within_root(path) || path == self.root {
            warn!(path = %path.display(), "refusing to delete outside downloads directory");
            return Ok(false);
        }

        let mut attempts = 0;

        loop {
            attempts += 1;

            match fs::remove_dir_all(path).await {
                Ok(()) => return Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
                Err(e) if attempts >= MAX_RETRY_ATTEMPTS => {
                    return Err(OfflineError::FileIoError(format!(
                        "Failed to delete directory after {} attempts: {}: {}",
                        MAX_RETRY_ATTEMPTS,
                        path.display(),
                        e
                    )));
                }
                Err(_) => {
                    sleep(RETRY_DELAY).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_atomic_creates_parents_and_replaces() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a").join("b.manifest");

        FileManager::write_atomic(&path, b"one").await.unwrap();
        FileManager::write_atomic(&path, b"two").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("b.manifest")]);
    }

    #[tokio::test]
    async fn test_concurrent_atomic_writes_do_not_collide() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("x.manifest");

        let (a, b) = tokio::join!(
            FileManager::write_atomic(&path, b"same"),
            FileManager::write_atomic(&path, b"same")
        );

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "same");
    }

    #[tokio::test]
    async fn test_move_keeps_existing_destination() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("seg0.ts");
        std::fs::write(&destination, b"first").unwrap();

        // source already taken by another writer
        let missing = temp_dir.path().join("seg0.ts.1-1.part");
        FileManager::move_or_keep_existing(&missing, &destination)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), b"first");

        let gone = temp_dir.path().join("gone.ts");
        let result = FileManager::move_or_keep_existing(&missing, &gone).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_remove_missing_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let manager = FileManager::new(temp_dir.path());

        let removed = manager
            .remove_file_if_exists(&temp_dir.path().join("missing.manifest"))
            .await
            .unwrap();
        assert!(!removed);

        let removed = manager
            .remove_dir_all_if_exists(&temp_dir.path().join("missing_segments"))
            .await
            .unwrap();
        assert!(!removed);
    }

    #[tokio::test]
    async fn test_remove_dir_recursive() {
        let temp_dir = TempDir::new().unwrap();
        let manager = FileManager::new(temp_dir.path());
        let segments = temp_dir.path().join("1_segments");
        std::fs::create_dir_all(&segments).unwrap();
        std::fs::write(segments.join("a.ts"), b"x").unwrap();

        assert!(manager.remove_dir_all_if_exists(&segments).await.unwrap());
        assert!(!segments.exists());
    }

    #[tokio::test]
    async fn test_refuses_paths_outside_root() {
        let root = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let outside = other.path().join("keep.txt");
        std::fs::write(&outside, b"x").unwrap();

        let manager = FileManager::new(root.path());
        assert!(!manager.remove_file_if_exists(&outside).await.unwrap());
        assert!(outside.exists());

        let sneaky = root.path().join("..").join("keep.txt");
        assert!(!manager.is_within_root(&sneaky));
        assert!(!manager.remove_dir_all_if_exists(root.path()).await.unwrap());
    }
}
