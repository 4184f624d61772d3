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


//! Store persistence backends
//!
//! The store is saved as one JSON snapshot. Backends only decide where that
//! document lives:
//! - [`SqlitePersistence`]: row `downloads-storage` of the `KeyValueStore` table
//! - [`JsonFilePersistence`]: a file replaced atomically on every save
//! - [`MemoryPersistence`]: process memory, for tests and throwaway sessions

use crate::config::StoreBackend;
use crate::error::{OfflineError, Result};
use crate::file::FileManager;
use crate::storage::database::Database;
use crate::storage::models::{DownloadsSnapshot, SNAPSHOT_VERSION};
use crate::storage::queries;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Key the snapshot is stored under
pub const STORE_KEY: &str = "downloads-storage";

/// Where store snapshots are loaded from and saved to
#[async_trait]
pub trait StorePersistence: Send + Sync {
    /// `None` when nothing has been saved yet
    async fn load(&self) -> Result<Option<DownloadsSnapshot>>;

    async fn save(&self, snapshot: &DownloadsSnapshot) -> Result<()>;
}

/// Build the backend selected in the config
pub async fn open_persistence(backend: &StoreBackend) -> Result<Arc<dyn StorePersistence>> {
    let persistence: Arc<dyn StorePersistence> = match backend {
        StoreBackend::Memory => Arc::new(MemoryPersistence::new()),
        StoreBackend::Json { path } => Arc::new(JsonFilePersistence::new(path.clone())),
        StoreBackend::Sqlite { path } => Arc::new(SqlitePersistence::open(path).await?),
    };
    Ok(persistence)
}

fn decode_snapshot(json: &str, source: &str) -> Result<DownloadsSnapshot> {
    let snapshot: DownloadsSnapshot = serde_json::from_str(json).map_err(|e| {
        OfflineError::PersistenceError(format!("Corrupt store snapshot in {}: {}", source, e))
    })?;

    if snapshot.version > SNAPSHOT_VERSION {
        warn!(
            version = snapshot.version,
            supported = SNAPSHOT_VERSION,
            source,
            "store snapshot written by a newer version"
        );
    }

    Ok(snapshot)
}

/// Keeps the last saved snapshot in memory
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    snapshot: Mutex<Option<DownloadsSnapshot>>,
    saves: AtomicUsize,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn last_saved(&self) -> Option<DownloadsSnapshot> {
        self.snapshot.lock().clone()
    }
}

#[async_trait]
impl StorePersistence for MemoryPersistence {
    async fn load(&self) -> Result<Option<DownloadsSnapshot>> {
        Ok(self.snapshot.lock().clone())
    }

    async fn save(&self, snapshot: &DownloadsSnapshot) -> Result<()> {
        *self.snapshot.lock() = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Snapshot stored as a JSON file
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StorePersistence for JsonFilePersistence {
    async fn load(&self) -> Result<Option<DownloadsSnapshot>> {
        if !FileManager::file_exists(&self.path).await {
            return Ok(None);
        }

        let json = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            OfflineError::PersistenceError(format!(
                "Failed to read store {}: {}",
                self.path.display(),
                e
            ))
        })?;

        decode_snapshot(&json, &self.path.display().to_string()).map(Some)
    }

    async fn save(&self, snapshot: &DownloadsSnapshot) -> Result<()> {
        let json = serde_json::to_vec(snapshot)?;
        FileManager::write_atomic(&self.path, &json).await?;
        debug!(path = %self.path.display(), bytes = json.len(), "store snapshot written");
        Ok(())
    }
}

/// Snapshot stored in the SQLite key-value table
#[derive(Debug, Clone)]
pub struct SqlitePersistence {
    db: Database,
}

impl SqlitePersistence {
    /// Open (and migrate) the database at `path`
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            db: Database::new(path).await?,
        })
    }

    pub fn with_database(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl StorePersistence for SqlitePersistence {
    async fn load(&self) -> Result<Option<DownloadsSnapshot>> {
        match queries::get_value(self.db.pool(), STORE_KEY).await? {
            Some(json) => decode_snapshot(&json, STORE_KEY).map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, snapshot: &DownloadsSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        queries::set_value(self.db.pool(), STORE_KEY, &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::SongResponse;
    use crate::storage::models::{DownloadRecord, DownloadedSong};

    fn sample() -> DownloadsSnapshot {
        let mut record = DownloadRecord::downloading();
        record.apply_status(false, true, Some("/d/s1_Song.manifest".into()));
        DownloadsSnapshot {
            version: SNAPSHOT_VERSION,
            songs: vec![DownloadedSong::new(
                SongResponse::new("s1", "Song", "https://cdn/s1.m3u8"),
                record,
            )],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = JsonFilePersistence::new(dir.path().join("state").join("store.json"));

        assert!(persistence.load().await.unwrap().is_none());

        persistence.save(&sample()).await.unwrap();
        let loaded = persistence.load().await.unwrap().unwrap();
        assert_eq!(loaded, sample());
    }

    #[tokio::test]
    async fn test_json_file_corrupt_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonFilePersistence::new(&path).load().await.unwrap_err();
        assert!(matches!(err, OfflineError::PersistenceError(_)));
    }

    #[tokio::test]
    async fn test_sqlite_roundtrip() {
        let persistence = SqlitePersistence::with_database(Database::new_in_memory().await.unwrap());

        assert!(persistence.load().await.unwrap().is_none());
        persistence.save(&sample()).await.unwrap();
        persistence.save(&sample()).await.unwrap();
        assert_eq!(persistence.load().await.unwrap().unwrap(), sample());
    }

    #[tokio::test]
    async fn test_open_persistence_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StoreBackend::Sqlite {
            path: dir.path().join("offline.db"),
        };

        let persistence = open_persistence(&backend).await.unwrap();
        persistence.save(&sample()).await.unwrap();
        assert!(persistence.load().await.unwrap().is_some());

        let memory = open_persistence(&StoreBackend::Memory).await.unwrap();
        assert!(memory.load().await.unwrap().is_none());
    }
}
