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


//! Download store and its persistence
//!
//! - [`DownloadStore`]: the records, mutated synchronously
//! - [`SharedStore`]: lock + dirty flag + persistence backend around it
//! - [`StorePersistence`]: SQLite, JSON file or memory
//!
//! # Usage Example
//! ```no_run
//! use offline_core::storage::{SharedStore, JsonFilePersistence};
//! use std::sync::Arc;
//!
//! # async fn example() -> offline_core::Result<()> {
//! let store = SharedStore::open(Arc::new(JsonFilePersistence::new("./downloads.json"))).await?;
//! let downloaded = store.read(|s| s.songs().iter().filter(|x| x.download.is_downloaded).count());
//! store.update(|s| s.remove_song("song-1"));
//! store.flush().await?;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod migrations;
pub mod models;
pub mod persistence;
pub mod queries;
pub mod store;

// Re-export commonly used types
pub use database::Database;
pub use models::{
    CollectionKind, DownloadRecord, DownloadedAlbum, DownloadedCollection, DownloadedPlaylist,
    DownloadedSong, DownloadsSnapshot,
};
pub use persistence::{
    open_persistence, JsonFilePersistence, MemoryPersistence, SqlitePersistence, StorePersistence,
};
pub use store::DownloadStore;

use crate::error::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Shared, persisted download store
///
/// Mutations go through [`SharedStore::update`], which marks the store dirty;
/// [`SharedStore::flush`] writes one snapshot for any number of mutations.
/// The lock is synchronous and never held across an `.await`.
pub struct SharedStore {
    state: Mutex<DownloadStore>,
    persistence: Arc<dyn StorePersistence>,
    dirty: AtomicBool,
    save_lock: tokio::sync::Mutex<()>,
}

impl SharedStore {
    /// Load the last snapshot from `persistence` (empty store if none)
    pub async fn open(persistence: Arc<dyn StorePersistence>) -> Result<Self> {
        let store = match persistence.load().await? {
            Some(snapshot) => {
                info!(
                    songs = snapshot.songs.len(),
                    playlists = snapshot.playlists.len(),
                    albums = snapshot.albums.len(),
                    "download store loaded"
                );
                DownloadStore::from_snapshot(snapshot)
            }
            None => DownloadStore::new(),
        };

        Ok(Self::with_store(store, persistence))
    }

    /// Empty store that is never written anywhere
    pub fn in_memory() -> Self {
        Self::with_store(DownloadStore::new(), Arc::new(MemoryPersistence::new()))
    }

    pub fn with_store(store: DownloadStore, persistence: Arc<dyn StorePersistence>) -> Self {
        Self {
            state: Mutex::new(store),
            persistence,
            dirty: AtomicBool::new(false),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Read under the lock
    pub fn read<R>(&self, f: impl FnOnce(&DownloadStore) -> R) -> R {
        f(&self.state.lock())
    }

    /// Mutate under the lock and mark the store dirty
    pub fn update<R>(&self, f: impl FnOnce(&mut DownloadStore) -> R) -> R {
        let result = f(&mut self.state.lock());
        self.dirty.store(true, Ordering::SeqCst);
        result
    }

    pub fn snapshot(&self) -> DownloadsSnapshot {
        self.read(|s| s.snapshot())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Save a snapshot if anything changed since the last save
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;

        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let snapshot = self.snapshot();
        if let Err(e) = self.persistence.save(&snapshot).await {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }

        debug!(songs = snapshot.songs.len(), "download store flushed");
        Ok(())
    }
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStore")
            .field("state", &*self.state.lock())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
