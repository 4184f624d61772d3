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


//! Download orchestration for songs, playlists and albums
//!
//! # Song pipeline
//! 1. Register a cancellation token and mark the record downloading
//! 2. Cover image (best effort)
//! 3. Fetch and parse the remote manifest
//! 4. Fetch segments in batches into `{manifest_stem}_segments/`
//! 5. Rewrite the manifest to local paths and write it atomically
//! 6. Mark downloaded and release the token
//!
//! Any failure reverts the record to not downloading / not downloaded.
//!
//! # Collections
//! Songs are downloaded one after another into the collection's own records,
//! using `{songId}.manifest`. A failed song is reverted and skipped; the
//! collection still completes. Cancelling stops the loop and leaves the
//! collection not downloaded.
//!
//! # Duplicate requests
//! A second request for an id that is already in flight returns immediately
//! without doing anything.
//!
//! # Shared files
//! Pipelines writing the same manifest (one song in a playlist and an album)
//! take a per-path lock and run one after the other; the second one finds the
//! segments on disk and only rewrites the manifest.

use crate::api::client::{ClientConfig, HttpFetcher, ReqwestFetcher};
use crate::api::models::{AlbumResponse, PlaylistResponse, SongResponse};
use crate::config::OfflineConfig;
use crate::download::progress::{DownloadProgress, ProgressCallback, ProgressTracker};
use crate::download::registry::{CancellationRegistry, DownloadKey, DownloadKind};
use crate::download::segments::SegmentFetcher;
use crate::error::{OfflineError, Result};
use crate::file::manager::FileManager;
use crate::file::paths::{unique_temp_path, DownloadLayout};
use crate::manifest::ManifestCodec;
use crate::storage::models::{
    CollectionKind, DownloadRecord, DownloadedAlbum, DownloadedCollection, DownloadedPlaylist,
    DownloadedSong,
};
use crate::storage::store::{downloading_song, DownloadStore};
use crate::storage::{open_persistence, SharedStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Where a song's record lives
#[derive(Debug, Clone, Copy)]
enum SongScope<'a> {
    Standalone,
    Member {
        kind: CollectionKind,
        collection_id: &'a str,
    },
}

/// A success whose registration was already cancelled counts as cancelled
fn settle<T>(result: Result<T>, still_registered: bool) -> Result<T> {
    match result {
        Ok(_) if !still_registered => Err(OfflineError::Cancelled),
        other => other,
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Revert a record that is still marked downloading
fn revert_in_flight(store: &mut DownloadStore, key: &DownloadKey) {
    match key.kind.collection_kind() {
        None => {
            let downloading = store
                .get_song_by_id(&key.id)
                .map(|s| s.download.is_downloading)
                .unwrap_or(false);
            if downloading {
                store.update_song_download_status(&key.id, false, false, None);
            }
        }
        Some(kind) => {
            let downloading = store
                .get_collection(kind, &key.id)
                .map(|c| c.download.is_downloading)
                .unwrap_or(false);
            if downloading {
                store.update_collection_download_status(kind, &key.id, false, false);
            }
        }
    }
}

/// Downloads songs, playlists and albums for offline playback
///
/// Built once by the application and shared behind an `Arc`.
pub struct DownloadManager {
    config: OfflineConfig,
    layout: DownloadLayout,
    files: FileManager,
    codec: ManifestCodec,
    fetcher: Arc<dyn HttpFetcher>,
    segments: SegmentFetcher,
    store: Arc<SharedStore>,
    registry: CancellationRegistry,
    manifest_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl DownloadManager {
    /// Create a manager over an already opened store
    ///
    /// Records left marked downloading by a previous process are reverted.
    pub fn new(
        config: OfflineConfig,
        fetcher: Arc<dyn HttpFetcher>,
        store: Arc<SharedStore>,
    ) -> Self {
        let interrupted = store.update(|s| s.reset_interrupted());
        if interrupted > 0 {
            info!(interrupted, "reverted downloads interrupted by a previous run");
        }

        Self {
            layout: DownloadLayout::from_config(&config),
            files: FileManager::new(config.downloads_dir.clone()),
            codec: ManifestCodec::from_config(&config),
            segments: SegmentFetcher::new(Arc::clone(&fetcher), config.segment_batch_size),
            fetcher,
            store,
            registry: CancellationRegistry::new(),
            manifest_locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Build the HTTP client and open the configured store backend
    pub async fn from_config(config: OfflineConfig) -> Result<Self> {
        config.validate()?;

        let fetcher: Arc<dyn HttpFetcher> =
            Arc::new(ReqwestFetcher::with_config(ClientConfig::from(&config))?);
        let persistence = open_persistence(&config.store).await?;
        let store = Arc::new(SharedStore::open(persistence).await?);

        Ok(Self::new(config, fetcher, store))
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub fn layout(&self) -> &DownloadLayout {
        &self.layout
    }

    pub fn store(&self) -> &Arc<SharedStore> {
        &self.store
    }

    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    // ===== Songs =====

    /// Download a song for offline playback
    ///
    /// Returns the local manifest path, or `None` if the download failed, was
    /// cancelled, or is already running.
    #[instrument(skip(self, song, on_progress), fields(song_id = %song.id))]
    pub async fn download_song(
        &self,
        song: &SongResponse,
        on_progress: Option<ProgressCallback>,
    ) -> Option<PathBuf> {
        if let Some(existing) = self.existing_download(&song.id).await {
            debug!(path = %existing.display(), "song already downloaded");
            return Some(existing);
        }

        let key = DownloadKey::song(&song.id);
        let Some(registration) = self.registry.register(key.clone()) else {
            info!("song is already downloading");
            return None;
        };

        self.store.update(|s| s.set_song(downloading_song(song)));
        self.persist().await;

        let manifest_path = self.layout.standalone_manifest_path(&song.id, &song.name);
        let result = self
            .run_song_pipeline(
                song,
                SongScope::Standalone,
                &manifest_path,
                &registration.token,
                on_progress.as_ref(),
            )
            .await;
        let (result, owned) = self.release(&key, registration.generation, result);
        let downloaded = match result {
            Ok(path) => {
                self.store.update(|s| {
                    s.update_song_download_status(&song.id, false, true, Some(path_string(&path)))
                });
                info!(path = %path.display(), "song downloaded");
                Some(path)
            }
            Err(e) => {
                if owned {
                    self.store
                        .update(|s| s.update_song_download_status(&song.id, false, false, None));
                }
                if e.is_cancellation() {
                    info!("song download cancelled");
                } else {
                    warn!(error = %e, "song download failed");
                }
                None
            }
        };

        self.persist().await;
        downloaded
    }

    /// Cancel an in-flight song download
    ///
    /// Returns whether a download was running. Segment files already on disk
    /// are kept so the next attempt resumes.
    pub async fn cancel_download(&self, song_id: &str) -> bool {
        self.cancel(DownloadKey::song(song_id)).await
    }

    /// Remove a downloaded song and its files
    ///
    /// Files shared with another record are kept. `Ok(false)` when there was
    /// nothing to delete.
    #[instrument(skip(self))]
    pub async fn delete_download(&self, song_id: &str) -> Result<bool> {
        if self.registry.cancel(&DownloadKey::song(song_id)) {
            debug!("cancelled in-flight download before delete");
        }

        let Some(song) = self.store.update(|s| s.remove_song(song_id)) else {
            return Ok(false);
        };

        let default_manifest = self.layout.standalone_manifest_path(song.id(), &song.song.name);
        self.remove_song_files(&song, default_manifest).await;
        self.store.flush().await?;

        info!("song download deleted");
        Ok(true)
    }

    pub fn is_downloaded(&self, song_id: &str) -> bool {
        self.store.read(|s| {
            s.get_song_by_id(song_id)
                .map(|x| x.download.is_downloaded)
                .unwrap_or(false)
        })
    }

    pub fn is_downloading(&self, song_id: &str) -> bool {
        self.registry.is_active(&DownloadKey::song(song_id))
            || self.store.read(|s| {
                s.get_song_by_id(song_id)
                    .map(|x| x.download.is_downloading)
                    .unwrap_or(false)
            })
    }

    /// 0 to 100; 0 for unknown songs
    pub fn get_progress(&self, song_id: &str) -> u8 {
        self.store.read(|s| {
            s.get_song_by_id(song_id)
                .map(|x| x.download.download_progress)
                .unwrap_or(0)
        })
    }

    /// Local manifest path recorded for the song
    pub fn get_local_path(&self, song_id: &str) -> Option<PathBuf> {
        self.store.read(|s| {
            s.get_song_by_id(song_id)?
                .download
                .local_manifest_path
                .as_ref()
                .map(PathBuf::from)
        })
    }

    /// Local cover path, only once the song is downloaded
    pub fn get_local_image_path(&self, song_id: &str) -> Option<PathBuf> {
        self.store.read(|s| {
            let song = s.get_song_by_id(song_id)?;
            if !song.download.is_downloaded {
                return None;
            }
            song.download.local_image_path.as_ref().map(PathBuf::from)
        })
    }

    /// What a player should open: local manifest if downloaded, remote otherwise
    pub fn playback_url(&self, song_id: &str) -> Option<String> {
        self.store
            .read(|s| s.get_song_by_id(song_id).map(|x| x.playback_url().to_string()))
    }

    /// Cover to show: local file if downloaded, remote URL otherwise
    pub fn display_image(&self, song_id: &str) -> Option<String> {
        self.store.read(|s| {
            s.get_song_by_id(song_id)?
                .display_image()
                .map(str::to_string)
        })
    }

    pub fn get_all_downloads(&self) -> Vec<DownloadedSong> {
        self.store.read(|s| s.songs().to_vec())
    }

    // ===== Playlists =====

    /// Download every song of a playlist
    ///
    /// Returns true when the loop ran to completion, even if some songs failed.
    #[instrument(skip(self, playlist, songs, on_progress), fields(playlist_id = %playlist.id))]
    pub async fn download_playlist(
        &self,
        playlist: &PlaylistResponse,
        songs: &[SongResponse],
        on_progress: Option<ProgressCallback>,
    ) -> bool {
        let collection =
            DownloadedCollection::from_playlist(playlist, DownloadRecord::downloading());
        self.download_collection(CollectionKind::Playlist, collection, songs, on_progress)
            .await
    }

    pub async fn cancel_playlist_download(&self, playlist_id: &str) -> bool {
        self.cancel(DownloadKey::playlist(playlist_id)).await
    }

    #[instrument(skip(self))]
    pub async fn delete_playlist_download(&self, playlist_id: &str) -> Result<bool> {
        self.delete_collection(CollectionKind::Playlist, playlist_id)
            .await
    }

    pub fn is_playlist_downloaded(&self, playlist_id: &str) -> bool {
        self.is_collection_downloaded(CollectionKind::Playlist, playlist_id)
    }

    pub fn is_playlist_downloading(&self, playlist_id: &str) -> bool {
        self.is_collection_downloading(CollectionKind::Playlist, playlist_id)
    }

    pub fn get_playlist_progress(&self, playlist_id: &str) -> u8 {
        self.collection_progress(CollectionKind::Playlist, playlist_id)
    }

    pub fn get_all_playlist_downloads(&self) -> Vec<DownloadedPlaylist> {
        self.store.read(|s| s.playlists().to_vec())
    }

    // ===== Albums =====

    /// Download every song of an album (songs come with the album)
    #[instrument(skip(self, album, on_progress), fields(album_id = %album.id))]
    pub async fn download_album(
        &self,
        album: &AlbumResponse,
        on_progress: Option<ProgressCallback>,
    ) -> bool {
        let collection = DownloadedCollection::from_album(album, DownloadRecord::downloading());
        self.download_collection(CollectionKind::Album, collection, &album.songs, on_progress)
            .await
    }

    pub async fn cancel_album_download(&self, album_id: &str) -> bool {
        self.cancel(DownloadKey::album(album_id)).await
    }

    #[instrument(skip(self))]
    pub async fn delete_album_download(&self, album_id: &str) -> Result<bool> {
        self.delete_collection(CollectionKind::Album, album_id).await
    }

    pub fn is_album_downloaded(&self, album_id: &str) -> bool {
        self.is_collection_downloaded(CollectionKind::Album, album_id)
    }

    pub fn is_album_downloading(&self, album_id: &str) -> bool {
        self.is_collection_downloading(CollectionKind::Album, album_id)
    }

    pub fn get_album_progress(&self, album_id: &str) -> u8 {
        self.collection_progress(CollectionKind::Album, album_id)
    }

    pub fn get_all_album_downloads(&self) -> Vec<DownloadedAlbum> {
        self.store.read(|s| s.albums().to_vec())
    }

    // ===== Everything =====

    /// Cancel everything, drop every record and delete every file they used
    ///
    /// Returns how many top-level records were removed.
    #[instrument(skip(self))]
    pub async fn delete_all_downloads(&self) -> Result<usize> {
        let cancelled = self.registry.cancel_all();
        if !cancelled.is_empty() {
            debug!(count = cancelled.len(), "cancelled in-flight downloads");
        }

        let removed = self.store.update(|s| s.clear());
        let count = removed.songs.len() + removed.playlists.len() + removed.albums.len();

        for song in &removed.songs {
            let default_manifest = self.layout.standalone_manifest_path(song.id(), &song.song.name);
            self.remove_song_files(song, default_manifest).await;
        }
        for song in removed
            .playlists
            .iter()
            .chain(removed.albums.iter())
            .flat_map(|c| c.songs.iter())
        {
            let default_manifest = self.layout.collection_manifest_path(song.id());
            self.remove_song_files(song, default_manifest).await;
        }

        self.store.flush().await?;
        info!(count, "all downloads deleted");
        Ok(count)
    }

    /// Cancel all in-flight downloads and save the store
    pub async fn shutdown(&self) -> Result<()> {
        let cancelled = self.registry.cancel_all();
        if !cancelled.is_empty() {
            self.store.update(|s| {
                for key in &cancelled {
                    revert_in_flight(s, key);
                }
            });
            info!(count = cancelled.len(), "cancelled in-flight downloads on shutdown");
        }
        self.store.flush().await
    }

    // ===== Internals =====

    /// Path of a finished download whose manifest is still on disk
    async fn existing_download(&self, song_id: &str) -> Option<PathBuf> {
        let path = self.store.read(|s| {
            let song = s.get_song_by_id(song_id)?;
            if !song.download.is_downloaded {
                return None;
            }
            song.download.local_manifest_path.as_ref().map(PathBuf::from)
        })?;

        if FileManager::file_exists(&path).await {
            Some(path)
        } else {
            None
        }
    }

    /// Drop our registration and settle the result against it
    ///
    /// A success only stands if this registration was still live, so a cancel
    /// that got in first always wins. The flag says whether the store is ours
    /// to update: false only when a newer download for the key is running.
    fn release<T>(&self, key: &DownloadKey, generation: u64, result: Result<T>) -> (Result<T>, bool) {
        let unregistered = self.registry.unregister(key, generation);
        let owned = unregistered || !self.registry.is_active(key);
        (settle(result, unregistered), owned)
    }

    /// Wait for exclusive use of `manifest_path`, or until `cancel` fires
    async fn lock_manifest(
        &self,
        manifest_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<OwnedMutexGuard<()>> {
        let lock = Arc::clone(
            self.manifest_locks
                .lock()
                .entry(manifest_path.to_path_buf())
                .or_default(),
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OfflineError::Cancelled),
            guard = lock.lock_owned() => Ok(guard),
        }
    }

    /// Forget locks nobody holds or waits on
    fn prune_manifest_locks(&self) {
        self.manifest_locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    async fn cancel(&self, key: DownloadKey) -> bool {
        let was_active = self.registry.cancel(&key);
        self.store.update(|s| revert_in_flight(s, &key));
        self.persist().await;

        if was_active {
            info!(key = %key, "download cancelled");
        }
        was_active
    }

    /// Save the store; failures are logged, never fatal to a download
    async fn persist(&self) {
        if let Err(e) = self.store.flush().await {
            warn!(error = %e, "failed to save download store");
        }
    }

    fn set_song_status(
        &self,
        scope: SongScope<'_>,
        song_id: &str,
        is_downloading: bool,
        is_downloaded: bool,
        local_manifest_path: Option<String>,
    ) {
        self.store.update(|s| match scope {
            SongScope::Standalone => s.update_song_download_status(
                song_id,
                is_downloading,
                is_downloaded,
                local_manifest_path,
            ),
            SongScope::Member {
                kind,
                collection_id,
            } => s.update_collection_song_download_status(
                kind,
                collection_id,
                song_id,
                is_downloading,
                is_downloaded,
                local_manifest_path,
            ),
        });
    }

    fn set_song_image(&self, scope: SongScope<'_>, song_id: &str, local_image_path: String) {
        self.store.update(|s| match scope {
            SongScope::Standalone => s.update_song_image(song_id, local_image_path),
            SongScope::Member {
                kind,
                collection_id,
            } => s.update_collection_song_image(kind, collection_id, song_id, local_image_path),
        });
    }

    fn report_song_progress(
        &self,
        scope: SongScope<'_>,
        song_id: &str,
        progress: Option<DownloadProgress>,
        on_progress: Option<&ProgressCallback>,
    ) {
        let Some(progress) = progress else {
            return;
        };

        self.store.update(|s| match scope {
            SongScope::Standalone => s.update_song_progress(song_id, progress.progress_percent),
            SongScope::Member {
                kind,
                collection_id,
            } => s.update_collection_song_progress(
                kind,
                collection_id,
                song_id,
                progress.progress_percent,
            ),
        });

        if let Some(callback) = on_progress {
            callback(progress);
        }
    }

    /// Steps 2 to 5 of the song pipeline; the caller owns registration and
    /// the final status
    async fn run_song_pipeline(
        &self,
        song: &SongResponse,
        scope: SongScope<'_>,
        manifest_path: &Path,
        cancel: &CancellationToken,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<PathBuf> {
        let result = match self.lock_manifest(manifest_path, cancel).await {
            Ok(guard) => {
                let result = self
                    .fetch_song_files(song, scope, manifest_path, cancel, on_progress)
                    .await;
                drop(guard);
                result
            }
            Err(e) => Err(e),
        };
        self.prune_manifest_locks();
        result
    }

    async fn fetch_song_files(
        &self,
        song: &SongResponse,
        scope: SongScope<'_>,
        manifest_path: &Path,
        cancel: &CancellationToken,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<PathBuf> {
        self.files.ensure_directory_exists(self.layout.root()).await?;

        self.download_cover(song, scope, cancel).await?;
        if cancel.is_cancelled() {
            return Err(OfflineError::Cancelled);
        }

        let manifest_text = self.fetcher.get_text(&song.url, cancel).await?;
        let segments = self.codec.parse(&manifest_text, &song.url);
        if segments.is_empty() {
            return Err(OfflineError::ManifestEmpty {
                url: song.url.clone(),
            });
        }
        debug!(segments = segments.len(), "manifest parsed");

        let uris: Vec<String> = segments.iter().map(|s| s.uri.clone()).collect();
        let mut tracker = ProgressTracker::new(uris.len() + 2);
        self.report_song_progress(scope, &song.id, tracker.set_completed(2), on_progress);

        let segments_dir = DownloadLayout::segments_dir(manifest_path);
        let outcome = self
            .segments
            .fetch_segments(&uris, &segments_dir, cancel, |batch| {
                let update = tracker.set_completed(2 + batch.completed);
                self.report_song_progress(scope, &song.id, update, on_progress);
            })
            .await?;

        if outcome.was_cancelled || cancel.is_cancelled() {
            return Err(OfflineError::Cancelled);
        }
        if outcome.succeeded() == 0 {
            return Err(OfflineError::NoSegmentsDownloaded {
                song_id: song.id.clone(),
            });
        }
        if outcome.failed() > 0 {
            if !self.config.allow_partial_segments {
                return Err(OfflineError::IncompleteSegments {
                    failed: outcome.failed(),
                    total: outcome.total(),
                });
            }
            warn!(
                failed = outcome.failed(),
                total = outcome.total(),
                "saving song without failed segments"
            );
        }

        let dir_name = segments_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let local_manifest =
            self.codec
                .rewrite(&manifest_text, &segments, &outcome.saved, |name| {
                    format!("{}/{}", dir_name, name)
                });
        FileManager::write_atomic(manifest_path, local_manifest.as_bytes()).await?;

        if tracker.percent() < 100 {
            let done = tracker.finish();
            self.report_song_progress(scope, &song.id, Some(done), on_progress);
        }

        Ok(manifest_path.to_path_buf())
    }

    /// Fetch the cover if there is one; only cancellation is an error
    async fn download_cover(
        &self,
        song: &SongResponse,
        scope: SongScope<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(url) = song.image.as_deref().filter(|u| !u.trim().is_empty()) else {
            return Ok(());
        };
        if cancel.is_cancelled() {
            return Err(OfflineError::Cancelled);
        }

        let path = self.layout.image_path(&song.id, url);
        if !FileManager::file_exists(&path).await {
            let partial = unique_temp_path(&path, ".part");
            let saved = match self.fetcher.download_to_file(url, &partial, cancel).await {
                Ok(_) => FileManager::move_or_keep_existing(&partial, &path).await,
                Err(e) => {
                    let _ = tokio::fs::remove_file(&partial).await;
                    Err(e)
                }
            };
            match saved {
                Ok(()) => debug!(path = %path.display(), "cover downloaded"),
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "cover download failed");
                    return Ok(());
                }
            }
        }

        self.set_song_image(scope, &song.id, path_string(&path));
        Ok(())
    }

    async fn download_collection(
        &self,
        kind: CollectionKind,
        collection: DownloadedCollection,
        songs: &[SongResponse],
        on_progress: Option<ProgressCallback>,
    ) -> bool {
        let collection_id = collection.id.clone();
        let key = DownloadKey::new(DownloadKind::from(kind), collection_id.as_str());
        let Some(registration) = self.registry.register(key.clone()) else {
            info!(kind = kind.as_str(), "collection is already downloading");
            return false;
        };
        let cancel = &registration.token;

        self.store.update(|s| s.set_collection(kind, collection));
        self.persist().await;

        let total = songs.len();
        let mut completed = 0;
        let mut cancelled = false;

        for song in songs {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let already_downloaded = self.store.read(|s| {
                s.get_collection_song(kind, &collection_id, &song.id)
                    .map(|x| x.download.is_downloaded)
                    .unwrap_or(false)
            });

            if already_downloaded {
                debug!(song_id = %song.id, "song already downloaded in collection");
            } else {
                self.store
                    .update(|s| s.add_song_to_collection(kind, &collection_id, downloading_song(song)));

                let scope = SongScope::Member {
                    kind,
                    collection_id: &collection_id,
                };
                let manifest_path = self.layout.collection_manifest_path(&song.id);

                match self
                    .run_song_pipeline(song, scope, &manifest_path, cancel, None)
                    .await
                {
                    Ok(path) => {
                        self.set_song_status(scope, &song.id, false, true, Some(path_string(&path)));
                        debug!(song_id = %song.id, "collection song downloaded");
                    }
                    Err(e) if e.is_cancellation() => {
                        self.set_song_status(scope, &song.id, false, false, None);
                        cancelled = true;
                        break;
                    }
                    Err(e) => {
                        self.set_song_status(scope, &song.id, false, false, None);
                        warn!(song_id = %song.id, error = %e, "collection song failed, continuing");
                    }
                }
            }

            completed += 1;
            let progress = DownloadProgress::new(completed, total);
            self.store.update(|s| {
                s.update_collection_progress(kind, &collection_id, progress.progress_percent)
            });
            if let Some(callback) = &on_progress {
                callback(progress);
            }
            self.persist().await;
        }

        let outcome = if cancelled {
            Err(OfflineError::Cancelled)
        } else {
            Ok(())
        };
        let (outcome, owned) = self.release(&key, registration.generation, outcome);
        let finished = outcome.is_ok();

        if finished {
            self.store
                .update(|s| s.update_collection_download_status(kind, &collection_id, false, true));
            if total == 0 {
                if let Some(callback) = &on_progress {
                    callback(DownloadProgress::complete(0));
                }
            }
            info!(kind = kind.as_str(), songs = total, "collection downloaded");
        } else {
            if owned {
                self.store.update(|s| {
                    s.update_collection_download_status(kind, &collection_id, false, false)
                });
            }
            info!(kind = kind.as_str(), completed, total, "collection download cancelled");
        }

        self.persist().await;
        finished
    }

    async fn delete_collection(&self, kind: CollectionKind, collection_id: &str) -> Result<bool> {
        let key = DownloadKey::new(DownloadKind::from(kind), collection_id);
        if self.registry.cancel(&key) {
            debug!("cancelled in-flight download before delete");
        }

        let Some(collection) = self
            .store
            .update(|s| s.remove_collection(kind, collection_id))
        else {
            return Ok(false);
        };

        for song in &collection.songs {
            let default_manifest = self.layout.collection_manifest_path(song.id());
            self.remove_song_files(song, default_manifest).await;
        }
        self.store.flush().await?;

        info!(kind = kind.as_str(), songs = collection.songs.len(), "collection download deleted");
        Ok(true)
    }

    fn is_collection_downloaded(&self, kind: CollectionKind, id: &str) -> bool {
        self.store.read(|s| {
            s.get_collection(kind, id)
                .map(|c| c.download.is_downloaded)
                .unwrap_or(false)
        })
    }

    fn is_collection_downloading(&self, kind: CollectionKind, id: &str) -> bool {
        self.registry
            .is_active(&DownloadKey::new(DownloadKind::from(kind), id))
            || self.store.read(|s| {
                s.get_collection(kind, id)
                    .map(|c| c.download.is_downloading)
                    .unwrap_or(false)
            })
    }

    fn collection_progress(&self, kind: CollectionKind, id: &str) -> u8 {
        self.store.read(|s| {
            s.get_collection(kind, id)
                .map(|c| c.download.download_progress)
                .unwrap_or(0)
        })
    }

    /// Delete the files of a song whose record was just removed
    ///
    /// The manifest and segments are kept while another record points at the
    /// manifest; cover images are kept while the song appears anywhere.
    async fn remove_song_files(&self, song: &DownloadedSong, default_manifest: PathBuf) {
        let manifest = song
            .download
            .local_manifest_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or(default_manifest);
        let manifest_key = path_string(&manifest);

        let (manifest_shared, song_shared) = self.store.read(|s| {
            (
                s.is_path_referenced(&manifest_key),
                s.contains_song(song.id()),
            )
        });

        if manifest_shared {
            debug!(path = %manifest.display(), "manifest still referenced, keeping files");
        } else {
            self.remove_quietly(&manifest, false).await;
            self.remove_quietly(&DownloadLayout::segments_dir(&manifest), true)
                .await;
        }

        if song_shared {
            return;
        }

        let mut images = self.layout.image_candidates(song.id());
        if let Some(path) = &song.download.local_image_path {
            let path = PathBuf::from(path);
            if !images.contains(&path) {
                images.push(path);
            }
        }
        for image in images {
            self.remove_quietly(&image, false).await;
        }
    }

    async fn remove_quietly(&self, path: &Path, is_dir: bool) {
        let result = if is_dir {
            self.files.remove_dir_all_if_exists(path).await
        } else {
            self.files.remove_file_if_exists(path).await
        };

        match result {
            Ok(true) => debug!(path = %path.display(), "removed"),
            Ok(false) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove download file"),
        }
    }
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("downloads_dir", &self.config.downloads_dir)
            .field("in_flight", &self.registry.len())
            .finish()
    }
}
