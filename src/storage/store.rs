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


//! In-memory download store
//!
//! Plain data plus a mutation API; no locking and no I/O. [`SharedStore`]
//! wraps it for concurrent use and persistence.
//!
//! Every update is addressed by id (and song id for nested songs), touches only
//! that member and returns whether the target existed.
//!
//! [`SharedStore`]: crate::storage::SharedStore

use crate::storage::models::{
    CollectionKind, DownloadRecord, DownloadedAlbum, DownloadedCollection, DownloadedPlaylist,
    DownloadedSong, DownloadsSnapshot, SNAPSHOT_VERSION,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadStore {
    songs: Vec<DownloadedSong>,
    playlists: Vec<DownloadedPlaylist>,
    albums: Vec<DownloadedAlbum>,
}

impl DownloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: DownloadsSnapshot) -> Self {
        Self {
            songs: snapshot.songs,
            playlists: snapshot.playlists,
            albums: snapshot.albums,
        }
    }

    pub fn snapshot(&self) -> DownloadsSnapshot {
        DownloadsSnapshot {
            version: SNAPSHOT_VERSION,
            songs: self.songs.clone(),
            playlists: self.playlists.clone(),
            albums: self.albums.clone(),
        }
    }

    pub fn songs(&self) -> &[DownloadedSong] {
        &self.songs
    }

    pub fn playlists(&self) -> &[DownloadedPlaylist] {
        &self.playlists
    }

    pub fn albums(&self) -> &[DownloadedAlbum] {
        &self.albums
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty() && self.playlists.is_empty() && self.albums.is_empty()
    }

    /// Drop every record, returning what was removed
    pub fn clear(&mut self) -> DownloadsSnapshot {
        DownloadsSnapshot {
            version: SNAPSHOT_VERSION,
            songs: std::mem::take(&mut self.songs),
            playlists: std::mem::take(&mut self.playlists),
            albums: std::mem::take(&mut self.albums),
        }
    }

    /// Whether any record, standalone or nested, still points at `path`
    pub fn is_path_referenced(&self, path: &str) -> bool {
        self.songs.iter().any(|s| s.references_path(path))
            || self
                .playlists
                .iter()
                .chain(self.albums.iter())
                .flat_map(|c| c.songs.iter())
                .any(|s| s.references_path(path))
    }

    /// Whether the song appears anywhere, standalone or inside a collection
    pub fn contains_song(&self, song_id: &str) -> bool {
        self.get_song_by_id(song_id).is_some()
            || self
                .playlists
                .iter()
                .chain(self.albums.iter())
                .any(|c| c.song(song_id).is_some())
    }

    /// Clear `is_downloading` on every record
    ///
    /// Nothing is in flight when a store is first loaded, so any such flag was
    /// left behind by an interrupted process. Returns how many were reset.
    pub fn reset_interrupted(&mut self) -> usize {
        let mut reset = 0;
        let records = self
            .songs
            .iter_mut()
            .map(|s| &mut s.download)
            .chain(
                self.playlists
                    .iter_mut()
                    .chain(self.albums.iter_mut())
                    .flat_map(|c| {
                        std::iter::once(&mut c.download)
                            .chain(c.songs.iter_mut().map(|s| &mut s.download))
                    }),
            );
        for record in records {
            if record.is_downloading {
                record.apply_status(false, false, None);
                reset += 1;
            }
        }
        reset
    }

    // ===== Standalone songs =====

    pub fn get_song_by_id(&self, id: &str) -> Option<&DownloadedSong> {
        self.songs.iter().find(|s| s.id() == id)
    }

    fn song_mut(&mut self, id: &str) -> Option<&mut DownloadedSong> {
        self.songs.iter_mut().find(|s| s.id() == id)
    }

    /// Insert, or merge into the existing record
    pub fn set_song(&mut self, song: DownloadedSong) {
        match self.song_mut(song.id()) {
            Some(existing) => {
                existing.song = song.song;
                existing.download.merge_from(song.download);
            }
            None => self.songs.push(song),
        }
    }

    pub fn update_song_progress(&mut self, id: &str, percent: u8) -> bool {
        self.song_mut(id)
            .map(|s| s.download.apply_progress(percent))
            .is_some()
    }

    pub fn update_song_download_status(
        &mut self,
        id: &str,
        is_downloading: bool,
        is_downloaded: bool,
        local_manifest_path: Option<String>,
    ) -> bool {
        self.song_mut(id)
            .map(|s| {
                s.download
                    .apply_status(is_downloading, is_downloaded, local_manifest_path)
            })
            .is_some()
    }

    pub fn update_song_image(&mut self, id: &str, local_image_path: String) -> bool {
        self.song_mut(id)
            .map(|s| s.download.local_image_path = Some(local_image_path))
            .is_some()
    }

    pub fn remove_song(&mut self, id: &str) -> Option<DownloadedSong> {
        let index = self.songs.iter().position(|s| s.id() == id)?;
        Some(self.songs.remove(index))
    }

    // ===== Collections (shared by playlists and albums) =====

    fn collections(&self, kind: CollectionKind) -> &Vec<DownloadedCollection> {
        match kind {
            CollectionKind::Playlist => &self.playlists,
            CollectionKind::Album => &self.albums,
        }
    }

    fn collections_mut(&mut self, kind: CollectionKind) -> &mut Vec<DownloadedCollection> {
        match kind {
            CollectionKind::Playlist => &mut self.playlists,
            CollectionKind::Album => &mut self.albums,
        }
    }

    fn collection_mut(&mut self, kind: CollectionKind, id: &str) -> Option<&mut DownloadedCollection> {
        self.collections_mut(kind).iter_mut().find(|c| c.id == id)
    }

    pub fn get_collection(&self, kind: CollectionKind, id: &str) -> Option<&DownloadedCollection> {
        self.collections(kind).iter().find(|c| c.id == id)
    }

    /// Insert, or merge into the existing record
    ///
    /// Existing nested songs are kept when the incoming collection has none.
    pub fn set_collection(&mut self, kind: CollectionKind, collection: DownloadedCollection) {
        match self.collection_mut(kind, &collection.id) {
            Some(existing) => {
                existing.name = collection.name;
                existing.image = collection.image;
                existing.color = collection.color;
                if !collection.songs.is_empty() {
                    existing.songs = collection.songs;
                }
                existing.download.merge_from(collection.download);
            }
            None => self.collections_mut(kind).push(collection),
        }
    }

    pub fn update_collection_progress(&mut self, kind: CollectionKind, id: &str, percent: u8) -> bool {
        self.collection_mut(kind, id)
            .map(|c| c.download.apply_progress(percent))
            .is_some()
    }

    pub fn update_collection_download_status(
        &mut self,
        kind: CollectionKind,
        id: &str,
        is_downloading: bool,
        is_downloaded: bool,
    ) -> bool {
        self.collection_mut(kind, id)
            .map(|c| c.download.apply_status(is_downloading, is_downloaded, None))
            .is_some()
    }

    pub fn remove_collection(&mut self, kind: CollectionKind, id: &str) -> Option<DownloadedCollection> {
        let list = self.collections_mut(kind);
        let index = list.iter().position(|c| c.id == id)?;
        Some(list.remove(index))
    }

    /// Replace the nested song with the same id, or append it
    pub fn add_song_to_collection(
        &mut self,
        kind: CollectionKind,
        collection_id: &str,
        song: DownloadedSong,
    ) -> bool {
        let Some(collection) = self.collection_mut(kind, collection_id) else {
            return false;
        };
        match collection.song_mut(song.id()) {
            Some(existing) => *existing = song,
            None => collection.songs.push(song),
        }
        true
    }

    pub fn get_collection_song(
        &self,
        kind: CollectionKind,
        collection_id: &str,
        song_id: &str,
    ) -> Option<&DownloadedSong> {
        self.get_collection(kind, collection_id)?.song(song_id)
    }

    fn collection_song_mut(
        &mut self,
        kind: CollectionKind,
        collection_id: &str,
        song_id: &str,
    ) -> Option<&mut DownloadedSong> {
        self.collection_mut(kind, collection_id)?.song_mut(song_id)
    }

    pub fn update_collection_song_progress(
        &mut self,
        kind: CollectionKind,
        collection_id: &str,
        song_id: &str,
        percent: u8,
    ) -> bool {
        self.collection_song_mut(kind, collection_id, song_id)
            .map(|s| s.download.apply_progress(percent))
            .is_some()
    }

    pub fn update_collection_song_download_status(
        &mut self,
        kind: CollectionKind,
        collection_id: &str,
        song_id: &str,
        is_downloading: bool,
        is_downloaded: bool,
        local_manifest_path: Option<String>,
    ) -> bool {
        self.collection_song_mut(kind, collection_id, song_id)
            .map(|s| {
                s.download
                    .apply_status(is_downloading, is_downloaded, local_manifest_path)
            })
            .is_some()
    }

    pub fn update_collection_song_image(
        &mut self,
        kind: CollectionKind,
        collection_id: &str,
        song_id: &str,
        local_image_path: String,
    ) -> bool {
        self.collection_song_mut(kind, collection_id, song_id)
            .map(|s| s.download.local_image_path = Some(local_image_path))
            .is_some()
    }

    // ===== Playlists =====

    pub fn get_playlist_by_id(&self, id: &str) -> Option<&DownloadedPlaylist> {
        self.get_collection(CollectionKind::Playlist, id)
    }

    pub fn set_playlist(&mut self, playlist: DownloadedPlaylist) {
        self.set_collection(CollectionKind::Playlist, playlist)
    }

    pub fn update_playlist_progress(&mut self, id: &str, percent: u8) -> bool {
        self.update_collection_progress(CollectionKind::Playlist, id, percent)
    }

    pub fn update_playlist_download_status(
        &mut self,
        id: &str,
        is_downloading: bool,
        is_downloaded: bool,
    ) -> bool {
        self.update_collection_download_status(
            CollectionKind::Playlist,
            id,
            is_downloading,
            is_downloaded,
        )
    }

    pub fn remove_playlist(&mut self, id: &str) -> Option<DownloadedPlaylist> {
        self.remove_collection(CollectionKind::Playlist, id)
    }

    pub fn add_song_to_playlist(&mut self, playlist_id: &str, song: DownloadedSong) -> bool {
        self.add_song_to_collection(CollectionKind::Playlist, playlist_id, song)
    }

    pub fn get_playlist_song_by_id(&self, playlist_id: &str, song_id: &str) -> Option<&DownloadedSong> {
        self.get_collection_song(CollectionKind::Playlist, playlist_id, song_id)
    }

    pub fn update_playlist_song_progress(&mut self, playlist_id: &str, song_id: &str, percent: u8) -> bool {
        self.update_collection_song_progress(CollectionKind::Playlist, playlist_id, song_id, percent)
    }

    pub fn update_playlist_song_download_status(
        &mut self,
        playlist_id: &str,
        song_id: &str,
        is_downloading: bool,
        is_downloaded: bool,
        local_manifest_path: Option<String>,
    ) -> bool {
        self.update_collection_song_download_status(
            CollectionKind::Playlist,
            playlist_id,
            song_id,
            is_downloading,
            is_downloaded,
            local_manifest_path,
        )
    }

    pub fn update_playlist_song_image(
        &mut self,
        playlist_id: &str,
        song_id: &str,
        local_image_path: String,
    ) -> bool {
        self.update_collection_song_image(
            CollectionKind::Playlist,
            playlist_id,
            song_id,
            local_image_path,
        )
    }

    // ===== Albums =====

    pub fn get_album_by_id(&self, id: &str) -> Option<&DownloadedAlbum> {
        self.get_collection(CollectionKind::Album, id)
    }

    pub fn set_album(&mut self, album: DownloadedAlbum) {
        self.set_collection(CollectionKind::Album, album)
    }

    pub fn update_album_progress(&mut self, id: &str, percent: u8) -> bool {
        self.update_collection_progress(CollectionKind::Album, id, percent)
    }

    pub fn update_album_download_status(
        &mut self,
        id: &str,
        is_downloading: bool,
        is_downloaded: bool,
    ) -> bool {
        self.update_collection_download_status(CollectionKind::Album, id, is_downloading, is_downloaded)
    }

    pub fn remove_album(&mut self, id: &str) -> Option<DownloadedAlbum> {
        self.remove_collection(CollectionKind::Album, id)
    }

    pub fn add_song_to_album(&mut self, album_id: &str, song: DownloadedSong) -> bool {
        self.add_song_to_collection(CollectionKind::Album, album_id, song)
    }

    pub fn get_album_song_by_id(&self, album_id: &str, song_id: &str) -> Option<&DownloadedSong> {
        self.get_collection_song(CollectionKind::Album, album_id, song_id)
    }

    pub fn update_album_song_progress(&mut self, album_id: &str, song_id: &str, percent: u8) -> bool {
        self.update_collection_song_progress(CollectionKind::Album, album_id, song_id, percent)
    }

    pub fn update_album_song_download_status(
        &mut self,
        album_id: &str,
        song_id: &str,
        is_downloading: bool,
        is_downloaded: bool,
        local_manifest_path: Option<String>,
    ) -> bool {
        self.update_collection_song_download_status(
            CollectionKind::Album,
            album_id,
            song_id,
            is_downloading,
            is_downloaded,
            local_manifest_path,
        )
    }

    pub fn update_album_song_image(&mut self, album_id: &str, song_id: &str, local_image_path: String) -> bool {
        self.update_collection_song_image(CollectionKind::Album, album_id, song_id, local_image_path)
    }
}

/// Fresh record for a song about to be downloaded
pub(crate) fn downloading_song(song: &crate::api::models::SongResponse) -> DownloadedSong {
    DownloadedSong::new(song.clone(), DownloadRecord::downloading())
}
