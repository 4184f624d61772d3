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


//! Download store records
//!
//! # Record lifecycle
//! - Created on the first download request for an id, reused afterwards
//! - `is_downloading` and `is_downloaded` are never both true
//! - `download_progress` only moves forward during one attempt and is reset
//!   when the next attempt starts
//! - `downloaded_at` is stamped on every transition to downloaded
//!
//! Standalone songs and the songs nested inside playlists/albums are separate
//! copies. Nothing here links them.

use crate::api::models::{AlbumResponse, PlaylistResponse, SongResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot format version written by the persistence backends
pub const SNAPSHOT_VERSION: u32 = 1;

/// Download state attached to every song, playlist and album
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadRecord {
    pub is_downloading: bool,

    /// 0 to 100
    pub download_progress: u8,

    pub is_downloaded: bool,

    /// Rewritten local manifest (songs only)
    pub local_manifest_path: Option<String>,

    /// Downloaded cover image (songs only)
    pub local_image_path: Option<String>,

    pub downloaded_at: Option<DateTime<Utc>>,
}

impl DownloadRecord {
    /// Record for a download that is just starting
    pub fn downloading() -> Self {
        Self {
            is_downloading: true,
            ..Self::default()
        }
    }

    /// Neither downloading nor downloaded
    pub fn is_idle(&self) -> bool {
        !self.is_downloading && !self.is_downloaded
    }

    /// Apply a progress report
    ///
    /// Ignored unless an attempt is running; values lower than the current
    /// progress are ignored too.
    pub(crate) fn apply_progress(&mut self, percent: u8) {
        if !self.is_downloading {
            return;
        }
        let percent = percent.min(100);
        if percent > self.download_progress {
            self.download_progress = percent;
        }
    }

    /// Apply a status transition
    ///
    /// `is_downloaded` wins over `is_downloading`. Starting a new attempt resets
    /// progress, finishing one stamps `downloaded_at`. Going back to idle drops
    /// the manifest path, so an idle record never keeps shared files alive.
    pub(crate) fn apply_status(
        &mut self,
        is_downloading: bool,
        is_downloaded: bool,
        local_manifest_path: Option<String>,
    ) {
        if let Some(path) = local_manifest_path {
            self.local_manifest_path = Some(path);
        }

        if is_downloaded {
            self.is_downloading = false;
            self.is_downloaded = true;
            self.download_progress = 100;
            self.downloaded_at = Some(Utc::now());
        } else if is_downloading {
            if !self.is_downloading {
                self.download_progress = 0;
            }
            self.is_downloading = true;
            self.is_downloaded = false;
        } else {
            self.is_downloading = false;
            self.is_downloaded = false;
            self.download_progress = 0;
            self.local_manifest_path = None;
        }
    }

    /// Merge an incoming record, keeping optional fields it leaves empty
    pub(crate) fn merge_from(&mut self, incoming: DownloadRecord) {
        self.is_downloading = incoming.is_downloading && !incoming.is_downloaded;
        self.is_downloaded = incoming.is_downloaded;
        self.download_progress = incoming.download_progress.min(100);
        if incoming.local_manifest_path.is_some() {
            self.local_manifest_path = incoming.local_manifest_path;
        }
        if incoming.local_image_path.is_some() {
            self.local_image_path = incoming.local_image_path;
        }
        if incoming.downloaded_at.is_some() {
            self.downloaded_at = incoming.downloaded_at;
        }
    }
}

/// A song with its download state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadedSong {
    #[serde(flatten)]
    pub song: SongResponse,

    #[serde(default)]
    pub download: DownloadRecord,
}

impl DownloadedSong {
    pub fn new(song: SongResponse, download: DownloadRecord) -> Self {
        Self { song, download }
    }

    pub fn id(&self) -> &str {
        &self.song.id
    }

    /// Local manifest when downloaded, remote manifest otherwise
    pub fn playback_url(&self) -> &str {
        match (&self.download.local_manifest_path, self.download.is_downloaded) {
            (Some(path), true) => path,
            _ => &self.song.url,
        }
    }

    /// Local cover when downloaded, remote cover otherwise
    pub fn display_image(&self) -> Option<&str> {
        match (&self.download.local_image_path, self.download.is_downloaded) {
            (Some(path), true) => Some(path),
            _ => self.song.image.as_deref(),
        }
    }

    /// Whether either local path equals `path`
    pub fn references_path(&self, path: &str) -> bool {
        self.download.local_manifest_path.as_deref() == Some(path)
            || self.download.local_image_path.as_deref() == Some(path)
    }
}

/// Kinds of collections that can be downloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Playlist,
    Album,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Playlist => "playlist",
            CollectionKind::Album => "album",
        }
    }
}

/// A playlist or album with its nested songs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadedCollection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub color: Option<String>,

    /// In collection order
    #[serde(default)]
    pub songs: Vec<DownloadedSong>,

    #[serde(default)]
    pub download: DownloadRecord,
}

pub type DownloadedPlaylist = DownloadedCollection;
pub type DownloadedAlbum = DownloadedCollection;

impl DownloadedCollection {
    pub fn from_playlist(playlist: &PlaylistResponse, download: DownloadRecord) -> Self {
        Self {
            id: playlist.id.clone(),
            name: playlist.name.clone(),
            image: playlist.image.clone(),
            color: playlist.color.clone(),
            songs: Vec::new(),
            download,
        }
    }

    pub fn from_album(album: &AlbumResponse, download: DownloadRecord) -> Self {
        Self {
            id: album.id.clone(),
            name: album.name.clone(),
            image: album.image.clone(),
            color: album.color.clone(),
            songs: Vec::new(),
            download,
        }
    }

    pub fn song(&self, song_id: &str) -> Option<&DownloadedSong> {
        self.songs.iter().find(|s| s.id() == song_id)
    }

    pub(crate) fn song_mut(&mut self, song_id: &str) -> Option<&mut DownloadedSong> {
        self.songs.iter_mut().find(|s| s.id() == song_id)
    }

    pub fn downloaded_song_count(&self) -> usize {
        self.songs.iter().filter(|s| s.download.is_downloaded).count()
    }
}

/// Everything the store persists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadsSnapshot {
    pub version: u32,
    pub songs: Vec<DownloadedSong>,
    pub playlists: Vec<DownloadedPlaylist>,
    pub albums: Vec<DownloadedAlbum>,
}
