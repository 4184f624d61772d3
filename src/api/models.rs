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


//! Upstream catalogue shapes
//!
//! These mirror the JSON returned by the music API. Unknown fields are ignored
//! so the core keeps working when the API grows.

use serde::{Deserialize, Serialize};

/// A playable song as returned by the catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongResponse {
    pub id: String,
    pub name: String,

    /// Cover image URL
    #[serde(default)]
    pub image: Option<String>,

    /// Remote manifest URL
    pub url: String,

    /// Duration in seconds
    #[serde(default)]
    pub duration: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
}

impl SongResponse {
    pub fn new<I, N, U>(id: I, name: N, url: U) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        U: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            image: None,
            url: url.into(),
            duration: None,
            artist: None,
            album: None,
        }
    }

    pub fn with_image<S: Into<String>>(mut self, image: S) -> Self {
        self.image = Some(image.into());
        self
    }
}

/// Playlist header; its songs are fetched separately by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistResponse {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Album with its track list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumResponse {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub songs: Vec<SongResponse>,
}
