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


//! In-flight downloads and their cancellation tokens

use crate::storage::models::CollectionKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// What kind of item a download is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadKind {
    Song,
    Playlist,
    Album,
}

impl DownloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadKind::Song => "song",
            DownloadKind::Playlist => "playlist",
            DownloadKind::Album => "album",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "song" => Some(DownloadKind::Song),
            "playlist" => Some(DownloadKind::Playlist),
            "album" => Some(DownloadKind::Album),
            _ => None,
        }
    }

    /// The collection kind, or `None` for songs
    pub fn collection_kind(&self) -> Option<CollectionKind> {
        match self {
            DownloadKind::Song => None,
            DownloadKind::Playlist => Some(CollectionKind::Playlist),
            DownloadKind::Album => Some(CollectionKind::Album),
        }
    }
}

impl From<CollectionKind> for DownloadKind {
    fn from(kind: CollectionKind) -> Self {
        match kind {
            CollectionKind::Playlist => DownloadKind::Playlist,
            CollectionKind::Album => DownloadKind::Album,
        }
    }
}

/// Registry key: kind plus id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownloadKey {
    pub kind: DownloadKind,
    pub id: String,
}

impl DownloadKey {
    pub fn new<S: Into<String>>(kind: DownloadKind, id: S) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn song<S: Into<String>>(id: S) -> Self {
        Self::new(DownloadKind::Song, id)
    }

    pub fn playlist<S: Into<String>>(id: S) -> Self {
        Self::new(DownloadKind::Playlist, id)
    }

    pub fn album<S: Into<String>>(id: S) -> Self {
        Self::new(DownloadKind::Album, id)
    }
}

impl fmt::Display for DownloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// A live registration; the generation tells it apart from later ones
#[derive(Debug, Clone)]
pub struct Registration {
    pub token: CancellationToken,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct Inner {
    next_generation: u64,
    active: HashMap<DownloadKey, Registration>,
}

/// At most one token per key
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    inner: Mutex<Inner>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new download; `None` if one is already running for `key`
    pub fn register(&self, key: DownloadKey) -> Option<Registration> {
        let mut inner = self.inner.lock();
        if inner.active.contains_key(&key) {
            return None;
        }
        inner.next_generation += 1;
        let registration = Registration {
            token: CancellationToken::new(),
            generation: inner.next_generation,
        };
        inner.active.insert(key, registration.clone());
        Some(registration)
    }

    /// Fire and remove the token for `key`; returns whether one was active
    pub fn cancel(&self, key: &DownloadKey) -> bool {
        let removed = self.inner.lock().active.remove(key);
        match removed {
            Some(registration) => {
                registration.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove `key` only if it is still the registration from `generation`
    ///
    /// Returns false when the registration was cancelled or replaced.
    pub fn unregister(&self, key: &DownloadKey, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        match inner.active.get(key) {
            Some(current) if current.generation == generation => {
                inner.active.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self, key: &DownloadKey) -> bool {
        self.inner.lock().active.contains_key(key)
    }

    /// Fire every token; returns the keys that were active
    pub fn cancel_all(&self) -> Vec<DownloadKey> {
        let drained: Vec<(DownloadKey, Registration)> =
            self.inner.lock().active.drain().collect();
        drained
            .into_iter()
            .map(|(key, registration)| {
                registration.token.cancel();
                key
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = CancellationRegistry::new();
        let first = registry.register(DownloadKey::song("1"));
        assert!(first.is_some());
        assert!(registry.register(DownloadKey::song("1")).is_none());
        assert!(registry.register(DownloadKey::playlist("1")).is_some());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_cancel_fires_token_and_clears() {
        let registry = CancellationRegistry::new();
        let registration = registry.register(DownloadKey::album("a")).unwrap();

        assert!(registry.cancel(&DownloadKey::album("a")));
        assert!(registration.token.is_cancelled());
        assert!(!registry.is_active(&DownloadKey::album("a")));
        assert!(!registry.cancel(&DownloadKey::album("a")));
    }

    #[test]
    fn test_stale_unregister_keeps_newer_registration() {
        let registry = CancellationRegistry::new();
        let key = DownloadKey::song("1");
        let old = registry.register(key.clone()).unwrap();
        registry.cancel(&key);
        let new = registry.register(key.clone()).unwrap();

        assert!(!registry.unregister(&key, old.generation));
        assert!(registry.is_active(&key));
        assert!(registry.unregister(&key, new.generation));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_all() {
        let registry = CancellationRegistry::new();
        let a = registry.register(DownloadKey::song("a")).unwrap();
        let b = registry.register(DownloadKey::playlist("b")).unwrap();

        let mut keys = registry.cancel_all();
        keys.sort_by(|x, y| x.id.cmp(&y.id));

        assert_eq!(keys, vec![DownloadKey::song("a"), DownloadKey::playlist("b")]);
        assert!(a.token.is_cancelled() && b.token.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_kind_parse_and_display() {
        assert_eq!(DownloadKind::parse("Album"), Some(DownloadKind::Album));
        assert_eq!(DownloadKind::parse("podcast"), None);
        assert_eq!(DownloadKey::playlist("p1").to_string(), "playlist:p1");
    }
}
