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


//! C FFI bridge - exposes the download manager to the native app shell
//!
//! # Architecture
//! JavaScript (React Native) → Swift / Kotlin module → C FFI → Rust
//!
//! # Design Patterns
//! 1. **JSON Communication**: arguments and results cross as JSON strings
//! 2. **Handles**: `rust_offline_open` returns a numeric handle naming one manager
//! 3. **Blocking calls**: each call runs to completion on a shared Tokio runtime,
//!    so the host calls download functions from a background thread
//! 4. **No Panics**: panics are caught and returned as error responses
//! 5. **Memory Safety**: returned strings must be freed with `rust_free_string()`
//!
//! # Response Format
//! ```json
//! { "success": true, "data": { ... } }
//! ```
//! Or on error:
//! ```json
//! { "success": false, "error": "Error message" }
//! ```
//!
//! Progress is not pushed across the boundary; hosts poll
//! `rust_download_status` while a download call is running.

use crate::api::models::{AlbumResponse, PlaylistResponse, SongResponse};
use crate::config::OfflineConfig;
use crate::download::{DownloadKind, DownloadManager};
use crate::error::{OfflineError, Result};
use crate::storage::models::CollectionKind;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

lazy_static::lazy_static! {
    static ref RUNTIME: tokio::runtime::Runtime =
        tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    static ref MANAGERS: Mutex<HashMap<u64, Arc<DownloadManager>>> = Mutex::new(HashMap::new());
}

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Safely convert C string pointer to Rust String
///
/// # Safety
/// Caller must ensure ptr is a valid null-terminated C string
fn c_str_to_string(ptr: *const c_char) -> Result<String> {
    if ptr.is_null() {
        return Err(OfflineError::invalid_input("Null pointer received"));
    }
    unsafe {
        CStr::from_ptr(ptr)
            .to_str()
            .map(|s| s.to_string())
            .map_err(|e| OfflineError::invalid_input(format!("Invalid UTF-8: {}", e)))
    }
}

/// Convert Rust string to C string pointer
///
/// # Safety
/// Caller MUST free the returned pointer using `rust_free_string()`
fn string_to_c_str(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(c_string) => c_string.into_raw(),
        Err(_) => CString::new(error_response("String contains null bytes"))
            .map(CString::into_raw)
            .unwrap_or(std::ptr::null_mut()),
    }
}

fn parse_json_arg<T: serde::de::DeserializeOwned>(ptr: *const c_char, what: &str) -> Result<T> {
    let json = c_str_to_string(ptr)?;
    serde_json::from_str(&json)
        .map_err(|e| OfflineError::invalid_input(format!("Invalid {} JSON: {}", what, e)))
}

fn parse_kind(ptr: *const c_char) -> Result<DownloadKind> {
    let kind = c_str_to_string(ptr)?;
    DownloadKind::parse(&kind)
        .ok_or_else(|| OfflineError::invalid_input(format!("Unknown download kind: {}", kind)))
}

fn manager(handle: u64) -> Result<Arc<DownloadManager>> {
    MANAGERS
        .lock()
        .get(&handle)
        .cloned()
        .ok_or_else(|| OfflineError::invalid_input(format!("Unknown handle: {}", handle)))
}

/// Create success response JSON
fn success_response<T: Serialize>(data: T) -> String {
    serde_json::json!({
        "success": true,
        "data": data
    })
    .to_string()
}

/// Create error response JSON
fn error_response(error: &str) -> String {
    serde_json::json!({
        "success": false,
        "error": error
    })
    .to_string()
}

/// Wrap a function call with panic catching
fn catch_panic<F>(f: F) -> String
where
    F: FnOnce() -> Result<String> + panic::UnwindSafe,
{
    match panic::catch_unwind(f) {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => error_response(&e.to_string()),
        Err(panic_err) => {
            let panic_msg = if let Some(s) = panic_err.downcast_ref::<String>() {
                s.clone()
            } else if let Some(s) = panic_err.downcast_ref::<&str>() {
                s.to_string()
            } else {
                "Unknown panic occurred".to_string()
            };
            error_response(&format!("Rust panic: {}", panic_msg))
        }
    }
}

#[derive(Debug, Serialize)]
struct DownloadStatus {
    kind: DownloadKind,
    id: String,
    is_downloaded: bool,
    is_downloading: bool,
    progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    local_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    local_image_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    playback_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_image: Option<String>,
}

fn download_status(manager: &DownloadManager, kind: DownloadKind, id: &str) -> DownloadStatus {
    let mut status = DownloadStatus {
        kind,
        id: id.to_string(),
        is_downloaded: false,
        is_downloading: false,
        progress: 0,
        local_path: None,
        local_image_path: None,
        playback_url: None,
        display_image: None,
    };

    match kind {
        DownloadKind::Song => {
            status.is_downloaded = manager.is_downloaded(id);
            status.is_downloading = manager.is_downloading(id);
            status.progress = manager.get_progress(id);
            status.local_path = manager
                .get_local_path(id)
                .map(|p| p.to_string_lossy().into_owned());
            status.local_image_path = manager
                .get_local_image_path(id)
                .map(|p| p.to_string_lossy().into_owned());
            status.playback_url = manager.playback_url(id);
            status.display_image = manager.display_image(id);
        }
        DownloadKind::Playlist => {
            status.is_downloaded = manager.is_playlist_downloaded(id);
            status.is_downloading = manager.is_playlist_downloading(id);
            status.progress = manager.get_playlist_progress(id);
        }
        DownloadKind::Album => {
            status.is_downloaded = manager.is_album_downloaded(id);
            status.is_downloading = manager.is_album_downloading(id);
            status.progress = manager.get_album_progress(id);
        }
    }

    status
}

// ============================================================================
// LIFECYCLE
// ============================================================================

/// Open a download manager from an `OfflineConfig` JSON object
///
/// # Returns
/// ```json
/// { "success": true, "data": { "handle": 1 } }
/// ```
///
/// # Safety
/// Caller must free the returned string with `rust_free_string()`
#[no_mangle]
pub extern "C" fn rust_offline_open(config_json: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let config = OfflineConfig::from_json_str(&c_str_to_string(config_json)?)?;
        let manager = RUNTIME.block_on(DownloadManager::from_config(config))?;

        let handle = NEXT_HANDLE.fetch_add(1, Ordering::SeqCst);
        MANAGERS.lock().insert(handle, Arc::new(manager));

        Ok(success_response(serde_json::json!({ "handle": handle })))
    });

    string_to_c_str(response)
}

/// Cancel in-flight downloads, save the store and drop the handle
///
/// # Safety
/// Caller must free the returned string with `rust_free_string()`
#[no_mangle]
pub extern "C" fn rust_offline_close(handle: u64) -> *mut c_char {
    let response = catch_panic(|| {
        let manager = MANAGERS
            .lock()
            .remove(&handle)
            .ok_or_else(|| OfflineError::invalid_input(format!("Unknown handle: {}", handle)))?;
        RUNTIME.block_on(manager.shutdown())?;

        Ok(success_response(serde_json::json!({ "closed": true })))
    });

    string_to_c_str(response)
}

// ============================================================================
// DOWNLOADS
// ============================================================================

/// Download a song; blocks until it finishes
///
/// # Arguments
/// * `song_json` - `SongResponse` JSON
///
/// # Returns
/// ```json
/// { "success": true, "data": { "path": "/.../downloads/42_Song.manifest" } }
/// ```
/// `path` is null when the download failed, was cancelled or was already running.
///
/// # Safety
/// Caller must free the returned string with `rust_free_string()`
#[no_mangle]
pub extern "C" fn rust_download_song(handle: u64, song_json: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let song: SongResponse = parse_json_arg(song_json, "song")?;
        let manager = manager(handle)?;

        let path = RUNTIME.block_on(manager.download_song(&song, None));

        Ok(success_response(serde_json::json!({
            "path": path.map(|p| p.to_string_lossy().into_owned())
        })))
    });

    string_to_c_str(response)
}

/// Download a playlist and the given songs; blocks until it finishes
///
/// # Safety
/// Caller must free the returned string with `rust_free_string()`
#[no_mangle]
pub extern "C" fn rust_download_playlist(
    handle: u64,
    playlist_json: *const c_char,
    songs_json: *const c_char,
) -> *mut c_char {
    let response = catch_panic(|| {
        let playlist: PlaylistResponse = parse_json_arg(playlist_json, "playlist")?;
        let songs: Vec<SongResponse> = parse_json_arg(songs_json, "songs")?;
        let manager = manager(handle)?;

        let completed = RUNTIME.block_on(manager.download_playlist(&playlist, &songs, None));

        Ok(success_response(serde_json::json!({ "completed": completed })))
    });

    string_to_c_str(response)
}

/// Download an album with its songs; blocks until it finishes
///
/// # Safety
/// Caller must free the returned string with `rust_free_string()`
#[no_mangle]
pub extern "C" fn rust_download_album(handle: u64, album_json: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let album: AlbumResponse = parse_json_arg(album_json, "album")?;
        let manager = manager(handle)?;

        let completed = RUNTIME.block_on(manager.download_album(&album, None));

        Ok(success_response(serde_json::json!({ "completed": completed })))
    });

    string_to_c_str(response)
}

/// Cancel an in-flight download
///
/// # Arguments
/// * `kind` - `"song"`, `"playlist"` or `"album"`
/// * `id` - item id
///
/// # Safety
/// Caller must free the returned string with `rust_free_string()`
#[no_mangle]
pub extern "C" fn rust_cancel_download(
    handle: u64,
    kind: *const c_char,
    id: *const c_char,
) -> *mut c_char {
    let response = catch_panic(|| {
        let kind = parse_kind(kind)?;
        let id = c_str_to_string(id)?;
        let manager = manager(handle)?;

        let cancelled = RUNTIME.block_on(async {
            match kind {
                DownloadKind::Song => manager.cancel_download(&id).await,
                DownloadKind::Playlist => manager.cancel_playlist_download(&id).await,
                DownloadKind::Album => manager.cancel_album_download(&id).await,
            }
        });

        Ok(success_response(serde_json::json!({ "cancelled": cancelled })))
    });

    string_to_c_str(response)
}

/// Delete a download and its files
///
/// # Safety
/// Caller must free the returned string with `rust_free_string()`
#[no_mangle]
pub extern "C" fn rust_delete_download(
    handle: u64,
    kind: *const c_char,
    id: *const c_char,
) -> *mut c_char {
    let response = catch_panic(|| {
        let kind = parse_kind(kind)?;
        let id = c_str_to_string(id)?;
        let manager = manager(handle)?;

        let deleted = RUNTIME.block_on(async {
            match kind.collection_kind() {
                None => manager.delete_download(&id).await,
                Some(CollectionKind::Playlist) => manager.delete_playlist_download(&id).await,
                Some(CollectionKind::Album) => manager.delete_album_download(&id).await,
            }
        })?;

        Ok(success_response(serde_json::json!({ "deleted": deleted })))
    });

    string_to_c_str(response)
}

/// Delete every download
///
/// # Safety
/// Caller must free the returned string with `rust_free_string()`
#[no_mangle]
pub extern "C" fn rust_delete_all_downloads(handle: u64) -> *mut c_char {
    let response = catch_panic(|| {
        let manager = manager(handle)?;
        let removed = RUNTIME.block_on(manager.delete_all_downloads())?;

        Ok(success_response(serde_json::json!({ "removed": removed })))
    });

    string_to_c_str(response)
}

// ============================================================================
// QUERIES
// ============================================================================

/// Status of one song, playlist or album
///
/// # Returns
/// ```json
/// {
///   "success": true,
///   "data": {
///     "kind": "song", "id": "42",
///     "is_downloaded": true, "is_downloading": false, "progress": 100,
///     "local_path": "...", "local_image_path": "...", "playback_url": "...",
///     "display_image": "..."
///   }
/// }
/// ```
///
/// # Safety
/// Caller must free the returned string with `rust_free_string()`
#[no_mangle]
pub extern "C" fn rust_download_status(
    handle: u64,
    kind: *const c_char,
    id: *const c_char,
) -> *mut c_char {
    let response = catch_panic(|| {
        let kind = parse_kind(kind)?;
        let id = c_str_to_string(id)?;
        let manager = manager(handle)?;

        Ok(success_response(download_status(&manager, kind, &id)))
    });

    string_to_c_str(response)
}

/// Every stored song, playlist and album record
///
/// # Safety
/// Caller must free the returned string with `rust_free_string()`
#[no_mangle]
pub extern "C" fn rust_list_downloads(handle: u64) -> *mut c_char {
    let response = catch_panic(|| {
        let manager = manager(handle)?;
        Ok(success_response(manager.store().snapshot()))
    });

    string_to_c_str(response)
}

/// Absolute segment URIs of a manifest
///
/// # Safety
/// Caller must free the returned string with `rust_free_string()`
#[no_mangle]
pub extern "C" fn rust_parse_manifest(
    manifest_text: *const c_char,
    manifest_url: *const c_char,
) -> *mut c_char {
    let response = catch_panic(|| {
        let text = c_str_to_string(manifest_text)?;
        let url = c_str_to_string(manifest_url)?;
        let segments = crate::manifest::ManifestCodec::default().parse_segments(&text, &url);

        Ok(success_response(serde_json::json!({ "segments": segments })))
    });

    string_to_c_str(response)
}

/// Free a string returned by any function in this module
///
/// # Safety
/// `ptr` must come from this module and must not be used afterwards
#[no_mangle]
pub extern "C" fn rust_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn take(ptr: *mut c_char) -> serde_json::Value {
        let json = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        rust_free_string(ptr);
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_success_response() {
        let response = success_response(serde_json::json!({"test": "data"}));
        assert!(response.contains("\"success\":true"));
        assert!(response.contains("\"test\":\"data\""));
    }

    #[test]
    fn test_error_response() {
        let response = error_response("Test error");
        assert!(response.contains("\"success\":false"));
        assert!(response.contains("Test error"));
    }

    #[test]
    fn test_catch_panic_with_panic() {
        let result = catch_panic(|| -> Result<String> {
            panic!("test panic");
        });
        assert!(result.contains("\"success\":false"));
        assert!(result.contains("test panic"));
    }

    #[test]
    fn test_null_pointer_handling() {
        assert!(c_str_to_string(std::ptr::null()).is_err());
        let response = take(rust_download_song(1, std::ptr::null()));
        assert_eq!(response["success"], false);
    }

    #[test]
    fn test_parse_manifest() {
        let text = CString::new("#EXTM3U\n#EXTINF:1,\na.ts\n").unwrap();
        let url = CString::new("https://cdn/x/index.m3u8").unwrap();

        let response = take(rust_parse_manifest(text.as_ptr(), url.as_ptr()));

        assert_eq!(response["success"], true);
        assert_eq!(response["data"]["segments"][0], "https://cdn/x/a.ts");
    }

    #[test]
    fn test_open_status_close() {
        let temp_dir = TempDir::new().unwrap();
        let config = OfflineConfig::default()
            .with_downloads_dir(temp_dir.path().join("downloads"))
            .with_store(crate::config::StoreBackend::Json {
                path: temp_dir.path().join("downloads-storage.json"),
            });
        let config = CString::new(serde_json::to_string(&config).unwrap()).unwrap();

        let opened = take(rust_offline_open(config.as_ptr()));
        assert_eq!(opened["success"], true);
        let handle = opened["data"]["handle"].as_u64().unwrap();

        let kind = CString::new("song").unwrap();
        let id = CString::new("missing").unwrap();
        let status = take(rust_download_status(handle, kind.as_ptr(), id.as_ptr()));
        assert_eq!(status["data"]["is_downloaded"], false);
        assert_eq!(status["data"]["progress"], 0);

        let bad_kind = CString::new("podcast").unwrap();
        let status = take(rust_download_status(handle, bad_kind.as_ptr(), id.as_ptr()));
        assert_eq!(status["success"], false);

        let deleted = take(rust_delete_download(handle, kind.as_ptr(), id.as_ptr()));
        assert_eq!(deleted["data"]["deleted"], false);

        let listed = take(rust_list_downloads(handle));
        assert_eq!(listed["data"]["songs"].as_array().unwrap().len(), 0);

        assert_eq!(take(rust_offline_close(handle))["success"], true);
        assert_eq!(take(rust_offline_close(handle))["success"], false);
    }
}
