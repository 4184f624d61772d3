//! Integration tests for single-song downloads
//!
//! Drives `DownloadManager` against an in-process fake fetcher and a temp
//! downloads directory.

mod common;

use common::{config, manager, manager_with_config, FakeFetcher, CDN};
use offline_core::download::ProgressCallback;
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_download_song_success() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new();
    let song = fetcher
        .serve_song("1", 4)
        .with_image(format!("{}/covers/1.png?w=300", CDN));
    let manager = manager(temp_dir.path(), &fetcher);

    let path = manager.download_song(&song, None).await.expect("download succeeds");

    assert!(manager.is_downloaded("1"));
    assert!(!manager.is_downloading("1"));
    assert_eq!(manager.get_progress("1"), 100);
    assert!(path.exists());
    assert_eq!(path.file_name().unwrap(), "1_Song_1.manifest");
    assert_eq!(manager.get_local_path("1"), Some(path.clone()));
    assert_eq!(
        manager.playback_url("1"),
        Some(path.to_string_lossy().into_owned())
    );

    let rewritten = std::fs::read_to_string(&path).unwrap();
    assert!(!rewritten.contains("https://"));
    assert!(rewritten.contains("#EXTINF:10.0,\n1_Song_1_segments/seg0.ts\n"));
    assert!(rewritten.ends_with("1_Song_1_segments/seg3.ts\n#EXT-X-ENDLIST\n"));

    let segments_dir = temp_dir.path().join("downloads").join("1_Song_1_segments");
    for i in 0..4 {
        assert!(segments_dir.join(format!("seg{}.ts", i)).exists());
    }

    let image = manager.get_local_image_path("1").expect("cover saved");
    assert_eq!(image.file_name().unwrap(), "1_image.png");
    assert!(image.exists());
    assert_eq!(
        manager.display_image("1"),
        Some(image.to_string_lossy().into_owned())
    );
}

#[tokio::test]
async fn test_progress_is_monotonic_and_ends_at_100() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new();
    let song = fetcher.serve_song("p", 10);
    let manager = manager(temp_dir.path(), &fetcher);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let on_progress: ProgressCallback = Arc::new(move |p| sink.lock().push(p));

    manager.download_song(&song, Some(on_progress)).await.unwrap();

    let seen = seen.lock().clone();
    assert!(seen.len() >= 2);
    assert!(seen
        .windows(2)
        .all(|w| w[0].progress_percent <= w[1].progress_percent));
    assert!(seen.iter().all(|p| p.total_units == 12));
    assert_eq!(seen.first().unwrap().completed_units, 2);
    assert_eq!(seen.last().unwrap().progress_percent, 100);
}

#[tokio::test]
async fn test_progress_follows_configured_batches() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new();
    let song = fetcher.serve_song("b", 10);
    let manager = manager_with_config(
        config(temp_dir.path()).with_segment_batch_size(5),
        &fetcher,
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let on_progress: ProgressCallback = Arc::new(move |p| sink.lock().push(p.completed_units));

    manager.download_song(&song, Some(on_progress)).await.unwrap();

    assert_eq!(*seen.lock(), vec![2, 7, 12]);
}

#[tokio::test]
async fn test_ids_stay_inside_downloads_dir() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new();
    let song = fetcher.serve_song("../evil", 2);
    let manager = manager(temp_dir.path(), &fetcher);

    let path = manager.download_song(&song, None).await.unwrap();

    let downloads = temp_dir.path().join("downloads");
    assert_eq!(path.parent(), Some(downloads.as_path()));
    assert!(path.exists());
    let escaped: Vec<_> = std::fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .filter(|name| name != "downloads")
        .collect();
    assert!(escaped.is_empty(), "files outside downloads: {:?}", escaped);
}

#[tokio::test]
async fn test_cancel_in_flight_song() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new();
    let song = fetcher.serve_song("c", 6);
    let manager = manager(temp_dir.path(), &fetcher);
    fetcher.close_gate();

    let task = {
        let manager = manager.clone();
        let song = song.clone();
        tokio::spawn(async move { manager.download_song(&song, None).await })
    };

    fetcher.started.notified().await;
    assert!(manager.is_downloading("c"));

    assert!(manager.cancel_download("c").await);
    assert!(!manager.is_downloading("c"));

    let result = task.await.unwrap();
    assert!(result.is_none());
    assert!(!manager.is_downloaded("c"));
    assert!(!manager.is_downloading("c"));
    assert!(manager.registry().is_empty());
    assert!(!manager.cancel_download("c").await);
}

#[tokio::test]
async fn test_duplicate_download_is_noop() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new();
    let song = fetcher.serve_song("d", 3);
    let manager = manager(temp_dir.path(), &fetcher);
    fetcher.close_gate();

    let first = {
        let manager = manager.clone();
        let song = song.clone();
        tokio::spawn(async move { manager.download_song(&song, None).await })
    };
    fetcher.started.notified().await;

    assert!(manager.download_song(&song, None).await.is_none());
    assert_eq!(manager.registry().len(), 1);

    fetcher.open_gate();
    assert!(first.await.unwrap().is_some());
    assert!(manager.is_downloaded("d"));

    let manifest_requests = fetcher
        .requests()
        .iter()
        .filter(|url| url.ends_with("index.m3u8"))
        .count();
    assert_eq!(manifest_requests, 1);
}

#[tokio::test]
async fn test_already_downloaded_returns_existing_path() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new();
    let song = fetcher.serve_song("e", 2);
    let manager = manager(temp_dir.path(), &fetcher);

    let first = manager.download_song(&song, None).await.unwrap();
    let requests = fetcher.request_count();
    let second = manager.download_song(&song, None).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(fetcher.request_count(), requests);
}

#[tokio::test]
async fn test_delete_download_removes_everything_once() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new();
    let song = fetcher
        .serve_song("x", 3)
        .with_image(format!("{}/covers/x.webp", CDN));
    let manager = manager(temp_dir.path(), &fetcher);

    let path = manager.download_song(&song, None).await.unwrap();
    let segments_dir = temp_dir.path().join("downloads").join("x_Song_x_segments");
    let image = temp_dir.path().join("downloads").join("x_image.webp");
    assert!(segments_dir.exists() && image.exists());

    assert!(manager.delete_download("x").await.unwrap());

    assert!(!path.exists());
    assert!(!segments_dir.exists());
    assert!(!image.exists());
    assert!(!manager.is_downloaded("x"));
    assert!(manager.get_all_downloads().is_empty());

    assert!(!manager.delete_download("x").await.unwrap());
}

#[tokio::test]
async fn test_manifest_without_segments_fails() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new();
    let song = fetcher.serve_song("empty", 0);
    let manager = manager(temp_dir.path(), &fetcher);

    assert!(manager.download_song(&song, None).await.is_none());

    let record = manager.get_all_downloads().pop().unwrap();
    assert!(!record.download.is_downloading);
    assert!(!record.download.is_downloaded);
    assert!(manager.registry().is_empty());
}

#[tokio::test]
async fn test_failed_manifest_fetch_reverts_record() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new();
    let song = fetcher.serve_song("gone", 2);
    fetcher.fail(&song.url);
    let manager = manager(temp_dir.path(), &fetcher);

    assert!(manager.download_song(&song, None).await.is_none());
    assert!(!manager.is_downloading("gone"));
    assert!(!manager.is_downloaded("gone"));
    assert_eq!(manager.get_progress("gone"), 0);
}

#[tokio::test]
async fn test_partial_segment_failure() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new();
    let song = fetcher.serve_song("part", 4);
    fetcher.fail(&format!("{}/part/seg1.ts", CDN));
    let manager = manager(temp_dir.path(), &fetcher);

    let path = manager.download_song(&song, None).await.unwrap();
    let rewritten = std::fs::read_to_string(path).unwrap();

    assert!(!rewritten.contains("seg1.ts"));
    assert_eq!(rewritten.matches("#EXTINF").count(), 3);
    assert!(rewritten.contains(
        "#EXTINF:10.0,\npart_Song_part_segments/seg0.ts\n#EXTINF:10.0,\npart_Song_part_segments/seg2.ts\n"
    ));
}

#[tokio::test]
async fn test_strict_mode_rejects_partial_segments() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new();
    let song = fetcher.serve_song("strict", 3);
    fetcher.fail(&format!("{}/strict/seg2.ts", CDN));
    let manager = manager_with_config(
        common::config(temp_dir.path()).with_allow_partial_segments(false),
        &fetcher,
    );

    assert!(manager.download_song(&song, None).await.is_none());
    assert!(!manager.is_downloaded("strict"));
}

#[tokio::test]
async fn test_all_segments_failing_is_a_failure() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new();
    let song = fetcher.serve_song("dead", 2);
    fetcher.fail(&format!("{}/dead/seg0.ts", CDN));
    fetcher.fail(&format!("{}/dead/seg1.ts", CDN));
    let manager = manager(temp_dir.path(), &fetcher);

    assert!(manager.download_song(&song, None).await.is_none());
    assert!(!temp_dir.path().join("downloads").join("dead_Song_dead.manifest").exists());
}

#[tokio::test]
async fn test_shutdown_reverts_in_flight_downloads() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new();
    let song = fetcher.serve_song("s", 3);
    let manager = manager(temp_dir.path(), &fetcher);
    fetcher.close_gate();

    let task = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.download_song(&song, None).await })
    };
    fetcher.started.notified().await;

    manager.shutdown().await.unwrap();

    assert!(task.await.unwrap().is_none());
    assert!(!manager.is_downloading("s"));
    assert!(manager.registry().is_empty());
}
