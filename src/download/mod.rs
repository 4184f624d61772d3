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


//! Offline downloads
//!
//! - [`DownloadManager`]: song, playlist and album pipelines
//! - [`SegmentFetcher`]: batched segment downloads
//! - [`CancellationRegistry`]: one cancellation token per in-flight item
//! - [`ProgressTracker`]: unit-based progress reporting

pub mod manager;
pub mod progress;
pub mod registry;
pub mod segments;

// Re-export commonly used types
pub use manager::DownloadManager;
pub use progress::{DownloadProgress, ProgressCallback, ProgressTracker};
pub use registry::{CancellationRegistry, DownloadKey, DownloadKind, Registration};
pub use segments::{BatchProgress, SegmentFetchOutcome, SegmentFetcher};
