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


//! Download progress tracking and reporting
//!
//! Progress is counted in units, never bytes:
//! - a song is `segments + 2` units (cover image and manifest count as one each)
//! - a playlist or album is one unit per song

use serde::{Deserialize, Serialize};

/// Progress snapshot handed to callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub total_units: usize,
    pub completed_units: usize,
    /// 0 to 100
    pub progress_percent: u8,
}

impl DownloadProgress {
    pub fn new(completed_units: usize, total_units: usize) -> Self {
        Self {
            total_units,
            completed_units,
            progress_percent: percent_of(completed_units, total_units),
        }
    }

    /// Finished report; also used for empty collections
    pub fn complete(total_units: usize) -> Self {
        Self {
            total_units,
            completed_units: total_units,
            progress_percent: 100,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.progress_percent == 100
    }
}

/// `round(completed / total * 100)`, clamped to 0..=100
pub fn percent_of(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (completed as f64 / total as f64 * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

/// Callback type for progress updates
pub type ProgressCallback = std::sync::Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Turns unit counts into non-decreasing progress reports
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_units: usize,
    completed_units: usize,
    last_percent: u8,
}

impl ProgressTracker {
    pub fn new(total_units: usize) -> Self {
        Self {
            total_units,
            completed_units: 0,
            last_percent: 0,
        }
    }

    /// Set the completed count; returns a report only when the percentage rose
    ///
    /// Counts lower than the current one are ignored.
    pub fn set_completed(&mut self, completed_units: usize) -> Option<DownloadProgress> {
        let completed_units = completed_units.min(self.total_units);
        if completed_units < self.completed_units {
            return None;
        }
        self.completed_units = completed_units;

        let percent = percent_of(completed_units, self.total_units);
        if percent <= self.last_percent && self.completed_units != 0 {
            return None;
        }
        self.last_percent = percent;
        Some(self.current())
    }

    /// Jump to 100%
    pub fn finish(&mut self) -> DownloadProgress {
        self.completed_units = self.total_units;
        self.last_percent = 100;
        DownloadProgress::complete(self.total_units)
    }

    pub fn current(&self) -> DownloadProgress {
        DownloadProgress {
            total_units: self.total_units,
            completed_units: self.completed_units,
            progress_percent: self.last_percent,
        }
    }

    pub fn percent(&self) -> u8 {
        self.last_percent
    }
}
