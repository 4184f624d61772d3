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


//! Error types for the offline download core
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are grouped by where they surface in the pipeline:
//!
//! - **Manifest**: the playlist could not be fetched or contained no segments
//! - **Segments**: individual segment downloads (tolerated by the batch fetcher)
//! - **Network**: HTTP status and transport failures
//! - **File**: local file system operations under the downloads directory
//! - **Persistence**: store snapshot loading and saving
//! - **General**: cancellation, configuration, invalid input
//!
//! Cancellation is modelled as an error variant so it can flow through `?`,
//! but callers treat it as an expected outcome (see [`OfflineError::is_cancellation`]).

use thiserror::Error;

/// Result type alias using our OfflineError type
pub type Result<T> = std::result::Result<T, OfflineError>;

/// Main error type for the offline download core
#[derive(Error, Debug)]
pub enum OfflineError {
    // ===== Manifest Errors =====

    /// Manifest was fetched but references no recognisable segments
    #[error("Manifest contains no segments: {url}")]
    ManifestEmpty { url: String },

    /// Every segment of a song failed to download
    #[error("No segments could be downloaded for song {song_id}")]
    NoSegmentsDownloaded { song_id: String },

    /// Some segments failed while strict segment mode is enabled
    #[error("{failed} of {total} segments failed to download")]
    IncompleteSegments { failed: usize, total: usize },

    // ===== Download Errors =====

    /// A single segment could not be saved
    #[error("Segment download failed: {uri}: {message}")]
    SegmentFetchFailed { uri: String, message: String },

    /// A download for the same item is already in flight
    #[error("Download already in progress: {0}")]
    AlreadyDownloading(String),

    /// Network connectivity error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        /// Whether this error might be transient
        is_transient: bool,
    },

    /// Server returned unexpected status code
    #[error("Server responded with unexpected status code {status_code} for {url}")]
    UnexpectedStatusCode { status_code: u16, url: String },

    /// URL could not be parsed or resolved
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // ===== File/Storage Errors =====

    /// Generic file I/O error
    #[error("File I/O error: {0}")]
    FileIoError(String),

    /// Store snapshot could not be loaded or saved
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// Database schema migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Download record not found in the store
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    // ===== Configuration/Input Errors =====

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ===== General Errors =====

    /// Operation was cancelled by user or system
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Database driver error from sqlx
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),
}

impl From<std::string::FromUtf8Error> for OfflineError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        OfflineError::InternalError(format!("UTF-8 conversion error: {}", err))
    }
}

// Helper methods for creating common errors
impl OfflineError {
    /// Create a RecordNotFound error with a resource name
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        OfflineError::RecordNotFound(resource.into())
    }

    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        OfflineError::InvalidInput(message.into())
    }

    /// Create an InternalError with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        OfflineError::InternalError(message.into())
    }

    /// Create a NetworkError
    pub fn network_error<S: Into<String>>(message: S, is_transient: bool) -> Self {
        OfflineError::NetworkError {
            message: message.into(),
            is_transient,
        }
    }

    /// Create a SegmentFetchFailed error
    pub fn segment_failed<U: Into<String>, M: Into<String>>(uri: U, message: M) -> Self {
        OfflineError::SegmentFetchFailed {
            uri: uri.into(),
            message: message.into(),
        }
    }

    /// Whether the error represents a cooperative cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, OfflineError::Cancelled)
    }

    /// Check if error is retryable (network errors, 5xx, transport failures)
    ///
    /// Returns `true` for transient errors that might succeed on a later attempt:
    /// - Network errors marked as transient
    /// - 5xx and 429 responses
    /// - reqwest timeouts and connection failures
    pub fn is_retryable(&self) -> bool {
        match self {
            OfflineError::NetworkError { is_transient, .. } => *is_transient,
            OfflineError::UnexpectedStatusCode { status_code, .. } => {
                matches!(status_code, 429 | 500..=599)
            }
            OfflineError::ReqwestError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Check if error is related to file/disk operations
    pub fn is_file_error(&self) -> bool {
        matches!(
            self,
            OfflineError::FileIoError(_) | OfflineError::IoError(_)
        )
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            OfflineError::Cancelled => "Download was cancelled.".to_string(),
            OfflineError::ManifestEmpty { .. } => {
                "This track has no downloadable audio.".to_string()
            }
            OfflineError::NoSegmentsDownloaded { .. } | OfflineError::IncompleteSegments { .. } => {
                "The track could not be downloaded completely. Please try again.".to_string()
            }
            OfflineError::AlreadyDownloading(_) => {
                "This item is already being downloaded.".to_string()
            }
            OfflineError::NetworkError { .. } | OfflineError::ReqwestError(_) => {
                "Network problem while downloading. Check your connection and try again."
                    .to_string()
            }
            OfflineError::UnexpectedStatusCode { status_code, .. } => {
                format!("The server refused the download (HTTP {}).", status_code)
            }
            e if e.is_file_error() => {
                "Could not write to device storage. Check available space.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
