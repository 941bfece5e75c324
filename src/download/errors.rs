//! Error taxonomy for the download engine
//!
//! Item-level errors (`TransferError`, `ValidationError`) are isolated per item and
//! reported through the queue observers. Run-level errors (`PersistenceError`,
//! navigation failures) abort the current pagination step and surface to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Failure while transferring a single document
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Connection-level failure (no HTTP status)
    #[error("Network error: {0}")]
    Network(String),

    /// Server answered with a non-success status
    #[error("HTTP {status} - {description}")]
    Status { status: u16, description: String },

    /// Local file write failed
    #[error("Failed to write {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// Mirroring the finished file to the remote backend failed
    #[error("Remote mirror failed: {0}")]
    Mirror(String),

    /// Transfer observed the stop signal before finishing
    #[error("Transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Create from HTTP status code
    pub fn from_status(status: u16) -> Self {
        let description = match status {
            400 => "Bad Request".to_string(),
            401 => "Unauthorized".to_string(),
            403 => "Forbidden".to_string(),
            404 => "Not Found".to_string(),
            410 => "Gone".to_string(),
            429 => "Too Many Requests".to_string(),
            500 => "Internal Server Error".to_string(),
            502 => "Bad Gateway".to_string(),
            503 => "Service Unavailable".to_string(),
            504 => "Gateway Timeout".to_string(),
            s if (400..500).contains(&s) => format!("Client Error ({})", s),
            s if s >= 500 => format!("Server Error ({})", s),
            s => format!("HTTP Error ({})", s),
        };
        Self::Status { status, description }
    }

    /// Whether another attempt could plausibly succeed
    ///
    /// Client errors other than 408/429 will not change on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => {
                !(400..500).contains(status) || *status == 408 || *status == 429
            }
            Self::Cancelled => false,
            Self::Network(_) | Self::Io { .. } | Self::Mirror(_) => true,
        }
    }
}

/// Malformed item, skipped without retry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Item has an empty id")]
    EmptyId,

    #[error("Item {0} has no source location")]
    MissingLocator(String),

    #[error("Item {0} has no destination name")]
    MissingDestination(String),
}

/// Remote folder lookup or creation failed
///
/// `Clone` because a single resolution result is handed to every concurrent awaiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Folder lookup failed for '{key}': {message}")]
    Lookup { key: String, message: String },

    #[error("Folder creation failed for '{key}': {message}")]
    Create { key: String, message: String },

    #[error("Invalid folder name '{0}'")]
    InvalidName(String),

    /// The task driving the resolution went away before producing a result
    #[error("Folder resolution for '{0}' was interrupted")]
    Interrupted(String),
}

/// Error reported by a remote folder backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Remote backend error: {0}")]
pub struct RemoteError(pub String);

impl From<std::io::Error> for RemoteError {
    fn from(e: std::io::Error) -> Self {
        Self(e.to_string())
    }
}

/// Durable state could not be read or written
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to read {key}: {message}")]
    Read { key: String, message: String },

    #[error("Failed to write {key}: {message}")]
    Write { key: String, message: String },

    #[error("Failed to (de)serialize {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything that can end a single item as failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

impl ItemError {
    /// Validation failures and non-retryable transfer errors skip the retry budget
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transfer(e) => e.is_retryable(),
            Self::Validation(_) => false,
            Self::Resolution(_) => true,
        }
    }
}

/// Run-level failure of the orchestration engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Page collection failed on page {page}: {message}")]
    Collection { page: u32, message: String },

    #[error("A collection run is already in progress (page {0})")]
    AlreadyRunning(u32),

    #[error("Invalid date window: {0}")]
    InvalidWindow(String),

    #[error("Session history unavailable: {0}")]
    History(String),
}
