//! Error types for the wardrobe library.
//!
//! Infrastructure failures (filesystem, JSON, SQLite, network) sit next to the
//! entity-level taxonomy the migration loop dispatches on: `NotFound`,
//! `Validation`, `AssetUnavailable`, `Upstream` and `RemoteUnreachable`.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the wardrobe library.
#[derive(Debug, Error)]
pub enum WardrobeError {
    // Entity errors
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Asset unavailable for item {item_id} at {path:?}: {reason}")]
    AssetUnavailable {
        item_id: String,
        path: PathBuf,
        reason: String,
    },

    // Remote errors
    #[error("Upstream failure during {operation}: {message}")]
    Upstream {
        operation: String,
        message: String,
        /// HTTP status when the remote answered at all
        status: Option<u16>,
        retryable: bool,
    },

    #[error("Remote backend unreachable: {message}")]
    RemoteUnreachable { message: String },

    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for wardrobe operations.
pub type Result<T> = std::result::Result<T, WardrobeError>;

/// Coarse classification used by the migration loop and the audit report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    ValidationError,
    AssetUnavailable,
    UpstreamFailure,
    /// Outfit references an ID with no mapping. Warning level, never fatal.
    ReferentialGap,
    Infrastructure,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::AssetUnavailable => "AssetUnavailable",
            ErrorKind::UpstreamFailure => "UpstreamFailure",
            ErrorKind::ReferentialGap => "ReferentialGap",
            ErrorKind::Infrastructure => "Infrastructure",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Conversion implementations for common error types

impl From<std::io::Error> for WardrobeError {
    fn from(err: std::io::Error) -> Self {
        WardrobeError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for WardrobeError {
    fn from(err: serde_json::Error) -> Self {
        WardrobeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for WardrobeError {
    fn from(err: rusqlite::Error) -> Self {
        WardrobeError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for WardrobeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            WardrobeError::RemoteUnreachable {
                message: err.to_string(),
            }
        } else if err.is_timeout() {
            WardrobeError::Upstream {
                operation: "request".to_string(),
                message: err.to_string(),
                status: None,
                retryable: true,
            }
        } else {
            WardrobeError::Network {
                message: err.to_string(),
                cause: Some(err.to_string()),
            }
        }
    }
}

impl WardrobeError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        WardrobeError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        WardrobeError::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        WardrobeError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn upstream(operation: impl Into<String>, message: impl Into<String>) -> Self {
        WardrobeError::Upstream {
            operation: operation.into(),
            message: message.into(),
            status: None,
            retryable: false,
        }
    }

    /// Classify the error for the migration loop.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WardrobeError::NotFound { .. } => ErrorKind::NotFound,
            WardrobeError::Validation { .. } => ErrorKind::ValidationError,
            WardrobeError::AssetUnavailable { .. } => ErrorKind::AssetUnavailable,
            WardrobeError::Upstream { .. } | WardrobeError::Network { .. } => {
                ErrorKind::UpstreamFailure
            }
            WardrobeError::Cancelled => ErrorKind::Cancelled,
            WardrobeError::RemoteUnreachable { .. }
            | WardrobeError::Database { .. }
            | WardrobeError::Io { .. }
            | WardrobeError::Json { .. }
            | WardrobeError::Config { .. }
            | WardrobeError::Other(_) => ErrorKind::Infrastructure,
        }
    }

    /// Errors confined to a single item or outfit. The migration loop logs
    /// these against the entity ID and moves on to the next entity.
    pub fn is_entity_scoped(&self) -> bool {
        match self {
            WardrobeError::NotFound { .. }
            | WardrobeError::Validation { .. }
            | WardrobeError::AssetUnavailable { .. }
            | WardrobeError::Upstream { .. }
            | WardrobeError::Network { .. } => true,
            // A remote-side database or serialization failure for one insert
            // is still only that entity's problem.
            WardrobeError::Database { .. } | WardrobeError::Json { .. } => true,
            WardrobeError::RemoteUnreachable { .. }
            | WardrobeError::Io { .. }
            | WardrobeError::Config { .. }
            | WardrobeError::Cancelled
            | WardrobeError::Other(_) => false,
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            WardrobeError::Upstream { retryable, .. } => *retryable,
            WardrobeError::Network { .. } => true,
            _ => false,
        }
    }
}
