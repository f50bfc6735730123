//! Error types for migration operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::JobStatus;

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Invalid or expired credential. Fatal at startup.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Missing or invalid required input. Fatal at startup.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Connectivity failure or a transient 5xx response.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The destination name is already taken.
    #[error("Destination repository already exists: {0}")]
    NameConflict(String),

    /// One or more objects exceed the destination's size limit.
    #[error("{} object(s) exceed the {limit_bytes} byte size limit: {}", paths.len(), paths.join(", "))]
    ObjectSizeLimit {
        /// Paths of the offending blobs.
        paths: Vec<String>,
        /// Limit that was exceeded.
        limit_bytes: u64,
    },

    /// The server-side import did not finish within the maximum wait.
    #[error("Import did not complete within {0} seconds")]
    ImportTimeout(u64),

    /// The server-side import reached a failed terminal state.
    #[error("Import failed: {0}")]
    ImportFailed(String),

    /// Non-transient API failure.
    #[error("API request failed with status {status}: {message}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Response body or description.
        message: String,
    },

    /// Non-transient git failure.
    #[error("Git operation failed: {0}")]
    GitError(String),

    /// The job was interrupted by the operator.
    #[error("Migration cancelled")]
    Cancelled,

    /// The job state machine rejected a transition.
    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: JobStatus,
        /// Rejected target status.
        to: JobStatus,
    },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl MigrationError {
    /// Whether a collaborator may retry the failed operation.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkError(_) => true,
            Self::HttpError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Whether the error must abort the whole run before any job starts.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_) | Self::InvalidConfig(_))
    }

    /// Classify the error for job records and reports.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::AuthenticationFailed(_) => FailureKind::Auth,
            Self::InvalidConfig(_) => FailureKind::Configuration,
            Self::NetworkError(_) | Self::HttpError(_) => FailureKind::Network,
            Self::NameConflict(_) => FailureKind::NameConflict,
            Self::ObjectSizeLimit { .. } => FailureKind::ObjectSizeLimit,
            Self::ImportTimeout(_) => FailureKind::ImportTimeout,
            Self::ImportFailed(_) => FailureKind::ImportFailed,
            Self::ApiError { .. } => FailureKind::Api,
            Self::GitError(_) => FailureKind::Git,
            Self::Cancelled => FailureKind::Cancelled,
            Self::InvalidTransition { .. } | Self::IoError(_) | Self::JsonError(_) => {
                FailureKind::Internal
            }
        }
    }

    /// Offending paths for size-limit failures, empty otherwise.
    pub fn offending_paths(&self) -> &[String] {
        match self {
            Self::ObjectSizeLimit { paths, .. } => paths,
            _ => &[],
        }
    }
}

/// Serializable classification of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Auth,
    Configuration,
    Network,
    NameConflict,
    ObjectSizeLimit,
    ImportTimeout,
    ImportFailed,
    Api,
    Git,
    Cancelled,
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Auth => "authentication",
            Self::Configuration => "configuration",
            Self::Network => "network",
            Self::NameConflict => "name conflict",
            Self::ObjectSizeLimit => "object size limit",
            Self::ImportTimeout => "import timeout",
            Self::ImportFailed => "import failed",
            Self::Api => "API",
            Self::Git => "git",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(label)
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;
