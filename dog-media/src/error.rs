use std::path::PathBuf;

use thiserror::Error;

/// Result type for media operations
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur in the media pipeline
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Upload session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Capacity exceeded: {message}")]
    CapacityExceeded { message: String },

    #[error("Staging write failed for session {session_id}: {source}")]
    StagingWriteFailed {
        session_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Placement of {} into {} failed: {source}", staging.display(), destination.display())]
    PlacementFailed {
        staging: PathBuf,
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Preview generation failed for item {item_id}: {reason}")]
    ArtifactGenerationFailed { item_id: String, reason: String },

    #[error("No preview available for item {item_id}")]
    NoPreviewAvailable { item_id: String },

    #[error("Requested range not satisfiable for entity of {total_size} bytes")]
    RangeNotSatisfiable { total_size: u64 },

    #[error("Item not found: {item_id}")]
    ItemNotFound { item_id: String },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Metadata store error: {source}")]
    Metadata {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl MediaError {
    /// Create a metadata store error from any error type
    pub fn metadata<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Metadata {
            source: Box::new(error),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn session_not_found<S: Into<String>>(session_id: S) -> Self {
        Self::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    pub fn capacity<S: Into<String>>(message: S) -> Self {
        Self::CapacityExceeded {
            message: message.into(),
        }
    }

    pub fn item_not_found<S: ToString>(item_id: S) -> Self {
        Self::ItemNotFound {
            item_id: item_id.to_string(),
        }
    }

    pub fn no_preview<S: ToString>(item_id: S) -> Self {
        Self::NoPreviewAvailable {
            item_id: item_id.to_string(),
        }
    }

    /// True for errors the client caused and can fix by changing the request
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound { .. }
                | Self::CapacityExceeded { .. }
                | Self::Invalid { .. }
                | Self::ItemNotFound { .. }
                | Self::NoPreviewAvailable { .. }
                | Self::RangeNotSatisfiable { .. }
        )
    }
}

/// Outcome of a failed preview attempt - determines retry behavior
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    /// Transient failure, worth another attempt later
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// The source can never produce a preview
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl ArtifactError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}

impl From<std::io::Error> for ArtifactError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::InvalidData => Self::Permanent(err.to_string()),
            _ => Self::Retryable(err.to_string()),
        }
    }
}
