use super::types::ShardId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Index '{0}' not found")]
    IndexNotFound(String),

    #[error("Index '{0}' already exists")]
    IndexAlreadyExists(String),

    #[error("Shard {0} not found")]
    ShardNotFound(ShardId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Version conflict: {message}")]
    VersionConflict {
        current: i64,
        expected: i64,
        message: String,
    },

    #[error(
        "Stale primary term for shard {shard_id}: request term [{request_term}] is older than current term [{current_term}]"
    )]
    StalePrimaryTerm {
        shard_id: ShardId,
        request_term: u64,
        current_term: u64,
    },

    #[error("Coordinator error: {0}")]
    Coordinator(String),
}

pub type Result<T> = std::result::Result<T, ClusterError>;

/// Coarse classification surfaced to callers that branch on failure type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request; the input state was left untouched.
    Validation,
    /// Document-level optimistic concurrency failure.
    VersionConflict,
    /// Request carried a primary term older than the current one.
    StalePrimaryTerm,
    /// The coordinator loop is gone.
    Internal,
}

impl ClusterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::IndexNotFound(_)
            | Self::IndexAlreadyExists(_)
            | Self::ShardNotFound(_)
            | Self::InvalidConfig(_) => ErrorKind::Validation,
            Self::VersionConflict { .. } => ErrorKind::VersionConflict,
            Self::StalePrimaryTerm { .. } => ErrorKind::StalePrimaryTerm,
            Self::Coordinator(_) => ErrorKind::Internal,
        }
    }

    /// Returns true when the caller should refresh cluster state and retry
    /// against the current primary.
    pub fn is_retryable_after_refresh(&self) -> bool {
        matches!(self, Self::StalePrimaryTerm { .. })
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ClusterError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::Coordinator(err.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for ClusterError {
    fn from(err: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::Coordinator(err.to_string())
    }
}
