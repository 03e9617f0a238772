/// Error types for social-sync
use crate::ports::StoreError;
use idempotent_consumer::IdempotencyError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Caller-side precondition failed; nothing was sent
    #[error("{0}")]
    Validation(String),

    #[error("You need to sign in first")]
    NotAuthenticated,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote read or write failed; the remote message is kept verbatim
    #[error("{0}")]
    Remote(#[from] StoreError),

    #[error("Media upload failed: {0}")]
    Upload(StoreError),

    /// Optional capability is absent in this deployment
    #[error("{0} is not available")]
    Unavailable(&'static str),

    #[error("Realtime de-duplication failed: {0}")]
    Dedup(#[from] IdempotencyError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SyncError::Validation(msg.into())
    }

    /// Text surfaced to the user (toast or inline placeholder)
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// Whether the failure came from the remote side, as opposed to a
    /// local precondition
    pub fn is_remote(&self) -> bool {
        matches!(self, SyncError::Remote(_) | SyncError::Upload(_))
    }

    /// Remote rejection caused by a row-level policy
    pub fn is_permission_denied(&self) -> bool {
        match self {
            SyncError::PermissionDenied(_) => true,
            SyncError::Remote(e) => e.is_permission_denied(),
            _ => false,
        }
    }
}

/// Result type alias for engine operations
pub type SyncResult<T> = Result<T, SyncError>;
