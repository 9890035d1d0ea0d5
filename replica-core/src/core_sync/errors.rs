/*
    errors.rs - Error types for the sync subsystem

    Defines all error types that can occur in:
    - Snapshot fetches and subscriptions across the boundary
    - Frame encoding and decoding
    - Retention bookkeeping
    - Reconciler lifecycle
*/

use crate::core_boundary::retention::RefId;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while publishing or reconciling a collection
#[derive(Debug, Error)]
pub enum SyncError {
    /// The boundary failed to carry a call or its answer
    #[error("Transport error: {0}")]
    Transport(String),

    /// The link actor is gone
    #[error("Link closed: {0}")]
    LinkClosed(String),

    /// Frame or snapshot could not be encoded
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Frame or snapshot could not be decoded
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// A boundary call did not answer in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The pending subscription setup did not complete
    #[error("Subscription setup failed: {0}")]
    SubscriptionSetup(String),

    /// Retain/release bookkeeping violated
    #[error("Retention error: {0}")]
    Retention(#[from] RetentionError),

    /// Operation attempted on a destroyed reconciler
    #[error("Reconciler destroyed")]
    Destroyed,
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Retention-specific errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetentionError {
    /// Release without a matching retain
    #[error("Reference {0} is not retained")]
    NotRetained(RefId),
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::SubscriptionSetup(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_display() {
        let err = SyncError::LinkClosed("command channel".to_string());
        assert_eq!(err.to_string(), "Link closed: command channel");
    }

    #[test]
    fn test_timeout_display() {
        let err = SyncError::Timeout(Duration::from_millis(250));
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_retention_error_conversion() {
        let id = RefId::generate();
        let sync_err: SyncError = RetentionError::NotRetained(id).into();
        assert!(matches!(sync_err, SyncError::Retention(RetentionError::NotRetained(r)) if r == id));
        assert!(sync_err.to_string().contains(&id.to_string()));
    }
}
