//! Error types for the store, the authority and the sync engine.

use recall_core::ValidationError;
use thiserror::Error;

/// Local store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("card not found: {0}")]
    CardNotFound(i64),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

impl From<ValidationError> for StoreError {
    fn from(e: ValidationError) -> Self {
        Self::InvalidData(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidData(e.to_string())
    }
}

/// Errors from recording a review.
#[derive(Debug, Error)]
pub enum StudyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Identity authority errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorityError {
    #[error("card id sequence exhausted")]
    IdentityExhausted,

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("content hash mismatch for {0}")]
    HashMismatch(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),
}

/// Sync errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend error: {status} - {message}")]
    Backend { status: u16, message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not authenticated - please register device first")]
    NotAuthenticated,

    #[error("Sync already in progress")]
    AlreadyInProgress,

    #[error("Sync cancelled by user")]
    Cancelled,

    #[error("No orphan confirmation is pending")]
    NotAwaitingConfirmation,

    #[error("Card identity sequence exhausted")]
    IdentityExhausted,

    #[error("Sync failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        Self::FileSystem(e.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<AuthorityError> for SyncError {
    fn from(e: AuthorityError) -> Self {
        match e {
            AuthorityError::IdentityExhausted => Self::IdentityExhausted,
            AuthorityError::UnknownDevice(_) => Self::NotAuthenticated,
            AuthorityError::HashMismatch(_) => Self::Backend {
                status: 400,
                message: e.to_string(),
            },
            AuthorityError::Snapshot(_) => Self::Backend {
                status: 500,
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_errors_map_onto_sync_errors() {
        assert!(matches!(
            SyncError::from(AuthorityError::IdentityExhausted),
            SyncError::IdentityExhausted
        ));
        assert!(matches!(
            SyncError::from(AuthorityError::UnknownDevice("d".into())),
            SyncError::NotAuthenticated
        ));
        assert!(matches!(
            SyncError::from(AuthorityError::HashMismatch("a.md".into())),
            SyncError::Backend { status: 400, .. }
        ));
    }

    #[test]
    fn error_display() {
        let error = SyncError::Backend {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(error.to_string(), "Backend error: 503 - unavailable");
        assert_eq!(
            StoreError::CardNotFound(12).to_string(),
            "card not found: 12"
        );
    }
}
