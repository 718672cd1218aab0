//! Store error types.

use std::borrow::Cow;

use aquasense_core::Operation;
use aquasense_core::db::DatabaseError;

/// Coarse classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PermissionDenied,
    NotFound,
    AlreadyExists,
    InvalidArgument,
    Aborted,
    /// Retrying later may succeed (busy database, pool exhausted, I/O).
    Transient,
    Internal,
}

/// Document store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Permission denied: {principal} may not {operation} {path}")]
    PermissionDenied {
        principal: String,
        operation: Operation,
        path: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transaction aborted: {0}")]
    Aborted(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl StoreError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Aborted(_) => ErrorKind::Aborted,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Internal(_) | Self::Database(_) => ErrorKind::Internal,
        }
    }

    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    pub const fn is_permission_denied(&self) -> bool {
        matches!(self.kind(), ErrorKind::PermissionDenied)
    }
}

/// `SQLITE_BUSY` and `SQLITE_LOCKED`, including their extended codes.
fn is_busy_code(code: Option<Cow<'_, str>>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .is_some_and(|c| matches!(c & 0xff, 5 | 6))
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Transient(e.to_string())
            }
            sqlx::Error::Database(db) if is_busy_code(db.code()) => Self::Transient(e.to_string()),
            sqlx::Error::RowNotFound => Self::NotFound(e.to_string()),
            _ => Self::Internal(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

impl From<aquasense_core::Error> for StoreError {
    fn from(e: aquasense_core::Error) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_codes_are_transient() {
        assert!(is_busy_code(Some(Cow::Borrowed("5"))));
        assert!(is_busy_code(Some(Cow::Borrowed("517"))));
        assert!(is_busy_code(Some(Cow::Borrowed("6"))));
        assert!(!is_busy_code(Some(Cow::Borrowed("19"))));
        assert!(!is_busy_code(None));
    }

    #[test]
    fn pool_timeout_is_transient() {
        let err = StoreError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());
        assert_eq!(StoreError::NotFound("x".into()).kind(), ErrorKind::NotFound);
    }
}
