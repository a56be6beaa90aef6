use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors surfaced by the document store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The connection was never established or has been lost.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("duplicate document id '{0}'")]
    Duplicate(String),

    /// The statement was abandoned by its caller before it finished.
    #[error("store operation interrupted")]
    Interrupted,

    #[error("sqlite: {0}")]
    Sqlite(rusqlite::Error),

    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("document encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }

    /// True when the caller should treat the store as gone rather than the request as bad.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Io(_) => true,
            Self::Sqlite(error) => matches!(
                error.sqlite_error_code(),
                Some(
                    ErrorCode::CannotOpen
                        | ErrorCode::NotADatabase
                        | ErrorCode::DatabaseCorrupt
                        | ErrorCode::DatabaseBusy
                        | ErrorCode::DatabaseLocked
                        | ErrorCode::SystemIoFailure
                        | ErrorCode::DiskFull
                        | ErrorCode::ReadOnly
                )
            ),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        match error.sqlite_error_code() {
            Some(ErrorCode::OperationInterrupted) => Self::Interrupted,
            _ => Self::Sqlite(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_failures_are_classified() {
        let busy = rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(5), None);
        assert!(StoreError::from(busy).is_unavailable());

        let interrupted = rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(9), None);
        assert!(matches!(StoreError::from(interrupted), StoreError::Interrupted));

        let constraint = rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(19), None);
        assert!(!StoreError::from(constraint).is_unavailable());
    }
}
