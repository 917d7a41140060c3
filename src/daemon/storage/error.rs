use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors produced by [PlaytimeStore](super::playtime_store::PlaytimeStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The batch violated an invariant and was rejected as a whole.
    #[error("rejected batch: {0}")]
    Integrity(String),
}

impl StoreError {
    /// True for lock contention, which is worth retrying. Everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(error, _)) => matches!(
                error.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
