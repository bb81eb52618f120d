//! Ledger Error Taxonomy
//!
//! Every variant is detected before any mutation is committed; returning
//! one aborts the enclosing store transaction. The core reports these
//! deterministically to the caller and never retries or swallows them.

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("market is not active")]
    MarketNotActive,

    #[error("insufficient balance: need {required:.2}, have {available:.2}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("insufficient shares: need {required}, have {held}")]
    InsufficientShares { required: f64, held: f64 },

    #[error("market already resolved")]
    AlreadyResolved,

    #[error("caller is not authorized for this operation")]
    Unauthorized,

    #[error("transaction aborted by lock contention, retry")]
    Conflict,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(#[source] rusqlite::Error),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Callers may safely re-submit the operation after a retryable error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Conflict)
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        // SQLITE_BUSY / SQLITE_LOCKED mean the busy timeout expired while
        // another writer held the file lock. No partial effects persist.
        if let rusqlite::Error::SqliteFailure(e, _) = &err {
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) {
                return LedgerError::Conflict;
            }
        }
        LedgerError::Storage(err)
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
