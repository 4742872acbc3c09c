use thiserror::Error;
use uuid::Uuid;

use crate::{cache::CacheError, crypto::CryptoError, db::DbError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Database error: {0}")]
    Database(DbError),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        StoreError::NotFound { kind, id }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        StoreError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Conflict(msg) => StoreError::Conflict(msg),
            DbError::Validation(msg) => StoreError::Invalid {
                field: "input",
                reason: msg,
            },
            other => StoreError::Database(other),
        }
    }
}

impl From<CacheError> for StoreError {
    fn from(e: CacheError) -> Self {
        StoreError::Transient(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
