use thiserror::Error;

use super::address::NodeAddress;

#[derive(Debug, Error)]
pub enum ResumerError {
    /// The recording lives on another node; retry there.
    #[error("recording is owned by {0}; redirect")]
    Redirect(NodeAddress),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<crate::cache::CacheError> for ResumerError {
    fn from(e: crate::cache::CacheError) -> Self {
        ResumerError::Transient(e.to_string())
    }
}

pub type ResumerResult<T> = Result<T, ResumerError>;
