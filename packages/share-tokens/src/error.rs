// ABOUTME: Error types for share-token issuance and lifecycle operations
// ABOUTME: Operational faults only; policy rejections during validation are data, not errors

use thiserror::Error;

use sendoff_storage::StorageError;

pub type ShareTokenResult<T> = Result<T, ShareTokenError>;

/// Faults from issuance and lifecycle operations.
///
/// A caller mapping these to HTTP should treat `Storage` and `Crypto` as
/// server errors and the rest as client errors. Validation outcomes never
/// surface here; they are returned as [`crate::ShareTokenValidation`].
#[derive(Error, Debug)]
pub enum ShareTokenError {
    #[error("Invalid share options: {0}")]
    InvalidOptions(String),

    #[error("Token not found")]
    TokenNotFound,

    #[error("Token expired")]
    TokenExpired,

    #[error("Usage limit exceeded")]
    UsageExhausted,

    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for ShareTokenError {
    fn from(err: sqlx::Error) -> Self {
        ShareTokenError::Storage(StorageError::Sqlx(err))
    }
}
