//! Crate-wide error taxonomy.
//!
//! Every fallible boundary returns `Result<T, AppError>`. Each variant carries
//! a stable string `code()` for the JSON error envelope and an HTTP status via
//! `http_status()`, following the same convention as the transfer module's
//! error type.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AppError {
    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("unknown account: {0}")]
    UnknownAccount(u32),

    #[error("concurrent update conflict")]
    ConcurrencyFail,

    #[error("idempotency key already released: {0}")]
    AlreadyReleased(String),

    #[error("request timed out")]
    NetworkTimeout,

    #[error("connection reset")]
    NetworkReset,

    #[error("engine busy: {0}")]
    EngineBusy(String),

    #[error("malformed response: {0}")]
    ProtocolError(String),

    #[error("invalid configuration: {0}")]
    ConfigError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("http transport error: {0}")]
    Transport(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            AppError::UnknownAccount(_) => "UNKNOWN_ACCOUNT",
            AppError::ConcurrencyFail => "CONCURRENCY_FAIL",
            AppError::AlreadyReleased(_) => "ALREADY_RELEASED",
            AppError::NetworkTimeout => "NETWORK_TIMEOUT",
            AppError::NetworkReset => "NETWORK_RESET",
            AppError::EngineBusy(_) => "ENGINE_BUSY",
            AppError::ProtocolError(_) => "PROTOCOL_ERROR",
            AppError::ConfigError(_) => "CONFIG_ERROR",
            AppError::StorageError(_) => "STORAGE_ERROR",
            AppError::Transport(_) => "TRANSPORT_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            AppError::InsufficientFunds | AppError::UnknownAccount(_) => 422,
            AppError::ConcurrencyFail => 409,
            AppError::AlreadyReleased(_) => 409,
            AppError::NetworkTimeout | AppError::NetworkReset | AppError::Transport(_) => 504,
            AppError::EngineBusy(_) => 409,
            AppError::ProtocolError(_) => 502,
            AppError::ConfigError(_) | AppError::BadRequest(_) => 400,
            AppError::StorageError(_) => 500,
        }
    }

    /// Errors that the HTTP client retries, per the retry policy in §4.4:
    /// timeout, connection reset, and content-length mismatch (folded here
    /// into `Transport`, which also covers the raw reqwest transport path).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::NetworkTimeout | AppError::NetworkReset | AppError::Transport(_)
        )
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::StorageError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification_matches_policy() {
        assert!(AppError::NetworkTimeout.is_retryable());
        assert!(AppError::NetworkReset.is_retryable());
        assert!(!AppError::InsufficientFunds.is_retryable());
        assert!(!AppError::EngineBusy("x".into()).is_retryable());
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::InsufficientFunds.http_status(), 422);
        assert_eq!(AppError::EngineBusy("x".into()).http_status(), 409);
        assert_eq!(AppError::ConfigError("x".into()).http_status(), 400);
    }
}
