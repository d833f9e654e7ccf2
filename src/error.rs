//! Error types for Tollgate.
//!
//! Only configuration and programming mistakes are errors. A caller that is
//! over its limit, unauthenticated or unprivileged gets an ordinary
//! [`Decision`](crate::ratelimit::Decision), never an error.

use thiserror::Error;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised while layering configuration sources
    #[error("Configuration source error: {0}")]
    Settings(#[from] config::ConfigError),

    /// A category name that was never registered
    #[error("Unknown rate limit category: {0}")]
    UnknownCategory(String),

    /// A category registered twice
    #[error("Rate limit category already registered: {0}")]
    DuplicateCategory(String),

    /// The middleware chain did not populate the caller's network address
    #[error("Request context has no network address")]
    MissingAddress,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
