// src/error.rs

//! Error types for dnfdaemon
//!
//! `LockedError`, `AccessDeniedError` and `TransactionError` are the three
//! failures callers see as structured bus errors. Resolution failures are
//! not errors: they travel back to the caller as data.

use crate::engine::EngineError;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum Error {
    /// Caller does not hold the session lock
    #[error("{0}")]
    LockedError(String),

    /// Caller was refused by the authorization service or the daemon variant
    #[error("{0}")]
    AccessDeniedError(String),

    /// Engine-level failure outside of a resolved-plan failure
    #[error("{0}")]
    TransactionError(String),

    /// Malformed wire input (package reference, action name, JSON value)
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Configuration or catalog could not be loaded
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Failure reported by the package engine
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON encoding failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bus connection failure
    #[cfg(feature = "daemon")]
    #[error("D-Bus error: {0}")]
    Bus(#[from] zbus::Error),
}

impl Error {
    /// Short name of the bus error this maps onto
    pub fn bus_name(&self) -> &'static str {
        match self {
            Error::LockedError(_) => "LockedError",
            Error::AccessDeniedError(_) => "AccessDeniedError",
            _ => "TransactionError",
        }
    }
}
