//! Error type definitions.

use std::time::Duration;

use log::SetLoggerError;
use thiserror::Error;

/// Error types for initialization failures.
#[derive(Error, Debug)]
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error initializing the HTTP client.
    #[error("HTTP client initialization error: {0}")]
    HttpClientError(#[from] reqwest::Error),

    /// Invalid configuration rejected at construction.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigValidationError),
}

/// Error setting up the database: connect options, pool creation, or a
/// migration statement.
#[derive(Error, Debug)]
#[error("Database setup error: {0}")]
pub struct DatabaseError(#[from] pub sqlx::Error);

/// Errors produced by a single calculator call.
///
/// `NoContent` and `TooManyRequests` are flow control rather than faults;
/// the worker pool turns them into synthetic results and, for the latter,
/// a pause cycle. Everything else is a per-call soft failure.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The calculator answered 204: the order is unknown to it.
    #[error("no content for order")]
    NoContent,

    /// The calculator answered 429 with its reported ceiling.
    #[error("too many requests: retry after {retry_after:?}, allowed {allowed_rpm} rpm")]
    TooManyRequests {
        retry_after: Duration,
        allowed_rpm: u64,
    },

    /// Malformed payload: bad JSON, unexpected content type, or a 429
    /// envelope we could not parse.
    #[error("decode error: {0}")]
    Decode(String),

    /// Network failure, timeout, or an unexpected status code.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    /// Builds the transport variant from a reqwest failure.
    pub fn transport(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

/// Errors produced by the order store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The referenced order does not exist.
    #[error("order not found")]
    NotFound,

    /// A withdrawal exceeds the user's available balance.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Connection-level failure worth retrying with backoff.
    #[error("transient database error: {0}")]
    Transient(sqlx::Error),

    /// Any other database failure; surfaced immediately.
    #[error("database error: {0}")]
    Sql(sqlx::Error),
}

impl StoreError {
    /// True for errors the bounded-backoff wrapper should retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    /// Classifies an sqlx failure into transient vs. permanent.
    ///
    /// Pool exhaustion, I/O failures, and SQLite's busy/locked conditions
    /// come and go with load; constraint violations and friends do not.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => {
                StoreError::Transient(err)
            }
            sqlx::Error::Database(db) => {
                let code = db.code();
                let code = code.as_deref().unwrap_or("");
                // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
                if code == "5" || code == "6" {
                    StoreError::Transient(err)
                } else {
                    StoreError::Sql(err)
                }
            }
            sqlx::Error::RowNotFound => StoreError::NotFound,
            _ => StoreError::Sql(err),
        }
    }
}
