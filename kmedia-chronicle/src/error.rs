//! Error types for kmedia-chronicle
//!
//! Each pipeline stage has its own error so the worker can tell a transient
//! fetch failure from a batch rollback from an isolated bad payload.

use std::time::Duration;
use thiserror::Error;

/// Scan endpoint failures (transient: the cycle is retried from the same cursor)
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Scan request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Scan endpoint returned {0}: {1}")]
    Status(u16, String),

    #[error("Decode error: {0}")]
    Decode(String),
}

/// A flush candidate whose event payload cannot be persisted
///
/// Isolated to the one candidate; the rest of the batch proceeds.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Invalid payload JSON: {0}")]
    InvalidJson(String),

    #[error("Payload has no unit_uid")]
    MissingUnitUid,

    #[error("Unknown time zone: {0}")]
    UnknownTimeZone(String),
}

/// Progress store failures (the whole batch is rolled back)
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stored progress data for ({account_id}, {unit_uid}) is unreadable: {reason}")]
    StoredData {
        account_id: String,
        unit_uid: String,
        reason: String,
    },

    #[error("Encode error: {0}")]
    Encode(String),
}

/// Top-level error for kmedia-chronicle
#[derive(Debug, Error)]
pub enum ChronicleError {
    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("Write failed: {0}")]
    Write(#[from] WriteError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] kmedia_common::Error),
}

/// Convenience Result type using ChronicleError
pub type Result<T> = std::result::Result<T, ChronicleError>;
