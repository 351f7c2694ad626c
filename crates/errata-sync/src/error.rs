//! Error types for the sync engine
//!
//! Failures are split by granularity: a [`FetchError`] aborts the whole run,
//! a [`NormalizeError`] or a rejected [`StoreError`] only affects one
//! advisory, and [`TriggerError`] is returned when a run cannot start.

use std::time::Duration;
use thiserror::Error;

/// Upstream paging failure; any of these fails the run with zero writes
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Upstream transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Upstream returned HTTP {status} for page {page}: {body}")]
    Status { page: u32, status: u16, body: String },

    #[error("Upstream page {page} timed out after {after:?}")]
    Timeout { page: u32, after: Duration },

    #[error("Failed to decode upstream page {page}: {reason}")]
    Decode { page: u32, reason: String },

    #[error("Inconsistent upstream pagination: {0}")]
    Pagination(String),

    #[error("Sync cancelled before page {page}")]
    Cancelled { page: u32 },
}

impl FetchError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(e) => !e.is_decode() && !e.is_builder(),
            FetchError::Status { status, .. } => *status >= 500 || *status == 429,
            FetchError::Timeout { .. } => true,
            FetchError::Decode { .. } | FetchError::Pagination(_) | FetchError::Cancelled { .. } => {
                false
            },
        }
    }
}

/// Storage failure
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store itself cannot be reached; the rest of the batch would fail too
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A single write was refused (constraint violation, bad data)
    #[error("Store rejected write: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => StoreError::Unavailable(err.to_string()),
            other => StoreError::Rejected(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Rejected(format!("JSON encoding failed: {}", err))
    }
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Per-record normalization failure
#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Invalid {field} '{value}': {reason}")]
    Field {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Lookup resolution failed: {0}")]
    Registry(#[from] StoreError),
}

impl NormalizeError {
    pub fn field(field: &'static str, value: impl Into<String>, reason: impl ToString) -> Self {
        NormalizeError::Field {
            field,
            value: value.into(),
            reason: reason.to_string(),
        }
    }

    /// Registry failures caused by an unreachable store are not record-level
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, NormalizeError::Registry(e) if e.is_unavailable())
    }
}

/// Reasons a sync run could not be started
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("A sync run is already in progress")]
    AlreadyRunning,

    #[error("Failed to acquire sync lock: {0}")]
    Lock(#[from] StoreError),
}
