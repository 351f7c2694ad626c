//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, ErrataError>;

/// Main error type for shared operations
#[derive(Error, Debug)]
pub enum ErrataError {
    #[error("Invalid package identifier '{value}': {reason}")]
    InvalidNevra { value: String, reason: String },
}

impl ErrataError {
    /// Build an invalid NEVRA error for `value`
    pub fn invalid_nevra(value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidNevra {
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
