//! Error types for ID and label parsing.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs and labels.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The string is empty.
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    /// The string is longer than allowed.
    #[error("{kind} too long: {len} > {max}")]
    TooLong {
        kind: &'static str,
        len: usize,
        max: usize,
    },

    /// The string format is invalid.
    #[error("invalid {kind}: {message}")]
    InvalidFormat { kind: &'static str, message: String },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty { .. })
    }
}
