//! Error taxonomy shared by every orchestration layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of an orchestration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Bad parameters supplied by the caller.
    InvalidInput,
    /// An abort signal was tripped.
    Cancelled,
    /// Unexpected internal fault (e.g. a malformed program).
    Runtime,
}

impl ErrorCode {
    /// Wire name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::Cancelled => "CANCELLED",
            Self::Runtime => "RUNTIME",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error carried by failed runs and thrown out of `join`.
///
/// Task-level failures (non-zero exit, `stopReason == "error"`) are *not*
/// represented here; they live in the `ExecutionResult` itself.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RunError {
    /// Error category.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Whether the caller may simply retry.
    pub recoverable: bool,
}

impl RunError {
    /// Create an error with the default recoverability for its code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let recoverable = matches!(code, ErrorCode::InvalidInput | ErrorCode::Cancelled);
        Self {
            code,
            message: message.into(),
            recoverable,
        }
    }

    /// Bad parameters.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Abort signal tripped.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message)
    }

    /// Internal fault.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Runtime, message)
    }

    /// Returns true if this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }
}

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability_follows_code() {
        assert!(RunError::invalid_input("x").recoverable);
        assert!(RunError::cancelled("x").recoverable);
        assert!(!RunError::runtime("x").recoverable);
    }

    #[test]
    fn test_code_serializes_screaming_snake() {
        let err = RunError::invalid_input("model is required");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "INVALID_INPUT");
        assert_eq!(json["recoverable"], true);
        assert_eq!(err.to_string(), "INVALID_INPUT: model is required");
    }
}
