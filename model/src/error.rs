//! Model error types

use thiserror::Error;

/// Input rejected before it reaches the alert pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("High threshold must be greater than low threshold")]
    ThresholdOrder { high: f64, low: f64 },

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("{field} must not exceed {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("Invalid notification destination '{0}'")]
    InvalidDestination(String),
}

/// Stored or supplied text that does not name a known variant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown reading context: {0}")]
    UnknownContext(String),

    #[error("Unknown alert kind: {0}")]
    UnknownAlertKind(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Unknown statistics period: {0}")]
    UnknownPeriod(String),

    #[error("Unknown trend grouping: {0}")]
    UnknownGrouping(String),
}
