//! Error types for hospital transmission inference.
//!
//! Errors carry:
//! - Stable error codes for machine parsing
//! - Category classification for grouping
//! - A fatality flag separating abort-now failures from recoverable ones
//!
//! Per-record input problems are *not* errors: the parser collects them as
//! diagnostics and keeps going. Everything here aborts the operation that
//! raised it.
//!
//! # Human-Facing Output
//!
//! ```text
//! ✗ Numerical Degeneracy
//!   Reason: numerical instability detected: boundary distribution has zero mass at checkpoint 3
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for hospital transmission operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Priors, run settings and parameter bounds.
    Config,
    /// Event input that cannot be used at all.
    Input,
    /// CTMC engine and sampler failures.
    Inference,
    /// History graph contract violations.
    Graph,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Input => write!(f, "input"),
            ErrorCategory::Inference => write!(f, "inference"),
            ErrorCategory::Graph => write!(f, "graph"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid priors: {0}")]
    InvalidPriors(String),

    #[error("model supplied a degenerate {rate} rate: {value}")]
    DegenerateRate { rate: &'static str, value: f64 },

    // Input errors (20-29)
    #[error("no usable events in input ({diagnostics} records rejected)")]
    EmptyInput { diagnostics: usize },

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    // Inference errors (30-39)
    #[error("inference failed: {0}")]
    Inference(String),

    #[error("numerical instability detected: {0}")]
    NumericalInstability(String),

    // Graph errors (40-49)
    #[error("history graph inconsistency: {0}")]
    GraphConsistency(String),

    #[error("state owned by {expected} received event for {actual}")]
    OwnerMismatch { expected: String, actual: String },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Input errors
    /// - 30-39: Inference errors
    /// - 40-49: Graph errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidPriors(_) => 11,
            Error::DegenerateRate { .. } => 12,
            Error::EmptyInput { .. } => 20,
            Error::InvalidEvent(_) => 21,
            Error::Inference(_) => 30,
            Error::NumericalInstability(_) => 31,
            Error::GraphConsistency(_) => 40,
            Error::OwnerMismatch { .. } => 41,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidPriors(_) | Error::DegenerateRate { .. } => {
                ErrorCategory::Config
            }
            Error::EmptyInput { .. } | Error::InvalidEvent(_) => ErrorCategory::Input,
            Error::Inference(_) | Error::NumericalInstability(_) => ErrorCategory::Inference,
            Error::GraphConsistency(_) | Error::OwnerMismatch { .. } => ErrorCategory::Graph,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Whether the process should stop rather than skip and continue.
    ///
    /// Configuration, numerical and graph failures corrupt every later
    /// Gibbs step, so they always terminate the run.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::InvalidEvent(_) => false,
            Error::Io(_) => false,
            _ => true,
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::InvalidPriors(_) => "Invalid Priors",
            Error::DegenerateRate { .. } => "Degenerate Model Rate",
            Error::EmptyInput { .. } => "Empty Input",
            Error::InvalidEvent(_) => "Invalid Event",
            Error::Inference(_) => "Inference Error",
            Error::NumericalInstability(_) => "Numerical Degeneracy",
            Error::GraphConsistency(_) => "History Graph Inconsistency",
            Error::OwnerMismatch { .. } => "State Owner Mismatch",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Parse Error",
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error terminates the run.
    pub fatal: bool,

    /// Additional structured context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::DegenerateRate { rate, value } => {
                context.insert("rate".to_string(), serde_json::json!(rate));
                context.insert("value".to_string(), serde_json::json!(value.to_string()));
            }
            Error::EmptyInput { diagnostics } => {
                context.insert("diagnostics".to_string(), serde_json::json!(diagnostics));
            }
            Error::OwnerMismatch { expected, actual } => {
                context.insert("expected_owner".to_string(), serde_json::json!(expected));
                context.insert("actual_owner".to_string(), serde_json::json!(actual));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            fatal: err.is_fatal(),
            context,
        }
    }
}

impl StructuredError {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}

/// Format an error for human-readable stderr output.
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let (red, reset) = if use_color {
        ("\x1b[31m", "\x1b[0m")
    } else {
        ("", "")
    };
    format!(
        "{red}✗{reset} {headline}\n  Reason: {message}",
        headline = err.headline(),
        message = err,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(Error::Config("test".into()).code(), 10);
        assert_eq!(Error::EmptyInput { diagnostics: 3 }.code(), 20);
        assert_eq!(Error::NumericalInstability("nan".into()).code(), 31);
        assert_eq!(Error::GraphConsistency("x".into()).code(), 40);
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            Error::DegenerateRate {
                rate: "acquisition",
                value: f64::NEG_INFINITY
            }
            .category(),
            ErrorCategory::Config
        );
        assert_eq!(
            Error::Inference("x".into()).category(),
            ErrorCategory::Inference
        );
        assert_eq!(
            Error::OwnerMismatch {
                expected: "unit 1".into(),
                actual: "unit 2".into()
            }
            .category(),
            ErrorCategory::Graph
        );
    }

    #[test]
    fn test_fatality() {
        assert!(Error::InvalidPriors("negative rate".into()).is_fatal());
        assert!(Error::NumericalInstability("zero mass".into()).is_fatal());
        assert!(!Error::InvalidEvent("bad".into()).is_fatal());
    }

    #[test]
    fn test_structured_error_json() {
        let err = Error::DegenerateRate {
            rate: "clearance",
            value: f64::NAN,
        };
        let json = StructuredError::from(&err).to_json();
        assert!(json.contains(r#""code":12"#));
        assert!(json.contains(r#""category":"config""#));
        assert!(json.contains(r#""fatal":true"#));
        assert!(json.contains(r#""rate":"clearance""#));
    }

    #[test]
    fn test_format_error_human() {
        let err = Error::EmptyInput { diagnostics: 2 };
        let formatted = format_error_human(&err, false);
        assert!(formatted.contains("Empty Input"));
        assert!(formatted.contains("2 records rejected"));
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Config.to_string(), "config");
        assert_eq!(ErrorCategory::Graph.to_string(), "graph");
    }
}
