//! Error types for riskchain.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! specific conditions. Validation errors are raised before any chaining
//! begins; execution errors describe what went wrong during evaluation and
//! are usually recorded in the trace rather than returned.

use thiserror::Error;

/// Validation errors raised at an input boundary (initial facts, rules, config).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Confidence value {value} for '{key}' is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange {
        key: String,
        value: f64,
    },

    #[error("Numeric value for '{key}' must be finite")]
    NonFiniteNumber {
        key: String,
    },

    #[error("Unsupported value type '{type_name}' for fact '{key}'")]
    UnsupportedValue {
        key: String,
        type_name: String,
    },

    #[error("Fact key cannot be empty")]
    EmptyKey,

    #[error("Rule name cannot be empty")]
    EmptyRuleName,

    #[error("Rule '{name}' is defined more than once")]
    DuplicateRule {
        name: String,
    },

    #[error("Invalid condition in rule '{rule}': {reason}")]
    InvalidCondition {
        rule: String,
        reason: String,
    },

    #[error("Invalid engine configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors that occur while a session is evaluated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("Value conflict on '{key}': existing {existing}, incoming {incoming}")]
    ValueConflict {
        key: String,
        existing: String,
        incoming: String,
    },

    #[error("Rule '{rule}' failed: {reason}")]
    RuleEvaluation {
        rule: String,
        reason: String,
    },

    #[error("Iteration cap of {cap} reached before fixpoint")]
    IterationCapExceeded {
        cap: usize,
    },

    #[error("Evaluation queue is full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Evaluation worker disconnected")]
    Disconnected,

    #[error("Evaluation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Error reported by a rule's own condition or conclusion logic.
///
/// The engine isolates these to the failing rule: the firing attempt is
/// recorded in the trace and chaining continues with the other rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RuleError {
    message: String,
}

impl RuleError {
    /// Creates a rule error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Top-level error type for riskchain.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl EngineError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for riskchain operations.
pub type EngineResult<T> = Result<T, EngineError>;
