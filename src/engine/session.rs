//! Evaluation sessions.
//!
//! A session owns one fact store, its append-only trace and the set of
//! verification questions already put to the customer. Sessions are
//! independent, so any number can be evaluated concurrently.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::confidence::Confidence;
use crate::error::{EngineResult, ExecutionError, ValidationError};
use crate::fact::{Contributor, FactSnapshot, FactStore};
use crate::trace::Trace;
use crate::value::FactValue;

use super::ChainReport;

/// Unique identifier for an evaluation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Creates a new random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Loaded, not yet chained (or supplemented since the last run).
    Idle,
    /// Chaining in progress.
    Iterating,
    /// A full pass produced no change.
    Fixpoint,
    /// Stopped at the iteration cap; trace and facts are best-effort.
    Exhausted,
    /// A rule error aborted chaining (only when rule errors are not isolated).
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Iterating => write!(f, "iterating"),
            Self::Fixpoint => write!(f, "fixpoint"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// An input fact: a value with the caller's confidence in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFact {
    /// The observed value.
    pub value: FactValue,
    /// Certainty in the observation; defaults to 1.0.
    #[serde(default = "full_confidence")]
    pub confidence: f64,
}

fn full_confidence() -> f64 {
    Confidence::MAX_VALUE
}

impl InputFact {
    /// An input fact with full confidence.
    #[must_use]
    pub fn new(value: impl Into<FactValue>) -> Self {
        Self {
            value: value.into(),
            confidence: Confidence::MAX_VALUE,
        }
    }

    /// An input fact with explicit confidence.
    #[must_use]
    pub fn with_confidence(value: impl Into<FactValue>, confidence: f64) -> Self {
        Self {
            value: value.into(),
            confidence,
        }
    }

    /// Converts a JSON input entry.
    ///
    /// Scalars carry full confidence; `{"value": v, "confidence": c}` objects
    /// carry explicit confidence.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for unsupported JSON types or a malformed
    /// confidence.
    pub fn from_json(key: &str, json: &serde_json::Value) -> Result<Self, ValidationError> {
        let serde_json::Value::Object(fields) = json else {
            return Ok(Self::new(FactValue::from_json(key, json)?));
        };
        let value = fields.get("value").ok_or_else(|| ValidationError::UnsupportedValue {
            key: key.to_string(),
            type_name: "object".to_string(),
        })?;
        let confidence = match fields.get("confidence") {
            None => Confidence::MAX_VALUE,
            Some(c) => c.as_f64().ok_or_else(|| ValidationError::ConfidenceOutOfRange {
                key: key.to_string(),
                value: f64::NAN,
            })?,
        };
        Ok(Self::with_confidence(FactValue::from_json(key, value)?, confidence))
    }
}

impl From<FactValue> for InputFact {
    fn from(value: FactValue) -> Self {
        Self::new(value)
    }
}

impl From<bool> for InputFact {
    fn from(v: bool) -> Self {
        Self::new(v)
    }
}

impl From<i32> for InputFact {
    fn from(v: i32) -> Self {
        Self::new(v)
    }
}

impl From<f64> for InputFact {
    fn from(v: f64) -> Self {
        Self::new(v)
    }
}

impl From<&str> for InputFact {
    fn from(v: &str) -> Self {
        Self::new(v)
    }
}

impl From<String> for InputFact {
    fn from(v: String) -> Self {
        Self::new(v)
    }
}

impl<V: Into<FactValue>> From<(V, f64)> for InputFact {
    fn from((value, confidence): (V, f64)) -> Self {
        Self::with_confidence(value, confidence)
    }
}

/// Validates a batch of input facts without touching any store.
pub(super) fn validate_inputs<I, K, V>(facts: I) -> Result<Vec<(String, InputFact)>, ValidationError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<InputFact>,
{
    facts
        .into_iter()
        .map(|(key, input)| {
            let key: String = key.into();
            let input: InputFact = input.into();
            if key.trim().is_empty() {
                return Err(ValidationError::EmptyKey);
            }
            input.value.validate(&key)?;
            Confidence::for_key(&key, input.confidence)?;
            Ok((key, input))
        })
        .collect()
}

/// One evaluation: a fact store and its trace, owned exclusively.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    pub(super) state: SessionState,
    pub(super) facts: FactStore,
    pub(super) trace: Trace,
    pub(super) iterations: usize,
    pub(super) seen_conflicts: HashSet<(String, String)>,
    pub(super) seen_errors: HashSet<(String, String)>,
    pub(super) last_report: Option<ChainReport>,
    asked: BTreeSet<String>,
}

impl Session {
    pub(super) fn new() -> Self {
        Self {
            id: SessionId::new(),
            created_at: Utc::now(),
            state: SessionState::Idle,
            facts: FactStore::new(),
            trace: Trace::new(),
            iterations: 0,
            seen_conflicts: HashSet::new(),
            seen_errors: HashSet::new(),
            last_report: None,
            asked: BTreeSet::new(),
        }
    }

    /// Unique session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Current facts.
    #[must_use]
    pub const fn facts(&self) -> &FactStore {
        &self.facts
    }

    /// Read-only snapshot of the current facts.
    #[must_use]
    pub fn snapshot(&self) -> FactSnapshot {
        self.facts.snapshot()
    }

    /// Trace recorded so far.
    #[must_use]
    pub const fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Chaining iterations run so far, across all runs.
    #[must_use]
    pub const fn iterations(&self) -> usize {
        self.iterations
    }

    /// Report of the most recent `forward_chain` run.
    #[must_use]
    pub const fn last_report(&self) -> Option<&ChainReport> {
        self.last_report.as_ref()
    }

    /// Questions put to the customer so far, whether answered or not.
    #[must_use]
    pub const fn asked_questions(&self) -> &BTreeSet<String> {
        &self.asked
    }

    /// Records that a verification question was asked. Returns false if it
    /// had been asked before.
    pub fn mark_asked(&mut self, question: impl Into<String>) -> bool {
        self.asked.insert(question.into())
    }

    /// Adds further input facts, e.g. answers to verification questions.
    ///
    /// The batch is applied atomically: nothing is added if any fact is
    /// invalid or contradicts a stored value. Re-supplying an existing key
    /// with the same value keeps the larger of the old and new input
    /// confidence; input is never combined with itself. The session returns
    /// to [`SessionState::Idle`] so the next `forward_chain` picks up the new
    /// evidence.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed facts, or
    /// `ExecutionError::ValueConflict` when a key already holds another value.
    pub fn supplement<I, K, V>(&mut self, facts: I) -> EngineResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<InputFact>,
    {
        let inputs = validate_inputs(facts)?;
        for (i, (key, input)) in inputs.iter().enumerate() {
            let existing = self.facts.get(key).map(|(v, _)| v).or_else(|| {
                inputs[..i]
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, earlier)| &earlier.value)
            });
            if let Some(existing) = existing {
                if *existing != input.value {
                    return Err(ExecutionError::ValueConflict {
                        key: key.clone(),
                        existing: existing.to_string(),
                        incoming: input.value.to_string(),
                    }
                    .into());
                }
            }
        }
        for (key, input) in inputs {
            self.facts
                .merge_contribution(&key, input.value, Contributor::Input, input.confidence)?;
        }
        self.state = SessionState::Idle;
        Ok(())
    }
}
