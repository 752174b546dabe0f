//! Append-only audit trace of rule firings.
//!
//! Every entry records which rule fired in which iteration, the facts that
//! satisfied its condition (with their confidences at match time) and what
//! happened to the concluded fact. Entries are never edited or removed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::rule::MatchedFact;
use crate::value::FactValue;

/// What a trace entry records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEvent {
    /// A new fact was asserted.
    Asserted {
        key: String,
        value: FactValue,
        confidence: f64,
    },

    /// New evidence was merged into an existing fact.
    Merged {
        key: String,
        value: FactValue,
        before: f64,
        after: f64,
    },

    /// The rule concluded a value that contradicts the stored one.
    /// The stored fact keeps its first-asserted value.
    ValueConflict {
        key: String,
        existing: String,
        incoming: FactValue,
        confidence: f64,
    },

    /// The rule's own condition or conclusion logic failed.
    RuleError {
        reason: String,
    },

    /// Chaining stopped at the iteration cap before reaching fixpoint.
    IterationCapExceeded {
        cap: usize,
    },
}

impl TraceEvent {
    /// Key of the fact this event concerns, if any.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Asserted { key, .. } | Self::Merged { key, .. } | Self::ValueConflict { key, .. } => {
                Some(key)
            }
            Self::RuleError { .. } | Self::IterationCapExceeded { .. } => None,
        }
    }

    /// Confidence of the fact before this event; `None` for new facts.
    #[must_use]
    pub const fn before(&self) -> Option<f64> {
        match self {
            Self::Merged { before, .. } => Some(*before),
            _ => None,
        }
    }

    /// Confidence of the fact after this event.
    #[must_use]
    pub const fn after(&self) -> Option<f64> {
        match self {
            Self::Asserted { confidence, .. } => Some(*confidence),
            Self::Merged { after, .. } => Some(*after),
            _ => None,
        }
    }

    /// Returns true for conflict, error and cap events.
    #[must_use]
    pub const fn is_anomaly(&self) -> bool {
        matches!(
            self,
            Self::ValueConflict { .. } | Self::RuleError { .. } | Self::IterationCapExceeded { .. }
        )
    }
}

/// A single trace record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Position in the trace, starting at 0.
    pub sequence: usize,

    /// Chaining iteration (1-based) in which the event happened.
    pub iteration: usize,

    /// Rule that fired; `None` for engine events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,

    /// Priority of the rule that fired.
    #[serde(default)]
    pub priority: i32,

    /// Facts that satisfied the condition, as seen in the iteration snapshot.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched: Vec<MatchedFact>,

    /// What happened.
    pub event: TraceEvent,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = self.rule.as_deref().unwrap_or("engine");
        write!(f, "[{}#{}] ", self.iteration, self.sequence)?;
        match &self.event {
            TraceEvent::Asserted { key, value, confidence } => {
                write!(f, "Fired {rule}: '{key}' = {value} ({confidence:.2})")
            }
            TraceEvent::Merged { key, before, after, .. } => {
                write!(f, "Updated '{key}': {before:.2} -> {after:.2} via {rule}")
            }
            TraceEvent::ValueConflict { key, existing, incoming, .. } => {
                write!(f, "Conflict on '{key}' via {rule}: kept {existing}, rejected {incoming}")
            }
            TraceEvent::RuleError { reason } => write!(f, "Rule {rule} failed: {reason}"),
            TraceEvent::IterationCapExceeded { cap } => {
                write!(f, "Stopped at iteration cap {cap} before fixpoint")
            }
        }
    }
}

/// Ordered, append-only list of trace entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    /// Creates an empty trace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry, assigning its sequence number.
    pub(crate) fn record(
        &mut self,
        iteration: usize,
        rule: Option<(&str, i32)>,
        matched: Vec<MatchedFact>,
        event: TraceEvent,
    ) -> &TraceEntry {
        let (rule, priority) = match rule {
            Some((name, priority)) => (Some(name.to_string()), priority),
            None => (None, 0),
        };
        self.entries.push(TraceEntry {
            sequence: self.entries.len(),
            iteration,
            rule,
            priority,
            matched,
            event,
        });
        &self.entries[self.entries.len() - 1]
    }

    /// All entries in firing order.
    #[must_use]
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Iterates entries in firing order.
    pub fn iter(&self) -> std::slice::Iter<'_, TraceEntry> {
        self.entries.iter()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries concerning the given fact key.
    pub fn for_key<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a TraceEntry> + 'a {
        self.entries.iter().filter(move |e| e.event.key() == Some(key))
    }

    /// Entries recording conflicts, rule errors or cap exhaustion.
    pub fn anomalies(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter().filter(|e| e.event.is_anomaly())
    }

    /// Stable blake3 digest of the serialized entries, as lowercase hex.
    ///
    /// Two sessions with identical inputs and rules produce the same digest.
    ///
    /// # Errors
    ///
    /// Returns an internal error if serialization fails.
    pub fn digest(&self) -> EngineResult<String> {
        let mut hasher = blake3::Hasher::new();
        serde_json::to_writer(&mut hasher, &self.entries)
            .map_err(|e| EngineError::internal(format!("failed to serialize trace: {e}")))?;
        Ok(hasher.finalize().to_hex().to_string())
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a TraceEntry;
    type IntoIter = std::slice::Iter<'a, TraceEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
