//! Fact store and read-only snapshots.
//!
//! A fact is a keyed value with an attached confidence. Facts are only ever
//! asserted or merged, never retracted or silently replaced: each fact keeps
//! the list of contributions that support it and its confidence is the
//! noisy-OR fold of those contributions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::confidence::{self, Confidence};
use crate::error::{EngineResult, ExecutionError, ValidationError};
use crate::value::FactValue;

/// Who supplied a piece of evidence for a fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum Contributor {
    /// The caller's input snapshot.
    Input,
    /// A named rule firing.
    Rule(String),
    /// A direct `assert_or_merge` call; every call is independent evidence.
    External,
}

impl fmt::Display for Contributor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Rule(name) => write!(f, "rule:{name}"),
            Self::External => write!(f, "external"),
        }
    }
}

/// One piece of evidence supporting a fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    /// Source of the evidence.
    pub contributor: Contributor,
    /// Confidence carried by this evidence alone.
    pub confidence: f64,
}

/// A fact with its supporting evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// The asserted value. Fixed by the first assertion.
    pub value: FactValue,

    /// Combined confidence of all contributions.
    pub confidence: f64,

    /// Evidence in the order it was first recorded.
    pub contributions: Vec<Contribution>,

    /// Insertion order within the session.
    pub sequence: u64,
}

impl Fact {
    /// Returns true if the caller's input supports this fact.
    #[must_use]
    pub fn is_input(&self) -> bool {
        self.contributions
            .iter()
            .any(|c| c.contributor == Contributor::Input)
    }

    /// Names of the rules that contributed to this fact, in contribution order.
    pub fn supporting_rules(&self) -> impl Iterator<Item = &str> {
        self.contributions.iter().filter_map(|c| match &c.contributor {
            Contributor::Rule(name) => Some(name.as_str()),
            _ => None,
        })
    }

    fn refold(&mut self) {
        self.confidence = confidence::fold(self.contributions.iter().map(|c| c.confidence));
    }
}

/// Result of an assert-or-merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Confidence before the merge; `None` if the fact was new.
    pub before: Option<f64>,
    /// Confidence after the merge.
    pub after: f64,
}

impl MergeOutcome {
    /// Returns true if the merge inserted a new fact.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.before.is_none()
    }

    /// Returns true if the merge inserted a fact or moved its confidence
    /// by more than `epsilon`.
    #[must_use]
    pub fn changed(&self, epsilon: f64) -> bool {
        match self.before {
            None => true,
            Some(before) => self.after - before > epsilon,
        }
    }
}

type FactMap = BTreeMap<String, Fact>;

/// Mutable fact store owned by a session.
///
/// The only mutation paths are [`FactStore::assert_or_merge`] and
/// [`FactStore::merge_contribution`]; both refuse to change an existing
/// fact's value.
#[derive(Debug, Clone, Default)]
pub struct FactStore {
    facts: Arc<FactMap>,
    next_sequence: u64,
}

impl FactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value and confidence of a fact.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<(&FactValue, f64)> {
        self.facts.get(key).map(|f| (&f.value, f.confidence))
    }

    /// Returns the full fact record.
    #[must_use]
    pub fn fact(&self, key: &str) -> Option<&Fact> {
        self.facts.get(key)
    }

    /// Number of facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Returns true if the store holds no facts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Iterates facts ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Fact)> {
        self.facts.iter().map(|(k, f)| (k.as_str(), f))
    }

    /// Sum of all fact confidences.
    #[must_use]
    pub fn total_confidence(&self) -> f64 {
        self.facts.values().map(|f| f.confidence).sum()
    }

    /// Takes a read-only snapshot.
    ///
    /// The snapshot shares storage with the store until the next mutation,
    /// which copies the map once.
    #[must_use]
    pub fn snapshot(&self) -> FactSnapshot {
        FactSnapshot {
            facts: Arc::clone(&self.facts),
        }
    }

    /// Asserts a fact or merges an independent piece of evidence into it.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty key, a non-finite number or a
    /// confidence outside [0, 1], and `ExecutionError::ValueConflict` if the
    /// key exists with a different value. The store is unchanged on error.
    pub fn assert_or_merge(
        &mut self,
        key: &str,
        value: FactValue,
        confidence: f64,
    ) -> EngineResult<MergeOutcome> {
        self.merge_contribution(key, value, Contributor::External, confidence)
    }

    /// Merges evidence from `contributor` into the fact at `key`.
    ///
    /// Input and rule contributors support a fact at most once: a repeated
    /// contribution keeps the larger of the old and new confidence instead of
    /// being combined with itself.
    ///
    /// # Errors
    ///
    /// Same as [`FactStore::assert_or_merge`]. The store is unchanged on error.
    pub fn merge_contribution(
        &mut self,
        key: &str,
        value: FactValue,
        contributor: Contributor,
        confidence: f64,
    ) -> EngineResult<MergeOutcome> {
        if key.trim().is_empty() {
            return Err(ValidationError::EmptyKey.into());
        }
        value.validate(key)?;
        let confidence = Confidence::for_key(key, confidence)?.value();
        if let Some(existing) = self.facts.get(key) {
            if existing.value != value {
                return Err(ExecutionError::ValueConflict {
                    key: key.to_string(),
                    existing: existing.value.to_string(),
                    incoming: value.to_string(),
                }
                .into());
            }
        }

        let sequence = self.next_sequence;
        let facts = Arc::make_mut(&mut self.facts);
        let Some(fact) = facts.get_mut(key) else {
            facts.insert(
                key.to_string(),
                Fact {
                    value,
                    confidence,
                    contributions: vec![Contribution {
                        contributor,
                        confidence,
                    }],
                    sequence,
                },
            );
            self.next_sequence += 1;
            return Ok(MergeOutcome {
                before: None,
                after: confidence,
            });
        };

        let before = fact.confidence;
        let repeat = match contributor {
            Contributor::External => None,
            _ => fact
                .contributions
                .iter_mut()
                .find(|c| c.contributor == contributor),
        };
        match repeat {
            Some(existing) => existing.confidence = existing.confidence.max(confidence),
            None => fact.contributions.push(Contribution {
                contributor,
                confidence,
            }),
        }
        fact.refold();

        Ok(MergeOutcome {
            before: Some(before),
            after: fact.confidence,
        })
    }
}

/// Read-only view of the fact store as of a point in time.
#[derive(Debug, Clone, Default)]
pub struct FactSnapshot {
    facts: Arc<FactMap>,
}

impl FactSnapshot {
    /// Returns the value and confidence of a fact.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<(&FactValue, f64)> {
        self.facts.get(key).map(|f| (&f.value, f.confidence))
    }

    /// Returns the value of a fact.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&FactValue> {
        self.facts.get(key).map(|f| &f.value)
    }

    /// Returns the confidence of a fact.
    #[must_use]
    pub fn confidence(&self, key: &str) -> Option<f64> {
        self.facts.get(key).map(|f| f.confidence)
    }

    /// Returns a numeric fact value.
    #[must_use]
    pub fn number(&self, key: &str) -> Option<f64> {
        self.value(key).and_then(FactValue::as_number)
    }

    /// Returns a boolean fact value.
    #[must_use]
    pub fn boolean(&self, key: &str) -> Option<bool> {
        self.value(key).and_then(FactValue::as_bool)
    }

    /// Returns true if the fact exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.facts.contains_key(key)
    }

    /// Number of facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Returns true if the snapshot holds no facts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Iterates facts ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Fact)> {
        self.facts.iter().map(|(k, f)| (k.as_str(), f))
    }
}
