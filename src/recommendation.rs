//! Recommendation derivation.
//!
//! After chaining, facts whose key signals an action (an explicit binding
//! such as `fraud_risk -> DECLINE`, or the `<ACTION>_recommended` naming
//! convention) are turned into ranked recommendations. A higher-severity
//! action is never dropped in favour of a lower one: every signalled action
//! appears, most severe first.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::fact::FactStore;
use crate::trace::{Trace, TraceEvent};
use crate::value::FactValue;

/// Decision kinds, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Decline,
    ManualReview,
    StepUpVerify,
    Approve,
}

impl Action {
    /// All actions, most severe first.
    pub const ALL: [Self; 4] = [
        Self::Decline,
        Self::ManualReview,
        Self::StepUpVerify,
        Self::Approve,
    ];

    /// Severity rank; higher outranks lower.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::Decline => 3,
            Self::ManualReview => 2,
            Self::StepUpVerify => 1,
            Self::Approve => 0,
        }
    }

    /// Upper-case label, e.g. `"STEP_UP_VERIFY"`.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Decline => "DECLINE",
            Self::ManualReview => "MANUAL_REVIEW",
            Self::StepUpVerify => "STEP_UP_VERIFY",
            Self::Approve => "APPROVE",
        }
    }

    /// Parses a label produced by [`Action::label`].
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.label() == label)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A ranked, confidence-annotated action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: Action,

    /// Confidence of the strongest supporting fact.
    pub confidence: f64,

    /// Signal facts supporting this action, in derivation order.
    pub supporting_keys: Vec<String>,

    /// Rules that contributed to the supporting facts, in firing order.
    pub rules: Vec<String>,

    pub justification: String,
}

/// How final facts map to actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationPolicy {
    /// Explicit fact key to action bindings.
    pub bindings: BTreeMap<String, Action>,

    /// Naming convention: `<LABEL><suffix>` signals the labelled action.
    /// `None` disables the convention.
    pub suffix: Option<String>,

    /// Signals below this confidence are ignored. A signal at confidence 0
    /// carries no evidence and is ignored even when this is 0.
    pub min_confidence: f64,
}

impl Default for RecommendationPolicy {
    fn default() -> Self {
        Self {
            bindings: BTreeMap::new(),
            suffix: Some("_recommended".to_string()),
            min_confidence: 0.0,
        }
    }
}

impl RecommendationPolicy {
    /// Binds a fact key to an action.
    #[must_use]
    pub fn bind(mut self, key: impl Into<String>, action: Action) -> Self {
        self.bindings.insert(key.into(), action);
        self
    }

    /// Checks the policy is usable.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for an empty suffix or a
    /// `min_confidence` outside [0, 1].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.suffix.as_deref().is_some_and(str::is_empty) {
            return Err(ValidationError::InvalidConfig {
                reason: "recommendation suffix cannot be empty".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ValidationError::InvalidConfig {
                reason: format!("min_confidence {} must be in [0, 1]", self.min_confidence),
            });
        }
        Ok(())
    }

    /// Action signalled by a fact key, if any.
    #[must_use]
    pub fn action_for(&self, key: &str) -> Option<Action> {
        if let Some(action) = self.bindings.get(key) {
            return Some(*action);
        }
        let suffix = self.suffix.as_deref()?;
        key.strip_suffix(suffix).and_then(Action::from_label)
    }

    /// Derives ranked recommendations from final facts and the trace.
    ///
    /// Only signal facts whose value is `true` and whose confidence is above
    /// zero count. Several signals for the same action collapse into one
    /// recommendation carrying the strongest confidence. Ordering: severity,
    /// then confidence (both descending), then derivation order.
    #[must_use]
    pub fn recommend(&self, facts: &FactStore, trace: &Trace) -> Vec<Recommendation> {
        struct Group<'a> {
            confidence: f64,
            first_sequence: u64,
            signals: Vec<(u64, &'a str, f64)>,
        }

        let mut groups: BTreeMap<Action, Group<'_>> = BTreeMap::new();
        for (key, fact) in facts.iter() {
            let Some(action) = self.action_for(key) else {
                continue;
            };
            if fact.value != FactValue::Bool(true) {
                tracing::debug!(key, value = %fact.value, "ignoring non-true action signal");
                continue;
            }
            if fact.confidence <= 0.0 || fact.confidence < self.min_confidence {
                continue;
            }
            let group = groups.entry(action).or_insert(Group {
                confidence: 0.0,
                first_sequence: u64::MAX,
                signals: Vec::new(),
            });
            group.confidence = group.confidence.max(fact.confidence);
            group.first_sequence = group.first_sequence.min(fact.sequence);
            group.signals.push((fact.sequence, key, fact.confidence));
        }

        let mut ranked: Vec<(u64, Recommendation)> = groups
            .into_iter()
            .map(|(action, mut group)| {
                group.signals.sort_by_key(|(seq, _, _)| *seq);
                let supporting_keys: Vec<String> =
                    group.signals.iter().map(|(_, k, _)| (*k).to_string()).collect();
                let rules = contributing_rules(trace, &supporting_keys);
                let justification = justify(action, group.confidence, &group.signals, &rules);
                (
                    group.first_sequence,
                    Recommendation {
                        action,
                        confidence: group.confidence,
                        supporting_keys,
                        rules,
                        justification,
                    },
                )
            })
            .collect();

        ranked.sort_by(|(seq_a, a), (seq_b, b)| {
            b.action
                .severity()
                .cmp(&a.action.severity())
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| seq_a.cmp(seq_b))
        });
        ranked.into_iter().map(|(_, r)| r).collect()
    }
}

fn contributing_rules(trace: &Trace, keys: &[String]) -> Vec<String> {
    let mut rules: Vec<String> = Vec::new();
    for entry in trace {
        let contributes = matches!(
            entry.event,
            TraceEvent::Asserted { .. } | TraceEvent::Merged { .. }
        );
        if !contributes {
            continue;
        }
        let Some(rule) = entry.rule.as_deref() else {
            continue;
        };
        let concerns = entry
            .event
            .key()
            .is_some_and(|k| keys.iter().any(|s| s == k));
        if concerns && !rules.iter().any(|r| r == rule) {
            rules.push(rule.to_string());
        }
    }
    rules
}

fn justify(action: Action, confidence: f64, signals: &[(u64, &str, f64)], rules: &[String]) -> String {
    let evidence: Vec<String> = signals
        .iter()
        .map(|(_, key, c)| format!("{key} ({c:.2})"))
        .collect();
    let via = if rules.is_empty() {
        "supplied as input".to_string()
    } else {
        format!("via {}", rules.join(", "))
    };
    format!(
        "{action} at {confidence:.2}: {} {via}",
        evidence.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::Contributor;

    fn store(signals: &[(&str, FactValue, f64)]) -> FactStore {
        let mut store = FactStore::new();
        for (k, v, c) in signals {
            store
                .merge_contribution(k, v.clone(), Contributor::Rule(format!("rule_{k}")), *c)
                .unwrap();
        }
        store
    }

    #[test]
    fn action_labels_round_trip() {
        for action in Action::ALL {
            assert_eq!(Action::from_label(action.label()), Some(action));
        }
        assert_eq!(Action::from_label("ESCALATE"), None);
    }

    #[test]
    fn suffix_convention_and_bindings() {
        let policy = RecommendationPolicy::default().bind("fraud_risk", Action::Decline);
        assert_eq!(policy.action_for("DECLINE_recommended"), Some(Action::Decline));
        assert_eq!(policy.action_for("STEP_UP_VERIFY_recommended"), Some(Action::StepUpVerify));
        assert_eq!(policy.action_for("fraud_risk"), Some(Action::Decline));
        assert_eq!(policy.action_for("high_amount"), None);
        assert_eq!(policy.action_for("MAYBE_recommended"), None);

        let no_suffix = RecommendationPolicy {
            suffix: None,
            ..RecommendationPolicy::default()
        };
        assert_eq!(no_suffix.action_for("DECLINE_recommended"), None);
    }

    #[test]
    fn severity_outranks_confidence() {
        let facts = store(&[
            ("APPROVE_recommended", FactValue::Bool(true), 0.95),
            ("DECLINE_recommended", FactValue::Bool(true), 0.40),
            ("STEP_UP_VERIFY_recommended", FactValue::Bool(true), 0.70),
        ]);
        let recs = RecommendationPolicy::default().recommend(&facts, &Trace::new());
        let actions: Vec<Action> = recs.iter().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![Action::Decline, Action::StepUpVerify, Action::Approve]
        );
    }

    #[test]
    fn same_action_signals_collapse() {
        let policy = RecommendationPolicy::default().bind("automation_risk", Action::Decline);
        let facts = store(&[
            ("DECLINE_recommended", FactValue::Bool(true), 0.6),
            ("automation_risk", FactValue::Bool(true), 0.8),
        ]);
        let recs = policy.recommend(&facts, &Trace::new());
        assert_eq!(recs.len(), 1);
        assert!((recs[0].confidence - 0.8).abs() < 1e-12);
        assert_eq!(
            recs[0].supporting_keys,
            vec!["DECLINE_recommended".to_string(), "automation_risk".to_string()]
        );
    }

    #[test]
    fn ignores_false_and_weak_signals() {
        let policy = RecommendationPolicy {
            min_confidence: 0.5,
            ..RecommendationPolicy::default()
        };
        let facts = store(&[
            ("DECLINE_recommended", FactValue::Bool(false), 0.9),
            ("MANUAL_REVIEW_recommended", FactValue::Bool(true), 0.3),
            ("APPROVE_recommended", FactValue::from("yes"), 0.9),
        ]);
        assert!(policy.recommend(&facts, &Trace::new()).is_empty());
    }

    #[test]
    fn zero_confidence_signal_is_not_recommended() {
        let facts = store(&[
            ("DECLINE_recommended", FactValue::Bool(true), 0.0),
            ("STEP_UP_VERIFY_recommended", FactValue::Bool(true), 0.3),
        ]);
        let recs = RecommendationPolicy::default().recommend(&facts, &Trace::new());
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].action, Action::StepUpVerify);
    }

    #[test]
    fn input_signal_is_justified_as_input() {
        let mut facts = FactStore::new();
        facts
            .merge_contribution("APPROVE_recommended", FactValue::Bool(true), Contributor::Input, 1.0)
            .unwrap();
        let recs = RecommendationPolicy::default().recommend(&facts, &Trace::new());
        assert_eq!(recs[0].justification, "APPROVE at 1.00: APPROVE_recommended (1.00) supplied as input");
        assert!(recs[0].rules.is_empty());
    }

    #[test]
    fn validate_rejects_bad_policy() {
        let empty_suffix = RecommendationPolicy {
            suffix: Some(String::new()),
            ..RecommendationPolicy::default()
        };
        assert!(empty_suffix.validate().is_err());
        let bad_min = RecommendationPolicy {
            min_confidence: 1.5,
            ..RecommendationPolicy::default()
        };
        assert!(bad_min.validate().is_err());
    }
}
