//! Verification questions between chaining runs.
//!
//! A screening flow can ask the customer to confirm or explain what the
//! rules found, feed the answer back through [`Session::supplement`] and
//! chain again. [`QuestionPolicy`] ranks the questions worth asking next and
//! decides when the decision is settled enough to stop asking. It only
//! reads facts and recommendations; prompting the customer is up to the
//! caller.
//!
//! A question counts as settled once it has been asked
//! ([`Session::mark_asked`]) or its key is already a fact, so a value the
//! caller supplied up front is never asked for again.
//!
//! [`Session::supplement`]: crate::Session::supplement
//! [`Session::mark_asked`]: crate::Session::mark_asked

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::fact::FactSnapshot;
use crate::recommendation::{Action, Recommendation};
use crate::risk::RiskProfile;

/// An indicator the customer may be able to explain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Indicator fact that raises the anomaly.
    pub indicator: String,

    /// Question whose answer can explain it.
    pub question: String,

    /// Fact whose presence means the anomaly has been explained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explained_by: Option<String>,

    /// Ranking score of the question.
    pub score: f64,

    pub reason: String,
}

/// A question worth asking next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Fact key the answer is supplied under.
    pub key: String,
    pub prompt: String,
    /// Higher is more useful; not a confidence and may exceed 1.
    pub score: f64,
    pub reason: String,
}

/// Scores and cut-offs used by [`QuestionPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestionThresholds {
    /// Below this risk level, with nothing left to explain, only anomaly
    /// questions are offered.
    pub quiet_risk: f64,

    /// Above this risk level the verification questions are offered.
    pub escalation_risk: f64,

    /// Follow-up score per unit of indicator confidence.
    pub follow_up_weight: f64,

    pub verification_score: f64,

    /// Two strongest recommendations closer than this make a close call.
    pub close_call_margin: f64,

    /// Score of a verification question first offered by a close call.
    pub close_call_score: f64,

    /// Multiplier for verification questions already offered when the call
    /// is close.
    pub close_call_boost: f64,

    /// The strongest recommendation at or above this settles the decision.
    pub settled_confidence: f64,

    /// Settles the decision when risk is below `quiet_risk`.
    pub quiet_settled_confidence: f64,

    /// Settles a `DECLINE` or `MANUAL_REVIEW` decision.
    pub severe_settled_confidence: f64,

    /// Two strongest recommendations closer than this keep the flow asking.
    pub contested_margin: f64,

    /// Above this risk level an unconvincing decision keeps the flow asking.
    pub residual_risk: f64,

    /// Below this the strongest recommendation is unconvincing.
    pub convincing_confidence: f64,
}

impl Default for QuestionThresholds {
    fn default() -> Self {
        Self {
            quiet_risk: 0.12,
            escalation_risk: 0.45,
            follow_up_weight: 0.80,
            verification_score: 0.65,
            close_call_margin: 0.20,
            close_call_score: 0.70,
            close_call_boost: 1.2,
            settled_confidence: 0.92,
            quiet_settled_confidence: 0.80,
            severe_settled_confidence: 0.88,
            contested_margin: 0.15,
            residual_risk: 0.25,
            convincing_confidence: 0.80,
        }
    }
}

/// Which verification questions to ask, and when to stop.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
///
/// use riskchain::{FactStore, FactValue, QuestionPolicy};
///
/// let mut facts = FactStore::new();
/// facts.assert_or_merge("location_mismatch", FactValue::Bool(true), 0.7)?;
///
/// let policy = QuestionPolicy::fraud_default();
/// let asked = BTreeSet::new();
/// let questions = policy.relevant_questions(&facts.snapshot(), &[], &asked);
/// assert_eq!(questions[0].key, "user_confirmed_travel");
/// assert!(policy.should_continue(&facts.snapshot(), &[], &asked));
/// # Ok::<(), riskchain::EngineError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestionPolicy {
    /// Questions that may be asked, keyed by answer fact, with prompts.
    pub prompts: BTreeMap<String, String>,

    pub anomalies: Vec<Anomaly>,

    /// Indicator to follow-up questions, scored by indicator confidence.
    pub follow_ups: BTreeMap<String, Vec<String>>,

    /// Strong checks offered at high risk and on close calls.
    pub verification: Vec<String>,

    /// Numeric facts that escalate to verification above a threshold,
    /// whatever the risk level.
    pub escalate_above: BTreeMap<String, f64>,

    /// Decides which indicators are active and the overall risk level.
    pub risk: RiskProfile,

    pub thresholds: QuestionThresholds,

    /// The flow stops once this many questions have been asked.
    pub max_questions: usize,
}

impl Default for QuestionPolicy {
    fn default() -> Self {
        Self {
            prompts: BTreeMap::new(),
            anomalies: Vec::new(),
            follow_ups: BTreeMap::new(),
            verification: Vec::new(),
            escalate_above: BTreeMap::new(),
            risk: RiskProfile::default(),
            thresholds: QuestionThresholds::default(),
            max_questions: 5,
        }
    }
}

impl QuestionPolicy {
    /// Customer verification questions for e-commerce transaction screening.
    #[must_use]
    pub fn fraud_default() -> Self {
        let prompts = [
            ("user_confirmed_transaction", "Was this transaction made by you?"),
            ("otp_passed", "Did the OTP/3DS verification succeed?"),
            ("user_confirmed_travel", "Are you currently traveling?"),
            ("shipping_address_changed_recently", "Is this shipping address new for you?"),
            ("device_seen_before", "Have you used this device before?"),
        ]
        .into_iter()
        .map(|(k, p)| (k.to_string(), p.to_string()))
        .collect();

        Self {
            prompts,
            anomalies: vec![
                Anomaly {
                    indicator: "location_mismatch".to_string(),
                    question: "user_confirmed_travel".to_string(),
                    explained_by: Some("location_explained".to_string()),
                    score: 1.0,
                    reason: "Explain location anomaly".to_string(),
                },
                Anomaly {
                    indicator: "recent_address_change".to_string(),
                    question: "shipping_address_changed_recently".to_string(),
                    explained_by: None,
                    score: 0.9,
                    reason: "Confirm address change".to_string(),
                },
            ],
            follow_ups: BTreeMap::from([(
                "new_device".to_string(),
                vec![
                    "device_seen_before".to_string(),
                    "user_confirmed_transaction".to_string(),
                ],
            )]),
            verification: vec!["user_confirmed_transaction".to_string(), "otp_passed".to_string()],
            escalate_above: BTreeMap::from([("amount".to_string(), 1500.0)]),
            risk: RiskProfile::fraud_default(),
            ..Self::default()
        }
    }

    /// Checks every referenced question has a prompt and every score and
    /// threshold is usable.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` naming the offending entry.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.risk.validate()?;
        let referenced = self
            .anomalies
            .iter()
            .map(|a| &a.question)
            .chain(self.follow_ups.values().flatten())
            .chain(&self.verification);
        for question in referenced {
            if !self.prompts.contains_key(question) {
                return Err(ValidationError::InvalidConfig {
                    reason: format!("question '{question}' has no prompt"),
                });
            }
        }
        if let Some(anomaly) = self.anomalies.iter().find(|a| !(a.score >= 0.0 && a.score.is_finite())) {
            return Err(ValidationError::InvalidConfig {
                reason: format!("score {} for '{}' must be finite and non-negative", anomaly.score, anomaly.question),
            });
        }
        let t = &self.thresholds;
        if !(t.close_call_boost >= 1.0 && t.close_call_boost.is_finite()) {
            return Err(ValidationError::InvalidConfig {
                reason: format!("close_call_boost {} must be at least 1", t.close_call_boost),
            });
        }
        let unit = [
            ("quiet_risk", t.quiet_risk),
            ("escalation_risk", t.escalation_risk),
            ("follow_up_weight", t.follow_up_weight),
            ("verification_score", t.verification_score),
            ("close_call_margin", t.close_call_margin),
            ("close_call_score", t.close_call_score),
            ("settled_confidence", t.settled_confidence),
            ("quiet_settled_confidence", t.quiet_settled_confidence),
            ("severe_settled_confidence", t.severe_settled_confidence),
            ("contested_margin", t.contested_margin),
            ("residual_risk", t.residual_risk),
            ("convincing_confidence", t.convincing_confidence),
        ];
        if let Some((name, value)) = unit.iter().find(|(_, v)| !(0.0..=1.0).contains(v)) {
            return Err(ValidationError::InvalidConfig {
                reason: format!("{name} {value} must be in [0, 1]"),
            });
        }
        Ok(())
    }

    /// Anomalies raised by the facts that are neither explained nor asked
    /// about yet.
    #[must_use]
    pub fn unexplained_anomalies(&self, facts: &FactSnapshot, asked: &BTreeSet<String>) -> Vec<&Anomaly> {
        self.anomalies
            .iter()
            .filter(|a| {
                raised(facts, &a.indicator).is_some()
                    && !a.explained_by.as_deref().is_some_and(|k| facts.contains(k))
                    && !settled(facts, asked, &a.question)
            })
            .collect()
    }

    /// Returns true if some anomaly could still be explained by a question.
    #[must_use]
    pub fn has_explainable_anomalies(&self, facts: &FactSnapshot, asked: &BTreeSet<String>) -> bool {
        !self.unexplained_anomalies(facts, asked).is_empty()
    }

    /// Questions worth asking next, most useful first.
    ///
    /// Unsettled anomaly questions come from active indicators that are
    /// not yet explained. Unless risk is quiet and nothing is left to
    /// explain, follow-ups of active indicators are added, then
    /// verification questions when risk is high, an escalation fact is
    /// exceeded or the two strongest recommendations are a close call.
    /// Equal scores keep the order in which questions were first offered.
    #[must_use]
    pub fn relevant_questions(
        &self,
        facts: &FactSnapshot,
        recommendations: &[Recommendation],
        asked: &BTreeSet<String>,
    ) -> Vec<Question> {
        let t = &self.thresholds;
        let mut queue = Vec::new();

        for anomaly in &self.anomalies {
            let explained = anomaly
                .explained_by
                .as_deref()
                .is_some_and(|k| facts.contains(k));
            if self.active(facts, &anomaly.indicator).is_some() && !explained {
                self.offer(&mut queue, facts, asked, &anomaly.question, anomaly.score, &anomaly.reason);
            }
        }

        let risk_level = self.risk.risk_level(facts);
        if risk_level < t.quiet_risk && !self.has_explainable_anomalies(facts, asked) {
            return ranked(queue);
        }

        for (indicator, questions) in &self.follow_ups {
            let Some(confidence) = self.active(facts, indicator) else {
                continue;
            };
            let reason = format!("Address {indicator}");
            for question in questions {
                self.offer(&mut queue, facts, asked, question, confidence * t.follow_up_weight, &reason);
            }
        }

        if risk_level > t.escalation_risk || self.escalated(facts) {
            for question in &self.verification {
                self.offer(&mut queue, facts, asked, question, t.verification_score, "High-risk verification");
            }
        }

        let confidences = strongest_confidences(recommendations);
        if let [first, second, ..] = confidences.as_slice() {
            if (first - second).abs() < t.close_call_margin {
                for question in &self.verification {
                    match queue.iter().position(|q| &q.key == question) {
                        Some(i) => {
                            queue[i].score *= t.close_call_boost;
                            queue[i].reason.push_str(" + disambiguate");
                        }
                        None => {
                            self.offer(&mut queue, facts, asked, question, t.close_call_score, "Close decision");
                        }
                    }
                }
            }
        }

        ranked(queue)
    }

    /// Returns true while another question could still change the decision.
    ///
    /// The flow stops after `max_questions`. Before that it keeps asking
    /// while an anomaly is unexplained, and stops once the strongest
    /// recommendation is settled: at `settled_confidence`, at
    /// `quiet_settled_confidence` when risk is quiet, or at
    /// `severe_settled_confidence` for a decline or manual review. An
    /// unsettled decision keeps the flow asking when the two strongest
    /// recommendations are contested, or when risk is above
    /// `residual_risk` and the decision is unconvincing. With no
    /// recommendation at all only the residual risk counts.
    #[must_use]
    pub fn should_continue(
        &self,
        facts: &FactSnapshot,
        recommendations: &[Recommendation],
        asked: &BTreeSet<String>,
    ) -> bool {
        let t = &self.thresholds;
        if asked.len() >= self.max_questions {
            return false;
        }
        if self.has_explainable_anomalies(facts, asked) {
            return true;
        }

        let risk_level = self.risk.risk_level(facts);
        let Some(top) = strongest(recommendations) else {
            return risk_level > t.residual_risk;
        };
        if top.confidence >= t.settled_confidence {
            return false;
        }
        if risk_level < t.quiet_risk && top.confidence >= t.quiet_settled_confidence {
            return false;
        }
        let severe = top.action.severity() >= Action::ManualReview.severity();
        if severe && top.confidence >= t.severe_settled_confidence {
            return false;
        }
        if let [first, second, ..] = strongest_confidences(recommendations).as_slice() {
            if first - second < t.contested_margin {
                return true;
            }
        }
        risk_level > t.residual_risk && top.confidence < t.convincing_confidence
    }

    fn active(&self, facts: &FactSnapshot, indicator: &str) -> Option<f64> {
        raised(facts, indicator).filter(|c| *c > self.risk.activation_threshold)
    }

    fn escalated(&self, facts: &FactSnapshot) -> bool {
        self.escalate_above
            .iter()
            .any(|(key, limit)| facts.number(key).is_some_and(|v| v > *limit))
    }

    /// Queues a question unless it is unknown, settled or already queued.
    fn offer(
        &self,
        queue: &mut Vec<Question>,
        facts: &FactSnapshot,
        asked: &BTreeSet<String>,
        key: &str,
        score: f64,
        reason: &str,
    ) {
        let Some(prompt) = self.prompts.get(key) else {
            return;
        };
        if settled(facts, asked, key) || queue.iter().any(|q| q.key == key) {
            return;
        }
        queue.push(Question {
            key: key.to_string(),
            prompt: prompt.clone(),
            score,
            reason: reason.to_string(),
        });
    }
}

/// Confidence of an indicator fact that is present and not `false`.
fn raised(facts: &FactSnapshot, indicator: &str) -> Option<f64> {
    let (value, confidence) = facts.get(indicator)?;
    (value.as_bool() != Some(false)).then_some(confidence)
}

fn settled(facts: &FactSnapshot, asked: &BTreeSet<String>, question: &str) -> bool {
    asked.contains(question) || facts.contains(question)
}

/// The most confident recommendation; ties go to the more severe action.
fn strongest(recommendations: &[Recommendation]) -> Option<&Recommendation> {
    recommendations.iter().reduce(|best, r| {
        if r.confidence > best.confidence {
            r
        } else {
            best
        }
    })
}

fn strongest_confidences(recommendations: &[Recommendation]) -> Vec<f64> {
    let mut confidences: Vec<f64> = recommendations.iter().map(|r| r.confidence).collect();
    confidences.sort_by(|a, b| b.total_cmp(a));
    confidences
}

fn ranked(mut queue: Vec<Question>) -> Vec<Question> {
    queue.sort_by(|a, b| b.score.total_cmp(&a.score));
    queue
}
