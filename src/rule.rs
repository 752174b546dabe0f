//! Rules: conditions over a fact snapshot paired with a single conclusion.
//!
//! A rule is anything implementing [`Rule`]. [`ConditionRule`] is the
//! data-driven implementation used by most catalogues: a conjunction of
//! comparisons over facts and one concluded fact with a strength.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RuleError, ValidationError};
use crate::fact::FactSnapshot;
use crate::value::FactValue;

/// A fact that satisfied part of a rule's condition, captured at match time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedFact {
    /// Fact key.
    pub key: String,
    /// Value seen in the snapshot.
    pub value: FactValue,
    /// Confidence seen in the snapshot.
    pub confidence: f64,
}

/// The single fact a rule asserts when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conclusion {
    /// Key of the asserted fact.
    pub key: String,
    /// Asserted value.
    pub value: FactValue,
    /// Confidence emitted by this firing.
    pub confidence: f64,
}

/// Contract every rule satisfies.
///
/// Implementations must be pure: `evaluate`, `matched_facts` and `conclude`
/// may not mutate shared state and must return the same result for the same
/// snapshot. A rule whose inputs are missing evaluates to `Ok(false)`.
pub trait Rule: Send + Sync + fmt::Debug {
    /// Unique name within a catalogue.
    fn name(&self) -> &str;

    /// Evaluation priority; higher runs first.
    ///
    /// Priority is the primary ordering key within an iteration, not a
    /// tie-break: a catalogue runs by priority, and declaration order only
    /// decides between equal priorities. Since every rule reads the same
    /// iteration snapshot, this reorders the trace, never the final facts.
    fn priority(&self) -> i32 {
        0
    }

    /// Returns true if the rule fires on this snapshot.
    ///
    /// # Errors
    ///
    /// Returns a `RuleError` if the rule's own logic fails.
    fn evaluate(&self, snapshot: &FactSnapshot) -> Result<bool, RuleError>;

    /// Facts that satisfied the condition, for the audit trace.
    fn matched_facts(&self, _snapshot: &FactSnapshot) -> Vec<MatchedFact> {
        Vec::new()
    }

    /// Computes the conclusion. Only called after `evaluate` returned true.
    ///
    /// # Errors
    ///
    /// Returns a `RuleError` if the rule's own logic fails.
    fn conclude(&self, snapshot: &FactSnapshot) -> Result<Conclusion, RuleError>;
}

/// Comparison applied by a [`Condition`].
#[derive(Debug, Clone)]
pub enum Operator {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    /// Text value matches the regular expression.
    Matches(Regex),
}

impl Operator {
    /// Parses a comparison symbol such as `">="`.
    #[must_use]
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            ">" => Some(Self::Gt),
            "<" => Some(Self::Lt),
            ">=" => Some(Self::Ge),
            "<=" => Some(Self::Le),
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            _ => None,
        }
    }

    fn symbol(&self) -> &str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Matches(_) => "=~",
        }
    }
}

/// A single comparison between a fact and an operand.
#[derive(Debug, Clone)]
pub struct Condition {
    key: String,
    op: Operator,
    operand: FactValue,
}

impl Condition {
    /// Creates a comparison condition.
    #[must_use]
    pub fn new(key: impl Into<String>, op: Operator, operand: impl Into<FactValue>) -> Self {
        Self {
            key: key.into(),
            op,
            operand: operand.into(),
        }
    }

    /// Shorthand for `key == true`.
    #[must_use]
    pub fn is_true(key: impl Into<String>) -> Self {
        Self::new(key, Operator::Eq, true)
    }

    /// Creates a regex condition over a text fact.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidCondition` if the pattern does not compile.
    pub fn matches(key: impl Into<String>, pattern: &str) -> Result<Self, ValidationError> {
        let key = key.into();
        let regex = Regex::new(pattern).map_err(|e| ValidationError::InvalidCondition {
            rule: String::new(),
            reason: format!("invalid regex '{pattern}' on '{key}': {e}"),
        })?;
        Ok(Self {
            key,
            op: Operator::Matches(regex),
            operand: FactValue::Text(pattern.to_string()),
        })
    }

    /// Fact key this condition reads.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the matching fact if the condition holds on the snapshot.
    ///
    /// Missing facts and type mismatches never hold.
    #[must_use]
    pub fn check(&self, snapshot: &FactSnapshot) -> Option<MatchedFact> {
        let (value, confidence) = snapshot.get(&self.key)?;
        let holds = match &self.op {
            Operator::Matches(re) => value.as_text().is_some_and(|t| re.is_match(t)),
            Operator::Eq => *value == self.operand,
            Operator::Ne => value.compare(&self.operand).is_some_and(|o| o.is_ne()),
            Operator::Gt => value.compare(&self.operand).is_some_and(|o| o.is_gt()),
            Operator::Lt => value.compare(&self.operand).is_some_and(|o| o.is_lt()),
            Operator::Ge => value.compare(&self.operand).is_some_and(|o| o.is_ge()),
            Operator::Le => value.compare(&self.operand).is_some_and(|o| o.is_le()),
        };
        holds.then(|| MatchedFact {
            key: self.key.clone(),
            value: value.clone(),
            confidence,
        })
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.key, self.op.symbol(), self.operand)
    }
}

/// Scaling function mapping premise confidences to an emitted confidence.
pub type ScalingFn = Arc<dyn Fn(&[f64], f64) -> f64 + Send + Sync>;

/// How a firing's confidence is derived from its premises.
#[derive(Clone, Default)]
pub enum ConfidencePolicy {
    /// Emit the rule's strength unchanged.
    Fixed,

    /// Emit `strength * min(premise confidences)`.
    #[default]
    ScaledByWeakestPremise,

    /// Emit `f(premise confidences, strength)`.
    Custom(ScalingFn),
}

impl fmt::Debug for ConfidencePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "Fixed"),
            Self::ScaledByWeakestPremise => write!(f, "ScaledByWeakestPremise"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl ConfidencePolicy {
    fn apply(&self, premises: &[f64], strength: f64) -> f64 {
        match self {
            Self::Fixed => strength,
            Self::ScaledByWeakestPremise => {
                strength * premises.iter().copied().fold(1.0, f64::min)
            }
            Self::Custom(f) => f(premises, strength),
        }
    }
}

/// Data-driven rule: all conditions must hold, then one fact is asserted.
///
/// # Examples
///
/// ```
/// use riskchain::{Condition, ConditionRule, Operator};
///
/// let rule = ConditionRule::builder("O1")
///     .when(Condition::new("amount", Operator::Gt, 500))
///     .then("high_amount", true, 0.6)
///     .build()
///     .unwrap();
/// assert_eq!(riskchain::Rule::name(&rule), "O1");
/// ```
#[derive(Debug, Clone)]
pub struct ConditionRule {
    name: String,
    priority: i32,
    description: Option<String>,
    conditions: Vec<Condition>,
    conclusion_key: String,
    conclusion_value: FactValue,
    strength: f64,
    policy: ConfidencePolicy,
}

impl ConditionRule {
    /// Starts building a rule.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ConditionRuleBuilder {
        ConditionRuleBuilder::new(name)
    }

    /// Optional human-readable description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The rule's conditions.
    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Base strength of the conclusion.
    #[must_use]
    pub const fn strength(&self) -> f64 {
        self.strength
    }
}

impl Rule for ConditionRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn evaluate(&self, snapshot: &FactSnapshot) -> Result<bool, RuleError> {
        Ok(self.conditions.iter().all(|c| c.check(snapshot).is_some()))
    }

    fn matched_facts(&self, snapshot: &FactSnapshot) -> Vec<MatchedFact> {
        self.conditions
            .iter()
            .filter_map(|c| c.check(snapshot))
            .collect()
    }

    fn conclude(&self, snapshot: &FactSnapshot) -> Result<Conclusion, RuleError> {
        let premises: Vec<f64> = self
            .matched_facts(snapshot)
            .iter()
            .map(|m| m.confidence)
            .collect();
        let confidence = self.policy.apply(&premises, self.strength);
        if confidence.is_nan() || !(0.0..=1.0).contains(&confidence) {
            return Err(RuleError::new(format!(
                "emitted confidence {confidence} is outside [0, 1]"
            )));
        }
        Ok(Conclusion {
            key: self.conclusion_key.clone(),
            value: self.conclusion_value.clone(),
            confidence,
        })
    }
}

/// Builder for [`ConditionRule`].
#[derive(Debug)]
pub struct ConditionRuleBuilder {
    name: String,
    priority: i32,
    description: Option<String>,
    conditions: Vec<Condition>,
    conclusion: Option<(String, FactValue, f64)>,
    policy: ConfidencePolicy,
}

impl ConditionRuleBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            description: None,
            conditions: Vec::new(),
            conclusion: None,
            policy: ConfidencePolicy::default(),
        }
    }

    /// Sets [`Rule::priority`]; rules with a higher priority run earlier in
    /// every iteration regardless of where they were declared.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a condition; all conditions must hold for the rule to fire.
    #[must_use]
    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Sets the concluded fact and the rule's base strength.
    #[must_use]
    pub fn then(mut self, key: impl Into<String>, value: impl Into<FactValue>, strength: f64) -> Self {
        self.conclusion = Some((key.into(), value.into(), strength));
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: ConfidencePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Validates and builds the rule.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for an empty name, a missing or empty
    /// conclusion key, a non-finite conclusion value, or a strength outside [0, 1].
    pub fn build(self) -> Result<ConditionRule, ValidationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::EmptyRuleName);
        }
        let Some((key, value, strength)) = self.conclusion else {
            return Err(ValidationError::InvalidCondition {
                rule: name,
                reason: "rule has no conclusion".to_string(),
            });
        };
        if key.trim().is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        value.validate(&key)?;
        if strength.is_nan() || !(0.0..=1.0).contains(&strength) {
            return Err(ValidationError::ConfidenceOutOfRange {
                key,
                value: strength,
            });
        }
        if let Some(c) = self.conditions.iter().find(|c| c.key.trim().is_empty()) {
            return Err(ValidationError::InvalidCondition {
                rule: name,
                reason: format!("condition '{c}' has an empty key"),
            });
        }

        Ok(ConditionRule {
            name,
            priority: self.priority,
            description: self.description,
            conditions: self.conditions,
            conclusion_key: key,
            conclusion_value: value,
            strength,
            policy: self.policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::{Contributor, FactStore};

    fn snapshot(facts: &[(&str, FactValue, f64)]) -> FactSnapshot {
        let mut store = FactStore::new();
        for (k, v, c) in facts {
            store
                .merge_contribution(k, v.clone(), Contributor::Input, *c)
                .unwrap();
        }
        store.snapshot()
    }

    #[test]
    fn numeric_comparisons() {
        let snap = snapshot(&[("amount", FactValue::from(2000), 1.0)]);
        assert!(Condition::new("amount", Operator::Gt, 1500).check(&snap).is_some());
        assert!(Condition::new("amount", Operator::Ge, 2000).check(&snap).is_some());
        assert!(Condition::new("amount", Operator::Lt, 2000).check(&snap).is_none());
        assert!(Condition::new("amount", Operator::Le, 2000).check(&snap).is_some());
        assert!(Condition::new("amount", Operator::Ne, 1).check(&snap).is_some());
    }

    #[test]
    fn missing_fact_never_holds() {
        let snap = snapshot(&[]);
        assert!(Condition::new("amount", Operator::Gt, 0).check(&snap).is_none());
        assert!(Condition::new("amount", Operator::Ne, 0).check(&snap).is_none());
    }

    #[test]
    fn type_mismatch_never_holds() {
        let snap = snapshot(&[("amount", FactValue::from("lots"), 1.0)]);
        assert!(Condition::new("amount", Operator::Gt, 10).check(&snap).is_none());
        assert!(Condition::new("amount", Operator::Ne, 10).check(&snap).is_none());
    }

    #[test]
    fn regex_condition() {
        let snap = snapshot(&[("email", FactValue::from("bot123@mailinator.com"), 1.0)]);
        let cond = Condition::matches("email", r"@mailinator\.com$").unwrap();
        assert!(cond.check(&snap).is_some());
        assert!(Condition::matches("email", "(").is_err());
    }

    #[test]
    fn conclude_scales_by_weakest_premise() {
        let rule = ConditionRule::builder("T1")
            .when(Condition::is_true("location_mismatch"))
            .when(Condition::is_true("new_device"))
            .then("account_takeover_risk", true, 0.75)
            .build()
            .unwrap();
        let snap = snapshot(&[
            ("location_mismatch", FactValue::Bool(true), 0.7),
            ("new_device", FactValue::Bool(true), 0.5),
        ]);
        assert!(rule.evaluate(&snap).unwrap());
        let conclusion = rule.conclude(&snap).unwrap();
        assert_eq!(conclusion.key, "account_takeover_risk");
        assert!((conclusion.confidence - 0.375).abs() < 1e-12);
        assert_eq!(rule.matched_facts(&snap).len(), 2);
    }

    #[test]
    fn fixed_policy_ignores_premises() {
        let rule = ConditionRule::builder("R")
            .when(Condition::is_true("a"))
            .then("b", true, 0.7)
            .policy(ConfidencePolicy::Fixed)
            .build()
            .unwrap();
        let snap = snapshot(&[("a", FactValue::Bool(true), 0.2)]);
        assert!((rule.conclude(&snap).unwrap().confidence - 0.7).abs() < 1e-12);
    }

    #[test]
    fn custom_policy_out_of_range_is_rule_error() {
        let rule = ConditionRule::builder("R")
            .then("b", true, 0.7)
            .policy(ConfidencePolicy::Custom(Arc::new(|_: &[f64], s: f64| s * 2.0)))
            .build()
            .unwrap();
        let snap = snapshot(&[]);
        assert!(rule.evaluate(&snap).unwrap());
        assert!(rule.conclude(&snap).is_err());
    }

    #[test]
    fn builder_validation() {
        assert_eq!(
            ConditionRule::builder("  ").then("x", true, 0.5).build().unwrap_err(),
            ValidationError::EmptyRuleName
        );
        assert!(ConditionRule::builder("R").build().is_err());
        assert!(ConditionRule::builder("R").then("x", true, 1.5).build().is_err());
        assert!(ConditionRule::builder("R")
            .then("x", f64::NAN, 0.5)
            .build()
            .is_err());
    }

    #[test]
    fn condition_display() {
        let cond = Condition::new("failed_logins_24h", Operator::Ge, 3);
        assert_eq!(cond.to_string(), "failed_logins_24h >= 3");
        assert_eq!(Operator::from_symbol(">=").map(|o| o.symbol().to_string()), Some(">=".into()));
    }
}
