//! Forward-chaining inference engine.
//!
//! The engine owns an immutable rule catalogue and evaluates sessions to a
//! fixpoint. Each iteration evaluates every rule against a snapshot taken
//! at the start of the iteration and merges conclusions into the live fact
//! store, so facts derived in one iteration become visible to rules only in
//! the next. Because of that, and because confidence combination is
//! order-independent, the final fact state does not depend on rule order.
//!
//! Termination: facts are never retracted, a rule's contribution to a fact
//! only ever grows (`max(old, new)`), and noisy-OR is monotonic and bounded
//! by 1. Each contribution can therefore grow by more than `epsilon` only
//! finitely many times, so a pass with no change is always reached. The
//! iteration cap is a backstop against misbehaving custom rules.

mod session;

/// Bounded worker pool evaluating independent sessions concurrently.
pub mod runtime;

use serde::{Deserialize, Serialize};

use crate::catalog::RuleCatalog;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, ExecutionError, ValidationError};
use crate::fact::{Contributor, FactSnapshot};
use crate::recommendation::Recommendation;
use crate::rule::{Conclusion, Rule};
use crate::trace::{Trace, TraceEntry, TraceEvent};

pub use session::{InputFact, Session, SessionId, SessionState};

/// How a `forward_chain` run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainOutcome {
    /// A full pass changed nothing.
    Fixpoint,
    /// The iteration cap was hit first. Not an error, but worth reviewing.
    Exhausted {
        /// The cap that was reached.
        cap: usize,
    },
}

/// Result of one `forward_chain` run.
///
/// For a freshly loaded session `entries` is the session's full ordered
/// trace. After [`Session::supplement`] it holds only what the re-run
/// appended; the whole history stays on [`Session::trace`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainReport {
    pub outcome: ChainOutcome,

    /// Iterations run in this call, including the final no-change pass.
    pub iterations: usize,

    /// Rule conditions that evaluated true, including steady-state re-firings.
    pub firings: usize,

    /// Trace entries appended by this call, in firing order.
    pub entries: Vec<TraceEntry>,
}

impl ChainReport {
    /// Returns true if the run reached fixpoint.
    #[must_use]
    pub const fn reached_fixpoint(&self) -> bool {
        matches!(self.outcome, ChainOutcome::Fixpoint)
    }

    /// Trace entries appended by this call.
    #[must_use]
    pub fn trace(&self) -> &[TraceEntry] {
        &self.entries
    }
}

/// Result of loading, chaining and recommending in one call.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub session: Session,
    pub report: ChainReport,
    pub recommendations: Vec<Recommendation>,
}

/// Forward-chaining inference engine over a fixed rule catalogue.
///
/// An engine holds no per-session state and can be shared across threads;
/// every session owns its fact store and trace.
///
/// # Examples
///
/// ```
/// use riskchain::{Condition, ConditionRule, InferenceEngine, Operator, RuleCatalog};
///
/// let catalog = RuleCatalog::builder()
///     .rule(
///         ConditionRule::builder("O1")
///             .when(Condition::new("amount", Operator::Gt, 500))
///             .then("high_amount", true, 0.6)
///             .build()
///             .unwrap(),
///     )
///     .build()
///     .unwrap();
/// let engine = InferenceEngine::new(catalog);
///
/// let mut session = engine.load_data([("amount", 2000)]).unwrap();
/// let report = engine.forward_chain(&mut session).unwrap();
/// assert!(report.reached_fixpoint());
/// assert_eq!(engine.trace(&session).len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    catalog: RuleCatalog,
    config: EngineConfig,
}

impl InferenceEngine {
    /// Creates an engine with the default configuration.
    #[must_use]
    pub fn new(catalog: RuleCatalog) -> Self {
        Self {
            catalog,
            config: EngineConfig::default(),
        }
    }

    /// Creates an engine with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if the configuration is invalid.
    pub fn with_config(catalog: RuleCatalog, config: EngineConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self { catalog, config })
    }

    #[must_use]
    pub const fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts a fresh session from the caller's input facts.
    ///
    /// Values convert into [`InputFact`]; plain values carry confidence 1.0.
    ///
    /// # Errors
    ///
    /// Returns a validation error (the whole batch is rejected) for an empty
    /// key, a non-finite number or a confidence outside [0, 1], and
    /// `ExecutionError::ValueConflict` for one key given two values.
    pub fn load_data<I, K, V>(&self, facts: I) -> EngineResult<Session>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<InputFact>,
    {
        let mut session = Session::new();
        session.supplement(facts)?;
        tracing::debug!(session = %session.id(), facts = session.facts.len(), "session loaded");
        Ok(session)
    }

    /// Starts a fresh session from a JSON object of input facts.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnsupportedValue` if `json` is not an object
    /// or an entry has an unsupported type, plus everything `load_data` rejects.
    pub fn load_json(&self, json: &serde_json::Value) -> EngineResult<Session> {
        let serde_json::Value::Object(fields) = json else {
            return Err(ValidationError::UnsupportedValue {
                key: String::new(),
                type_name: "non-object input".to_string(),
            }
            .into());
        };
        let facts = fields
            .iter()
            .map(|(key, value)| Ok((key.clone(), InputFact::from_json(key, value)?)))
            .collect::<Result<Vec<_>, ValidationError>>()?;
        self.load_data(facts)
    }

    /// Runs forward chaining until fixpoint or the iteration cap and returns
    /// the ordered trace entries the run produced.
    ///
    /// Value conflicts and rule errors are recorded in the trace and do not
    /// stop the run. Reaching the cap is reported through
    /// [`ChainOutcome::Exhausted`] and a trace entry, not an error.
    ///
    /// # Errors
    ///
    /// Only when `isolate_rule_errors` is disabled: the first rule error is
    /// returned as `ExecutionError::RuleEvaluation` after being traced.
    pub fn forward_chain(&self, session: &mut Session) -> EngineResult<ChainReport> {
        let cap = self.config.iteration_cap(self.catalog.len());
        let trace_start = session.trace.len();
        session.state = SessionState::Iterating;
        tracing::info!(
            session = %session.id(),
            rules = self.catalog.len(),
            facts = session.facts.len(),
            cap,
            "forward chaining started"
        );

        let mut iterations = 0;
        let mut firings = 0;
        let outcome = loop {
            if iterations == cap {
                break ChainOutcome::Exhausted { cap };
            }
            iterations += 1;
            session.iterations += 1;

            let pass = self.run_pass(session)?;
            firings += pass.firings;
            if !pass.changed {
                break ChainOutcome::Fixpoint;
            }
        };

        match outcome {
            ChainOutcome::Fixpoint => {
                session.state = SessionState::Fixpoint;
                tracing::info!(
                    session = %session.id(),
                    iterations,
                    facts = session.facts.len(),
                    "fixpoint reached"
                );
            }
            ChainOutcome::Exhausted { cap } => {
                session.state = SessionState::Exhausted;
                let iteration = session.iterations;
                session
                    .trace
                    .record(iteration, None, Vec::new(), TraceEvent::IterationCapExceeded { cap });
                tracing::warn!(
                    session = %session.id(),
                    cap,
                    "iteration cap reached before fixpoint; rule base may be misbehaving"
                );
            }
        }

        let report = ChainReport {
            outcome,
            iterations,
            firings,
            entries: session.trace.entries()[trace_start..].to_vec(),
        };
        session.last_report = Some(report.clone());
        Ok(report)
    }

    /// Ranked recommendations from the session's current facts.
    ///
    /// Empty when no action-signalling fact exists.
    #[must_use]
    pub fn get_recommendations(&self, session: &Session) -> Vec<Recommendation> {
        self.config
            .recommendation
            .recommend(&session.facts, &session.trace)
    }

    /// The session's trace, as returned by `forward_chain`.
    #[must_use]
    pub fn trace<'s>(&self, session: &'s Session) -> &'s Trace {
        &session.trace
    }

    /// Loads, chains and recommends in one call.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`InferenceEngine::load_data`] and
    /// [`InferenceEngine::forward_chain`].
    pub fn evaluate<I, K, V>(&self, facts: I) -> EngineResult<Evaluation>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<InputFact>,
    {
        let mut session = self.load_data(facts)?;
        let report = self.forward_chain(&mut session)?;
        let recommendations = self.get_recommendations(&session);
        Ok(Evaluation {
            session,
            report,
            recommendations,
        })
    }

    fn run_pass(&self, session: &mut Session) -> EngineResult<PassResult> {
        let iteration = session.iterations;
        let snapshot = session.facts.snapshot();
        let mut result = PassResult::default();

        for rule in self.catalog.rules() {
            let rule = rule.as_ref();
            let conclusion = match Self::try_fire(rule, &snapshot) {
                Ok(None) => continue,
                Ok(Some(conclusion)) => conclusion,
                Err(reason) => {
                    self.record_rule_error(session, iteration, rule, &reason)?;
                    continue;
                }
            };
            result.firings += 1;
            if self.merge_conclusion(session, iteration, rule, &snapshot, conclusion) {
                result.changed = true;
            }
        }

        Ok(result)
    }

    fn try_fire(rule: &dyn Rule, snapshot: &FactSnapshot) -> Result<Option<Conclusion>, String> {
        if !rule.evaluate(snapshot).map_err(|e| e.to_string())? {
            return Ok(None);
        }
        let conclusion = rule.conclude(snapshot).map_err(|e| e.to_string())?;
        if conclusion.key.trim().is_empty() {
            return Err("concluded fact has an empty key".to_string());
        }
        conclusion
            .value
            .validate(&conclusion.key)
            .map_err(|e| e.to_string())?;
        if conclusion.confidence.is_nan() || !(0.0..=1.0).contains(&conclusion.confidence) {
            return Err(format!(
                "emitted confidence {} is outside [0, 1]",
                conclusion.confidence
            ));
        }
        Ok(Some(conclusion))
    }

    /// Merges a conclusion and traces it. Returns true if the fact changed.
    fn merge_conclusion(
        &self,
        session: &mut Session,
        iteration: usize,
        rule: &dyn Rule,
        snapshot: &FactSnapshot,
        conclusion: Conclusion,
    ) -> bool {
        let Conclusion {
            key,
            value,
            confidence,
        } = conclusion;
        let contributor = Contributor::Rule(rule.name().to_string());
        let first_contribution = session.facts.fact(&key).map_or(true, |f| {
            f.contributions.iter().all(|c| c.contributor != contributor)
        });

        match session
            .facts
            .merge_contribution(&key, value.clone(), contributor, confidence)
        {
            Ok(outcome) => {
                let changed = outcome.changed(self.config.epsilon);
                if !changed && !first_contribution {
                    return false;
                }
                let event = match outcome.before {
                    None => TraceEvent::Asserted {
                        key,
                        value,
                        confidence: outcome.after,
                    },
                    Some(before) => TraceEvent::Merged {
                        key,
                        value,
                        before,
                        after: outcome.after,
                    },
                };
                let entry = session.trace.record(
                    iteration,
                    Some((rule.name(), rule.priority())),
                    rule.matched_facts(snapshot),
                    event,
                );
                tracing::debug!(iteration, entry = %entry, "rule fired");
                changed
            }
            Err(EngineError::Execution(ExecutionError::ValueConflict { existing, .. })) => {
                if session
                    .seen_conflicts
                    .insert((rule.name().to_string(), key.clone()))
                {
                    tracing::warn!(
                        iteration,
                        rule = rule.name(),
                        key = %key,
                        existing = %existing,
                        incoming = %value,
                        "value conflict; keeping first-asserted value"
                    );
                    session.trace.record(
                        iteration,
                        Some((rule.name(), rule.priority())),
                        rule.matched_facts(snapshot),
                        TraceEvent::ValueConflict {
                            key,
                            existing,
                            incoming: value,
                            confidence,
                        },
                    );
                }
                false
            }
            Err(other) => {
                tracing::warn!(iteration, rule = rule.name(), error = %other, "merge failed");
                false
            }
        }
    }

    fn record_rule_error(
        &self,
        session: &mut Session,
        iteration: usize,
        rule: &dyn Rule,
        reason: &str,
    ) -> EngineResult<()> {
        if session
            .seen_errors
            .insert((rule.name().to_string(), reason.to_string()))
        {
            tracing::warn!(iteration, rule = rule.name(), reason, "rule evaluation failed");
            session.trace.record(
                iteration,
                Some((rule.name(), rule.priority())),
                Vec::new(),
                TraceEvent::RuleError {
                    reason: reason.to_string(),
                },
            );
        }
        if self.config.isolate_rule_errors {
            return Ok(());
        }
        session.state = SessionState::Failed;
        Err(ExecutionError::RuleEvaluation {
            rule: rule.name().to_string(),
            reason: reason.to_string(),
        }
        .into())
    }
}

#[derive(Debug, Default)]
struct PassResult {
    changed: bool,
    firings: usize,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::error::RuleError;
    use crate::rule::{Condition, ConditionRule, ConfidencePolicy, Operator};
    use crate::value::FactValue;

    fn rule(name: &str, when: &str, then: &str, strength: f64) -> ConditionRule {
        ConditionRule::builder(name)
            .when(Condition::is_true(when))
            .then(then, true, strength)
            .build()
            .unwrap()
    }

    fn engine(rules: Vec<ConditionRule>) -> InferenceEngine {
        InferenceEngine::new(RuleCatalog::builder().extend(rules).build().unwrap())
    }

    #[derive(Debug)]
    struct FailingRule;

    impl Rule for FailingRule {
        fn name(&self) -> &str {
            "broken"
        }

        fn evaluate(&self, _snapshot: &FactSnapshot) -> Result<bool, RuleError> {
            Err(RuleError::new("lookup table missing"))
        }

        fn conclude(&self, _snapshot: &FactSnapshot) -> Result<Conclusion, RuleError> {
            Err(RuleError::new("unreachable"))
        }
    }

    /// Emits a slightly larger confidence on every call, never settling.
    #[derive(Debug, Default)]
    struct CreepingRule {
        calls: AtomicUsize,
    }

    impl Rule for CreepingRule {
        fn name(&self) -> &str {
            "creeping"
        }

        fn evaluate(&self, _snapshot: &FactSnapshot) -> Result<bool, RuleError> {
            Ok(true)
        }

        fn conclude(&self, _snapshot: &FactSnapshot) -> Result<Conclusion, RuleError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            #[allow(clippy::cast_precision_loss)]
            let confidence = 1.0 - 1.0 / (n as f64 + 1.0);
            Ok(Conclusion {
                key: "creep".to_string(),
                value: FactValue::Bool(true),
                confidence,
            })
        }
    }

    #[test]
    fn single_rule_fires_once_and_reaches_fixpoint() {
        let engine = InferenceEngine::new(
            RuleCatalog::builder()
                .rule(
                    ConditionRule::builder("R1")
                        .when(Condition::new("amount", Operator::Gt, 10))
                        .then("high_amount", true, 0.6)
                        .build()
                        .unwrap(),
                )
                .build()
                .unwrap(),
        );
        let mut session = engine.load_data([("amount", 20)]).unwrap();
        let report = engine.forward_chain(&mut session).unwrap();

        assert!(report.reached_fixpoint());
        assert_eq!(report.iterations, 2);
        assert_eq!(report.firings, 2);
        assert_eq!(report.trace().len(), 1);
        assert_eq!(report.trace(), session.trace().entries());
        assert_eq!(session.state(), SessionState::Fixpoint);
        let (_, c) = session.facts().get("high_amount").unwrap();
        assert!((c - 0.6).abs() < 1e-12);
    }

    #[test]
    fn facts_become_visible_next_iteration() {
        let engine = engine(vec![rule("B", "x", "y", 0.5), rule("A", "start", "x", 0.8)]);
        let mut session = engine.load_data([("start", true)]).unwrap();
        engine.forward_chain(&mut session).unwrap();

        let iterations: Vec<(usize, &str)> = session
            .trace()
            .iter()
            .map(|e| (e.iteration, e.rule.as_deref().unwrap_or("")))
            .collect();
        assert_eq!(iterations, vec![(1, "A"), (2, "B")]);
        let (_, y) = session.facts().get("y").unwrap();
        assert!((y - 0.4).abs() < 1e-12);
    }

    #[test]
    fn rule_errors_are_isolated_and_traced_once() {
        let catalog = RuleCatalog::builder()
            .rule(FailingRule)
            .rule(rule("ok", "a", "b", 0.5))
            .build()
            .unwrap();
        let engine = InferenceEngine::new(catalog);
        let mut session = engine.load_data([("a", true)]).unwrap();
        let report = engine.forward_chain(&mut session).unwrap();

        assert!(report.reached_fixpoint());
        assert!(session.facts().get("b").is_some());
        let errors: Vec<_> = session
            .trace()
            .iter()
            .filter(|e| matches!(e.event, TraceEvent::RuleError { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].rule.as_deref(), Some("broken"));
    }

    #[test]
    fn strict_mode_returns_rule_error() {
        let catalog = RuleCatalog::builder().rule(FailingRule).build().unwrap();
        let config = EngineConfig {
            isolate_rule_errors: false,
            ..EngineConfig::default()
        };
        let engine = InferenceEngine::with_config(catalog, config).unwrap();
        let mut session = engine.load_data([("a", true)]).unwrap();

        let err = engine.forward_chain(&mut session).unwrap_err();
        assert!(err.is_execution());
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.trace().len(), 1);
    }

    #[test]
    fn iteration_cap_is_reported_not_raised() {
        let catalog = RuleCatalog::builder()
            .rule(CreepingRule::default())
            .build()
            .unwrap();
        let config = EngineConfig {
            max_iterations: Some(4),
            ..EngineConfig::default()
        };
        let engine = InferenceEngine::with_config(catalog, config).unwrap();
        let mut session = engine.load_data(Vec::<(String, InputFact)>::new()).unwrap();

        let report = engine.forward_chain(&mut session).unwrap();
        assert_eq!(report.outcome, ChainOutcome::Exhausted { cap: 4 });
        assert_eq!(report.iterations, 4);
        assert_eq!(session.state(), SessionState::Exhausted);
        let last = session.trace().entries().last().unwrap();
        assert_eq!(last.event, TraceEvent::IterationCapExceeded { cap: 4 });
    }

    #[test]
    fn custom_policy_emitting_nan_is_rule_error() {
        let bad = ConditionRule::builder("nan")
            .then("x", true, 0.5)
            .policy(ConfidencePolicy::Custom(Arc::new(|_: &[f64], _: f64| f64::NAN)))
            .build()
            .unwrap();
        let engine = engine(vec![bad]);
        let mut session = engine.load_data(Vec::<(String, InputFact)>::new()).unwrap();
        engine.forward_chain(&mut session).unwrap();
        assert!(session.facts().is_empty());
        assert_eq!(session.trace().anomalies().count(), 1);
    }

    #[test]
    fn supporting_an_input_fact_is_traced_without_change() {
        let engine = engine(vec![rule("echo", "flag", "flag", 0.4)]);
        let mut session = engine.load_data([("flag", true)]).unwrap();
        let report = engine.forward_chain(&mut session).unwrap();

        assert_eq!(report.iterations, 1);
        assert_eq!(session.trace().len(), 1);
        let entry = &session.trace().entries()[0];
        assert_eq!(entry.event.before(), Some(1.0));
        assert_eq!(entry.event.after(), Some(1.0));
    }

    #[test]
    fn rechaining_after_supplement_continues_iterations() {
        let engine = engine(vec![rule("C2", "otp_passed", "legitimate_user", 0.95)]);
        let mut session = engine.load_data([("amount", 10)]).unwrap();
        engine.forward_chain(&mut session).unwrap();
        assert!(session.trace().is_empty());
        assert_eq!(session.iterations(), 1);

        session.supplement([("otp_passed", true)]).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        let report = engine.forward_chain(&mut session).unwrap();
        assert_eq!(session.trace().entries()[0].iteration, 2);
        assert_eq!(report.trace(), session.trace().entries());
        assert!(session.facts().get("legitimate_user").is_some());
    }

    #[test]
    fn load_json_converts_at_the_boundary() {
        let engine = engine(vec![]);
        let session = engine
            .load_json(&serde_json::json!({
                "amount": 2000,
                "device_seen_before": false,
                "country": "DE",
                "ip_risk_score": {"value": 60, "confidence": 0.9}
            }))
            .unwrap();
        assert_eq!(session.facts().len(), 4);
        assert_eq!(
            session.facts().get("ip_risk_score"),
            Some((&FactValue::from(60), 0.9))
        );

        let err = engine
            .load_json(&serde_json::json!({"tags": ["a", "b"]}))
            .unwrap_err();
        assert!(err.is_validation());
        assert!(engine.load_json(&serde_json::json!([1, 2])).is_err());
    }
}
