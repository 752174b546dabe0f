//! # riskchain - Explainable Forward-Chaining Risk Decisions
//!
//! riskchain evaluates a fixed rule base against a per-transaction fact base
//! and produces ranked, explainable decisions such as `DECLINE` or
//! `STEP_UP_VERIFY`. Every derived fact carries a confidence combined from
//! all rules that support it, and every derivation is traceable.
//!
//! ## Core Concepts
//!
//! - **Fact**: A keyed value (number, boolean, text) with a confidence in [0, 1]
//! - **Rule**: A condition over a fact snapshot and one concluded fact
//! - **Confidence**: Combined across independent rules with noisy-OR
//! - **Session**: One fact store and one append-only trace
//! - **Recommendation**: A ranked action derived from the final facts
//! - **Question**: A verification question whose answer is supplemented
//!   into the session before chaining again
//!
//! ## Usage
//!
//! ```rust
//! use riskchain::{
//!     Action, Condition, ConditionRule, EngineConfig, InferenceEngine, Operator,
//!     RecommendationPolicy, RuleCatalog,
//! };
//!
//! let catalog = RuleCatalog::builder()
//!     .rule(
//!         ConditionRule::builder("new_account_high_amount")
//!             .when(Condition::new("account_age_days", Operator::Lt, 7))
//!             .when(Condition::new("amount", Operator::Gt, 1500))
//!             .then("fraud_risk", true, 0.7)
//!             .build()?,
//!     )
//!     .rule(
//!         ConditionRule::builder("elevated_ip_risk")
//!             .when(Condition::new("ip_risk_score", Operator::Ge, 50))
//!             .then("fraud_risk", true, 0.5)
//!             .build()?,
//!     )
//!     .build()?;
//!
//! let config = EngineConfig {
//!     recommendation: RecommendationPolicy::default().bind("fraud_risk", Action::Decline),
//!     ..EngineConfig::default()
//! };
//! let engine = InferenceEngine::with_config(catalog, config)?;
//!
//! let mut session = engine.load_data([
//!     ("amount", 2000),
//!     ("ip_risk_score", 60),
//!     ("account_age_days", 2),
//! ])?;
//! engine.forward_chain(&mut session)?;
//!
//! let top = &engine.get_recommendations(&session)[0];
//! assert_eq!(top.action, Action::Decline);
//! assert!((top.confidence - 0.85).abs() < 1e-9);
//! # Ok::<(), riskchain::EngineError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod confidence;
pub mod config;
pub mod engine;
pub mod error;
pub mod fact;
pub mod question;
pub mod recommendation;
pub mod risk;
pub mod rule;
pub mod trace;
pub mod value;

// Re-export primary types at crate root for convenience
pub use catalog::{RuleCatalog, RuleCatalogBuilder};
pub use confidence::{combine, fold, Confidence};
pub use config::EngineConfig;
pub use engine::runtime::{EvaluationHandle, EvaluationRuntime, RuntimeConfig};
pub use engine::{
    ChainOutcome, ChainReport, Evaluation, InferenceEngine, InputFact, Session, SessionId,
    SessionState,
};
pub use error::{EngineError, EngineResult, ExecutionError, RuleError, ValidationError};
pub use fact::{Contribution, Contributor, Fact, FactSnapshot, FactStore, MergeOutcome};
pub use question::{Anomaly, Question, QuestionPolicy, QuestionThresholds};
pub use recommendation::{Action, Recommendation, RecommendationPolicy};
pub use risk::RiskProfile;
pub use rule::{
    Conclusion, Condition, ConditionRule, ConditionRuleBuilder, ConfidencePolicy, MatchedFact,
    Operator, Rule, ScalingFn,
};
pub use trace::{Trace, TraceEntry, TraceEvent};
pub use value::FactValue;
