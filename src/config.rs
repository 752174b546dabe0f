//! Engine configuration.
//!
//! Configuration is plain data with sensible defaults. Loading it from files
//! or the environment is left to the hosting application; the types are
//! serde-deserializable for that purpose.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::recommendation::RecommendationPolicy;

/// Lower bound of the derived iteration cap.
pub const MIN_ITERATION_CAP: usize = 50;

/// Derived cap is this many iterations per rule.
pub const ITERATIONS_PER_RULE: usize = 3;

/// Forward-chaining and recommendation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Explicit iteration cap. When unset the cap is
    /// `max(MIN_ITERATION_CAP, ITERATIONS_PER_RULE * rule_count)`.
    pub max_iterations: Option<usize>,

    /// Confidence changes at or below this are treated as no change.
    pub epsilon: f64,

    /// When false, the first rule error aborts `forward_chain` instead of
    /// being isolated to the failing rule.
    pub isolate_rule_errors: bool,

    /// Maps final facts to recommendations.
    pub recommendation: RecommendationPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: None,
            epsilon: 1e-9,
            isolate_rule_errors: true,
            recommendation: RecommendationPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Checks the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for a zero iteration cap, an
    /// epsilon outside (0, 1) or an invalid recommendation policy.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_iterations == Some(0) {
            return Err(ValidationError::InvalidConfig {
                reason: "max_iterations must be at least 1".to_string(),
            });
        }
        if !(self.epsilon > 0.0 && self.epsilon < 1.0) {
            return Err(ValidationError::InvalidConfig {
                reason: format!("epsilon {} must be in (0, 1)", self.epsilon),
            });
        }
        self.recommendation.validate()
    }

    /// Iteration cap for a catalogue with `rule_count` rules.
    #[must_use]
    pub fn iteration_cap(&self, rule_count: usize) -> usize {
        self.max_iterations.unwrap_or_else(|| {
            MIN_ITERATION_CAP.max(rule_count.saturating_mul(ITERATIONS_PER_RULE))
        })
    }
}
