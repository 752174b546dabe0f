//! Weighted risk scoring over derived indicator facts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::fact::FactSnapshot;

/// Severity weights for risk indicator facts.
///
/// An indicator is active when its fact is present, not `false`, and its
/// confidence exceeds `activation_threshold`. The risk level is the weighted
/// sum of active indicator confidences, capped at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskProfile {
    pub weights: BTreeMap<String, f64>,
    pub activation_threshold: f64,
}

impl Default for RiskProfile {
    fn default() -> Self {
        Self {
            weights: BTreeMap::new(),
            activation_threshold: 0.5,
        }
    }
}

/// Weight of high-severity indicators in [`RiskProfile::fraud_default`].
pub const HIGH_SEVERITY: f64 = 0.35;
/// Weight of medium-severity indicators in [`RiskProfile::fraud_default`].
pub const MEDIUM_SEVERITY: f64 = 0.20;
/// Weight of low-severity indicators in [`RiskProfile::fraud_default`].
pub const LOW_SEVERITY: f64 = 0.10;

impl RiskProfile {
    /// Indicator tiers for e-commerce transaction screening.
    #[must_use]
    pub fn fraud_default() -> Self {
        let tiers: [(&[&str], f64); 3] = [
            (
                &[
                    "high_ip_risk",
                    "many_failed_logins",
                    "very_high_velocity",
                    "very_high_amount",
                    "anonymous_connection",
                ],
                HIGH_SEVERITY,
            ),
            (
                &[
                    "location_mismatch",
                    "new_device",
                    "suspicious_login_activity",
                    "high_amount",
                    "billing_shipping_mismatch_flag",
                    "recent_address_change",
                    "high_velocity",
                ],
                MEDIUM_SEVERITY,
            ),
            (
                &[
                    "medium_ip_risk",
                    "new_account",
                    "young_account",
                    "unverified_phone",
                    "new_email",
                ],
                LOW_SEVERITY,
            ),
        ];

        let weights = tiers
            .iter()
            .flat_map(|(keys, w)| keys.iter().map(move |k| ((*k).to_string(), *w)))
            .collect();
        Self {
            weights,
            ..Self::default()
        }
    }

    /// Adds or replaces an indicator weight.
    #[must_use]
    pub fn with_weight(mut self, key: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(key.into(), weight);
        self
    }

    /// Checks weights and threshold are in [0, 1].
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` naming the offending entry.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(0.0..=1.0).contains(&self.activation_threshold) {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "activation_threshold {} must be in [0, 1]",
                    self.activation_threshold
                ),
            });
        }
        if let Some((key, w)) = self.weights.iter().find(|(_, w)| !(0.0..=1.0).contains(*w)) {
            return Err(ValidationError::InvalidConfig {
                reason: format!("weight {w} for '{key}' must be in [0, 1]"),
            });
        }
        Ok(())
    }

    /// Active indicators with their confidences, ordered by key.
    #[must_use]
    pub fn active_indicators(&self, facts: &FactSnapshot) -> Vec<(String, f64)> {
        self.weights
            .keys()
            .filter_map(|key| {
                let (value, confidence) = facts.get(key)?;
                let negated = value.as_bool() == Some(false);
                (!negated && confidence > self.activation_threshold)
                    .then(|| (key.clone(), confidence))
            })
            .collect()
    }

    /// Weighted risk level in [0, 1].
    #[must_use]
    pub fn risk_level(&self, facts: &FactSnapshot) -> f64 {
        let score: f64 = self
            .active_indicators(facts)
            .iter()
            .map(|(key, confidence)| confidence * self.weights.get(key).copied().unwrap_or(0.0))
            .sum();
        score.min(1.0)
    }
}
