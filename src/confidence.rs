//! Confidence values and the noisy-OR combiner.
//!
//! Confidence expresses certainty in a fact as a real number in [0, 1].
//! Independent rule firings supporting the same fact are combined with
//! noisy-OR: `combine(a, b) = 1 - (1 - a) * (1 - b)`, i.e. `a + b - a * b`.
//! The combiner is commutative, associative, monotonic, bounded and has 0 as
//! its identity, so the final confidence of a fact does not depend on the
//! order in which rules fired.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A validated confidence value in [0, 1].
///
/// # Examples
///
/// ```
/// use riskchain::Confidence;
///
/// let a = Confidence::new(0.7).unwrap();
/// let b = Confidence::new(0.5).unwrap();
/// assert!((a.combine(b).value() - 0.85).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
    /// Minimum valid confidence value.
    pub const MIN_VALUE: f64 = 0.0;

    /// Maximum valid confidence value.
    pub const MAX_VALUE: f64 = 1.0;

    /// No evidence.
    pub const ZERO: Self = Self(0.0);

    /// Certainty.
    pub const ONE: Self = Self(1.0);

    /// Creates a new confidence with validation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ConfidenceOutOfRange` if the value is NaN or
    /// not in [0.0, 1.0].
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        Self::for_key("", value)
    }

    /// Like [`Confidence::new`], naming the fact in the error.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ConfidenceOutOfRange` if the value is NaN or
    /// not in [0.0, 1.0].
    pub fn for_key(key: &str, value: f64) -> Result<Self, ValidationError> {
        if value.is_nan() || !(Self::MIN_VALUE..=Self::MAX_VALUE).contains(&value) {
            return Err(ValidationError::ConfidenceOutOfRange {
                key: key.to_string(),
                value,
            });
        }
        Ok(Self(value))
    }

    pub const fn value(self) -> f64 {
        self.0
    }

    /// Combines two independent confidences for the same fact (noisy-OR).
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        Self(combine(self.0, other.0))
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self::ZERO
    }
}

impl TryFrom<f64> for Confidence {
    type Error = ValidationError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Confidence> for f64 {
    fn from(c: Confidence) -> Self {
        c.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Noisy-OR combination of two confidences in [0, 1].
///
/// Computed on the complements so that certainty is absorbing:
/// `combine(1.0, x) == 1.0` exactly. Rounding in `1 - (1 - a)` can land one
/// ulp below `a`, so the result never drops below either input.
#[must_use]
pub fn combine(c1: f64, c2: f64) -> f64 {
    let doubt = (Confidence::MAX_VALUE - c1) * (Confidence::MAX_VALUE - c2);
    (Confidence::MAX_VALUE - doubt)
        .max(c1)
        .max(c2)
        .clamp(Confidence::MIN_VALUE, Confidence::MAX_VALUE)
}

/// Folds any number of independent contributions into one confidence.
///
/// An empty sequence yields 0 (the combiner's identity); a single
/// contribution is returned unchanged.
#[must_use]
pub fn fold<I>(contributions: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    contributions
        .into_iter()
        .reduce(combine)
        .unwrap_or(Confidence::MIN_VALUE)
}
