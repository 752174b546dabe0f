//! Value types that facts can hold.
//!
//! Fact values form a closed set (number, boolean, text). Conversion from
//! loosely typed input happens once, at the boundary, so conditions and
//! conclusions match exhaustively on `FactValue`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Possible values a fact can hold.
///
/// # Examples
///
/// ```
/// use riskchain::FactValue;
///
/// let amount = FactValue::from(2000);
/// let flagged = FactValue::from(true);
/// let country = FactValue::from("DE");
///
/// assert!(amount.is_number());
/// assert!(flagged.is_bool());
/// assert!(country.is_text());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FactValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl FactValue {
    pub const fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    pub const fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Bool(_) => "bool",
            Self::Text(_) => "text",
        }
    }

    /// Orders two values of the same variant.
    ///
    /// Values of different variants are incomparable and yield `None`.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.partial_cmp(b),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Checks the value is admissible as a fact value for `key`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::NonFiniteNumber` for NaN or infinite numbers.
    pub fn validate(&self, key: &str) -> Result<(), ValidationError> {
        match self {
            Self::Number(v) if !v.is_finite() => Err(ValidationError::NonFiniteNumber {
                key: key.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Converts a JSON scalar into a fact value.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnsupportedValue` for null, arrays and objects,
    /// and `ValidationError::NonFiniteNumber` for numbers without an `f64` form.
    pub fn from_json(key: &str, json: &serde_json::Value) -> Result<Self, ValidationError> {
        let unsupported = |type_name: &str| ValidationError::UnsupportedValue {
            key: key.to_string(),
            type_name: type_name.to_string(),
        };
        match json {
            serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
            serde_json::Value::Number(n) => {
                let v = n.as_f64().ok_or_else(|| ValidationError::NonFiniteNumber {
                    key: key.to_string(),
                })?;
                let value = Self::Number(v);
                value.validate(key)?;
                Ok(value)
            }
            serde_json::Value::String(s) => Ok(Self::Text(s.clone())),
            serde_json::Value::Null => Err(unsupported("null")),
            serde_json::Value::Array(_) => Err(unsupported("array")),
            serde_json::Value::Object(_) => Err(unsupported("object")),
        }
    }
}

impl std::fmt::Display for FactValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for FactValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for FactValue {
    fn from(v: i32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<u32> for FactValue {
    fn from(v: u32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<f64> for FactValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<String> for FactValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for FactValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}
