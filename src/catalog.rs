//! Immutable rule catalogue.
//!
//! A catalogue is built once, validated (unique, non-empty names) and then
//! shared read-only by every session an engine evaluates.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::ValidationError;
use crate::rule::Rule;

/// Ordered, immutable set of rules.
///
/// Cloning is cheap; clones share the same rules.
#[derive(Debug, Clone)]
pub struct RuleCatalog {
    rules: Arc<[Arc<dyn Rule>]>,
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self {
            rules: Arc::from(Vec::new()),
        }
    }
}

impl RuleCatalog {
    /// Starts building a catalogue.
    #[must_use]
    pub fn builder() -> RuleCatalogBuilder {
        RuleCatalogBuilder::default()
    }

    /// Rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules
    }

    /// Looks a rule up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Rule>> {
        self.rules.iter().find(|r| r.name() == name)
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if the catalogue has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Builder for [`RuleCatalog`].
#[derive(Debug, Default)]
pub struct RuleCatalogBuilder {
    rules: Vec<Arc<dyn Rule>>,
}

impl RuleCatalogBuilder {
    /// Appends a rule. Declaration order is preserved among equal priorities.
    #[must_use]
    pub fn rule<R: Rule + 'static>(mut self, rule: R) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    /// Appends an already shared rule.
    #[must_use]
    pub fn shared(mut self, rule: Arc<dyn Rule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Appends several rules.
    #[must_use]
    pub fn extend<I, R>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Rule + 'static,
    {
        self.rules
            .extend(rules.into_iter().map(|r| Arc::new(r) as Arc<dyn Rule>));
        self
    }

    /// Validates names and fixes the evaluation order.
    ///
    /// Rules are ordered by priority (highest first); the sort is stable, so
    /// declaration order breaks ties.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyRuleName` or `ValidationError::DuplicateRule`.
    pub fn build(mut self) -> Result<RuleCatalog, ValidationError> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(self.rules.len());
        for rule in &self.rules {
            let name = rule.name();
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyRuleName);
            }
            if !seen.insert(name) {
                return Err(ValidationError::DuplicateRule {
                    name: name.to_string(),
                });
            }
        }
        drop(seen);

        self.rules.sort_by_key(|r| std::cmp::Reverse(r.priority()));
        Ok(RuleCatalog {
            rules: self.rules.into(),
        })
    }
}
