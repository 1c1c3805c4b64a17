//! Compliance evaluation
//!
//! Evaluators are jurisdiction-specific and pluggable. Whatever rules an
//! evaluator applies, the status it returns is never `compliant` while a
//! critical issue is present.

pub mod rules;

use crate::models::{ComplianceStatus, InvestmentIdea};
use std::collections::HashMap;
use std::sync::Arc;

pub use rules::{ComplianceRule, RuleSetEvaluator};

/// Jurisdiction used when a request does not name one
pub const DEFAULT_JURISDICTION: &str = "US";

/// Compliance evaluator trait that every jurisdiction rule set implements
pub trait ComplianceEvaluator: Send + Sync {
    /// Jurisdiction code (e.g., "US", "EU")
    fn jurisdiction(&self) -> &str;

    /// Review an idea and report its issues
    fn evaluate(&self, idea: &InvestmentIdea) -> ComplianceStatus;
}

/// Registry of evaluators keyed by upper-cased jurisdiction code
pub struct ComplianceRegistry {
    evaluators: HashMap<String, Arc<dyn ComplianceEvaluator>>,
    default_jurisdiction: String,
}

impl ComplianceRegistry {
    /// Create a registry with the built-in US and EU rule sets
    pub fn new() -> Self {
        Self::with_default(DEFAULT_JURISDICTION)
    }

    /// Built-in rule sets with a different fallback jurisdiction
    pub fn with_default(default_jurisdiction: &str) -> Self {
        let mut registry = Self::empty(default_jurisdiction);
        registry.register(Arc::new(RuleSetEvaluator::us()));
        registry.register(Arc::new(RuleSetEvaluator::eu()));
        registry
    }

    pub fn empty(default_jurisdiction: &str) -> Self {
        Self {
            evaluators: HashMap::new(),
            default_jurisdiction: default_jurisdiction.trim().to_uppercase(),
        }
    }

    /// Register or replace the evaluator for its jurisdiction
    pub fn register(&mut self, evaluator: Arc<dyn ComplianceEvaluator>) {
        self.evaluators
            .insert(evaluator.jurisdiction().to_uppercase(), evaluator);
    }

    /// Evaluator for `jurisdiction`, or the default one when `None`
    pub fn get(&self, jurisdiction: Option<&str>) -> Option<Arc<dyn ComplianceEvaluator>> {
        let key = jurisdiction
            .map(|j| j.trim().to_uppercase())
            .unwrap_or_else(|| self.default_jurisdiction.clone());
        self.evaluators.get(&key).cloned()
    }

    pub fn default_jurisdiction(&self) -> &str {
        &self.default_jurisdiction
    }

    pub fn supports(&self, jurisdiction: &str) -> bool {
        self.evaluators.contains_key(&jurisdiction.trim().to_uppercase())
    }

    /// List registered jurisdiction codes, sorted
    pub fn jurisdictions(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.evaluators.keys().cloned().collect();
        codes.sort();
        codes
    }
}

impl Default for ComplianceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_defaults_to_us() {
        let registry = ComplianceRegistry::new();
        assert_eq!(registry.get(None).unwrap().jurisdiction(), "US");
        assert_eq!(registry.get(Some(" eu ")).unwrap().jurisdiction(), "EU");
        assert!(registry.get(Some("APAC")).is_none());
        assert!(registry.supports("us"));
        assert_eq!(registry.jurisdictions(), vec!["EU".to_string(), "US".to_string()]);
    }

    #[test]
    fn test_configured_default() {
        let registry = ComplianceRegistry::with_default("eu");
        assert_eq!(registry.default_jurisdiction(), "EU");
        assert_eq!(registry.get(None).unwrap().jurisdiction(), "EU");
    }
}
