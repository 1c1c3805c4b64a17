//! Table-driven compliance rule sets

use super::ComplianceEvaluator;
use crate::models::{
    ComplianceIssue, ComplianceStatus, InvestmentIdea, InvestmentStrategy, IssueSeverity,
    RiskLevel, TargetAudience, TimeHorizon,
};
use chrono::Utc;

/// Largest single-position weight before a concentration issue is raised
const CONCENTRATION_LIMIT_PCT: f64 = 50.0;

const PROMISSORY_PHRASES: &[&str] = &[
    "guaranteed return",
    "guaranteed profit",
    "risk-free",
    "risk free",
    "cannot lose",
    "can't lose",
    "sure thing",
];

/// One compliance check: returns the issue message when the idea violates it
pub struct ComplianceRule {
    pub code: &'static str,
    pub severity: IssueSeverity,
    pub regulation: Option<&'static str>,
    pub check: fn(&InvestmentIdea) -> Option<String>,
}

/// Evaluator backed by an ordered list of rules
pub struct RuleSetEvaluator {
    jurisdiction: String,
    rules: Vec<ComplianceRule>,
}

impl RuleSetEvaluator {
    pub fn new(jurisdiction: &str, rules: Vec<ComplianceRule>) -> Self {
        Self {
            jurisdiction: jurisdiction.to_uppercase(),
            rules,
        }
    }

    pub fn us() -> Self {
        Self::new("US", common_rules(Some("FINRA 2210")))
    }

    pub fn eu() -> Self {
        let mut rules = common_rules(Some("MiFID II Art. 24"));
        rules.push(ComplianceRule {
            code: "TARGET_MARKET_UNDEFINED",
            severity: IssueSeverity::Warning,
            regulation: Some("MiFID II Art. 16(3)"),
            check: |idea| {
                idea.target_audience
                    .is_none()
                    .then(|| "Target market must be identified for product governance".to_string())
            },
        });
        Self::new("EU", rules)
    }
}

impl ComplianceEvaluator for RuleSetEvaluator {
    fn jurisdiction(&self) -> &str {
        &self.jurisdiction
    }

    fn evaluate(&self, idea: &InvestmentIdea) -> ComplianceStatus {
        let issues: Vec<ComplianceIssue> = self
            .rules
            .iter()
            .filter_map(|rule| {
                (rule.check)(idea).map(|message| ComplianceIssue {
                    code: rule.code.to_string(),
                    severity: rule.severity,
                    message,
                    regulation: rule.regulation.map(str::to_string),
                })
            })
            .collect();

        let compliant = !issues.iter().any(|i| i.severity == IssueSeverity::Critical);

        ComplianceStatus {
            compliant,
            issues,
            jurisdiction: Some(self.jurisdiction.clone()),
            reviewed_at: Some(Utc::now()),
        }
    }
}

fn common_rules(communications: Option<&'static str>) -> Vec<ComplianceRule> {
    vec![
        ComplianceRule {
            code: "GUARANTEED_RETURN",
            severity: IssueSeverity::Critical,
            regulation: communications,
            check: |idea| {
                let text = format!("{} {} {}", idea.title, idea.description, idea.rationale)
                    .to_lowercase();
                PROMISSORY_PHRASES
                    .iter()
                    .find(|phrase| text.contains(*phrase))
                    .map(|phrase| format!("Promissory language '{}' is not permitted", phrase))
            },
        },
        ComplianceRule {
            code: "UNSUITABLE_COMPLEX_PRODUCT",
            severity: IssueSeverity::Critical,
            regulation: None,
            check: |idea| {
                (idea.strategy == InvestmentStrategy::Complex
                    && idea.target_audience == Some(TargetAudience::Retail))
                    .then(|| "Complex strategies cannot be offered to retail investors".to_string())
            },
        },
        ComplianceRule {
            code: "MISSING_RISK_DISCLOSURE",
            severity: IssueSeverity::Warning,
            regulation: communications,
            check: |idea| {
                idea.counter_arguments
                    .is_empty()
                    .then(|| "No counter-arguments or risks are disclosed".to_string())
            },
        },
        ComplianceRule {
            code: "HIGH_RISK_RETAIL",
            severity: IssueSeverity::Warning,
            regulation: None,
            check: |idea| {
                (idea.risk_level == RiskLevel::VeryHigh
                    && idea.target_audience == Some(TargetAudience::Retail))
                    .then(|| "Very high risk idea targeted at retail investors".to_string())
            },
        },
        ComplianceRule {
            code: "CONCENTRATION_RISK",
            severity: IssueSeverity::Warning,
            regulation: None,
            check: |idea| {
                idea.investments
                    .iter()
                    .find(|i| i.allocation_percentage > CONCENTRATION_LIMIT_PCT)
                    .map(|i| {
                        format!(
                            "{} is {:.1}% of the idea, above the {}% concentration limit",
                            i.symbol, i.allocation_percentage, CONCENTRATION_LIMIT_PCT
                        )
                    })
            },
        },
        ComplianceRule {
            code: "SHORT_TERM_NO_EXPIRY",
            severity: IssueSeverity::Info,
            regulation: None,
            check: |idea| {
                (matches!(idea.time_horizon, TimeHorizon::Intraday | TimeHorizon::Short)
                    && idea.expires_at.is_none())
                .then(|| "Short-horizon idea has no expiry date".to_string())
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::idea::fixtures::idea;

    #[test]
    fn test_clean_idea_is_compliant() {
        let status = RuleSetEvaluator::us().evaluate(&idea());
        assert!(status.compliant, "{:?}", status.issues);
        assert!(status.issues.is_empty());
        assert_eq!(status.jurisdiction.as_deref(), Some("US"));
        assert!(status.reviewed_at.is_some());
    }

    #[test]
    fn test_critical_issue_is_never_compliant() {
        let mut idea = idea();
        idea.description = "A guaranteed return on dividend payers".to_string();
        let status = RuleSetEvaluator::us().evaluate(&idea);
        assert!(!status.compliant);
        assert!(status.has_critical());
        assert_eq!(status.issues[0].code, "GUARANTEED_RETURN");
    }

    #[test]
    fn test_warnings_keep_idea_compliant() {
        let mut idea = idea();
        idea.counter_arguments.clear();
        idea.investments[0].allocation_percentage = 80.0;
        let status = RuleSetEvaluator::us().evaluate(&idea);
        assert!(status.compliant);
        let codes: Vec<&str> = status.issues.iter().map(|i| i.code.as_str()).collect();
        assert_eq!(codes, vec!["MISSING_RISK_DISCLOSURE", "CONCENTRATION_RISK"]);
    }

    #[test]
    fn test_eu_requires_target_market() {
        let mut idea = idea();
        idea.target_audience = None;
        assert!(RuleSetEvaluator::us().evaluate(&idea).issues.is_empty());

        let status = RuleSetEvaluator::eu().evaluate(&idea);
        assert!(status.compliant);
        assert_eq!(status.issues[0].code, "TARGET_MARKET_UNDEFINED");
        assert_eq!(RuleSetEvaluator::eu().rules.len(), RuleSetEvaluator::us().rules.len() + 1);
    }
}
