//! Investment idea validation rules

use super::{codes, member_of, EnumRule, Mode, TextRule, ValidationResult, Validator};
use crate::models::{
    ComplianceStatus, CounterArgument, CreateInvestmentIdeaRequest, IdeaCategory, Investment,
    InvestmentIdea, InvestmentStrategy, OutcomeInput, RiskLevel, Scenario, TargetAudience,
    TimeHorizon, UpdateInvestmentIdeaRequest,
};
use chrono::Utc;

/// Confidence below this is flagged but still valid
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.3;

/// Largest accepted deviation of the outcome probability sum from 1.0.
/// Kept below a percent so that a sum of 1.003 is still reported.
pub const PROBABILITY_SUM_TOLERANCE: f64 = 0.001;

const ALLOCATION_SUM_TOLERANCE: f64 = 0.01;

static CREATE_TEXT_RULES: &[TextRule<CreateInvestmentIdeaRequest>] = &[
    TextRule { field: "title", code: codes::TITLE_REQUIRED, get: |r| r.title.as_deref() },
    TextRule { field: "description", code: codes::DESCRIPTION_REQUIRED, get: |r| r.description.as_deref() },
    TextRule { field: "rationale", code: codes::RATIONALE_REQUIRED, get: |r| r.rationale.as_deref() },
    TextRule { field: "createdBy", code: codes::CREATED_BY_REQUIRED, get: |r| r.created_by.as_deref() },
];

static CREATE_ENUM_RULES: &[EnumRule<CreateInvestmentIdeaRequest>] = &[
    EnumRule {
        field: "strategy",
        required: Some(codes::STRATEGY_REQUIRED),
        invalid: codes::INVALID_STRATEGY,
        get: |r| r.strategy.as_deref(),
        check: member_of::<InvestmentStrategy>,
    },
    EnumRule {
        field: "timeHorizon",
        required: Some(codes::TIME_HORIZON_REQUIRED),
        invalid: codes::INVALID_TIME_HORIZON,
        get: |r| r.time_horizon.as_deref(),
        check: member_of::<TimeHorizon>,
    },
    EnumRule {
        field: "category",
        required: None,
        invalid: codes::INVALID_CATEGORY,
        get: |r| r.category.as_deref(),
        check: member_of::<IdeaCategory>,
    },
    EnumRule {
        field: "riskLevel",
        required: Some(codes::RISK_LEVEL_REQUIRED),
        invalid: codes::INVALID_RISK_LEVEL,
        get: |r| r.risk_level.as_deref(),
        check: member_of::<RiskLevel>,
    },
    EnumRule {
        field: "targetAudience",
        required: None,
        invalid: codes::INVALID_TARGET_AUDIENCE,
        get: |r| r.target_audience.as_deref(),
        check: member_of::<TargetAudience>,
    },
];

static UPDATE_TEXT_RULES: &[TextRule<UpdateInvestmentIdeaRequest>] = &[
    TextRule { field: "title", code: codes::TITLE_REQUIRED, get: |r| r.title.as_deref() },
    TextRule { field: "description", code: codes::DESCRIPTION_REQUIRED, get: |r| r.description.as_deref() },
    TextRule { field: "rationale", code: codes::RATIONALE_REQUIRED, get: |r| r.rationale.as_deref() },
];

static UPDATE_ENUM_RULES: &[EnumRule<UpdateInvestmentIdeaRequest>] = &[
    EnumRule {
        field: "strategy",
        required: None,
        invalid: codes::INVALID_STRATEGY,
        get: |r| r.strategy.as_deref(),
        check: member_of::<InvestmentStrategy>,
    },
    EnumRule {
        field: "timeHorizon",
        required: None,
        invalid: codes::INVALID_TIME_HORIZON,
        get: |r| r.time_horizon.as_deref(),
        check: member_of::<TimeHorizon>,
    },
    EnumRule {
        field: "category",
        required: None,
        invalid: codes::INVALID_CATEGORY,
        get: |r| r.category.as_deref(),
        check: member_of::<IdeaCategory>,
    },
    EnumRule {
        field: "riskLevel",
        required: None,
        invalid: codes::INVALID_RISK_LEVEL,
        get: |r| r.risk_level.as_deref(),
        check: member_of::<RiskLevel>,
    },
    EnumRule {
        field: "targetAudience",
        required: None,
        invalid: codes::INVALID_TARGET_AUDIENCE,
        get: |r| r.target_audience.as_deref(),
        check: member_of::<TargetAudience>,
    },
];

/// Strategies that need a short holding period, or a long one, to make sense
pub fn strategy_horizon_mismatch(strategy: InvestmentStrategy, horizon: TimeHorizon) -> bool {
    use InvestmentStrategy::*;
    match strategy {
        Momentum | Arbitrage | PairsTrade => {
            matches!(horizon, TimeHorizon::Long | TimeHorizon::VeryLong)
        }
        Value | Growth | Income => matches!(horizon, TimeHorizon::Intraday | TimeHorizon::Short),
        _ => false,
    }
}

pub fn validate_create_request(req: &CreateInvestmentIdeaRequest) -> ValidationResult {
    let mut v = Validator::new();

    v.text_rules(req, CREATE_TEXT_RULES, Mode::Full);
    if req.investments.is_empty() {
        v.error("investments", "At least one investment is required", codes::INVESTMENTS_REQUIRED);
    } else {
        check_investments(&mut v, &req.investments);
    }
    v.enum_rules(req, CREATE_ENUM_RULES, Mode::Full);

    match req.confidence_score {
        Some(score) => check_confidence(&mut v, score),
        None => v.error(
            "confidenceScore",
            "confidenceScore is required",
            codes::CONFIDENCE_SCORE_REQUIRED,
        ),
    }

    check_outcome_inputs(&mut v, &req.potential_outcomes);
    check_counter_arguments(&mut v, &req.counter_arguments);
    check_alignment(&mut v, req.strategy.as_deref(), req.time_horizon.as_deref());

    if let Some(status) = &req.compliance_status {
        check_compliance(&mut v, status);
    }

    if let Some(expires_at) = req.expires_at {
        let generated_at = req.generated_at.unwrap_or_else(Utc::now);
        if expires_at <= generated_at {
            v.error(
                "expiresAt",
                "expiresAt must be after generatedAt",
                codes::INVALID_EXPIRATION,
            );
        }
    }

    v.finish()
}

/// Partial update: only supplied fields are checked, id and updatedBy always
pub fn validate_update_request(req: &UpdateInvestmentIdeaRequest) -> ValidationResult {
    let mut v = Validator::new();

    v.required("id", req.id.as_deref(), codes::ID_REQUIRED);
    v.required("updatedBy", req.updated_by.as_deref(), codes::UPDATED_BY_REQUIRED);
    v.text_rules(req, UPDATE_TEXT_RULES, Mode::Partial);

    if let Some(investments) = &req.investments {
        if investments.is_empty() {
            v.error("investments", "At least one investment is required", codes::INVESTMENTS_REQUIRED);
        } else {
            check_investments(&mut v, investments);
        }
    }
    v.enum_rules(req, UPDATE_ENUM_RULES, Mode::Partial);

    if let Some(score) = req.confidence_score {
        check_confidence(&mut v, score);
    }
    if let Some(outcomes) = &req.potential_outcomes {
        check_outcome_inputs(&mut v, outcomes);
    }
    if let Some(arguments) = &req.counter_arguments {
        check_counter_arguments(&mut v, arguments);
    }
    check_alignment(&mut v, req.strategy.as_deref(), req.time_horizon.as_deref());
    if let Some(status) = &req.compliance_status {
        check_compliance(&mut v, status);
    }

    v.finish()
}

/// Re-check a typed idea, e.g. after an update or before publishing results
pub fn validate_idea(idea: &InvestmentIdea) -> ValidationResult {
    let mut v = Validator::new();

    v.required("title", Some(idea.title.as_str()), codes::TITLE_REQUIRED);
    v.required("description", Some(idea.description.as_str()), codes::DESCRIPTION_REQUIRED);
    v.required("rationale", Some(idea.rationale.as_str()), codes::RATIONALE_REQUIRED);
    v.required("createdBy", Some(idea.created_by.as_str()), codes::CREATED_BY_REQUIRED);

    if idea.investments.is_empty() {
        v.error("investments", "At least one investment is required", codes::INVESTMENTS_REQUIRED);
    } else {
        check_investments(&mut v, &idea.investments);
    }

    check_confidence(&mut v, idea.confidence_score);

    for (i, outcome) in idea.potential_outcomes.iter().enumerate() {
        check_outcome_values(&mut v, i, outcome.probability, outcome.time_to_realization);
    }
    check_outcome_set(
        &mut v,
        idea.potential_outcomes.iter().map(|o| o.probability),
        idea.potential_outcomes.iter().any(|o| o.scenario == Scenario::Expected),
    );
    check_counter_arguments(&mut v, &idea.counter_arguments);

    if strategy_horizon_mismatch(idea.strategy, idea.time_horizon) {
        warn_mismatch(&mut v, idea.strategy, idea.time_horizon);
    }
    check_compliance(&mut v, &idea.compliance_status);

    if let Some(expires_at) = idea.expires_at {
        if expires_at <= idea.generated_at {
            v.error(
                "expiresAt",
                "expiresAt must be after generatedAt",
                codes::INVALID_EXPIRATION,
            );
        }
    }
    if idea.version < 1 {
        v.error("version", "version must be at least 1", codes::INVALID_VERSION);
    }

    v.finish()
}

fn check_investments(v: &mut Validator, investments: &[Investment]) {
    for (i, investment) in investments.iter().enumerate() {
        v.required(
            &format!("investments[{}].symbol", i),
            Some(investment.symbol.as_str()),
            codes::INVESTMENT_SYMBOL_REQUIRED,
        );

        if !(0.0..=100.0).contains(&investment.allocation_percentage) {
            v.error(
                &format!("investments[{}].allocationPercentage", i),
                format!(
                    "Allocation must be between 0 and 100, got {}",
                    investment.allocation_percentage
                ),
                codes::INVALID_ALLOCATION,
            );
        }

        let prices = [
            ("entryPrice", investment.entry_price),
            ("targetPrice", investment.target_price),
            ("stopLoss", investment.stop_loss),
        ];
        for (name, price) in prices {
            if let Some(price) = price {
                if !(price.is_finite() && price > 0.0) {
                    v.error(
                        &format!("investments[{}].{}", i, name),
                        format!("{} must be a positive number", name),
                        codes::INVALID_PRICE,
                    );
                }
            }
        }
    }

    let total: f64 = investments.iter().map(|i| i.allocation_percentage).sum();
    if total > 100.0 + ALLOCATION_SUM_TOLERANCE {
        v.warn(
            "investments",
            format!("Allocations sum to {:.2}%", total),
            codes::ALLOCATION_SUM_WARNING,
            "Scale allocations so they total at most 100%",
        );
    }
}

fn check_confidence(v: &mut Validator, score: f64) {
    if v.unit_interval("confidenceScore", score, codes::INVALID_CONFIDENCE_SCORE)
        && score < LOW_CONFIDENCE_THRESHOLD
    {
        v.warn(
            "confidenceScore",
            format!("Confidence score {} is low", score),
            codes::LOW_CONFIDENCE,
            "Gather more supporting evidence before acting on this idea",
        );
    }
}

fn check_outcome_inputs(v: &mut Validator, outcomes: &[OutcomeInput]) {
    let mut has_expected = false;
    for (i, outcome) in outcomes.iter().enumerate() {
        let field = format!("potentialOutcomes[{}].scenario", i);
        match outcome.scenario.as_deref() {
            None => v.error(&field, "scenario is required", codes::SCENARIO_REQUIRED),
            Some(raw) => match raw.parse::<Scenario>() {
                Ok(scenario) => has_expected |= scenario == Scenario::Expected,
                Err(reason) => {
                    v.error(&field, format!("Invalid scenario: {}", reason), codes::INVALID_SCENARIO)
                }
            },
        }
        check_outcome_values(v, i, outcome.probability, outcome.time_to_realization);
    }
    check_outcome_set(v, outcomes.iter().map(|o| o.probability), has_expected);
}

fn check_outcome_values(v: &mut Validator, index: usize, probability: f64, time_to_realization: f64) {
    v.unit_interval(
        &format!("potentialOutcomes[{}].probability", index),
        probability,
        codes::INVALID_PROBABILITY,
    );
    if !(time_to_realization >= 0.0) {
        v.error(
            &format!("potentialOutcomes[{}].timeToRealization", index),
            "timeToRealization must be zero or greater",
            codes::INVALID_TIME_TO_REALIZATION,
        );
    }
}

fn check_outcome_set(v: &mut Validator, probabilities: impl Iterator<Item = f64>, has_expected: bool) {
    if !has_expected {
        v.warn(
            "potentialOutcomes",
            "No outcome is tagged as the expected scenario",
            codes::NO_EXPECTED_SCENARIO,
            "Add an outcome with scenario 'expected'",
        );
    }

    let (count, sum) = probabilities.fold((0usize, 0.0), |(n, s), p| (n + 1, s + p));
    if count > 0 && (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
        v.warn(
            "potentialOutcomes",
            format!("Outcome probabilities sum to {:.3}", sum),
            codes::PROBABILITY_SUM_WARNING,
            "Adjust outcome probabilities so they sum to 1.0",
        );
    }
}

fn check_counter_arguments(v: &mut Validator, arguments: &[CounterArgument]) {
    if arguments.is_empty() {
        v.warn(
            "counterArguments",
            "No counter-arguments provided",
            codes::NO_COUNTER_ARGUMENTS,
            "Include counter-arguments for a balanced analysis",
        );
        return;
    }

    for (i, argument) in arguments.iter().enumerate() {
        v.required(
            &format!("counterArguments[{}].description", i),
            Some(argument.description.as_str()),
            codes::COUNTER_ARGUMENT_DESCRIPTION_REQUIRED,
        );
        v.unit_interval(
            &format!("counterArguments[{}].probability", i),
            argument.probability,
            codes::INVALID_COUNTER_ARGUMENT_PROBABILITY,
        );
    }
}

fn check_alignment(v: &mut Validator, strategy: Option<&str>, horizon: Option<&str>) {
    let strategy = strategy.and_then(|s| s.parse::<InvestmentStrategy>().ok());
    let horizon = horizon.and_then(|h| h.parse::<TimeHorizon>().ok());
    if let (Some(strategy), Some(horizon)) = (strategy, horizon) {
        if strategy_horizon_mismatch(strategy, horizon) {
            warn_mismatch(v, strategy, horizon);
        }
    }
}

fn warn_mismatch(v: &mut Validator, strategy: InvestmentStrategy, horizon: TimeHorizon) {
    v.warn(
        "timeHorizon",
        format!("Strategy '{}' is unusual for a '{}' horizon", strategy, horizon),
        codes::STRATEGY_HORIZON_MISMATCH,
        "Align the time horizon with the strategy",
    );
}

fn check_compliance(v: &mut Validator, status: &ComplianceStatus) {
    if status.compliant && status.has_critical() {
        v.error(
            "complianceStatus",
            "An idea with critical compliance issues cannot be marked compliant",
            codes::COMPLIANCE_CONTRADICTION,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::idea::fixtures::{create_request, idea};
    use crate::models::{ComplianceIssue, IssueSeverity};

    #[test]
    fn test_valid_request_passes() {
        let result = validate_create_request(&create_request());
        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_missing_required_text_fields() {
        let cases: [(fn(&mut CreateInvestmentIdeaRequest), &str); 4] = [
            (|r| r.title = None, codes::TITLE_REQUIRED),
            (|r| r.description = Some("  ".to_string()), codes::DESCRIPTION_REQUIRED),
            (|r| r.rationale = Some(String::new()), codes::RATIONALE_REQUIRED),
            (|r| r.created_by = None, codes::CREATED_BY_REQUIRED),
        ];

        for (mutate, code) in cases {
            let mut req = create_request();
            mutate(&mut req);
            let result = validate_create_request(&req);
            assert!(!result.is_valid);
            assert!(result.has_error(code), "missing {}", code);
        }
    }

    #[test]
    fn test_requires_an_investment() {
        let mut req = create_request();
        req.investments.clear();
        assert!(validate_create_request(&req).has_error(codes::INVESTMENTS_REQUIRED));
    }

    #[test]
    fn test_confidence_boundaries() {
        for score in [0.0, 1.0] {
            let mut req = create_request();
            req.confidence_score = Some(score);
            assert!(validate_create_request(&req).is_valid, "score {}", score);
        }
        for score in [-0.0001, 1.0001] {
            let mut req = create_request();
            req.confidence_score = Some(score);
            let result = validate_create_request(&req);
            assert!(result.has_error(codes::INVALID_CONFIDENCE_SCORE), "score {}", score);
        }
    }

    #[test]
    fn test_low_confidence_is_only_a_warning() {
        let mut req = create_request();
        req.confidence_score = Some(0.1);
        let result = validate_create_request(&req);
        assert!(result.is_valid);
        assert!(result.has_warning(codes::LOW_CONFIDENCE));
    }

    #[test]
    fn test_probability_sum_never_escalates() {
        for (expected, worst) in [(0.6, 0.403), (0.8, 0.4)] {
            let mut req = create_request();
            req.potential_outcomes[0].probability = expected;
            req.potential_outcomes[1].probability = worst;
            let result = validate_create_request(&req);
            assert!(result.is_valid);
            assert!(result.has_warning(codes::PROBABILITY_SUM_WARNING));
        }
    }

    #[test]
    fn test_unknown_enum_values_are_errors() {
        let mut req = create_request();
        req.strategy = Some("yolo".to_string());
        req.category = Some("crypto-art".to_string());
        req.target_audience = Some("everyone".to_string());
        let result = validate_create_request(&req);
        assert!(result.has_error(codes::INVALID_STRATEGY));
        assert!(result.has_error(codes::INVALID_CATEGORY));
        assert!(result.has_error(codes::INVALID_TARGET_AUDIENCE));
    }

    #[test]
    fn test_outcome_and_counter_argument_rules() {
        let mut req = create_request();
        req.potential_outcomes[0].scenario = Some("best-case".to_string());
        req.potential_outcomes[1].time_to_realization = -1.0;
        req.counter_arguments[0].description = " ".to_string();
        req.counter_arguments[0].probability = 1.5;

        let result = validate_create_request(&req);
        assert!(result.has_warning(codes::NO_EXPECTED_SCENARIO));
        assert!(result.has_error(codes::INVALID_TIME_TO_REALIZATION));
        assert!(result.has_error(codes::COUNTER_ARGUMENT_DESCRIPTION_REQUIRED));
        assert!(result.has_error(codes::INVALID_COUNTER_ARGUMENT_PROBABILITY));
    }

    #[test]
    fn test_missing_counter_arguments_is_a_warning() {
        let mut req = create_request();
        req.counter_arguments.clear();
        let result = validate_create_request(&req);
        assert!(result.is_valid);
        assert!(result.has_warning(codes::NO_COUNTER_ARGUMENTS));
    }

    #[test]
    fn test_strategy_horizon_mismatch_warns() {
        let mut req = create_request();
        req.strategy = Some("momentum".to_string());
        req.time_horizon = Some("very-long".to_string());
        let result = validate_create_request(&req);
        assert!(result.is_valid);
        assert!(result.has_warning(codes::STRATEGY_HORIZON_MISMATCH));

        assert!(strategy_horizon_mismatch(InvestmentStrategy::Income, TimeHorizon::Intraday));
        assert!(!strategy_horizon_mismatch(InvestmentStrategy::Hedge, TimeHorizon::Short));
    }

    #[test]
    fn test_compliance_contradiction_is_an_error() {
        let mut req = create_request();
        req.compliance_status = Some(ComplianceStatus {
            compliant: true,
            issues: vec![ComplianceIssue {
                code: "GUARANTEED_RETURN".to_string(),
                severity: IssueSeverity::Critical,
                message: "Promises a return".to_string(),
                regulation: None,
            }],
            jurisdiction: None,
            reviewed_at: None,
        });
        assert!(validate_create_request(&req).has_error(codes::COMPLIANCE_CONTRADICTION));
    }

    #[test]
    fn test_expiry_must_follow_generation() {
        let mut req = create_request();
        let now = Utc::now();
        req.generated_at = Some(now);
        req.expires_at = Some(now);
        assert!(validate_create_request(&req).has_error(codes::INVALID_EXPIRATION));
    }

    #[test]
    fn test_update_only_checks_supplied_fields() {
        let update = UpdateInvestmentIdeaRequest {
            id: Some("idea-1".to_string()),
            updated_by: Some("analyst".to_string()),
            ..Default::default()
        };
        assert!(validate_update_request(&update).is_valid);

        let result = validate_update_request(&UpdateInvestmentIdeaRequest {
            title: Some("".to_string()),
            risk_level: Some("extreme".to_string()),
            ..Default::default()
        });
        assert!(result.has_error(codes::ID_REQUIRED));
        assert!(result.has_error(codes::UPDATED_BY_REQUIRED));
        assert!(result.has_error(codes::TITLE_REQUIRED));
        assert!(result.has_error(codes::INVALID_RISK_LEVEL));
    }

    #[test]
    fn test_validate_idea_accepts_converted_fixture() {
        let result = validate_idea(&idea());
        assert!(result.is_valid, "{:?}", result.errors);
    }
}
