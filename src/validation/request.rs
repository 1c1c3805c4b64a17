//! Generation request, callback and access control validation

use super::{codes, member_of, EnumRule, Mode, ValidationResult, Validator};
use crate::models::{
    AccessControl, CallbackAuthScheme, CallbackConfig, GenerationParameters, GenerationRequest,
    InvestmentStrategy, OutputFormat, Priority, RiskLevel, TargetAudience, TimeHorizon,
    Visibility,
};

const MAX_CALLBACK_RETRIES: u32 = 10;

static PARAMETER_RULES: &[EnumRule<GenerationParameters>] = &[
    EnumRule {
        field: "parameters.riskTolerance",
        required: Some(codes::RISK_TOLERANCE_REQUIRED),
        invalid: codes::INVALID_RISK_TOLERANCE,
        get: |p| p.risk_tolerance.as_deref(),
        check: member_of::<RiskLevel>,
    },
    EnumRule {
        field: "parameters.timeHorizon",
        required: Some(codes::TIME_HORIZON_REQUIRED),
        invalid: codes::INVALID_TIME_HORIZON,
        get: |p| p.time_horizon.as_deref(),
        check: member_of::<TimeHorizon>,
    },
    EnumRule {
        field: "parameters.strategy",
        required: None,
        invalid: codes::INVALID_STRATEGY,
        get: |p| p.strategy.as_deref(),
        check: member_of::<InvestmentStrategy>,
    },
    EnumRule {
        field: "parameters.targetAudience",
        required: None,
        invalid: codes::INVALID_TARGET_AUDIENCE,
        get: |p| p.target_audience.as_deref(),
        check: member_of::<TargetAudience>,
    },
    EnumRule {
        field: "parameters.outputFormat",
        required: None,
        invalid: codes::INVALID_OUTPUT_FORMAT,
        get: |p| p.output_format.as_deref(),
        check: member_of::<OutputFormat>,
    },
];

static REQUEST_RULES: &[EnumRule<GenerationRequest>] = &[EnumRule {
    field: "priority",
    required: None,
    invalid: codes::INVALID_PRIORITY,
    get: |r| r.priority.as_deref(),
    check: member_of::<Priority>,
}];

pub fn validate_generation_request(req: &GenerationRequest) -> ValidationResult {
    let mut v = Validator::new();

    v.required("userId", req.user_id.as_deref(), codes::USER_ID_REQUIRED);
    v.enum_rules(req, REQUEST_RULES, Mode::Full);
    check_parameters(&mut v, &req.parameters);

    if let Some(callback) = &req.callback {
        check_callback(&mut v, callback);
    }
    if let Some(access) = &req.access_control {
        check_access_control(&mut v, access);
    }

    v.finish()
}

fn check_parameters(v: &mut Validator, params: &GenerationParameters) {
    v.enum_rules(params, PARAMETER_RULES, Mode::Full);

    if let Some(count) = params.idea_count {
        if count == 0 || count > GenerationParameters::MAX_IDEA_COUNT {
            v.error(
                "parameters.ideaCount",
                format!(
                    "ideaCount must be between 1 and {}",
                    GenerationParameters::MAX_IDEA_COUNT
                ),
                codes::INVALID_IDEA_COUNT,
            );
        }
    }

    if let Some(amount) = params.investment_amount {
        if !(amount.is_finite() && amount > 0.0) {
            v.error(
                "parameters.investmentAmount",
                "investmentAmount must be a positive number",
                codes::INVALID_INVESTMENT_AMOUNT,
            );
        }
    }

    if let Some(prefs) = &params.model_preferences {
        if let Some(temperature) = prefs.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                v.error(
                    "parameters.modelPreferences.temperature",
                    "temperature must be between 0 and 2",
                    codes::INVALID_TEMPERATURE,
                );
            }
        }
        if prefs.max_tokens == Some(0) {
            v.error(
                "parameters.modelPreferences.maxTokens",
                "maxTokens must be positive",
                codes::INVALID_MAX_TOKENS,
            );
        }
    }

    if let (Some(strategy), Some(horizon)) = (params.preferred_strategy(), params.horizon()) {
        if super::strategy_horizon_mismatch(strategy, horizon) {
            v.warn(
                "parameters.timeHorizon",
                format!("Strategy '{}' is unusual for a '{}' horizon", strategy, horizon),
                codes::STRATEGY_HORIZON_MISMATCH,
                "Align the time horizon with the strategy",
            );
        }
    }

    if params.sectors.is_empty() {
        v.warn(
            "parameters.sectors",
            "No sectors specified",
            codes::BROAD_UNIVERSE,
            "Specify sectors to narrow the research universe",
        );
    }
}

fn check_callback(v: &mut Validator, callback: &CallbackConfig) {
    match url::Url::parse(callback.url.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => v.error(
            "callback.url",
            format!("Unsupported callback scheme '{}'", url.scheme()),
            codes::INVALID_CALLBACK_URL,
        ),
        Err(e) => v.error(
            "callback.url",
            format!("Invalid callback URL: {}", e),
            codes::INVALID_CALLBACK_URL,
        ),
    }

    let policy = &callback.retry_policy;
    if policy.max_retries > MAX_CALLBACK_RETRIES {
        v.error(
            "callback.retryPolicy.maxRetries",
            format!("maxRetries cannot exceed {}", MAX_CALLBACK_RETRIES),
            codes::INVALID_MAX_RETRIES,
        );
    }
    if !(policy.backoff_multiplier >= 1.0) {
        v.error(
            "callback.retryPolicy.backoffMultiplier",
            "backoffMultiplier must be at least 1",
            codes::INVALID_BACKOFF_MULTIPLIER,
        );
    }
    if policy.max_backoff_ms < policy.initial_backoff_ms {
        v.error(
            "callback.retryPolicy.maxBackoffMs",
            "maxBackoffMs must not be below initialBackoffMs",
            codes::INVALID_MAX_BACKOFF,
        );
    }

    if let Some(auth) = &callback.auth {
        if auth.credentials.trim().is_empty() {
            v.error(
                "callback.auth.credentials",
                "credentials are required",
                codes::CALLBACK_CREDENTIALS_REQUIRED,
            );
        } else if auth.scheme == CallbackAuthScheme::Basic && !auth.credentials.contains(':') {
            v.error(
                "callback.auth.credentials",
                "basic credentials must be in 'user:password' form",
                codes::INVALID_BASIC_CREDENTIALS,
            );
        }
    }
}

fn check_access_control(v: &mut Validator, access: &AccessControl) {
    let (list, field) = match access.visibility {
        Visibility::Public => return,
        Visibility::Organization => (&access.allowed_organizations, "accessControl.allowedOrganizations"),
        Visibility::Role => (&access.allowed_roles, "accessControl.allowedRoles"),
        Visibility::User => (&access.allowed_users, "accessControl.allowedUsers"),
    };

    if list.iter().all(|entry| entry.trim().is_empty()) {
        v.error(
            field,
            format!("'{}' visibility requires a non-empty {}", access.visibility, field),
            codes::ACCESS_LIST_REQUIRED,
        );
    }
}

pub fn validate_callback(callback: &CallbackConfig) -> ValidationResult {
    let mut v = Validator::new();
    check_callback(&mut v, callback);
    v.finish()
}

pub fn validate_access_control(access: &AccessControl) -> ValidationResult {
    let mut v = Validator::new();
    check_access_control(&mut v, access);
    v.finish()
}
