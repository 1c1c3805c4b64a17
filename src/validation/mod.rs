//! Validation engine
//!
//! Pure functions that check loosely typed payloads against field, enum,
//! range and cross-field business rules. Errors are authoritative and fail
//! the operation; warnings never block and always carry a recommendation.
//!
//! Rules are expressed as small tables (`TextRule`, `EnumRule`) applied
//! through a single [`Validator`], so required-field and enumeration checks
//! behave the same for every payload.

mod alert;
mod idea;
mod request;

pub use alert::{validate_alert_config, validate_market_data_point};
pub use idea::{
    strategy_horizon_mismatch, validate_create_request, validate_idea, validate_update_request,
    LOW_CONFIDENCE_THRESHOLD, PROBABILITY_SUM_TOLERANCE,
};
pub use request::{validate_access_control, validate_callback, validate_generation_request};

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Error and warning codes
pub mod codes {
    pub const TITLE_REQUIRED: &str = "TITLE_REQUIRED";
    pub const DESCRIPTION_REQUIRED: &str = "DESCRIPTION_REQUIRED";
    pub const RATIONALE_REQUIRED: &str = "RATIONALE_REQUIRED";
    pub const CREATED_BY_REQUIRED: &str = "CREATED_BY_REQUIRED";
    pub const UPDATED_BY_REQUIRED: &str = "UPDATED_BY_REQUIRED";
    pub const ID_REQUIRED: &str = "ID_REQUIRED";
    pub const INVESTMENTS_REQUIRED: &str = "INVESTMENTS_REQUIRED";
    pub const INVESTMENT_SYMBOL_REQUIRED: &str = "INVESTMENT_SYMBOL_REQUIRED";
    pub const INVALID_ALLOCATION: &str = "INVALID_ALLOCATION";
    pub const INVALID_PRICE: &str = "INVALID_PRICE";
    pub const STRATEGY_REQUIRED: &str = "STRATEGY_REQUIRED";
    pub const INVALID_STRATEGY: &str = "INVALID_STRATEGY";
    pub const TIME_HORIZON_REQUIRED: &str = "TIME_HORIZON_REQUIRED";
    pub const INVALID_TIME_HORIZON: &str = "INVALID_TIME_HORIZON";
    pub const INVALID_CATEGORY: &str = "INVALID_CATEGORY";
    pub const RISK_LEVEL_REQUIRED: &str = "RISK_LEVEL_REQUIRED";
    pub const INVALID_RISK_LEVEL: &str = "INVALID_RISK_LEVEL";
    pub const INVALID_TARGET_AUDIENCE: &str = "INVALID_TARGET_AUDIENCE";
    pub const CONFIDENCE_SCORE_REQUIRED: &str = "CONFIDENCE_SCORE_REQUIRED";
    pub const INVALID_CONFIDENCE_SCORE: &str = "INVALID_CONFIDENCE_SCORE";
    pub const SCENARIO_REQUIRED: &str = "SCENARIO_REQUIRED";
    pub const INVALID_SCENARIO: &str = "INVALID_SCENARIO";
    pub const INVALID_PROBABILITY: &str = "INVALID_PROBABILITY";
    pub const INVALID_TIME_TO_REALIZATION: &str = "INVALID_TIME_TO_REALIZATION";
    pub const COUNTER_ARGUMENT_DESCRIPTION_REQUIRED: &str =
        "COUNTER_ARGUMENT_DESCRIPTION_REQUIRED";
    pub const INVALID_COUNTER_ARGUMENT_PROBABILITY: &str = "INVALID_COUNTER_ARGUMENT_PROBABILITY";
    pub const COMPLIANCE_CONTRADICTION: &str = "COMPLIANCE_CONTRADICTION";
    pub const INVALID_EXPIRATION: &str = "INVALID_EXPIRATION";
    pub const INVALID_VERSION: &str = "INVALID_VERSION";

    pub const USER_ID_REQUIRED: &str = "USER_ID_REQUIRED";
    pub const RISK_TOLERANCE_REQUIRED: &str = "RISK_TOLERANCE_REQUIRED";
    pub const INVALID_RISK_TOLERANCE: &str = "INVALID_RISK_TOLERANCE";
    pub const INVALID_OUTPUT_FORMAT: &str = "INVALID_OUTPUT_FORMAT";
    pub const INVALID_PRIORITY: &str = "INVALID_PRIORITY";
    pub const INVALID_IDEA_COUNT: &str = "INVALID_IDEA_COUNT";
    pub const INVALID_INVESTMENT_AMOUNT: &str = "INVALID_INVESTMENT_AMOUNT";
    pub const INVALID_TEMPERATURE: &str = "INVALID_TEMPERATURE";
    pub const INVALID_MAX_TOKENS: &str = "INVALID_MAX_TOKENS";
    pub const UNSUPPORTED_JURISDICTION: &str = "UNSUPPORTED_JURISDICTION";
    pub const INVALID_CALLBACK_URL: &str = "INVALID_CALLBACK_URL";
    pub const INVALID_MAX_RETRIES: &str = "INVALID_MAX_RETRIES";
    pub const INVALID_BACKOFF_MULTIPLIER: &str = "INVALID_BACKOFF_MULTIPLIER";
    pub const INVALID_MAX_BACKOFF: &str = "INVALID_MAX_BACKOFF";
    pub const CALLBACK_CREDENTIALS_REQUIRED: &str = "CALLBACK_CREDENTIALS_REQUIRED";
    pub const INVALID_BASIC_CREDENTIALS: &str = "INVALID_BASIC_CREDENTIALS";
    pub const ACCESS_LIST_REQUIRED: &str = "ACCESS_LIST_REQUIRED";

    pub const NAME_REQUIRED: &str = "NAME_REQUIRED";
    pub const SYMBOL_REQUIRED: &str = "SYMBOL_REQUIRED";
    pub const DATA_TYPE_REQUIRED: &str = "DATA_TYPE_REQUIRED";
    pub const INVALID_DATA_TYPE: &str = "INVALID_DATA_TYPE";
    pub const CONDITION_REQUIRED: &str = "CONDITION_REQUIRED";
    pub const INVALID_CONDITION: &str = "INVALID_CONDITION";
    pub const THRESHOLD_REQUIRED: &str = "THRESHOLD_REQUIRED";
    pub const INVALID_THRESHOLD: &str = "INVALID_THRESHOLD";
    pub const INVALID_COMPARISON_VALUE: &str = "INVALID_COMPARISON_VALUE";
    pub const INVALID_MOVING_AVERAGE_PERIOD: &str = "INVALID_MOVING_AVERAGE_PERIOD";
    pub const REFERENCE_VALUE_REQUIRED: &str = "REFERENCE_VALUE_REQUIRED";
    pub const INVALID_COOLDOWN_PERIOD: &str = "INVALID_COOLDOWN_PERIOD";
    pub const NOTIFICATION_CHANNEL_REQUIRED: &str = "NOTIFICATION_CHANNEL_REQUIRED";
    pub const CHANNEL_TYPE_REQUIRED: &str = "CHANNEL_TYPE_REQUIRED";
    pub const INVALID_CHANNEL_TYPE: &str = "INVALID_CHANNEL_TYPE";
    pub const CHANNEL_DESTINATION_REQUIRED: &str = "CHANNEL_DESTINATION_REQUIRED";
    pub const CHANNEL_ENABLED_REQUIRED: &str = "CHANNEL_ENABLED_REQUIRED";
    pub const DATA_POINT_ID_REQUIRED: &str = "DATA_POINT_ID_REQUIRED";
    pub const SOURCE_REQUIRED: &str = "SOURCE_REQUIRED";
    pub const TIMESTAMP_REQUIRED: &str = "TIMESTAMP_REQUIRED";
    pub const VALUE_REQUIRED: &str = "VALUE_REQUIRED";
    pub const INVALID_VALUE: &str = "INVALID_VALUE";
    pub const INTERVAL_REQUIRED: &str = "INTERVAL_REQUIRED";
    pub const INVALID_INTERVAL: &str = "INVALID_INTERVAL";

    // Warnings
    pub const LOW_CONFIDENCE: &str = "LOW_CONFIDENCE";
    pub const NO_EXPECTED_SCENARIO: &str = "NO_EXPECTED_SCENARIO";
    pub const PROBABILITY_SUM_WARNING: &str = "PROBABILITY_SUM_WARNING";
    pub const NO_COUNTER_ARGUMENTS: &str = "NO_COUNTER_ARGUMENTS";
    pub const STRATEGY_HORIZON_MISMATCH: &str = "STRATEGY_HORIZON_MISMATCH";
    pub const ALLOCATION_SUM_WARNING: &str = "ALLOCATION_SUM_WARNING";
    pub const BROAD_UNIVERSE: &str = "BROAD_UNIVERSE";
    pub const ALL_CHANNELS_DISABLED: &str = "ALL_CHANNELS_DISABLED";
}

string_enum! {
    pub enum Severity {
        Error => "error",
        Warning => "warning",
    }
}

/// Field-scoped, authoritative failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub code: String,
    pub severity: Severity,
}

impl ValidationError {
    pub fn new(field: &str, message: &str, code: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
            code: code.to_string(),
            severity: Severity::Error,
        }
    }
}

/// Non-blocking observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub code: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    /// Errors become `AppError::Validation`; warnings pass through
    pub fn into_result(self) -> Result<Vec<ValidationWarning>> {
        if self.is_valid {
            Ok(self.warnings)
        } else {
            Err(AppError::Validation(self.errors))
        }
    }

    pub fn has_error(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn has_warning(&self, code: &str) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }
}

/// Required free-text field of payload `T`
pub(crate) struct TextRule<T> {
    pub field: &'static str,
    pub code: &'static str,
    pub get: fn(&T) -> Option<&str>,
}

/// Enumerated field of payload `T`
pub(crate) struct EnumRule<T> {
    pub field: &'static str,
    /// Code reported when absent; `None` makes the field optional
    pub required: Option<&'static str>,
    pub invalid: &'static str,
    pub get: fn(&T) -> Option<&str>,
    pub check: fn(&str) -> std::result::Result<(), String>,
}

/// Membership test usable as an [`EnumRule::check`]
pub(crate) fn member_of<E: FromStr<Err = String>>(value: &str) -> std::result::Result<(), String> {
    value.parse::<E>().map(|_| ())
}

/// Whether absent fields are errors (create) or skipped (partial update)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Full,
    Partial,
}

/// Accumulates errors and warnings for one payload
#[derive(Debug, Default)]
pub(crate) struct Validator {
    errors: Vec<ValidationError>,
    warnings: Vec<ValidationWarning>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, field: &str, message: impl Into<String>, code: &str) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.into(),
            code: code.to_string(),
            severity: Severity::Error,
        });
    }

    pub fn warn(
        &mut self,
        field: &str,
        message: impl Into<String>,
        code: &str,
        recommendation: impl Into<String>,
    ) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.into(),
            code: code.to_string(),
            recommendation: recommendation.into(),
        });
    }

    /// The one required-field combinator: absent or blank after trim is an error
    pub fn required<'a>(&mut self, field: &str, value: Option<&'a str>, code: &str) -> Option<&'a str> {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Some(v),
            _ => {
                self.error(field, format!("{} is required", field), code);
                None
            }
        }
    }

    /// Supplied-but-blank check for partial updates
    pub fn not_blank(&mut self, field: &str, value: Option<&str>, code: &str) {
        if let Some(v) = value {
            if v.trim().is_empty() {
                self.error(field, format!("{} cannot be empty", field), code);
            }
        }
    }

    pub fn text_rules<T>(&mut self, target: &T, rules: &[TextRule<T>], mode: Mode) {
        for rule in rules {
            match mode {
                Mode::Full => {
                    self.required(rule.field, (rule.get)(target), rule.code);
                }
                Mode::Partial => self.not_blank(rule.field, (rule.get)(target), rule.code),
            }
        }
    }

    pub fn enum_rules<T>(&mut self, target: &T, rules: &[EnumRule<T>], mode: Mode) {
        for rule in rules {
            match (rule.get)(target) {
                Some(value) => {
                    if let Err(reason) = (rule.check)(value) {
                        self.error(rule.field, format!("Invalid {}: {}", rule.field, reason), rule.invalid);
                    }
                }
                None => {
                    if let (Mode::Full, Some(code)) = (mode, rule.required) {
                        self.error(rule.field, format!("{} is required", rule.field), code);
                    }
                }
            }
        }
    }

    /// Inclusive [0, 1] check; NaN fails
    pub fn unit_interval(&mut self, field: &str, value: f64, code: &str) -> bool {
        if (0.0..=1.0).contains(&value) {
            true
        } else {
            self.error(field, format!("{} must be between 0 and 1, got {}", field, value), code);
            false
        }
    }

    pub fn finish(self) -> ValidationResult {
        ValidationResult {
            is_valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_trims() {
        let mut v = Validator::new();
        assert_eq!(v.required("title", Some("  x  "), codes::TITLE_REQUIRED), Some("x"));
        assert_eq!(v.required("title", Some("   "), codes::TITLE_REQUIRED), None);
        assert_eq!(v.required("title", None, codes::TITLE_REQUIRED), None);

        let result = v.finish();
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].severity, Severity::Error);
    }

    #[test]
    fn test_unit_interval_rejects_nan() {
        let mut v = Validator::new();
        assert!(v.unit_interval("p", 0.0, "X"));
        assert!(v.unit_interval("p", 1.0, "X"));
        assert!(!v.unit_interval("p", f64::NAN, "X"));
        assert_eq!(v.finish().errors.len(), 1);
    }

    #[test]
    fn test_into_result_keeps_warnings() {
        let mut v = Validator::new();
        v.warn("confidenceScore", "low", codes::LOW_CONFIDENCE, "add evidence");
        let warnings = v.finish().into_result().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].recommendation, "add evidence");
    }
}
