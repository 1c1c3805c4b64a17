//! Market alert and market data validation

use super::{codes, member_of, EnumRule, Mode, TextRule, ValidationResult, Validator};
use crate::models::{
    AlertCondition, ChannelType, ComparisonValue, CreateAlertRequest, DataInterval, DataType,
    MarketDataPointInput,
};

/// Longest accepted cooldown: one year
pub const MAX_COOLDOWN_SECS: i64 = 365 * 24 * 60 * 60;

static ALERT_TEXT_RULES: &[TextRule<CreateAlertRequest>] = &[
    TextRule { field: "name", code: codes::NAME_REQUIRED, get: |r| r.name.as_deref() },
    TextRule { field: "symbol", code: codes::SYMBOL_REQUIRED, get: |r| r.symbol.as_deref() },
    TextRule { field: "userId", code: codes::USER_ID_REQUIRED, get: |r| r.user_id.as_deref() },
];

static ALERT_ENUM_RULES: &[EnumRule<CreateAlertRequest>] = &[
    EnumRule {
        field: "dataType",
        required: Some(codes::DATA_TYPE_REQUIRED),
        invalid: codes::INVALID_DATA_TYPE,
        get: |r| r.data_type.as_deref(),
        check: member_of::<DataType>,
    },
    EnumRule {
        field: "condition",
        required: Some(codes::CONDITION_REQUIRED),
        invalid: codes::INVALID_CONDITION,
        get: |r| r.condition.as_deref(),
        check: member_of::<AlertCondition>,
    },
    EnumRule {
        field: "comparisonValue",
        required: None,
        invalid: codes::INVALID_COMPARISON_VALUE,
        get: |r| r.comparison_value.as_deref(),
        check: member_of::<ComparisonValue>,
    },
];

static POINT_TEXT_RULES: &[TextRule<MarketDataPointInput>] = &[
    TextRule { field: "id", code: codes::DATA_POINT_ID_REQUIRED, get: |p| p.id.as_deref() },
    TextRule { field: "symbol", code: codes::SYMBOL_REQUIRED, get: |p| p.symbol.as_deref() },
    TextRule { field: "source", code: codes::SOURCE_REQUIRED, get: |p| p.source.as_deref() },
];

static POINT_ENUM_RULES: &[EnumRule<MarketDataPointInput>] = &[
    EnumRule {
        field: "dataType",
        required: Some(codes::DATA_TYPE_REQUIRED),
        invalid: codes::INVALID_DATA_TYPE,
        get: |p| p.data_type.as_deref(),
        check: member_of::<DataType>,
    },
    EnumRule {
        field: "interval",
        required: Some(codes::INTERVAL_REQUIRED),
        invalid: codes::INVALID_INTERVAL,
        get: |p| p.interval.as_deref(),
        check: member_of::<DataInterval>,
    },
];

pub fn validate_alert_config(req: &CreateAlertRequest) -> ValidationResult {
    let mut v = Validator::new();

    v.text_rules(req, ALERT_TEXT_RULES, Mode::Full);
    v.enum_rules(req, ALERT_ENUM_RULES, Mode::Full);

    match req.threshold {
        None => v.error("threshold", "threshold is required", codes::THRESHOLD_REQUIRED),
        Some(t) if !t.is_finite() => {
            v.error("threshold", "threshold must be a finite number", codes::INVALID_THRESHOLD)
        }
        Some(_) => {}
    }

    let comparison = req
        .comparison_value
        .as_deref()
        .and_then(|c| c.parse::<ComparisonValue>().ok());

    match req.moving_average_period {
        Some(period) if period <= 0 => v.error(
            "movingAveragePeriod",
            "movingAveragePeriod must be a positive integer",
            codes::INVALID_MOVING_AVERAGE_PERIOD,
        ),
        Some(period) if period > u32::MAX as i64 => v.error(
            "movingAveragePeriod",
            "movingAveragePeriod is too large",
            codes::INVALID_MOVING_AVERAGE_PERIOD,
        ),
        None if comparison == Some(ComparisonValue::MovingAverage) => v.error(
            "movingAveragePeriod",
            "movingAveragePeriod is required for moving-average comparisons",
            codes::INVALID_MOVING_AVERAGE_PERIOD,
        ),
        _ => {}
    }

    if comparison == Some(ComparisonValue::Fixed) && req.reference_value.is_none() {
        v.error(
            "referenceValue",
            "referenceValue is required for fixed comparisons",
            codes::REFERENCE_VALUE_REQUIRED,
        );
    }

    match req.cooldown_period {
        Some(c) if c < 0 => v.error(
            "cooldownPeriod",
            "cooldownPeriod must be zero or greater",
            codes::INVALID_COOLDOWN_PERIOD,
        ),
        Some(c) if c > MAX_COOLDOWN_SECS => v.error(
            "cooldownPeriod",
            format!("cooldownPeriod must not exceed {} seconds", MAX_COOLDOWN_SECS),
            codes::INVALID_COOLDOWN_PERIOD,
        ),
        _ => {}
    }

    if req.notification_channels.is_empty() {
        v.error(
            "notificationChannels",
            "At least one notification channel is required",
            codes::NOTIFICATION_CHANNEL_REQUIRED,
        );
    }

    for (i, channel) in req.notification_channels.iter().enumerate() {
        let field = format!("notificationChannels[{}].type", i);
        match channel.channel_type.as_deref() {
            None => v.error(&field, "type is required", codes::CHANNEL_TYPE_REQUIRED),
            Some(raw) => {
                if let Err(reason) = raw.parse::<ChannelType>() {
                    v.error(&field, format!("Invalid type: {}", reason), codes::INVALID_CHANNEL_TYPE);
                }
            }
        }
        v.required(
            &format!("notificationChannels[{}].destination", i),
            channel.destination.as_deref(),
            codes::CHANNEL_DESTINATION_REQUIRED,
        );
        if channel.enabled.is_none() {
            v.error(
                &format!("notificationChannels[{}].enabled", i),
                "enabled is required",
                codes::CHANNEL_ENABLED_REQUIRED,
            );
        }
    }

    let any_enabled = req.notification_channels.iter().any(|c| c.enabled == Some(true));
    if !req.notification_channels.is_empty() && !any_enabled {
        v.warn(
            "notificationChannels",
            "All notification channels are disabled",
            codes::ALL_CHANNELS_DISABLED,
            "Enable at least one channel or the alert will fire silently",
        );
    }

    v.finish()
}

pub fn validate_market_data_point(point: &MarketDataPointInput) -> ValidationResult {
    let mut v = Validator::new();

    v.text_rules(point, POINT_TEXT_RULES, Mode::Full);
    v.enum_rules(point, POINT_ENUM_RULES, Mode::Full);

    if point.timestamp.is_none() {
        v.error("timestamp", "timestamp is required", codes::TIMESTAMP_REQUIRED);
    }

    match point.value {
        None => v.error("value", "value is required", codes::VALUE_REQUIRED),
        Some(value) if !value.is_finite() => {
            v.error("value", "value must be a finite number", codes::INVALID_VALUE)
        }
        Some(value) if value < 0.0 && point.data_type.as_deref() == Some("volume") => {
            v.error("value", "volume cannot be negative", codes::INVALID_VALUE)
        }
        Some(_) => {}
    }

    v.finish()
}
