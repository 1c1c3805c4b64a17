//! Market alert and market data models

use crate::error::{AppError, Result};
use crate::validation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    /// Kind of market data a point or alert refers to
    pub enum DataType {
        Price => "price",
        Volume => "volume",
        OrderBook => "order-book",
        TechnicalIndicators => "technical-indicators",
        NewsSentiment => "news-sentiment",
        EconomicIndicators => "economic-indicators",
        VolatilityMetrics => "volatility-metrics",
        OptionsData => "options-data",
        FuturesData => "futures-data",
        ForexData => "forex-data",
    }
}

string_enum! {
    pub enum AlertCondition {
        GreaterThan => "greater-than",
        LessThan => "less-than",
        EqualTo => "equal-to",
        PercentChangeUp => "percent-change-up",
        PercentChangeDown => "percent-change-down",
        CrossesAbove => "crosses-above",
        CrossesBelow => "crosses-below",
        VolumeSpike => "volume-spike",
        VolatilityIncrease => "volatility-increase",
        Custom => "custom",
    }
}

string_enum! {
    /// Baseline a condition compares against
    pub enum ComparisonValue {
        Previous => "previous",
        MovingAverage => "moving-average",
        Fixed => "fixed",
    }
}

string_enum! {
    pub enum ChannelType {
        Email => "email",
        Sms => "sms",
        Push => "push",
        Webhook => "webhook",
    }
}

string_enum! {
    /// Sampling interval of a market data point
    pub enum DataInterval {
        Tick => "tick",
        OneMinute => "1min",
        FiveMinutes => "5min",
        FifteenMinutes => "15min",
        ThirtyMinutes => "30min",
        OneHour => "1hour",
        FourHours => "4hour",
        Daily => "daily",
        Weekly => "weekly",
        Monthly => "monthly",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationChannel {
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub destination: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationChannelInput {
    #[serde(rename = "type", default)]
    pub channel_type: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Alert creation payload with enumerations in string form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlertRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub comparison_value: Option<String>,
    /// Reference level for `fixed` comparisons
    #[serde(default)]
    pub reference_value: Option<f64>,
    #[serde(default)]
    pub moving_average_period: Option<i64>,
    /// Seconds
    #[serde(default)]
    pub cooldown_period: Option<i64>,
    #[serde(default)]
    pub notification_channels: Vec<NotificationChannelInput>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAlertConfig {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub data_type: DataType,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub comparison_value: Option<ComparisonValue>,
    pub reference_value: Option<f64>,
    pub moving_average_period: Option<u32>,
    /// Seconds during which the alert cannot fire again
    pub cooldown_period: u64,
    pub notification_channels: Vec<NotificationChannel>,
    pub enabled: bool,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl CreateAlertRequest {
    /// Validate and convert into a typed alert owned by `user_id`
    pub fn into_config(mut self, user_id: &str) -> Result<MarketAlertConfig> {
        self.user_id = Some(user_id.to_string());

        let result = validation::validate_alert_config(&self);
        if !result.is_valid {
            return Err(AppError::Validation(result.errors));
        }

        let parse_err =
            |field: &str| AppError::Internal(format!("validated field '{}' missing", field));

        let channels = self
            .notification_channels
            .iter()
            .map(|c| {
                Ok(NotificationChannel {
                    channel_type: c
                        .channel_type
                        .as_deref()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| parse_err("notificationChannels.type"))?,
                    destination: c.destination.clone().unwrap_or_default().trim().to_string(),
                    enabled: c.enabled.unwrap_or(false),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(MarketAlertConfig {
            id: uuid::Uuid::new_v4().to_string(),
            name: self.name.unwrap_or_default().trim().to_string(),
            symbol: normalize_symbol(self.symbol.as_deref().unwrap_or_default()),
            data_type: self
                .data_type
                .as_deref()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| parse_err("dataType"))?,
            condition: self
                .condition
                .as_deref()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| parse_err("condition"))?,
            threshold: self.threshold.ok_or_else(|| parse_err("threshold"))?,
            comparison_value: self.comparison_value.as_deref().and_then(|v| v.parse().ok()),
            reference_value: self.reference_value,
            moving_average_period: self.moving_average_period.map(|p| p as u32),
            cooldown_period: self.cooldown_period.unwrap_or(0) as u64,
            notification_channels: channels,
            enabled: self.enabled.unwrap_or(true),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        })
    }
}

pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataPoint {
    pub id: String,
    pub symbol: String,
    pub data_type: DataType,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub source: String,
    pub interval: DataInterval,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataPointInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
}

impl MarketDataPointInput {
    pub fn into_point(self) -> Result<MarketDataPoint> {
        let result = validation::validate_market_data_point(&self);
        if !result.is_valid {
            return Err(AppError::Validation(result.errors));
        }

        let missing =
            |field: &str| AppError::Internal(format!("validated field '{}' missing", field));

        Ok(MarketDataPoint {
            id: self.id.ok_or_else(|| missing("id"))?.trim().to_string(),
            symbol: normalize_symbol(self.symbol.as_deref().unwrap_or_default()),
            data_type: self
                .data_type
                .as_deref()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| missing("dataType"))?,
            timestamp: self.timestamp.ok_or_else(|| missing("timestamp"))?,
            value: self.value.ok_or_else(|| missing("value"))?,
            source: self.source.ok_or_else(|| missing("source"))?.trim().to_string(),
            interval: self
                .interval
                .as_deref()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| missing("interval"))?,
        })
    }
}

/// Emitted when an alert condition is met outside its cooldown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredAlert {
    pub alert_id: String,
    pub alert_name: String,
    pub user_id: String,
    pub symbol: String,
    pub data_type: DataType,
    pub condition: AlertCondition,
    pub value: f64,
    pub baseline: Option<f64>,
    pub threshold: f64,
    pub data_point_id: String,
    pub triggered_at: DateTime<Utc>,
    pub channels: Vec<NotificationChannel>,
    pub message: String,
}
