//! Market alert evaluation
//!
//! Alert configs are plain data. Everything that changes between data
//! points (rolling window, previous value, crossing side, cooldown clock)
//! lives in an [`EvaluationState`] keyed by alert id. State for one alert is
//! only touched while its map entry is held, so updates for the same alert
//! are serialized while different alerts evaluate in parallel.

use super::comparator::{percent_change, ConditionComparator, VolatilityIncreaseComparator};
use crate::error::{AppError, Result};
use crate::models::{
    AlertCondition, ComparisonValue, MarketAlertConfig, MarketDataPoint, TriggeredAlert,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Window size used when an alert does not set `movingAveragePeriod`
pub const DEFAULT_WINDOW: usize = 20;

const EQUALITY_TOLERANCE: f64 = 1e-9;
/// Triggered alerts kept for request context by default
pub const RECENT_CAPACITY: usize = 500;

/// Side of the crossing level the last observation fell on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Above,
    Below,
}

/// Per-alert mutable evaluation state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationState {
    pub last_triggered: Option<DateTime<Utc>>,
    pub previous_value: Option<f64>,
    /// Most recent values, oldest first, excluding the point being evaluated
    pub window: VecDeque<f64>,
    pub last_side: Option<Side>,
    pub observations: u64,
    pub suppressed: u64,
}

impl EvaluationState {
    fn moving_average(&self) -> Option<f64> {
        if self.window.is_empty() {
            None
        } else {
            Some(self.window.iter().sum::<f64>() / self.window.len() as f64)
        }
    }

    fn push(&mut self, value: f64, capacity: usize) {
        self.window.push_back(value);
        while self.window.len() > capacity {
            self.window.pop_front();
        }
        self.previous_value = Some(value);
        self.observations += 1;
    }

    /// A cooldown that ends past the representable calendar never expires
    fn in_cooldown(&self, now: DateTime<Utc>, cooldown_secs: u64) -> bool {
        let Some(last) = self.last_triggered else {
            return false;
        };
        let until = i64::try_from(cooldown_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|cooldown| last.checked_add_signed(cooldown));
        match until {
            Some(until) => now < until,
            None => true,
        }
    }
}

/// Evaluates incoming market data against registered alerts
pub struct MarketAlertEvaluator {
    alerts: DashMap<String, MarketAlertConfig>,
    states: DashMap<String, EvaluationState>,
    comparators: DashMap<String, Arc<dyn ConditionComparator>>,
    volatility: Arc<dyn ConditionComparator>,
    recent: Mutex<VecDeque<TriggeredAlert>>,
    recent_capacity: usize,
}

impl MarketAlertEvaluator {
    pub fn new() -> Self {
        Self::with_recent_capacity(RECENT_CAPACITY)
    }

    pub fn with_recent_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            alerts: DashMap::new(),
            states: DashMap::new(),
            comparators: DashMap::new(),
            volatility: Arc::new(VolatilityIncreaseComparator),
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            recent_capacity: capacity,
        }
    }

    /// Register an alert; replaces any alert with the same id and resets its state
    pub fn add_alert(&self, config: MarketAlertConfig) {
        tracing::info!(
            alert_id = %config.id,
            symbol = %config.symbol,
            condition = %config.condition,
            "Registered market alert"
        );
        self.states.remove(&config.id);
        self.alerts.insert(config.id.clone(), config);
    }

    /// Remove an alert owned by `user_id`
    pub fn remove_alert(&self, alert_id: &str, user_id: &str) -> Result<MarketAlertConfig> {
        self.owned(alert_id, user_id)?;
        self.states.remove(alert_id);
        self.comparators.remove(alert_id);
        self.alerts
            .remove(alert_id)
            .map(|(_, config)| config)
            .ok_or_else(|| AppError::NotFound(format!("Alert {} not found", alert_id)))
    }

    /// Enable or disable an alert owned by `user_id`
    pub fn set_enabled(&self, alert_id: &str, user_id: &str, enabled: bool) -> Result<MarketAlertConfig> {
        self.owned(alert_id, user_id)?;
        let mut entry = self
            .alerts
            .get_mut(alert_id)
            .ok_or_else(|| AppError::NotFound(format!("Alert {} not found", alert_id)))?;
        entry.enabled = enabled;
        Ok(entry.value().clone())
    }

    pub fn get(&self, alert_id: &str) -> Option<MarketAlertConfig> {
        self.alerts.get(alert_id).map(|a| a.value().clone())
    }

    /// Alerts owned by a user, oldest first
    pub fn list_for_user(&self, user_id: &str) -> Vec<MarketAlertConfig> {
        let mut alerts: Vec<MarketAlertConfig> = self
            .alerts
            .iter()
            .filter(|a| a.user_id == user_id)
            .map(|a| a.value().clone())
            .collect();
        alerts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        alerts
    }

    /// Attach a comparator used for `volatility-increase` or `custom` conditions
    pub fn register_comparator(&self, alert_id: &str, comparator: Arc<dyn ConditionComparator>) {
        self.comparators.insert(alert_id.to_string(), comparator);
    }

    /// Snapshot of an alert's evaluation state
    pub fn state_of(&self, alert_id: &str) -> Option<EvaluationState> {
        self.states.get(alert_id).map(|s| s.value().clone())
    }

    /// Evaluate a data point against every enabled alert on its symbol and data type
    pub fn on_data_point(&self, point: &MarketDataPoint) -> Vec<TriggeredAlert> {
        let candidates: Vec<MarketAlertConfig> = self
            .alerts
            .iter()
            .filter(|a| a.enabled && a.symbol == point.symbol && a.data_type == point.data_type)
            .map(|a| a.value().clone())
            .collect();

        let triggered: Vec<TriggeredAlert> = candidates
            .iter()
            .filter_map(|config| self.evaluate(config, point))
            .collect();

        if !triggered.is_empty() {
            let mut recent = self.recent.lock();
            for alert in &triggered {
                if recent.len() >= self.recent_capacity {
                    recent.pop_front();
                }
                recent.push_back(alert.clone());
            }
        }

        triggered
    }

    /// Most recent triggered alerts for a user, newest first
    pub fn recent_for_user(&self, user_id: &str, limit: usize) -> Vec<TriggeredAlert> {
        self.recent
            .lock()
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .take(limit)
            .cloned()
            .collect()
    }

    fn owned(&self, alert_id: &str, user_id: &str) -> Result<()> {
        match self.alerts.get(alert_id) {
            None => Err(AppError::NotFound(format!("Alert {} not found", alert_id))),
            Some(a) if a.user_id != user_id => Err(AppError::AccessDenied(format!(
                "Alert {} belongs to another user",
                alert_id
            ))),
            Some(_) => Ok(()),
        }
    }

    fn evaluate(&self, config: &MarketAlertConfig, point: &MarketDataPoint) -> Option<TriggeredAlert> {
        let capacity = config
            .moving_average_period
            .map(|p| p.max(1) as usize)
            .unwrap_or(DEFAULT_WINDOW);

        let mut state = self.states.entry(config.id.clone()).or_default();
        let moving_average = state.moving_average();
        let baseline = match config.comparison_value.unwrap_or(ComparisonValue::Previous) {
            ComparisonValue::Previous => state.previous_value,
            ComparisonValue::MovingAverage => moving_average,
            ComparisonValue::Fixed => config.reference_value,
        };

        let value = point.value;
        let (fired, reported_baseline) = match config.condition {
            AlertCondition::GreaterThan => (value > config.threshold, None),
            AlertCondition::LessThan => (value < config.threshold, None),
            AlertCondition::EqualTo => ((value - config.threshold).abs() <= EQUALITY_TOLERANCE, None),
            AlertCondition::PercentChangeUp => (
                baseline
                    .and_then(|b| percent_change(value, b))
                    .map_or(false, |pct| pct >= config.threshold),
                baseline,
            ),
            AlertCondition::PercentChangeDown => (
                baseline
                    .and_then(|b| percent_change(value, b))
                    .map_or(false, |pct| -pct >= config.threshold),
                baseline,
            ),
            AlertCondition::CrossesAbove | AlertCondition::CrossesBelow => {
                let level = if config.comparison_value == Some(ComparisonValue::MovingAverage) {
                    moving_average
                } else {
                    Some(config.threshold)
                };
                let side = level.and_then(|l| {
                    if value > l {
                        Some(Side::Above)
                    } else if value < l {
                        Some(Side::Below)
                    } else {
                        None
                    }
                });
                let wanted = if config.condition == AlertCondition::CrossesAbove {
                    (Side::Below, Side::Above)
                } else {
                    (Side::Above, Side::Below)
                };
                let crossed = matches!((state.last_side, side), (Some(prev), Some(now)) if (prev, now) == wanted);
                if side.is_some() {
                    state.last_side = side;
                }
                (crossed, level)
            }
            AlertCondition::VolumeSpike => (
                moving_average
                    .filter(|avg| *avg > 0.0)
                    .map_or(false, |avg| value / avg > config.threshold),
                moving_average,
            ),
            AlertCondition::VolatilityIncrease | AlertCondition::Custom => {
                let comparator = self
                    .comparators
                    .get(&config.id)
                    .map(|c| c.value().clone())
                    .or_else(|| {
                        (config.condition == AlertCondition::VolatilityIncrease)
                            .then(|| self.volatility.clone())
                    });
                match comparator {
                    Some(cmp) => {
                        let matched = cmp.matches(point, baseline, config.threshold);
                        tracing::debug!(
                            alert_id = %config.id,
                            comparator = cmp.name(),
                            matched,
                            "Evaluated comparator"
                        );
                        (matched, baseline)
                    }
                    None => {
                        tracing::debug!(alert_id = %config.id, "No comparator registered for custom alert");
                        (false, baseline)
                    }
                }
            }
        };

        let cooling = fired && state.in_cooldown(point.timestamp, config.cooldown_period);
        if cooling {
            state.suppressed += 1;
            tracing::debug!(alert_id = %config.id, "Alert suppressed by cooldown");
        }
        if fired && !cooling {
            state.last_triggered = Some(point.timestamp);
        }
        state.push(value, capacity);
        drop(state);

        if !fired || cooling {
            return None;
        }

        tracing::info!(
            alert_id = %config.id,
            symbol = %point.symbol,
            value,
            "Market alert triggered"
        );

        Some(TriggeredAlert {
            alert_id: config.id.clone(),
            alert_name: config.name.clone(),
            user_id: config.user_id.clone(),
            symbol: point.symbol.clone(),
            data_type: point.data_type,
            condition: config.condition,
            value,
            baseline: reported_baseline,
            threshold: config.threshold,
            data_point_id: point.id.clone(),
            triggered_at: point.timestamp,
            channels: config
                .notification_channels
                .iter()
                .filter(|c| c.enabled)
                .cloned()
                .collect(),
            message: format!(
                "{} {} {} {} (value {})",
                config.name, point.symbol, config.condition, config.threshold, value
            ),
        })
    }
}

impl Default for MarketAlertEvaluator {
    fn default() -> Self {
        Self::new()
    }
}
