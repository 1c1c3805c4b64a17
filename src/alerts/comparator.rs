//! Pluggable condition comparators

use crate::models::MarketDataPoint;

/// Comparator for conditions whose semantics are not fixed by the engine
/// (`volatility-increase`, `custom`).
pub trait ConditionComparator: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Whether `point` satisfies the condition given the alert's baseline
    fn matches(&self, point: &MarketDataPoint, baseline: Option<f64>, threshold: f64) -> bool;
}

/// Fires when the value rises more than `threshold` percent above the baseline
#[derive(Debug, Default, Clone, Copy)]
pub struct VolatilityIncreaseComparator;

impl ConditionComparator for VolatilityIncreaseComparator {
    fn name(&self) -> &str {
        "volatility-increase"
    }

    fn matches(&self, point: &MarketDataPoint, baseline: Option<f64>, threshold: f64) -> bool {
        match baseline {
            Some(base) if base > 0.0 => (point.value - base) / base * 100.0 > threshold,
            _ => false,
        }
    }
}

/// Comparator backed by a plain function
pub struct FnComparator<F> {
    name: String,
    f: F,
}

impl<F> FnComparator<F>
where
    F: Fn(&MarketDataPoint, Option<f64>, f64) -> bool + Send + Sync,
{
    pub fn new(name: &str, f: F) -> Self {
        Self {
            name: name.to_string(),
            f,
        }
    }
}

impl<F> ConditionComparator for FnComparator<F>
where
    F: Fn(&MarketDataPoint, Option<f64>, f64) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, point: &MarketDataPoint, baseline: Option<f64>, threshold: f64) -> bool {
        (self.f)(point, baseline, threshold)
    }
}

/// Signed percentage change from `base` to `value`; `None` for a zero base
pub fn percent_change(value: f64, base: f64) -> Option<f64> {
    (base != 0.0).then(|| (value - base) / base.abs() * 100.0)
}
