//! Market alert evaluation

pub mod comparator;
pub mod evaluator;

pub use comparator::{ConditionComparator, FnComparator, VolatilityIncreaseComparator};
pub use evaluator::{EvaluationState, MarketAlertEvaluator, Side, DEFAULT_WINDOW, RECENT_CAPACITY};
