pub mod baseline;
pub mod evaluator;

pub use evaluator::{AlertEvent, TrendAlertEvaluator};
