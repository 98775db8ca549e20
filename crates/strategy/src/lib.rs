pub mod evaluator;
pub mod indicators;

pub use evaluator::SignalEvaluator;
pub use indicators::{compute_rsi, RsiIndicator};
