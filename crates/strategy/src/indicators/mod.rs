pub mod rsi;

pub use rsi::{compute_rsi, RsiIndicator, NEUTRAL_RSI};
