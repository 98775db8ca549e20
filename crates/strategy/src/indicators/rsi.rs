/// Value reported when there is not enough history to say anything.
pub const NEUTRAL_RSI: f64 = 50.0;

/// RSI (Relative Strength Index) indicator.
///
/// Gains and losses are smoothed with an exponentially weighted average,
/// `alpha = 1 / period` (Wilder's smoothing, same as TradingView), seeded
/// from the first price change and carried over the whole input.
#[derive(Debug, Clone, Copy)]
pub struct RsiIndicator {
    pub period: usize,
}

impl RsiIndicator {
    pub fn new(period: usize) -> Self {
        Self { period }
    }

    /// Compute RSI from close prices (oldest first).
    pub fn compute(&self, closes: &[f64]) -> f64 {
        compute_rsi(closes, self.period)
    }
}

/// Returns [`NEUTRAL_RSI`] when `closes` is shorter than `period`, and 100
/// when there were no losses at all.
pub fn compute_rsi(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period || closes.len() < 2 {
        return NEUTRAL_RSI;
    }

    let alpha = 1.0 / period as f64;
    let mut changes = closes.windows(2).map(|w| w[1] - w[0]);

    let Some(first) = changes.next() else {
        return NEUTRAL_RSI;
    };
    let mut avg_gain = first.max(0.0);
    let mut avg_loss = (-first).max(0.0);

    for change in changes {
        avg_gain = (1.0 - alpha) * avg_gain + alpha * change.max(0.0);
        avg_loss = (1.0 - alpha) * avg_loss + alpha * (-change).max(0.0);
    }

    if avg_loss == 0.0 {
        return 100.0;
    }

    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_is_neutral_when_insufficient_data() {
        let prices: Vec<f64> = (0..11).map(|i| 100.0 + i as f64).collect();
        assert_eq!(compute_rsi(&prices, 12), 50.0);
        assert_eq!(compute_rsi(&[], 12), 50.0);
    }

    #[test]
    fn rsi_is_neutral_for_zero_period() {
        assert_eq!(compute_rsi(&[1.0, 2.0, 3.0], 0), 50.0);
    }

    #[test]
    fn rsi_all_gains_returns_100() {
        let prices = vec![10.0, 11.0, 12.0, 13.0, 14.0];
        let value = RsiIndicator::new(3).compute(&prices);
        assert!((value - 100.0).abs() < 1e-6, "Expected ~100, got {value}");
    }

    #[test]
    fn rsi_all_losses_returns_0() {
        let prices = vec![14.0, 13.0, 12.0, 11.0, 10.0];
        let value = RsiIndicator::new(3).compute(&prices);
        assert!(value.abs() < 1e-6, "Expected ~0, got {value}");
    }

    #[test]
    fn rsi_constant_prices_take_no_loss_path() {
        let prices = vec![5.0; 20];
        assert_eq!(compute_rsi(&prices, 12), 100.0);
    }

    #[test]
    fn rsi_known_value() {
        // period 2, alpha 0.5: gains 1,0,2 -> 1, 0.5, 1.25; losses 0,1,0 -> 0, 0.5, 0.25
        let prices = vec![1.0, 2.0, 1.0, 3.0];
        let value = compute_rsi(&prices, 2);
        let expected = 100.0 - 100.0 / (1.0 + 1.25 / 0.25);
        assert!((value - expected).abs() < 1e-9, "Expected {expected}, got {value}");
    }

    #[test]
    fn rsi_weights_recent_moves_more() {
        // Same moves, different order: a late rally should read higher.
        let early_rally = vec![10.0, 12.0, 14.0, 13.0, 12.0];
        let late_rally = vec![10.0, 9.0, 8.0, 10.0, 12.0];
        assert!(compute_rsi(&late_rally, 3) > compute_rsi(&early_rally, 3));
    }

    #[test]
    fn rsi_is_deterministic() {
        let prices = vec![44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.15, 43.61, 44.33];
        assert_eq!(compute_rsi(&prices, 5), compute_rsi(&prices, 5));
    }
}
