use common::{Direction, IndicatorSnapshot, SignalRules, Timeframe};

/// Applies the multi-timeframe HIGH/LOW rules to an indicator snapshot.
///
/// Pure: the same snapshot always yields the same decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalEvaluator {
    rules: SignalRules,
}

impl SignalEvaluator {
    pub fn new(rules: SignalRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &SignalRules {
        &self.rules
    }

    /// Returns `None` when neither rule set matches or the snapshot is
    /// missing a timeframe.
    pub fn evaluate(&self, snapshot: &IndicatorSnapshot) -> Option<Direction> {
        let m5 = snapshot.rsi(Timeframe::M5)?;
        let m15 = snapshot.rsi(Timeframe::M15)?;
        let h1 = snapshot.rsi(Timeframe::H1)?;
        let h4 = snapshot.rsi(Timeframe::H4)?;
        let mean = snapshot.mean_rsi()?;
        let r = &self.rules;

        if m5 >= r.high && m15 >= r.high && mean >= r.high_mean {
            return Some(Direction::High);
        }

        if m5 <= r.low && m15 <= r.low && h1 <= r.low_wide && h4 <= r.low_wide {
            return Some(Direction::Low);
        }

        None
    }
}
