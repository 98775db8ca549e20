use std::time::Duration;

/// How the delay between attempts evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// Same delay before every retry.
    Fixed,
    /// `base * attempt`, so 5s, 10s, 15s for a 5s base.
    Linear,
}

/// Bounded retry schedule. `attempt` counts retries already made, starting
/// at zero for the first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    growth: Growth,
    max_retries: u32,
}

impl Backoff {
    pub fn new(base: Duration, growth: Growth, max_retries: u32) -> Self {
        Self { base, growth, max_retries }
    }

    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self::new(delay, Growth::Fixed, max_retries)
    }

    pub fn linear(base: Duration, max_retries: u32) -> Self {
        Self::new(base, Growth::Linear, max_retries)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the next retry, or `None` once the ceiling is reached.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let delay = match self.growth {
            Growth::Fixed => self.base,
            Growth::Linear => self.base.saturating_mul(attempt.saturating_add(1)),
        };
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_backoff_grows_by_base() {
        let backoff = Backoff::linear(Duration::from_secs(5), 2);
        assert_eq!(backoff.next_delay(0), Some(Duration::from_secs(5)));
        assert_eq!(backoff.next_delay(1), Some(Duration::from_secs(10)));
        assert_eq!(backoff.next_delay(2), None);
    }

    #[test]
    fn fixed_backoff_repeats_delay() {
        let backoff = Backoff::fixed(Duration::from_secs(5), 3);
        let delays: Vec<_> = (0..4).map(|a| backoff.next_delay(a)).collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_secs(5)),
                Some(Duration::from_secs(5)),
                Some(Duration::from_secs(5)),
                None
            ]
        );
    }

    #[test]
    fn zero_retries_never_retries() {
        let backoff = Backoff::linear(Duration::from_secs(1), 0);
        assert_eq!(backoff.next_delay(0), None);
    }
}
