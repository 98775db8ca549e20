use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

/// Request budget for the current fixed window.
#[derive(Debug, Clone, Copy)]
pub struct RateBudget {
    pub window_start: Instant,
    pub request_count: u32,
    pub window: Duration,
    pub max_requests: u32,
}

impl RateBudget {
    fn reset(&mut self, now: Instant) {
        self.window_start = now;
        self.request_count = 0;
    }
}

/// Fixed-window limiter shared by every request to the exchange.
///
/// Callers are serialized on the budget lock; a caller that finds the
/// budget spent sleeps out the rest of the window while holding it, so
/// everyone queued behind it waits too.
pub struct RateLimiter {
    budget: Mutex<RateBudget>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            budget: Mutex::new(RateBudget {
                window_start: Instant::now(),
                request_count: 0,
                window,
                max_requests: max_requests.max(1),
            }),
        }
    }

    /// Count one request, first waiting for a fresh window if this one is
    /// used up.
    pub async fn acquire(&self) {
        let mut budget = self.budget.lock().await;

        let now = Instant::now();
        if now.duration_since(budget.window_start) >= budget.window {
            budget.reset(now);
        }

        if budget.request_count >= budget.max_requests {
            let wait = budget.window.saturating_sub(now.duration_since(budget.window_start));
            warn!(
                requests = budget.request_count,
                wait_ms = wait.as_millis() as u64,
                "Request budget exhausted, waiting for window reset"
            );
            tokio::time::sleep(wait).await;
            budget.reset(Instant::now());
        }

        budget.request_count += 1;
    }

    pub async fn budget(&self) -> RateBudget {
        *self.budget.lock().await
    }
}
