use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use common::{AlertSettings, AlertSink, Backoff, Signal, SinkError};

use crate::message::render;

/// Fans a rendered alert out to every configured sink.
///
/// Each sink is retried independently: timeouts are retried a bounded
/// number of times, retry-after hints are honored without using up a retry,
/// and anything else abandons that sink for the current message.
pub struct AlertDispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
    settings: AlertSettings,
}

impl AlertDispatcher {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>, settings: AlertSettings) -> Self {
        Self { sinks, settings }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true when at least one sink accepted the message.
    pub async fn dispatch(&self, signal: &Signal) -> bool {
        if self.sinks.is_empty() {
            warn!(symbol = %signal.symbol, "No alert sinks configured, dropping signal");
            return false;
        }

        let text = render(signal, self.settings.signature.as_deref());
        let outcomes = join_all(self.sinks.iter().map(|sink| self.deliver(sink.as_ref(), &text))).await;
        let delivered = outcomes.iter().filter(|ok| **ok).count();

        if delivered == self.sinks.len() {
            info!(symbol = %signal.symbol, direction = %signal.direction, signal_id = %signal.id, "Alert delivered");
        } else if delivered > 0 {
            warn!(
                symbol = %signal.symbol,
                delivered,
                sinks = self.sinks.len(),
                "Alert partially delivered"
            );
        } else {
            error!(symbol = %signal.symbol, signal_id = %signal.id, "Alert delivery failed on every sink");
        }
        delivered > 0
    }

    async fn deliver(&self, sink: &dyn AlertSink, text: &str) -> bool {
        let backoff = Backoff::fixed(self.settings.retry_delay(), self.settings.max_retries);
        let mut attempt = 0;

        loop {
            match sink.send(text).await {
                Ok(()) => {
                    debug!(sink = sink.name(), "Alert sent");
                    tokio::time::sleep(self.settings.post_send_pause()).await;
                    return true;
                }
                Err(SinkError::RetryAfter(wait)) => {
                    let wait = wait + self.settings.retry_margin();
                    warn!(sink = sink.name(), wait = ?wait, "Sink rate limited, waiting");
                    tokio::time::sleep(wait).await;
                }
                Err(SinkError::Timeout) => match backoff.next_delay(attempt) {
                    Some(delay) => {
                        attempt += 1;
                        warn!(sink = sink.name(), attempt, delay = ?delay, "Sink timed out, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        error!(sink = sink.name(), attempts = attempt + 1, "Sink timed out, giving up");
                        return false;
                    }
                },
                Err(e) => {
                    error!(sink = sink.name(), error = %e, "Sink rejected alert");
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use common::{Direction, IndicatorSnapshot, Symbol, Timeframe, TimeframeReading};
    use tokio::time::Instant;

    use super::*;

    /// Sink that replays scripted outcomes, then succeeds.
    struct ScriptedSink {
        name: String,
        script: Mutex<VecDeque<Result<(), SinkError>>>,
        sent: Mutex<Vec<String>>,
        calls: Mutex<u32>,
    }

    impl ScriptedSink {
        fn new(name: &str, script: Vec<Result<(), SinkError>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                script: Mutex::new(script.into()),
                sent: Mutex::new(Vec::new()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AlertSink for ScriptedSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, text: &str) -> Result<(), SinkError> {
            *self.calls.lock().unwrap() += 1;
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
            if next.is_ok() {
                self.sent.lock().unwrap().push(text.to_string());
            }
            next
        }
    }

    fn settings() -> AlertSettings {
        AlertSettings {
            max_retries: 3,
            retry_delay_secs: 5,
            retry_margin_secs: 2,
            post_send_pause_secs: 2,
            send_timeout_secs: 30,
            signature: Some("ScalpingPA".into()),
        }
    }

    fn signal() -> Signal {
        let mut snapshot = IndicatorSnapshot::new();
        for tf in Timeframe::ALL {
            snapshot.insert(tf, TimeframeReading { rsi: 95.0, close: 2.0 });
        }
        Signal::new(Symbol::new("AUSDT"), Direction::High, snapshot, 2.0).unwrap()
    }

    fn dispatcher(sinks: &[Arc<ScriptedSink>]) -> AlertDispatcher {
        let sinks = sinks.iter().map(|s| s.clone() as Arc<dyn AlertSink>).collect();
        AlertDispatcher::new(sinks, settings())
    }

    #[tokio::test(start_paused = true)]
    async fn successful_send_is_followed_by_pause() {
        let sink = ScriptedSink::new("a", vec![]);
        let started = Instant::now();

        assert!(dispatcher(&[sink.clone()]).dispatch(&signal()).await);

        assert_eq!(sink.calls(), 1);
        assert!(sink.sent()[0].starts_with("💰: AUSDT.P"));
        assert!(sink.sent()[0].ends_with("ScalpingPA"));
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_retried_then_delivered() {
        let sink = ScriptedSink::new("a", vec![Err(SinkError::Timeout), Err(SinkError::Timeout)]);
        let started = Instant::now();

        assert!(dispatcher(&[sink.clone()]).dispatch(&signal()).await);

        assert_eq!(sink.calls(), 3);
        // two 5s retry delays plus the post-send pause
        assert_eq!(started.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_past_ceiling_abandon_sink() {
        let sink = ScriptedSink::new("a", vec![Err(SinkError::Timeout); 4]);

        assert!(!dispatcher(&[sink.clone()]).dispatch(&signal()).await);

        // first attempt plus max_retries
        assert_eq!(sink.calls(), 4);
        assert!(sink.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_waits_hint_plus_margin_without_counting() {
        let sink = ScriptedSink::new(
            "a",
            vec![
                Err(SinkError::RetryAfter(Duration::from_secs(10))),
                Err(SinkError::Timeout),
                Err(SinkError::Timeout),
                Err(SinkError::Timeout),
                Err(SinkError::RetryAfter(Duration::from_secs(10))),
            ],
        );
        let started = Instant::now();

        assert!(dispatcher(&[sink.clone()]).dispatch(&signal()).await);

        // rate-limit waits did not eat into the three timeout retries
        assert_eq!(sink.calls(), 6);
        assert_eq!(started.elapsed(), Duration::from_secs(12 + 15 + 12 + 2));
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_is_not_retried() {
        let sink = ScriptedSink::new("a", vec![Err(SinkError::Rejected("chat not found".into()))]);

        assert!(!dispatcher(&[sink.clone()]).dispatch(&signal()).await);
        assert_eq!(sink.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fan_out_reaches_every_sink_concurrently() {
        let healthy = ScriptedSink::new("healthy", vec![]);
        let broken = ScriptedSink::new("broken", vec![Err(SinkError::Rejected("blocked".into()))]);
        let slow = ScriptedSink::new("slow", vec![Err(SinkError::Timeout)]);
        let started = Instant::now();

        let delivered = dispatcher(&[healthy.clone(), broken.clone(), slow.clone()])
            .dispatch(&signal())
            .await;

        assert!(delivered, "partial delivery counts as success");
        assert_eq!(healthy.sent().len(), 1);
        assert!(broken.sent().is_empty());
        assert_eq!(slow.sent().len(), 1);
        // concurrent: total time is the slowest sink (5s retry + 2s pause), not the sum
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test]
    async fn no_sinks_means_not_delivered() {
        let dispatcher = AlertDispatcher::new(Vec::new(), settings());
        assert!(!dispatcher.dispatch(&signal()).await);
    }
}
