use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{error, info, warn};

use common::{MarketData, ScanSettings, ScanState, Symbol};

use crate::scheduler::{BatchScheduler, CycleOutcome};

/// Cloneable handle for observing and stopping a running [`ScanLoop`].
#[derive(Clone)]
pub struct ScanHandle {
    stop_tx: Arc<watch::Sender<bool>>,
    state: Arc<RwLock<ScanState>>,
    cycles: Arc<AtomicU64>,
}

impl ScanHandle {
    /// Ask the loop to stop at its next suspension point.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub async fn state(&self) -> ScanState {
        *self.state.read().await
    }

    /// Number of cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}

enum CycleResult {
    Completed { symbols: usize, outcome: CycleOutcome },
    NoUniverse,
}

/// Drives scan cycles forever: load universe, run the batches, sleep until
/// the next cadence tick. Only [`ScanHandle::stop`] (or dropping every
/// handle) ends it.
pub struct ScanLoop {
    market: Arc<dyn MarketData>,
    scheduler: Arc<BatchScheduler>,
    settings: ScanSettings,
    state: Arc<RwLock<ScanState>>,
    cycles: Arc<AtomicU64>,
    stop_rx: watch::Receiver<bool>,
}

impl ScanLoop {
    pub fn new(
        market: Arc<dyn MarketData>,
        scheduler: BatchScheduler,
        settings: ScanSettings,
    ) -> (Self, ScanHandle) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = Arc::new(RwLock::new(ScanState::Idle));
        let cycles = Arc::new(AtomicU64::new(0));

        let handle = ScanHandle {
            stop_tx: Arc::new(stop_tx),
            state: state.clone(),
            cycles: cycles.clone(),
        };

        let scan_loop = ScanLoop {
            market,
            scheduler: Arc::new(scheduler),
            settings,
            state,
            cycles,
            stop_rx,
        };

        (scan_loop, handle)
    }

    /// Run until stopped. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(
            cadence_secs = self.settings.target_cadence_secs,
            batch_size = self.settings.batch_size,
            max_concurrent = self.settings.max_concurrent,
            "Scan loop started"
        );

        while !*self.stop_rx.borrow() {
            let started = Instant::now();
            let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
            self.set_state(ScanState::Scanning).await;

            let mut task = tokio::spawn(scan_once(
                self.market.clone(),
                self.scheduler.clone(),
                self.settings.shuffle,
            ));

            let joined = tokio::select! {
                joined = &mut task => joined,
                _ = self.stop_rx.changed() => {
                    warn!(cycle, "Stop requested mid-cycle, abandoning in-flight work");
                    task.abort();
                    break;
                }
            };

            let (pause, next_state) = match joined {
                Ok(CycleResult::Completed { symbols, outcome }) => {
                    let elapsed = started.elapsed();
                    let alerted: Vec<&str> = outcome.alerted.iter().map(Symbol::as_str).collect();
                    info!(
                        cycle,
                        symbols,
                        alerts = outcome.alert_count(),
                        undelivered = outcome.undelivered,
                        skipped = outcome.skipped,
                        failed = outcome.failed,
                        alerted = ?alerted,
                        elapsed_secs = elapsed.as_secs_f64(),
                        "Scan cycle complete"
                    );
                    (self.settings.cycle_pause(elapsed), ScanState::Sleeping)
                }
                Ok(CycleResult::NoUniverse) => {
                    warn!(cycle, "Symbol universe unavailable, cooling down");
                    (self.settings.error_cooldown(), ScanState::CoolingDown)
                }
                Err(e) => {
                    error!(cycle, error = %e, "Scan cycle aborted, cooling down");
                    (self.settings.error_cooldown(), ScanState::CoolingDown)
                }
            };

            self.set_state(next_state).await;
            if !self.pause(pause).await {
                break;
            }
        }

        self.set_state(ScanState::Stopped).await;
        info!(cycles = self.cycles.load(Ordering::Relaxed), "Scan loop stopped");
    }

    /// Sleep for `duration`; false if a stop arrived first.
    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.stop_rx.changed() => false,
        }
    }

    async fn set_state(&self, state: ScanState) {
        *self.state.write().await = state;
    }
}

async fn scan_once(
    market: Arc<dyn MarketData>,
    scheduler: Arc<BatchScheduler>,
    shuffle: bool,
) -> CycleResult {
    let mut symbols = market.list_symbols().await;
    if symbols.is_empty() {
        return CycleResult::NoUniverse;
    }
    if shuffle {
        symbols.shuffle(&mut rand::thread_rng());
    }

    info!(symbols = symbols.len(), "Scanning symbol universe");
    let outcome = scheduler.run_cycle(&symbols).await;
    CycleResult::Completed { symbols: symbols.len(), outcome }
}
