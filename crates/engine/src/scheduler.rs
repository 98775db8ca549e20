use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use alert::AlertDispatcher;
use common::{
    IndicatorSnapshot, MarketData, ScanSettings, Signal, Symbol, Timeframe, TimeframeReading,
};
use strategy::{RsiIndicator, SignalEvaluator};

/// What happened to one symbol during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolOutcome {
    /// A signal fired and was handed to the dispatcher.
    Alerted { delivered: bool },
    /// Evaluated, no rule matched.
    Quiet,
    /// Missing, malformed or too-short data.
    Skipped,
    /// The pipeline panicked.
    Failed,
}

/// Tally of one scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    pub alerted: Vec<Symbol>,
    pub undelivered: usize,
    pub quiet: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl CycleOutcome {
    pub fn alert_count(&self) -> usize {
        self.alerted.len()
    }

    pub fn evaluated(&self) -> usize {
        self.alerted.len() + self.quiet
    }

    fn record(&mut self, symbol: Symbol, outcome: SymbolOutcome) {
        match outcome {
            SymbolOutcome::Alerted { delivered } => {
                if !delivered {
                    self.undelivered += 1;
                }
                self.alerted.push(symbol);
            }
            SymbolOutcome::Quiet => self.quiet += 1,
            SymbolOutcome::Skipped => self.skipped += 1,
            SymbolOutcome::Failed => self.failed += 1,
        }
    }
}

/// Fetch → RSI → evaluate → dispatch for a single symbol.
pub struct SymbolPipeline {
    market: Arc<dyn MarketData>,
    dispatcher: Arc<AlertDispatcher>,
    evaluator: SignalEvaluator,
    rsi: RsiIndicator,
}

impl SymbolPipeline {
    pub fn new(
        market: Arc<dyn MarketData>,
        dispatcher: Arc<AlertDispatcher>,
        evaluator: SignalEvaluator,
        rsi_period: usize,
    ) -> Self {
        Self {
            market,
            dispatcher,
            evaluator,
            rsi: RsiIndicator::new(rsi_period),
        }
    }

    pub async fn run(&self, symbol: &Symbol) -> SymbolOutcome {
        let fetches = Timeframe::ALL.map(|tf| self.market.fetch_candles(symbol, tf));
        let results = join_all(fetches).await;

        let mut snapshot = IndicatorSnapshot::new();
        for (timeframe, series) in Timeframe::ALL.into_iter().zip(results) {
            let Some(series) = series else {
                debug!(symbol = %symbol, timeframe = %timeframe, "No candles, skipping symbol");
                return SymbolOutcome::Skipped;
            };
            if !series.has_history_for(self.rsi.period) {
                debug!(symbol = %symbol, timeframe = %timeframe, bars = series.len(), "Not enough history, skipping symbol");
                return SymbolOutcome::Skipped;
            }
            let Some(close) = series.last_close() else {
                return SymbolOutcome::Skipped;
            };
            let rsi = self.rsi.compute(&series.closes());
            snapshot.insert(timeframe, TimeframeReading { rsi, close });
        }

        debug!(
            symbol = %symbol,
            rsi_5m = snapshot.rsi(Timeframe::M5),
            rsi_15m = snapshot.rsi(Timeframe::M15),
            rsi_1h = snapshot.rsi(Timeframe::H1),
            rsi_4h = snapshot.rsi(Timeframe::H4),
            "RSI computed"
        );

        let Some(direction) = self.evaluator.evaluate(&snapshot) else {
            return SymbolOutcome::Quiet;
        };

        let fallback = snapshot.get(Timeframe::M5).map(|r| r.close).unwrap_or_default();
        let last_price = self.market.last_price(symbol).await.unwrap_or(fallback);

        let signal = match Signal::new(symbol.clone(), direction, snapshot, last_price) {
            Ok(signal) => signal,
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Refusing to build signal");
                return SymbolOutcome::Skipped;
            }
        };

        info!(
            symbol = %signal.symbol,
            direction = %signal.direction,
            last_price = signal.last_price,
            signal_id = %signal.id,
            "RSI signal fired"
        );
        let delivered = self.dispatcher.dispatch(&signal).await;
        SymbolOutcome::Alerted { delivered }
    }
}

/// Runs the per-symbol pipeline over a universe in fixed-size batches.
///
/// Pipelines inside a batch run as separate tasks, but at most
/// `max_concurrent` of them hold a permit at any moment.
pub struct BatchScheduler {
    pipeline: Arc<SymbolPipeline>,
    permits: Arc<Semaphore>,
    settings: ScanSettings,
}

impl BatchScheduler {
    pub fn new(pipeline: SymbolPipeline, settings: ScanSettings) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            permits: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            settings,
        }
    }

    pub async fn run_cycle(&self, symbols: &[Symbol]) -> CycleOutcome {
        let mut outcome = CycleOutcome::default();
        let batch_size = self.settings.batch_size.max(1);
        let batches = symbols.len().div_ceil(batch_size);

        for (idx, batch) in symbols.chunks(batch_size).enumerate() {
            debug!(batch = idx + 1, batches, size = batch.len(), "Running batch");
            self.run_batch(batch, &mut outcome).await;

            if idx + 1 < batches {
                tokio::time::sleep(self.settings.batch_pause()).await;
            }
        }

        outcome
    }

    async fn run_batch(&self, batch: &[Symbol], outcome: &mut CycleOutcome) {
        let mut tasks = JoinSet::new();

        for symbol in batch {
            let symbol = symbol.clone();
            let pipeline = self.pipeline.clone();
            let permits = self.permits.clone();

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (symbol, SymbolOutcome::Skipped);
                };
                let result = AssertUnwindSafe(pipeline.run(&symbol)).catch_unwind().await;
                match result {
                    Ok(symbol_outcome) => (symbol, symbol_outcome),
                    Err(_) => {
                        error!(symbol = %symbol, "Symbol pipeline panicked");
                        (symbol, SymbolOutcome::Failed)
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((symbol, symbol_outcome)) => outcome.record(symbol, symbol_outcome),
                Err(e) => {
                    error!(error = %e, "Symbol task did not complete");
                    outcome.failed += 1;
                }
            }
        }
    }
}
