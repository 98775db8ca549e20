use async_trait::async_trait;

use crate::{Symbol, Timeframe, TimeframeSeries};

/// Abstraction over the market-data source.
///
/// `BinanceFuturesClient` implements this against the USDⓈ-M futures REST
/// API. Implementations absorb their own failures: callers only ever see
/// "no data" and decide whether to skip a symbol or a whole cycle.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Tradeable symbols for this cycle, without duplicates. Empty on failure.
    async fn list_symbols(&self) -> Vec<Symbol>;

    /// Recent candles for one timeframe, or `None` once retries are exhausted
    /// or the response was malformed.
    async fn fetch_candles(&self, symbol: &Symbol, timeframe: Timeframe) -> Option<TimeframeSeries>;

    /// Latest traded price.
    async fn last_price(&self, symbol: &Symbol) -> Option<f64>;
}
