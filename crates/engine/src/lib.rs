pub mod binance;
pub mod lifecycle;
pub mod rate_limit;
pub mod scheduler;

pub use binance::BinanceFuturesClient;
pub use lifecycle::{ScanHandle, ScanLoop};
pub use rate_limit::{RateBudget, RateLimiter};
pub use scheduler::{BatchScheduler, CycleOutcome, SymbolOutcome, SymbolPipeline};
