pub mod backoff;
pub mod config;
pub mod error;
pub mod market;
pub mod sink;
pub mod types;

pub use backoff::{Backoff, Growth};
pub use config::{
    AlertSettings, Config, ExchangeSettings, IndicatorSettings, ScanSettings, Settings,
    SignalRules, TelegramTarget,
};
pub use error::{Error, Result};
pub use market::MarketData;
pub use sink::{AlertSink, SinkError};
pub use types::*;
