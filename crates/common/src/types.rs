use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Exchange identifier of a perpetual contract, e.g. `SOLUSDT`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bar duration of a candle series. Every scan evaluates all four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [Timeframe::M5, Timeframe::M15, Timeframe::H1, Timeframe::H4];

    /// Interval string understood by the klines endpoint.
    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One OHLCV bar. `open_time` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Candles for one `(symbol, timeframe)`, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeframeSeries {
    timeframe: Timeframe,
    candles: Vec<Candle>,
}

impl TimeframeSeries {
    /// Rejects empty input and any sequence whose open times are not
    /// strictly increasing.
    pub fn new(timeframe: Timeframe, candles: Vec<Candle>) -> Result<Self> {
        if candles.is_empty() {
            return Err(Error::Malformed(format!("empty {timeframe} candle series")));
        }
        if candles.windows(2).any(|w| w[1].open_time <= w[0].open_time) {
            return Err(Error::Malformed(format!(
                "{timeframe} candles are not ordered by open time"
            )));
        }
        Ok(Self { timeframe, candles })
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.candles.last().map(|c| c.close)
    }

    /// True when there are at least `period` price changes to smooth over.
    pub fn has_history_for(&self, period: usize) -> bool {
        self.candles.len() > period
    }
}

/// Indicator value and latest close for one timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeframeReading {
    pub rsi: f64,
    pub close: f64,
}

/// Per-timeframe readings for one symbol at one scan instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    readings: BTreeMap<Timeframe, TimeframeReading>,
}

impl IndicatorSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, timeframe: Timeframe, reading: TimeframeReading) {
        self.readings.insert(timeframe, reading);
    }

    pub fn get(&self, timeframe: Timeframe) -> Option<&TimeframeReading> {
        self.readings.get(&timeframe)
    }

    pub fn rsi(&self, timeframe: Timeframe) -> Option<f64> {
        self.get(timeframe).map(|r| r.rsi)
    }

    pub fn is_complete(&self) -> bool {
        Timeframe::ALL.iter().all(|tf| self.readings.contains_key(tf))
    }

    /// Mean RSI across all four timeframes; `None` for incomplete snapshots.
    pub fn mean_rsi(&self) -> Option<f64> {
        if !self.is_complete() {
            return None;
        }
        let sum: f64 = Timeframe::ALL.iter().filter_map(|&tf| self.rsi(tf)).sum();
        Some(sum / Timeframe::ALL.len() as f64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Timeframe, &TimeframeReading)> {
        self.readings.iter().map(|(tf, r)| (*tf, r))
    }
}

/// Which extreme a snapshot crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    High,
    Low,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::High => write!(f, "high"),
            Direction::Low => write!(f, "low"),
        }
    }
}

/// An accepted snapshot, ready for dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: Symbol,
    pub direction: Direction,
    pub snapshot: IndicatorSnapshot,
    pub last_price: f64,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    /// Fails if the snapshot does not cover every timeframe.
    pub fn new(
        symbol: Symbol,
        direction: Direction,
        snapshot: IndicatorSnapshot,
        last_price: f64,
    ) -> Result<Self> {
        if !snapshot.is_complete() {
            return Err(Error::IncompleteSnapshot(symbol.to_string()));
        }
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol,
            direction,
            snapshot,
            last_price,
            timestamp: Utc::now(),
        })
    }
}

/// Where the scan loop currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    #[default]
    Idle,
    Scanning,
    Sleeping,
    CoolingDown,
    Stopped,
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanState::Idle => write!(f, "idle"),
            ScanState::Scanning => write!(f, "scanning"),
            ScanState::Sleeping => write!(f, "sleeping"),
            ScanState::CoolingDown => write!(f, "cooling down"),
            ScanState::Stopped => write!(f, "stopped"),
        }
    }
}
