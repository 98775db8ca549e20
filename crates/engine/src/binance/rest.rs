use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use common::{
    Backoff, Candle, Error, ExchangeSettings, MarketData, Result, Symbol, Timeframe,
    TimeframeSeries,
};

use crate::rate_limit::RateLimiter;

/// Market-data client for Binance USDⓈ-M futures (public endpoints only).
///
/// Every request first takes a slot from the shared [`RateLimiter`] and is
/// followed by a short cool-down to stay clear of exchange-side soft limits.
pub struct BinanceFuturesClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    limiter: Arc<RateLimiter>,
    settings: ExchangeSettings,
}

impl BinanceFuturesClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        limiter: Arc<RateLimiter>,
        settings: ExchangeSettings,
    ) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            limiter,
            settings,
        })
    }

    async fn get_once<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        self.limiter.acquire().await;

        let url = format!("{}{path}", self.base_url);
        let mut request = self.http.get(&url).query(query);
        if let Some(key) = &self.api_key {
            request = request.header("X-MBX-APIKEY", key);
        }

        let resp = request.send().await.map_err(classify)?;
        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or_else(|| self.settings.default_retry_after());
            return Err(Error::RateLimited { retry_after });
        }

        let body = resp.text().await.map_err(classify)?;
        if !status.is_success() {
            return Err(Error::Http { status: status.as_u16(), body });
        }

        let parsed = serde_json::from_str(&body).map_err(|e| Error::Malformed(e.to_string()))?;
        tokio::time::sleep(self.settings.request_cooldown()).await;
        Ok(parsed)
    }

    /// Retries transient failures with linear backoff. Rate-limit responses
    /// are waited out and do not count as attempts.
    async fn get_with_retry<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let backoff = Backoff::linear(self.settings.retry_base_delay(), self.settings.max_retries);
        let mut attempt = 0;

        loop {
            match self.get_once(path, query).await {
                Ok(value) => return Ok(value),
                Err(Error::RateLimited { retry_after }) => {
                    warn!(path, wait = ?retry_after, "Exchange rate limit hit, backing off");
                    tokio::time::sleep(retry_after).await;
                }
                Err(e) if e.is_transient() => match backoff.next_delay(attempt) {
                    Some(delay) => {
                        attempt += 1;
                        warn!(path, attempt, delay = ?delay, error = %e, "Request failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl MarketData for BinanceFuturesClient {
    async fn list_symbols(&self) -> Vec<Symbol> {
        match self.get_once::<ExchangeInfo>("/fapi/v1/exchangeInfo", &[]).await {
            Ok(info) => {
                let symbols = filter_symbols(info, &self.settings);
                info!(count = symbols.len(), quote = %self.settings.quote_asset, "Loaded perpetual symbol universe");
                symbols
            }
            Err(e) => {
                error!(error = %e, "Failed to load exchange symbol list");
                Vec::new()
            }
        }
    }

    async fn fetch_candles(&self, symbol: &Symbol, timeframe: Timeframe) -> Option<TimeframeSeries> {
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", timeframe.as_str().to_string()),
            ("limit", self.settings.kline_limit.to_string()),
        ];

        let rows: Vec<Vec<serde_json::Value>> =
            match self.get_with_retry("/fapi/v1/klines", &query).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(symbol = %symbol, timeframe = %timeframe, error = %e, "Candle fetch failed");
                    return None;
                }
            };

        match parse_klines(timeframe, &rows) {
            Ok(series) => {
                debug!(symbol = %symbol, timeframe = %timeframe, bars = series.len(), "Candles fetched");
                Some(series)
            }
            Err(e) => {
                warn!(symbol = %symbol, timeframe = %timeframe, error = %e, "Discarding malformed candles");
                None
            }
        }
    }

    async fn last_price(&self, symbol: &Symbol) -> Option<f64> {
        let query = [("symbol", symbol.to_string())];
        match self.get_with_retry::<PriceTicker>("/fapi/v1/ticker/price", &query).await {
            Ok(ticker) => ticker.price.parse::<f64>().ok(),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Ticker price lookup failed");
                None
            }
        }
    }
}

fn classify(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout
    } else if err.is_decode() {
        Error::Malformed(err.to_string())
    } else {
        Error::Network(err.to_string())
    }
}

/// Keep live linear perpetuals in the configured quote asset whose base
/// asset is not denylisted. The result is sorted and unique.
fn filter_symbols(info: ExchangeInfo, settings: &ExchangeSettings) -> Vec<Symbol> {
    info.symbols
        .into_iter()
        .filter(|s| s.status == "TRADING")
        .filter(|s| s.contract_type == "PERPETUAL")
        .filter(|s| s.quote_asset == settings.quote_asset)
        .filter(|s| !settings.is_denied(&s.base_asset))
        .map(|s| Symbol::new(s.symbol))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Kline rows are positional arrays:
/// `[openTime, "open", "high", "low", "close", "volume", closeTime, ...]`.
fn parse_klines(timeframe: Timeframe, rows: &[Vec<serde_json::Value>]) -> Result<TimeframeSeries> {
    let candles = rows
        .iter()
        .map(|row| {
            let open_time = row
                .first()
                .and_then(|v| v.as_i64())
                .ok_or_else(|| Error::Malformed("kline row without open time".to_string()))?;
            Ok(Candle {
                open_time,
                open: number_at(row, 1)?,
                high: number_at(row, 2)?,
                low: number_at(row, 3)?,
                close: number_at(row, 4)?,
                volume: number_at(row, 5)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    TimeframeSeries::new(timeframe, candles)
}

fn number_at(row: &[serde_json::Value], idx: usize) -> Result<f64> {
    let value = row
        .get(idx)
        .ok_or_else(|| Error::Malformed(format!("kline row missing field {idx}")))?;
    let parsed = match value {
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        other => other.as_f64(),
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| Error::Malformed(format!("kline field {idx} is not a number: {value}")))
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    status: String,
    #[serde(default)]
    contract_type: String,
    quote_asset: String,
    base_asset: String,
}

#[derive(Deserialize)]
struct PriceTicker {
    price: String,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    const KLINES: &str = r#"[[1,"1.0","1.0","1.0","1.0","5.0"],[2,"1.1","1.1","1.1","1.1","5.0"]]"#;

    #[derive(Clone)]
    struct Reply {
        status: u16,
        retry_after: Option<&'static str>,
        body: &'static str,
    }

    fn reply(status: u16, body: &'static str) -> Reply {
        Reply { status, retry_after: None, body }
    }

    fn throttled(retry_after: &'static str) -> Reply {
        Reply { status: 429, retry_after: Some(retry_after), body: "{}" }
    }

    /// Minimal HTTP server answering the n-th connection with the n-th
    /// scripted reply (the last one repeats). Returns its base URL and a hit
    /// counter.
    async fn stub_server(script: Vec<Reply>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let Reply { status, retry_after, body } =
                    script.get(n).or(script.last()).cloned().unwrap();

                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(k) => request.extend_from_slice(&buf[..k]),
                    }
                }

                let extra = retry_after
                    .map(|secs| format!("retry-after: {secs}\r\n"))
                    .unwrap_or_default();
                let response = format!(
                    "HTTP/1.1 {status} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n{extra}\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}"), hits)
    }

    fn fast_settings() -> ExchangeSettings {
        ExchangeSettings {
            max_retries: 2,
            retry_base_delay_secs: 0,
            request_cooldown_ms: 0,
            default_retry_after_secs: 0,
            ..ExchangeSettings::default()
        }
    }

    fn client(base_url: String, limiter: Arc<RateLimiter>) -> BinanceFuturesClient {
        BinanceFuturesClient::new(base_url, Some("key".into()), limiter, fast_settings()).unwrap()
    }

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(1000, Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_success() {
        let (url, hits) = stub_server(vec![reply(503, "{}"), reply(503, "{}"), reply(200, KLINES)]).await;

        let series = client(url, limiter()).fetch_candles(&Symbol::new("SOLUSDT"), Timeframe::M5).await;

        assert_eq!(series.map(|s| s.len()), Some(2));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_stop_at_the_ceiling() {
        let (url, hits) = stub_server(vec![reply(503, "{}")]).await;

        let series = client(url, limiter()).fetch_candles(&Symbol::new("SOLUSDT"), Timeframe::H1).await;

        assert!(series.is_none());
        // first attempt plus max_retries
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rate_limit_responses_do_not_use_up_retries() {
        let mut script = vec![throttled("0"); 4];
        script.push(reply(200, KLINES));
        let (url, hits) = stub_server(script).await;
        let limiter = limiter();

        let series = client(url, limiter.clone())
            .fetch_candles(&Symbol::new("SOLUSDT"), Timeframe::M15)
            .await;

        assert!(series.is_some());
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        // every attempt, throttled or not, went through the limiter
        assert_eq!(limiter.budget().await.request_count, 5);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (url, hits) = stub_server(vec![reply(400, r#"{"code":-1121,"msg":"Invalid symbol."}"#)]).await;

        let series = client(url, limiter()).fetch_candles(&Symbol::new("NOPEUSDT"), Timeframe::H4).await;

        assert!(series.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ticker_price_waits_out_rate_limit() {
        let (url, hits) = stub_server(vec![
            throttled("0"),
            reply(200, r#"{"symbol":"SOLUSDT","price":"142.35100","time":1}"#),
        ])
        .await;

        let price = client(url, limiter()).last_price(&Symbol::new("SOLUSDT")).await;

        assert_eq!(price, Some(142.351));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn universe_failure_yields_empty_list() {
        let (url, hits) = stub_server(vec![reply(503, "{}")]).await;

        let symbols = client(url, limiter()).list_symbols().await;

        assert!(symbols.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    fn exchange_info() -> ExchangeInfo {
        serde_json::from_value(json!({
            "symbols": [
                {"symbol": "SOLUSDT", "status": "TRADING", "contractType": "PERPETUAL", "quoteAsset": "USDT", "baseAsset": "SOL"},
                {"symbol": "BTCUSDT", "status": "TRADING", "contractType": "PERPETUAL", "quoteAsset": "USDT", "baseAsset": "BTC"},
                {"symbol": "USDCUSDT", "status": "TRADING", "contractType": "PERPETUAL", "quoteAsset": "USDT", "baseAsset": "USDC"},
                {"symbol": "ETHUSDT_250926", "status": "TRADING", "contractType": "CURRENT_QUARTER", "quoteAsset": "USDT", "baseAsset": "ETH"},
                {"symbol": "DOGEUSDT", "status": "SETTLING", "contractType": "PERPETUAL", "quoteAsset": "USDT", "baseAsset": "DOGE"},
                {"symbol": "SOLUSDC", "status": "TRADING", "contractType": "PERPETUAL", "quoteAsset": "USDC", "baseAsset": "SOL"},
                {"symbol": "ADAUSDT", "status": "TRADING", "contractType": "PERPETUAL", "quoteAsset": "USDT", "baseAsset": "ADA"},
                {"symbol": "ADAUSDT", "status": "TRADING", "contractType": "PERPETUAL", "quoteAsset": "USDT", "baseAsset": "ADA"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn universe_keeps_only_live_usdt_perpetuals() {
        let symbols = filter_symbols(exchange_info(), &ExchangeSettings::default());
        let names: Vec<&str> = symbols.iter().map(Symbol::as_str).collect();
        assert_eq!(names, vec!["ADAUSDT", "SOLUSDT"]);
    }

    #[test]
    fn klines_parse_string_prices() {
        let rows: Vec<Vec<serde_json::Value>> = serde_json::from_value(json!([
            [1_700_000_000_000i64, "1.0", "1.5", "0.9", "1.2", "100.0", 1_700_000_299_999i64, "120.0", 10, "50", "60", "0"],
            [1_700_000_300_000i64, "1.2", "1.3", "1.1", "1.25", "80.0", 1_700_000_599_999i64, "100.0", 8, "40", "50", "0"]
        ]))
        .unwrap();

        let series = parse_klines(Timeframe::M5, &rows).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.closes(), vec![1.2, 1.25]);
        assert_eq!(series.candles()[0].high, 1.5);
    }

    #[test]
    fn klines_with_garbage_are_malformed() {
        let rows: Vec<Vec<serde_json::Value>> =
            serde_json::from_value(json!([[1i64, "1.0", "x", "0.9", "1.2", "100.0"]])).unwrap();
        assert!(matches!(parse_klines(Timeframe::H1, &rows), Err(Error::Malformed(_))));
    }

    #[test]
    fn klines_out_of_order_are_malformed() {
        let rows: Vec<Vec<serde_json::Value>> = serde_json::from_value(json!([
            [2i64, "1", "1", "1", "1", "1"],
            [1i64, "1", "1", "1", "1", "1"]
        ]))
        .unwrap();
        assert!(parse_klines(Timeframe::H4, &rows).is_err());
    }

    #[test]
    fn empty_klines_are_malformed() {
        assert!(parse_klines(Timeframe::M15, &[]).is_err());
    }
}
