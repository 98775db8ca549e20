use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use alert::{AlertDispatcher, TelegramSink};
use common::{AlertSink, Config, MarketData};
use engine::{BatchScheduler, BinanceFuturesClient, RateLimiter, ScanLoop, SymbolPipeline};
use strategy::SignalEvaluator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().context("invalid environment configuration")?;
    let settings = cfg.load_settings().context("invalid scanner settings")?;
    info!(
        fapi = %cfg.binance_fapi_url,
        sinks = cfg.telegram_targets.len(),
        rsi_period = settings.indicator.rsi_period,
        "RSI scanner starting"
    );

    // ── Exchange client ───────────────────────────────────────────────────────
    let limiter = Arc::new(RateLimiter::new(
        settings.exchange.max_requests_per_window,
        settings.exchange.window(),
    ));
    let market: Arc<dyn MarketData> = Arc::new(
        BinanceFuturesClient::new(
            cfg.binance_fapi_url.clone(),
            cfg.binance_api_key.clone(),
            limiter,
            settings.exchange.clone(),
        )
        .context("failed to build exchange client")?,
    );

    // ── Alert sinks ───────────────────────────────────────────────────────────
    let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::with_capacity(cfg.telegram_targets.len());
    for target in &cfg.telegram_targets {
        let sink = TelegramSink::new(target, settings.alert.send_timeout())
            .with_context(|| format!("failed to set up {}", target.name))?;
        sinks.push(Arc::new(sink));
    }
    let dispatcher = Arc::new(AlertDispatcher::new(sinks, settings.alert.clone()));

    // ── Scan loop ─────────────────────────────────────────────────────────────
    let pipeline = SymbolPipeline::new(
        market.clone(),
        dispatcher,
        SignalEvaluator::new(settings.rules),
        settings.indicator.rsi_period,
    );
    let scheduler = BatchScheduler::new(pipeline, settings.scan.clone());
    let (scan_loop, handle) = ScanLoop::new(market, scheduler, settings.scan.clone());
    let scan_task = tokio::spawn(scan_loop.run());

    info!("Scanner running. Waiting for shutdown signal.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!(cycles = handle.cycles(), "Shutdown signal received. Stopping scan loop.");
    handle.stop();

    if let Err(e) = scan_task.await {
        warn!(error = %e, "Scan loop ended abnormally");
    }
    info!("Exited cleanly");
    Ok(())
}
