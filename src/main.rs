use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use trade_seeker::alerts::{
    run_delivery, AlertQueue, AlertSink, FanoutSink, LogSink, TelegramSink, WebhookSink,
};
use trade_seeker::api::binance::{rest, ws};
use trade_seeker::config::{AlertsConfig, Config, ScanPlan, CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH};
use trade_seeker::error::{ScanError, SinkError};
use trade_seeker::logging;
use trade_seeker::scanner::runtime::spawn_sweeper;
use trade_seeker::scanner::{ScannerRuntime, Timeframe};

#[derive(Parser, Debug)]
#[command(name = "trade-seeker", version, about = "Scans Binance USDT pairs for spikes, breakouts and EMA crosses")]
struct Cli {
    /// Path to the YAML configuration
    #[arg(short, long, env = CONFIG_ENV_VAR, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Overrides RUST_LOG (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration, log the resolved scan plan and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let level = match cli.log_level.as_deref() {
        Some(raw) => Some(
            raw.parse::<LevelFilter>()
                .map_err(|_| format!("invalid log level: {}", raw))?,
        ),
        None => None,
    };
    logging::init(level);

    info!(target: "boot", "Starting trade-seeker {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&cli.config)?;
    let plan = config.plan()?;
    info!(target: "cfg", "loaded {}", cli.config.display());
    log_plan(&plan);

    if cli.check {
        println!("{} is valid", cli.config.display());
        return Ok(());
    }

    let timeout = Duration::from_secs(config.alerts.timeout_secs.max(1));
    let symbols = rest::resolve_symbols(&config.symbols, &config.feed.rest_url, timeout).await;
    let timeframes: Vec<Timeframe> = config.timeframes.keys().copied().collect();
    info!(
        target: "boot",
        "scanning {} symbols on {} timeframe(s)",
        symbols.len(),
        timeframes.len()
    );

    let sink = build_sink(&config.alerts, timeout)?;
    let scanner = Arc::new(plan.build_scanner());
    let queue = Arc::new(AlertQueue::new(
        config.alerts.queue_capacity,
        config.alerts.overflow,
    ));

    let delivery = tokio::spawn(run_delivery(queue.clone(), sink));
    let sweeper = spawn_sweeper(
        scanner.clone(),
        Duration::from_secs(config.scanner.sweep_interval_secs),
    );
    let runtime = ScannerRuntime::spawn(
        scanner.clone(),
        queue.clone(),
        config.scanner.shards,
        config.scanner.shard_buffer,
    );

    let (candle_tx, mut candle_rx) = mpsc::channel(config.scanner.feed_buffer.max(1));
    let feeds = ws::spawn_feeds(&config.feed, &symbols, &timeframes, candle_tx);
    info!(target: "feed", "{} feed connection(s) started", feeds.len());

    let router = async {
        while let Some(candle) = candle_rx.recv().await {
            match runtime.try_dispatch(candle) {
                Ok(()) => {}
                Err(e @ ScanError::ShardFull { .. }) => warn!(target: "feed", "{}", e),
                Err(e) => {
                    error!(target: "feed", "{}", e);
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = router => warn!(target: "feed", "all feeds stopped"),
        _ = tokio::signal::ctrl_c() => info!(target: "boot", "shutdown requested"),
    }

    for feed in &feeds {
        feed.abort();
    }
    sweeper.abort();
    runtime.shutdown().await;
    queue.close();
    if let Err(e) = delivery.await {
        error!(target: "sink", "alert delivery task failed: {}", e);
    }

    info!(
        target: "boot",
        "Shutdown complete ({} alert(s) lost to queue overflow)",
        queue.dropped()
    );
    Ok(())
}

fn log_plan(plan: &ScanPlan) {
    let mut timeframes: Vec<_> = plan.windows.iter().collect();
    timeframes.sort_by_key(|(tf, _)| **tf);
    for (tf, spec) in timeframes {
        let rules: Vec<&str> = plan.rules.enabled(*tf).map(|(r, _)| r.as_str()).collect();
        info!(
            target: "cfg",
            "{}: window {} bars, EMA {}/{}/{}, rules [{}]",
            tf,
            spec.capacity,
            spec.trend_period,
            spec.fast_period,
            spec.slow_period,
            rules.join(", ")
        );
    }
    info!(
        target: "cfg",
        "{} tiered symbol(s), notional basis {:?}",
        plan.tiers.symbol_count(),
        plan.notional_basis
    );
}

fn build_sink(config: &AlertsConfig, timeout: Duration) -> Result<Arc<dyn AlertSink>, SinkError> {
    let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::new();

    if config.log {
        sinks.push(Arc::new(LogSink::new(config.prefix.clone())));
    }
    if config.telegram.enabled {
        match TelegramSink::from_env(&config.prefix, timeout) {
            Some(sink) => sinks.push(Arc::new(sink?.with_throttle(config.telegram.throttle()))),
            None => info!(target: "cfg", "telegram credentials not set, telegram alerts off"),
        }
    }
    if let Some(webhook) = &config.webhook {
        sinks.push(Arc::new(WebhookSink::new(webhook.url.clone(), timeout)?));
    }

    if sinks.is_empty() {
        warn!(target: "cfg", "no alert sink configured, falling back to the log");
        sinks.push(Arc::new(LogSink::new(config.prefix.clone())));
    }
    if sinks.len() == 1 {
        return Ok(sinks.remove(0));
    }
    Ok(Arc::new(FanoutSink::new(sinks)))
}
