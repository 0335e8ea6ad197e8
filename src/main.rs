//! Order Block Scanner - Main Entry Point
//!
//! Runs the scan cycle over candle data loaded from CSV: once, on a timer,
//! or as a historical replay.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use orderblock_scanner::backtest::{ReplayConfig, ReplayEngine};
use orderblock_scanner::config::Config;
use orderblock_scanner::market::{load_csv_candles, ReplayMarketData};
use orderblock_scanner::strategy::{CycleReport, PairScore, ScanEngine, Signal};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Order Block Scanner CLI
#[derive(Parser)]
#[command(name = "orderblock-scanner")]
#[command(version, about = "Order block detection and pair ranking for FX")]
struct Cli {
    /// Config file name (extension optional)
    #[arg(short, long, global = true, default_value = "config")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single scan cycle and print rankings and signals
    Scan {
        /// Path to CSV candle file
        #[arg(short, long)]
        data: String,

        /// Evaluate as of this time (RFC 3339). Defaults to the last candle.
        #[arg(long)]
        at: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Scan periodically, reloading the CSV on every tick
    Watch {
        /// Path to CSV candle file
        #[arg(short, long)]
        data: String,
    },

    /// Replay historical candles and grade the signals produced
    Replay {
        /// Path to CSV candle file
        #[arg(short, long)]
        data: String,

        /// Start date (YYYY-MM-DD)
        #[arg(short, long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(short, long)]
        end: Option<String>,

        /// Output directory for results
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Serialize)]
struct ScanOutput<'a> {
    at: DateTime<Utc>,
    report: &'a CycleReport,
    ranked: &'a [PairScore],
    signals: Vec<Signal>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load_from(&cli.config)?;
    if let Err(e) = config.validate() {
        error!("❌ {}", e);
        return Err(e.into());
    }
    log_config(&config);

    match cli.command {
        Commands::Scan { data, at, json } => run_scan(config, &data, at.as_deref(), json),
        Commands::Watch { data } => run_watch(config, &data).await,
        Commands::Replay {
            data,
            start,
            end,
            output,
        } => run_replay(
            config,
            &data,
            start.as_deref(),
            end.as_deref(),
            output.as_deref(),
        ),
    }
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "orderblock-scanner.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer flushing for the whole run
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("orderblock_scanner=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Symbols: {}", config.pairs.symbols.join(", "));
    info!("   Max Concurrent Pairs: {}", config.pairs.max_concurrent_pairs);
    info!("   Scan Interval: {}s", config.pairs.scan_interval_secs);
    info!(
        "   Timeframes: {}",
        config
            .detection
            .timeframes
            .iter()
            .map(|tf| tf.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!("   Lookback: {} candles", config.detection.lookback);
    info!("   Min Block Size: {} pips", config.detection.min_block_pips);
    info!("   Min Confidence: {}", config.signals.min_confidence);
    info!("   Min Risk/Reward: {}", config.signals.min_risk_reward);
}

fn run_scan(config: Config, data_path: &str, at: Option<&str>, json: bool) -> Result<()> {
    let store = load_csv_candles(data_path)?;
    let (_, data_end) = store
        .time_range()
        .with_context(|| format!("No candles in {}", data_path))?;
    let now = match at {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("Invalid --at timestamp '{}'", raw))?
            .with_timezone(&Utc),
        None => data_end,
    };

    let view = ReplayMarketData::new(&store, now);
    let mut engine = ScanEngine::new(config);
    let report = engine.run_cycle(&view, now);

    let symbols: Vec<String> = report.selected.clone();
    let signals: Vec<Signal> = symbols
        .iter()
        .flat_map(|symbol| engine.signals(symbol, now))
        .collect();

    if json {
        let output = ScanOutput {
            at: now,
            report: &report,
            ranked: engine.ranked_pairs(),
            signals,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("\nScan at {}", now.format("%Y-%m-%d %H:%M UTC"));
    print_rankings(engine.ranked_pairs());
    print_signals(&signals);
    Ok(())
}

async fn run_watch(config: Config, data_path: &str) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║       Order Block Scanner v{} - Watch Mode              ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let interval_secs = config.pairs.scan_interval_secs;
    let mut engine = ScanEngine::new(config);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    while !shutdown.load(Ordering::SeqCst) {
        interval.tick().await;
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let store = match load_csv_candles(data_path) {
            Ok(store) => store,
            Err(e) => {
                warn!("⚠️  Failed to reload {}: {:#}", data_path, e);
                continue;
            }
        };

        let now = Utc::now();
        let report = engine.run_cycle(&store, now);
        for signal in &report.signals {
            info!(
                id = signal.id,
                symbol = %signal.symbol,
                kind = %signal.kind,
                entry = %signal.entry_price,
                stop = %signal.stop_loss,
                target = %signal.take_profit,
                confidence = %signal.confidence,
                "📣 {}",
                signal.reason
            );
        }
    }

    info!("👋 Order Block Scanner shutdown complete");
    Ok(())
}

fn run_replay(
    config: Config,
    data_path: &str,
    start: Option<&str>,
    end: Option<&str>,
    output_dir: Option<&str>,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              REPLAY MODE                                   ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let start = start.map(|s| parse_date(s, false)).transpose()?;
    let end = end.map(|s| parse_date(s, true)).transpose()?;

    info!("📊 Loading data from: {}", data_path);
    let store = load_csv_candles(data_path)?;
    info!("   Symbols: {}", store.symbols().len());
    info!("   Candles: {}", store.len());

    let replay_config = ReplayConfig {
        output_path: output_dir.map(String::from),
        ..ReplayConfig::default()
    };
    let engine = ReplayEngine::new(&store, config, replay_config);
    let result = engine.run(start, end)?;

    println!("\n{}", result.summary());

    if let Some(dir) = output_dir {
        result.write_to(dir)?;
        info!("📁 Results saved to: {}", dir);
    }

    Ok(())
}

/// Parse a `YYYY-MM-DD` date as the start or end of that UTC day.
fn parse_date(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}'", raw))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .with_context(|| format!("Invalid date '{}'", raw))
}

fn print_rankings(pairs: &[PairScore]) {
    println!(
        "\n{:<4} {:<10} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "#", "SYMBOL", "SCORE", "VOL", "MOM", "TREND", "LIQ"
    );
    for pair in pairs {
        println!(
            "{:<4} {:<10} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>8.3}",
            pair.rank,
            pair.symbol,
            pair.opportunity_score,
            pair.volatility,
            pair.momentum,
            pair.trend_strength,
            pair.liquidity,
        );
    }
}

fn print_signals(signals: &[Signal]) {
    if signals.is_empty() {
        println!("\nNo active signals");
        return;
    }
    println!("\nActive signals:");
    for s in signals {
        println!(
            "  [{}] {} {} {} entry {} stop {} target {} conf {:.2} rr {:.2}",
            s.id,
            s.symbol,
            s.timeframe,
            s.kind,
            s.entry_price,
            s.stop_loss,
            s.take_profit,
            s.confidence,
            s.risk_reward,
        );
    }
}
