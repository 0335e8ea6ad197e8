//! Historical candle import.
//!
//! Expected CSV format:
//! ```csv
//! timestamp,symbol,timeframe,open,high,low,close,volume
//! 2024-01-01T00:00:00Z,EURUSD,H1,1.1000,1.1012,1.0995,1.1008,1520
//! ```

use super::mock::MemoryMarketData;
use super::types::{Candle, Timeframe};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::path::Path;
use tracing::info;

/// Load a CSV candle file into an in-memory store.
pub fn load_csv_candles<P: AsRef<Path>>(path: P) -> Result<MemoryMarketData> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

    let candles = parse_csv_candles(&content)?;
    let store = MemoryMarketData::from_candles(candles);

    info!(
        path = %path.display(),
        candles = store.len(),
        symbols = store.symbols().len(),
        "Loaded candle history"
    );

    Ok(store)
}

/// Parse CSV content into candles (header row optional).
pub fn parse_csv_candles(content: &str) -> Result<Vec<Candle>> {
    let mut candles = Vec::new();

    for (line_num, line) in content.lines().enumerate() {
        if line_num == 0 && line.starts_with("timestamp") {
            continue;
        }

        if line.trim().is_empty() {
            continue;
        }

        let candle = parse_row(line)
            .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;
        candles.push(candle);
    }

    if candles.is_empty() {
        anyhow::bail!("CSV file contains no data rows");
    }

    Ok(candles)
}

fn parse_row(line: &str) -> Result<Candle> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 8 {
        anyhow::bail!(
            "Expected 8 columns (timestamp,symbol,timeframe,open,high,low,close,volume), got {}",
            parts.len()
        );
    }

    let open_time: DateTime<Utc> = parts[0]
        .parse()
        .with_context(|| format!("Invalid timestamp: {}", parts[0]))?;
    let timeframe: Timeframe = parts[2].parse().map_err(anyhow::Error::msg)?;

    let candle = Candle {
        symbol: parts[1].to_string(),
        timeframe,
        open_time,
        open: decimal(parts[3], "open")?,
        high: decimal(parts[4], "high")?,
        low: decimal(parts[5], "low")?,
        close: decimal(parts[6], "close")?,
        volume: decimal(parts[7], "volume")?,
    };

    anyhow::ensure!(
        candle.high >= candle.low
            && candle.high >= candle.open.max(candle.close)
            && candle.low <= candle.open.min(candle.close),
        "Inconsistent OHLC values"
    );

    Ok(candle)
}

fn decimal(value: &str, field: &str) -> Result<Decimal> {
    value
        .parse()
        .with_context(|| format!("Invalid {field}: {value}"))
}
