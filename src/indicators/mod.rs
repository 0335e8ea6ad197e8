//! Technical indicators over candle snapshots.
//!
//! All indicators work on `rust_decimal::Decimal` and take immutable
//! `&[Candle]` slices ordered oldest first.

mod adx;
mod atr;

pub use adx::{adx, AdxIndicator, AdxOutput};
pub use atr::{atr, atr_series, true_range, AtrIndicator};

use crate::market::Candle;
use crate::utils::mean;
use rust_decimal::Decimal;

/// Simple moving average of closes over the last `period` candles.
///
/// Returns `None` when fewer than `period` candles are available.
pub fn sma(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let closes: Vec<Decimal> = candles[candles.len() - period..]
        .iter()
        .map(|c| c.close)
        .collect();
    Some(mean(&closes))
}

/// Mean volume over the whole slice.
pub fn average_volume(candles: &[Candle]) -> Decimal {
    let volumes: Vec<Decimal> = candles.iter().map(|c| c.volume).collect();
    mean(&volumes)
}

/// Mean volume over the last `period` candles (or all, if fewer).
pub fn recent_average_volume(candles: &[Candle], period: usize) -> Decimal {
    let start = candles.len().saturating_sub(period);
    average_volume(&candles[start..])
}
