//! Candle series shared by the strategy tests.

use crate::config::DetectionConfig;
use crate::market::{Candle, Timeframe};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

/// Open time of the `index`-th H1 bar.
pub fn bar_time(index: usize) -> DateTime<Utc> {
    t0() + Duration::hours(index as i64)
}

pub fn candle(
    symbol: &str,
    index: usize,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
) -> Candle {
    Candle {
        symbol: symbol.to_string(),
        timeframe: Timeframe::H1,
        open_time: bar_time(index),
        open,
        high,
        low,
        close,
        volume,
    }
}

/// Index of the bearish break-of-structure bar in [`supply_setup`].
pub const BREAK_INDEX: usize = 49;

/// 50 H1 bars ending in a bearish break that leaves a supply block at
/// `[1.1000, 1.1015]`.
///
/// Bars 15 and 30 dip into the zone (two liquidity touches, bar 30 is the
/// last swing low at 1.1008), bar 48 is the bullish origin candle and bar
/// 49 closes at 1.0983 with a body ratio of 0.85 on triple volume.
pub fn supply_setup(symbol: &str) -> Vec<Candle> {
    (0..=BREAK_INDEX)
        .map(|i| match i {
            15 | 30 => candle(
                symbol,
                i,
                dec!(1.1030),
                dec!(1.1035),
                dec!(1.1008),
                dec!(1.1028),
                dec!(100),
            ),
            48 => candle(
                symbol,
                i,
                dec!(1.1003),
                dec!(1.1015),
                dec!(1.1000),
                dec!(1.1010),
                dec!(100),
            ),
            BREAK_INDEX => candle(
                symbol,
                i,
                dec!(1.10085),
                dec!(1.1012),
                dec!(1.0982),
                dec!(1.0983),
                dec!(300),
            ),
            _ => candle(
                symbol,
                i,
                dec!(1.1030),
                dec!(1.1040),
                dec!(1.1025),
                dec!(1.1032),
                dec!(100),
            ),
        })
        .collect()
}

/// Quiet bars after the break that close inside the supply zone.
pub fn retest_bars(symbol: &str, from: usize, count: usize) -> Vec<Candle> {
    (from..from + count)
        .map(|i| {
            candle(
                symbol,
                i,
                dec!(1.1003),
                dec!(1.1010),
                dec!(1.0998),
                dec!(1.1005),
                dec!(100),
            )
        })
        .collect()
}

/// Index of the bullish break in [`demand_break_bars`].
pub const DEMAND_BREAK_INDEX: usize = BREAK_INDEX + 7;

/// Bars 53..=56, to follow [`supply_setup`] plus three [`retest_bars`].
///
/// Bar 53 is a swing high at 1.1013 and bar 54 revisits `[1.0985, 1.1000]`
/// a second time. Bar 55 is the bearish origin candle and bar 56 breaks the
/// swing high, closing at 1.1030: through the supply block and leaving a
/// demand block behind.
pub fn demand_break_bars(symbol: &str) -> Vec<Candle> {
    vec![
        candle(
            symbol,
            BREAK_INDEX + 4,
            dec!(1.1004),
            dec!(1.1013),
            dec!(1.1003),
            dec!(1.1006),
            dec!(100),
        ),
        candle(
            symbol,
            BREAK_INDEX + 5,
            dec!(1.1000),
            dec!(1.1005),
            dec!(1.0990),
            dec!(1.0995),
            dec!(100),
        ),
        candle(
            symbol,
            BREAK_INDEX + 6,
            dec!(1.0998),
            dec!(1.1000),
            dec!(1.0985),
            dec!(1.0988),
            dec!(100),
        ),
        candle(
            symbol,
            DEMAND_BREAK_INDEX,
            dec!(1.0990),
            dec!(1.1032),
            dec!(1.0988),
            dec!(1.1030),
            dec!(300),
        ),
    ]
}

/// Reflect prices around 1.1 so a supply setup becomes a demand setup.
pub fn mirror(candles: &[Candle]) -> Vec<Candle> {
    let axis = dec!(2.2);
    candles
        .iter()
        .map(|c| Candle {
            open: axis - c.open,
            high: axis - c.low,
            low: axis - c.high,
            close: axis - c.close,
            ..c.clone()
        })
        .collect()
}

/// Single H1 timeframe, everything else at defaults.
pub fn detection_config() -> DetectionConfig {
    DetectionConfig {
        timeframes: vec![Timeframe::H1],
        lookback: 60,
        ..DetectionConfig::default()
    }
}

/// `count` H1 bars drifting by `step` per bar with alternating volume.
pub fn trend_series(symbol: &str, count: usize, step: Decimal) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let open = dec!(1.1000) + step * Decimal::from(i as u64);
            let close = open + step * dec!(0.8);
            let (low, high) = (open.min(close), open.max(close));
            let volume = dec!(100) + Decimal::from((i % 5) as u64) * dec!(10);
            candle(
                symbol,
                i,
                open,
                high + dec!(0.0003),
                low - dec!(0.0002),
                close,
                volume,
            )
        })
        .collect()
}
