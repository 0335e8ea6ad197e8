//! Market data source abstraction.
//!
//! The scanning core never fetches data on its own. It borrows a
//! `MarketData` implementation for the duration of a single call and reads
//! immutable candle snapshots from it.

use super::types::{Candle, Quote, Timeframe};

/// Source of candle history and current quotes.
#[cfg_attr(test, mockall::automock)]
pub trait MarketData {
    /// Most recent closed candles, oldest first, at most `count` of them.
    ///
    /// Returns fewer (possibly zero) candles when history is short or the
    /// symbol is unknown.
    fn candles(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Vec<Candle>;

    /// Current bid/ask for a symbol, if one is available.
    fn quote(&self, symbol: &str) -> Option<Quote>;
}
