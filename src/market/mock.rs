//! In-memory market data for paper trading, replay and tests.

use super::traits::MarketData;
use super::types::{Candle, Quote, Timeframe};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::debug;

/// Candle store keyed by symbol and timeframe, with synthetic quotes
/// derived from the last close.
#[derive(Debug, Clone, Default)]
pub struct MemoryMarketData {
    series: HashMap<(String, Timeframe), Vec<Candle>>,
    /// Absolute spread used to synthesize quotes, per symbol
    spreads: HashMap<String, Decimal>,
    /// Explicit quotes override synthesized ones
    quotes: HashMap<String, Quote>,
}

/// Spread used when none is configured for a symbol (1 pip on a 4-digit pair).
const DEFAULT_SPREAD: Decimal = dec!(0.0001);

impl MemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from an unordered set of candles.
    pub fn from_candles(candles: impl IntoIterator<Item = Candle>) -> Self {
        let mut store = Self::new();
        for candle in candles {
            store.push(candle);
        }
        store.sort();
        store
    }

    /// Append a candle. Call [`Self::sort`] after out-of-order inserts.
    pub fn push(&mut self, candle: Candle) {
        self.series
            .entry((candle.symbol.clone(), candle.timeframe))
            .or_default()
            .push(candle);
    }

    /// Append many candles for one series, keeping it ordered.
    pub fn extend(&mut self, candles: impl IntoIterator<Item = Candle>) {
        for candle in candles {
            self.push(candle);
        }
        self.sort();
    }

    /// Sort every series by open time and drop duplicate timestamps.
    pub fn sort(&mut self) {
        for series in self.series.values_mut() {
            series.sort_by_key(|c| c.open_time);
            series.dedup_by_key(|c| c.open_time);
        }
    }

    /// Set the absolute spread used for synthesized quotes.
    pub fn set_spread(&mut self, symbol: &str, spread: Decimal) {
        self.spreads.insert(symbol.to_string(), spread);
    }

    /// Pin an explicit quote for a symbol.
    pub fn set_quote(&mut self, quote: Quote) {
        self.quotes.insert(quote.symbol.clone(), quote);
    }

    /// All symbols with at least one candle, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.series.keys().map(|(s, _)| s.clone()).collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    /// Full ordered series for a symbol/timeframe.
    pub fn series(&self, symbol: &str, timeframe: Timeframe) -> &[Candle] {
        self.series
            .get(&(symbol.to_string(), timeframe))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Earliest open time and latest close time across all series.
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self
            .series
            .values()
            .filter_map(|s| s.first().map(|c| c.open_time))
            .min()?;
        let end = self
            .series
            .values()
            .filter_map(|s| s.last().map(Candle::close_time))
            .max()?;
        Some((start, end))
    }

    /// Number of candles across all series.
    pub fn len(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Candles closed at or before `cutoff`, most recent `count`.
    pub fn candles_until(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
        cutoff: DateTime<Utc>,
    ) -> Vec<Candle> {
        let series = self.series(symbol, timeframe);
        let end = series.partition_point(|c| c.close_time() <= cutoff);
        let start = end.saturating_sub(count);
        series[start..end].to_vec()
    }

    /// Quote synthesized from the last close at or before `cutoff`.
    pub fn quote_until(&self, symbol: &str, cutoff: Option<DateTime<Utc>>) -> Option<Quote> {
        if let Some(quote) = self.quotes.get(symbol) {
            return Some(quote.clone());
        }

        // Any series works; pick the one with the most recent close.
        let last = self
            .series
            .iter()
            .filter(|((s, _), _)| s == symbol)
            .filter_map(|(_, series)| match cutoff {
                Some(cutoff) => {
                    let end = series.partition_point(|c| c.close_time() <= cutoff);
                    end.checked_sub(1).map(|i| &series[i])
                }
                None => series.last(),
            })
            .max_by_key(|c| c.close_time())?;

        let spread = self.spreads.get(symbol).copied().unwrap_or(DEFAULT_SPREAD);
        let half = spread / Decimal::TWO;
        debug!(symbol, close = %last.close, %spread, "Synthesized quote");

        Some(Quote {
            symbol: symbol.to_string(),
            bid: last.close - half,
            ask: last.close + half,
            timestamp: last.close_time(),
        })
    }
}

impl MarketData for MemoryMarketData {
    fn candles(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Vec<Candle> {
        let series = self.series(symbol, timeframe);
        let start = series.len().saturating_sub(count);
        series[start..].to_vec()
    }

    fn quote(&self, symbol: &str) -> Option<Quote> {
        self.quote_until(symbol, None)
    }
}

/// A view of a [`MemoryMarketData`] that only exposes candles closed at or
/// before a cutoff time. Used to replay history without look-ahead.
#[derive(Debug, Clone, Copy)]
pub struct ReplayMarketData<'a> {
    store: &'a MemoryMarketData,
    cutoff: DateTime<Utc>,
}

impl<'a> ReplayMarketData<'a> {
    pub fn new(store: &'a MemoryMarketData, cutoff: DateTime<Utc>) -> Self {
        Self { store, cutoff }
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }
}

impl MarketData for ReplayMarketData<'_> {
    fn candles(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Vec<Candle> {
        self.store.candles_until(symbol, timeframe, count, self.cutoff)
    }

    fn quote(&self, symbol: &str) -> Option<Quote> {
        self.store.quote_until(symbol, Some(self.cutoff))
    }
}
