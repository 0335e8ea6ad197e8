//! Multi-factor opportunity scoring and pair ranking.

use super::{degenerate, MIN_CANDLES};
use crate::config::{PairsConfig, ScoringConfig};
use crate::error::ScanError;
use crate::indicators::{adx, atr_series, average_volume, recent_average_volume, sma};
use crate::market::{Candle, MarketData, Quote};
use crate::utils::{checked_ratio, clamp_unit, mean, weighted_average};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::{info, instrument, trace, warn};

/// Why a symbol was left out of the ranking.
#[derive(Debug, Clone, Copy)]
enum Exclusion {
    InsufficientCandles,
    NoQuote,
}

/// One row of the ranked opportunity table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairScore {
    pub symbol: String,
    pub volatility: Decimal,
    pub momentum: Decimal,
    pub trend_strength: Decimal,
    pub liquidity: Decimal,
    pub opportunity_score: Decimal,
    /// 1-based position in the latest ranking
    pub rank: usize,
    pub computed_at: DateTime<Utc>,
}

/// Ranks configured symbols by a weighted blend of volatility, momentum,
/// trend strength and liquidity.
pub struct OpportunityScorer {
    config: ScoringConfig,
    pairs: PairsConfig,
    /// Spreads observed per symbol, newest last
    spread_history: HashMap<String, VecDeque<Decimal>>,
    ranked: Vec<PairScore>,
}

impl OpportunityScorer {
    pub fn new(config: ScoringConfig, pairs: PairsConfig) -> Self {
        Self {
            config,
            pairs,
            spread_history: HashMap::new(),
            ranked: Vec::new(),
        }
    }

    /// Score every configured symbol and replace the ranking.
    ///
    /// Symbols without enough candles or without a quote are excluded from
    /// the table rather than scored zero.
    #[instrument(skip(self, market))]
    pub fn analyze_all_pairs(
        &mut self,
        market: &dyn MarketData,
        now: DateTime<Utc>,
    ) -> Vec<PairScore> {
        let mut excluded_no_candles = 0usize;
        let mut excluded_no_quote = 0usize;
        let mut scores = Vec::with_capacity(self.pairs.symbols.len());

        for symbol in self.pairs.symbols.clone() {
            match self.score_pair(&symbol, market, now) {
                Ok(score) => scores.push(score),
                Err(Exclusion::InsufficientCandles) => excluded_no_candles += 1,
                Err(Exclusion::NoQuote) => excluded_no_quote += 1,
            }
        }

        // Score descending, then symbol ascending for a total order
        scores.sort_by(|a, b| {
            b.opportunity_score
                .cmp(&a.opportunity_score)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        for (i, score) in scores.iter_mut().enumerate() {
            score.rank = i + 1;
        }

        info!(
            total = self.pairs.symbols.len(),
            ranked = scores.len(),
            excluded_no_candles,
            excluded_no_quote,
            best = scores.first().map(|s| s.symbol.as_str()).unwrap_or("-"),
            "Pair ranking complete"
        );

        self.ranked = scores.clone();
        scores
    }

    fn score_pair(
        &mut self,
        symbol: &str,
        market: &dyn MarketData,
        now: DateTime<Utc>,
    ) -> Result<PairScore, Exclusion> {
        let candles = market.candles(symbol, self.config.timeframe, self.config.lookback);
        if candles.len() < MIN_CANDLES {
            let err = ScanError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: self.config.timeframe,
                available: candles.len(),
                required: MIN_CANDLES,
            };
            warn!("{}", err);
            return Err(Exclusion::InsufficientCandles);
        }

        let Some(quote) = market.quote(symbol) else {
            warn!(symbol, "No quote available, excluding from ranking");
            return Err(Exclusion::NoQuote);
        };

        let atr_values = atr_series(&candles, self.config.atr_period);
        let current_atr = atr_values.last().copied().unwrap_or(Decimal::ZERO);

        let volatility = self.volatility(symbol, current_atr, &atr_values);
        let momentum = self.momentum(symbol, &candles, current_atr);
        let trend_strength = clamp_unit(adx(&candles, self.config.adx_period).adx / dec!(100));
        let liquidity = self.liquidity(symbol, &candles, &quote);

        let weights = &self.config.weights;
        let opportunity_score = clamp_unit(weighted_average(&[
            (volatility, weights.volatility),
            (momentum, weights.momentum),
            (trend_strength, weights.trend_strength),
            (liquidity, weights.liquidity),
        ]));

        trace!(
            symbol,
            %volatility,
            %momentum,
            %trend_strength,
            %liquidity,
            %opportunity_score,
            "Pair scored"
        );

        Ok(PairScore {
            symbol: symbol.to_string(),
            volatility,
            momentum,
            trend_strength,
            liquidity,
            opportunity_score,
            rank: 0,
            computed_at: now,
        })
    }

    /// Current ATR relative to its mean over the window.
    fn volatility(&self, symbol: &str, current_atr: Decimal, atr_values: &[Decimal]) -> Decimal {
        match checked_ratio(current_atr, mean(atr_values)) {
            Some(ratio) => clamp_unit(ratio / self.config.volatility_cap),
            None => degenerate(symbol, "volatility"),
        }
    }

    /// Distance of the close from its moving average, in ATRs.
    fn momentum(&self, symbol: &str, candles: &[Candle], current_atr: Decimal) -> Decimal {
        let period = self.config.ma_period.min(candles.len());
        let (Some(average), Some(last)) = (sma(candles, period), candles.last()) else {
            return Decimal::ZERO;
        };
        match checked_ratio((last.close - average).abs(), current_atr) {
            Some(ratio) => clamp_unit(ratio / self.config.momentum_atr_cap),
            None => degenerate(symbol, "momentum"),
        }
    }

    /// Spread tightness against the observed typical spread, times recent
    /// volume participation.
    fn liquidity(&mut self, symbol: &str, candles: &[Candle], quote: &Quote) -> Decimal {
        let spread = quote.spread();
        let history = self.spread_history.entry(symbol.to_string()).or_default();
        history.push_back(spread);
        while history.len() > self.config.spread_history {
            history.pop_front();
        }
        let typical = mean(history.make_contiguous());

        // A zero spread cannot be beaten
        let spread_score = if spread <= Decimal::ZERO {
            Decimal::ONE
        } else {
            clamp_unit(typical / spread)
        };

        let recent = recent_average_volume(candles, self.config.volume_recent_bars);
        let volume_score = match checked_ratio(recent, average_volume(candles)) {
            Some(ratio) => clamp_unit(ratio),
            None => degenerate(symbol, "volume"),
        };

        spread_score * volume_score
    }

    /// Top `max_concurrent_pairs` of the latest ranking.
    pub fn best_pairs(&self) -> &[PairScore] {
        let k = usize::from(self.pairs.max_concurrent_pairs).min(self.ranked.len());
        &self.ranked[..k]
    }

    pub fn ranked_pairs(&self) -> &[PairScore] {
        &self.ranked
    }

    pub fn score(&self, symbol: &str) -> Option<&PairScore> {
        self.ranked.iter().find(|s| s.symbol == symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{MemoryMarketData, MockMarketData, Timeframe};
    use crate::strategy::fixtures::*;

    fn pairs(symbols: &[&str], top: u8) -> PairsConfig {
        PairsConfig {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            max_concurrent_pairs: top,
            ..PairsConfig::default()
        }
    }

    fn scorer(symbols: &[&str], top: u8) -> OpportunityScorer {
        OpportunityScorer::new(ScoringConfig::default(), pairs(symbols, top))
    }

    #[test]
    fn test_identical_scores_rank_by_symbol() {
        let mut market = MemoryMarketData::new();
        market.extend(trend_series("GBPUSD", 60, dec!(0.0004)));
        market.extend(trend_series("EURUSD", 60, dec!(0.0004)));

        let mut scorer = scorer(&["GBPUSD", "EURUSD"], 5);
        let ranked = scorer.analyze_all_pairs(&market, bar_time(60));

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].opportunity_score, ranked[1].opportunity_score);
        assert_eq!(ranked[0].symbol, "EURUSD");
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].symbol, "GBPUSD");
        assert_eq!(ranked[1].rank, 2);
    }

    #[test]
    fn test_scores_are_normalized() {
        let mut market = MemoryMarketData::new();
        market.extend(trend_series("EURUSD", 80, dec!(0.0010)));
        market.extend(trend_series("USDJPY", 80, dec!(0.0001)));
        market.extend(supply_setup("AUDUSD"));

        let mut scorer = scorer(&["EURUSD", "USDJPY", "AUDUSD"], 5);
        let ranked = scorer.analyze_all_pairs(&market, bar_time(80));
        assert_eq!(ranked.len(), 3);

        for score in &ranked {
            for value in [
                score.volatility,
                score.momentum,
                score.trend_strength,
                score.liquidity,
                score.opportunity_score,
            ] {
                assert!(value >= Decimal::ZERO && value <= Decimal::ONE, "{:?}", score);
            }
        }
        for pair in ranked.windows(2) {
            assert!(pair[0].opportunity_score >= pair[1].opportunity_score);
        }
    }

    #[test]
    fn test_strong_trend_outranks_flat_market() {
        let flat: Vec<Candle> = (0..60)
            .map(|i| {
                candle(
                    "USDCHF",
                    i,
                    dec!(0.9000),
                    dec!(0.9010),
                    dec!(0.8990),
                    dec!(0.9000),
                    dec!(100),
                )
            })
            .collect();
        let mut market = MemoryMarketData::new();
        market.extend(flat);
        market.extend(trend_series("EURUSD", 60, dec!(0.0010)));

        let mut scorer = scorer(&["USDCHF", "EURUSD"], 5);
        let ranked = scorer.analyze_all_pairs(&market, bar_time(60));

        assert_eq!(ranked[0].symbol, "EURUSD");
        assert!(ranked[0].trend_strength > dec!(0.9));
        assert_eq!(ranked[1].trend_strength, Decimal::ZERO);
        assert_eq!(ranked[1].momentum, Decimal::ZERO);
    }

    #[test]
    fn test_degenerate_inputs_score_zero_and_stay_ranked() {
        // Zero range and zero volume: every denominator is 0
        let frozen: Vec<Candle> = (0..40)
            .map(|i| {
                candle(
                    "USDCHF",
                    i,
                    dec!(0.9000),
                    dec!(0.9000),
                    dec!(0.9000),
                    dec!(0.9000),
                    Decimal::ZERO,
                )
            })
            .collect();
        let mut market = MemoryMarketData::new();
        market.extend(frozen);
        market.extend(trend_series("EURUSD", 40, dec!(0.0004)));

        let mut both = scorer(&["USDCHF", "EURUSD"], 5);
        let ranked = both.analyze_all_pairs(&market, bar_time(40));
        assert_eq!(ranked.len(), 2);

        let usdchf = both.score("USDCHF").unwrap();
        assert_eq!(usdchf.volatility, Decimal::ZERO);
        assert_eq!(usdchf.momentum, Decimal::ZERO);
        assert_eq!(usdchf.trend_strength, Decimal::ZERO);
        assert_eq!(usdchf.liquidity, Decimal::ZERO);
        assert_eq!(usdchf.opportunity_score, Decimal::ZERO);
        assert_eq!(usdchf.rank, 2);

        // The healthy pair scores as if it were alone
        let mut alone = scorer(&["EURUSD"], 5);
        let expected = alone.analyze_all_pairs(&market, bar_time(40));
        let eurusd = both.score("EURUSD").unwrap();
        assert_eq!(eurusd.rank, 1);
        assert_eq!(eurusd.opportunity_score, expected[0].opportunity_score);
        assert!(eurusd.opportunity_score > Decimal::ZERO);
    }

    #[test]
    fn test_best_pairs_is_bounded() {
        let symbols = ["AUDUSD", "EURUSD", "GBPUSD", "NZDUSD"];
        let mut market = MemoryMarketData::new();
        for (i, symbol) in symbols.iter().enumerate() {
            let step = dec!(0.0002) * Decimal::from(i as u64 + 1);
            market.extend(trend_series(symbol, 60, step));
        }

        let mut scorer = scorer(&symbols, 2);
        scorer.analyze_all_pairs(&market, bar_time(60));

        assert_eq!(scorer.ranked_pairs().len(), 4);
        assert_eq!(scorer.best_pairs().len(), 2);
        assert_eq!(scorer.best_pairs()[0].rank, 1);
        assert_eq!(scorer.best_pairs()[1].rank, 2);
    }

    #[test]
    fn test_symbols_without_data_are_excluded() {
        let series = trend_series("EURUSD", 60, dec!(0.0004));
        let mut market = MockMarketData::new();
        market
            .expect_candles()
            .returning(move |symbol, _, _| match symbol {
                "EURUSD" | "GBPUSD" => series
                    .iter()
                    .cloned()
                    .map(|mut c| {
                        c.symbol = symbol.to_string();
                        c
                    })
                    .collect(),
                _ => Vec::new(),
            });
        market.expect_quote().returning(|symbol| match symbol {
            "EURUSD" => Some(Quote {
                symbol: symbol.to_string(),
                bid: dec!(1.1235),
                ask: dec!(1.1236),
                timestamp: bar_time(60),
            }),
            _ => None,
        });

        let mut scorer = scorer(&["EURUSD", "GBPUSD", "USDJPY"], 5);
        let ranked = scorer.analyze_all_pairs(&market, bar_time(60));

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].symbol, "EURUSD");
        assert!(scorer.score("GBPUSD").is_none());
        assert!(scorer.score("USDJPY").is_none());
    }

    #[test]
    fn test_widening_spread_lowers_liquidity() {
        let mut market = MemoryMarketData::new();
        market.extend(trend_series("EURUSD", 60, dec!(0.0004)));
        let mut scorer = scorer(&["EURUSD"], 1);

        let first = scorer.analyze_all_pairs(&market, bar_time(60));
        market.set_spread("EURUSD", dec!(0.0004));
        let second = scorer.analyze_all_pairs(&market, bar_time(60));

        assert!(second[0].liquidity < first[0].liquidity);
        assert_eq!(scorer.ranked_pairs()[0].liquidity, second[0].liquidity);
    }

    #[test]
    fn test_scoring_timeframe_is_respected() {
        let mut market = MockMarketData::new();
        market
            .expect_candles()
            .withf(|_, tf, _| *tf == Timeframe::H1)
            .returning(|symbol, _, _| trend_series(symbol, 30, dec!(0.0004)));
        market.expect_quote().returning(|_| None);

        let mut scorer = scorer(&["EURUSD"], 1);
        assert!(scorer.analyze_all_pairs(&market, bar_time(30)).is_empty());
    }
}
