//! Order block detection and lifecycle tracking.
//!
//! Each (symbol, timeframe) pair owns an independent catalog. Candles are
//! streamed through the catalog incrementally: every cycle only the candles
//! newer than the last processed one advance live blocks and are tested as
//! break-of-structure candidates, so re-running a cycle over unchanged data
//! is a no-op.

use super::order_block::{BarOutcome, BlockDirection, BlockState, OrderBlock};
use super::{degenerate, MIN_CANDLES};
use crate::config::{DetectionConfig, PairsConfig};
use crate::error::ScanError;
use crate::indicators::{atr_series, average_volume};
use crate::market::{Candle, MarketData, Timeframe};
use crate::utils::{checked_ratio, clamp_unit, exp_decay, from_pips, to_pips};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, trace, warn};

#[derive(Debug, Clone, Default)]
struct BlockCatalog {
    blocks: Vec<OrderBlock>,
    /// Open time of the newest candle already streamed through
    last_bar: Option<DateTime<Utc>>,
}

impl BlockCatalog {
    /// Drop blocks until the catalog fits `max`: terminal blocks first,
    /// oldest first, then the oldest live blocks.
    ///
    /// Blocks in `retained` are never dropped and do not count against
    /// `max`; they are evicted normally on a later pass.
    fn evict(&mut self, max: usize, retained: &HashSet<u64>) -> usize {
        let limit = max
            + self
                .blocks
                .iter()
                .filter(|b| retained.contains(&b.id))
                .count();
        let mut evicted = 0;
        while self.blocks.len() > limit {
            let oldest = |live: bool| {
                self.blocks
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| b.is_live() == live && !retained.contains(&b.id))
                    .min_by_key(|(_, b)| b.created_at)
                    .map(|(i, _)| i)
            };
            let Some(index) = oldest(false).or_else(|| oldest(true)) else {
                break;
            };
            let block = self.blocks.remove(index);
            trace!(id = block.id, state = block.state.as_str(), "Evicted order block");
            evicted += 1;
        }
        evicted
    }
}

/// Counts produced by one [`StructureDetector::analyze_symbol`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisReport {
    pub symbol: String,
    pub timeframes_analyzed: usize,
    pub timeframes_skipped: Vec<Timeframe>,
    pub created: usize,
    pub confirmed: usize,
    pub invalidated: usize,
    pub expired: usize,
    pub evicted: usize,
}

/// Finds order blocks and drives them through Pending -> Confirmed ->
/// Invalidated/Expired.
pub struct StructureDetector {
    config: DetectionConfig,
    pairs: PairsConfig,
    catalogs: HashMap<(String, Timeframe), BlockCatalog>,
    /// Symbols that confirmed a block during their latest analysis
    new_confirmations: HashSet<String>,
    next_id: u64,
}

impl StructureDetector {
    pub fn new(config: DetectionConfig, pairs: PairsConfig) -> Self {
        Self {
            config,
            pairs,
            catalogs: HashMap::new(),
            new_confirmations: HashSet::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Start a new scan cycle: confirmations reported by earlier cycles are
    /// no longer new, including for symbols this cycle does not analyze.
    pub fn begin_cycle(&mut self) {
        self.new_confirmations.clear();
    }

    /// Analyze every configured timeframe of `symbol`.
    ///
    /// Timeframes with too little history are skipped and logged. The call
    /// only fails when no timeframe could be analyzed at all.
    #[instrument(skip_all, fields(symbol = %symbol))]
    pub fn analyze_symbol(
        &mut self,
        symbol: &str,
        market: &dyn MarketData,
        now: DateTime<Utc>,
    ) -> Result<AnalysisReport, ScanError> {
        self.new_confirmations.remove(symbol);

        let mut report = AnalysisReport {
            symbol: symbol.to_string(),
            ..AnalysisReport::default()
        };
        let mut first_error = None;

        for timeframe in self.config.timeframes.clone() {
            let candles = market.candles(symbol, timeframe, self.config.lookback);
            if candles.len() < MIN_CANDLES {
                let err = ScanError::DataUnavailable {
                    symbol: symbol.to_string(),
                    timeframe,
                    available: candles.len(),
                    required: MIN_CANDLES,
                };
                warn!(%timeframe, "{}", err);
                report.timeframes_skipped.push(timeframe);
                first_error.get_or_insert(err);
                continue;
            }

            // Work on a copy so the stored catalog is replaced in one step.
            let key = (symbol.to_string(), timeframe);
            let mut catalog = self.catalogs.get(&key).cloned().unwrap_or_default();
            self.scan_timeframe(&mut catalog, symbol, timeframe, &candles, now, &mut report);
            self.catalogs.insert(key, catalog);
            report.timeframes_analyzed += 1;
        }

        if report.timeframes_analyzed == 0 {
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        if report.confirmed > 0 {
            self.new_confirmations.insert(symbol.to_string());
        }

        info!(
            analyzed = report.timeframes_analyzed,
            skipped = report.timeframes_skipped.len(),
            created = report.created,
            confirmed = report.confirmed,
            invalidated = report.invalidated,
            expired = report.expired,
            evicted = report.evicted,
            "Structure analysis complete"
        );

        Ok(report)
    }

    fn scan_timeframe(
        &mut self,
        catalog: &mut BlockCatalog,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
        now: DateTime<Utc>,
        report: &mut AnalysisReport,
    ) {
        let pip = self.pairs.pip_size(symbol);
        let atr = atr_series(candles, self.config.atr_period);
        let start = match catalog.last_bar {
            Some(last) => candles.partition_point(|c| c.open_time <= last),
            None => 0,
        };
        // Kept through this pass so the exit can still be emitted
        let mut invalidated = HashSet::new();

        for index in start..candles.len() {
            let candle = &candles[index];
            trace!(%timeframe, open_time = %candle.open_time, "Processing candle");

            for block in catalog.blocks.iter_mut().filter(|b| b.is_live()) {
                match block.on_bar(candle, self.config.confirmation_bars) {
                    BarOutcome::Confirmed => {
                        report.confirmed += 1;
                        info!(
                            id = block.id,
                            %timeframe,
                            direction = %block.direction,
                            low = %block.low,
                            high = %block.high,
                            strength = %block.strength,
                            "Order block confirmed"
                        );
                    }
                    BarOutcome::Invalidated => {
                        report.invalidated += 1;
                        invalidated.insert(block.id);
                        info!(
                            id = block.id,
                            %timeframe,
                            direction = %block.direction,
                            close = %candle.close,
                            "Order block invalidated"
                        );
                    }
                    BarOutcome::Counted | BarOutcome::Ignored => {}
                }
            }

            let candidate = self.detect_at(symbol, timeframe, candles, index, &atr, pip, now);
            if let Some(candidate) = candidate {
                self.admit(catalog, candidate, report);
            }
        }

        if let Some(last) = candles.last() {
            catalog.last_bar = Some(last.open_time);
        }

        for block in catalog.blocks.iter_mut().filter(|b| b.is_live()) {
            if block.is_stale(now) && block.transition(BlockState::Expired, now) {
                report.expired += 1;
                debug!(id = block.id, %timeframe, "Order block expired by age");
            }
        }

        report.evicted += catalog.evict(self.config.max_blocks_per_timeframe, &invalidated);
    }

    /// Test candle `index` as a break of structure and build the block it
    /// leaves behind.
    #[allow(clippy::too_many_arguments)]
    fn detect_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
        index: usize,
        atr: &[Decimal],
        pip: Decimal,
        now: DateTime<Utc>,
    ) -> Option<OrderBlock> {
        let candle = &candles[index];
        if candle.body_ratio() <= self.config.body_ratio_threshold {
            return None;
        }

        let direction = if candle.is_bullish() {
            BlockDirection::Demand
        } else if candle.is_bearish() {
            BlockDirection::Supply
        } else {
            return None;
        };

        let swing = last_swing(candles, index, self.config.swing_strength, direction)?;
        let broke = match direction {
            BlockDirection::Demand => candle.close > swing,
            BlockDirection::Supply => candle.close < swing,
        };
        if !broke {
            return None;
        }

        let origin_index = (index.saturating_sub(self.config.origin_search_bars)..index)
            .rev()
            .find(|&j| match direction {
                BlockDirection::Demand => candles[j].is_bearish(),
                BlockDirection::Supply => candles[j].is_bullish(),
            })?;
        let origin = &candles[origin_index];
        let (low, high) = (origin.low, origin.high);

        let height_pips = to_pips(high - low, pip);
        if height_pips < self.config.min_block_pips {
            debug!(
                %timeframe,
                %direction,
                %height_pips,
                "Break of structure ignored: zone too small"
            );
            return None;
        }

        let tolerance = from_pips(self.config.touch_tolerance_pips, pip);
        let touches =
            count_touch_episodes(&candles[..origin_index], low - tolerance, high + tolerance);
        if touches < self.config.min_touches {
            debug!(
                %timeframe,
                %direction,
                touches,
                required = self.config.min_touches,
                "Break of structure ignored: no liquidity zone"
            );
            return None;
        }

        let strength = self.strength(symbol, candles, index, high - low, atr[index], now);

        Some(OrderBlock {
            id: 0,
            symbol: symbol.to_string(),
            timeframe,
            direction,
            low,
            high,
            created_at: candle.open_time,
            strength,
            confirmation_bars: 0,
            touch_count: touches,
            state: BlockState::Pending,
            confirmed_at: None,
            closed_at: None,
        })
    }

    fn strength(
        &self,
        symbol: &str,
        candles: &[Candle],
        index: usize,
        height: Decimal,
        atr: Decimal,
        now: DateTime<Utc>,
    ) -> Decimal {
        let candle = &candles[index];
        let avg_volume = average_volume(&candles[..index]);

        let volume_score = checked_ratio(candle.volume, avg_volume * Decimal::TWO)
            .map(clamp_unit)
            .unwrap_or_else(|| degenerate(symbol, "volume"));
        let size_score = checked_ratio(height, atr)
            .map(clamp_unit)
            .unwrap_or_else(|| degenerate(symbol, "size"));

        let age_hours = Decimal::from((now - candle.open_time).num_minutes()) / Decimal::from(60);
        let age_factor = exp_decay(age_hours, self.config.strength_decay_hours);

        clamp_unit(
            (self.config.strength_volume_weight * volume_score
                + self.config.strength_size_weight * size_score)
                * age_factor,
        )
    }

    fn admit(
        &mut self,
        catalog: &mut BlockCatalog,
        mut candidate: OrderBlock,
        report: &mut AnalysisReport,
    ) {
        let dominated = catalog.blocks.iter().any(|b| {
            b.is_live()
                && b.overlaps(candidate.low, candidate.high)
                && b.strength >= candidate.strength
        });
        if dominated {
            debug!(
                timeframe = %candidate.timeframe,
                direction = %candidate.direction,
                strength = %candidate.strength,
                "Candidate overlaps a stronger block"
            );
            return;
        }

        for block in catalog.blocks.iter_mut() {
            if block.is_live()
                && block.overlaps(candidate.low, candidate.high)
                && block.transition(BlockState::Expired, candidate.created_at)
            {
                report.expired += 1;
                debug!(id = block.id, "Order block superseded by a stronger zone");
            }
        }

        candidate.id = self.next_id;
        self.next_id += 1;
        info!(
            id = candidate.id,
            timeframe = %candidate.timeframe,
            direction = %candidate.direction,
            low = %candidate.low,
            high = %candidate.high,
            strength = %candidate.strength,
            touches = candidate.touch_count,
            "Order block detected"
        );
        catalog.blocks.push(candidate);
        report.created += 1;
    }

    /// True only if the latest analysis of `symbol` confirmed a block.
    pub fn has_new_order_block(&self, symbol: &str) -> bool {
        self.new_confirmations.contains(symbol)
    }

    /// Catalog for one symbol/timeframe, oldest first.
    pub fn blocks(&self, symbol: &str, timeframe: Timeframe) -> &[OrderBlock] {
        self.catalogs
            .get(&(symbol.to_string(), timeframe))
            .map(|c| c.blocks.as_slice())
            .unwrap_or(&[])
    }

    /// Every tracked block of `symbol` across configured timeframes.
    pub fn all_blocks(&self, symbol: &str) -> Vec<&OrderBlock> {
        self.config
            .timeframes
            .iter()
            .flat_map(|tf| self.blocks(symbol, *tf))
            .collect()
    }

    pub fn confirmed_blocks(&self, symbol: &str) -> Vec<&OrderBlock> {
        self.all_blocks(symbol)
            .into_iter()
            .filter(|b| b.state == BlockState::Confirmed)
            .collect()
    }

    /// Look a block up by id. `None` once it has been evicted.
    pub fn block(&self, symbol: &str, id: u64) -> Option<&OrderBlock> {
        self.all_blocks(symbol).into_iter().find(|b| b.id == id)
    }
}

/// Most recent fractal pivot strictly before `before`: a swing high for a
/// bullish break, a swing low for a bearish one.
fn last_swing(
    candles: &[Candle],
    before: usize,
    strength: usize,
    direction: BlockDirection,
) -> Option<Decimal> {
    let k = strength.max(1);
    if before < 2 * k + 1 {
        return None;
    }

    (k..before - k).rev().find_map(|j| {
        let pivot = &candles[j];
        let mut neighbors = candles[j - k..j].iter().chain(&candles[j + 1..=j + k]);
        match direction {
            BlockDirection::Demand => neighbors
                .all(|c| c.high < pivot.high)
                .then_some(pivot.high),
            BlockDirection::Supply => neighbors.all(|c| c.low > pivot.low).then_some(pivot.low),
        }
    })
}

/// Separate visits to `[low, high]`; consecutive touching candles count once.
fn count_touch_episodes(candles: &[Candle], low: Decimal, high: Decimal) -> u32 {
    let mut episodes = 0;
    let mut inside = false;
    for candle in candles {
        let touching = candle.overlaps(low, high);
        if touching && !inside {
            episodes += 1;
        }
        inside = touching;
    }
    episodes
}
