//! Conversion of confirmed order blocks into quality-gated trade signals.

use super::detector::StructureDetector;
use super::order_block::{BlockDirection, BlockState, OrderBlock};
use crate::config::{PairsConfig, SignalConfig};
use crate::market::Timeframe;
use crate::utils::{clamp_unit, exp_decay, from_pips, safe_div};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SignalKind {
    BuyEntry,
    SellEntry,
    BuyExit,
    SellExit,
}

impl SignalKind {
    pub fn is_entry(&self) -> bool {
        matches!(self, SignalKind::BuyEntry | SignalKind::SellEntry)
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, SignalKind::BuyEntry | SignalKind::BuyExit)
    }

    /// Exit kind closing this entry kind.
    fn exit(&self) -> SignalKind {
        if self.is_buy() {
            SignalKind::BuyExit
        } else {
            SignalKind::SellExit
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SignalKind::BuyEntry => "BUY_ENTRY",
            SignalKind::SellEntry => "SELL_ENTRY",
            SignalKind::BuyExit => "BUY_EXIT",
            SignalKind::SellExit => "SELL_EXIT",
        };
        f.write_str(label)
    }
}

/// Delivery state: Generated -> Delivered -> Consumed | Expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignalStatus {
    Generated,
    Delivered,
    Consumed,
    Expired,
}

impl SignalStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SignalStatus::Generated | SignalStatus::Delivered)
    }
}

/// Why a candidate entry failed the quality gate. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    LowConfidence,
    LowRiskReward,
    BlockTooOld,
    /// Price is on the wrong side of the zone
    NotActionable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub id: u64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub kind: SignalKind,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub confidence: Decimal,
    pub risk_reward: Decimal,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SignalStatus,
    /// Originating block; it may since have been evicted
    pub block_id: u64,
}

impl Signal {
    /// Active and not yet past its expiry time.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && now < self.expires_at
    }
}

/// Supplies a dynamic take-profit level for a new entry.
///
/// Returning `None`, or a level on the wrong side of the entry, falls back
/// to the fixed risk multiple.
#[cfg_attr(test, mockall::automock)]
pub trait TargetProvider: Send {
    fn take_profit(&self, block: &OrderBlock, entry: Decimal, stop: Decimal) -> Option<Decimal>;
}

/// Turns confirmed blocks into entry signals and invalidations into exits.
pub struct SignalGenerator {
    config: SignalConfig,
    pairs: PairsConfig,
    target_provider: Option<Box<dyn TargetProvider>>,
    signals: Vec<Signal>,
    /// (symbol, block id) pairs that already produced an entry
    entered_blocks: HashSet<(String, u64)>,
    /// (symbol, block id) pairs that already produced an exit
    exited_blocks: HashSet<(String, u64)>,
    next_id: u64,
}

impl SignalGenerator {
    pub fn new(config: SignalConfig, pairs: PairsConfig) -> Self {
        Self {
            config,
            pairs,
            target_provider: None,
            signals: Vec::new(),
            entered_blocks: HashSet::new(),
            exited_blocks: HashSet::new(),
            next_id: 1,
        }
    }

    pub fn with_target_provider(mut self, provider: Box<dyn TargetProvider>) -> Self {
        self.target_provider = Some(provider);
        self
    }

    /// Evaluate the blocks of `symbol` at `current_price` and return the
    /// signals emitted by this call.
    #[instrument(skip_all, fields(symbol = %symbol, price = %current_price))]
    pub fn process_signal(
        &mut self,
        symbol: &str,
        detector: &StructureDetector,
        current_price: Decimal,
        now: DateTime<Utc>,
    ) -> Vec<Signal> {
        self.expire_stale(now);

        let mut emitted = self.emit_exits(symbol, detector, current_price, now);

        for block in detector.confirmed_blocks(symbol) {
            let key = (symbol.to_string(), block.id);
            if self.entered_blocks.contains(&key) {
                continue;
            }
            match self.evaluate(block, detector, current_price, now) {
                Ok(signal) => {
                    info!(
                        id = signal.id,
                        kind = %signal.kind,
                        timeframe = %signal.timeframe,
                        entry = %signal.entry_price,
                        stop = %signal.stop_loss,
                        target = %signal.take_profit,
                        confidence = %signal.confidence,
                        risk_reward = %signal.risk_reward,
                        "Signal generated"
                    );
                    self.entered_blocks.insert(key);
                    self.signals.push(signal.clone());
                    emitted.push(signal);
                }
                Err(reason) => {
                    debug!(block_id = block.id, ?reason, "Signal rejected");
                }
            }
        }

        // Forget bookkeeping for blocks the detector no longer tracks
        self.entered_blocks
            .retain(|(s, id)| s != symbol || detector.block(symbol, *id).is_some());
        self.exited_blocks
            .retain(|(s, id)| s != symbol || detector.block(symbol, *id).is_some());
        self.prune();

        emitted
    }

    fn emit_exits(
        &mut self,
        symbol: &str,
        detector: &StructureDetector,
        current_price: Decimal,
        now: DateTime<Utc>,
    ) -> Vec<Signal> {
        let ttl = Duration::minutes(self.config.signal_ttl_minutes);
        let mut exits = Vec::new();

        for entry in self.signals.iter_mut() {
            // Entries that lapsed unused need no exit
            if entry.symbol != symbol
                || !entry.kind.is_entry()
                || entry.status == SignalStatus::Expired
            {
                continue;
            }
            let key = (symbol.to_string(), entry.block_id);
            if self.exited_blocks.contains(&key) {
                continue;
            }
            let invalidated = detector
                .block(symbol, entry.block_id)
                .is_some_and(|b| b.state == BlockState::Invalidated);
            if !invalidated {
                continue;
            }

            if entry.status.is_active() {
                entry.status = SignalStatus::Expired;
            }
            self.exited_blocks.insert(key);

            let exit = Signal {
                id: self.next_id,
                symbol: symbol.to_string(),
                timeframe: entry.timeframe,
                kind: entry.kind.exit(),
                entry_price: entry.entry_price,
                stop_loss: entry.stop_loss,
                take_profit: entry.take_profit,
                confidence: Decimal::ONE,
                risk_reward: entry.risk_reward,
                reason: format!(
                    "{} order block {} invalidated at {}",
                    entry.timeframe, entry.block_id, current_price
                ),
                created_at: now,
                expires_at: now + ttl,
                status: SignalStatus::Generated,
                block_id: entry.block_id,
            };
            self.next_id += 1;
            info!(
                id = exit.id,
                kind = %exit.kind,
                entry_id = entry.id,
                block_id = exit.block_id,
                "Exit signal generated"
            );
            exits.push(exit);
        }

        self.signals.extend(exits.iter().cloned());
        exits
    }

    fn evaluate(
        &mut self,
        block: &OrderBlock,
        detector: &StructureDetector,
        current_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Signal, RejectReason> {
        if block.is_stale(now) {
            return Err(RejectReason::BlockTooOld);
        }

        let buffer = from_pips(self.config.stop_buffer_pips, self.pairs.pip_size(&block.symbol));
        let (kind, entry, stop) = match block.direction {
            BlockDirection::Demand if current_price >= block.high => {
                (SignalKind::BuyEntry, block.high, block.low - buffer)
            }
            BlockDirection::Supply if current_price <= block.low => {
                (SignalKind::SellEntry, block.low, block.high + buffer)
            }
            _ => return Err(RejectReason::NotActionable),
        };

        let risk = (entry - stop).abs();
        let target = self.take_profit(block, kind, entry, stop, risk);
        let risk_reward = safe_div((target - entry).abs(), risk);
        let confidence = self.signal_confidence(block, detector, now);

        if confidence < self.config.min_confidence {
            return Err(RejectReason::LowConfidence);
        }
        if risk_reward < self.config.min_risk_reward {
            return Err(RejectReason::LowRiskReward);
        }

        let signal = Signal {
            id: self.next_id,
            symbol: block.symbol.clone(),
            timeframe: block.timeframe,
            kind,
            entry_price: entry,
            stop_loss: stop,
            take_profit: target,
            confidence,
            risk_reward,
            reason: format!(
                "{} {} order block {}-{} (strength {}, {} touches)",
                block.timeframe,
                block.direction,
                block.low,
                block.high,
                block.strength.round_dp(2),
                block.touch_count
            ),
            created_at: now,
            expires_at: now + Duration::minutes(self.config.signal_ttl_minutes),
            status: SignalStatus::Generated,
            block_id: block.id,
        };
        self.next_id += 1;
        Ok(signal)
    }

    fn take_profit(
        &self,
        block: &OrderBlock,
        kind: SignalKind,
        entry: Decimal,
        stop: Decimal,
        risk: Decimal,
    ) -> Decimal {
        let fixed = if kind.is_buy() {
            entry + risk * self.config.min_risk_reward
        } else {
            entry - risk * self.config.min_risk_reward
        };

        let dynamic = self
            .target_provider
            .as_ref()
            .and_then(|p| p.take_profit(block, entry, stop));
        match dynamic {
            Some(target) if (target > entry) == kind.is_buy() && target != entry => target,
            Some(target) => {
                debug!(%target, %entry, "Ignoring target on the wrong side of entry");
                fixed
            }
            None => fixed,
        }
    }

    /// Block strength decayed by age, plus a bonus when another timeframe
    /// holds a confirmed block in the same direction over the same zone.
    /// Zero once the block is older than the age limit.
    pub fn signal_confidence(
        &self,
        block: &OrderBlock,
        detector: &StructureDetector,
        now: DateTime<Utc>,
    ) -> Decimal {
        if block.is_stale(now) {
            return Decimal::ZERO;
        }
        let age_hours = Decimal::from(block.age(now).num_minutes()) / Decimal::from(60);
        let base = block.strength * exp_decay(age_hours, self.config.confidence_decay_hours);

        let confluence = detector.confirmed_blocks(&block.symbol).iter().any(|other| {
            other.timeframe != block.timeframe
                && other.direction == block.direction
                && other.overlaps(block.low, block.high)
        });
        let bonus = if confluence {
            self.config.confluence_bonus
        } else {
            Decimal::ZERO
        };

        clamp_unit(base + bonus)
    }

    /// Active signals for `symbol`; marks them Delivered.
    pub fn get_signals(&mut self, symbol: &str, now: DateTime<Utc>) -> Vec<Signal> {
        self.expire_stale(now);
        self.signals
            .iter_mut()
            .filter(|s| s.symbol == symbol && s.is_live(now))
            .map(|s| {
                s.status = SignalStatus::Delivered;
                s.clone()
            })
            .collect()
    }

    /// Mark a signal as acted upon. Returns `false` for unknown or
    /// already terminal signals.
    pub fn consume(&mut self, signal_id: u64) -> bool {
        match self
            .signals
            .iter_mut()
            .find(|s| s.id == signal_id && s.status.is_active())
        {
            Some(signal) => {
                signal.status = SignalStatus::Consumed;
                debug!(id = signal_id, "Signal consumed");
                true
            }
            None => false,
        }
    }

    /// Whether `symbol` has entries that may still need an exit.
    pub fn has_open_entries(&self, symbol: &str) -> bool {
        self.signals.iter().any(|s| {
            s.symbol == symbol
                && s.kind.is_entry()
                && s.status != SignalStatus::Expired
                && !self
                    .exited_blocks
                    .contains(&(symbol.to_string(), s.block_id))
        })
    }

    /// Every retained signal of `symbol`, terminal ones included.
    pub fn history(&self, symbol: &str) -> Vec<&Signal> {
        self.signals.iter().filter(|s| s.symbol == symbol).collect()
    }

    pub fn all_signals(&self) -> &[Signal] {
        &self.signals
    }

    fn expire_stale(&mut self, now: DateTime<Utc>) {
        for signal in self.signals.iter_mut() {
            if signal.status.is_active() && now >= signal.expires_at {
                signal.status = SignalStatus::Expired;
                debug!(id = signal.id, symbol = %signal.symbol, "Signal expired");
            }
        }
    }

    /// Drop the oldest terminal signals beyond the history limit.
    fn prune(&mut self) {
        let terminal = self.signals.iter().filter(|s| !s.status.is_active()).count();
        let mut excess = terminal.saturating_sub(self.config.max_signal_history);
        if excess == 0 {
            return;
        }
        self.signals.retain(|s| {
            if excess > 0 && !s.status.is_active() {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::market::{Candle, MemoryMarketData, MockMarketData};
    use crate::strategy::fixtures::*;
    use rust_decimal_macros::dec;

    const SYMBOL: &str = "EURUSD";

    /// Bar index at which the supply block is confirmed.
    const CONFIRM_INDEX: usize = BREAK_INDEX + 4;

    fn confirmed_market() -> MemoryMarketData {
        let mut candles = supply_setup(SYMBOL);
        candles.extend(retest_bars(SYMBOL, BREAK_INDEX + 1, 3));
        MemoryMarketData::from_candles(candles)
    }

    fn confirmed_detector(market: &MemoryMarketData) -> StructureDetector {
        let mut detector = StructureDetector::new(detection_config(), PairsConfig::default());
        detector
            .analyze_symbol(SYMBOL, market, bar_time(CONFIRM_INDEX))
            .unwrap();
        assert_eq!(detector.confirmed_blocks(SYMBOL).len(), 1);
        detector
    }

    fn generator() -> SignalGenerator {
        SignalGenerator::new(SignalConfig::default(), PairsConfig::default())
    }

    #[test]
    fn test_confirmed_supply_block_emits_sell_entry() {
        let market = confirmed_market();
        let detector = confirmed_detector(&market);
        let mut generator = generator();

        let now = bar_time(CONFIRM_INDEX);
        let signals = generator.process_signal(SYMBOL, &detector, dec!(1.0995), now);
        assert_eq!(signals.len(), 1);

        let signal = &signals[0];
        assert_eq!(signal.kind, SignalKind::SellEntry);
        assert_eq!(signal.entry_price, dec!(1.1000));
        assert_eq!(signal.stop_loss, dec!(1.1017));
        assert_eq!(signal.take_profit, dec!(1.09745));
        assert_eq!(signal.risk_reward, dec!(1.5));
        assert!(signal.confidence >= dec!(0.4) && signal.confidence <= Decimal::ONE);
        assert_eq!(signal.status, SignalStatus::Generated);
        assert_eq!(signal.expires_at, now + Duration::minutes(240));
        assert_eq!(signal.block_id, detector.confirmed_blocks(SYMBOL)[0].id);

        // One entry per block
        let again = generator.process_signal(SYMBOL, &detector, dec!(1.0995), now);
        assert!(again.is_empty());
    }

    #[test]
    fn test_price_inside_zone_is_not_actionable() {
        let market = confirmed_market();
        let detector = confirmed_detector(&market);
        let mut generator = generator();

        let now = bar_time(CONFIRM_INDEX);
        assert!(generator
            .process_signal(SYMBOL, &detector, dec!(1.1005), now)
            .is_empty());

        // Becomes actionable once price drops below the zone
        assert_eq!(
            generator
                .process_signal(SYMBOL, &detector, dec!(1.0990), now)
                .len(),
            1
        );
    }

    #[test]
    fn test_low_confidence_is_rejected() {
        let market = confirmed_market();
        let detector = confirmed_detector(&market);
        let config = SignalConfig {
            min_confidence: dec!(0.99),
            ..SignalConfig::default()
        };
        let mut generator = SignalGenerator::new(config, PairsConfig::default());

        let signals =
            generator.process_signal(SYMBOL, &detector, dec!(1.0995), bar_time(CONFIRM_INDEX));
        assert!(signals.is_empty());
    }

    #[test]
    fn test_poor_target_fails_risk_reward_gate() {
        let market = confirmed_market();
        let detector = confirmed_detector(&market);

        let mut provider = MockTargetProvider::new();
        // Reward equal to risk: 1.0R
        provider
            .expect_take_profit()
            .returning(|_, entry, stop| Some(entry - (stop - entry)));
        let mut generator = generator().with_target_provider(Box::new(provider));

        let signals =
            generator.process_signal(SYMBOL, &detector, dec!(1.0995), bar_time(CONFIRM_INDEX));
        assert!(signals.is_empty());
    }

    #[test]
    fn test_dynamic_target_is_used() {
        let market = confirmed_market();
        let detector = confirmed_detector(&market);

        let mut provider = MockTargetProvider::new();
        provider
            .expect_take_profit()
            .returning(|_, _, _| Some(dec!(1.0949)));
        let mut generator = generator().with_target_provider(Box::new(provider));

        let signals =
            generator.process_signal(SYMBOL, &detector, dec!(1.0995), bar_time(CONFIRM_INDEX));
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].take_profit, dec!(1.0949));
        assert_eq!(signals[0].risk_reward, dec!(3));
    }

    #[test]
    fn test_wrong_side_target_falls_back_to_fixed_multiple() {
        let market = confirmed_market();
        let detector = confirmed_detector(&market);

        let mut provider = MockTargetProvider::new();
        provider
            .expect_take_profit()
            .returning(|_, _, _| Some(dec!(1.2000)));
        let mut generator = generator().with_target_provider(Box::new(provider));

        let signals =
            generator.process_signal(SYMBOL, &detector, dec!(1.0995), bar_time(CONFIRM_INDEX));
        assert_eq!(signals[0].take_profit, dec!(1.09745));
    }

    #[test]
    fn test_block_older_than_seven_days_never_signals() {
        let market = confirmed_market();
        let detector = confirmed_detector(&market);
        let mut generator = generator();

        let late = bar_time(BREAK_INDEX) + Duration::days(7) + Duration::hours(1);
        let block = detector.confirmed_blocks(SYMBOL)[0];
        assert_eq!(generator.signal_confidence(block, &detector, late), Decimal::ZERO);
        assert!(generator
            .process_signal(SYMBOL, &detector, dec!(1.0995), late)
            .is_empty());
    }

    #[test]
    fn test_delivery_and_consumption() {
        let market = confirmed_market();
        let detector = confirmed_detector(&market);
        let mut generator = generator();

        let now = bar_time(CONFIRM_INDEX);
        let id = generator.process_signal(SYMBOL, &detector, dec!(1.0995), now)[0].id;

        let delivered = generator.get_signals(SYMBOL, now);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].status, SignalStatus::Delivered);
        assert!(generator.get_signals("GBPUSD", now).is_empty());

        assert!(generator.consume(id));
        assert!(!generator.consume(id));
        assert!(!generator.consume(999));
        assert!(generator.get_signals(SYMBOL, now).is_empty());
        assert_eq!(generator.history(SYMBOL)[0].status, SignalStatus::Consumed);
    }

    #[test]
    fn test_signals_expire_after_ttl() {
        let market = confirmed_market();
        let detector = confirmed_detector(&market);
        let mut generator = generator();

        let now = bar_time(CONFIRM_INDEX);
        let id = generator.process_signal(SYMBOL, &detector, dec!(1.0995), now)[0].id;

        let later = now + Duration::minutes(240);
        assert!(generator.get_signals(SYMBOL, later).is_empty());
        assert_eq!(generator.history(SYMBOL)[0].status, SignalStatus::Expired);
        assert!(!generator.consume(id));
    }

    #[test]
    fn test_invalidation_emits_exit_once() {
        let mut market = confirmed_market();
        let mut detector = confirmed_detector(&market);
        let mut generator = generator();

        let now = bar_time(CONFIRM_INDEX);
        let entry = generator.process_signal(SYMBOL, &detector, dec!(1.0995), now)[0].clone();

        market.push(candle(
            SYMBOL,
            CONFIRM_INDEX,
            dec!(1.1005),
            dec!(1.1030),
            dec!(1.1004),
            dec!(1.1025),
            dec!(100),
        ));
        let later = bar_time(CONFIRM_INDEX + 1);
        detector.analyze_symbol(SYMBOL, &market, later).unwrap();
        assert_eq!(
            detector.block(SYMBOL, entry.block_id).map(|b| b.state),
            Some(BlockState::Invalidated)
        );

        let exits = generator.process_signal(SYMBOL, &detector, dec!(1.1025), later);
        assert_eq!(exits.len(), 1);
        let exit = &exits[0];
        assert_eq!(exit.kind, SignalKind::SellExit);
        assert_eq!(exit.block_id, entry.block_id);
        assert_eq!(exit.entry_price, entry.entry_price);
        assert_eq!(exit.confidence, Decimal::ONE);
        assert!(exit.reason.contains("1.1025"));

        let statuses: Vec<SignalStatus> =
            generator.history(SYMBOL).iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![SignalStatus::Expired, SignalStatus::Generated]);

        assert!(generator
            .process_signal(SYMBOL, &detector, dec!(1.1025), later)
            .is_empty());
    }

    #[test]
    fn test_confluence_adds_bonus() {
        let candles: Vec<Candle> = confirmed_market().series(SYMBOL, Timeframe::H1).to_vec();
        let mut market = MockMarketData::new();
        market
            .expect_candles()
            .returning(move |_, _, _| candles.clone());

        let config = DetectionConfig {
            timeframes: vec![Timeframe::H1, Timeframe::H4],
            ..detection_config()
        };
        let mut multi = StructureDetector::new(config, PairsConfig::default());
        let now = bar_time(CONFIRM_INDEX);
        multi.analyze_symbol(SYMBOL, &market, now).unwrap();
        assert_eq!(multi.confirmed_blocks(SYMBOL).len(), 2);

        let single = confirmed_detector(&confirmed_market());
        let generator = generator();

        let alone = generator.signal_confidence(single.confirmed_blocks(SYMBOL)[0], &single, now);
        let boosted = generator.signal_confidence(multi.confirmed_blocks(SYMBOL)[0], &multi, now);
        assert_eq!(boosted - alone, dec!(0.10));
    }

    #[test]
    fn test_history_is_pruned() {
        let market = confirmed_market();
        let detector = confirmed_detector(&market);
        let config = SignalConfig {
            max_signal_history: 0,
            ..SignalConfig::default()
        };
        let mut generator = SignalGenerator::new(config, PairsConfig::default());

        let now = bar_time(CONFIRM_INDEX);
        let id = generator.process_signal(SYMBOL, &detector, dec!(1.0995), now)[0].id;
        assert!(generator.consume(id));
        assert_eq!(generator.all_signals().len(), 1);

        generator.process_signal(SYMBOL, &detector, dec!(1.0995), now);
        assert!(generator.all_signals().is_empty());
    }
}
