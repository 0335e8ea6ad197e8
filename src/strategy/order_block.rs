//! Order block records and their lifecycle state machine.

use crate::market::{Candle, Timeframe};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Blocks older than this are expired and never produce signals.
pub const MAX_BLOCK_AGE_DAYS: i64 = 7;

pub fn max_block_age() -> Duration {
    Duration::days(MAX_BLOCK_AGE_DAYS)
}

/// Which side of the market left the block behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BlockDirection {
    /// Bullish block below price, formed before an upside break
    Demand,
    /// Bearish block above price, formed before a downside break
    Supply,
}

impl BlockDirection {
    pub fn is_bullish(&self) -> bool {
        matches!(self, BlockDirection::Demand)
    }
}

impl fmt::Display for BlockDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockDirection::Demand => write!(f, "demand"),
            BlockDirection::Supply => write!(f, "supply"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BlockState {
    Pending,
    Confirmed,
    Invalidated,
    Expired,
}

impl BlockState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BlockState::Invalidated | BlockState::Expired)
    }

    /// Allowed moves: forward along Pending -> Confirmed -> {Invalidated, Expired}.
    pub fn can_transition_to(&self, next: BlockState) -> bool {
        use BlockState::*;
        matches!(
            (*self, next),
            (Pending, Confirmed)
                | (Pending, Invalidated)
                | (Pending, Expired)
                | (Confirmed, Invalidated)
                | (Confirmed, Expired)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockState::Pending => "PENDING",
            BlockState::Confirmed => "CONFIRMED",
            BlockState::Invalidated => "INVALIDATED",
            BlockState::Expired => "EXPIRED",
        }
    }
}

/// Outcome of feeding one closed candle to a live block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarOutcome {
    /// Nothing changed (terminal block, or a candle at/before creation)
    Ignored,
    /// Counted towards confirmation
    Counted,
    Confirmed,
    Invalidated,
}

/// A detected order block.
#[derive(Debug, Clone, Serialize)]
pub struct OrderBlock {
    pub id: u64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: BlockDirection,
    pub low: Decimal,
    pub high: Decimal,
    /// Open time of the break-of-structure candle
    pub created_at: DateTime<Utc>,
    /// Normalized strength in [0, 1]
    pub strength: Decimal,
    pub confirmation_bars: u32,
    /// Liquidity revisits counted before formation
    pub touch_count: u32,
    pub state: BlockState,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl OrderBlock {
    /// Zone height in price units.
    pub fn height(&self) -> Decimal {
        self.high - self.low
    }

    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Older than the hard age limit.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.age(now) > max_block_age()
    }

    pub fn overlaps(&self, low: Decimal, high: Decimal) -> bool {
        self.low <= high && self.high >= low
    }

    /// The boundary whose full close-through invalidates the block.
    pub fn outer_boundary(&self) -> Decimal {
        match self.direction {
            BlockDirection::Demand => self.low,
            BlockDirection::Supply => self.high,
        }
    }

    /// Whether a close is fully through the outer boundary.
    pub fn is_broken_by(&self, close: Decimal) -> bool {
        match self.direction {
            BlockDirection::Demand => close < self.low,
            BlockDirection::Supply => close > self.high,
        }
    }

    /// Apply a state change if the state machine allows it.
    ///
    /// Returns `false` (and leaves the block untouched) for illegal moves,
    /// which keeps terminal states final.
    pub fn transition(&mut self, next: BlockState, at: DateTime<Utc>) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        match next {
            BlockState::Confirmed => self.confirmed_at = Some(at),
            BlockState::Invalidated | BlockState::Expired => self.closed_at = Some(at),
            BlockState::Pending => {}
        }
        true
    }

    /// Feed one closed candle formed after the block.
    pub fn on_bar(&mut self, candle: &Candle, required_bars: u32) -> BarOutcome {
        if candle.open_time <= self.created_at || self.state.is_terminal() {
            return BarOutcome::Ignored;
        }

        if self.is_broken_by(candle.close) {
            self.transition(BlockState::Invalidated, candle.close_time());
            return BarOutcome::Invalidated;
        }

        if self.state == BlockState::Confirmed {
            return BarOutcome::Ignored;
        }

        self.confirmation_bars += 1;
        if self.confirmation_bars >= required_bars {
            self.transition(BlockState::Confirmed, candle.close_time());
            BarOutcome::Confirmed
        } else {
            BarOutcome::Counted
        }
    }
}
