//! Order block scanning strategy.
//!
//! - `detector`: order block detection and lifecycle
//! - `scorer`: multi-factor pair ranking
//! - `signals`: quality-gated entry and exit signals
//! - `engine`: the scan cycle tying them together

mod detector;
mod engine;
mod order_block;
mod scorer;
mod signals;

#[cfg(test)]
pub(crate) mod fixtures;

pub use detector::{AnalysisReport, StructureDetector};
pub use engine::{CycleReport, ScanEngine};
pub use order_block::{
    max_block_age, BarOutcome, BlockDirection, BlockState, OrderBlock, MAX_BLOCK_AGE_DAYS,
};
pub use scorer::{OpportunityScorer, PairScore};
pub use signals::{
    RejectReason, Signal, SignalGenerator, SignalKind, SignalStatus, TargetProvider,
};

use crate::error::ScanError;
use rust_decimal::Decimal;
use tracing::warn;

/// Fewest candles a timeframe needs before it is analyzed or scored.
pub const MIN_CANDLES: usize = 10;

/// Log a zero denominator and score the factor 0.
pub(crate) fn degenerate(symbol: &str, factor: &'static str) -> Decimal {
    let err = ScanError::ScoringDegenerate {
        symbol: symbol.to_string(),
        factor,
    };
    warn!("{}", err);
    Decimal::ZERO
}
