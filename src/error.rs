//! Error taxonomy for the scanning core.

use crate::market::Timeframe;

/// Errors surfaced by the detector, scorer and configuration layer.
///
/// Quality-gate rejections are not errors; see
/// [`RejectReason`](crate::strategy::RejectReason).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScanError {
    /// Not enough candle history for a symbol/timeframe. Skip and retry next cycle.
    #[error("Data unavailable for {symbol} {timeframe}: have {available} candles, need {required}")]
    DataUnavailable {
        symbol: String,
        timeframe: Timeframe,
        available: usize,
        required: usize,
    },

    /// A parameter is outside its documented range. Fatal at startup.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A normalization denominator was zero. The factor is scored 0.
    #[error("Degenerate {factor} score for {symbol}")]
    ScoringDegenerate { symbol: String, factor: &'static str },
}

impl ScanError {
    /// Whether the error only affects the current cycle for one symbol.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ScanError::InvalidConfiguration(_))
    }
}
