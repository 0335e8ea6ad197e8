//! Historical replay of the scan cycle.
//!
//! This module provides:
//! - A time-stepped replay that feeds the engine only closed candles
//! - Grading of every entry signal against the candles that followed it
//! - Aggregate metrics in R multiples
//!
//! # Example
//!
//! ```rust,ignore
//! use orderblock_scanner::backtest::{ReplayConfig, ReplayEngine};
//! use orderblock_scanner::market::load_csv_candles;
//!
//! let store = load_csv_candles("data/candles.csv")?;
//! let engine = ReplayEngine::new(&store, config, ReplayConfig::default());
//! let result = engine.run(None, None)?;
//! println!("{}", result.summary());
//! ```

mod engine;
mod metrics;

pub use engine::{GradedSignal, ReplayEngine, ReplayResult, TradeOutcome};
pub use metrics::{EquityPoint, ReplayMetrics};

use serde::{Deserialize, Serialize};

/// Configuration for a replay run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Simulated time step in minutes. Defaults to the smallest timeframe
    /// the engine reads.
    pub time_step_minutes: Option<u32>,

    /// Whether to record the cumulative R curve
    pub record_equity_curve: bool,

    /// Whether to keep every graded signal in the result
    pub record_trades: bool,

    /// Directory to write results to (optional)
    pub output_path: Option<String>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            time_step_minutes: None,
            record_equity_curve: true,
            record_trades: true,
            output_path: None,
        }
    }
}
