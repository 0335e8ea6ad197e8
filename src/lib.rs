//! # Order Block Scanner
//!
//! Detects institutional order blocks in FX candle data, ranks currency
//! pairs by trading opportunity and turns confirmed blocks into entry and
//! exit signals.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading and validation
//! - `market`: Candles, quotes and the `MarketData` source
//! - `indicators`: ATR and ADX
//! - `strategy`: Order block detection, pair scoring, signals and the scan engine
//! - `backtest`: Historical replay and signal grading
//! - `error`: Error taxonomy of the scanning core
//! - `utils`: Shared decimal arithmetic

pub mod backtest;
pub mod config;
pub mod error;
pub mod indicators;
pub mod market;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use error::ScanError;
