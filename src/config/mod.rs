//! Configuration management for the order block scanner.
//!
//! Loads settings from an optional config file and environment variables.
//! Components receive their section by value at construction; there is no
//! process-wide configuration.

use crate::error::ScanError;
use crate::market::Timeframe;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Trading pair universe and scan cadence
    #[serde(default)]
    pub pairs: PairsConfig,
    /// Order block detection parameters
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Opportunity scoring parameters
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Signal generation and quality gate
    #[serde(default)]
    pub signals: SignalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairsConfig {
    /// Symbols to scan
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    /// Number of top-ranked pairs analyzed each cycle (1-28)
    #[serde(default = "default_max_concurrent_pairs")]
    pub max_concurrent_pairs: u8,
    /// Seconds between periodic scans (1-60)
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Pip size for symbols without an override
    #[serde(default = "default_pip_size")]
    pub default_pip_size: Decimal,
    /// Per-symbol pip size overrides
    #[serde(default)]
    pub pip_sizes: HashMap<String, Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Timeframes with an independent block catalog each
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<Timeframe>,
    /// Candles pulled per timeframe each cycle (10-200)
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    /// Minimum zone height in pips (5-100)
    #[serde(default = "default_min_block_pips")]
    pub min_block_pips: Decimal,
    /// Closes required inside the boundary before a block is confirmed (1-10)
    #[serde(default = "default_confirmation_bars")]
    pub confirmation_bars: u32,
    /// Body / range ratio a break candle must exceed
    #[serde(default = "default_body_ratio_threshold")]
    pub body_ratio_threshold: Decimal,
    /// Bars on each side of a fractal swing point
    #[serde(default = "default_swing_strength")]
    pub swing_strength: usize,
    /// How far back from the break to look for the origin candle
    #[serde(default = "default_origin_search_bars")]
    pub origin_search_bars: usize,
    /// Tolerance around the zone when counting revisits
    #[serde(default = "default_touch_tolerance_pips")]
    pub touch_tolerance_pips: Decimal,
    /// Revisits required for a liquidity zone
    #[serde(default = "default_min_touches")]
    pub min_touches: u32,
    /// Catalog bound per symbol and timeframe
    #[serde(default = "default_max_blocks_per_timeframe")]
    pub max_blocks_per_timeframe: usize,
    /// ATR period for the zone-size strength factor
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    /// Weight of the formation volume factor in block strength
    #[serde(default = "default_half")]
    pub strength_volume_weight: Decimal,
    /// Weight of the zone size factor in block strength
    #[serde(default = "default_half")]
    pub strength_size_weight: Decimal,
    /// Age decay scale for block strength, in hours
    #[serde(default = "default_decay_hours")]
    pub strength_decay_hours: Decimal,
}

/// Composite score weights. Must sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_volatility_weight")]
    pub volatility: Decimal,
    #[serde(default = "default_momentum_weight")]
    pub momentum: Decimal,
    #[serde(default = "default_trend_weight")]
    pub trend_strength: Decimal,
    #[serde(default = "default_liquidity_weight")]
    pub liquidity: Decimal,
}

impl ScoringWeights {
    pub fn sum(&self) -> Decimal {
        self.volatility + self.momentum + self.trend_strength + self.liquidity
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Timeframe the sub-scores are computed on
    #[serde(default = "default_scoring_timeframe")]
    pub timeframe: Timeframe,
    /// Candles pulled per symbol for scoring
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    #[serde(default)]
    pub weights: ScoringWeights,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    /// Reference moving average for momentum
    #[serde(default = "default_ma_period")]
    pub ma_period: usize,
    #[serde(default = "default_adx_period")]
    pub adx_period: usize,
    /// ATR ratio at which volatility saturates at 1.0
    #[serde(default = "default_volatility_cap")]
    pub volatility_cap: Decimal,
    /// ATR distance from the moving average at which momentum saturates
    #[serde(default = "default_momentum_atr_cap")]
    pub momentum_atr_cap: Decimal,
    /// Bars in the "recent" volume average
    #[serde(default = "default_volume_recent_bars")]
    pub volume_recent_bars: usize,
    /// Spread observations kept per symbol for the typical spread
    #[serde(default = "default_spread_history")]
    pub spread_history: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Quality gate: minimum confidence (0.0-1.0)
    #[serde(default = "default_min_confidence")]
    pub min_confidence: Decimal,
    /// Quality gate and default target multiple
    #[serde(default = "default_min_risk_reward")]
    pub min_risk_reward: Decimal,
    /// Distance beyond the zone for the stop-loss
    #[serde(default = "default_stop_buffer_pips")]
    pub stop_buffer_pips: Decimal,
    /// Added to confidence when another timeframe agrees
    #[serde(default = "default_confluence_bonus")]
    pub confluence_bonus: Decimal,
    /// Age decay scale for confidence, in hours
    #[serde(default = "default_decay_hours")]
    pub confidence_decay_hours: Decimal,
    /// Lifetime of an undelivered or unconsumed signal
    #[serde(default = "default_signal_ttl_minutes")]
    pub signal_ttl_minutes: i64,
    /// Terminal signals retained for lookup
    #[serde(default = "default_max_signal_history")]
    pub max_signal_history: usize,
}

// Default value functions
fn default_symbols() -> Vec<String> {
    [
        "EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "USDCAD", "USDCHF", "NZDUSD", "EURJPY",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_concurrent_pairs() -> u8 {
    5
}

fn default_scan_interval_secs() -> u64 {
    10
}

fn default_pip_size() -> Decimal {
    dec!(0.0001)
}

fn default_timeframes() -> Vec<Timeframe> {
    vec![Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1]
}

fn default_lookback() -> usize {
    100
}

fn default_min_block_pips() -> Decimal {
    dec!(10)
}

fn default_confirmation_bars() -> u32 {
    3
}

fn default_body_ratio_threshold() -> Decimal {
    dec!(0.70)
}

fn default_swing_strength() -> usize {
    2
}

fn default_origin_search_bars() -> usize {
    3
}

fn default_touch_tolerance_pips() -> Decimal {
    dec!(2)
}

fn default_min_touches() -> u32 {
    2
}

fn default_max_blocks_per_timeframe() -> usize {
    50
}

fn default_atr_period() -> usize {
    14
}

fn default_half() -> Decimal {
    dec!(0.5)
}

fn default_decay_hours() -> Decimal {
    dec!(72) // e^-1 after three days
}

fn default_volatility_weight() -> Decimal {
    dec!(0.25)
}

fn default_momentum_weight() -> Decimal {
    dec!(0.30)
}

fn default_trend_weight() -> Decimal {
    dec!(0.25)
}

fn default_liquidity_weight() -> Decimal {
    dec!(0.20)
}

fn default_scoring_timeframe() -> Timeframe {
    Timeframe::H1
}

fn default_ma_period() -> usize {
    20
}

fn default_adx_period() -> usize {
    14
}

fn default_volatility_cap() -> Decimal {
    dec!(2) // ATR at twice its average scores 1.0
}

fn default_momentum_atr_cap() -> Decimal {
    dec!(2)
}

fn default_volume_recent_bars() -> usize {
    5
}

fn default_spread_history() -> usize {
    100
}

fn default_min_confidence() -> Decimal {
    dec!(0.40)
}

fn default_min_risk_reward() -> Decimal {
    dec!(1.5)
}

fn default_stop_buffer_pips() -> Decimal {
    dec!(2)
}

fn default_confluence_bonus() -> Decimal {
    dec!(0.10)
}

fn default_signal_ttl_minutes() -> i64 {
    240
}

fn default_max_signal_history() -> usize {
    500
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Load configuration from a named config file (extension optional)
    /// overlaid with `OBS__SECTION__KEY` environment variables.
    pub fn load_from(name: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(name).required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("OBS")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("pairs.symbols")
                    .with_list_parse_key("detection.timeframes"),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values against their documented ranges.
    pub fn validate(&self) -> Result<(), ScanError> {
        self.pairs.validate()?;
        self.detection.validate()?;
        self.scoring.validate()?;
        self.signals.validate()
    }
}

fn ensure(condition: bool, message: &str) -> Result<(), ScanError> {
    if condition {
        Ok(())
    } else {
        Err(ScanError::InvalidConfiguration(message.to_string()))
    }
}

fn is_unit(value: Decimal) -> bool {
    value >= Decimal::ZERO && value <= Decimal::ONE
}

impl PairsConfig {
    /// Pip size for a symbol: explicit override, then the JPY convention,
    /// then the default.
    pub fn pip_size(&self, symbol: &str) -> Decimal {
        if let Some(pip) = self.pip_sizes.get(symbol) {
            return *pip;
        }
        if symbol.to_uppercase().contains("JPY") {
            dec!(0.01)
        } else {
            self.default_pip_size
        }
    }

    fn validate(&self) -> Result<(), ScanError> {
        ensure(!self.symbols.is_empty(), "pairs.symbols must not be empty")?;
        ensure(
            (1..=28).contains(&self.max_concurrent_pairs),
            "pairs.max_concurrent_pairs must be between 1 and 28",
        )?;
        ensure(
            (1..=60).contains(&self.scan_interval_secs),
            "pairs.scan_interval_secs must be between 1 and 60",
        )?;
        ensure(
            self.default_pip_size > Decimal::ZERO
                && self.pip_sizes.values().all(|p| *p > Decimal::ZERO),
            "pip sizes must be positive",
        )
    }
}

impl DetectionConfig {
    fn validate(&self) -> Result<(), ScanError> {
        ensure(!self.timeframes.is_empty(), "detection.timeframes must not be empty")?;
        ensure(
            (10..=200).contains(&self.lookback),
            "detection.lookback must be between 10 and 200",
        )?;
        ensure(
            self.min_block_pips >= dec!(5) && self.min_block_pips <= dec!(100),
            "detection.min_block_pips must be between 5 and 100",
        )?;
        ensure(
            (1..=10).contains(&self.confirmation_bars),
            "detection.confirmation_bars must be between 1 and 10",
        )?;
        ensure(
            self.body_ratio_threshold > Decimal::ZERO && self.body_ratio_threshold < Decimal::ONE,
            "detection.body_ratio_threshold must be between 0 and 1",
        )?;
        ensure(self.swing_strength >= 1, "detection.swing_strength must be >= 1")?;
        ensure(self.origin_search_bars >= 1, "detection.origin_search_bars must be >= 1")?;
        ensure(
            self.touch_tolerance_pips >= Decimal::ZERO,
            "detection.touch_tolerance_pips must not be negative",
        )?;
        ensure(
            self.max_blocks_per_timeframe >= 1,
            "detection.max_blocks_per_timeframe must be >= 1",
        )?;
        ensure(self.atr_period >= 1, "detection.atr_period must be >= 1")?;
        ensure(
            is_unit(self.strength_volume_weight)
                && is_unit(self.strength_size_weight)
                && self.strength_volume_weight + self.strength_size_weight == Decimal::ONE,
            "detection strength weights must be in [0, 1] and sum to 1",
        )?;
        ensure(
            self.strength_decay_hours > Decimal::ZERO,
            "detection.strength_decay_hours must be positive",
        )
    }
}

impl ScoringConfig {
    fn validate(&self) -> Result<(), ScanError> {
        let w = &self.weights;
        ensure(
            [w.volatility, w.momentum, w.trend_strength, w.liquidity]
                .into_iter()
                .all(is_unit),
            "scoring.weights must each be in [0, 1]",
        )?;
        ensure(
            (w.sum() - Decimal::ONE).abs() <= dec!(0.000001),
            "scoring.weights must sum to 1.0",
        )?;
        ensure(
            (10..=200).contains(&self.lookback),
            "scoring.lookback must be between 10 and 200",
        )?;
        ensure(
            self.atr_period >= 1 && self.ma_period >= 1 && self.adx_period >= 1,
            "scoring indicator periods must be >= 1",
        )?;
        ensure(
            self.volatility_cap > Decimal::ZERO && self.momentum_atr_cap > Decimal::ZERO,
            "scoring caps must be positive",
        )?;
        ensure(
            self.volume_recent_bars >= 1 && self.spread_history >= 1,
            "scoring.volume_recent_bars and scoring.spread_history must be >= 1",
        )
    }
}

impl SignalConfig {
    fn validate(&self) -> Result<(), ScanError> {
        ensure(
            is_unit(self.min_confidence),
            "signals.min_confidence must be between 0 and 1",
        )?;
        ensure(
            self.min_risk_reward > Decimal::ZERO,
            "signals.min_risk_reward must be positive",
        )?;
        ensure(
            self.stop_buffer_pips >= Decimal::ZERO,
            "signals.stop_buffer_pips must not be negative",
        )?;
        ensure(
            is_unit(self.confluence_bonus),
            "signals.confluence_bonus must be between 0 and 1",
        )?;
        ensure(
            self.confidence_decay_hours > Decimal::ZERO,
            "signals.confidence_decay_hours must be positive",
        )?;
        ensure(
            self.signal_ttl_minutes >= 1,
            "signals.signal_ttl_minutes must be >= 1",
        )
    }
}

impl Default for PairsConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            max_concurrent_pairs: default_max_concurrent_pairs(),
            scan_interval_secs: default_scan_interval_secs(),
            default_pip_size: default_pip_size(),
            pip_sizes: HashMap::new(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            timeframes: default_timeframes(),
            lookback: default_lookback(),
            min_block_pips: default_min_block_pips(),
            confirmation_bars: default_confirmation_bars(),
            body_ratio_threshold: default_body_ratio_threshold(),
            swing_strength: default_swing_strength(),
            origin_search_bars: default_origin_search_bars(),
            touch_tolerance_pips: default_touch_tolerance_pips(),
            min_touches: default_min_touches(),
            max_blocks_per_timeframe: default_max_blocks_per_timeframe(),
            atr_period: default_atr_period(),
            strength_volume_weight: default_half(),
            strength_size_weight: default_half(),
            strength_decay_hours: default_decay_hours(),
        }
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            volatility: default_volatility_weight(),
            momentum: default_momentum_weight(),
            trend_strength: default_trend_weight(),
            liquidity: default_liquidity_weight(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            timeframe: default_scoring_timeframe(),
            lookback: default_lookback(),
            weights: ScoringWeights::default(),
            atr_period: default_atr_period(),
            ma_period: default_ma_period(),
            adx_period: default_adx_period(),
            volatility_cap: default_volatility_cap(),
            momentum_atr_cap: default_momentum_atr_cap(),
            volume_recent_bars: default_volume_recent_bars(),
            spread_history: default_spread_history(),
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            min_risk_reward: default_min_risk_reward(),
            stop_buffer_pips: default_stop_buffer_pips(),
            confluence_bonus: default_confluence_bonus(),
            confidence_decay_hours: default_decay_hours(),
            signal_ttl_minutes: default_signal_ttl_minutes(),
            max_signal_history: default_max_signal_history(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        assert_eq!(ScoringWeights::default().sum(), Decimal::ONE);
    }

    #[test]
    fn test_rejects_weights_not_summing_to_one() {
        let mut config = Config::default();
        config.scoring.weights.momentum = dec!(0.40);
        assert!(matches!(
            config.validate(),
            Err(ScanError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_range_bounds() {
        let mut config = Config::default();
        config.detection.lookback = 5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detection.min_block_pips = dec!(150);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detection.confirmation_bars = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pairs.max_concurrent_pairs = 29;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pairs.scan_interval_secs = 61;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pip_size_resolution() {
        let mut pairs = PairsConfig::default();
        assert_eq!(pairs.pip_size("EURUSD"), dec!(0.0001));
        assert_eq!(pairs.pip_size("USDJPY"), dec!(0.01));

        pairs.pip_sizes.insert("XAUUSD".to_string(), dec!(0.1));
        assert_eq!(pairs.pip_size("XAUUSD"), dec!(0.1));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml = r#"
            [pairs]
            symbols = ["EURUSD", "GBPUSD"]
            max_concurrent_pairs = 2

            [signals]
            min_confidence = 0.5
        "#;
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.pairs.symbols.len(), 2);
        assert_eq!(config.pairs.max_concurrent_pairs, 2);
        assert_eq!(config.signals.min_confidence, dec!(0.5));
        assert_eq!(config.signals.min_risk_reward, dec!(1.5));
        assert_eq!(config.detection.confirmation_bars, 3);
        assert!(config.validate().is_ok());
    }
}
