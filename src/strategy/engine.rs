//! Scan cycle orchestration.
//!
//! The engine owns the detector, scorer and signal generator and drives
//! them in order: rank pairs, analyze the best ones, then refresh signals.

use super::detector::StructureDetector;
use super::scorer::{OpportunityScorer, PairScore};
use super::signals::{Signal, SignalGenerator, TargetProvider};
use crate::config::Config;
use crate::market::MarketData;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

/// Outcome of one scan cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub ranked: usize,
    pub selected: Vec<String>,
    pub analyzed: usize,
    pub failed: usize,
    pub blocks_created: usize,
    pub blocks_confirmed: usize,
    pub signals: Vec<Signal>,
}

pub struct ScanEngine {
    config: Config,
    detector: StructureDetector,
    scorer: OpportunityScorer,
    signals: SignalGenerator,
    cycles: u64,
}

impl ScanEngine {
    /// Build an engine from an already validated configuration.
    pub fn new(config: Config) -> Self {
        let detector = StructureDetector::new(config.detection.clone(), config.pairs.clone());
        let scorer = OpportunityScorer::new(config.scoring.clone(), config.pairs.clone());
        let signals = SignalGenerator::new(config.signals.clone(), config.pairs.clone());
        Self {
            config,
            detector,
            scorer,
            signals,
            cycles: 0,
        }
    }

    pub fn with_target_provider(mut self, provider: Box<dyn TargetProvider>) -> Self {
        self.signals = self.signals.with_target_provider(provider);
        self
    }

    /// Rank all pairs, analyze the top ones and refresh their signals.
    ///
    /// A failure for one symbol is logged and counted; the rest of the
    /// cycle continues.
    #[instrument(skip_all, fields(cycle = self.cycles + 1))]
    pub fn run_cycle(&mut self, market: &dyn MarketData, now: DateTime<Utc>) -> CycleReport {
        self.cycles += 1;
        self.detector.begin_cycle();
        let mut report = CycleReport {
            cycle: self.cycles,
            ..CycleReport::default()
        };

        report.ranked = self.scorer.analyze_all_pairs(market, now).len();
        let selected: Vec<String> = self
            .scorer
            .best_pairs()
            .iter()
            .map(|p| p.symbol.clone())
            .collect();

        for symbol in &selected {
            match self.detector.analyze_symbol(symbol, market, now) {
                Ok(analysis) => {
                    report.analyzed += 1;
                    report.blocks_created += analysis.created;
                    report.blocks_confirmed += analysis.confirmed;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(symbol = %symbol, error = %e, "Symbol analysis failed");
                    continue;
                }
            }

            let needs_signals = self.detector.has_new_order_block(symbol)
                || !self.detector.confirmed_blocks(symbol).is_empty()
                || self.signals.has_open_entries(symbol);
            if !needs_signals {
                continue;
            }

            let Some(quote) = market.quote(symbol) else {
                debug!(symbol = %symbol, "No quote, skipping signal evaluation");
                continue;
            };
            let emitted = self
                .signals
                .process_signal(symbol, &self.detector, quote.mid(), now);
            report.signals.extend(emitted);
        }
        report.selected = selected;

        info!(
            ranked = report.ranked,
            selected = report.selected.len(),
            analyzed = report.analyzed,
            failed = report.failed,
            blocks_created = report.blocks_created,
            blocks_confirmed = report.blocks_confirmed,
            signals = report.signals.len(),
            "Scan cycle complete"
        );

        report
    }

    /// Re-evaluate signals for one symbol against its latest quote without
    /// re-running detection.
    pub fn on_tick(
        &mut self,
        market: &dyn MarketData,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Vec<Signal> {
        match market.quote(symbol) {
            Some(quote) => self
                .signals
                .process_signal(symbol, &self.detector, quote.mid(), now),
            None => {
                debug!(symbol, "No quote on tick");
                Vec::new()
            }
        }
    }

    pub fn best_pairs(&self) -> &[PairScore] {
        self.scorer.best_pairs()
    }

    pub fn ranked_pairs(&self) -> &[PairScore] {
        self.scorer.ranked_pairs()
    }

    pub fn has_new_order_block(&self, symbol: &str) -> bool {
        self.detector.has_new_order_block(symbol)
    }

    /// Active signals for `symbol`, marked as delivered.
    pub fn signals(&mut self, symbol: &str, now: DateTime<Utc>) -> Vec<Signal> {
        self.signals.get_signals(symbol, now)
    }

    pub fn consume_signal(&mut self, signal_id: u64) -> bool {
        self.signals.consume(signal_id)
    }

    pub fn detector(&self) -> &StructureDetector {
        &self.detector
    }

    pub fn signal_generator(&self) -> &SignalGenerator {
        &self.signals
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}
