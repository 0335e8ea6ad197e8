//! Replay engine.
//!
//! Steps simulated time across the loaded candles, runs one scan cycle per
//! step against a look-ahead-free view of the store, then grades the entry
//! signals against the candles that followed them.

use crate::backtest::metrics::{EquityPoint, ReplayMetrics};
use crate::backtest::ReplayConfig;
use crate::config::Config;
use crate::market::{MemoryMarketData, ReplayMarketData, Timeframe};
use crate::strategy::{ScanEngine, Signal, SignalKind};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// How an entry signal played out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TradeOutcome {
    /// Price never traded back to the entry before expiry
    Unfilled,
    Win,
    Loss,
    /// Filled but neither level reached by the end of the data
    Open,
}

#[derive(Debug, Clone, Serialize)]
pub struct GradedSignal {
    pub signal: Signal,
    pub outcome: TradeOutcome,
    pub filled_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    /// +risk_reward for a win, -1 for a loss, 0 otherwise
    pub r_multiple: Decimal,
}

/// Complete result of a replay run.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayResult {
    pub config: Config,
    pub replay_config: ReplayConfig,
    pub metrics: ReplayMetrics,
    pub trades: Vec<GradedSignal>,
    pub equity_curve: Vec<EquityPoint>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub cycles: u64,
}

impl ReplayResult {
    /// Write `replay_result.json` and `trades.csv` into `dir`.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

        let json = serde_json::to_string_pretty(self).context("Failed to serialize result")?;
        std::fs::write(dir.join("replay_result.json"), json)
            .context("Failed to write replay_result.json")?;

        self.trades_to_csv(dir.join("trades.csv"))?;
        info!(dir = %dir.display(), "Replay results written");
        Ok(())
    }

    /// Export graded signals to CSV.
    pub fn trades_to_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path.as_ref())
            .with_context(|| format!("Failed to create {}", path.as_ref().display()))?;
        writeln!(
            file,
            "created_at,symbol,timeframe,kind,entry,stop,target,confidence,outcome,r_multiple"
        )?;

        for trade in &self.trades {
            let s = &trade.signal;
            writeln!(
                file,
                "{},{},{},{},{},{},{},{},{:?},{}",
                s.created_at.to_rfc3339(),
                s.symbol,
                s.timeframe,
                s.kind,
                s.entry_price,
                s.stop_loss,
                s.take_profit,
                s.confidence.round_dp(4),
                trade.outcome,
                trade.r_multiple,
            )?;
        }

        Ok(())
    }

    pub fn summary(&self) -> String {
        format!(
            "{}\n\nReplay Period: {} to {}\nCycles: {}",
            self.metrics.summary(),
            self.start_time.format("%Y-%m-%d %H:%M"),
            self.end_time.format("%Y-%m-%d %H:%M"),
            self.cycles,
        )
    }
}

pub struct ReplayEngine<'a> {
    store: &'a MemoryMarketData,
    config: Config,
    replay_config: ReplayConfig,
}

impl<'a> ReplayEngine<'a> {
    pub fn new(store: &'a MemoryMarketData, config: Config, replay_config: ReplayConfig) -> Self {
        Self {
            store,
            config,
            replay_config,
        }
    }

    /// Simulated time step: configured, else the smallest timeframe in use.
    fn step(&self) -> Duration {
        if let Some(minutes) = self.replay_config.time_step_minutes {
            return Duration::minutes(i64::from(minutes.max(1)));
        }
        self.config
            .detection
            .timeframes
            .iter()
            .chain(std::iter::once(&self.config.scoring.timeframe))
            .min()
            .copied()
            .unwrap_or(Timeframe::H1)
            .duration()
    }

    /// Replay `[start, end]`, defaulting to the full span of the data.
    pub fn run(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<ReplayResult> {
        let (data_start, data_end) = self
            .store
            .time_range()
            .context("No candles loaded for replay")?;
        let start = start.unwrap_or(data_start).max(data_start);
        let end = end.unwrap_or(data_end).min(data_end);
        if start >= end {
            anyhow::bail!("Empty replay window: {} to {}", start, end);
        }

        let step = self.step();
        info!(
            start = %start.format("%Y-%m-%d %H:%M"),
            end = %end.format("%Y-%m-%d %H:%M"),
            step_minutes = step.num_minutes(),
            candles = self.store.len(),
            "Starting replay"
        );

        let mut engine = ScanEngine::new(self.config.clone());
        let mut entries = Vec::new();
        let mut exits = 0usize;
        let mut now = start + step;

        while now <= end {
            let view = ReplayMarketData::new(self.store, now);
            let report = engine.run_cycle(&view, now);
            for signal in report.signals {
                if signal.kind.is_entry() {
                    entries.push(signal);
                } else {
                    exits += 1;
                }
            }

            if engine.cycles() % 100 == 0 {
                debug!(
                    cycle = engine.cycles(),
                    now = %now.format("%Y-%m-%d %H:%M"),
                    entries = entries.len(),
                    "Replay progress"
                );
            }
            now += step;
        }

        let mut trades: Vec<GradedSignal> = entries
            .into_iter()
            .map(|signal| self.grade(signal, end))
            .collect();
        let metrics = ReplayMetrics::calculate(&trades, exits);
        let equity_curve = if self.replay_config.record_equity_curve {
            EquityPoint::curve(&trades)
        } else {
            Vec::new()
        };
        if !self.replay_config.record_trades {
            trades.clear();
        }

        info!(
            cycles = engine.cycles(),
            signals = metrics.signals,
            wins = metrics.wins,
            losses = metrics.losses,
            total_r = %metrics.total_r,
            "Replay complete"
        );

        Ok(ReplayResult {
            config: self.config.clone(),
            replay_config: self.replay_config.clone(),
            metrics,
            trades,
            equity_curve,
            start_time: start,
            end_time: end,
            cycles: engine.cycles(),
        })
    }

    /// Walk the candles after the signal: fill at the entry, then the first
    /// level touched decides. A candle touching both counts as a loss.
    fn grade(&self, signal: Signal, end: DateTime<Utc>) -> GradedSignal {
        let is_buy = signal.kind == SignalKind::BuyEntry;
        let candles = self
            .store
            .series(&signal.symbol, signal.timeframe)
            .iter()
            .filter(|c| c.open_time >= signal.created_at && c.close_time() <= end);

        let mut filled_at = None;
        for candle in candles {
            if filled_at.is_none() {
                if candle.open_time >= signal.expires_at {
                    break;
                }
                let touched = if is_buy {
                    candle.low <= signal.entry_price
                } else {
                    candle.high >= signal.entry_price
                };
                if !touched {
                    continue;
                }
                filled_at = Some(candle.open_time);
            }

            let (stopped, targeted) = if is_buy {
                (
                    candle.low <= signal.stop_loss,
                    candle.high >= signal.take_profit,
                )
            } else {
                (
                    candle.high >= signal.stop_loss,
                    candle.low <= signal.take_profit,
                )
            };

            if stopped || targeted {
                let (outcome, r_multiple) = if stopped {
                    (TradeOutcome::Loss, -Decimal::ONE)
                } else {
                    (TradeOutcome::Win, signal.risk_reward)
                };
                return GradedSignal {
                    signal,
                    outcome,
                    filled_at,
                    closed_at: Some(candle.close_time()),
                    r_multiple,
                };
            }
        }

        let outcome = if filled_at.is_some() {
            TradeOutcome::Open
        } else {
            TradeOutcome::Unfilled
        };
        GradedSignal {
            signal,
            outcome,
            filled_at,
            closed_at: None,
            r_multiple: Decimal::ZERO,
        }
    }
}
