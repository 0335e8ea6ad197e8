//! Replay performance metrics in R multiples.

use crate::backtest::{GradedSignal, TradeOutcome};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A point on the cumulative R curve, one per closed trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub cumulative_r: Decimal,
    pub drawdown_r: Decimal,
}

impl EquityPoint {
    /// Build the curve from closed trades in closing order.
    pub fn curve(trades: &[GradedSignal]) -> Vec<EquityPoint> {
        let mut closed: Vec<(DateTime<Utc>, Decimal)> = trades
            .iter()
            .filter_map(|t| t.closed_at.map(|at| (at, t.r_multiple)))
            .collect();
        closed.sort_by_key(|(at, _)| *at);

        let mut cumulative = Decimal::ZERO;
        let mut peak = Decimal::ZERO;
        closed
            .into_iter()
            .map(|(timestamp, r)| {
                cumulative += r;
                peak = peak.max(cumulative);
                EquityPoint {
                    timestamp,
                    cumulative_r: cumulative,
                    drawdown_r: peak - cumulative,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayMetrics {
    // Activity
    /// Entry signals emitted
    pub signals: usize,
    /// Exit signals emitted
    pub exits: usize,
    pub filled: usize,
    pub unfilled: usize,
    pub wins: usize,
    pub losses: usize,
    /// Filled but unresolved at the end of the data
    pub open: usize,

    // Performance
    /// Wins / (wins + losses), percent
    pub win_rate: Decimal,
    pub total_r: Decimal,
    /// Mean R per closed trade
    pub average_r: Decimal,
    /// Gross winning R / gross losing R
    pub profit_factor: Decimal,
    /// Largest peak-to-trough fall of cumulative R
    pub max_drawdown_r: Decimal,
    /// Mean confidence of emitted entries
    pub average_confidence: Decimal,
}

impl ReplayMetrics {
    pub fn calculate(trades: &[GradedSignal], exits: usize) -> Self {
        let count = |outcome: TradeOutcome| trades.iter().filter(|t| t.outcome == outcome).count();
        let wins = count(TradeOutcome::Win);
        let losses = count(TradeOutcome::Loss);
        let open = count(TradeOutcome::Open);
        let unfilled = count(TradeOutcome::Unfilled);
        let closed = wins + losses;

        let gross_win: Decimal = trades
            .iter()
            .filter(|t| t.outcome == TradeOutcome::Win)
            .map(|t| t.r_multiple)
            .sum();
        let gross_loss: Decimal = trades
            .iter()
            .filter(|t| t.outcome == TradeOutcome::Loss)
            .map(|t| t.r_multiple.abs())
            .sum();
        let total_r = gross_win - gross_loss;

        let win_rate = if closed > 0 {
            Decimal::from(wins) / Decimal::from(closed) * dec!(100)
        } else {
            Decimal::ZERO
        };
        let average_r = if closed > 0 {
            total_r / Decimal::from(closed)
        } else {
            Decimal::ZERO
        };
        let profit_factor = if gross_loss > Decimal::ZERO {
            gross_win / gross_loss
        } else if gross_win > Decimal::ZERO {
            // No losses: cap instead of reporting infinity
            dec!(100)
        } else {
            Decimal::ZERO
        };

        let max_drawdown_r = EquityPoint::curve(trades)
            .iter()
            .map(|p| p.drawdown_r)
            .max()
            .unwrap_or(Decimal::ZERO);

        let average_confidence = if trades.is_empty() {
            Decimal::ZERO
        } else {
            trades.iter().map(|t| t.signal.confidence).sum::<Decimal>()
                / Decimal::from(trades.len())
        };

        Self {
            signals: trades.len(),
            exits,
            filled: wins + losses + open,
            unfilled,
            wins,
            losses,
            open,
            win_rate,
            total_r,
            average_r,
            profit_factor,
            max_drawdown_r,
            average_confidence,
        }
    }

    /// Format metrics as a summary string.
    pub fn summary(&self) -> String {
        format!(
            r#"═══════════════════════════════════════════════
REPLAY RESULTS
═══════════════════════════════════════════════
SIGNALS
  Entries:           {}
  Exits:             {}
  Avg Confidence:    {:.2}

FILLS
  Filled:            {}
  Unfilled:          {}
  Open:              {}

OUTCOMES
  Wins:              {}
  Losses:            {}
  Win Rate:          {:.1}%

PERFORMANCE
  Total R:           {:.2}
  Average R:         {:.2}
  Profit Factor:     {:.2}
  Max Drawdown:      {:.2}R
═══════════════════════════════════════════════"#,
            self.signals,
            self.exits,
            self.average_confidence,
            self.filled,
            self.unfilled,
            self.open,
            self.wins,
            self.losses,
            self.win_rate,
            self.total_r,
            self.average_r,
            self.profit_factor,
            self.max_drawdown_r,
        )
    }
}
