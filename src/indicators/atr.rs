//! Average True Range.

use crate::market::Candle;
use rust_decimal::Decimal;

/// Average True Range with Wilder smoothing.
#[derive(Debug, Clone)]
pub struct AtrIndicator {
    window: usize,
    prev_close: Option<Decimal>,
    atr_value: Decimal,
    count: usize,
    sum: Decimal,
    warm: bool,
}

impl AtrIndicator {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            prev_close: None,
            atr_value: Decimal::ZERO,
            count: 0,
            sum: Decimal::ZERO,
            warm: false,
        }
    }

    pub fn update(&mut self, high: Decimal, low: Decimal, close: Decimal) -> Decimal {
        let tr = true_range(high, low, self.prev_close);
        self.prev_close = Some(close);

        let window = Decimal::from(self.window as u64);
        if !self.warm {
            self.sum += tr;
            self.count += 1;
            if self.count >= self.window {
                self.atr_value = self.sum / window;
                self.warm = true;
            } else {
                self.atr_value = self.sum / Decimal::from(self.count as u64);
            }
        } else {
            // Wilder smoothing: ATR = (prev_ATR * (N-1) + TR) / N
            self.atr_value = (self.atr_value * (window - Decimal::ONE) + tr) / window;
        }
        self.atr_value
    }

    pub fn value(&self) -> Decimal {
        self.atr_value
    }

    pub fn is_warm(&self) -> bool {
        self.warm
    }
}

/// True range of a bar given the previous close.
pub fn true_range(high: Decimal, low: Decimal, prev_close: Option<Decimal>) -> Decimal {
    match prev_close {
        Some(prev) => (high - low)
            .max((high - prev).abs())
            .max((low - prev).abs()),
        None => high - low,
    }
}

/// ATR value after every candle in the series.
pub fn atr_series(candles: &[Candle], window: usize) -> Vec<Decimal> {
    let mut atr = AtrIndicator::new(window);
    candles
        .iter()
        .map(|c| atr.update(c.high, c.low, c.close))
        .collect()
}

/// ATR at the last candle, `None` for an empty series.
pub fn atr(candles: &[Candle], window: usize) -> Option<Decimal> {
    atr_series(candles, window).last().copied()
}
