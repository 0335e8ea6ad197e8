//! Average Directional Index and directional indicators.

use crate::market::Candle;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// ADX (Average Directional Index) with Wilder smoothing.
///
/// 1. +DM / -DM and true range from consecutive bars
/// 2. Wilder-smooth +DM, -DM and TR over `window` bars
/// 3. +DI, -DI = smoothed DM / smoothed TR * 100
/// 4. DX = |+DI - -DI| / (+DI + -DI) * 100
/// 5. ADX = Wilder-smoothed DX
#[derive(Debug, Clone)]
pub struct AdxIndicator {
    window: usize,
    prev: Option<(Decimal, Decimal, Decimal)>,
    smoothed_plus_dm: Decimal,
    smoothed_minus_dm: Decimal,
    smoothed_tr: Decimal,
    adx_sum: Decimal,
    adx_value: Decimal,
    count: usize,
    dx_count: usize,
    phase: Phase,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    /// Summing the first `window` bars of +DM/-DM/TR.
    Accumulate,
    /// Averaging the first `window` DX values.
    DxAccumulate,
    Warm,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AdxOutput {
    pub adx: Decimal,
    pub plus_di: Decimal,
    pub minus_di: Decimal,
}

impl AdxIndicator {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            prev: None,
            smoothed_plus_dm: Decimal::ZERO,
            smoothed_minus_dm: Decimal::ZERO,
            smoothed_tr: Decimal::ZERO,
            adx_sum: Decimal::ZERO,
            adx_value: Decimal::ZERO,
            count: 0,
            dx_count: 0,
            phase: Phase::Accumulate,
        }
    }

    pub fn update(&mut self, high: Decimal, low: Decimal, close: Decimal) -> AdxOutput {
        let Some(prev) = self.prev.replace((high, low, close)) else {
            return AdxOutput::default();
        };
        let (plus_dm, minus_dm, tr) = directional_movement(prev, high, low);
        let window = Decimal::from(self.window as u64);

        match self.phase {
            Phase::Accumulate => {
                self.smoothed_plus_dm += plus_dm;
                self.smoothed_minus_dm += minus_dm;
                self.smoothed_tr += tr;
                self.count += 1;

                if self.count < self.window {
                    return AdxOutput::default();
                }
                self.phase = Phase::DxAccumulate;
                let (plus_di, minus_di, dx) = self.di_dx();
                self.adx_sum = dx;
                self.dx_count = 1;
                AdxOutput {
                    adx: dx,
                    plus_di,
                    minus_di,
                }
            }
            Phase::DxAccumulate => {
                self.wilder_step(plus_dm, minus_dm, tr, window);
                let (plus_di, minus_di, dx) = self.di_dx();
                self.adx_sum += dx;
                self.dx_count += 1;

                let adx = if self.dx_count >= self.window {
                    self.adx_value = self.adx_sum / window;
                    self.phase = Phase::Warm;
                    self.adx_value
                } else {
                    self.adx_sum / Decimal::from(self.dx_count as u64)
                };
                AdxOutput {
                    adx,
                    plus_di,
                    minus_di,
                }
            }
            Phase::Warm => {
                self.wilder_step(plus_dm, minus_dm, tr, window);
                let (plus_di, minus_di, dx) = self.di_dx();
                self.adx_value = (self.adx_value * (window - Decimal::ONE) + dx) / window;
                AdxOutput {
                    adx: self.adx_value,
                    plus_di,
                    minus_di,
                }
            }
        }
    }

    fn wilder_step(&mut self, plus_dm: Decimal, minus_dm: Decimal, tr: Decimal, window: Decimal) {
        // new = prev - prev/N + current
        self.smoothed_plus_dm = self.smoothed_plus_dm - self.smoothed_plus_dm / window + plus_dm;
        self.smoothed_minus_dm =
            self.smoothed_minus_dm - self.smoothed_minus_dm / window + minus_dm;
        self.smoothed_tr = self.smoothed_tr - self.smoothed_tr / window + tr;
    }

    fn di_dx(&self) -> (Decimal, Decimal, Decimal) {
        if self.smoothed_tr <= Decimal::ZERO {
            return (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO);
        }
        let plus_di = self.smoothed_plus_dm / self.smoothed_tr * dec!(100);
        let minus_di = self.smoothed_minus_dm / self.smoothed_tr * dec!(100);
        let di_sum = plus_di + minus_di;
        let dx = if di_sum > Decimal::ZERO {
            (plus_di - minus_di).abs() / di_sum * dec!(100)
        } else {
            Decimal::ZERO
        };
        (plus_di, minus_di, dx)
    }
}

fn directional_movement(
    (prev_high, prev_low, prev_close): (Decimal, Decimal, Decimal),
    high: Decimal,
    low: Decimal,
) -> (Decimal, Decimal, Decimal) {
    let up_move = high - prev_high;
    let down_move = prev_low - low;

    let plus_dm = if up_move > down_move && up_move > Decimal::ZERO {
        up_move
    } else {
        Decimal::ZERO
    };
    let minus_dm = if down_move > up_move && down_move > Decimal::ZERO {
        down_move
    } else {
        Decimal::ZERO
    };

    let tr = super::atr::true_range(high, low, Some(prev_close));
    (plus_dm, minus_dm, tr)
}

/// ADX at the last candle of the series.
pub fn adx(candles: &[Candle], window: usize) -> AdxOutput {
    let mut indicator = AdxIndicator::new(window);
    candles
        .iter()
        .fold(AdxOutput::default(), |_, c| indicator.update(c.high, c.low, c.close))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_market_has_zero_adx() {
        let mut adx = AdxIndicator::new(5);
        let mut out = AdxOutput::default();
        for _ in 0..30 {
            out = adx.update(dec!(1.1010), dec!(1.1000), dec!(1.1005));
        }
        assert_eq!(out.adx, Decimal::ZERO);
    }

    #[test]
    fn test_steady_uptrend_has_high_adx() {
        let mut adx = AdxIndicator::new(5);
        let mut out = AdxOutput::default();
        for i in 0..40 {
            let base = dec!(1.1000) + Decimal::from(i) * dec!(0.0010);
            out = adx.update(base + dec!(0.0008), base, base + dec!(0.0007));
        }
        assert!(out.adx > dec!(90));
        assert!(out.adx <= dec!(100));
        assert!(out.plus_di > out.minus_di);
    }

    #[test]
    fn test_single_bar_is_zero() {
        let mut adx = AdxIndicator::new(14);
        assert_eq!(adx.update(dec!(2), dec!(1), dec!(1.5)), AdxOutput::default());
    }
}
