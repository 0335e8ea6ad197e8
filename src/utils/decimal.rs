//! Decimal arithmetic utilities for price and score calculations.

use rust_decimal::{Decimal, MathematicalOps};

/// Safe division that returns `None` if the divisor is zero.
pub fn checked_ratio(numerator: Decimal, denominator: Decimal) -> Option<Decimal> {
    if denominator == Decimal::ZERO {
        None
    } else {
        numerator.checked_div(denominator)
    }
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    checked_ratio(numerator, denominator).unwrap_or(Decimal::ZERO)
}

/// Clamp a value into `[0, 1]`.
pub fn clamp_unit(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO).min(Decimal::ONE)
}

/// Convert a price distance to pips.
pub fn to_pips(distance: Decimal, pip_size: Decimal) -> Decimal {
    safe_div(distance, pip_size)
}

/// Convert pips to a price distance.
pub fn from_pips(pips: Decimal, pip_size: Decimal) -> Decimal {
    pips * pip_size
}

/// `exp(-elapsed / scale)`, in `[0, 1]`. Zero scale means no decay.
pub fn exp_decay(elapsed: Decimal, scale: Decimal) -> Decimal {
    if scale <= Decimal::ZERO || elapsed <= Decimal::ZERO {
        return Decimal::ONE;
    }
    let exponent = safe_div(elapsed, scale);
    // exp(-x) = 1 / exp(x); past ~60 the result is indistinguishable from 0
    match exponent.checked_exp() {
        Some(growth) if growth > Decimal::ZERO => clamp_unit(Decimal::ONE / growth),
        _ => Decimal::ZERO,
    }
}

/// Arithmetic mean, zero for an empty slice.
pub fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    let sum: Decimal = values.iter().copied().sum();
    sum / Decimal::from(values.len() as u64)
}

/// Calculate weighted average.
pub fn weighted_average(values: &[(Decimal, Decimal)]) -> Decimal {
    let (sum, weight_sum) = values.iter().fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(sum, weight_sum), (val, weight)| (sum + val * weight, weight_sum + weight),
    );

    safe_div(sum, weight_sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(dec!(1.7)), Decimal::ONE);
        assert_eq!(clamp_unit(dec!(-0.3)), Decimal::ZERO);
        assert_eq!(clamp_unit(dec!(0.42)), dec!(0.42));
    }

    #[test]
    fn test_pips() {
        assert_eq!(to_pips(dec!(0.0015), dec!(0.0001)), dec!(15));
        assert_eq!(from_pips(dec!(2), dec!(0.01)), dec!(0.02));
        assert_eq!(to_pips(dec!(0.0015), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_exp_decay() {
        assert_eq!(exp_decay(Decimal::ZERO, dec!(72)), Decimal::ONE);
        // e^-1 ~= 0.3679
        let one_scale = exp_decay(dec!(72), dec!(72));
        assert!(one_scale > dec!(0.367) && one_scale < dec!(0.368));
        // Monotonic
        assert!(exp_decay(dec!(100), dec!(72)) < one_scale);
        // Huge elapsed collapses to zero instead of overflowing
        assert_eq!(exp_decay(dec!(1000000), dec!(1)), Decimal::ZERO);
    }

    #[test]
    fn test_mean_and_safe_div() {
        assert_eq!(mean(&[dec!(1), dec!(2), dec!(3)]), dec!(2));
        assert_eq!(mean(&[]), Decimal::ZERO);
        assert_eq!(safe_div(dec!(1), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(checked_ratio(dec!(1), Decimal::ZERO), None);
    }

    #[test]
    fn test_weighted_average() {
        let values = vec![
            (dec!(100), dec!(2)), // 100 with weight 2
            (dec!(200), dec!(1)), // 200 with weight 1
        ];
        // (100*2 + 200*1) / (2+1) = 400/3 ≈ 133.33
        let avg = weighted_average(&values);
        assert!(avg > dec!(133) && avg < dec!(134));
    }
}
