use rust_decimal::{Decimal, RoundingStrategy};

/// Round `value` to the nearest multiple of `size`, keeping the decimal
/// precision of `size` in the result (0.0085696 @ 0.00001 -> 0.00857)
pub fn nearest_size(value: Decimal, size: Decimal) -> Decimal {
    if size <= Decimal::ZERO {
        return value;
    }

    let steps = (value / size).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    (steps * size).round_dp(size.normalize().scale())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_nearest_size_keeps_tick_precision() {
        let rounded = nearest_size(dec!(0.0085696), dec!(0.00001));
        assert_eq!(rounded, dec!(0.00857));
        assert_eq!(rounded.to_string(), "0.00857");
    }

    #[test]
    fn test_nearest_size_coarse_ticks() {
        assert_eq!(nearest_size(dec!(3.7), dec!(0.5)), dec!(3.5));
        assert_eq!(nearest_size(dec!(3.75), dec!(0.5)), dec!(4.0));
        assert_eq!(nearest_size(dec!(6469.2512), dec!(0.01)).to_string(), "6469.25");
        assert_eq!(nearest_size(dec!(-6534.2688), dec!(0.01)), dec!(-6534.27));
    }

    #[test]
    fn test_nearest_size_zero_size_is_passthrough() {
        assert_eq!(nearest_size(dec!(1.23456), Decimal::ZERO), dec!(1.23456));
    }
}
