use crate::error::{PipelineError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Multiplicative margin model applied to a netted exposure.
///
/// Applied in a fixed order, each step compounding on the last:
///
/// 1. `margin = net_settlement * base_rate`
/// 2. `margin *= volatility_multiplier` (always)
/// 3. `margin *= concentration_multiplier` when `|net_quantity| > concentration_threshold`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarginModel {
    pub base_rate: Decimal,
    pub volatility_multiplier: Decimal,
    pub concentration_multiplier: Decimal,
    /// Strictly greater than this many units triggers the concentration charge.
    pub concentration_threshold: Decimal,
}

impl Default for MarginModel {
    fn default() -> Self {
        Self {
            base_rate: dec!(0.10),
            volatility_multiplier: dec!(1.20),
            concentration_multiplier: dec!(1.15),
            concentration_threshold: dec!(1000),
        }
    }
}

impl MarginModel {
    pub fn margin_for(&self, net_settlement: Decimal, net_quantity: Decimal) -> Result<Decimal> {
        let mut margin = net_settlement
            .checked_mul(self.base_rate)
            .and_then(|m| m.checked_mul(self.volatility_multiplier));
        if self.is_concentrated(net_quantity) {
            margin = margin.and_then(|m| m.checked_mul(self.concentration_multiplier));
        }
        margin.ok_or(PipelineError::Overflow("margin requirement"))
    }

    pub fn is_concentrated(&self, net_quantity: Decimal) -> bool {
        net_quantity.abs() > self.concentration_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_margin_without_concentration() {
        let model = MarginModel::default();
        // 3000 * 0.10 * 1.20
        assert_eq!(model.margin_for(dec!(3000), dec!(60)).unwrap(), dec!(360));
    }

    #[test]
    fn test_margin_with_concentration() {
        let model = MarginModel::default();
        // 3000 * 0.10 * 1.20 * 1.15
        assert_eq!(model.margin_for(dec!(3000), dec!(1500)).unwrap(), dec!(414));
        assert_eq!(model.margin_for(dec!(3000), dec!(-1500)).unwrap(), dec!(414));
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let model = MarginModel::default();
        assert!(!model.is_concentrated(dec!(1000)));
        assert!(model.is_concentrated(dec!(1000.0001)));
        assert_eq!(model.margin_for(dec!(1000), dec!(1000)).unwrap(), dec!(120));
    }

    #[test]
    fn test_oversized_multiplier_overflows_cleanly() {
        let model = MarginModel {
            base_rate: dec!(1000),
            ..MarginModel::default()
        };
        let err = model.margin_for(Decimal::MAX, Decimal::ONE).unwrap_err();
        assert_eq!(err.reason(), "arithmetic_overflow");
    }

    #[test]
    fn test_zero_exposure_needs_no_margin() {
        let model = MarginModel::default();
        assert_eq!(model.margin_for(Decimal::ZERO, Decimal::ZERO).unwrap(), Decimal::ZERO);
    }
}
