use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppError, AppResult};

/// The two external steps of the payout protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStep {
    Transfer,
    Payout,
}

impl PayoutStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStep::Transfer => "transfer",
            PayoutStep::Payout => "payout",
        }
    }
}

impl fmt::Display for PayoutStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Base-currency decimal -> minor units (cents). Amounts at rest are
/// 2-dp decimals, so this is exact; anything finer is rejected.
pub fn to_minor_units(amount: Decimal) -> AppResult<i64> {
    let scaled = amount * Decimal::from(100);
    if scaled.fract() != Decimal::ZERO {
        return Err(AppError::InvalidInput(format!(
            "Amount {} is finer than the currency minor unit",
            amount
        )));
    }
    scaled
        .to_i64()
        .ok_or_else(|| AppError::InvalidInput(format!("Amount {} out of range", amount)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_minor_units() {
        assert_eq!(to_minor_units(dec!(116.79)).unwrap(), 11679);
        assert_eq!(to_minor_units(dec!(0)).unwrap(), 0);
        assert!(to_minor_units(dec!(0.001)).is_err());
    }
}
