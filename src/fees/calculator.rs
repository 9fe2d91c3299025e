// Fee decomposition for a single checkout total.
//
// Splits an order into product revenue, tax, shipping, platform commission
// and processor fees. Two modes:
// - gross-up: the customer total is raised so that, after the processor
//   takes its percentage-plus-fixed cut, exactly the customer subtotal
//   remains for distribution
// - absorb: the customer pays the plain subtotal and the platform eats the
//   processor fee out of its own commission/shipping revenue

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::FeeConfig;
use crate::error::FeeError;

/// Itemized fee split for one suborder. Pure value type - no identity,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    #[serde(with = "rust_decimal::serde::float")]
    pub product_subtotal: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub tax_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub shipping_cost: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub customer_subtotal: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub customer_total: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub seller_receives: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub platform_commission: Decimal,
    /// May be negative in absorb mode on low-margin orders. Not an error.
    #[serde(with = "rust_decimal::serde::float")]
    pub platform_revenue: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub processor_fee: Decimal,
    pub gross_up_fees: bool,
}

/// One seller's slice of a multi-seller checkout
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuborderInput {
    pub seller_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub product_subtotal: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub tax_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub shipping_cost: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiSellerBreakdown {
    /// Per-suborder breakdowns, in input order
    pub suborders: Vec<(Uuid, FeeBreakdown)>,
    pub totals: FeeBreakdown,
}

pub struct FeeCalculator {
    config: FeeConfig,
}

impl FeeCalculator {
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }

    /// Decompose a single suborder's economics.
    ///
    /// All inputs must be >= 0. Internal math runs at full Decimal
    /// precision; outputs are rounded half-up to 2 dp at this boundary
    /// only.
    pub fn compute_fees(
        &self,
        product_subtotal: Decimal,
        tax_amount: Decimal,
        shipping_cost: Decimal,
        gross_up_fees: bool,
    ) -> Result<FeeBreakdown, FeeError> {
        validate_non_negative("product_subtotal", product_subtotal)?;
        validate_non_negative("tax_amount", tax_amount)?;
        validate_non_negative("shipping_cost", shipping_cost)?;

        let pct = self.config.processor_pct_fee;
        let fixed = self.config.processor_fixed_fee;

        // Seller is shielded from commission and processor fees
        let seller_receives = product_subtotal + tax_amount;
        let platform_commission = product_subtotal * self.config.platform_fee_pct;
        let customer_subtotal = product_subtotal + tax_amount + shipping_cost;

        let (customer_total, processor_fee, platform_revenue) = if gross_up_fees {
            // Solve for the total that leaves exactly customer_subtotal
            // after the processor's cut
            let customer_total = (customer_subtotal + fixed) / (Decimal::ONE - pct);
            let processor_fee = customer_total * pct + fixed;
            let gross_up_margin = customer_total - customer_subtotal;
            let platform_revenue =
                platform_commission + shipping_cost + gross_up_margin - processor_fee;
            (customer_total, processor_fee, platform_revenue)
        } else {
            let customer_total = customer_subtotal;
            let processor_fee = customer_total * pct + fixed;
            // Platform eats the processor fee; can go negative on
            // low-margin orders
            let platform_revenue = platform_commission + shipping_cost - processor_fee;
            (customer_total, processor_fee, platform_revenue)
        };

        Ok(FeeBreakdown {
            product_subtotal: round_money(product_subtotal),
            tax_amount: round_money(tax_amount),
            shipping_cost: round_money(shipping_cost),
            customer_subtotal: round_money(customer_subtotal),
            customer_total: round_money(customer_total),
            seller_receives: round_money(seller_receives),
            platform_commission: round_money(platform_commission),
            platform_revenue: round_money(platform_revenue),
            processor_fee: round_money(processor_fee),
            gross_up_fees,
        })
    }

    /// Per-suborder breakdown plus summed totals. Suborder breakdowns are
    /// reported in input order for auditability; the sum itself is
    /// order-independent.
    pub fn compute_multi_seller_fees(
        &self,
        suborders: &[SuborderInput],
        gross_up_fees: bool,
    ) -> Result<MultiSellerBreakdown, FeeError> {
        if suborders.is_empty() {
            return Err(FeeError::NoSuborders);
        }

        let mut per_seller = Vec::with_capacity(suborders.len());
        let mut totals = FeeBreakdown {
            product_subtotal: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            shipping_cost: Decimal::ZERO,
            customer_subtotal: Decimal::ZERO,
            customer_total: Decimal::ZERO,
            seller_receives: Decimal::ZERO,
            platform_commission: Decimal::ZERO,
            platform_revenue: Decimal::ZERO,
            processor_fee: Decimal::ZERO,
            gross_up_fees,
        };

        for suborder in suborders {
            let breakdown = self.compute_fees(
                suborder.product_subtotal,
                suborder.tax_amount,
                suborder.shipping_cost,
                gross_up_fees,
            )?;

            totals.product_subtotal += breakdown.product_subtotal;
            totals.tax_amount += breakdown.tax_amount;
            totals.shipping_cost += breakdown.shipping_cost;
            totals.customer_subtotal += breakdown.customer_subtotal;
            totals.customer_total += breakdown.customer_total;
            totals.seller_receives += breakdown.seller_receives;
            totals.platform_commission += breakdown.platform_commission;
            totals.platform_revenue += breakdown.platform_revenue;
            totals.processor_fee += breakdown.processor_fee;

            per_seller.push((suborder.seller_id, breakdown));
        }

        Ok(MultiSellerBreakdown {
            suborders: per_seller,
            totals,
        })
    }
}

impl Default for FeeCalculator {
    fn default() -> Self {
        Self::new(FeeConfig::default())
    }
}

/// Round to the currency minor unit (2 dp for USD), half-up
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn validate_non_negative(field: &'static str, value: Decimal) -> Result<(), FeeError> {
    if value < Decimal::ZERO {
        return Err(FeeError::InvalidAmount {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn calc() -> FeeCalculator {
        FeeCalculator::default()
    }

    #[test]
    fn test_gross_up_concrete_scenario() {
        // computeFees(100, 8, 5, gross_up=true)
        let b = calc()
            .compute_fees(dec!(100), dec!(8), dec!(5), true)
            .unwrap();

        assert_eq!(b.customer_subtotal, dec!(113.00));
        // (113 + 0.30) / 0.971 = 116.786... -> 116.79
        assert_eq!(b.customer_total, dec!(116.79));
        assert_eq!(b.seller_receives, dec!(108.00));
        assert_eq!(b.platform_commission, dec!(10.00));
    }

    #[test]
    fn test_absorb_total_equals_subtotal() {
        let b = calc()
            .compute_fees(dec!(100), dec!(8), dec!(5), false)
            .unwrap();

        assert_eq!(b.customer_total, b.customer_subtotal);
        // processor fee = 113 * 0.029 + 0.30 = 3.577 -> 3.58
        assert_eq!(b.processor_fee, dec!(3.58));
        // platform revenue = 10 + 5 - 3.577 = 11.423 -> 11.42
        assert_eq!(b.platform_revenue, dec!(11.42));
    }

    #[test]
    fn test_absorb_mode_negative_platform_revenue_is_representable() {
        // Tiny order with no shipping: commission cannot cover the
        // processor's fixed fee
        let b = calc()
            .compute_fees(dec!(1.00), dec!(0), dec!(0), false)
            .unwrap();

        assert!(b.platform_revenue < Decimal::ZERO);
    }

    #[test]
    fn test_negative_input_rejected() {
        let err = calc()
            .compute_fees(dec!(-1), dec!(0), dec!(0), true)
            .unwrap_err();

        assert_eq!(
            err,
            FeeError::InvalidAmount {
                field: "product_subtotal",
                value: "-1".to_string()
            }
        );
    }

    #[test]
    fn test_zero_order() {
        let b = calc().compute_fees(dec!(0), dec!(0), dec!(0), false).unwrap();
        assert_eq!(b.customer_total, dec!(0.00));
        assert_eq!(b.seller_receives, dec!(0.00));
        // Fixed fee still applies
        assert_eq!(b.processor_fee, dec!(0.30));
    }

    #[test]
    fn test_multi_seller_totals_match_sum_of_parts() {
        let suborders = vec![
            SuborderInput {
                seller_id: Uuid::new_v4(),
                product_subtotal: dec!(40),
                tax_amount: dec!(3.20),
                shipping_cost: dec!(2),
            },
            SuborderInput {
                seller_id: Uuid::new_v4(),
                product_subtotal: dec!(60),
                tax_amount: dec!(4.80),
                shipping_cost: dec!(3),
            },
        ];

        let multi = calc().compute_multi_seller_fees(&suborders, true).unwrap();

        assert_eq!(multi.suborders.len(), 2);
        // Output order follows input order
        assert_eq!(multi.suborders[0].0, suborders[0].seller_id);

        let mut sum_total = Decimal::ZERO;
        let mut sum_seller = Decimal::ZERO;
        let mut sum_processor = Decimal::ZERO;
        for (_, b) in &multi.suborders {
            sum_total += b.customer_total;
            sum_seller += b.seller_receives;
            sum_processor += b.processor_fee;
        }

        assert_eq!(multi.totals.customer_total, sum_total);
        assert_eq!(multi.totals.seller_receives, sum_seller);
        assert_eq!(multi.totals.processor_fee, sum_processor);
    }

    #[test]
    fn test_empty_suborders_rejected() {
        let err = calc().compute_multi_seller_fees(&[], true).unwrap_err();
        assert_eq!(err, FeeError::NoSuborders);
    }

    proptest! {
        // Gross-up algebra: after the processor deducts pct + fixed from
        // the customer total, the customer subtotal remains (within one
        // cent of rounding slack).
        #[test]
        fn prop_gross_up_net_of_processor_recovers_subtotal(
            product in 0u64..1_000_000,
            tax in 0u64..100_000,
            shipping in 0u64..50_000,
        ) {
            let product = Decimal::new(product as i64, 2);
            let tax = Decimal::new(tax as i64, 2);
            let shipping = Decimal::new(shipping as i64, 2);

            let b = calc().compute_fees(product, tax, shipping, true).unwrap();

            let net = b.customer_total - (b.customer_total * dec!(0.029) + dec!(0.30));
            let diff = (net - b.customer_subtotal).abs();
            prop_assert!(diff <= dec!(0.01), "net {} vs subtotal {}", net, b.customer_subtotal);
        }

        // Absorb mode never inflates the customer total
        #[test]
        fn prop_absorb_total_is_exact(
            product in 0u64..1_000_000,
            tax in 0u64..100_000,
            shipping in 0u64..50_000,
        ) {
            let product = Decimal::new(product as i64, 2);
            let tax = Decimal::new(tax as i64, 2);
            let shipping = Decimal::new(shipping as i64, 2);

            let b = calc().compute_fees(product, tax, shipping, false).unwrap();
            prop_assert_eq!(b.customer_total, b.customer_subtotal);
        }

        // Splitting a fixed subtotal across suborders never changes the
        // summed seller take (seller_receives is linear in its inputs)
        #[test]
        fn prop_partition_preserves_seller_take(total in 2u64..500_000, split in 1u64..100) {
            let total_dec = Decimal::new(total as i64, 2);
            let first = Decimal::new((total * split / 100).max(1) as i64, 2);
            let second = total_dec - first;
            prop_assume!(second >= Decimal::ZERO);

            let one = calc()
                .compute_fees(total_dec, Decimal::ZERO, Decimal::ZERO, false)
                .unwrap();

            let split_orders = vec![
                SuborderInput {
                    seller_id: Uuid::new_v4(),
                    product_subtotal: first,
                    tax_amount: Decimal::ZERO,
                    shipping_cost: Decimal::ZERO,
                },
                SuborderInput {
                    seller_id: Uuid::new_v4(),
                    product_subtotal: second,
                    tax_amount: Decimal::ZERO,
                    shipping_cost: Decimal::ZERO,
                },
            ];
            let multi = calc().compute_multi_seller_fees(&split_orders, false).unwrap();

            prop_assert_eq!(one.seller_receives, multi.totals.seller_receives);
        }
    }
}
