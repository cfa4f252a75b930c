//! # Pricing Engine
//!
//! Pure function from (cart lines, discount rule, tax rate, manual override)
//! to the four totals stored on a transaction.
//!
//! ## Computation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  subtotal        = Σ unit_price × quantity                              │
//! │  line_discounts  = Σ line_discount                                      │
//! │  cart_discount   = Percentage(bps): half-up bps of                      │
//! │                      (subtotal − line_discounts)                        │
//! │                  | Fixed(cents)                                         │
//! │  discount_total  = line_discounts + cart_discount                       │
//! │  taxable         = subtotal − discount_total                            │
//! │  tax_total       = (taxable × tax_bps + 5000) / 10000   ← rounded ONCE  │
//! │  grand_total     = taxable + tax_total                                  │
//! │                                                                         │
//! │  Manual override: discount_total and tax_total come from the override   │
//! │  verbatim; the transaction records PricingSource::Manual.               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Worked Example
//! ```rust
//! use tally_core::money::TaxRate;
//! use tally_core::pricing::{compute_totals, CartDiscount, CartLine};
//!
//! let lines = vec![
//!     CartLine::new("A", 2, 10000),
//!     CartLine::new("B", 1, 2500),
//! ];
//! let totals = compute_totals(
//!     &lines,
//!     &CartDiscount::Percentage { bps: 1000 },
//!     TaxRate::from_percent(11),
//!     None,
//! )
//! .unwrap();
//!
//! assert_eq!(totals.subtotal.cents(), 22500);
//! assert_eq!(totals.discount_total.cents(), 2250);
//! assert_eq!(totals.taxable().cents(), 20250);
//! assert_eq!(totals.tax_total.cents(), 2228);
//! assert_eq!(totals.grand_total.cents(), 22478);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::money::{Money, TaxRate, BPS_SCALE};

// =============================================================================
// Inputs
// =============================================================================

/// One priced line of a cart. The unit price is a snapshot taken at add time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    /// Absolute discount on this line, in minor units.
    #[serde(default)]
    pub line_discount_cents: i64,
}

impl CartLine {
    pub fn new(product_id: impl Into<String>, quantity: i64, unit_price_cents: i64) -> Self {
        CartLine {
            product_id: product_id.into(),
            quantity,
            unit_price_cents,
            line_discount_cents: 0,
        }
    }

    pub fn with_discount(mut self, cents: i64) -> Self {
        self.line_discount_cents = cents;
        self
    }
}

/// Cart-level discount rule, applied after line discounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartDiscount {
    #[default]
    None,
    /// Percentage in basis points of the post-line-discount amount.
    Percentage { bps: u32 },
    /// Absolute amount in minor units.
    Fixed { cents: i64 },
}

/// Manually entered totals that replace the computed discount and tax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualOverride {
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub reason: String,
}

// =============================================================================
// Outputs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTotals {
    pub subtotal: Money,
    pub discount_total: Money,
    pub tax_total: Money,
    pub grand_total: Money,
}

impl PricingTotals {
    /// Subtotal after all discounts; the base tax is computed on.
    pub fn taxable(&self) -> Money {
        self.subtotal - self.discount_total
    }
}

/// How the totals on a transaction were produced.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingSource {
    #[default]
    Automatic,
    Manual,
}

/// Audit record of manual pricing, stored on the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PricingArtifact {
    pub source: PricingSource,
    pub override_reason: Option<String>,
    pub approved_by: Option<String>,
}

impl PricingArtifact {
    pub fn automatic() -> Self {
        PricingArtifact::default()
    }

    pub fn manual(reason: impl Into<String>, approved_by: impl Into<String>) -> Self {
        PricingArtifact {
            source: PricingSource::Manual,
            override_reason: Some(reason.into()),
            approved_by: Some(approved_by.into()),
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

fn overflow() -> CoreError {
    CoreError::invalid_pricing("amount overflow")
}

/// Computes subtotal, discount, tax and grand total.
///
/// ## Errors
/// `InvalidPricing` when:
/// - a quantity is not positive
/// - the subtotal is negative
/// - a line discount is negative or exceeds its line total
/// - the cart discount exceeds what is left after line discounts
/// - the tax rate or a percentage discount is outside 0%..=100%
/// - a manual override carries negative amounts or a discount above subtotal
pub fn compute_totals(
    lines: &[CartLine],
    discount: &CartDiscount,
    tax_rate: TaxRate,
    manual: Option<&ManualOverride>,
) -> CoreResult<PricingTotals> {
    if !tax_rate.is_valid() {
        return Err(CoreError::invalid_pricing(format!(
            "tax rate {} bps is outside 0..=10000",
            tax_rate.bps()
        )));
    }

    let mut subtotal = Money::zero();
    let mut line_discounts = Money::zero();

    for line in lines {
        if line.quantity <= 0 {
            return Err(CoreError::invalid_pricing(format!(
                "quantity for {} must be positive",
                line.product_id
            )));
        }

        let line_total = Money::from_cents(line.unit_price_cents)
            .checked_mul(line.quantity)
            .ok_or_else(overflow)?;

        if line.line_discount_cents < 0 {
            return Err(CoreError::invalid_pricing(format!(
                "line discount for {} is negative",
                line.product_id
            )));
        }
        if line.line_discount_cents > line_total.cents().max(0) {
            return Err(CoreError::invalid_pricing(format!(
                "line discount for {} exceeds line total",
                line.product_id
            )));
        }

        subtotal = subtotal.checked_add(line_total).ok_or_else(overflow)?;
        line_discounts = line_discounts
            .checked_add(Money::from_cents(line.line_discount_cents))
            .ok_or_else(overflow)?;
    }

    if subtotal.is_negative() {
        return Err(CoreError::invalid_pricing("subtotal is negative"));
    }

    if let Some(manual) = manual {
        return apply_manual(subtotal, manual);
    }

    let after_lines = subtotal - line_discounts;
    let cart_discount = match *discount {
        CartDiscount::None => Money::zero(),
        CartDiscount::Percentage { bps } => {
            if bps as i128 > BPS_SCALE {
                return Err(CoreError::invalid_pricing(format!(
                    "discount {} bps is outside 0..=10000",
                    bps
                )));
            }
            after_lines.percentage_discount(bps)
        }
        CartDiscount::Fixed { cents } => {
            if cents < 0 {
                return Err(CoreError::invalid_pricing("cart discount is negative"));
            }
            Money::from_cents(cents)
        }
    };

    let discount_total = line_discounts + cart_discount;
    if discount_total > subtotal {
        return Err(CoreError::invalid_pricing("discount exceeds subtotal"));
    }

    let taxable = subtotal - discount_total;
    let tax_total = taxable.calculate_tax(tax_rate);

    Ok(PricingTotals {
        subtotal,
        discount_total,
        tax_total,
        grand_total: taxable.checked_add(tax_total).ok_or_else(overflow)?,
    })
}

fn apply_manual(subtotal: Money, manual: &ManualOverride) -> CoreResult<PricingTotals> {
    if manual.discount_cents < 0 || manual.tax_cents < 0 {
        return Err(CoreError::invalid_pricing(
            "manual override amounts must not be negative",
        ));
    }

    let discount_total = Money::from_cents(manual.discount_cents);
    if discount_total > subtotal {
        return Err(CoreError::invalid_pricing("discount exceeds subtotal"));
    }

    let tax_total = Money::from_cents(manual.tax_cents);
    let grand_total = (subtotal - discount_total)
        .checked_add(tax_total)
        .ok_or_else(overflow)?;

    Ok(PricingTotals {
        subtotal,
        discount_total,
        tax_total,
        grand_total,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn reference_cart() -> Vec<CartLine> {
        vec![CartLine::new("A", 2, 10000), CartLine::new("B", 1, 2500)]
    }

    #[test]
    fn test_reference_cart() {
        let totals = compute_totals(
            &reference_cart(),
            &CartDiscount::Percentage { bps: 1000 },
            TaxRate::from_percent(11),
            None,
        )
        .unwrap();

        assert_eq!(totals.subtotal.cents(), 22500);
        assert_eq!(totals.discount_total.cents(), 2250);
        assert_eq!(totals.taxable().cents(), 20250);
        assert_eq!(totals.tax_total.cents(), 2228);
        assert_eq!(totals.grand_total.cents(), 22478);
    }

    #[test]
    fn test_tax_rounded_once_on_total() {
        // 3 × 1099 at 8.25%: per-line would give 273, total gives 272
        let lines = vec![
            CartLine::new("A", 1, 1099),
            CartLine::new("B", 1, 1099),
            CartLine::new("C", 1, 1099),
        ];
        let totals =
            compute_totals(&lines, &CartDiscount::None, TaxRate::from_bps(825), None).unwrap();
        assert_eq!(totals.tax_total.cents(), 272);
        assert_eq!(totals.grand_total.cents(), 3297 + 272);
    }

    #[test]
    fn test_line_and_fixed_discounts_stack() {
        let lines = vec![
            CartLine::new("A", 2, 1000).with_discount(200),
            CartLine::new("B", 1, 500),
        ];
        let totals = compute_totals(
            &lines,
            &CartDiscount::Fixed { cents: 300 },
            TaxRate::zero(),
            None,
        )
        .unwrap();
        assert_eq!(totals.subtotal.cents(), 2500);
        assert_eq!(totals.discount_total.cents(), 500);
        assert_eq!(totals.grand_total.cents(), 2000);
    }

    #[test]
    fn test_percentage_applies_after_line_discounts() {
        let lines = vec![CartLine::new("A", 1, 1000).with_discount(100)];
        let totals = compute_totals(
            &lines,
            &CartDiscount::Percentage { bps: 5000 },
            TaxRate::zero(),
            None,
        )
        .unwrap();
        // 100 line + 50% of 900 = 550
        assert_eq!(totals.discount_total.cents(), 550);
    }

    #[test]
    fn test_manual_override_replaces_discount_and_tax() {
        let manual = ManualOverride {
            discount_cents: 5000,
            tax_cents: 100,
            reason: "price match".into(),
        };
        let totals = compute_totals(
            &reference_cart(),
            &CartDiscount::Percentage { bps: 1000 },
            TaxRate::from_percent(11),
            Some(&manual),
        )
        .unwrap();
        assert_eq!(totals.subtotal.cents(), 22500);
        assert_eq!(totals.discount_total.cents(), 5000);
        assert_eq!(totals.tax_total.cents(), 100);
        assert_eq!(totals.grand_total.cents(), 17600);
    }

    #[test]
    fn test_invalid_pricing() {
        let cases: Vec<(Vec<CartLine>, CartDiscount, TaxRate)> = vec![
            // negative subtotal
            (vec![CartLine::new("A", 1, -100)], CartDiscount::None, TaxRate::zero()),
            // discount exceeds subtotal
            (
                vec![CartLine::new("A", 1, 100)],
                CartDiscount::Fixed { cents: 101 },
                TaxRate::zero(),
            ),
            // line discount exceeds line total
            (
                vec![CartLine::new("A", 1, 100).with_discount(101)],
                CartDiscount::None,
                TaxRate::zero(),
            ),
            // tax above 100%
            (vec![CartLine::new("A", 1, 100)], CartDiscount::None, TaxRate::from_bps(10001)),
            // percentage above 100%
            (
                vec![CartLine::new("A", 1, 100)],
                CartDiscount::Percentage { bps: 10001 },
                TaxRate::zero(),
            ),
        ];

        for (lines, discount, rate) in cases {
            let err = compute_totals(&lines, &discount, rate, None).unwrap_err();
            assert!(matches!(err, CoreError::InvalidPricing { .. }), "{err}");
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }

    #[test]
    fn test_boundaries_are_allowed() {
        let lines = vec![CartLine::new("A", 1, 100)];
        let full = compute_totals(&lines, &CartDiscount::Fixed { cents: 100 }, TaxRate::zero(), None)
            .unwrap();
        assert_eq!(full.grand_total, Money::zero());

        let all_tax = compute_totals(&lines, &CartDiscount::None, TaxRate::from_bps(10000), None)
            .unwrap();
        assert_eq!(all_tax.grand_total.cents(), 200);
    }

    #[test]
    fn test_manual_override_discount_above_subtotal() {
        let manual = ManualOverride {
            discount_cents: 22501,
            tax_cents: 0,
            reason: "typo".into(),
        };
        let err = compute_totals(
            &reference_cart(),
            &CartDiscount::None,
            TaxRate::zero(),
            Some(&manual),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPricing { .. }));
    }

    #[test]
    fn test_overflow_is_invalid_pricing() {
        let lines = vec![CartLine::new("A", 2, i64::MAX / 2 + 1)];
        let err = compute_totals(&lines, &CartDiscount::None, TaxRate::zero(), None).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPricing { .. }));
    }
}
