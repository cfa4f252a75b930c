//! # Money Module
//!
//! `Money` and `TaxRate`: integer minor-unit arithmetic for every total the
//! core computes.
//!
//! ## Rounding Policy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ROUND HALF-UP, ONCE, AT THE TOTAL                                      │
//! │                                                                         │
//! │  Per-line rounding drifts:                                              │
//! │    3 lines × 8.25% of 1099 = 3 × 90.6675 → 3 × 91 = 273                 │
//! │    one total: 8.25% of 3297 = 272.0025 → 272                            │
//! │                                                                         │
//! │  Tally rounds exactly once, on the taxable total:                       │
//! │    tax = (taxable × bps + 5000) / 10000                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tally_core::money::{Money, TaxRate};
//!
//! let taxable = Money::from_cents(20250);
//! let tax = taxable.calculate_tax(TaxRate::from_bps(1100));
//! assert_eq!(tax.cents(), 2228); // 2227.5 rounds up
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// Basis points in 100%.
pub const BPS_SCALE: i128 = 10_000;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in minor currency units (cents).
///
/// Signed so that reversals (refund cash-out, void compensation) can be
/// expressed directly. There is deliberately no float constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Zero.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies a unit price by a quantity.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(10000).multiply_quantity(2).cents(), 20000);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Checked addition, `None` on overflow.
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Checked quantity multiplication, `None` on overflow.
    pub fn checked_mul(self, qty: i64) -> Option<Money> {
        self.0.checked_mul(qty).map(Money)
    }

    /// Applies a basis-point rate to this amount, rounding half-up.
    ///
    /// Negative amounts round half away from zero so that `-x` always maps
    /// to the negation of `x`.
    pub fn apply_bps(&self, bps: u32) -> Money {
        let raw = self.0 as i128 * bps as i128;
        let half = BPS_SCALE / 2;
        let rounded = if raw >= 0 {
            (raw + half) / BPS_SCALE
        } else {
            -((-raw + half) / BPS_SCALE)
        };
        Money(rounded as i64)
    }

    /// Calculates tax on a taxable total (half-up at the total).
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::{Money, TaxRate};
    ///
    /// let tax = Money::from_cents(1000).calculate_tax(TaxRate::from_bps(825));
    /// // 82.5 → 83
    /// assert_eq!(tax.cents(), 83);
    /// ```
    #[inline]
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        self.apply_bps(rate.bps())
    }

    /// Percentage discount amount (not the discounted price).
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// let discount = Money::from_cents(22500).percentage_discount(1000);
    /// assert_eq!(discount.cents(), 2250);
    /// ```
    #[inline]
    pub fn percentage_discount(&self, discount_bps: u32) -> Money {
        self.apply_bps(discount_bps)
    }
}

/// Debug-style display, e.g. `-$5.50`. Presentation layers format their own.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}${}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate in basis points: 1 bps = 0.01%, so 1100 bps = 11%.
///
/// Valid rates lie in 0..=10000; the pricing engine rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Creates a tax rate from a whole percentage.
    #[inline]
    pub const fn from_percent(pct: u32) -> Self {
        TaxRate(pct * 100)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    /// True when the rate lies within 0%..=100%.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.0 as i128 <= BPS_SCALE
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
