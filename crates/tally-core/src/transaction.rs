//! # Transaction State Machine
//!
//! Transactions, their line items, refunds, and the pure rules behind
//! checkout, void and refund. Persistence and atomicity live in tally-db;
//! this module decides *whether* a transition is allowed and *what* it
//! writes.
//!
//! ## Lifecycle
//! ```text
//!   ┌─────────┐  complete()   ┌───────────┐  void()        ┌─────────┐
//!   │ pending │ ────────────► │ completed │ ─────────────► │ voided  │
//!   └─────────┘               └─────┬─────┘                └─────────┘
//!                                   │  ▲
//!                    apply_refund() │  │ partial refund: stays completed,
//!                                   │  │ refunded_cents grows
//!                                   ▼  │
//!                              ┌──────────┐
//!                              │ refunded │   (refunded_cents == grand_total)
//!                              └──────────┘
//!
//!   voided and refunded are terminal.
//! ```
//!
//! ## Partial Refund Restock (FIFO-by-line)
//! ```text
//! Units are walked in line order, one at a time. Unit k is restocked once
//!
//!     cumulative_refund × subtotal  ≥  gross(units 1..=k) × grand_total
//!
//! i.e. once the refunded share of the grand total covers the unit's share of
//! the subtotal. Each refund restocks covered_after − covered_before units,
//! so a series of partial refunds summing to grand_total restocks every unit
//! exactly once.
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::Actor;
use crate::error::{CoreError, CoreResult};
use crate::money::{Money, TaxRate};
use crate::pricing::{compute_totals, CartDiscount, CartLine, ManualOverride, PricingArtifact};
use crate::types::PaymentMethod;
use crate::validation::{
    validate_cart_size, validate_id, validate_positive_amount, validate_price_cents,
    validate_quantity, validate_reason, validate_unique_products,
};

// =============================================================================
// Transaction Status
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Completed,
    Voided,
    Refunded,
}

impl TransactionStatus {
    /// Whether the state machine allows `self → next`.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Completed) | (Completed, Voided) | (Completed, Refunded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Voided | TransactionStatus::Refunded)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Voided => "voided",
            TransactionStatus::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Cart
// =============================================================================

/// What a terminal submits to `checkout`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub lines: Vec<CartLine>,
    #[serde(default)]
    pub discount: CartDiscount,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub manual_override: Option<ManualOverride>,
}

impl Cart {
    pub fn new(lines: Vec<CartLine>, payment_method: PaymentMethod) -> Self {
        Cart {
            lines,
            discount: CartDiscount::None,
            payment_method,
            manual_override: None,
        }
    }

    pub fn with_discount(mut self, discount: CartDiscount) -> Self {
        self.discount = discount;
        self
    }

    pub fn with_override(mut self, manual: ManualOverride) -> Self {
        self.manual_override = Some(manual);
        self
    }

    /// Field-level checks; pricing rules are checked by the pricing engine.
    pub fn validate(&self) -> CoreResult<()> {
        validate_cart_size(self.lines.len())?;
        validate_unique_products("product_id", self.lines.iter().map(|l| l.product_id.as_str()))?;

        for line in &self.lines {
            validate_id("product_id", &line.product_id)?;
            validate_quantity(line.quantity)?;
            validate_price_cents(line.unit_price_cents)?;
        }

        if let Some(manual) = &self.manual_override {
            validate_reason("override_reason", &manual.reason)?;
        }

        Ok(())
    }

    /// Product ids in cart order.
    pub fn product_ids(&self) -> Vec<String> {
        self.lines.iter().map(|l| l.product_id.clone()).collect()
    }
}

// =============================================================================
// Line Item
// =============================================================================

/// A line of a committed transaction. Prices are frozen at sale time.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// 1-based position within the transaction.
    pub line_no: i64,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub line_discount_cents: i64,
}

impl LineItem {
    /// Gross line total (unit price × quantity), before discounts.
    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.unit_price_cents).multiply_quantity(self.quantity)
    }
}

// =============================================================================
// Transaction
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub store_id: String,
    pub cashier_id: String,
    pub shift_id: String,
    pub idempotency_key: String,
    pub lines: Vec<LineItem>,
    pub subtotal_cents: i64,
    pub discount_total_cents: i64,
    pub tax_total_cents: i64,
    pub grand_total_cents: i64,
    pub tax_rate_bps: u32,
    pub payment_method: PaymentMethod,
    pub status: TransactionStatus,
    pub pricing: PricingArtifact,
    /// Sum of all refunds recorded against this transaction.
    pub refunded_cents: i64,
    pub created_at: DateTime<Utc>,
    pub voided_at: Option<DateTime<Utc>>,
    pub void_reason: Option<String>,
    pub voided_by: Option<String>,
}

/// Everything needed to turn a cart into a pending transaction.
#[derive(Debug, Clone, Copy)]
pub struct CheckoutContext<'a> {
    pub actor: &'a Actor,
    pub shift_id: &'a str,
    pub idempotency_key: &'a str,
    pub tax_rate: TaxRate,
    pub at: DateTime<Utc>,
}

impl Transaction {
    /// Validates and prices a cart, producing a `pending` transaction.
    ///
    /// A manual override needs an elevated actor and is recorded as a
    /// `PricingSource::Manual` artifact.
    pub fn price_cart(cart: &Cart, ctx: CheckoutContext<'_>) -> CoreResult<Transaction> {
        cart.validate()?;

        let pricing = match &cart.manual_override {
            Some(manual) => {
                ctx.actor.require_elevated("override pricing")?;
                PricingArtifact::manual(manual.reason.clone(), ctx.actor.approver())
            }
            None => PricingArtifact::automatic(),
        };

        let totals = compute_totals(
            &cart.lines,
            &cart.discount,
            ctx.tax_rate,
            cart.manual_override.as_ref(),
        )?;

        let lines = cart
            .lines
            .iter()
            .enumerate()
            .map(|(i, l)| LineItem {
                line_no: i as i64 + 1,
                product_id: l.product_id.clone(),
                quantity: l.quantity,
                unit_price_cents: l.unit_price_cents,
                line_discount_cents: l.line_discount_cents,
            })
            .collect();

        Ok(Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            store_id: ctx.actor.store_id.clone(),
            cashier_id: ctx.actor.cashier_id.clone(),
            shift_id: ctx.shift_id.to_string(),
            idempotency_key: ctx.idempotency_key.to_string(),
            lines,
            subtotal_cents: totals.subtotal.cents(),
            discount_total_cents: totals.discount_total.cents(),
            tax_total_cents: totals.tax_total.cents(),
            grand_total_cents: totals.grand_total.cents(),
            tax_rate_bps: ctx.tax_rate.bps(),
            payment_method: cart.payment_method,
            status: TransactionStatus::Pending,
            pricing,
            refunded_cents: 0,
            created_at: ctx.at,
            voided_at: None,
            void_reason: None,
            voided_by: None,
        })
    }

    #[inline]
    pub fn grand_total(&self) -> Money {
        Money::from_cents(self.grand_total_cents)
    }

    /// What can still be refunded.
    #[inline]
    pub fn refundable(&self) -> Money {
        Money::from_cents(self.grand_total_cents - self.refunded_cents)
    }

    fn invalid_status(&self, operation: &str) -> CoreError {
        CoreError::InvalidTransactionStatus {
            transaction_id: self.id.clone(),
            status: self.status,
            operation: operation.to_string(),
        }
    }

    /// `pending → completed`, once the commit unit has been accepted.
    pub fn complete(&mut self) -> CoreResult<()> {
        if !self.status.can_transition_to(TransactionStatus::Completed) {
            return Err(self.invalid_status("complete"));
        }
        self.status = TransactionStatus::Completed;
        Ok(())
    }

    /// Checks void preconditions without mutating.
    ///
    /// The window is inclusive: a void at exactly `created_at + window`
    /// succeeds, one second later fails.
    pub fn check_voidable(&self, now: DateTime<Utc>, window: Duration) -> CoreResult<()> {
        match self.status {
            TransactionStatus::Voided => {
                return Err(CoreError::AlreadyVoided {
                    transaction_id: self.id.clone(),
                })
            }
            TransactionStatus::Completed if self.refunded_cents == 0 => {}
            _ => return Err(self.invalid_status("void")),
        }

        if now - self.created_at > window {
            return Err(CoreError::VoidWindowExpired {
                transaction_id: self.id.clone(),
                window_secs: window.num_seconds(),
            });
        }

        Ok(())
    }

    /// `completed → voided`.
    pub fn void(
        &mut self,
        reason: &str,
        voided_by: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> CoreResult<()> {
        validate_reason("void_reason", reason)?;
        self.check_voidable(now, window)?;

        self.status = TransactionStatus::Voided;
        self.voided_at = Some(now);
        self.void_reason = Some(reason.to_string());
        self.voided_by = Some(voided_by.to_string());
        Ok(())
    }

    /// Applies a refund of `amount_cents`, returning the units to restock.
    ///
    /// Stays `completed` until the cumulative refund reaches the grand total.
    pub fn apply_refund(&mut self, amount_cents: i64) -> CoreResult<Vec<RestockLine>> {
        validate_positive_amount("amount", amount_cents)?;

        match self.status {
            TransactionStatus::Completed => {}
            TransactionStatus::Refunded => {
                return Err(CoreError::RefundExceedsTotal {
                    transaction_id: self.id.clone(),
                    requested: amount_cents,
                    refundable: 0,
                })
            }
            _ => return Err(self.invalid_status("refund")),
        }

        let refundable = self.refundable().cents();
        if amount_cents > refundable {
            return Err(CoreError::RefundExceedsTotal {
                transaction_id: self.id.clone(),
                requested: amount_cents,
                refundable,
            });
        }

        let before = self.refunded_cents;
        let after = before + amount_cents;
        let restock = restock_allocation(self, before, after);

        self.refunded_cents = after;
        if after == self.grand_total_cents {
            self.status = TransactionStatus::Refunded;
        }

        Ok(restock)
    }
}

// =============================================================================
// Refund
// =============================================================================

/// A refund record. Always references the original transaction.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub transaction_id: String,
    pub store_id: String,
    pub amount_cents: i64,
    pub reason: String,
    pub cashier_id: String,
    pub shift_id: String,
    pub approved_by: String,
    pub created_at: DateTime<Utc>,
}

/// Units of one line returned to stock by a refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestockLine {
    pub line_no: i64,
    pub product_id: String,
    pub quantity: i64,
}

/// Number of units covered by a cumulative refund of `refunded` cents.
fn covered_units(txn: &Transaction, refunded: i64) -> Vec<i64> {
    let subtotal = txn.subtotal_cents as i128;
    let grand = txn.grand_total_cents as i128;
    let refunded = refunded as i128;

    let mut cumulative_gross: i128 = 0;
    let mut covered = Vec::with_capacity(txn.lines.len());

    for line in &txn.lines {
        let mut count = 0;
        for _ in 0..line.quantity {
            cumulative_gross += line.unit_price_cents as i128;
            if refunded > 0 && refunded * subtotal >= cumulative_gross * grand {
                count += 1;
            }
        }
        covered.push(count);
    }

    covered
}

/// FIFO-by-line allocation of the units a refund from `before` to `after`
/// cumulative cents newly covers. Lines with nothing to restock are omitted.
pub fn restock_allocation(txn: &Transaction, before: i64, after: i64) -> Vec<RestockLine> {
    let covered_before = covered_units(txn, before);
    let covered_after = covered_units(txn, after);

    txn.lines
        .iter()
        .zip(covered_before.iter().zip(covered_after.iter()))
        .filter_map(|(line, (b, a))| {
            let quantity = a - b;
            (quantity > 0).then(|| RestockLine {
                line_no: line.line_no,
                product_id: line.product_id.clone(),
                quantity,
            })
        })
        .collect()
}

pub fn validate_refund_reason(reason: &str) -> CoreResult<()> {
    validate_reason("refund_reason", reason)?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Role;
    use crate::error::{ErrorKind, ValidationError};
    use crate::pricing::PricingSource;

    fn cashier() -> Actor {
        Actor::new("c-1", Role::Cashier, "s-1")
    }

    fn reference_cart() -> Cart {
        Cart::new(
            vec![CartLine::new("A", 2, 10000), CartLine::new("B", 1, 2500)],
            PaymentMethod::Cash,
        )
        .with_discount(CartDiscount::Percentage { bps: 1000 })
    }

    fn priced(cart: &Cart, actor: &Actor) -> CoreResult<Transaction> {
        Transaction::price_cart(
            cart,
            CheckoutContext {
                actor,
                shift_id: "shift-1",
                idempotency_key: "k-1",
                tax_rate: TaxRate::from_percent(11),
                at: Utc::now(),
            },
        )
    }

    fn completed() -> Transaction {
        let mut txn = priced(&reference_cart(), &cashier()).unwrap();
        txn.complete().unwrap();
        txn
    }

    #[test]
    fn test_price_cart_builds_pending_transaction() {
        let txn = priced(&reference_cart(), &cashier()).unwrap();
        assert_eq!(txn.status, TransactionStatus::Pending);
        assert_eq!(txn.grand_total_cents, 22478);
        assert_eq!(txn.lines.len(), 2);
        assert_eq!(txn.lines[1].line_no, 2);
        assert_eq!(txn.pricing.source, PricingSource::Automatic);
    }

    #[test]
    fn test_manual_override_requires_elevation() {
        let cart = reference_cart().with_override(ManualOverride {
            discount_cents: 0,
            tax_cents: 0,
            reason: "tax exempt".into(),
        });

        let err = priced(&cart, &cashier()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let txn = priced(&cart, &cashier().with_override("mgr-1")).unwrap();
        assert_eq!(txn.pricing.source, PricingSource::Manual);
        assert_eq!(txn.pricing.approved_by.as_deref(), Some("mgr-1"));
        assert_eq!(txn.grand_total_cents, 22500);
    }

    #[test]
    fn test_cart_validation() {
        let empty = Cart::new(vec![], PaymentMethod::Cash);
        assert_eq!(priced(&empty, &cashier()).unwrap_err().kind(), ErrorKind::Validation);

        let dup = Cart::new(
            vec![CartLine::new("A", 1, 100), CartLine::new("A", 1, 100)],
            PaymentMethod::Cash,
        );
        assert!(matches!(
            priced(&dup, &cashier()).unwrap_err(),
            CoreError::Validation(ValidationError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_status_transitions() {
        use TransactionStatus::*;
        assert!(Pending.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Voided));
        assert!(Completed.can_transition_to(Refunded));
        assert!(!Voided.can_transition_to(Completed));
        assert!(!Refunded.can_transition_to(Voided));
        assert!(!Pending.can_transition_to(Voided));
    }

    #[test]
    fn test_void_window_is_inclusive() {
        let window = Duration::minutes(30);
        let txn = completed();

        assert!(txn.check_voidable(txn.created_at + window, window).is_ok());
        let err = txn
            .check_voidable(txn.created_at + window + Duration::seconds(1), window)
            .unwrap_err();
        assert!(matches!(err, CoreError::VoidWindowExpired { window_secs: 1800, .. }));
    }

    #[test]
    fn test_void_twice() {
        let mut txn = completed();
        let now = txn.created_at;
        txn.void("wrong item", "sup-1", now, Duration::minutes(30)).unwrap();
        assert_eq!(txn.status, TransactionStatus::Voided);

        let err = txn
            .void("again", "sup-1", now, Duration::minutes(30))
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyVoided { .. }));
    }

    #[test]
    fn test_void_after_partial_refund_rejected() {
        let mut txn = completed();
        txn.apply_refund(100).unwrap();
        let err = txn
            .check_voidable(txn.created_at, Duration::minutes(30))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransactionStatus { .. }));
    }

    #[test]
    fn test_refund_cap() {
        let mut txn = completed();
        txn.apply_refund(20000).unwrap();
        assert_eq!(txn.status, TransactionStatus::Completed);

        let err = txn.apply_refund(2479).unwrap_err();
        assert!(matches!(
            err,
            CoreError::RefundExceedsTotal { requested: 2479, refundable: 2478, .. }
        ));
        assert_eq!(txn.refunded_cents, 20000);

        txn.apply_refund(2478).unwrap();
        assert_eq!(txn.status, TransactionStatus::Refunded);

        let err = txn.apply_refund(1).unwrap_err();
        assert!(matches!(err, CoreError::RefundExceedsTotal { refundable: 0, .. }));
    }

    #[test]
    fn test_refund_of_voided_rejected() {
        let mut txn = completed();
        txn.void("x", "sup", txn.created_at, Duration::minutes(30)).unwrap();
        let err = txn.apply_refund(100).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransactionStatus { .. }));
    }

    #[test]
    fn test_full_refund_restocks_every_unit() {
        let mut txn = completed();
        let restock = txn.apply_refund(22478).unwrap();
        assert_eq!(
            restock,
            vec![
                RestockLine { line_no: 1, product_id: "A".into(), quantity: 2 },
                RestockLine { line_no: 2, product_id: "B".into(), quantity: 1 },
            ]
        );
    }

    #[test]
    fn test_partial_refunds_restock_fifo_by_line() {
        let mut txn = completed();
        // One A unit is 10000/22500 of subtotal → 9990.2 of grand total
        assert!(txn.apply_refund(9990).unwrap().is_empty());

        let restock = txn.apply_refund(1).unwrap();
        assert_eq!(restock, vec![RestockLine { line_no: 1, product_id: "A".into(), quantity: 1 }]);

        // Remaining refunds cover the rest exactly once
        let restock = txn.apply_refund(22478 - 9991).unwrap();
        assert_eq!(
            restock,
            vec![
                RestockLine { line_no: 1, product_id: "A".into(), quantity: 1 },
                RestockLine { line_no: 2, product_id: "B".into(), quantity: 1 },
            ]
        );
    }

    #[test]
    fn test_refund_amount_must_be_positive() {
        let mut txn = completed();
        assert_eq!(txn.apply_refund(0).unwrap_err().kind(), ErrorKind::Validation);
        assert!(validate_refund_reason("  ").is_err());
    }
}
