//! # Catalog & Inventory Types
//!
//! Products, suppliers, purchase orders and the stock movement ledger.
//!
//! ## Derived Stock
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  stock_movements (append-only)                                          │
//! │                                                                         │
//! │  product  │ delta │ reason           │ reference                        │
//! │  ─────────┼───────┼──────────────────┼────────────────                  │
//! │  COFFEE   │  +24  │ receive          │ po-0001                          │
//! │  COFFEE   │   -2  │ sale             │ txn-0042                         │
//! │  COFFEE   │   +2  │ void_reversal    │ txn-0042                         │
//! │  COFFEE   │   -1  │ sale             │ txn-0043                         │
//! │                                                                         │
//! │  stock(COFFEE) = 24 - 2 + 2 - 1 = 23   ← never stored, always summed   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reversal is always "append a compensating movement", never an update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;

// =============================================================================
// Payment Method
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash into the drawer.
    Cash,
    /// Card payment on an external terminal. Never moves drawer cash.
    ExternalCard,
}

impl PaymentMethod {
    /// Whether money for this method passes through the cash drawer.
    pub fn moves_drawer_cash(&self) -> bool {
        matches!(self, PaymentMethod::Cash)
    }
}

// =============================================================================
// Product
// =============================================================================

/// A product sold at a store.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub store_id: String,
    /// Stock Keeping Unit - business identifier.
    pub sku: String,
    pub name: String,
    /// List price in minor units. Carts snapshot this at add time.
    pub unit_price_cents: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }
}

// =============================================================================
// Stock Movement
// =============================================================================

/// Why a stock movement was appended.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementReason {
    Sale,
    VoidReversal,
    RefundReversal,
    Receive,
}

/// An immutable, signed quantity change for one product at one store.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: String,
    pub product_id: String,
    pub store_id: String,
    /// Negative for sales, positive for receipts and reversals.
    pub delta: i64,
    pub reason: MovementReason,
    /// Originating transaction or purchase order id.
    pub reference_id: String,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn new(
        store_id: &str,
        product_id: &str,
        delta: i64,
        reason: MovementReason,
        reference_id: &str,
        at: DateTime<Utc>,
    ) -> Self {
        StockMovement {
            id: uuid::Uuid::new_v4().to_string(),
            product_id: product_id.to_string(),
            store_id: store_id.to_string(),
            delta,
            reason,
            reference_id: reference_id.to_string(),
            created_at: at,
        }
    }
}

/// Derived stock level: the running sum of movement deltas.
pub fn derived_stock<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> i64 {
    movements.into_iter().map(|m| m.delta).sum()
}

// =============================================================================
// Supplier
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: String,
    pub store_id: String,
    pub name: String,
    pub contact: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Purchase Order
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Open,
    PartiallyReceived,
    Received,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    pub product_id: String,
    pub ordered_quantity: i64,
    pub received_quantity: i64,
    pub unit_cost_cents: i64,
}

impl PurchaseOrderLine {
    /// Quantity still expected from the supplier.
    pub fn outstanding(&self) -> i64 {
        self.ordered_quantity - self.received_quantity
    }
}

/// One received line handed to `receive`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: String,
    pub store_id: String,
    pub supplier_id: String,
    pub status: PurchaseOrderStatus,
    pub lines: Vec<PurchaseOrderLine>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseOrder {
    /// Applies received quantities, closing out outstanding amounts per line.
    ///
    /// Fails without mutating anything when the order is already fully
    /// received, a product is not on the order, or a line would be
    /// over-received.
    pub fn apply_receipt(&mut self, receipt: &[ReceiptLine], at: DateTime<Utc>) -> CoreResult<()> {
        if self.status == PurchaseOrderStatus::Received {
            return Err(CoreError::PurchaseOrderClosed {
                purchase_order_id: self.id.clone(),
            });
        }

        // Validate everything first so a rejected receipt leaves self untouched
        for line in receipt {
            let po_line = self
                .lines
                .iter()
                .find(|l| l.product_id == line.product_id)
                .ok_or_else(|| {
                    CoreError::not_found(
                        "Purchase order line",
                        format!("{}/{}", self.id, line.product_id),
                    )
                })?;

            if line.quantity > po_line.outstanding() {
                return Err(CoreError::OverReceipt {
                    purchase_order_id: self.id.clone(),
                    product_id: line.product_id.clone(),
                    outstanding: po_line.outstanding(),
                    requested: line.quantity,
                });
            }
        }

        for line in receipt {
            if let Some(po_line) = self
                .lines
                .iter_mut()
                .find(|l| l.product_id == line.product_id)
            {
                po_line.received_quantity += line.quantity;
            }
        }

        self.status = if self.lines.iter().all(|l| l.outstanding() == 0) {
            PurchaseOrderStatus::Received
        } else {
            PurchaseOrderStatus::PartiallyReceived
        };
        self.updated_at = at;

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> PurchaseOrder {
        let now = Utc::now();
        PurchaseOrder {
            id: "po-1".into(),
            store_id: "store-1".into(),
            supplier_id: "sup-1".into(),
            status: PurchaseOrderStatus::Open,
            lines: vec![
                PurchaseOrderLine {
                    product_id: "COFFEE".into(),
                    ordered_quantity: 10,
                    received_quantity: 0,
                    unit_cost_cents: 400,
                },
                PurchaseOrderLine {
                    product_id: "TEA".into(),
                    ordered_quantity: 5,
                    received_quantity: 0,
                    unit_cost_cents: 200,
                },
            ],
            created_by: "mgr".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn receipt(product_id: &str, quantity: i64) -> ReceiptLine {
        ReceiptLine {
            product_id: product_id.into(),
            quantity,
        }
    }

    #[test]
    fn test_partial_then_full_receipt() {
        let mut po = order();
        po.apply_receipt(&[receipt("COFFEE", 4)], Utc::now()).unwrap();
        assert_eq!(po.status, PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(po.lines[0].outstanding(), 6);

        po.apply_receipt(&[receipt("COFFEE", 6), receipt("TEA", 5)], Utc::now())
            .unwrap();
        assert_eq!(po.status, PurchaseOrderStatus::Received);

        let err = po.apply_receipt(&[receipt("TEA", 1)], Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::PurchaseOrderClosed { .. }));
    }

    #[test]
    fn test_over_receipt_leaves_order_untouched() {
        let mut po = order();
        let before = po.clone();
        let err = po
            .apply_receipt(&[receipt("TEA", 2), receipt("COFFEE", 11)], Utc::now())
            .unwrap_err();
        assert!(matches!(err, CoreError::OverReceipt { outstanding: 10, requested: 11, .. }));
        assert_eq!(po, before);
    }

    #[test]
    fn test_derived_stock_sums_deltas() {
        let now = Utc::now();
        let moves = vec![
            StockMovement::new("s", "COFFEE", 24, MovementReason::Receive, "po-1", now),
            StockMovement::new("s", "COFFEE", -2, MovementReason::Sale, "t-1", now),
            StockMovement::new("s", "COFFEE", 2, MovementReason::VoidReversal, "t-1", now),
        ];
        assert_eq!(derived_stock(&moves), 24);
    }

    #[test]
    fn test_only_cash_moves_drawer() {
        assert!(PaymentMethod::Cash.moves_drawer_cash());
        assert!(!PaymentMethod::ExternalCard.moves_drawer_cash());
    }
}
