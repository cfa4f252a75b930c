//! # Inventory Service
//!
//! Catalog records, purchase orders and receiving. Stock is never stored as
//! a counter: receiving appends `receive` movements to the same ledger that
//! sales, voids and refunds write to.
//!
//! ```text
//!  create_purchase_order          receive_purchase_order (partial allowed)
//!  ┌──────┐ ─────────────► ┌────────────────────┐ ─────────────► ┌──────────┐
//!  │ open │                │ partially_received │                │ received │
//!  └──────┘ ───────────────┴────────────────────┴──────────────► └──────────┘
//!                 every outstanding quantity received at once
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use tally_core::repository::ReceiptCommit;
use tally_core::validation::{
    validate_cart_size, validate_id, validate_name, validate_price_cents, validate_quantity, validate_sku,
    validate_unique_products,
};
use tally_core::{
    Actor, Clock, CoreError, CoreResult, MovementReason, Product, PurchaseOrder, PurchaseOrderLine,
    PurchaseOrderStatus, ReceiptLine, Repository, StockMovement, Supplier,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSupplier {
    pub name: String,
    #[serde(default)]
    pub contact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: String,
    pub quantity: i64,
    pub unit_cost_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub supplier_id: String,
    pub lines: Vec<OrderLine>,
}

pub struct InventoryService {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
}

impl InventoryService {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>) -> Self {
        InventoryService { repo, clock }
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    pub async fn register_product(&self, actor: &Actor, new: NewProduct) -> CoreResult<Product> {
        validate_sku(&new.sku)?;
        validate_name("name", &new.name)?;
        validate_price_cents(new.unit_price_cents)?;

        let product = Product {
            id: uuid::Uuid::new_v4().to_string(),
            store_id: actor.store_id.clone(),
            sku: new.sku.trim().to_string(),
            name: new.name.trim().to_string(),
            unit_price_cents: new.unit_price_cents,
            is_active: true,
            created_at: self.clock.now(),
        };
        self.repo.insert_product(&product).await?;

        info!(product_id = %product.id, sku = %product.sku, "Product registered");
        Ok(product)
    }

    pub async fn get_product(&self, actor: &Actor, product_id: &str) -> CoreResult<Product> {
        self.repo
            .get_product(&actor.store_id, product_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Product", product_id))
    }

    pub async fn register_supplier(&self, actor: &Actor, new: NewSupplier) -> CoreResult<Supplier> {
        validate_name("name", &new.name)?;

        let supplier = Supplier {
            id: uuid::Uuid::new_v4().to_string(),
            store_id: actor.store_id.clone(),
            name: new.name.trim().to_string(),
            contact: new.contact.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            created_at: self.clock.now(),
        };
        self.repo.insert_supplier(&supplier).await?;

        info!(supplier_id = %supplier.id, name = %supplier.name, "Supplier registered");
        Ok(supplier)
    }

    // =========================================================================
    // Purchase Orders
    // =========================================================================

    /// Creates an open purchase order. Needs an elevated actor.
    pub async fn create_purchase_order(&self, actor: &Actor, new: NewPurchaseOrder) -> CoreResult<PurchaseOrder> {
        actor.require_elevated("create a purchase order")?;

        validate_id("supplier_id", &new.supplier_id)?;
        validate_cart_size(new.lines.len())?;
        validate_unique_products("product_id", new.lines.iter().map(|l| l.product_id.as_str()))?;
        for line in &new.lines {
            validate_id("product_id", &line.product_id)?;
            validate_quantity(line.quantity)?;
            validate_price_cents(line.unit_cost_cents)?;
        }

        if self.repo.get_supplier(&actor.store_id, &new.supplier_id).await?.is_none() {
            return Err(CoreError::not_found("Supplier", &new.supplier_id));
        }
        for line in &new.lines {
            if self.repo.get_product(&actor.store_id, &line.product_id).await?.is_none() {
                return Err(CoreError::not_found("Product", &line.product_id));
            }
        }

        let now = self.clock.now();
        let order = PurchaseOrder {
            id: uuid::Uuid::new_v4().to_string(),
            store_id: actor.store_id.clone(),
            supplier_id: new.supplier_id,
            status: PurchaseOrderStatus::Open,
            lines: new
                .lines
                .into_iter()
                .map(|l| PurchaseOrderLine {
                    product_id: l.product_id,
                    ordered_quantity: l.quantity,
                    received_quantity: 0,
                    unit_cost_cents: l.unit_cost_cents,
                })
                .collect(),
            created_by: actor.cashier_id.clone(),
            created_at: now,
            updated_at: now,
        };
        self.repo.insert_purchase_order(&order).await?;

        info!(purchase_order_id = %order.id, lines = order.lines.len(), "Purchase order created");
        Ok(order)
    }

    /// Receives goods against a purchase order, appending one `receive`
    /// movement per line. Over-receiving any line rejects the whole receipt.
    pub async fn receive_purchase_order(
        &self,
        actor: &Actor,
        purchase_order_id: &str,
        lines: Vec<ReceiptLine>,
    ) -> CoreResult<PurchaseOrder> {
        validate_cart_size(lines.len())?;
        validate_unique_products("product_id", lines.iter().map(|l| l.product_id.as_str()))?;
        for line in &lines {
            validate_quantity(line.quantity)?;
        }

        let mut order = self.load_order(actor, purchase_order_id).await?;
        let now = self.clock.now();
        order.apply_receipt(&lines, now)?;

        let movements = lines
            .iter()
            .map(|l| StockMovement::new(&order.store_id, &l.product_id, l.quantity, MovementReason::Receive, &order.id, now))
            .collect();

        // The stored quantities are re-checked inside the commit unit
        self.repo
            .commit_receipt(&ReceiptCommit {
                store_id: order.store_id.clone(),
                purchase_order_id: order.id.clone(),
                lines,
                movements,
                received_at: now,
            })
            .await?;

        let order = self.load_order(actor, purchase_order_id).await?;
        info!(purchase_order_id, status = ?order.status, received_by = %actor.cashier_id, "Purchase order received");
        Ok(order)
    }

    pub async fn get_purchase_order(&self, actor: &Actor, purchase_order_id: &str) -> CoreResult<PurchaseOrder> {
        self.load_order(actor, purchase_order_id).await
    }

    async fn load_order(&self, actor: &Actor, purchase_order_id: &str) -> CoreResult<PurchaseOrder> {
        self.repo
            .get_purchase_order(&actor.store_id, purchase_order_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Purchase order", purchase_order_id))
    }

    // =========================================================================
    // Stock
    // =========================================================================

    pub async fn stock_level(&self, actor: &Actor, product_id: &str) -> CoreResult<i64> {
        self.repo.stock_level(&actor.store_id, product_id).await
    }

    pub async fn stock_movements(&self, actor: &Actor, product_id: &str) -> CoreResult<Vec<StockMovement>> {
        self.repo.stock_movements(&actor.store_id, product_id).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tally_core::{ErrorKind, ManualClock, Role};
    use tally_db::{Database, DbConfig};

    async fn service() -> InventoryService {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        InventoryService::new(Arc::new(db), Arc::new(ManualClock::new(Utc::now())))
    }

    fn manager() -> Actor {
        Actor::new("m-1", Role::Manager, "s-1")
    }

    async fn product(svc: &InventoryService, sku: &str) -> Product {
        svc.register_product(
            &manager(),
            NewProduct {
                sku: sku.into(),
                name: format!("Item {}", sku),
                unit_price_cents: 1000,
            },
        )
        .await
        .unwrap()
    }

    async fn order(svc: &InventoryService, lines: Vec<(&str, i64)>) -> PurchaseOrder {
        let supplier = svc
            .register_supplier(
                &manager(),
                NewSupplier {
                    name: "Acme Wholesale".into(),
                    contact: Some("orders@acme.test".into()),
                },
            )
            .await
            .unwrap();

        svc.create_purchase_order(
            &manager(),
            NewPurchaseOrder {
                supplier_id: supplier.id,
                lines: lines
                    .into_iter()
                    .map(|(p, q)| OrderLine {
                        product_id: p.to_string(),
                        quantity: q,
                        unit_cost_cents: 400,
                    })
                    .collect(),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_sku_rejected() {
        let svc = service().await;
        product(&svc, "SKU-1").await;

        let err = svc
            .register_product(
                &manager(),
                NewProduct {
                    sku: "SKU-1".into(),
                    name: "Other".into(),
                    unit_price_cents: 5,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_cashier_cannot_create_purchase_order() {
        let svc = service().await;
        let p = product(&svc, "SKU-1").await;

        let err = svc
            .create_purchase_order(
                &Actor::new("c-1", Role::Cashier, "s-1"),
                NewPurchaseOrder {
                    supplier_id: "sup-1".into(),
                    lines: vec![OrderLine {
                        product_id: p.id,
                        quantity: 1,
                        unit_cost_cents: 1,
                    }],
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_partial_then_full_receipt() {
        let svc = service().await;
        let a = product(&svc, "SKU-A").await;
        let b = product(&svc, "SKU-B").await;
        let po = order(&svc, vec![(&a.id, 10), (&b.id, 4)]).await;

        let after = svc
            .receive_purchase_order(
                &manager(),
                &po.id,
                vec![ReceiptLine {
                    product_id: a.id.clone(),
                    quantity: 6,
                }],
            )
            .await
            .unwrap();
        assert_eq!(after.status, PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(svc.stock_level(&manager(), &a.id).await.unwrap(), 6);

        let after = svc
            .receive_purchase_order(
                &manager(),
                &po.id,
                vec![
                    ReceiptLine {
                        product_id: a.id.clone(),
                        quantity: 4,
                    },
                    ReceiptLine {
                        product_id: b.id.clone(),
                        quantity: 4,
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(after.status, PurchaseOrderStatus::Received);
        assert_eq!(svc.stock_level(&manager(), &a.id).await.unwrap(), 10);

        let movements = svc.stock_movements(&manager(), &a.id).await.unwrap();
        assert_eq!(movements.len(), 2);
        assert!(movements.iter().all(|m| m.reason == MovementReason::Receive && m.reference_id == po.id));

        let err = svc
            .receive_purchase_order(
                &manager(),
                &po.id,
                vec![ReceiptLine {
                    product_id: a.id.clone(),
                    quantity: 1,
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PurchaseOrderClosed { .. }));
    }

    #[tokio::test]
    async fn test_over_receipt_writes_nothing() {
        let svc = service().await;
        let a = product(&svc, "SKU-A").await;
        let b = product(&svc, "SKU-B").await;
        let po = order(&svc, vec![(&a.id, 2), (&b.id, 2)]).await;

        let err = svc
            .receive_purchase_order(
                &manager(),
                &po.id,
                vec![
                    ReceiptLine {
                        product_id: a.id.clone(),
                        quantity: 2,
                    },
                    ReceiptLine {
                        product_id: b.id.clone(),
                        quantity: 3,
                    },
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::OverReceipt { outstanding: 2, requested: 3, .. }));
        assert_eq!(svc.stock_level(&manager(), &a.id).await.unwrap(), 0);

        let unchanged = svc.get_purchase_order(&manager(), &po.id).await.unwrap();
        assert_eq!(unchanged.status, PurchaseOrderStatus::Open);
    }

    #[tokio::test]
    async fn test_order_requires_known_supplier() {
        let svc = service().await;
        let a = product(&svc, "SKU-A").await;

        let err = svc
            .create_purchase_order(
                &manager(),
                NewPurchaseOrder {
                    supplier_id: "missing".into(),
                    lines: vec![OrderLine {
                        product_id: a.id,
                        quantity: 1,
                        unit_cost_cents: 1,
                    }],
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
