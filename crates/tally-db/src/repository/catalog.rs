//! # Catalog Repository
//!
//! Products, suppliers and purchase orders, plus the receipt commit unit.
//!
//! ## Receiving Stock
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                  │
//! │   1. UPDATE purchase_orders SET updated_at                              │
//! │      WHERE status != 'received'          ← write lock, PO still open    │
//! │   2. per line: UPDATE purchase_order_lines                              │
//! │      SET received_quantity = received_quantity + q                      │
//! │      WHERE received_quantity + q <= ordered_quantity                    │
//! │                                          ← 0 rows: OverReceipt          │
//! │   3. status recomputed from the lines (received / partially_received)   │
//! │   4. INSERT receive movements (+q each)                                 │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two receipts racing for the same outstanding quantity serialize on step 1;
//! the loser re-evaluates step 2 against the winner's committed quantities.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::stock;
use tally_core::repository::ReceiptCommit;
use tally_core::{
    CoreError, PricingSource, Product, PurchaseOrder, PurchaseOrderLine, PurchaseOrderStatus,
    Supplier, Transaction,
};

#[derive(Debug, FromRow)]
struct PurchaseOrderRow {
    id: String,
    store_id: String,
    supplier_id: String,
    status: PurchaseOrderStatus,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Repository for catalog and procurement records.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // =========================================================================
    // Products
    // =========================================================================

    pub async fn insert_product(&self, product: &Product) -> DbResult<()> {
        debug!(product_id = %product.id, sku = %product.sku, "Registering product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, store_id, sku, name, unit_price_cents, is_active, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&product.id)
        .bind(&product.store_id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.unit_price_cents)
        .bind(product.is_active)
        .bind(product.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } if field.contains("sku") => {
                DbError::UniqueViolation {
                    field: "sku".to_string(),
                    value: product.sku.clone(),
                }
            }
            other => other,
        })?;

        Ok(())
    }

    pub async fn get_product(&self, store_id: &str, product_id: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, store_id, sku, name, unit_price_cents, is_active, created_at
            FROM products
            WHERE id = ?1 AND store_id = ?2
            "#,
        )
        .bind(product_id)
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    // =========================================================================
    // Suppliers
    // =========================================================================

    pub async fn insert_supplier(&self, supplier: &Supplier) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO suppliers (id, store_id, name, contact, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&supplier.id)
        .bind(&supplier.store_id)
        .bind(&supplier.name)
        .bind(&supplier.contact)
        .bind(supplier.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_supplier(&self, store_id: &str, supplier_id: &str) -> DbResult<Option<Supplier>> {
        let supplier = sqlx::query_as::<_, Supplier>(
            "SELECT id, store_id, name, contact, created_at FROM suppliers WHERE id = ?1 AND store_id = ?2",
        )
        .bind(supplier_id)
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(supplier)
    }

    // =========================================================================
    // Purchase orders
    // =========================================================================

    /// Inserts an order and its lines in one unit.
    pub async fn insert_purchase_order(&self, order: &PurchaseOrder) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO purchase_orders (
                id, store_id, supplier_id, status, created_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&order.id)
        .bind(&order.store_id)
        .bind(&order.supplier_id)
        .bind(order.status)
        .bind(&order.created_by)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for line in &order.lines {
            sqlx::query(
                r#"
                INSERT INTO purchase_order_lines (
                    purchase_order_id, product_id, ordered_quantity, received_quantity, unit_cost_cents
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(&order.id)
            .bind(&line.product_id)
            .bind(line.ordered_quantity)
            .bind(line.received_quantity)
            .bind(line.unit_cost_cents)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(po_id = %order.id, lines = order.lines.len(), "Purchase order created");
        Ok(())
    }

    pub async fn get_purchase_order(
        &self,
        store_id: &str,
        purchase_order_id: &str,
    ) -> DbResult<Option<PurchaseOrder>> {
        let row: Option<PurchaseOrderRow> = sqlx::query_as(
            r#"
            SELECT id, store_id, supplier_id, status, created_by, created_at, updated_at
            FROM purchase_orders
            WHERE id = ?1 AND store_id = ?2
            "#,
        )
        .bind(purchase_order_id)
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lines = sqlx::query_as::<_, PurchaseOrderLine>(
            r#"
            SELECT product_id, ordered_quantity, received_quantity, unit_cost_cents
            FROM purchase_order_lines
            WHERE purchase_order_id = ?1
            ORDER BY rowid
            "#,
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(PurchaseOrder {
            id: row.id,
            store_id: row.store_id,
            supplier_id: row.supplier_id,
            status: row.status,
            lines,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }

    /// Applies a receipt atomically. See the module docs for the steps.
    pub async fn commit_receipt(&self, commit: &ReceiptCommit) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query(
            r#"
            UPDATE purchase_orders SET updated_at = ?3
            WHERE id = ?1 AND store_id = ?2 AND status != 'received'
            "#,
        )
        .bind(&commit.purchase_order_id)
        .bind(&commit.store_id)
        .bind(commit.received_at)
        .execute(&mut *tx)
        .await?;

        if touched.rows_affected() == 0 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM purchase_orders WHERE id = ?1 AND store_id = ?2")
                    .bind(&commit.purchase_order_id)
                    .bind(&commit.store_id)
                    .fetch_optional(&mut *tx)
                    .await?;

            return Err(match exists {
                Some(_) => CoreError::PurchaseOrderClosed {
                    purchase_order_id: commit.purchase_order_id.clone(),
                }
                .into(),
                None => DbError::not_found("Purchase order", &commit.purchase_order_id),
            });
        }

        for line in &commit.lines {
            receive_line(&mut tx, &commit.purchase_order_id, &line.product_id, line.quantity).await?;
        }

        sqlx::query(
            r#"
            UPDATE purchase_orders SET status = CASE
                WHEN NOT EXISTS (
                    SELECT 1 FROM purchase_order_lines
                    WHERE purchase_order_id = ?1 AND received_quantity < ordered_quantity
                ) THEN 'received'
                ELSE 'partially_received'
            END
            WHERE id = ?1
            "#,
        )
        .bind(&commit.purchase_order_id)
        .execute(&mut *tx)
        .await?;

        stock::insert_movements(&mut tx, &commit.movements).await?;

        tx.commit().await?;

        info!(
            po_id = %commit.purchase_order_id,
            lines = commit.lines.len(),
            "Purchase order receipt committed"
        );
        Ok(())
    }
}

async fn receive_line(
    conn: &mut SqliteConnection,
    purchase_order_id: &str,
    product_id: &str,
    quantity: i64,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE purchase_order_lines
        SET received_quantity = received_quantity + ?3
        WHERE purchase_order_id = ?1
          AND product_id = ?2
          AND received_quantity + ?3 <= ordered_quantity
        "#,
    )
    .bind(purchase_order_id)
    .bind(product_id)
    .bind(quantity)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let line: Option<(i64, i64)> = sqlx::query_as(
        r#"
        SELECT ordered_quantity, received_quantity FROM purchase_order_lines
        WHERE purchase_order_id = ?1 AND product_id = ?2
        "#,
    )
    .bind(purchase_order_id)
    .bind(product_id)
    .fetch_optional(&mut *conn)
    .await?;

    Err(match line {
        Some((ordered, received)) => CoreError::OverReceipt {
            purchase_order_id: purchase_order_id.to_string(),
            product_id: product_id.to_string(),
            outstanding: ordered - received,
            requested: quantity,
        }
        .into(),
        None => DbError::not_found(
            "Purchase order line",
            format!("{}/{}", purchase_order_id, product_id),
        ),
    })
}

/// Checks every line of an automatically priced transaction against the
/// active catalog price, inside the checkout commit unit.
///
/// Manually priced transactions carry their own approved prices and are not
/// checked.
pub(crate) async fn ensure_catalog_prices(conn: &mut SqliteConnection, txn: &Transaction) -> DbResult<()> {
    if txn.pricing.source == PricingSource::Manual {
        return Ok(());
    }

    for line in &txn.lines {
        let catalog: Option<i64> = sqlx::query_scalar(
            "SELECT unit_price_cents FROM products WHERE id = ?1 AND store_id = ?2 AND is_active = 1",
        )
        .bind(&line.product_id)
        .bind(&txn.store_id)
        .fetch_optional(&mut *conn)
        .await?;

        match catalog {
            None => return Err(DbError::not_found("Product", &line.product_id)),
            Some(price) if price != line.unit_price_cents => {
                debug!(
                    product_id = %line.product_id,
                    catalog = price,
                    submitted = line.unit_price_cents,
                    "Cart price differs from catalog"
                );
                return Err(CoreError::PriceMismatch {
                    product_id: line.product_id.clone(),
                    catalog_cents: price,
                    submitted_cents: line.unit_price_cents,
                }
                .into());
            }
            Some(_) => {}
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use tally_core::{MovementReason, ReceiptLine, StockMovement};

    fn product(id: &str, sku: &str) -> Product {
        Product {
            id: id.into(),
            store_id: "s-1".into(),
            sku: sku.into(),
            name: format!("Product {}", sku),
            unit_price_cents: 500,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    async fn seeded() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let catalog = db.catalog();
        catalog.insert_product(&product("p-coffee", "COFFEE")).await.unwrap();
        catalog.insert_product(&product("p-tea", "TEA")).await.unwrap();
        catalog
            .insert_supplier(&Supplier {
                id: "sup-1".into(),
                store_id: "s-1".into(),
                name: "Roastery".into(),
                contact: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let now = Utc::now();
        catalog
            .insert_purchase_order(&PurchaseOrder {
                id: "po-1".into(),
                store_id: "s-1".into(),
                supplier_id: "sup-1".into(),
                status: PurchaseOrderStatus::Open,
                lines: vec![
                    PurchaseOrderLine {
                        product_id: "p-coffee".into(),
                        ordered_quantity: 10,
                        received_quantity: 0,
                        unit_cost_cents: 300,
                    },
                    PurchaseOrderLine {
                        product_id: "p-tea".into(),
                        ordered_quantity: 4,
                        received_quantity: 0,
                        unit_cost_cents: 150,
                    },
                ],
                created_by: "mgr-1".into(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        db
    }

    fn receipt(lines: &[(&str, i64)]) -> ReceiptCommit {
        let now = Utc::now();
        ReceiptCommit {
            store_id: "s-1".into(),
            purchase_order_id: "po-1".into(),
            lines: lines
                .iter()
                .map(|(p, q)| ReceiptLine {
                    product_id: p.to_string(),
                    quantity: *q,
                })
                .collect(),
            movements: lines
                .iter()
                .map(|(p, q)| StockMovement::new("s-1", p, *q, MovementReason::Receive, "po-1", now))
                .collect(),
            received_at: now,
        }
    }

    #[tokio::test]
    async fn test_duplicate_sku_rejected() {
        let db = seeded().await;
        let err = db
            .catalog()
            .insert_product(&product("p-other", "COFFEE"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { ref field, .. } if field == "sku"));
    }

    #[tokio::test]
    async fn test_receipt_updates_lines_status_and_stock() {
        let db = seeded().await;
        let catalog = db.catalog();

        catalog.commit_receipt(&receipt(&[("p-coffee", 6)])).await.unwrap();
        let po = catalog.get_purchase_order("s-1", "po-1").await.unwrap().unwrap();
        assert_eq!(po.status, PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(po.lines[0].received_quantity, 6);
        assert_eq!(db.stock().level("s-1", "p-coffee").await.unwrap(), 6);

        catalog
            .commit_receipt(&receipt(&[("p-coffee", 4), ("p-tea", 4)]))
            .await
            .unwrap();
        let po = catalog.get_purchase_order("s-1", "po-1").await.unwrap().unwrap();
        assert_eq!(po.status, PurchaseOrderStatus::Received);

        let err = catalog.commit_receipt(&receipt(&[("p-tea", 1)])).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::PurchaseOrderClosed { .. })));
    }

    #[tokio::test]
    async fn test_over_receipt_rolls_back_everything() {
        let db = seeded().await;
        let catalog = db.catalog();

        let err = catalog
            .commit_receipt(&receipt(&[("p-tea", 2), ("p-coffee", 11)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::OverReceipt { outstanding: 10, requested: 11, .. })
        ));

        let po = catalog.get_purchase_order("s-1", "po-1").await.unwrap().unwrap();
        assert_eq!(po.status, PurchaseOrderStatus::Open);
        assert_eq!(po.lines[1].received_quantity, 0);
        assert_eq!(db.stock().level("s-1", "p-tea").await.unwrap(), 0);
    }
}
