//! # Stock Repository
//!
//! The append-only stock movement ledger.
//!
//! ## Derived Stock
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  stock(store, product) = SELECT SUM(delta) FROM stock_movements         │
//! │                          WHERE store_id = ? AND product_id = ?          │
//! │                                                                         │
//! │  idx_stock_movements_product (store_id, product_id, delta) covers the   │
//! │  query, so the sum never touches the table rows.                        │
//! │                                                                         │
//! │  Availability checks run inside a commit unit that has already written │
//! │  (and so holds SQLite's write lock): no other writer can append a       │
//! │  movement between the check and the insert.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use tally_core::{CoreError, StockMovement};

/// Repository for reading the stock ledger.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

impl StockRepository {
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    /// Derived stock level for one product.
    pub async fn level(&self, store_id: &str, product_id: &str) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        level_on(&mut conn, store_id, product_id).await
    }

    /// Every movement for a product, in append order.
    pub async fn movements(&self, store_id: &str, product_id: &str) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(
            r#"
            SELECT id, product_id, store_id, delta, reason, reference_id, created_at
            FROM stock_movements
            WHERE store_id = ?1 AND product_id = ?2
            ORDER BY rowid
            "#,
        )
        .bind(store_id)
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Movements referencing a transaction or purchase order.
    pub async fn movements_for_reference(&self, reference_id: &str) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(
            r#"
            SELECT id, product_id, store_id, delta, reason, reference_id, created_at
            FROM stock_movements
            WHERE reference_id = ?1
            ORDER BY rowid
            "#,
        )
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }
}

// =============================================================================
// Commit-unit helpers
// =============================================================================

pub(crate) async fn level_on(conn: &mut SqliteConnection, store_id: &str, product_id: &str) -> DbResult<i64> {
    let level: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(delta), 0) FROM stock_movements WHERE store_id = ?1 AND product_id = ?2",
    )
    .bind(store_id)
    .bind(product_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(level)
}

/// Checks every negative movement against derived stock, product by product.
///
/// Rejects the whole set with `OutOfStock` on the first product that would
/// go below zero, and with `NotFound` for a product unknown to the store.
pub(crate) async fn ensure_available(
    conn: &mut SqliteConnection,
    store_id: &str,
    movements: &[StockMovement],
) -> DbResult<()> {
    let mut required: BTreeMap<&str, i64> = BTreeMap::new();
    for m in movements.iter().filter(|m| m.delta < 0) {
        *required.entry(m.product_id.as_str()).or_default() += -m.delta;
    }

    for (product_id, requested) in required {
        let known: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM products WHERE id = ?1 AND store_id = ?2 AND is_active = 1",
        )
        .bind(product_id)
        .bind(store_id)
        .fetch_optional(&mut *conn)
        .await?;

        if known.is_none() {
            return Err(DbError::not_found("Product", product_id));
        }

        let available = level_on(conn, store_id, product_id).await?;
        if available < requested {
            debug!(product_id = %product_id, available, requested, "Insufficient stock");
            return Err(CoreError::OutOfStock {
                product_id: product_id.to_string(),
                available,
                requested,
            }
            .into());
        }
    }

    Ok(())
}

pub(crate) async fn insert_movements(conn: &mut SqliteConnection, movements: &[StockMovement]) -> DbResult<()> {
    for m in movements {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, store_id, product_id, delta, reason, reference_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&m.id)
        .bind(&m.store_id)
        .bind(&m.product_id)
        .bind(m.delta)
        .bind(m.reason)
        .bind(&m.reference_id)
        .bind(m.created_at)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}
