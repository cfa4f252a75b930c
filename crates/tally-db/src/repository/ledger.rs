//! # Ledger Repository
//!
//! Transactions, refunds, and the commit units that move money and stock.
//!
//! ## Commit Units
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CHECKOUT                                                               │
//! │   1. claim idempotency key          ← first write, takes write lock     │
//! │   2. line price = catalog price?    ✗ PriceMismatch (automatic only)    │
//! │   3. derived stock ≥ requested?     ✗ OutOfStock                        │
//! │   4. INSERT transaction + lines                                         │
//! │   5. INSERT sale movements (−qty)                                       │
//! │   6. INSERT drawer event            ✗ ShiftClosed                       │
//! │                                                                         │
//! │  VOID                                                                   │
//! │   1. UPDATE status='voided' WHERE status='completed'                    │
//! │                                AND refunded_cents = 0                   │
//! │                                     ✗ 0 rows: AlreadyVoided / status    │
//! │   2. INSERT void_reversal movements (+qty)                              │
//! │   3. INSERT drawer event            ✗ ShiftClosed                       │
//! │                                                                         │
//! │  REFUND                                                                 │
//! │   1. UPDATE refunded_cents = after WHERE refunded_cents = before        │
//! │                                     ✗ 0 rows: ConcurrentModification    │
//! │   2. INSERT refund                                                      │
//! │   3. INSERT refund_reversal movements                                   │
//! │   4. INSERT drawer event            ✗ ShiftClosed                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every unit opens with a write, so SQLite grants the write lock before any
//! check is read. Checks and writes therefore see the same state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::{catalog, idempotency, shift, stock};
use tally_core::repository::{CheckoutCommit, CoPurchase, RefundCommit, VoidCommit};
use tally_core::{
    CoreError, LineItem, PaymentMethod, PricingArtifact, PricingSource, Refund, Transaction,
    TransactionStatus,
};

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: String,
    store_id: String,
    cashier_id: String,
    shift_id: String,
    idempotency_key: String,
    subtotal_cents: i64,
    discount_total_cents: i64,
    tax_total_cents: i64,
    grand_total_cents: i64,
    tax_rate_bps: u32,
    payment_method: PaymentMethod,
    status: TransactionStatus,
    pricing_source: PricingSource,
    override_reason: Option<String>,
    override_approved_by: Option<String>,
    refunded_cents: i64,
    created_at: DateTime<Utc>,
    voided_at: Option<DateTime<Utc>>,
    void_reason: Option<String>,
    voided_by: Option<String>,
}

impl TransactionRow {
    fn into_transaction(self, lines: Vec<LineItem>) -> Transaction {
        Transaction {
            id: self.id,
            store_id: self.store_id,
            cashier_id: self.cashier_id,
            shift_id: self.shift_id,
            idempotency_key: self.idempotency_key,
            lines,
            subtotal_cents: self.subtotal_cents,
            discount_total_cents: self.discount_total_cents,
            tax_total_cents: self.tax_total_cents,
            grand_total_cents: self.grand_total_cents,
            tax_rate_bps: self.tax_rate_bps,
            payment_method: self.payment_method,
            status: self.status,
            pricing: PricingArtifact {
                source: self.pricing_source,
                override_reason: self.override_reason,
                approved_by: self.override_approved_by,
            },
            refunded_cents: self.refunded_cents,
            created_at: self.created_at,
            voided_at: self.voided_at,
            void_reason: self.void_reason,
            voided_by: self.voided_by,
        }
    }
}

#[derive(Debug, FromRow)]
struct LineRow {
    transaction_id: String,
    #[sqlx(flatten)]
    line: LineItem,
}

const TRANSACTION_COLUMNS: &str = "id, store_id, cashier_id, shift_id, idempotency_key, \
     subtotal_cents, discount_total_cents, tax_total_cents, grand_total_cents, tax_rate_bps, \
     payment_method, status, pricing_source, override_reason, override_approved_by, \
     refunded_cents, created_at, voided_at, void_reason, voided_by";

/// Repository for transactions and refunds.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_transaction(&self, store_id: &str, transaction_id: &str) -> DbResult<Option<Transaction>> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM transactions WHERE id = ?1 AND store_id = ?2",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lines = sqlx::query_as::<_, LineItem>(
            r#"
            SELECT line_no, product_id, quantity, unit_price_cents, line_discount_cents
            FROM transaction_lines
            WHERE transaction_id = ?1
            ORDER BY line_no
            "#,
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(row.into_transaction(lines)))
    }

    /// Transactions created in `[from, to)`, oldest first.
    pub async fn list_transactions(
        &self,
        store_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM transactions \
             WHERE store_id = ?1 AND created_at >= ?2 AND created_at < ?3 \
             ORDER BY created_at, id",
            TRANSACTION_COLUMNS
        ))
        .bind(store_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let line_rows: Vec<LineRow> = sqlx::query_as(
            r#"
            SELECT l.transaction_id, l.line_no, l.product_id, l.quantity,
                   l.unit_price_cents, l.line_discount_cents
            FROM transaction_lines l
            JOIN transactions t ON t.id = l.transaction_id
            WHERE t.store_id = ?1 AND t.created_at >= ?2 AND t.created_at < ?3
            ORDER BY l.transaction_id, l.line_no
            "#,
        )
        .bind(store_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let mut lines: HashMap<String, Vec<LineItem>> = HashMap::new();
        for row in line_rows {
            lines.entry(row.transaction_id).or_default().push(row.line);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let own = lines.remove(&row.id).unwrap_or_default();
                row.into_transaction(own)
            })
            .collect())
    }

    pub async fn list_refunds(&self, transaction_id: &str) -> DbResult<Vec<Refund>> {
        let refunds = sqlx::query_as::<_, Refund>(
            r#"
            SELECT id, transaction_id, store_id, amount_cents, reason,
                   cashier_id, shift_id, approved_by, created_at
            FROM refunds
            WHERE transaction_id = ?1
            ORDER BY created_at, rowid
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(refunds)
    }

    /// Products sold alongside any of `product_ids` in non-voided
    /// transactions, scored by the number of such transactions.
    pub async fn co_purchases(
        &self,
        store_id: &str,
        product_ids: &[String],
        limit: u32,
    ) -> DbResult<Vec<CoPurchase>> {
        if product_ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT l2.product_id AS product_id, COUNT(DISTINCT l2.transaction_id) AS score
            FROM transaction_lines l1
            JOIN transactions t ON t.id = l1.transaction_id
            JOIN transaction_lines l2 ON l2.transaction_id = l1.transaction_id
            WHERE t.store_id = "#,
        );
        qb.push_bind(store_id);
        qb.push(" AND t.status != 'voided' AND l1.product_id IN (");
        push_id_list(&mut qb, product_ids);
        qb.push(") AND l2.product_id NOT IN (");
        push_id_list(&mut qb, product_ids);
        qb.push(") GROUP BY l2.product_id ORDER BY score DESC, l2.product_id ASC LIMIT ");
        qb.push_bind(limit as i64);

        let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|(product_id, score)| CoPurchase { product_id, score })
            .collect())
    }

    // =========================================================================
    // Commit units
    // =========================================================================

    pub async fn commit_checkout(&self, commit: &CheckoutCommit) -> DbResult<()> {
        let txn = &commit.transaction;
        let mut tx = self.pool.begin().await?;

        idempotency::claim_on(&mut tx, &commit.idempotency, txn.created_at).await?;
        catalog::ensure_catalog_prices(&mut tx, txn).await?;
        stock::ensure_available(&mut tx, &txn.store_id, &commit.movements).await?;
        insert_transaction(&mut tx, txn).await?;
        stock::insert_movements(&mut tx, &commit.movements).await?;
        shift::append_event_on(&mut tx, &txn.shift_id, &commit.drawer_event, txn.created_at).await?;

        tx.commit().await?;

        info!(
            txn_id = %txn.id,
            cashier_id = %txn.cashier_id,
            grand_total = txn.grand_total_cents,
            "Checkout committed"
        );
        Ok(())
    }

    pub async fn commit_void(&self, commit: &VoidCommit) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE transactions SET
                status = 'voided',
                voided_at = ?3,
                void_reason = ?4,
                voided_by = ?5
            WHERE id = ?1 AND store_id = ?2
              AND status = 'completed' AND refunded_cents = 0
            "#,
        )
        .bind(&commit.transaction_id)
        .bind(&commit.store_id)
        .bind(commit.voided_at)
        .bind(&commit.void_reason)
        .bind(&commit.voided_by)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(
                status_conflict(&mut tx, &commit.store_id, &commit.transaction_id, "void").await?,
            );
        }

        stock::insert_movements(&mut tx, &commit.movements).await?;
        shift::append_event_on(&mut tx, &commit.shift_id, &commit.drawer_event, commit.voided_at).await?;

        tx.commit().await?;

        info!(txn_id = %commit.transaction_id, voided_by = %commit.voided_by, "Void committed");
        Ok(())
    }

    pub async fn commit_refund(&self, commit: &RefundCommit) -> DbResult<()> {
        let refund = &commit.refund;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE transactions SET refunded_cents = ?4, status = ?5
            WHERE id = ?1 AND store_id = ?2
              AND status = 'completed' AND refunded_cents = ?3
            "#,
        )
        .bind(&refund.transaction_id)
        .bind(&refund.store_id)
        .bind(commit.refunded_before)
        .bind(commit.refunded_after)
        .bind(commit.status_after)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            debug!(txn_id = %refund.transaction_id, "Refund lost a concurrent update");
            return Err(CoreError::ConcurrentModification {
                entity: "Transaction".to_string(),
                id: refund.transaction_id.clone(),
            }
            .into());
        }

        sqlx::query(
            r#"
            INSERT INTO refunds (
                id, transaction_id, store_id, amount_cents, reason,
                cashier_id, shift_id, approved_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&refund.id)
        .bind(&refund.transaction_id)
        .bind(&refund.store_id)
        .bind(refund.amount_cents)
        .bind(&refund.reason)
        .bind(&refund.cashier_id)
        .bind(&refund.shift_id)
        .bind(&refund.approved_by)
        .bind(refund.created_at)
        .execute(&mut *tx)
        .await?;

        stock::insert_movements(&mut tx, &commit.movements).await?;
        shift::append_event_on(&mut tx, &refund.shift_id, &commit.drawer_event, refund.created_at).await?;

        tx.commit().await?;

        info!(
            txn_id = %refund.transaction_id,
            refund_id = %refund.id,
            amount = refund.amount_cents,
            refunded_total = commit.refunded_after,
            "Refund committed"
        );
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn push_id_list(qb: &mut QueryBuilder<'_, Sqlite>, ids: &[String]) {
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id.clone());
    }
}

async fn insert_transaction(conn: &mut SqliteConnection, txn: &Transaction) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, store_id, cashier_id, shift_id, idempotency_key,
            subtotal_cents, discount_total_cents, tax_total_cents, grand_total_cents, tax_rate_bps,
            payment_method, status, pricing_source, override_reason, override_approved_by,
            refunded_cents, created_at, voided_at, void_reason, voided_by
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
            ?11, ?12, ?13, ?14, ?15, ?16, ?17, NULL, NULL, NULL
        )
        "#,
    )
    .bind(&txn.id)
    .bind(&txn.store_id)
    .bind(&txn.cashier_id)
    .bind(&txn.shift_id)
    .bind(&txn.idempotency_key)
    .bind(txn.subtotal_cents)
    .bind(txn.discount_total_cents)
    .bind(txn.tax_total_cents)
    .bind(txn.grand_total_cents)
    .bind(txn.tax_rate_bps)
    .bind(txn.payment_method)
    .bind(txn.status)
    .bind(txn.pricing.source)
    .bind(&txn.pricing.override_reason)
    .bind(&txn.pricing.approved_by)
    .bind(txn.refunded_cents)
    .bind(txn.created_at)
    .execute(&mut *conn)
    .await?;

    for line in &txn.lines {
        sqlx::query(
            r#"
            INSERT INTO transaction_lines (
                transaction_id, line_no, product_id, quantity, unit_price_cents, line_discount_cents
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&txn.id)
        .bind(line.line_no)
        .bind(&line.product_id)
        .bind(line.quantity)
        .bind(line.unit_price_cents)
        .bind(line.line_discount_cents)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Explains why a conditional status update matched no row.
async fn status_conflict(
    conn: &mut SqliteConnection,
    store_id: &str,
    transaction_id: &str,
    operation: &str,
) -> DbResult<DbError> {
    let status: Option<TransactionStatus> =
        sqlx::query_scalar("SELECT status FROM transactions WHERE id = ?1 AND store_id = ?2")
            .bind(transaction_id)
            .bind(store_id)
            .fetch_optional(&mut *conn)
            .await?;

    Ok(match status {
        None => DbError::not_found("Transaction", transaction_id),
        Some(TransactionStatus::Voided) => CoreError::AlreadyVoided {
            transaction_id: transaction_id.to_string(),
        }
        .into(),
        Some(status) => CoreError::InvalidTransactionStatus {
            transaction_id: transaction_id.to_string(),
            status,
            operation: operation.to_string(),
        }
        .into(),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
