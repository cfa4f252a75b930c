//! # Idempotency Repository
//!
//! Stored outcomes keyed by `(store_id, cashier_id, key)`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Successful checkout   record inserted INSIDE the checkout commit unit  │
//! │                        → record exists  ⇔  side effects exist           │
//! │                                                                         │
//! │  Validation failure    record inserted on its own (no side effects)     │
//! │                                                                         │
//! │  Expired record        deleted lazily on the next insert for its key,   │
//! │                        or in bulk by purge_expired                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use tally_core::idempotency::{IdempotencyOutcome, IdempotencyRecord};
use tally_core::CoreError;

#[derive(Debug, FromRow)]
struct IdempotencyRow {
    store_id: String,
    cashier_id: String,
    key: String,
    transaction_id: Option<String>,
    outcome: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<IdempotencyRow> for IdempotencyRecord {
    type Error = DbError;

    fn try_from(row: IdempotencyRow) -> DbResult<Self> {
        let outcome: IdempotencyOutcome = serde_json::from_str(&row.outcome)?;
        Ok(IdempotencyRecord {
            store_id: row.store_id,
            cashier_id: row.cashier_id,
            key: row.key,
            transaction_id: row.transaction_id,
            outcome,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

/// Repository for idempotency records.
#[derive(Debug, Clone)]
pub struct IdempotencyRepository {
    pool: SqlitePool,
}

impl IdempotencyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        IdempotencyRepository { pool }
    }

    /// The unexpired record for a key, if any.
    pub async fn find(
        &self,
        store_id: &str,
        cashier_id: &str,
        key: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Option<IdempotencyRecord>> {
        let row: Option<IdempotencyRow> = sqlx::query_as(
            r#"
            SELECT store_id, cashier_id, key, transaction_id, outcome, created_at, expires_at
            FROM idempotency_records
            WHERE store_id = ?1 AND cashier_id = ?2 AND key = ?3 AND expires_at > ?4
            "#,
        )
        .bind(store_id)
        .bind(cashier_id)
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(IdempotencyRecord::try_from).transpose()
    }

    /// Inserts a record on its own. Returns `false` when an unexpired record
    /// already holds the key.
    pub async fn insert(&self, record: &IdempotencyRecord, now: DateTime<Utc>) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        delete_expired_key(&mut tx, record, now).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_records (
                store_id, cashier_id, key, transaction_id, outcome, created_at, expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (store_id, cashier_id, key) DO NOTHING
            "#,
        )
        .bind(&record.store_id)
        .bind(&record.cashier_id)
        .bind(&record.key)
        .bind(&record.transaction_id)
        .bind(serde_json::to_string(&record.outcome)?)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    /// Deletes every expired record.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= ?1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            info!(purged, "Purged expired idempotency records");
        }
        Ok(purged)
    }
}

// =============================================================================
// Commit-unit helpers
// =============================================================================

async fn delete_expired_key(
    conn: &mut SqliteConnection,
    record: &IdempotencyRecord,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        DELETE FROM idempotency_records
        WHERE store_id = ?1 AND cashier_id = ?2 AND key = ?3 AND expires_at <= ?4
        "#,
    )
    .bind(&record.store_id)
    .bind(&record.cashier_id)
    .bind(&record.key)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Claims the key inside a commit unit.
///
/// This is the unit's first statement, so it also takes the write lock.
/// A live record for the key means a concurrent request got there first:
/// `RequestInFlight`, and the whole unit rolls back.
pub(crate) async fn claim_on(
    conn: &mut SqliteConnection,
    record: &IdempotencyRecord,
    now: DateTime<Utc>,
) -> DbResult<()> {
    delete_expired_key(conn, record, now).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO idempotency_records (
            store_id, cashier_id, key, transaction_id, outcome, created_at, expires_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&record.store_id)
    .bind(&record.cashier_id)
    .bind(&record.key)
    .bind(&record.transaction_id)
    .bind(serde_json::to_string(&record.outcome)?)
    .bind(record.created_at)
    .bind(record.expires_at)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => {
            debug!(key = %record.key, "Idempotency key claimed");
            Ok(())
        }
        Err(e) => {
            let err = DbError::from(e);
            if err.is_unique_on("idempotency_records.") {
                Err(CoreError::RequestInFlight {
                    key: record.key.clone(),
                }
                .into())
            } else {
                Err(err)
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
