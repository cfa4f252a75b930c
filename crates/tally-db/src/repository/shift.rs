//! # Shift Repository
//!
//! Shifts and their drawer event logs.
//!
//! ## Concurrency Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  open     INSERT; partial unique index idx_shifts_one_open              │
//! │           (cashier_id, store_id) WHERE closed_at IS NULL                │
//! │           → second concurrent open fails with ShiftAlreadyOpen          │
//! │                                                                         │
//! │  event    INSERT ... SELECT ... FROM shifts WHERE closed_at IS NULL     │
//! │           seq = MAX(seq) + 1, computed under the write lock             │
//! │           → no row inserted means the shift is closed                   │
//! │                                                                         │
//! │  close    UPDATE ... WHERE closed_at IS NULL                            │
//! │                    AND (SELECT COUNT(*) FROM drawer_events) = n         │
//! │           → an event appended after the expected cash was computed      │
//! │             fails the close with ConcurrentModification (retry)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use tally_core::{CoreError, DrawerEvent, DrawerEventKind, NewDrawerEvent, Shift};

#[derive(Debug, FromRow)]
struct ShiftRow {
    id: String,
    cashier_id: String,
    store_id: String,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    opening_cash_cents: i64,
    closing_cash_cents: Option<i64>,
    variance_cents: Option<i64>,
}

impl ShiftRow {
    fn into_shift(self, events: Vec<DrawerEvent>) -> Shift {
        Shift {
            id: self.id,
            cashier_id: self.cashier_id,
            store_id: self.store_id,
            opened_at: self.opened_at,
            closed_at: self.closed_at,
            opening_cash_cents: self.opening_cash_cents,
            closing_cash_cents: self.closing_cash_cents,
            variance_cents: self.variance_cents,
            events,
        }
    }
}

const SHIFT_COLUMNS: &str = "id, cashier_id, store_id, opened_at, closed_at, \
     opening_cash_cents, closing_cash_cents, variance_cents";

/// Repository for shift database operations.
#[derive(Debug, Clone)]
pub struct ShiftRepository {
    pool: SqlitePool,
}

impl ShiftRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ShiftRepository { pool }
    }

    /// Inserts a freshly opened shift.
    pub async fn insert(&self, shift: &Shift) -> DbResult<()> {
        debug!(shift_id = %shift.id, cashier_id = %shift.cashier_id, "Opening shift");

        let result = sqlx::query(
            r#"
            INSERT INTO shifts (
                id, cashier_id, store_id, opened_at, closed_at,
                opening_cash_cents, closing_cash_cents, variance_cents
            ) VALUES (?1, ?2, ?3, ?4, NULL, ?5, NULL, NULL)
            "#,
        )
        .bind(&shift.id)
        .bind(&shift.cashier_id)
        .bind(&shift.store_id)
        .bind(shift.opened_at)
        .bind(shift.opening_cash_cents)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = DbError::from(e);
                if err.is_unique_on("shifts.") {
                    Err(CoreError::ShiftAlreadyOpen {
                        cashier_id: shift.cashier_id.clone(),
                        store_id: shift.store_id.clone(),
                    }
                    .into())
                } else {
                    Err(err)
                }
            }
        }
    }

    pub async fn get_by_id(&self, shift_id: &str) -> DbResult<Option<Shift>> {
        let row: Option<ShiftRow> =
            sqlx::query_as(&format!("SELECT {} FROM shifts WHERE id = ?1", SHIFT_COLUMNS))
                .bind(shift_id)
                .fetch_optional(&self.pool)
                .await?;

        self.with_events(row).await
    }

    /// The open shift for a cashier at a store, if any.
    pub async fn find_open(&self, cashier_id: &str, store_id: &str) -> DbResult<Option<Shift>> {
        let row: Option<ShiftRow> = sqlx::query_as(&format!(
            "SELECT {} FROM shifts WHERE cashier_id = ?1 AND store_id = ?2 AND closed_at IS NULL",
            SHIFT_COLUMNS
        ))
        .bind(cashier_id)
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        self.with_events(row).await
    }

    async fn with_events(&self, row: Option<ShiftRow>) -> DbResult<Option<Shift>> {
        match row {
            Some(row) => {
                let events = self.events(&row.id).await?;
                Ok(Some(row.into_shift(events)))
            }
            None => Ok(None),
        }
    }

    /// The drawer event log, in order.
    pub async fn events(&self, shift_id: &str) -> DbResult<Vec<DrawerEvent>> {
        let events = sqlx::query_as::<_, DrawerEvent>(
            r#"
            SELECT id, shift_id, seq, kind, amount_cents, payment_method, reference_id, created_at
            FROM drawer_events
            WHERE shift_id = ?1
            ORDER BY seq
            "#,
        )
        .bind(shift_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Appends a drawer event to an open shift as its own unit.
    pub async fn append_event(
        &self,
        shift_id: &str,
        event: &NewDrawerEvent,
        at: DateTime<Utc>,
    ) -> DbResult<DrawerEvent> {
        let mut tx = self.pool.begin().await?;
        let appended = append_event_on(&mut tx, shift_id, event, at).await?;
        tx.commit().await?;
        Ok(appended)
    }

    /// Persists a shift closed by `Shift::close`.
    ///
    /// The terminal `Close` event must be the last entry of `closed.events`;
    /// every entry before it must already be stored.
    pub async fn close(&self, closed: &Shift) -> DbResult<()> {
        let close_event = closed
            .events
            .last()
            .filter(|e| e.kind == DrawerEventKind::Close)
            .ok_or_else(|| DbError::Internal("closed shift has no close event".to_string()))?;
        let closed_at = closed
            .closed_at
            .ok_or_else(|| DbError::Internal("closed shift has no closed_at".to_string()))?;
        let prior_events = closed.events.len() as i64 - 1;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE shifts SET
                closed_at = ?2,
                closing_cash_cents = ?3,
                variance_cents = ?4
            WHERE id = ?1
              AND closed_at IS NULL
              AND (SELECT COUNT(*) FROM drawer_events WHERE shift_id = ?1) = ?5
            "#,
        )
        .bind(&closed.id)
        .bind(closed_at)
        .bind(closed.closing_cash_cents)
        .bind(closed.variance_cents)
        .bind(prior_events)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let still_open: Option<Option<DateTime<Utc>>> =
                sqlx::query_scalar("SELECT closed_at FROM shifts WHERE id = ?1")
                    .bind(&closed.id)
                    .fetch_optional(&mut *tx)
                    .await?;

            return Err(match still_open {
                None => DbError::not_found("Shift", &closed.id),
                Some(Some(_)) => CoreError::ShiftClosed {
                    shift_id: closed.id.clone(),
                }
                .into(),
                Some(None) => CoreError::ConcurrentModification {
                    entity: "Shift".to_string(),
                    id: closed.id.clone(),
                }
                .into(),
            });
        }

        insert_event_row(&mut tx, close_event).await?;
        tx.commit().await?;

        debug!(shift_id = %closed.id, variance = ?closed.variance_cents, "Shift closed");
        Ok(())
    }
}

// =============================================================================
// Commit-unit helpers
// =============================================================================

/// Appends an event to an open shift inside an existing transaction.
///
/// Fails with `ShiftClosed` (or `NotFound`) when nothing was inserted.
pub(crate) async fn append_event_on(
    conn: &mut SqliteConnection,
    shift_id: &str,
    event: &NewDrawerEvent,
    at: DateTime<Utc>,
) -> DbResult<DrawerEvent> {
    let id = uuid::Uuid::new_v4().to_string();

    let seq: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO drawer_events (
            id, shift_id, seq, kind, amount_cents, payment_method, reference_id, created_at
        )
        SELECT
            ?1, s.id,
            COALESCE((SELECT MAX(seq) FROM drawer_events WHERE shift_id = s.id), 0) + 1,
            ?3, ?4, ?5, ?6, ?7
        FROM shifts s
        WHERE s.id = ?2 AND s.closed_at IS NULL
        RETURNING seq
        "#,
    )
    .bind(&id)
    .bind(shift_id)
    .bind(event.kind)
    .bind(event.amount_cents)
    .bind(event.payment_method)
    .bind(&event.reference_id)
    .bind(at)
    .fetch_optional(&mut *conn)
    .await?;

    match seq {
        Some(seq) => Ok(DrawerEvent {
            id,
            shift_id: shift_id.to_string(),
            seq,
            kind: event.kind,
            amount_cents: event.amount_cents,
            payment_method: event.payment_method,
            reference_id: event.reference_id.clone(),
            created_at: at,
        }),
        None => {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM shifts WHERE id = ?1")
                .bind(shift_id)
                .fetch_optional(&mut *conn)
                .await?;

            Err(match exists {
                Some(_) => CoreError::ShiftClosed {
                    shift_id: shift_id.to_string(),
                }
                .into(),
                None => DbError::not_found("Shift", shift_id),
            })
        }
    }
}

async fn insert_event_row(conn: &mut SqliteConnection, event: &DrawerEvent) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO drawer_events (
            id, shift_id, seq, kind, amount_cents, payment_method, reference_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&event.id)
    .bind(&event.shift_id)
    .bind(event.seq)
    .bind(event.kind)
    .bind(event.amount_cents)
    .bind(event.payment_method)
    .bind(&event.reference_id)
    .bind(event.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use tally_core::PaymentMethod;

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_second_open_shift_rejected() {
        let db = db().await;
        let repo = db.shifts();

        let first = Shift::open("c-1", "s-1", 10000, Utc::now()).unwrap();
        repo.insert(&first).await.unwrap();

        let second = Shift::open("c-1", "s-1", 5000, Utc::now()).unwrap();
        let err = repo.insert(&second).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::ShiftAlreadyOpen { .. })));

        // Same cashier at another store is fine
        let elsewhere = Shift::open("c-1", "s-2", 0, Utc::now()).unwrap();
        repo.insert(&elsewhere).await.unwrap();
    }

    #[tokio::test]
    async fn test_events_are_sequenced_and_close_is_terminal() {
        let db = db().await;
        let repo = db.shifts();
        let now = Utc::now();

        let shift = Shift::open("c-1", "s-1", 10000, now).unwrap();
        repo.insert(&shift).await.unwrap();

        let e1 = repo
            .append_event(&shift.id, &NewDrawerEvent::new(DrawerEventKind::CashIn, 500), now)
            .await
            .unwrap();
        let e2 = repo
            .append_event(
                &shift.id,
                &NewDrawerEvent::new(DrawerEventKind::Sale, 1200).paid_by(PaymentMethod::Cash),
                now,
            )
            .await
            .unwrap();
        assert_eq!((e1.seq, e2.seq), (1, 2));

        let mut loaded = repo.find_open("c-1", "s-1").await.unwrap().unwrap();
        assert_eq!(loaded.expected_cash().cents(), 11700);

        loaded.close(11700, now).unwrap();
        repo.close(&loaded).await.unwrap();

        assert!(repo.find_open("c-1", "s-1").await.unwrap().is_none());
        let stored = repo.get_by_id(&shift.id).await.unwrap().unwrap();
        assert_eq!(stored.events.len(), 3);
        assert_eq!(stored.variance_cents, Some(0));

        let err = repo
            .append_event(&shift.id, &NewDrawerEvent::new(DrawerEventKind::CashIn, 1), now)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::ShiftClosed { .. })));
    }

    #[tokio::test]
    async fn test_close_detects_concurrent_event() {
        let db = db().await;
        let repo = db.shifts();
        let now = Utc::now();

        let shift = Shift::open("c-1", "s-1", 0, now).unwrap();
        repo.insert(&shift).await.unwrap();

        let mut stale = repo.get_by_id(&shift.id).await.unwrap().unwrap();
        repo.append_event(&shift.id, &NewDrawerEvent::new(DrawerEventKind::CashIn, 100), now)
            .await
            .unwrap();

        stale.close(0, now).unwrap();
        let err = repo.close(&stale).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::ConcurrentModification { .. })));
    }
}
