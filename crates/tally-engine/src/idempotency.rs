//! # Idempotency Guard
//!
//! Runs a keyed request at most once per `(store, cashier, key)`.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  execute(store, cashier, key, f)                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  per-key tokio Mutex  ← duplicates inside this process queue here       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  record for key? ──yes──► replay stored outcome, f never runs           │
//! │       │ no                                                              │
//! │       ▼                                                                 │
//! │  f(claim)  ── commits the success record in its own commit unit         │
//! │       │                                                                 │
//! │       ├─ Ok ───────────────────────► return                            │
//! │       ├─ RequestInFlight ──────────► another process won the key:       │
//! │       │                              re-read and replay, or retry signal│
//! │       ├─ Validation failure ───────► record failure, return             │
//! │       └─ anything else ────────────► return, nothing recorded           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The database primary key on the record is the cross-process guarantee;
//! the in-process lock only keeps local duplicates from racing to it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::Duration;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use tally_core::idempotency::{IdempotencyClaim, IdempotencyOutcome};
use tally_core::validation::validate_idempotency_key;
use tally_core::{Clock, CoreError, CoreResult, ErrorKind, Repository};

type LockKey = (String, String, String);

pub struct IdempotencyGuard {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl IdempotencyGuard {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        IdempotencyGuard {
            repo,
            clock,
            ttl,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `f` unless an outcome is already stored for the key.
    ///
    /// `f` must commit `claim.record(..)` atomically with its own writes on
    /// success. Validation failures are recorded here.
    pub async fn execute<T, F, Fut>(&self, store_id: &str, cashier_id: &str, key: &str, f: F) -> CoreResult<T>
    where
        T: DeserializeOwned,
        F: FnOnce(IdempotencyClaim) -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        validate_idempotency_key(key)?;

        let lock_key = (store_id.to_string(), cashier_id.to_string(), key.to_string());
        let lock = self.lock_for(&lock_key);

        let result = {
            let _held = lock.lock().await;
            self.execute_locked(store_id, cashier_id, key, f).await
        };

        self.release(&lock_key, lock);
        result
    }

    async fn execute_locked<T, F, Fut>(&self, store_id: &str, cashier_id: &str, key: &str, f: F) -> CoreResult<T>
    where
        T: DeserializeOwned,
        F: FnOnce(IdempotencyClaim) -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let now = self.clock.now();

        if let Some(record) = self.repo.find_idempotency(store_id, cashier_id, key, now).await? {
            info!(store_id, cashier_id, key, "Replaying idempotent request");
            return record.outcome.replay();
        }

        let claim = IdempotencyClaim::new(store_id, cashier_id, key, now, self.ttl);

        match f(claim.clone()).await {
            Ok(value) => Ok(value),

            Err(e @ CoreError::RequestInFlight { .. }) => {
                match self.repo.find_idempotency(store_id, cashier_id, key, now).await? {
                    Some(record) => {
                        info!(key, "Lost idempotency race, replaying winner's outcome");
                        record.outcome.replay()
                    }
                    None => Err(e),
                }
            }

            Err(e) if e.kind() == ErrorKind::Validation => {
                let record = claim.record(None, IdempotencyOutcome::failure(&e));
                match self.repo.insert_idempotency(&record, now).await {
                    Ok(true) => debug!(key, "Recorded validation failure"),
                    Ok(false) => debug!(key, "Failure not recorded, key already holds an outcome"),
                    Err(store_err) => warn!(key, error = %store_err, "Failed to record validation failure"),
                }
                Err(e)
            }

            Err(e) => Err(e),
        }
    }

    fn lock_for(&self, lock_key: &LockKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(lock_key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drops the map entry once no other request holds or waits on it.
    fn release(&self, lock_key: &LockKey, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one in `lock`
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(lock_key);
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use chrono::Utc;
    use tally_core::{ManualClock, ValidationError};
    use tally_db::{Database, DbConfig};

    async fn guard() -> (IdempotencyGuard, Arc<dyn Repository>, Arc<ManualClock>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo: Arc<dyn Repository> = Arc::new(db);
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let guard = IdempotencyGuard::new(repo.clone(), clock.clone(), Duration::hours(24));
        (guard, repo, clock)
    }

    /// Simulates a commit unit: stores the success record and returns `value`.
    async fn commit(repo: &Arc<dyn Repository>, claim: IdempotencyClaim, value: String) -> CoreResult<String> {
        let record = claim.record(None, IdempotencyOutcome::success(&value)?);
        if !repo.insert_idempotency(&record, claim.created_at).await? {
            return Err(CoreError::RequestInFlight { key: claim.key });
        }
        Ok(value)
    }

    #[tokio::test]
    async fn test_second_call_replays_without_running() {
        let (guard, repo, _) = guard().await;
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let out: String = guard
                .execute("s-1", "c-1", "k-1", |claim| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    commit(&repo, claim, "txn-1".to_string())
                })
                .await
                .unwrap();
            assert_eq!(out, "txn-1");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(guard.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_run_once() {
        let (guard, repo, _) = guard().await;
        let calls = AtomicU32::new(0);

        let run = || {
            guard.execute("s-1", "c-1", "k-1", |claim| {
                calls.fetch_add(1, Ordering::SeqCst);
                commit(&repo, claim, uuid::Uuid::new_v4().to_string())
            })
        };

        let (a, b): (CoreResult<String>, CoreResult<String>) = tokio::join!(run(), run());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_recorded_and_replayed() {
        let (guard, _, _) = guard().await;
        let calls = AtomicU32::new(0);

        let attempt = || {
            guard.execute("s-1", "c-1", "k-1", |_claim| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(CoreError::Validation(ValidationError::Required {
                    field: "lines".into(),
                }))
            })
        };

        let first = attempt().await.unwrap_err();
        assert!(matches!(first, CoreError::Validation(_)));

        let second = attempt().await.unwrap_err();
        assert!(matches!(second, CoreError::Replayed { kind: ErrorKind::Validation, .. }));
        assert_eq!(second.to_string(), first.to_string());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_state_conflicts_are_not_recorded() {
        let (guard, repo, _) = guard().await;
        let calls = AtomicU32::new(0);

        let err = guard
            .execute("s-1", "c-1", "k-1", |_claim| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(CoreError::ShiftNotOpen {
                    cashier_id: "c-1".into(),
                    store_id: "s-1".into(),
                })
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);

        // After fixing the state the same key executes
        let out: String = guard
            .execute("s-1", "c-1", "k-1", |claim| {
                calls.fetch_add(1, Ordering::SeqCst);
                commit(&repo, claim, "txn-1".to_string())
            })
            .await
            .unwrap();
        assert_eq!(out, "txn-1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lost_race_replays_winner() {
        let (guard, repo, clock) = guard().await;

        // Another process commits between our lookup and our commit
        let out: String = guard
            .execute("s-1", "c-1", "k-1", |claim| {
                let repo = repo.clone();
                async move {
                    commit(&repo, claim.clone(), "winner".to_string()).await?;
                    commit(&repo, claim, "loser".to_string()).await
                }
            })
            .await
            .unwrap();
        assert_eq!(out, "winner");

        // Records expire with the TTL
        clock.advance(Duration::hours(25));
        let out: String = guard
            .execute("s-1", "c-1", "k-1", |claim| commit(&repo, claim, "fresh".to_string()))
            .await
            .unwrap();
        assert_eq!(out, "fresh");
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_before_lookup() {
        let (guard, _, _) = guard().await;
        let err = guard
            .execute("s-1", "c-1", "", |_claim| async { Ok::<String, CoreError>("x".into()) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
