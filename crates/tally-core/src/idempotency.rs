//! # Idempotency Records
//!
//! The stored outcome of a keyed request. The guard that consults and
//! writes these lives in tally-engine; the record shape lives here so the
//! repository can persist it inside the same commit as the side effects.
//!
//! ```text
//! (store_id, cashier_id, key)  ──►  outcome                     expires_at
//! ───────────────────────────────────────────────────────────────────────
//! (s-1, c-1, "term7:0183")     ──►  Success { payload: txn }    +24h
//! (s-1, c-1, "term7:0184")     ──►  Failure { validation, .. }  +24h
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ErrorKind};

/// Terminal outcome recorded under a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IdempotencyOutcome {
    Success { payload: serde_json::Value },
    Failure { kind: ErrorKind, message: String },
}

impl IdempotencyOutcome {
    pub fn success<T: Serialize>(value: &T) -> CoreResult<Self> {
        let payload =
            serde_json::to_value(value).map_err(|e| CoreError::Internal(e.to_string()))?;
        Ok(IdempotencyOutcome::Success { payload })
    }

    pub fn failure(err: &CoreError) -> Self {
        IdempotencyOutcome::Failure {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Replays the outcome: the original payload, or the original error.
    pub fn replay<T: DeserializeOwned>(&self) -> CoreResult<T> {
        match self {
            IdempotencyOutcome::Success { payload } => serde_json::from_value(payload.clone())
                .map_err(|e| CoreError::Internal(format!("corrupt idempotent payload: {}", e))),
            IdempotencyOutcome::Failure { kind, message } => Err(CoreError::Replayed {
                kind: *kind,
                message: message.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub store_id: String,
    pub cashier_id: String,
    pub key: String,
    /// Transaction produced by a successful execution.
    pub transaction_id: Option<String>,
    pub outcome: IdempotencyOutcome,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Handed to the guarded closure: the key it runs under and the expiry to
/// stamp on the record it commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyClaim {
    pub store_id: String,
    pub cashier_id: String,
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyClaim {
    pub fn new(store_id: &str, cashier_id: &str, key: &str, now: DateTime<Utc>, ttl: Duration) -> Self {
        IdempotencyClaim {
            store_id: store_id.to_string(),
            cashier_id: cashier_id.to_string(),
            key: key.to_string(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Builds the record committed alongside a successful side effect.
    pub fn record(&self, transaction_id: Option<String>, outcome: IdempotencyOutcome) -> IdempotencyRecord {
        IdempotencyRecord {
            store_id: self.store_id.clone(),
            cashier_id: self.cashier_id.clone(),
            key: self.key.clone(),
            transaction_id,
            outcome,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}
