//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Adds categorization (busy, unique, FK)        │
//! │       │                                                                 │
//! │       │   commit units also raise business rejections                  │
//! │       │   (OutOfStock, AlreadyVoided, ...) as DbError::Domain          │
//! │       ▼                                                                 │
//! │  CoreError ← what the Repository port returns                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Engine branches on CoreError::kind()                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tally_core::{CoreError, ValidationError};
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Registering a duplicate SKU in a store
    /// - A second open shift for the same cashier and store
    /// - A second idempotency record for the same key
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - A movement or line referencing an unknown product
    /// - A purchase order referencing an unknown supplier
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// The database stayed locked for longer than the busy timeout.
    #[error("Database busy: {0}")]
    Busy(String),

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// A business rule rejected the write inside a commit unit.
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// True for a unique violation on the named table.
    pub fn is_unique_on(&self, table: &str) -> bool {
        matches!(self, DbError::UniqueViolation { field, .. } if field.starts_with(table))
    }
}

/// SQLite result codes (primary and extended) that mean "locked, try later".
fn is_busy_code(code: &str) -> bool {
    // SQLITE_BUSY, SQLITE_LOCKED, BUSY_RECOVERY, BUSY_SNAPSHOT, BUSY_TIMEOUT
    matches!(code, "5" | "6" | "261" | "517" | "773")
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → busy / unique / FK by code and message
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                let busy = db_err.code().map_or(false, |c| is_busy_code(&c));

                if busy || msg.contains("database is locked") {
                    DbError::Busy(msg.to_string())
                } else if msg.contains("UNIQUE constraint failed") {
                    // "UNIQUE constraint failed: <table>.<column>, ..."
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Internal(format!("stored JSON is invalid: {}", err))
    }
}

/// What the Repository port hands back to the engine.
///
/// ```text
/// NotFound                         → CoreError::NotFound
/// UniqueViolation                  → ValidationError::Duplicate
/// ForeignKeyViolation              → CoreError::NotFound (referenced row)
/// Busy / PoolExhausted / Conn      → CoreError::Unavailable (retry is safe)
/// Domain(e)                        → e
/// Migration / Query / Internal     → CoreError::Internal
/// ```
impl From<DbError> for CoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => CoreError::NotFound { entity, id },
            DbError::UniqueViolation { field, value } => {
                CoreError::Validation(ValidationError::Duplicate { field, value })
            }
            DbError::ForeignKeyViolation { message } => CoreError::NotFound {
                entity: "Referenced record".to_string(),
                id: message,
            },
            DbError::Busy(msg) => CoreError::Unavailable(msg),
            DbError::PoolExhausted => CoreError::Unavailable("connection pool exhausted".to_string()),
            DbError::ConnectionFailed(msg) => CoreError::Unavailable(msg),
            DbError::Domain(e) => e,
            DbError::MigrationFailed(msg) | DbError::QueryFailed(msg) | DbError::Internal(msg) => {
                CoreError::Internal(msg)
            }
        }
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::ErrorKind;

    #[test]
    fn test_busy_maps_to_unavailable() {
        let core: CoreError = DbError::Busy("database is locked".into()).into();
        assert_eq!(core.kind(), ErrorKind::Unavailable);
        assert!(core.is_retryable());
    }

    #[test]
    fn test_domain_errors_pass_through() {
        let db: DbError = CoreError::AlreadyVoided {
            transaction_id: "t-1".into(),
        }
        .into();
        let core: CoreError = db.into();
        assert!(matches!(core, CoreError::AlreadyVoided { .. }));
    }

    #[test]
    fn test_unique_on_table() {
        let err = DbError::UniqueViolation {
            field: "shifts.cashier_id, shifts.store_id".into(),
            value: "unknown".into(),
        };
        assert!(err.is_unique_on("shifts."));
        assert!(!err.is_unique_on("products."));
    }
}
