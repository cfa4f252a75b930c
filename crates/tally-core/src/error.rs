//! # Error Types
//!
//! Domain error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                         │
//! │  ├── CoreError        - every outcome an engine operation can reject   │
//! │  │                      with, classified by ErrorKind                   │
//! │  └── ValidationError  - field-level input failures                     │
//! │                                                                         │
//! │  tally-db errors (separate crate)                                      │
//! │  └── DbError          - sqlx failures, converted into CoreError        │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError ← DbError                           │
//! │                              │                                          │
//! │                              ▼                                          │
//! │                 caller branches on CoreError::kind()                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Kinds
//! | Kind            | Meaning                                  | Side effect |
//! |-----------------|------------------------------------------|-------------|
//! | `Validation`    | malformed input, caller's fault          | none        |
//! | `StateConflict` | business rule violation                  | none        |
//! | `Unavailable`   | store/cache unreachable, retry is safe   | rolled back |
//! | `NotFound`      | unknown transaction/shift/product id     | none        |
//! | `Forbidden`     | actor's role may not perform the action  | none        |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transaction::TransactionStatus;

// =============================================================================
// Error Kind
// =============================================================================

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    StateConflict,
    Unavailable,
    NotFound,
    Forbidden,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Core Error
// =============================================================================

/// Errors returned by every core and engine operation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Field-level validation failure.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Pricing inputs cannot produce a valid total.
    ///
    /// ## When This Occurs
    /// - Negative subtotal (negative unit price)
    /// - A line or cart discount larger than what it discounts
    /// - Tax rate outside 0%..=100%
    #[error("Invalid pricing: {reason}")]
    InvalidPricing { reason: String },

    /// The cashier already has an open shift at this store.
    #[error("Cashier {cashier_id} already has an open shift at store {store_id}")]
    ShiftAlreadyOpen { cashier_id: String, store_id: String },

    /// A drawer event or close was attempted against a closed shift.
    #[error("Shift {shift_id} is closed")]
    ShiftClosed { shift_id: String },

    /// A monetary operation was attempted without an open shift.
    #[error("No open shift for cashier {cashier_id} at store {store_id}")]
    ShiftNotOpen { cashier_id: String, store_id: String },

    /// A cart line would drive derived stock below zero.
    ///
    /// ## User Workflow
    /// ```text
    /// Checkout (COFFEE × 5)
    ///      │
    ///      ▼
    /// derived stock = Σ movements = 3
    ///      │
    ///      ▼
    /// OutOfStock { product_id: "COFFEE", available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// Whole cart rejected, nothing written
    /// ```
    #[error("Out of stock for {product_id}: available {available}, requested {requested}")]
    OutOfStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// A cart line's unit price differs from the catalog price and the cart
    /// carries no manual override.
    #[error("Price of {product_id} is {catalog_cents}, cart submitted {submitted_cents}")]
    PriceMismatch {
        product_id: String,
        catalog_cents: i64,
        submitted_cents: i64,
    },

    #[error("Transaction {transaction_id} is already voided")]
    AlreadyVoided { transaction_id: String },

    #[error("Void window of {window_secs}s expired for transaction {transaction_id}")]
    VoidWindowExpired {
        transaction_id: String,
        window_secs: i64,
    },

    #[error(
        "Refund of {requested} exceeds refundable amount {refundable} for transaction {transaction_id}"
    )]
    RefundExceedsTotal {
        transaction_id: String,
        requested: i64,
        refundable: i64,
    },

    /// The transaction's status does not allow the operation.
    #[error("Transaction {transaction_id} is {status}, cannot {operation}")]
    InvalidTransactionStatus {
        transaction_id: String,
        status: TransactionStatus,
        operation: String,
    },

    /// Receiving more than a purchase order line still expects.
    #[error(
        "Purchase order {purchase_order_id} line {product_id}: outstanding {outstanding}, received {requested}"
    )]
    OverReceipt {
        purchase_order_id: String,
        product_id: String,
        outstanding: i64,
        requested: i64,
    },

    #[error("Purchase order {purchase_order_id} is already fully received")]
    PurchaseOrderClosed { purchase_order_id: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Role {role} may not {action}")]
    Forbidden { action: String, role: String },

    /// Another request holding the same idempotency key has not committed yet.
    #[error("Request with idempotency key '{key}' is still in flight, retry")]
    RequestInFlight { key: String },

    /// Optimistic compare-and-set lost against a concurrent writer.
    #[error("{entity} {id} was modified concurrently")]
    ConcurrentModification { entity: String, id: String },

    /// A failure recorded under an idempotency key, replayed verbatim.
    #[error("{message}")]
    Replayed { kind: ErrorKind, message: String },

    /// Backing store unreachable or busy; the operation was rolled back.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be decoded.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn invalid_pricing(reason: impl Into<String>) -> Self {
        CoreError::InvalidPricing {
            reason: reason.into(),
        }
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) | CoreError::InvalidPricing { .. } => ErrorKind::Validation,

            CoreError::ShiftAlreadyOpen { .. }
            | CoreError::ShiftClosed { .. }
            | CoreError::ShiftNotOpen { .. }
            | CoreError::OutOfStock { .. }
            | CoreError::PriceMismatch { .. }
            | CoreError::AlreadyVoided { .. }
            | CoreError::VoidWindowExpired { .. }
            | CoreError::RefundExceedsTotal { .. }
            | CoreError::InvalidTransactionStatus { .. }
            | CoreError::OverReceipt { .. }
            | CoreError::PurchaseOrderClosed { .. } => ErrorKind::StateConflict,

            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::Forbidden { .. } => ErrorKind::Forbidden,

            CoreError::RequestInFlight { .. }
            | CoreError::ConcurrentModification { .. }
            | CoreError::Unavailable(_)
            | CoreError::Internal(_) => ErrorKind::Unavailable,

            CoreError::Replayed { kind, .. } => *kind,
        }
    }

    /// True for transient failures a commit loop may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Unavailable(_) | CoreError::ConcurrentModification { .. }
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when request payloads don't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value inside one request (e.g. a product listed twice on a PO).
    #[error("{field} '{value}' appears more than once")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::OutOfStock {
            product_id: "COFFEE-250".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Out of stock for COFFEE-250: available 3, requested 5"
        );
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            CoreError::invalid_pricing("negative").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            CoreError::AlreadyVoided {
                transaction_id: "t".into()
            }
            .kind(),
            ErrorKind::StateConflict
        );
        assert_eq!(CoreError::not_found("Shift", "s").kind(), ErrorKind::NotFound);
        assert_eq!(
            CoreError::Unavailable("locked".into()).kind(),
            ErrorKind::Unavailable
        );
        assert_eq!(
            CoreError::Replayed {
                kind: ErrorKind::Validation,
                message: "x".into()
            }
            .kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "lines".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
        assert!(!core_err.is_retryable());
    }
}
