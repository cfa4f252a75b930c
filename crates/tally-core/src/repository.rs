//! # Repository Port
//!
//! The persistence capability the engine is written against. tally-db
//! implements it over SQLite; nothing in tally-core or tally-engine knows
//! which store sits behind it.
//!
//! ## Commit Units
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Each commit_* call is ONE atomic unit. Either every write lands or     │
//! │  none does. Checks that must not race (stock, refund cap, shift still   │
//! │  open, PO outstanding) run inside the unit, under the write lock.       │
//! │                                                                         │
//! │  commit_checkout   idempotency record + transaction + lines             │
//! │                    + sale movements + sale drawer event                 │
//! │                    ✗ OutOfStock, ShiftClosed, RequestInFlight           │
//! │                                                                         │
//! │  commit_void       status completed→voided (conditional)                │
//! │                    + void_reversal movements + drawer event             │
//! │                    ✗ AlreadyVoided, ShiftClosed                         │
//! │                                                                         │
//! │  commit_refund     refunded_cents CAS + refund record                   │
//! │                    + refund_reversal movements + drawer event           │
//! │                    ✗ ConcurrentModification, ShiftClosed                │
//! │                                                                         │
//! │  commit_receipt    per-line received_quantity (conditional)             │
//! │                    + PO status recomputed + receive movements           │
//! │                    ✗ OverReceipt, PurchaseOrderClosed                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreResult;
use crate::idempotency::IdempotencyRecord;
use crate::shift::{DrawerEvent, NewDrawerEvent, Shift};
use crate::transaction::{Refund, Transaction, TransactionStatus};
use crate::types::{Product, PurchaseOrder, ReceiptLine, StockMovement, Supplier};

// =============================================================================
// Commit Payloads
// =============================================================================

#[derive(Debug, Clone)]
pub struct CheckoutCommit {
    /// Already `completed`.
    pub transaction: Transaction,
    pub movements: Vec<StockMovement>,
    pub drawer_event: NewDrawerEvent,
    pub idempotency: IdempotencyRecord,
}

#[derive(Debug, Clone)]
pub struct VoidCommit {
    pub store_id: String,
    pub transaction_id: String,
    pub voided_at: DateTime<Utc>,
    pub void_reason: String,
    pub voided_by: String,
    pub movements: Vec<StockMovement>,
    /// Shift of the actor performing the void.
    pub shift_id: String,
    pub drawer_event: NewDrawerEvent,
}

#[derive(Debug, Clone)]
pub struct RefundCommit {
    pub refund: Refund,
    /// `refunded_cents` observed when the refund was planned.
    pub refunded_before: i64,
    pub refunded_after: i64,
    pub status_after: TransactionStatus,
    pub movements: Vec<StockMovement>,
    pub drawer_event: NewDrawerEvent,
}

#[derive(Debug, Clone)]
pub struct ReceiptCommit {
    pub store_id: String,
    pub purchase_order_id: String,
    pub lines: Vec<ReceiptLine>,
    pub movements: Vec<StockMovement>,
    pub received_at: DateTime<Utc>,
}

/// A product bought together with the cart, scored by how many
/// transactions contained both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoPurchase {
    pub product_id: String,
    pub score: i64,
}

// =============================================================================
// Repository
// =============================================================================

#[async_trait]
pub trait Repository: Send + Sync {
    // -------------------------------------------------------------------------
    // Catalog & procurement
    // -------------------------------------------------------------------------

    async fn insert_product(&self, product: &Product) -> CoreResult<()>;

    async fn get_product(&self, store_id: &str, product_id: &str) -> CoreResult<Option<Product>>;

    async fn insert_supplier(&self, supplier: &Supplier) -> CoreResult<()>;

    async fn get_supplier(&self, store_id: &str, supplier_id: &str) -> CoreResult<Option<Supplier>>;

    async fn insert_purchase_order(&self, order: &PurchaseOrder) -> CoreResult<()>;

    async fn get_purchase_order(
        &self,
        store_id: &str,
        purchase_order_id: &str,
    ) -> CoreResult<Option<PurchaseOrder>>;

    // -------------------------------------------------------------------------
    // Stock ledger
    // -------------------------------------------------------------------------

    /// Derived stock: the sum of every movement delta.
    async fn stock_level(&self, store_id: &str, product_id: &str) -> CoreResult<i64>;

    /// Movements in the order they were appended.
    async fn stock_movements(&self, store_id: &str, product_id: &str) -> CoreResult<Vec<StockMovement>>;

    // -------------------------------------------------------------------------
    // Shifts
    // -------------------------------------------------------------------------

    /// Fails with `ShiftAlreadyOpen` if the cashier has an open shift at the store.
    async fn insert_shift(&self, shift: &Shift) -> CoreResult<()>;

    async fn find_open_shift(&self, cashier_id: &str, store_id: &str) -> CoreResult<Option<Shift>>;

    async fn get_shift(&self, shift_id: &str) -> CoreResult<Option<Shift>>;

    /// Appends to an open shift. Fails with `ShiftClosed` otherwise.
    async fn append_drawer_event(
        &self,
        shift_id: &str,
        event: &NewDrawerEvent,
        at: DateTime<Utc>,
    ) -> CoreResult<DrawerEvent>;

    /// Persists a closed shift (its terminal event included).
    ///
    /// Fails with `ConcurrentModification` when events were appended after
    /// `closed` was loaded, and `ShiftClosed` when it was closed meanwhile.
    async fn close_shift(&self, closed: &Shift) -> CoreResult<()>;

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    async fn get_transaction(&self, store_id: &str, transaction_id: &str) -> CoreResult<Option<Transaction>>;

    /// Transactions created in `[from, to)`, oldest first.
    async fn list_transactions(
        &self,
        store_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CoreResult<Vec<Transaction>>;

    async fn list_refunds(&self, transaction_id: &str) -> CoreResult<Vec<Refund>>;

    async fn commit_checkout(&self, commit: &CheckoutCommit) -> CoreResult<()>;

    async fn commit_void(&self, commit: &VoidCommit) -> CoreResult<()>;

    async fn commit_refund(&self, commit: &RefundCommit) -> CoreResult<()>;

    async fn commit_receipt(&self, commit: &ReceiptCommit) -> CoreResult<()>;

    // -------------------------------------------------------------------------
    // Idempotency
    // -------------------------------------------------------------------------

    /// Unexpired record for the key, if any.
    async fn find_idempotency(
        &self,
        store_id: &str,
        cashier_id: &str,
        key: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<IdempotencyRecord>>;

    /// Stores a record outside any other write. Returns `false` when an
    /// unexpired record already holds the key.
    async fn insert_idempotency(&self, record: &IdempotencyRecord, now: DateTime<Utc>) -> CoreResult<bool>;

    /// Deletes expired records, returning how many were removed.
    async fn purge_expired_idempotency(&self, now: DateTime<Utc>) -> CoreResult<u64>;

    // -------------------------------------------------------------------------
    // Recommendation history
    // -------------------------------------------------------------------------

    /// Products most often sold in the same non-voided transaction as any of
    /// `product_ids`, excluding them. Highest score first, ties by product id.
    async fn co_purchases(
        &self,
        store_id: &str,
        product_ids: &[String],
        limit: u32,
    ) -> CoreResult<Vec<CoPurchase>>;
}
