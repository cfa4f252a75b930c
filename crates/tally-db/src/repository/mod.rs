//! # Repository Module
//!
//! Data access for every table, and the tally-core `Repository` port
//! implemented on top of them.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  tally-engine                                                           │
//! │       │  Arc<dyn Repository>                                            │
//! │       ▼                                                                 │
//! │  impl Repository for Database   (DbError → CoreError here)              │
//! │       │                                                                 │
//! │       ├── CatalogRepository      products, suppliers, purchase orders   │
//! │       ├── StockRepository        movement ledger, derived stock         │
//! │       ├── ShiftRepository        shifts, drawer events                  │
//! │       ├── LedgerRepository       transactions, refunds, commit units    │
//! │       └── IdempotencyRepository  stored request outcomes                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SqlitePool                                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod idempotency;
pub mod ledger;
pub mod shift;
pub mod stock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::pool::Database;
use tally_core::idempotency::IdempotencyRecord;
use tally_core::repository::{
    CheckoutCommit, CoPurchase, ReceiptCommit, RefundCommit, Repository, VoidCommit,
};
use tally_core::{
    CoreResult, DrawerEvent, NewDrawerEvent, Product, PurchaseOrder, Refund, Shift, StockMovement,
    Supplier, Transaction,
};

#[async_trait]
impl Repository for Database {
    async fn insert_product(&self, product: &Product) -> CoreResult<()> {
        Ok(self.catalog().insert_product(product).await?)
    }

    async fn get_product(&self, store_id: &str, product_id: &str) -> CoreResult<Option<Product>> {
        Ok(self.catalog().get_product(store_id, product_id).await?)
    }

    async fn insert_supplier(&self, supplier: &Supplier) -> CoreResult<()> {
        Ok(self.catalog().insert_supplier(supplier).await?)
    }

    async fn get_supplier(&self, store_id: &str, supplier_id: &str) -> CoreResult<Option<Supplier>> {
        Ok(self.catalog().get_supplier(store_id, supplier_id).await?)
    }

    async fn insert_purchase_order(&self, order: &PurchaseOrder) -> CoreResult<()> {
        Ok(self.catalog().insert_purchase_order(order).await?)
    }

    async fn get_purchase_order(
        &self,
        store_id: &str,
        purchase_order_id: &str,
    ) -> CoreResult<Option<PurchaseOrder>> {
        Ok(self.catalog().get_purchase_order(store_id, purchase_order_id).await?)
    }

    async fn stock_level(&self, store_id: &str, product_id: &str) -> CoreResult<i64> {
        Ok(self.stock().level(store_id, product_id).await?)
    }

    async fn stock_movements(&self, store_id: &str, product_id: &str) -> CoreResult<Vec<StockMovement>> {
        Ok(self.stock().movements(store_id, product_id).await?)
    }

    async fn insert_shift(&self, shift: &Shift) -> CoreResult<()> {
        Ok(self.shifts().insert(shift).await?)
    }

    async fn find_open_shift(&self, cashier_id: &str, store_id: &str) -> CoreResult<Option<Shift>> {
        Ok(self.shifts().find_open(cashier_id, store_id).await?)
    }

    async fn get_shift(&self, shift_id: &str) -> CoreResult<Option<Shift>> {
        Ok(self.shifts().get_by_id(shift_id).await?)
    }

    async fn append_drawer_event(
        &self,
        shift_id: &str,
        event: &NewDrawerEvent,
        at: DateTime<Utc>,
    ) -> CoreResult<DrawerEvent> {
        Ok(self.shifts().append_event(shift_id, event, at).await?)
    }

    async fn close_shift(&self, closed: &Shift) -> CoreResult<()> {
        Ok(self.shifts().close(closed).await?)
    }

    async fn get_transaction(&self, store_id: &str, transaction_id: &str) -> CoreResult<Option<Transaction>> {
        Ok(self.ledger().get_transaction(store_id, transaction_id).await?)
    }

    async fn list_transactions(
        &self,
        store_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CoreResult<Vec<Transaction>> {
        Ok(self.ledger().list_transactions(store_id, from, to).await?)
    }

    async fn list_refunds(&self, transaction_id: &str) -> CoreResult<Vec<Refund>> {
        Ok(self.ledger().list_refunds(transaction_id).await?)
    }

    async fn commit_checkout(&self, commit: &CheckoutCommit) -> CoreResult<()> {
        Ok(self.ledger().commit_checkout(commit).await?)
    }

    async fn commit_void(&self, commit: &VoidCommit) -> CoreResult<()> {
        Ok(self.ledger().commit_void(commit).await?)
    }

    async fn commit_refund(&self, commit: &RefundCommit) -> CoreResult<()> {
        Ok(self.ledger().commit_refund(commit).await?)
    }

    async fn commit_receipt(&self, commit: &ReceiptCommit) -> CoreResult<()> {
        Ok(self.catalog().commit_receipt(commit).await?)
    }

    async fn find_idempotency(
        &self,
        store_id: &str,
        cashier_id: &str,
        key: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<IdempotencyRecord>> {
        Ok(self.idempotency().find(store_id, cashier_id, key, now).await?)
    }

    async fn insert_idempotency(&self, record: &IdempotencyRecord, now: DateTime<Utc>) -> CoreResult<bool> {
        Ok(self.idempotency().insert(record, now).await?)
    }

    async fn purge_expired_idempotency(&self, now: DateTime<Utc>) -> CoreResult<u64> {
        Ok(self.idempotency().purge_expired(now).await?)
    }

    async fn co_purchases(
        &self,
        store_id: &str,
        product_ids: &[String],
        limit: u32,
    ) -> CoreResult<Vec<CoPurchase>> {
        Ok(self.ledger().co_purchases(store_id, product_ids, limit).await?)
    }
}
