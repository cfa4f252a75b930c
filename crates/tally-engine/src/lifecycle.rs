//! # Transaction Lifecycle Manager
//!
//! Plans checkout, void and refund as commit units and hands them to the
//! repository, which lands each unit atomically or not at all.
//!
//! ## State Machine
//! ```text
//!             checkout                void (within window, no refunds)
//!  ┌─────────┐ ───────► ┌───────────┐ ─────────────────────────────► ┌────────┐
//!  │ pending │          │ completed │                                │ voided │
//!  └─────────┘          └─────┬─────┘                                └────────┘
//!                             │ ▲
//!                  refund     │ │ partial refund (stays completed)
//!                             ▼ │
//!                       ┌──────────┐
//!                       │ refunded │  cumulative refunds == grand total
//!                       └──────────┘
//! ```
//!
//! ## Checkout Response
//! ```text
//! guard.execute(key) ──► Transaction   (stored under the key, replayed as is)
//!        │
//!        ▼
//! recommendations for the transaction's products   (computed on every call,
//!        │                                           never stored under the key)
//!        ▼
//! CheckoutReceipt { transaction, recommendations }
//! ```
//!
//! ## Commit Units
//! ```text
//! checkout : transaction + sale movements + sale drawer event + idempotency record
//! void     : status flip + void_reversal movements + compensating drawer event
//! refund   : refund row + refunded_cents CAS + refund_reversal movements
//!            + cash-out drawer event
//! ```

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::idempotency::IdempotencyGuard;
use crate::recommend::{RecommendationOrchestrator, Recommendations};
use crate::retry::RetryPolicy;
use crate::shift::ShiftService;
use tally_core::idempotency::{IdempotencyClaim, IdempotencyOutcome};
use tally_core::repository::{CheckoutCommit, RefundCommit, VoidCommit};
use tally_core::transaction::{validate_refund_reason, CheckoutContext};
use tally_core::{
    Actor, Cart, Clock, CoreError, CoreResult, DrawerEventKind, MovementReason, NewDrawerEvent,
    Refund, Repository, StockMovement, TaxRate, Transaction,
};

/// What checkout hands back to the terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub transaction: Transaction,
    /// Upsell suggestions for the sold products. Empty when recommendations
    /// are disabled or could not be computed.
    pub recommendations: Recommendations,
}

pub struct LifecycleManager {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    shifts: Arc<ShiftService>,
    guard: IdempotencyGuard,
    recommendations: Arc<RecommendationOrchestrator>,
    retry: RetryPolicy,
    tax_rate: TaxRate,
    void_window: Duration,
}

impl LifecycleManager {
    pub fn new(
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        shifts: Arc<ShiftService>,
        guard: IdempotencyGuard,
        recommendations: Arc<RecommendationOrchestrator>,
        retry: RetryPolicy,
        tax_rate: TaxRate,
        void_window: Duration,
    ) -> Self {
        LifecycleManager {
            repo,
            clock,
            shifts,
            guard,
            recommendations,
            retry,
            tax_rate,
            void_window,
        }
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    /// Prices and commits a cart, at most once per idempotency key, and
    /// attaches suggestions for the sold products.
    ///
    /// A repeated key returns the stored transaction without touching stock
    /// or the drawer again. Suggestions are recomputed on every call and
    /// never fail the checkout.
    pub async fn checkout(&self, actor: &Actor, cart: &Cart, idempotency_key: &str) -> CoreResult<CheckoutReceipt> {
        let transaction = self
            .guard
            .execute(&actor.store_id, &actor.cashier_id, idempotency_key, |claim| {
                self.checkout_once(actor, cart, claim)
            })
            .await?;

        let recommendations = self.suggest_for(&transaction).await;
        Ok(CheckoutReceipt {
            transaction,
            recommendations,
        })
    }

    async fn suggest_for(&self, txn: &Transaction) -> Recommendations {
        let product_ids: Vec<String> = txn.lines.iter().map(|l| l.product_id.clone()).collect();

        match self.recommendations.recommend(&txn.store_id, &product_ids).await {
            Ok(recommendations) => recommendations,
            Err(e) => {
                warn!(transaction_id = %txn.id, error = %e, "Checkout suggestions unavailable");
                Recommendations::empty(&txn.store_id)
            }
        }
    }

    async fn checkout_once(&self, actor: &Actor, cart: &Cart, claim: IdempotencyClaim) -> CoreResult<Transaction> {
        let shift = self.shifts.require_open_shift(actor).await?;
        let now = self.clock.now();

        let mut txn = Transaction::price_cart(
            cart,
            CheckoutContext {
                actor,
                shift_id: &shift.id,
                idempotency_key: &claim.key,
                tax_rate: self.tax_rate,
                at: now,
            },
        )?;
        txn.complete()?;

        let movements = txn
            .lines
            .iter()
            .map(|l| StockMovement::new(&txn.store_id, &l.product_id, -l.quantity, MovementReason::Sale, &txn.id, now))
            .collect();
        let drawer_event = NewDrawerEvent::new(DrawerEventKind::Sale, txn.grand_total_cents)
            .paid_by(txn.payment_method)
            .referencing(txn.id.clone());
        let idempotency = claim.record(Some(txn.id.clone()), IdempotencyOutcome::success(&txn)?);

        let commit = CheckoutCommit {
            transaction: txn,
            movements,
            drawer_event,
            idempotency,
        };

        self.retry
            .run("checkout", || self.repo.commit_checkout(&commit))
            .await?;

        let txn = commit.transaction;
        info!(
            transaction_id = %txn.id,
            store_id = %txn.store_id,
            cashier_id = %txn.cashier_id,
            grand_total = txn.grand_total_cents,
            lines = txn.lines.len(),
            "Checkout committed"
        );
        Ok(txn)
    }

    // =========================================================================
    // Void
    // =========================================================================

    /// Voids a completed transaction inside the grace window, reversing every
    /// line's stock and the drawer effect of the sale.
    ///
    /// Not retried: a duplicate void is rejected by state with `AlreadyVoided`.
    pub async fn void(&self, actor: &Actor, transaction_id: &str, reason: &str) -> CoreResult<Transaction> {
        actor.require_elevated("void a transaction")?;
        let shift = self.shifts.require_open_shift(actor).await?;

        let mut txn = self.load(actor, transaction_id).await?;
        let now = self.clock.now();
        txn.void(reason, actor.approver(), now, self.void_window)?;

        let movements = txn
            .lines
            .iter()
            .map(|l| {
                StockMovement::new(&txn.store_id, &l.product_id, l.quantity, MovementReason::VoidReversal, &txn.id, now)
            })
            .collect();

        let commit = VoidCommit {
            store_id: txn.store_id.clone(),
            transaction_id: txn.id.clone(),
            voided_at: now,
            void_reason: reason.to_string(),
            voided_by: actor.approver().to_string(),
            movements,
            shift_id: shift.id,
            drawer_event: NewDrawerEvent::new(DrawerEventKind::VoidReversal, txn.grand_total_cents)
                .paid_by(txn.payment_method)
                .referencing(txn.id.clone()),
        };
        self.repo.commit_void(&commit).await?;

        info!(
            transaction_id = %txn.id,
            voided_by = %commit.voided_by,
            reason,
            "Transaction voided"
        );
        Ok(txn)
    }

    // =========================================================================
    // Refund
    // =========================================================================

    /// Refunds part or all of a completed transaction.
    ///
    /// Units are restocked first-in-first-out by line in proportion to the
    /// cumulative refunded amount. The plan is rebuilt from a fresh read when
    /// another refund commits first.
    pub async fn refund(
        &self,
        actor: &Actor,
        transaction_id: &str,
        amount_cents: i64,
        reason: &str,
    ) -> CoreResult<Refund> {
        actor.require_elevated("refund a transaction")?;
        validate_refund_reason(reason)?;
        let shift = self.shifts.require_open_shift(actor).await?;

        let refund = self
            .retry
            .run_when(
                "refund",
                |e| matches!(e, CoreError::ConcurrentModification { .. }),
                || async {
                    let mut txn = self.load(actor, transaction_id).await?;
                    let refunded_before = txn.refunded_cents;
                    let restock = txn.apply_refund(amount_cents)?;

                    let now = self.clock.now();
                    let movements = restock
                        .iter()
                        .map(|r| {
                            StockMovement::new(
                                &txn.store_id,
                                &r.product_id,
                                r.quantity,
                                MovementReason::RefundReversal,
                                &txn.id,
                                now,
                            )
                        })
                        .collect();

                    let commit = RefundCommit {
                        refund: Refund {
                            id: uuid::Uuid::new_v4().to_string(),
                            transaction_id: txn.id.clone(),
                            store_id: txn.store_id.clone(),
                            amount_cents,
                            reason: reason.to_string(),
                            cashier_id: actor.cashier_id.clone(),
                            shift_id: shift.id.clone(),
                            approved_by: actor.approver().to_string(),
                            created_at: now,
                        },
                        refunded_before,
                        refunded_after: txn.refunded_cents,
                        status_after: txn.status,
                        movements,
                        drawer_event: NewDrawerEvent::new(DrawerEventKind::Refund, amount_cents)
                            .paid_by(txn.payment_method)
                            .referencing(txn.id.clone()),
                    };
                    self.repo.commit_refund(&commit).await?;
                    Ok(commit)
                },
            )
            .await?;

        info!(
            transaction_id,
            refund_id = %refund.refund.id,
            amount = amount_cents,
            refunded_total = refund.refunded_after,
            status = ?refund.status_after,
            restocked = refund.movements.len(),
            approved_by = %refund.refund.approved_by,
            "Refund committed"
        );
        Ok(refund.refund)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_transaction(&self, actor: &Actor, transaction_id: &str) -> CoreResult<Transaction> {
        self.load(actor, transaction_id).await
    }

    pub async fn list_refunds(&self, actor: &Actor, transaction_id: &str) -> CoreResult<Vec<Refund>> {
        let txn = self.load(actor, transaction_id).await?;
        self.repo.list_refunds(&txn.id).await
    }

    async fn load(&self, actor: &Actor, transaction_id: &str) -> CoreResult<Transaction> {
        self.repo
            .get_transaction(&actor.store_id, transaction_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Transaction", transaction_id))
    }
}
