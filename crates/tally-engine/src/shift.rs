//! # Shift Service
//!
//! Opens and closes cashier shifts, records manual drawer movements, and
//! provides the open-shift gate every monetary operation passes.
//!
//! ```text
//!        open_shift                         close_shift
//!  ┌────────┐ ──────────► ┌──────┐ ─────────────────────► ┌────────┐
//!  │ closed │             │ open │   + Close event         │ closed │
//!  └────────┘             └──┬───┘   variance recorded     └────────┘
//!                            │ ▲
//!                            └─┘ record_drawer_event (cash in / cash out)
//!                                checkout / void / refund events
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::retry::RetryPolicy;
use tally_core::shift::require_open_shift;
use tally_core::{
    Actor, Clock, CoreError, CoreResult, DrawerEvent, DrawerEventKind, Money, NewDrawerEvent,
    Repository, Shift, ShiftClosure, ValidationError,
};

/// A shift with its drawer totals, for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftReport {
    pub shift: Shift,
    pub expected_cash: Money,
    pub cash_in: Money,
    pub cash_out: Money,
    /// Cash sales only; card sales never reach the drawer.
    pub cash_sales: Money,
    pub cash_refunds: Money,
    pub cash_void_reversals: Money,
    /// `closing − expected`, once closed.
    pub variance: Option<Money>,
}

impl ShiftReport {
    fn build(shift: Shift) -> ShiftReport {
        let total = |kind: DrawerEventKind| -> Money {
            shift
                .events
                .iter()
                .filter(|e| e.kind == kind)
                .map(|e| Money::from_cents(e.cash_effect().cents().abs()))
                .sum()
        };

        // The close event does not move cash, so expected cash is unchanged by it
        ShiftReport {
            expected_cash: shift.expected_cash(),
            cash_in: total(DrawerEventKind::CashIn),
            cash_out: total(DrawerEventKind::CashOut),
            cash_sales: total(DrawerEventKind::Sale),
            cash_refunds: total(DrawerEventKind::Refund),
            cash_void_reversals: total(DrawerEventKind::VoidReversal),
            variance: shift.variance_cents.map(Money::from_cents),
            shift,
        }
    }
}

pub struct ShiftService {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl ShiftService {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        ShiftService { repo, clock, retry }
    }

    /// Opens a shift for the actor at the actor's store.
    pub async fn open_shift(&self, actor: &Actor, opening_cash_cents: i64) -> CoreResult<Shift> {
        let shift = Shift::open(&actor.cashier_id, &actor.store_id, opening_cash_cents, self.clock.now())?;
        self.repo.insert_shift(&shift).await?;

        info!(
            shift_id = %shift.id,
            cashier_id = %actor.cashier_id,
            store_id = %actor.store_id,
            opening_cash = opening_cash_cents,
            "Shift opened"
        );
        Ok(shift)
    }

    /// Closes a shift, recording the variance between counted and expected
    /// cash. Closing another cashier's shift needs an elevated actor.
    pub async fn close_shift(&self, actor: &Actor, shift_id: &str, closing_cash_cents: i64) -> CoreResult<ShiftClosure> {
        let closure = self
            .retry
            .run_when(
                "close_shift",
                |e| matches!(e, CoreError::ConcurrentModification { .. }),
                || async {
                    let mut shift = self.load_owned(actor, shift_id, "close another cashier's shift").await?;
                    let closure = shift.close(closing_cash_cents, self.clock.now())?;
                    self.repo.close_shift(&shift).await?;
                    Ok(closure)
                },
            )
            .await?;

        if closure.variance.cents() != 0 {
            warn!(
                shift_id,
                expected = closure.expected_cash.cents(),
                counted = closure.closing_cash.cents(),
                variance = closure.variance.cents(),
                "Shift closed with cash variance"
            );
        } else {
            info!(shift_id, expected = closure.expected_cash.cents(), "Shift closed, drawer balanced");
        }

        Ok(closure)
    }

    /// Records a manual cash-in or cash-out on an open shift.
    pub async fn record_drawer_event(
        &self,
        actor: &Actor,
        shift_id: &str,
        event: NewDrawerEvent,
    ) -> CoreResult<DrawerEvent> {
        if !matches!(event.kind, DrawerEventKind::CashIn | DrawerEventKind::CashOut) {
            return Err(ValidationError::InvalidFormat {
                field: "kind".to_string(),
                reason: "only cash_in and cash_out can be recorded manually".to_string(),
            }
            .into());
        }
        event.validate()?;

        let shift = self.load_owned(actor, shift_id, "record on another cashier's shift").await?;
        if !shift.is_open() {
            return Err(CoreError::ShiftClosed {
                shift_id: shift.id,
            });
        }

        let recorded = self
            .repo
            .append_drawer_event(&shift.id, &event, self.clock.now())
            .await?;

        info!(shift_id, kind = ?recorded.kind, amount = recorded.amount_cents, "Drawer event recorded");
        Ok(recorded)
    }

    /// The actor's open shift at their store, or `ShiftNotOpen`.
    pub async fn require_open_shift(&self, actor: &Actor) -> CoreResult<Shift> {
        let shift = self
            .repo
            .find_open_shift(&actor.cashier_id, &actor.store_id)
            .await?;
        require_open_shift(shift, &actor.cashier_id, &actor.store_id)
    }

    pub async fn shift_report(&self, actor: &Actor, shift_id: &str) -> CoreResult<ShiftReport> {
        let shift = self.load_owned(actor, shift_id, "view another cashier's shift").await?;
        Ok(ShiftReport::build(shift))
    }

    /// Loads a shift of the actor's store; other cashiers' shifts need elevation.
    async fn load_owned(&self, actor: &Actor, shift_id: &str, action: &str) -> CoreResult<Shift> {
        let shift = self
            .repo
            .get_shift(shift_id)
            .await?
            .filter(|s| s.store_id == actor.store_id)
            .ok_or_else(|| CoreError::not_found("Shift", shift_id))?;

        if shift.cashier_id != actor.cashier_id {
            actor.require_elevated(action)?;
        }
        Ok(shift)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
