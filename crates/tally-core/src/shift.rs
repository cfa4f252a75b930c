//! # Shift State Machine
//!
//! A shift bounds the period during which a cashier may move money through a
//! cash drawer. This module is the pure half: transitions, the drawer event
//! log and cash reconciliation. Uniqueness of the open shift per
//! (cashier, store) is enforced by the repository.
//!
//! ## States
//! ```text
//!                 open(cashier, store, opening_cash)
//!   ┌──────────┐ ─────────────────────────────────────► ┌──────────┐
//!   │  closed  │                                        │   open   │ ◄─┐
//!   └──────────┘ ◄───────────────────────────────────── └──────────┘   │
//!                 close(closing_cash)                        │          │
//!                 appends Close event, records variance      └──────────┘
//!                                                      record_event(kind, amount)
//! ```
//!
//! ## Expected Cash
//! ```text
//! expected = opening_cash
//!          + Σ cash_in − Σ cash_out
//!          + Σ cash sales − Σ cash refunds − Σ cash void reversals
//!
//! variance = closing_cash − expected     (recorded, never rejected)
//! ```
//! Events paid by card are logged but do not move drawer cash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::PaymentMethod;
use crate::validation::{validate_cash_float, validate_positive_amount};

// =============================================================================
// Drawer Events
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawerEventKind {
    CashIn,
    CashOut,
    Sale,
    Refund,
    VoidReversal,
    /// Terminal event appended by `close`; carries the counted closing cash.
    Close,
}

impl DrawerEventKind {
    /// +1 for money into the drawer, -1 for money out, 0 for `Close`.
    pub fn direction(&self) -> i64 {
        match self {
            DrawerEventKind::CashIn | DrawerEventKind::Sale => 1,
            DrawerEventKind::CashOut | DrawerEventKind::Refund | DrawerEventKind::VoidReversal => {
                -1
            }
            DrawerEventKind::Close => 0,
        }
    }
}

/// One logged cash movement on a shift. `amount_cents` is always positive;
/// the sign comes from the kind.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawerEvent {
    pub id: String,
    pub shift_id: String,
    /// 1-based position in the shift's event log.
    pub seq: i64,
    pub kind: DrawerEventKind,
    pub amount_cents: i64,
    /// `None` for manual cash-in/out, which is always cash.
    pub payment_method: Option<PaymentMethod>,
    /// Transaction or refund that produced the event.
    pub reference_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DrawerEvent {
    /// Signed effect on the expected drawer cash.
    pub fn cash_effect(&self) -> Money {
        let moves_cash = self
            .payment_method
            .map_or(true, |m| m.moves_drawer_cash());
        if moves_cash {
            Money::from_cents(self.amount_cents * self.kind.direction())
        } else {
            Money::zero()
        }
    }
}

/// A drawer event not yet assigned to a position in a shift's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDrawerEvent {
    pub kind: DrawerEventKind,
    pub amount_cents: i64,
    pub payment_method: Option<PaymentMethod>,
    pub reference_id: Option<String>,
}

impl NewDrawerEvent {
    pub fn new(kind: DrawerEventKind, amount_cents: i64) -> Self {
        NewDrawerEvent {
            kind,
            amount_cents,
            payment_method: None,
            reference_id: None,
        }
    }

    pub fn paid_by(mut self, method: PaymentMethod) -> Self {
        self.payment_method = Some(method);
        self
    }

    pub fn referencing(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    /// Checks the amount and rejects `Close`, which only `Shift::close` appends.
    pub fn validate(&self) -> CoreResult<()> {
        if self.kind == DrawerEventKind::Close {
            return Err(ValidationError::InvalidFormat {
                field: "kind".to_string(),
                reason: "close events are appended by closing the shift".to_string(),
            }
            .into());
        }
        validate_positive_amount("amount", self.amount_cents)?;
        Ok(())
    }
}

// =============================================================================
// Shift
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub id: String,
    pub cashier_id: String,
    pub store_id: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub opening_cash_cents: i64,
    pub closing_cash_cents: Option<i64>,
    pub variance_cents: Option<i64>,
    pub events: Vec<DrawerEvent>,
}

/// Reconciliation figures produced by closing a shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftClosure {
    pub expected_cash: Money,
    pub closing_cash: Money,
    pub variance: Money,
}

impl Shift {
    /// Opens a new shift. Uniqueness per (cashier, store) is the caller's job.
    pub fn open(
        cashier_id: &str,
        store_id: &str,
        opening_cash_cents: i64,
        at: DateTime<Utc>,
    ) -> CoreResult<Shift> {
        validate_cash_float("opening_cash", opening_cash_cents)?;

        Ok(Shift {
            id: uuid::Uuid::new_v4().to_string(),
            cashier_id: cashier_id.to_string(),
            store_id: store_id.to_string(),
            opened_at: at,
            closed_at: None,
            opening_cash_cents,
            closing_cash_cents: None,
            variance_cents: None,
            events: Vec::new(),
        })
    }

    pub fn status(&self) -> ShiftStatus {
        if self.closed_at.is_some() {
            ShiftStatus::Closed
        } else {
            ShiftStatus::Open
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::ShiftClosed {
                shift_id: self.id.clone(),
            })
        }
    }

    /// Appends a drawer event. Fails with `ShiftClosed` once the shift closed.
    pub fn record_event(&mut self, event: NewDrawerEvent, at: DateTime<Utc>) -> CoreResult<&DrawerEvent> {
        self.ensure_open()?;
        event.validate()?;
        Ok(self.push_event(event, at))
    }

    fn push_event(&mut self, event: NewDrawerEvent, at: DateTime<Utc>) -> &DrawerEvent {
        let seq = self.events.len() as i64 + 1;
        self.events.push(DrawerEvent {
            id: uuid::Uuid::new_v4().to_string(),
            shift_id: self.id.clone(),
            seq,
            kind: event.kind,
            amount_cents: event.amount_cents,
            payment_method: event.payment_method,
            reference_id: event.reference_id,
            created_at: at,
        });
        &self.events[self.events.len() - 1]
    }

    /// Opening float plus the net cash effect of every event so far.
    pub fn expected_cash(&self) -> Money {
        Money::from_cents(self.opening_cash_cents) + self.events.iter().map(|e| e.cash_effect()).sum::<Money>()
    }

    /// Closes the shift, appending the terminal `Close` event.
    ///
    /// A non-zero variance is recorded, not rejected.
    pub fn close(&mut self, closing_cash_cents: i64, at: DateTime<Utc>) -> CoreResult<ShiftClosure> {
        self.ensure_open()?;
        validate_cash_float("closing_cash", closing_cash_cents)?;

        let expected_cash = self.expected_cash();
        let closing_cash = Money::from_cents(closing_cash_cents);
        let variance = closing_cash - expected_cash;

        self.push_event(
            NewDrawerEvent::new(DrawerEventKind::Close, closing_cash_cents),
            at,
        );
        self.closed_at = Some(at);
        self.closing_cash_cents = Some(closing_cash_cents);
        self.variance_cents = Some(variance.cents());

        Ok(ShiftClosure {
            expected_cash,
            closing_cash,
            variance,
        })
    }
}

/// Turns a repository lookup into the gate every monetary operation passes.
pub fn require_open_shift(shift: Option<Shift>, cashier_id: &str, store_id: &str) -> CoreResult<Shift> {
    match shift {
        Some(shift) if shift.is_open() => Ok(shift),
        _ => Err(CoreError::ShiftNotOpen {
            cashier_id: cashier_id.to_string(),
            store_id: store_id.to_string(),
        }),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn open_shift() -> Shift {
        Shift::open("c-1", "s-1", 10000, Utc::now()).unwrap()
    }

    #[test]
    fn test_expected_cash_and_variance() {
        let mut shift = open_shift();
        let now = Utc::now();
        shift
            .record_event(NewDrawerEvent::new(DrawerEventKind::CashIn, 500), now)
            .unwrap();
        shift
            .record_event(
                NewDrawerEvent::new(DrawerEventKind::Sale, 2000).paid_by(PaymentMethod::Cash),
                now,
            )
            .unwrap();
        shift
            .record_event(
                NewDrawerEvent::new(DrawerEventKind::Sale, 9999)
                    .paid_by(PaymentMethod::ExternalCard),
                now,
            )
            .unwrap();
        shift
            .record_event(
                NewDrawerEvent::new(DrawerEventKind::Refund, 300).paid_by(PaymentMethod::Cash),
                now,
            )
            .unwrap();
        shift
            .record_event(NewDrawerEvent::new(DrawerEventKind::CashOut, 200), now)
            .unwrap();

        // 10000 + 500 + 2000 - 300 - 200
        assert_eq!(shift.expected_cash().cents(), 12000);

        let closure = shift.close(11950, now).unwrap();
        assert_eq!(closure.variance.cents(), -50);
        assert_eq!(shift.status(), ShiftStatus::Closed);
        assert_eq!(shift.variance_cents, Some(-50));

        let last = shift.events.last().unwrap();
        assert_eq!(last.kind, DrawerEventKind::Close);
        assert_eq!(last.seq, 6);
    }

    #[test]
    fn test_closed_shift_rejects_events_and_second_close() {
        let mut shift = open_shift();
        shift.close(10000, Utc::now()).unwrap();

        let err = shift
            .record_event(NewDrawerEvent::new(DrawerEventKind::CashIn, 100), Utc::now())
            .unwrap_err();
        assert!(matches!(err, CoreError::ShiftClosed { .. }));

        let err = shift.close(10000, Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::ShiftClosed { .. }));
    }

    #[test]
    fn test_event_validation() {
        let mut shift = open_shift();
        assert!(shift
            .record_event(NewDrawerEvent::new(DrawerEventKind::CashIn, 0), Utc::now())
            .is_err());
        assert!(shift
            .record_event(NewDrawerEvent::new(DrawerEventKind::Close, 10), Utc::now())
            .is_err());
        assert!(Shift::open("c", "s", -1, Utc::now()).is_err());
    }

    #[test]
    fn test_require_open_shift() {
        let err = require_open_shift(None, "c-1", "s-1").unwrap_err();
        assert!(matches!(err, CoreError::ShiftNotOpen { .. }));

        let mut closed = open_shift();
        closed.close(0, Utc::now()).unwrap();
        assert!(require_open_shift(Some(closed), "c-1", "s-1").is_err());

        assert!(require_open_shift(Some(open_shift()), "c-1", "s-1").is_ok());
    }
}
