//! # tally-core: Pure Business Logic for the Tally POS Core
//!
//! Pricing, the shift and transaction state machines, refund restock
//! allocation and the domain types they operate on. No I/O happens here;
//! persistence is reached through the [`repository::Repository`] port.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally POS Core                                   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │        Transport / auth (external): actor + plain payloads      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   tally-engine: lifecycle manager, idempotency guard,           │   │
//! │  │   shift service, recommendation cache orchestrator              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌─────────────┐  ┌──────────┐  │   │
//! │  │   │  pricing  │  │   shift   │  │ transaction │  │  types   │  │   │
//! │  │   │  totals   │  │  drawer   │  │ void/refund │  │ PO/stock │  │   │
//! │  │   └───────────┘  └───────────┘  └─────────────┘  └──────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ Repository port                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                tally-db (SQLite implementation)                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Money and TaxRate, integer minor units, half-up rounding
//! - [`pricing`] - The pricing engine
//! - [`shift`] - Shift state machine and drawer reconciliation
//! - [`transaction`] - Transaction state machine, refunds, restock allocation
//! - [`types`] - Products, suppliers, purchase orders, stock movements
//! - [`idempotency`] - Stored outcomes of keyed requests
//! - [`actor`] - Authenticated caller and the role gate
//! - [`repository`] - Persistence port
//! - [`clock`] - Time source
//! - [`error`] - Error types and kinds
//! - [`validation`] - Field-level input checks
//!
//! ## Example Usage
//!
//! ```rust
//! use tally_core::money::{Money, TaxRate};
//!
//! let taxable = Money::from_cents(20250);
//! let tax = taxable.calculate_tax(TaxRate::from_percent(11));
//! assert_eq!(tax.cents(), 2228);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod actor;
pub mod clock;
pub mod error;
pub mod idempotency;
pub mod money;
pub mod pricing;
pub mod repository;
pub mod shift;
pub mod transaction;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use actor::{Actor, ManagerOverride, Role};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult, ErrorKind, ValidationError};
pub use money::{Money, TaxRate};
pub use pricing::{CartDiscount, CartLine, ManualOverride, PricingArtifact, PricingSource};
pub use repository::Repository;
pub use shift::{DrawerEvent, DrawerEventKind, NewDrawerEvent, Shift, ShiftClosure};
pub use transaction::{Cart, LineItem, Refund, RestockLine, Transaction, TransactionStatus};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum lines allowed in a single cart.
pub const MAX_CART_ITEMS: usize = 100;

/// Maximum quantity on a single cart line.
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Longest accepted client idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Default void grace window: 30 minutes after creation, inclusive.
pub const DEFAULT_VOID_WINDOW_SECS: i64 = 30 * 60;

/// Default idempotency record lifetime: 24 hours.
pub const DEFAULT_IDEMPOTENCY_TTL_SECS: i64 = 24 * 60 * 60;

/// Shortest idempotency lifetime configuration accepts. Terminals retry for
/// well under an hour.
pub const MIN_IDEMPOTENCY_TTL_SECS: i64 = 60 * 60;
