//! # tally-engine: Transaction Lifecycle Engine for the Tally POS Core
//!
//! Everything a transport layer calls: checkout, void, refund, shifts,
//! receiving and recommendations. Each operation takes an authenticated
//! [`Actor`] and a plain payload, and returns a plain value or a
//! [`CoreError`] whose [`kind`](CoreError::kind) tells the caller what to do.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              PosEngine                                  │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐    │
//! │  │ LifecycleManager │   │   ShiftService   │   │ InventoryService │    │
//! │  │                  │──►│                  │   │                  │    │
//! │  │ checkout / void  │   │ open / close     │   │ catalog, POs,    │    │
//! │  │ refund           │   │ drawer events    │   │ receiving, stock │    │
//! │  │   │              │   │ open-shift gate  │   │                  │    │
//! │  │   ▼              │   └──────────────────┘   └──────────────────┘    │
//! │  │ IdempotencyGuard │                                                   │
//! │  │ RetryPolicy      │   ┌────────────────────────────────────────┐     │
//! │  └──────────────────┘   │ RecommendationOrchestrator             │     │
//! │                         │ HistoryRecommender + RecommendationCache│     │
//! │                         └────────────────────────────────────────┘     │
//! │                                   │                                     │
//! │                                   ▼                                     │
//! │                 Arc<dyn Repository>  (tally-db SQLite)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`lifecycle`] - Checkout, void and refund commit units
//! - [`idempotency`] - At-most-once execution per idempotency key
//! - [`shift`] - Shift open/close, drawer events, shift reports
//! - [`inventory`] - Products, suppliers, purchase orders, stock queries
//! - [`recommend`] - Cache-aside recommendations
//! - [`cache`] - Redis, in-memory and no-op cache backends
//! - [`retry`] - Commit retry with exponential backoff
//! - [`config`] - Engine configuration (TOML + environment)
//! - [`error`] - Configuration and startup errors
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_engine::{EngineConfig, PosEngine};
//!
//! let engine = PosEngine::connect(EngineConfig::load(None)?).await?;
//! engine.open_shift(&actor, 10_000).await?;
//! let receipt = engine.checkout(&actor, &cart, "term-7:000183").await?;
//! println!("{} + {} suggestions", receipt.transaction.grand_total(), receipt.recommendations.items.len());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cache;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod inventory;
pub mod lifecycle;
pub mod recommend;
pub mod retry;
pub mod shift;

// =============================================================================
// Re-exports
// =============================================================================

pub use cache::{MemoryCache, NoopCache, RecommendationCache, RedisCache};
pub use config::{EngineConfig, PopulateMode};
pub use error::{ConfigError, EngineError};
pub use inventory::{NewProduct, NewPurchaseOrder, NewSupplier, OrderLine};
pub use lifecycle::CheckoutReceipt;
pub use recommend::{Recommendations, Suggestion};
pub use shift::ShiftReport;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use tally_core::{
    Actor, Cart, Clock, CoreError, CoreResult, DrawerEvent, NewDrawerEvent, Product, PurchaseOrder, ReceiptLine,
    Refund, Repository, Shift, ShiftClosure, StockMovement, Supplier, SystemClock, Transaction,
};
use tally_db::Database;

use crate::idempotency::IdempotencyGuard;
use crate::inventory::InventoryService;
use crate::lifecycle::LifecycleManager;
use crate::recommend::{HistoryRecommender, RecommendationOrchestrator};
use crate::shift::ShiftService;

// =============================================================================
// Engine
// =============================================================================

/// The POS transaction core, wired to a repository, a clock and a cache.
pub struct PosEngine {
    config: EngineConfig,
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    shifts: Arc<ShiftService>,
    lifecycle: LifecycleManager,
    inventory: InventoryService,
    recommendations: Arc<RecommendationOrchestrator>,
}

impl PosEngine {
    pub fn new(
        config: EngineConfig,
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        cache: Arc<dyn RecommendationCache>,
    ) -> Self {
        let retry = config.retry_policy();

        let shifts = Arc::new(ShiftService::new(repo.clone(), clock.clone(), retry));
        let guard = IdempotencyGuard::new(repo.clone(), clock.clone(), config.idempotency_ttl());

        let mut recommendations = RecommendationOrchestrator::new(
            Arc::new(HistoryRecommender::new(repo.clone())),
            cache,
            config.recommendation_ttl(),
            config.recommendations.limit,
            config.recommendations.populate,
        );
        if !config.recommendations.enabled {
            recommendations = recommendations.disabled();
        }
        let recommendations = Arc::new(recommendations);

        let lifecycle = LifecycleManager::new(
            repo.clone(),
            clock.clone(),
            shifts.clone(),
            guard,
            recommendations.clone(),
            retry,
            config.tax_rate(),
            config.void_window(),
        );
        let inventory = InventoryService::new(repo.clone(), clock.clone());

        PosEngine {
            config,
            repo,
            clock,
            shifts,
            lifecycle,
            inventory,
            recommendations,
        }
    }

    /// Validates the configuration, opens the SQLite database and connects
    /// the recommendation cache.
    ///
    /// An unreachable Redis falls back to the in-process cache.
    pub async fn connect(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        if let Some(dir) = config.database.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(ConfigError::from)?;
        }

        let db = Database::new(config.db_config())
            .await
            .map_err(CoreError::from)?;

        let cache: Arc<dyn RecommendationCache> = match config.recommendations.redis_url.as_deref() {
            Some(url) => match RedisCache::connect(url).await {
                Ok(redis) => Arc::new(redis),
                Err(e) => {
                    warn!(error = %e, "Failed to connect to Redis, caching recommendations in process");
                    Arc::new(MemoryCache::new())
                }
            },
            None => Arc::new(MemoryCache::new()),
        };

        info!(store_id = %config.store_id(), "POS engine ready");
        Ok(Self::new(config, Arc::new(db), Arc::new(SystemClock), cache))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Shifts
    // =========================================================================

    pub async fn open_shift(&self, actor: &Actor, opening_cash_cents: i64) -> CoreResult<Shift> {
        self.shifts.open_shift(actor, opening_cash_cents).await
    }

    pub async fn close_shift(&self, actor: &Actor, shift_id: &str, closing_cash_cents: i64) -> CoreResult<ShiftClosure> {
        self.shifts.close_shift(actor, shift_id, closing_cash_cents).await
    }

    pub async fn record_drawer_event(
        &self,
        actor: &Actor,
        shift_id: &str,
        event: NewDrawerEvent,
    ) -> CoreResult<DrawerEvent> {
        self.shifts.record_drawer_event(actor, shift_id, event).await
    }

    /// The actor's open shift, or `ShiftNotOpen`.
    pub async fn current_shift(&self, actor: &Actor) -> CoreResult<Shift> {
        self.shifts.require_open_shift(actor).await
    }

    pub async fn shift_report(&self, actor: &Actor, shift_id: &str) -> CoreResult<ShiftReport> {
        self.shifts.shift_report(actor, shift_id).await
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub async fn checkout(&self, actor: &Actor, cart: &Cart, idempotency_key: &str) -> CoreResult<CheckoutReceipt> {
        self.lifecycle.checkout(actor, cart, idempotency_key).await
    }

    pub async fn void(&self, actor: &Actor, transaction_id: &str, reason: &str) -> CoreResult<Transaction> {
        self.lifecycle.void(actor, transaction_id, reason).await
    }

    pub async fn refund(
        &self,
        actor: &Actor,
        transaction_id: &str,
        amount_cents: i64,
        reason: &str,
    ) -> CoreResult<Refund> {
        self.lifecycle.refund(actor, transaction_id, amount_cents, reason).await
    }

    pub async fn get_transaction(&self, actor: &Actor, transaction_id: &str) -> CoreResult<Transaction> {
        self.lifecycle.get_transaction(actor, transaction_id).await
    }

    pub async fn list_refunds(&self, actor: &Actor, transaction_id: &str) -> CoreResult<Vec<Refund>> {
        self.lifecycle.list_refunds(actor, transaction_id).await
    }

    /// The store's transactions created in `[from, to)`, oldest first.
    pub async fn list_transactions(
        &self,
        actor: &Actor,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CoreResult<Vec<Transaction>> {
        self.repo.list_transactions(&actor.store_id, from, to).await
    }

    // =========================================================================
    // Recommendations
    // =========================================================================

    /// Suggestions for a cart. Identical for carts with the same product set.
    pub async fn recommend(&self, actor: &Actor, cart: &Cart) -> CoreResult<Recommendations> {
        self.recommendations
            .recommend(&actor.store_id, &cart.product_ids())
            .await
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    pub async fn register_product(&self, actor: &Actor, product: NewProduct) -> CoreResult<Product> {
        self.inventory.register_product(actor, product).await
    }

    pub async fn get_product(&self, actor: &Actor, product_id: &str) -> CoreResult<Product> {
        self.inventory.get_product(actor, product_id).await
    }

    pub async fn register_supplier(&self, actor: &Actor, supplier: NewSupplier) -> CoreResult<Supplier> {
        self.inventory.register_supplier(actor, supplier).await
    }

    pub async fn create_purchase_order(&self, actor: &Actor, order: NewPurchaseOrder) -> CoreResult<PurchaseOrder> {
        self.inventory.create_purchase_order(actor, order).await
    }

    pub async fn receive_purchase_order(
        &self,
        actor: &Actor,
        purchase_order_id: &str,
        lines: Vec<ReceiptLine>,
    ) -> CoreResult<PurchaseOrder> {
        self.inventory.receive_purchase_order(actor, purchase_order_id, lines).await
    }

    pub async fn get_purchase_order(&self, actor: &Actor, purchase_order_id: &str) -> CoreResult<PurchaseOrder> {
        self.inventory.get_purchase_order(actor, purchase_order_id).await
    }

    pub async fn stock_level(&self, actor: &Actor, product_id: &str) -> CoreResult<i64> {
        self.inventory.stock_level(actor, product_id).await
    }

    pub async fn stock_movements(&self, actor: &Actor, product_id: &str) -> CoreResult<Vec<StockMovement>> {
        self.inventory.stock_movements(actor, product_id).await
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Deletes expired idempotency records.
    pub async fn purge_expired_idempotency(&self) -> CoreResult<u64> {
        let purged = self.repo.purge_expired_idempotency(self.clock.now()).await?;
        if purged > 0 {
            info!(purged, "Purged expired idempotency records");
        }
        Ok(purged)
    }
}

// =============================================================================
// Engine Tests
// =============================================================================
