//! # Engine Configuration
//!
//! Store identity, database location, pricing and lifecycle policy, and the
//! recommendation cache.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TALLY_STORE_ID=store-001                                           │
//! │     TALLY_VOID_WINDOW_SECS=900                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tally-pos/tally.toml (Linux)                             │
//! │     ~/Library/Application Support/com.tally.pos/tally.toml (macOS)     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [store]
//! id = "store-001"
//! name = "Downtown Branch"
//!
//! [database]
//! path = "/var/lib/tally/tally.db"
//! max_connections = 5
//!
//! [pricing]
//! tax_rate_bps = 1100
//!
//! [lifecycle]
//! void_window_secs = 1800
//! idempotency_ttl_secs = 86400
//! commit_retries = 3
//!
//! [recommendations]
//! enabled = true
//! ttl_secs = 300
//! limit = 5
//! populate = "background"
//! redis_url = "redis://127.0.0.1:6379"
//! ```

use std::path::PathBuf;
use std::time::Duration as StdDuration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::retry::RetryPolicy;
use tally_core::{TaxRate, DEFAULT_IDEMPOTENCY_TTL_SECS, DEFAULT_VOID_WINDOW_SECS, MIN_IDEMPOTENCY_TTL_SECS};
use tally_db::DbConfig;

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub id: String,

    #[serde(default)]
    pub name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            id: "default-store".to_string(),
            name: "Default Store".to_string(),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `tally.db` in the platform data directory.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("com", "tally", "pos")
        .map(|dirs| dirs.data_dir().join("tally.db"))
        .unwrap_or_else(|| PathBuf::from("tally.db"))
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Pricing
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PricingSettings {
    /// Store tax rate in basis points (1100 = 11%).
    #[serde(default)]
    pub tax_rate_bps: u32,
}

// =============================================================================
// Lifecycle
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleSettings {
    /// How long after creation a transaction may still be voided (inclusive).
    #[serde(default = "default_void_window")]
    pub void_window_secs: i64,

    /// Lifetime of idempotency records. At least one hour.
    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl_secs: i64,

    /// Extra attempts for a commit that hit a busy database or lost a
    /// compare-and-set.
    #[serde(default = "default_commit_retries")]
    pub commit_retries: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_void_window() -> i64 {
    DEFAULT_VOID_WINDOW_SECS
}
fn default_idempotency_ttl() -> i64 {
    DEFAULT_IDEMPOTENCY_TTL_SECS
}
fn default_commit_retries() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    25
}
fn default_max_backoff() -> u64 {
    1000
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        LifecycleSettings {
            void_window_secs: default_void_window(),
            idempotency_ttl_secs: default_idempotency_ttl(),
            commit_retries: default_commit_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

// =============================================================================
// Recommendations
// =============================================================================

/// When freshly computed recommendations are written to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulateMode {
    /// Await the cache write before returning.
    Inline,

    /// Detach the cache write onto a background task.
    #[default]
    Background,
}

impl std::str::FromStr for PopulateMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inline" => Ok(PopulateMode::Inline),
            "background" => Ok(PopulateMode::Background),
            other => Err(ConfigError::Invalid(format!(
                "Unknown populate mode: '{}'. Valid options: inline, background",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache entry lifetime.
    #[serde(default = "default_reco_ttl")]
    pub ttl_secs: u64,

    /// Suggestions returned per cart.
    #[serde(default = "default_reco_limit")]
    pub limit: u32,

    #[serde(default)]
    pub populate: PopulateMode,

    /// Redis backend. Without it the engine caches in process.
    #[serde(default)]
    pub redis_url: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_reco_ttl() -> u64 {
    300
}
fn default_reco_limit() -> u32 {
    5
}

impl Default for RecommendationSettings {
    fn default() -> Self {
        RecommendationSettings {
            enabled: true,
            ttl_secs: default_reco_ttl(),
            limit: default_reco_limit(),
            populate: PopulateMode::default(),
            redis_url: None,
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub pricing: PricingSettings,

    #[serde(default)]
    pub lifecycle: LifecycleSettings,

    #[serde(default)]
    pub recommendations: RecommendationSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (tally.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> ConfigResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| ConfigError::Invalid("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&path, toml::to_string_pretty(self)?)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.store.id.trim().is_empty() {
            return Err(ConfigError::Invalid("store.id must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if !self.tax_rate().is_valid() {
            return Err(ConfigError::Invalid(format!(
                "pricing.tax_rate_bps must be within 0..=10000, got {}",
                self.pricing.tax_rate_bps
            )));
        }

        let lifecycle = &self.lifecycle;
        if lifecycle.void_window_secs < 0 {
            return Err(ConfigError::Invalid(
                "lifecycle.void_window_secs must not be negative".into(),
            ));
        }

        if lifecycle.idempotency_ttl_secs < MIN_IDEMPOTENCY_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "lifecycle.idempotency_ttl_secs must be at least {}, got {}",
                MIN_IDEMPOTENCY_TTL_SECS, lifecycle.idempotency_ttl_secs
            )));
        }

        if lifecycle.initial_backoff_ms == 0 || lifecycle.max_backoff_ms < lifecycle.initial_backoff_ms {
            return Err(ConfigError::Invalid(
                "lifecycle backoff must satisfy 0 < initial_backoff_ms <= max_backoff_ms".into(),
            ));
        }

        let reco = &self.recommendations;
        if reco.ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "recommendations.ttl_secs must be greater than 0".into(),
            ));
        }

        if reco.limit == 0 || reco.limit > 50 {
            return Err(ConfigError::Invalid(format!(
                "recommendations.limit must be within 1..=50, got {}",
                reco.limit
            )));
        }

        if let Some(ref url) = reco.redis_url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(ConfigError::Invalid(format!(
                    "Redis URL must start with redis:// or rediss://, got: {}",
                    url
                )));
            }
        }

        Ok(())
    }

    /// Applies `TALLY_*` overrides read through `var`.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(id) = var("TALLY_STORE_ID") {
            debug!(store_id = %id, "Overriding store ID from environment");
            self.store.id = id;
        }

        if let Some(path) = var("TALLY_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }

        parse_into(&var, "TALLY_DB_MAX_CONNECTIONS", &mut self.database.max_connections);
        parse_into(&var, "TALLY_TAX_RATE_BPS", &mut self.pricing.tax_rate_bps);
        parse_into(&var, "TALLY_VOID_WINDOW_SECS", &mut self.lifecycle.void_window_secs);
        parse_into(&var, "TALLY_IDEMPOTENCY_TTL_SECS", &mut self.lifecycle.idempotency_ttl_secs);
        parse_into(&var, "TALLY_COMMIT_RETRIES", &mut self.lifecycle.commit_retries);
        parse_into(&var, "TALLY_RECOMMENDATIONS_ENABLED", &mut self.recommendations.enabled);
        parse_into(&var, "TALLY_RECOMMENDATIONS_TTL_SECS", &mut self.recommendations.ttl_secs);

        if let Some(mode) = var("TALLY_CACHE_POPULATE") {
            match mode.parse() {
                Ok(parsed) => self.recommendations.populate = parsed,
                Err(_) => warn!(mode = %mode, "Unknown cache populate mode in environment"),
            }
        }

        if let Some(url) = var("TALLY_REDIS_URL") {
            self.recommendations.redis_url = Some(url).filter(|u| !u.is_empty());
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tally", "pos")
            .map(|dirs| dirs.config_dir().join("tally.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn store_id(&self) -> &str {
        &self.store.id
    }

    pub fn tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.pricing.tax_rate_bps)
    }

    pub fn void_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lifecycle.void_window_secs)
    }

    pub fn idempotency_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lifecycle.idempotency_ttl_secs)
    }

    pub fn recommendation_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.recommendations.ttl_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.lifecycle.commit_retries,
            StdDuration::from_millis(self.lifecycle.initial_backoff_ms),
            StdDuration::from_millis(self.lifecycle.max_backoff_ms),
        )
    }

    /// Pool settings for `tally_db::Database::new`.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path).max_connections(self.database.max_connections)
    }
}

fn parse_into<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str, slot: &mut T) {
    if let Some(raw) = var(name) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => warn!(var = name, value = %raw, "Ignoring unparsable environment override"),
        }
    }
}
