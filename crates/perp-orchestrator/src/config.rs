//! Application configuration.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_symbols() -> Vec<String> {
    ["BTC", "ETH", "SOL", "BNB", "XRP"].iter().map(|s| s.to_string()).collect()
}

fn default_backfill_concurrency() -> usize {
    5
}

fn default_polling_concurrency() -> usize {
    8
}

fn default_ws_subscribe_stagger_ms() -> u64 {
    50
}

fn default_retention_days() -> i64 {
    10
}

fn default_backfill_window_days() -> i64 {
    10
}

fn default_derived_metrics_cadence_secs() -> u64 {
    60
}

fn default_polling_cadence_secs() -> u64 {
    60
}

fn default_bucket_flush_interval_secs() -> u64 {
    15
}

fn default_retention_sweep_interval_secs() -> u64 {
    3600
}

fn default_storage_max_connections() -> u32 {
    10
}

fn default_storage_chunk_size() -> usize {
    perp_storage::MIN_CHUNK_SIZE
}

fn default_direct_proxy_split() -> f64 {
    0.5
}

/// Fixed basket of majors the synthetic `MT` index is averaged over.
/// Defaults to the symbol universe itself when unset.
fn default_mt_basket() -> Vec<String> {
    default_symbols()
}

/// Operating mode: `backfill-only` runs the historical pass and exits,
/// `serve` runs the full pipeline (backfill, then continuous collection,
/// forever).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperatingMode {
    BackfillOnly,
    Serve,
}

impl Default for OperatingMode {
    fn default() -> Self {
        OperatingMode::Serve
    }
}

/// Bounded-parallelism knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Concurrent backfill units (one unit = one (exchange, metric, symbol) pass).
    pub backfill: usize,
    /// Concurrent REST polling tasks in the continuous phase.
    pub polling: usize,
    /// Delay between successive subscribe frames within one WS session.
    pub ws_subscribe_stagger_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            backfill: default_backfill_concurrency(),
            polling: default_polling_concurrency(),
            ws_subscribe_stagger_ms: default_ws_subscribe_stagger_ms(),
        }
    }
}

/// Postgres connection and chunking knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub max_connections: u32,
    pub chunk_size: usize,
    /// Rows older than this are swept by the retention job.
    pub retention_days: i64,
    pub retention_sweep_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_connections: default_storage_max_connections(),
            chunk_size: default_storage_chunk_size(),
            retention_days: default_retention_days(),
            retention_sweep_interval_secs: default_retention_sweep_interval_secs(),
        }
    }
}

/// Outbound HTTP/WS proxy, mirrored from [`perp_fetch::ProxyConfig`] so it can
/// be expressed in TOML without pulling a serde impl into `perp-fetch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl From<ProxyConfig> for perp_fetch::ProxyConfig {
    fn from(cfg: ProxyConfig) -> Self {
        Self { url: cfg.url, username: cfg.username, password: cfg.password }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: OperatingMode,
    /// Canonical symbol universe, e.g. `["BTC", "ETH"]`.
    pub symbols: Vec<String>,
    pub concurrency: ConcurrencyConfig,
    pub storage: StorageConfig,
    /// How far back the initial historical backfill reaches.
    pub backfill_window_days: i64,
    /// Cadence of the REST-polled metrics (OI, LSR, PFR) in the continuous phase.
    pub polling_cadence_secs: u64,
    /// Cadence of the derived-metrics engine's incremental pass.
    pub derived_metrics_cadence_secs: u64,
    /// How often in-memory trade/liquidation buckets are flushed to storage.
    pub bucket_flush_interval_secs: u64,
    pub proxy: Option<ProxyConfig>,
    /// Fraction of symbols routed over `direct` rather than `proxy` for REST
    /// backfill fan-out (default 50/50).
    pub direct_proxy_split: f64,
    /// Basket the synthetic `MT` aggregate index is averaged over.
    pub mt_basket: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::default(),
            symbols: default_symbols(),
            concurrency: ConcurrencyConfig::default(),
            storage: StorageConfig::default(),
            backfill_window_days: default_backfill_window_days(),
            polling_cadence_secs: default_polling_cadence_secs(),
            derived_metrics_cadence_secs: default_derived_metrics_cadence_secs(),
            bucket_flush_interval_secs: default_bucket_flush_interval_secs(),
            proxy: None,
            direct_proxy_split: default_direct_proxy_split(),
            mt_basket: default_mt_basket(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `PERP_CONFIG` env var, `--config` override, or
    /// `config/default.toml`; falls back to defaults if nothing exists on disk.
    pub fn load(config_path: Option<&str>) -> AppResult<Self> {
        let _ = dotenvy::dotenv();

        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("PERP_CONFIG").ok())
            .unwrap_or_else(|| "config/default.toml".to_string());

        let config = if Path::new(&path).exists() {
            Self::from_file(&path)?
        } else {
            tracing::warn!(path = %path, "config file not found, using defaults");
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("failed to read config {path}: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("failed to parse config {path}: {e}")))
    }

    fn validate(&self) -> AppResult<()> {
        if self.symbols.is_empty() {
            return Err(AppError::Config("symbols list must not be empty".to_string()));
        }
        Ok(())
    }

    /// Postgres DSN assembled from the `DB_*` environment variables.
    /// Fatal if any required variable is missing.
    pub fn storage_dsn(&self) -> AppResult<String> {
        let host = env_var("DB_HOST")?;
        let port = env_var("DB_PORT")?;
        let user = env_var("DB_USER")?;
        let password = env_var("DB_PASSWORD")?;
        let name = env_var("DB_NAME")?;
        Ok(format!("postgres://{user}:{password}@{host}:{port}/{name}"))
    }

    /// Coinalyze API key for liquidation-history backfill. Optional: absence
    /// just means the Coinalyze backfill unit is skipped.
    pub fn coinalyze_key(&self) -> Option<String> {
        std::env::var("COINALYZE_KEY").ok()
    }

    pub fn proxy(&self) -> Option<perp_fetch::ProxyConfig> {
        self.proxy.clone().map(Into::into)
    }
}

fn env_var(name: &str) -> AppResult<String> {
    std::env::var(name).map_err(|_| AppError::Config(format!("{name} not set")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_five_symbols_and_serve_mode() {
        let config = AppConfig::default();
        assert_eq!(config.mode, OperatingMode::Serve);
        assert_eq!(config.symbols.len(), 5);
    }

    #[test]
    fn empty_symbols_fails_validation() {
        let mut config = AppConfig::default();
        config.symbols.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = AppConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.symbols, config.symbols);
    }
}
