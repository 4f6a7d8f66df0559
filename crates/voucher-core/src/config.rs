//! Configuration resolution for voucher tokens.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`~/.config/voucher-tokens/settings.json`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables (`VOUCHER_*`)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete voucher token configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub keys: KeyConfig,
    pub issuance: IssuanceConfig,
    pub short_codes: ShortCodeConfig,
    pub offline: OfflineConfig,
    pub store: StoreConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keys: KeyConfig::default(),
            issuance: IssuanceConfig::default(),
            short_codes: ShortCodeConfig::default(),
            offline: OfflineConfig::default(),
            store: StoreConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Signing key lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Store key prefix for key records and the current-key pointer.
    pub namespace: String,
    /// JWS algorithm name (`ES256` or `ES384`).
    pub algorithm: String,
    /// How long a key stays the signing key (seconds). Default: 30 days.
    pub max_age_secs: i64,
    /// How long a superseded key keeps verifying (seconds). Default: 7 days.
    pub overlap_secs: i64,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            namespace: "voucher-keys".to_string(),
            algorithm: "ES256".to_string(),
            max_age_secs: 30 * 24 * 60 * 60,
            overlap_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Token issuance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuanceConfig {
    /// Store key prefix for the issuance cache.
    pub cache_namespace: String,
    /// Upper bound on how long an issuance stays cached (seconds).
    pub cache_ttl_secs: i64,
    /// TTL used when a caller does not pick one (seconds).
    pub default_ttl_secs: i64,
    /// Largest TTL a token may be issued with (seconds). Default: 1 year.
    pub max_ttl_secs: i64,
    /// Attempts at drawing an unused batch code before giving up.
    pub batch_code_attempts: u32,
    /// Reject unknown claim fields when decoding.
    pub strict_claims: bool,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            cache_namespace: "voucher-cache".to_string(),
            cache_ttl_secs: 60 * 60,
            default_ttl_secs: 5 * 60,
            max_ttl_secs: 365 * 24 * 60 * 60,
            batch_code_attempts: 16,
            strict_claims: true,
        }
    }
}

/// Short code configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShortCodeConfig {
    pub namespace: String,
    pub default_expiration_days: u32,
    /// Attempts at drawing an unused code before giving up.
    pub max_attempts: u32,
}

impl Default for ShortCodeConfig {
    fn default() -> Self {
        Self {
            namespace: "voucher-short".to_string(),
            default_expiration_days: 30,
            max_attempts: 32,
        }
    }
}

/// Offline validation journal, kept on the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// `SQLite` file holding unreconciled attempts. Defaults to
    /// [`default_journal_path`].
    pub journal_path: Option<PathBuf>,
    pub namespace: String,
    /// How long an attempt waits for a sync (seconds). Default: 30 days.
    pub retention_secs: i64,
    /// Most attempts kept pending; the oldest are dropped beyond it.
    pub max_pending: usize,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            journal_path: None,
            namespace: "voucher-offline".to_string(),
            retention_secs: 30 * 24 * 60 * 60,
            max_pending: 10_000,
        }
    }
}

/// Key-value store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: Option<PathBuf>,
    /// Per-call timeout for store round-trips (milliseconds).
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            timeout_ms: 2_000,
        }
    }
}

impl StoreConfig {
    pub const fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut layers = Vec::new();
    if let Some(global_path) = global_config_path().filter(|p| p.exists()) {
        layers.push(global_path);
    }
    if let Some(path) = explicit {
        layers.push(path.to_path_buf());
    }

    let mut config = resolve_files(&layers)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Layer settings files over the defaults. Later files win field by field;
/// a field a file does not mention keeps its earlier value.
fn resolve_files(paths: &[PathBuf]) -> Result<Config> {
    let mut merged = Value::Object(serde_json::Map::new());
    for path in paths {
        merge_values(&mut merged, load_config_file(path)?);
    }
    serde_json::from_value(merged).map_err(Error::InvalidSettings)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("voucher-tokens").join("settings.json"))
}

/// Default location of the `SQLite` key-value store.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("voucher-tokens").join("store.db"))
}

/// Default location of the device-local offline journal.
pub fn default_journal_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("voucher-tokens").join("offline-journal.db"))
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|source| Error::ConfigParse {
        path: path.to_path_buf(),
        source,
    })?;
    // Type errors are reported against the file that holds them.
    Config::deserialize(&value).map_err(|source| Error::ConfigParse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(value)
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge_values(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(val) = var("VOUCHER_KEY_ALGORITHM") {
        config.keys.algorithm = val;
    }
    if let Some(n) = var("VOUCHER_KEY_MAX_AGE_SECS").and_then(|v| v.parse().ok()) {
        config.keys.max_age_secs = n;
    }
    if let Some(n) = var("VOUCHER_KEY_OVERLAP_SECS").and_then(|v| v.parse().ok()) {
        config.keys.overlap_secs = n;
    }
    if let Some(b) = var("VOUCHER_STRICT_CLAIMS").and_then(|v| v.parse().ok()) {
        config.issuance.strict_claims = b;
    }
    if let Some(val) = var("VOUCHER_DB_PATH") {
        config.store.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = var("VOUCHER_OFFLINE_JOURNAL") {
        config.offline.journal_path = Some(PathBuf::from(val));
    }
    if let Some(n) = var("VOUCHER_STORE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.store.timeout_ms = n;
    }
    if let Some(val) = var("VOUCHER_LOG_LEVEL") {
        config.log_level = val;
    }
}
