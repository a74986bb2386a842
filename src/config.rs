// ============================================================================
// CONFIGURATION SYSTEM
// ============================================================================
// Configuration management with:
// - TOML file parsing
// - Environment variable overrides (SDNSTATS_SECTION__KEY)
// - Validation
// - Sensible defaults for every field
// ============================================================================

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::constants::{DEFAULT_SAMPLE_COUNT, ENGINE_NAME, ENV_PREFIX, LOCALHOST_ID};
use crate::error::ConfigError;
use crate::storage::wal::{WalSyncMode, DEFAULT_SNAPSHOT_EVERY};

// ----------------------------------------------------------------------------
// Main Configuration Structure
// ----------------------------------------------------------------------------

/// Root configuration for the stats engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// REST server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Local controller identity
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Stat-type metadata sources
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Query defaults
    #[serde(default)]
    pub query: QueryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from file with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load from string (for testing)
    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .listen_address
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::invalid_value("server.listen_address", e.to_string()))?;

        if !self.server.base_path.starts_with('/') {
            return Err(ConfigError::invalid_value(
                "server.base_path",
                "Base path must start with '/'",
            ));
        }

        if self.storage.backend == StorageBackend::Wal && self.storage.data_dir.is_none() {
            return Err(ConfigError::invalid_value(
                "storage.data_dir",
                "The wal backend needs a data directory",
            ));
        }

        if self.storage.keyspace.is_empty() {
            return Err(ConfigError::invalid_value(
                "storage.keyspace",
                "Keyspace name cannot be empty",
            ));
        }

        if self.storage.wal_sync == WalSyncSetting::Batched && self.storage.wal_sync_batch == 0 {
            return Err(ConfigError::invalid_value(
                "storage.wal_sync_batch",
                "Batch size must be at least 1",
            ));
        }

        if self.query.default_sample_count <= 0 {
            return Err(ConfigError::invalid_value(
                "query.default_sample_count",
                "Sample count must be greater than 0",
            ));
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty" | "compact") {
            return Err(ConfigError::invalid_value(
                "logging.format",
                format!("Unknown log format '{}'", self.logging.format),
            ));
        }

        Ok(())
    }

    /// Create a default config file
    pub fn generate_default_config() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

// ----------------------------------------------------------------------------
// Server Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the REST server binds
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Prefix every route is nested under
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Grace period for in-flight requests on shutdown
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            base_path: default_base_path(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

fn default_listen_address() -> String {
    "0.0.0.0:8000".into()
}

fn default_base_path() -> String {
    "/rest/v1".into()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

// ----------------------------------------------------------------------------
// Storage Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory only; contents are lost on exit
    #[default]
    Memory,
    /// Write-ahead log with snapshots under `data_dir`
    Wal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WalSyncSetting {
    None,
    EveryWrite,
    #[default]
    Batched,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Directory for the wal backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(default = "default_keyspace")]
    pub keyspace: String,

    #[serde(default)]
    pub wal_sync: WalSyncSetting,

    /// Records per fsync in batched mode
    #[serde(default = "default_wal_sync_batch")]
    pub wal_sync_batch: usize,

    /// Records between snapshots; 0 disables snapshots
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,

    /// Age at which delete tombstones may be purged
    #[serde(default = "default_tombstone_grace", with = "humantime_serde")]
    pub tombstone_grace: Duration,

    /// Time between background compactions; 0 disables them
    #[serde(default = "default_compact_interval", with = "humantime_serde")]
    pub compact_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: None,
            keyspace: default_keyspace(),
            wal_sync: WalSyncSetting::default(),
            wal_sync_batch: default_wal_sync_batch(),
            snapshot_every: default_snapshot_every(),
            tombstone_grace: default_tombstone_grace(),
            compact_interval: default_compact_interval(),
        }
    }
}

impl StorageConfig {
    pub fn wal_sync_mode(&self) -> WalSyncMode {
        match self.wal_sync {
            WalSyncSetting::None => WalSyncMode::None,
            WalSyncSetting::EveryWrite => WalSyncMode::EveryWrite,
            WalSyncSetting::Batched => WalSyncMode::Batched {
                batch_size: self.wal_sync_batch,
            },
        }
    }
}

fn default_keyspace() -> String {
    ENGINE_NAME.into()
}

fn default_wal_sync_batch() -> usize {
    100
}

fn default_snapshot_every() -> u64 {
    DEFAULT_SNAPSHOT_EVERY
}

fn default_tombstone_grace() -> Duration {
    Duration::from_secs(10 * 24 * 60 * 60)
}

fn default_compact_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

// ----------------------------------------------------------------------------
// Controller Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Id recorded for stats produced by this controller
    #[serde(default = "default_controller_id")]
    pub id: String,

    /// Boot config file holding a `controller-id=<id>` line; takes precedence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_config_path: Option<PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            id: default_controller_id(),
            boot_config_path: None,
        }
    }
}

fn default_controller_id() -> String {
    LOCALHOST_ID.into()
}

// ----------------------------------------------------------------------------
// Metadata Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Load the built-in controller OS stats
    #[serde(default = "default_true")]
    pub include_builtin: bool,

    /// Metadata files (.json or .toml)
    #[serde(default)]
    pub sources: Vec<PathBuf>,

    /// Entries given directly in the config
    #[serde(default)]
    pub inline: Vec<BTreeMap<String, JsonValue>>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            include_builtin: true,
            sources: Vec::new(),
            inline: Vec::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Query Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Points per range query when no sample interval is given
    #[serde(default = "default_sample_count")]
    pub default_sample_count: i64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_sample_count: default_sample_count(),
        }
    }
}

fn default_sample_count() -> i64 {
    DEFAULT_SAMPLE_COUNT
}

// ----------------------------------------------------------------------------
// Logging Configuration
// ----------------------------------------------------------------------------

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Also write JSON logs to this file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Enable ANSI colors
    #[serde(default = "default_true")]
    pub colors: bool,

    /// Include source location
    #[serde(default)]
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            colors: true,
            source_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

fn default_true() -> bool {
    true
}
