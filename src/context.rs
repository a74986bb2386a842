// ============================================================================
// STATS CONTEXT
// ============================================================================
// Composition root shared by the REST layer, the CLI and tests. Owns the
// lazily opened storage connection, the metadata registry and the local
// controller id; hands out the stores built on top of them.
// ============================================================================

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use regex::Regex;
use tracing::{info, warn};

use crate::config::{ControllerConfig, EngineConfig, StorageBackend, StorageConfig};
use crate::constants::DEFAULT_SAMPLE_COUNT;
use crate::error::{StatsError, StatsResult};
use crate::events::EventsStore;
use crate::index::StatsIndex;
use crate::metadata::MetadataRegistry;
use crate::stats::StatsStore;
use crate::storage::{ColumnStore, MemoryStore, StatsConnection, WalStore};
use crate::types::now_millis;

/// Read the controller id out of a boot config file.
///
/// Looks for a `controller-id=<id>` line; `None` when the file is missing
/// or holds no non-empty id.
pub fn read_boot_controller_id(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let pattern = Regex::new(r"(?m)^controller-id=([0-9a-zA-Z-]*)\r?$").ok()?;
    pattern
        .captures(&text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|id| !id.is_empty())
}

fn resolve_controller_id(config: &ControllerConfig) -> String {
    if let Some(path) = &config.boot_config_path {
        match read_boot_controller_id(path) {
            Some(id) => {
                info!(target: "sdnstats::context", controller_id = %id, path = %path.display(), "Controller id from boot config");
                return id;
            }
            None => warn!(
                target: "sdnstats::context",
                path = %path.display(),
                fallback = %config.id,
                "No controller id in boot config"
            ),
        }
    }
    config.id.clone()
}

fn open_store(config: &StorageConfig) -> StatsResult<Arc<dyn ColumnStore>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::Wal => {
            let dir = config
                .data_dir
                .as_ref()
                .ok_or_else(|| StatsError::Internal("wal backend without a data directory".into()))?;
            let store = WalStore::open(dir)
                .map_err(|source| StatsError::DatabaseConnection { source })?
                .with_sync_mode(config.wal_sync_mode())
                .with_snapshot_every(config.snapshot_every);
            Ok(Arc::new(store))
        }
    }
}

/// Everything an engine operation needs.
#[derive(Debug)]
pub struct StatsContext {
    storage: StorageConfig,
    controller: ControllerConfig,
    default_sample_count: i64,
    connection: OnceCell<Arc<StatsConnection>>,
    controller_id: OnceCell<String>,
    metadata: MetadataRegistry,
}

impl StatsContext {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            storage: config.storage.clone(),
            controller: config.controller.clone(),
            default_sample_count: config.query.default_sample_count,
            connection: OnceCell::new(),
            controller_id: OnceCell::new(),
            metadata: MetadataRegistry::from_config(&config.metadata),
        }
    }

    /// Context over an already constructed store, with the built-in metadata.
    pub fn with_store(store: Arc<dyn ColumnStore>, controller_id: impl Into<String>) -> StatsResult<Self> {
        let storage = StorageConfig::default();
        let conn = StatsConnection::new(store, storage.keyspace.clone());
        conn.bootstrap()?;

        let ctx = Self {
            storage,
            controller: ControllerConfig::default(),
            default_sample_count: DEFAULT_SAMPLE_COUNT,
            connection: OnceCell::with_value(Arc::new(conn)),
            controller_id: OnceCell::with_value(controller_id.into()),
            metadata: MetadataRegistry::builtin(),
        };
        Ok(ctx)
    }

    /// Shared connection, opened and bootstrapped on first use.
    pub fn connection(&self) -> StatsResult<Arc<StatsConnection>> {
        self.connection
            .get_or_try_init(|| {
                let store = open_store(&self.storage)?;
                let conn = StatsConnection::new(store, self.storage.keyspace.clone());
                conn.bootstrap()?;
                info!(
                    target: "sdnstats::context",
                    backend = conn.backend(),
                    keyspace = conn.keyspace(),
                    "Opened stats storage"
                );
                Ok(Arc::new(conn))
            })
            .cloned()
    }

    pub fn controller_id(&self) -> &str {
        self.controller_id
            .get_or_init(|| resolve_controller_id(&self.controller))
    }

    pub fn default_sample_count(&self) -> i64 {
        self.default_sample_count
    }

    pub fn metadata(&self) -> &MetadataRegistry {
        &self.metadata
    }

    pub fn stats(&self) -> StatsResult<StatsStore> {
        Ok(StatsStore::new(self.connection()?, self.controller_id()))
    }

    pub fn events(&self) -> StatsResult<EventsStore> {
        Ok(EventsStore::new(self.connection()?))
    }

    pub fn index(&self) -> StatsResult<StatsIndex> {
        Ok(StatsIndex::new(self.connection()?))
    }

    /// Make every accepted write durable. Nothing to do before storage
    /// has been opened.
    pub fn sync(&self) -> StatsResult<()> {
        match self.connection.get() {
            Some(conn) => conn.sync(),
            None => Ok(()),
        }
    }

    /// Purge delete tombstones older than the configured grace period.
    pub fn compact(&self) -> StatsResult<usize> {
        self.compact_at(now_millis())
    }

    /// [`compact`](Self::compact) evaluated as if the clock read `now`.
    pub fn compact_at(&self, now: i64) -> StatsResult<usize> {
        let grace = i64::try_from(self.storage.tombstone_grace.as_millis()).unwrap_or(i64::MAX);
        self.connection()?.compact(now.saturating_sub(grace))
    }

    /// Drop all stored stats, events and index entries.
    pub fn flush(&self) -> StatsResult<()> {
        self.connection()?.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{SeriesId, StatsQuery};
    use crate::types::{StatPoint, StatValue};
    use serde_json::json;

    #[test]
    fn test_boot_config_controller_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boot-config");
        std::fs::write(&path, "hostname=ctl\ncontroller-id=5e1f-a0c2\nip=10.0.0.2\n").unwrap();
        assert_eq!(read_boot_controller_id(&path).as_deref(), Some("5e1f-a0c2"));

        std::fs::write(&path, "controller-id=\n").unwrap();
        assert_eq!(read_boot_controller_id(&path), None);
        assert_eq!(read_boot_controller_id(&dir.path().join("missing")), None);
    }

    #[test]
    fn test_controller_id_falls_back_to_config() {
        let mut config = EngineConfig::default();
        config.controller.id = "ctl-7".into();
        config.controller.boot_config_path = Some("/nonexistent/boot-config".into());
        let ctx = StatsContext::new(&config);
        assert_eq!(ctx.controller_id(), "ctl-7");
    }

    #[test]
    fn test_lazy_memory_connection_and_flush() {
        let mut config = EngineConfig::default();
        config.controller.id = "c1".into();
        let ctx = StatsContext::new(&config);
        let stats = ctx.stats().unwrap();
        stats
            .put(
                "default",
                &json!({"controller-stats": {"localhost": {"cpu-idle": [{"timestamp": 5, "value": 90}]}}}),
            )
            .unwrap();

        // The local placeholder is stored under the resolved controller id.
        let series = SeriesId::new("default", "controller", "c1", "cpu-idle");
        assert_eq!(stats.get(&series, &StatsQuery::range(0, 10)).unwrap().len(), 1);

        ctx.flush().unwrap();
        assert!(stats.get(&series, &StatsQuery::range(0, 10)).unwrap().is_empty());
    }

    #[test]
    fn test_compaction_forgets_old_deletes_only() {
        let ctx = StatsContext::with_store(Arc::new(MemoryStore::new()), "c1").unwrap();
        ctx.sync().unwrap();
        let stats = ctx.stats().unwrap();
        let series = SeriesId::new("default", "switch", "00:01", "flow-count");
        stats
            .put(
                "default",
                &json!({"switch-stats": {"00:01": {"flow-count": [
                    {"timestamp": 1_000, "value": 1},
                    {"timestamp": 2_000, "value": 2}
                ]}}}),
            )
            .unwrap();
        stats.delete(&series, 0, 1_500).unwrap();

        let day = 24 * 60 * 60 * 1000;
        // Still inside the grace period.
        assert_eq!(ctx.compact_at(1_500 + day).unwrap(), 0);
        assert!(ctx.compact_at(1_501 + 10 * day).unwrap() > 0);
        assert_eq!(
            stats.get(&series, &StatsQuery::range(0, 3_000)).unwrap(),
            vec![StatPoint(2_000, StatValue::Int(2))]
        );
    }

    #[test]
    fn test_wal_backend_persists_across_contexts() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.storage.backend = StorageBackend::Wal;
        config.storage.data_dir = Some(dir.path().to_path_buf());

        {
            let ctx = StatsContext::new(&config);
            let events = ctx.events().unwrap();
            events
                .put("default", &json!({"n1": [{"timestamp": 42, "message": "hello"}]}))
                .unwrap();
        }

        let ctx = StatsContext::new(&config);
        let events = ctx.events().unwrap().get("default", "n1", 0, 100, false).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].field("message"), Some("hello"));
    }
}
