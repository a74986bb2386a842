// ============================================================================
// STATS CONNECTION
// ============================================================================
// Shared handle to the column store used by every engine component:
// - schema bootstrap and on-demand column family creation
// - one reconnect-and-retry per storage call on transport failures
// - translation of StorageError into the stats error taxonomy
// ============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use super::{ColumnFamilyDef, ColumnStore};
use crate::constants::{
    BOOTSTRAP_TARGET_TYPES, EVENTS_CF, STATS_CF_SUFFIX, STATS_TYPE_INDEX_CF,
    STORAGE_TIMESTAMP_SCALE, TARGET_INDEX_CF,
};
use crate::error::{StatsError, StatsResult, StorageResult};

/// Column family holding the stats of one target type.
pub fn stats_family(target_type: &str) -> String {
    format!("{}{}", target_type, STATS_CF_SUFFIX)
}

/// Families that exist from the start.
pub fn bootstrap_families() -> Vec<ColumnFamilyDef> {
    let mut defs = vec![
        ColumnFamilyDef::super_family(TARGET_INDEX_CF),
        ColumnFamilyDef::super_family(STATS_TYPE_INDEX_CF),
        ColumnFamilyDef::super_family(EVENTS_CF),
    ];
    defs.extend(
        BOOTSTRAP_TARGET_TYPES
            .iter()
            .map(|tt| ColumnFamilyDef::standard(stats_family(tt))),
    );
    defs
}

/// Connection to the stats keyspace.
pub struct StatsConnection {
    store: Arc<dyn ColumnStore>,
    keyspace: String,
    known_families: RwLock<HashSet<String>>,
}

impl std::fmt::Debug for StatsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsConnection")
            .field("backend", &self.store.name())
            .field("keyspace", &self.keyspace)
            .finish()
    }
}

impl StatsConnection {
    pub fn new(store: Arc<dyn ColumnStore>, keyspace: impl Into<String>) -> Self {
        Self {
            store,
            keyspace: keyspace.into(),
            known_families: RwLock::new(HashSet::new()),
        }
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    /// Create the fixed schema.
    pub fn bootstrap(&self) -> StatsResult<()> {
        let existing = self.call("describe_keyspace", |s| s.column_families())?;
        self.known_families.write().extend(existing);

        for def in bootstrap_families() {
            self.ensure_column_family(&def)?;
        }
        info!(
            target: "sdnstats::connection",
            keyspace = %self.keyspace,
            backend = self.store.name(),
            families = self.known_families.read().len(),
            "Stats schema ready"
        );
        Ok(())
    }

    /// Run one storage operation, reconnecting and retrying once if the
    /// transport failed.
    pub fn call<T>(
        &self,
        op: &'static str,
        f: impl Fn(&dyn ColumnStore) -> StorageResult<T>,
    ) -> StatsResult<T> {
        match f(self.store.as_ref()) {
            Ok(v) => Ok(v),
            Err(e) if e.is_transport() => {
                warn!(
                    target: "sdnstats::connection",
                    op,
                    error = %e,
                    "Storage transport failure, reconnecting"
                );
                if let Err(source) = self.store.reconnect() {
                    return Err(StatsError::DatabaseConnection { source });
                }
                match f(self.store.as_ref()) {
                    Ok(v) => Ok(v),
                    Err(source) if source.is_transport() => {
                        Err(StatsError::DatabaseConnection { source })
                    }
                    Err(source) => Err(StatsError::DatabaseAccess { source }),
                }
            }
            Err(source) => Err(StatsError::DatabaseAccess { source }),
        }
    }

    /// Create `def` unless this connection already knows it exists.
    pub fn ensure_column_family(&self, def: &ColumnFamilyDef) -> StatsResult<()> {
        if self.known_families.read().contains(&def.name) {
            return Ok(());
        }
        self.call("create_column_family", |s| s.create_column_family(def))
            .map_err(|e| match e {
                StatsError::DatabaseConnection { source } | StatsError::DatabaseAccess { source } => {
                    StatsError::CreateColumnFamily {
                        name: def.name.clone(),
                        source,
                    }
                }
                other => other,
            })?;
        self.known_families.write().insert(def.name.clone());
        Ok(())
    }

    /// Stats family for `target_type`, created if needed.
    pub fn ensure_stats_family(&self, target_type: &str) -> StatsResult<String> {
        let name = stats_family(target_type);
        self.ensure_column_family(&ColumnFamilyDef::standard(name.clone()))?;
        Ok(name)
    }

    /// Whether a column family is known to exist.
    pub fn has_family(&self, name: &str) -> bool {
        self.known_families.read().contains(name)
    }

    /// Make every accepted write durable.
    pub fn sync(&self) -> StatsResult<()> {
        self.call("sync", |s| s.sync())
    }

    /// Purge tombstones written before `horizon` (epoch milliseconds).
    pub fn compact(&self, horizon: i64) -> StatsResult<usize> {
        let horizon = horizon.saturating_mul(STORAGE_TIMESTAMP_SCALE);
        let purged = self.call("compact", |s| s.compact(horizon))?;
        info!(target: "sdnstats::connection", keyspace = %self.keyspace, purged, "Compacted stats keyspace");
        Ok(purged)
    }

    /// Truncate every family of the keyspace.
    pub fn flush(&self) -> StatsResult<()> {
        let families = self.call("describe_keyspace", |s| s.column_families())?;
        for family in &families {
            self.call("truncate", |s| s.truncate(family))?;
        }
        info!(target: "sdnstats::connection", families = families.len(), "Flushed stats keyspace");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::{
        Column, KeyRange, KeySlice, MemoryStore, MutationBatch, SliceRange, SuperColumn,
    };
    use mockall::{mock, Sequence};

    mock! {
        pub Store {}

        impl ColumnStore for Store {
            fn name(&self) -> &'static str;
            fn create_column_family(&self, def: &ColumnFamilyDef) -> StorageResult<()>;
            fn column_families(&self) -> StorageResult<Vec<String>>;
            fn get_slice(&self, family: &str, key: &str, range: &SliceRange) -> StorageResult<Vec<Column>>;
            fn get_super_slice(&self, family: &str, key: &str, range: &SliceRange) -> StorageResult<Vec<SuperColumn>>;
            fn get_range_super_slices(&self, family: &str, keys: &KeyRange, range: &SliceRange) -> StorageResult<Vec<KeySlice<SuperColumn>>>;
            fn batch_mutate(&self, batch: &MutationBatch) -> StorageResult<()>;
            fn remove(&self, family: &str, key: &str, timestamp: i64) -> StorageResult<()>;
            fn truncate(&self, family: &str) -> StorageResult<()>;
            fn reconnect(&self) -> StorageResult<()>;
            fn sync(&self) -> StorageResult<()>;
            fn compact(&self, horizon: i64) -> StorageResult<usize>;
        }
    }

    fn slice(conn: &StatsConnection) -> StatsResult<Vec<Column>> {
        conn.call("get_slice", |s| {
            s.get_slice("switch_stats", "k", &SliceRange::all(10))
        })
    }

    #[test]
    fn test_single_transport_failure_is_retried() {
        let mut mock = MockStore::new();
        let mut seq = Sequence::new();
        mock.expect_name().return_const("mock");
        mock.expect_get_slice()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(StorageError::transport("connection reset")));
        mock.expect_reconnect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        mock.expect_get_slice()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(vec![Column::new("00000001", "5", 1000)]));

        let conn = StatsConnection::new(Arc::new(mock), "test");
        let cols = slice(&conn).unwrap();
        assert_eq!(cols.len(), 1);
    }

    #[test]
    fn test_second_transport_failure_surfaces() {
        let mut mock = MockStore::new();
        mock.expect_name().return_const("mock");
        mock.expect_get_slice()
            .times(2)
            .returning(|_, _, _| Err(StorageError::transport("connection refused")));
        mock.expect_reconnect().times(1).returning(|| Ok(()));

        let conn = StatsConnection::new(Arc::new(mock), "test");
        assert!(matches!(
            slice(&conn),
            Err(StatsError::DatabaseConnection { .. })
        ));
    }

    #[test]
    fn test_failed_reconnect_surfaces() {
        let mut mock = MockStore::new();
        mock.expect_name().return_const("mock");
        mock.expect_get_slice()
            .times(1)
            .returning(|_, _, _| Err(StorageError::transport("broken pipe")));
        mock.expect_reconnect()
            .times(1)
            .returning(|| Err(StorageError::transport("still down")));

        let conn = StatsConnection::new(Arc::new(mock), "test");
        assert!(matches!(
            slice(&conn),
            Err(StatsError::DatabaseConnection { .. })
        ));
    }

    #[test]
    fn test_non_transport_failure_is_not_retried() {
        let mut mock = MockStore::new();
        mock.expect_get_slice()
            .times(1)
            .returning(|_, _, _| Err(StorageError::invalid_request("bad slice")));
        mock.expect_reconnect().times(0);

        let conn = StatsConnection::new(Arc::new(mock), "test");
        assert!(matches!(slice(&conn), Err(StatsError::DatabaseAccess { .. })));
    }

    #[test]
    fn test_compact_horizon_is_in_storage_units() {
        let mut mock = MockStore::new();
        mock.expect_compact()
            .withf(|horizon| *horizon == 5_000)
            .times(1)
            .returning(|_| Ok(3));
        mock.expect_sync().times(1).returning(|| Ok(()));

        let conn = StatsConnection::new(Arc::new(mock), "test");
        assert_eq!(conn.compact(5).unwrap(), 3);
        conn.sync().unwrap();
    }

    #[test]
    fn test_bootstrap_and_on_demand_families() {
        let store = Arc::new(MemoryStore::new());
        let conn = StatsConnection::new(store.clone(), "test");
        conn.bootstrap().unwrap();

        let mut names = store.family_names();
        names.sort();
        assert_eq!(
            names,
            vec![
                "controller_stats",
                "events",
                "port_stats",
                "stats_type_index",
                "switch_stats",
                "target_index"
            ]
        );

        assert_eq!(conn.ensure_stats_family("host").unwrap(), "host_stats");
        assert!(conn.has_family("host_stats"));
        // Bootstrap twice is harmless.
        conn.bootstrap().unwrap();
    }

    #[test]
    fn test_family_kind_conflict_is_create_error() {
        let store = Arc::new(MemoryStore::new());
        store
            .create_column_family(&ColumnFamilyDef::super_family("host_stats"))
            .unwrap();
        let conn = StatsConnection::new(store, "test");
        assert!(matches!(
            conn.ensure_stats_family("host"),
            Err(StatsError::CreateColumnFamily { .. })
        ));
    }
}
