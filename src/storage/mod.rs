// ============================================================================
// COLUMN STORE ABSTRACTION
// ============================================================================
// The engine talks to its storage through a column-family model:
// - standard families: row key -> ordered columns
// - super families: row key -> ordered super columns -> ordered columns
// - last-write-wins cells versioned by a caller-supplied timestamp
// - atomic multi-key batch mutation
//
// Backends:
// - MemoryStore: in-process BTreeMaps behind a RwLock
// - WalStore: MemoryStore made durable with a write-ahead log and snapshots
// ============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

pub mod connection;
pub mod memory;
pub mod wal;

pub use connection::StatsConnection;
pub use memory::MemoryStore;
pub use wal::{WalStore, WalSyncMode};

// ----------------------------------------------------------------------------
// Schema
// ----------------------------------------------------------------------------

/// Layout of a column family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FamilyKind {
    Standard,
    Super,
}

impl FamilyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FamilyKind::Standard => "standard",
            FamilyKind::Super => "super",
        }
    }
}

/// Definition of a column family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFamilyDef {
    pub name: String,
    pub kind: FamilyKind,
}

impl ColumnFamilyDef {
    pub fn standard(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FamilyKind::Standard,
        }
    }

    pub fn super_family(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FamilyKind::Super,
        }
    }
}

// ----------------------------------------------------------------------------
// Columns
// ----------------------------------------------------------------------------

/// A named, timestamped value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub value: String,
    /// Version used for last-write-wins resolution (microseconds)
    pub timestamp: i64,
}

impl Column {
    pub fn new(name: impl Into<String>, value: impl Into<String>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            timestamp,
        }
    }
}

/// A named group of columns inside a super family row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperColumn {
    pub name: String,
    pub columns: Vec<Column>,
}

impl SuperColumn {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }
}

/// One row returned by a key-range scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySlice<T> {
    pub key: String,
    pub columns: Vec<T>,
}

// ----------------------------------------------------------------------------
// Predicates
// ----------------------------------------------------------------------------

/// Inclusive column-name range. An empty bound is unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceRange {
    pub start: String,
    pub finish: String,
    pub count: usize,
}

impl SliceRange {
    pub fn new(start: impl Into<String>, finish: impl Into<String>, count: usize) -> Self {
        Self {
            start: start.into(),
            finish: finish.into(),
            count,
        }
    }

    /// Every column of the row, up to `count`.
    pub fn all(count: usize) -> Self {
        Self::new("", "", count)
    }

    pub(crate) fn check(&self) -> StorageResult<()> {
        if !self.start.is_empty() && !self.finish.is_empty() && self.start > self.finish {
            return Err(StorageError::invalid_request(format!(
                "slice start '{}' is after finish '{}'",
                self.start, self.finish
            )));
        }
        Ok(())
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        (self.start.is_empty() || name >= self.start.as_str())
            && (self.finish.is_empty() || name <= self.finish.as_str())
    }
}

/// Inclusive row-key range. An empty bound is unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start_key: String,
    pub end_key: String,
    pub count: usize,
}

impl KeyRange {
    pub fn new(start_key: impl Into<String>, end_key: impl Into<String>, count: usize) -> Self {
        Self {
            start_key: start_key.into(),
            end_key: end_key.into(),
            count,
        }
    }

    pub(crate) fn check(&self) -> StorageResult<()> {
        if !self.start_key.is_empty() && !self.end_key.is_empty() && self.start_key > self.end_key
        {
            return Err(StorageError::invalid_request(format!(
                "key range start '{}' is after end '{}'",
                self.start_key, self.end_key
            )));
        }
        Ok(())
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        (self.start_key.is_empty() || key >= self.start_key.as_str())
            && (self.end_key.is_empty() || key <= self.end_key.as_str())
    }
}

// ----------------------------------------------------------------------------
// Mutations
// ----------------------------------------------------------------------------

/// A single change to one row of one column family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Upsert a column of a standard family
    Insert(Column),
    /// Upsert the sub-columns of a super column
    InsertSuper(SuperColumn),
    /// Tombstone named columns (or super columns) at `timestamp`
    Delete { names: Vec<String>, timestamp: i64 },
}

/// Mutations grouped by row key, then by column family.
///
/// Applied atomically by [`ColumnStore::batch_mutate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationBatch {
    rows: BTreeMap<String, BTreeMap<String, Vec<Mutation>>>,
}

impl MutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a mutation for `key` in `family`.
    pub fn push(&mut self, key: impl Into<String>, family: impl Into<String>, mutation: Mutation) {
        self.rows
            .entry(key.into())
            .or_default()
            .entry(family.into())
            .or_default()
            .push(mutation);
    }

    pub fn insert(&mut self, key: impl Into<String>, family: impl Into<String>, column: Column) {
        self.push(key, family, Mutation::Insert(column));
    }

    pub fn insert_super(
        &mut self,
        key: impl Into<String>,
        family: impl Into<String>,
        super_column: SuperColumn,
    ) {
        self.push(key, family, Mutation::InsertSuper(super_column));
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Total number of queued mutations.
    pub fn len(&self) -> usize {
        self.rows
            .values()
            .flat_map(|families| families.values())
            .map(Vec::len)
            .sum()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, Vec<Mutation>>)> {
        self.rows.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Distinct column families the batch touches.
    pub fn families(&self) -> impl Iterator<Item = &str> {
        let mut names: Vec<&str> = self
            .rows
            .values()
            .flat_map(|families| families.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names.into_iter()
    }
}

// ----------------------------------------------------------------------------
// The Store Trait
// ----------------------------------------------------------------------------

/// A column-family store.
///
/// Implementations must be internally synchronized: every method takes
/// `&self` and may be called from many threads at once.
pub trait ColumnStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Create a family. Idempotent for an existing family of the same kind.
    fn create_column_family(&self, def: &ColumnFamilyDef) -> StorageResult<()>;

    /// Names of every existing family.
    fn column_families(&self) -> StorageResult<Vec<String>>;

    /// Ordered live columns of a standard row.
    fn get_slice(&self, family: &str, key: &str, range: &SliceRange) -> StorageResult<Vec<Column>>;

    /// Ordered live super columns of a super row.
    fn get_super_slice(
        &self,
        family: &str,
        key: &str,
        range: &SliceRange,
    ) -> StorageResult<Vec<SuperColumn>>;

    /// Super rows whose key falls in `keys`, each sliced by `range`. Rows
    /// with no live data are skipped.
    fn get_range_super_slices(
        &self,
        family: &str,
        keys: &KeyRange,
        range: &SliceRange,
    ) -> StorageResult<Vec<KeySlice<SuperColumn>>>;

    /// Apply every mutation of the batch atomically.
    fn batch_mutate(&self, batch: &MutationBatch) -> StorageResult<()>;

    /// Tombstone a whole row at `timestamp`.
    fn remove(&self, family: &str, key: &str, timestamp: i64) -> StorageResult<()>;

    /// Drop every row of a family.
    fn truncate(&self, family: &str) -> StorageResult<()>;

    /// Re-establish the underlying transport after a failure.
    fn reconnect(&self) -> StorageResult<()>;

    /// Make every accepted write durable.
    fn sync(&self) -> StorageResult<()>;

    /// Purge tombstones written before `horizon` (a storage timestamp)
    /// together with rows and super columns left empty. Returns the number
    /// of entries dropped.
    fn compact(&self, horizon: i64) -> StorageResult<usize>;
}
