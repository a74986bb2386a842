// ============================================================================
// IN-MEMORY COLUMN STORE
// ============================================================================
// Ordered maps all the way down: family -> row key -> (super column ->)
// column name -> versioned cell. Deletes leave tombstones so that a late
// write carrying an older timestamp can not resurrect deleted data.
// ============================================================================

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    Column, ColumnFamilyDef, ColumnStore, FamilyKind, KeyRange, KeySlice, Mutation,
    MutationBatch, SliceRange, SuperColumn,
};
use crate::error::{StorageError, StorageResult};

// ----------------------------------------------------------------------------
// Versioned Cells & Rows
// ----------------------------------------------------------------------------

/// A column version. `value == None` marks a column tombstone.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Cell {
    value: Option<String>,
    timestamp: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Row {
    tombstone: Option<i64>,
    cells: BTreeMap<String, Cell>,
}

impl Row {
    /// Last-write-wins upsert. `floor` is an enclosing tombstone that also
    /// shadows the write.
    fn write(&mut self, name: &str, value: Option<String>, timestamp: i64, floor: Option<i64>) {
        let shadow = self.tombstone.max(floor);
        if value.is_some() && shadow.is_some_and(|t| timestamp <= t) {
            return;
        }
        if let Some(existing) = self.cells.get(name) {
            if existing.timestamp > timestamp {
                return;
            }
            // Ties go to the delete.
            if existing.timestamp == timestamp && existing.value.is_none() && value.is_some() {
                return;
            }
        }
        self.cells.insert(name.to_string(), Cell { value, timestamp });
    }

    fn delete_all(&mut self, timestamp: i64) {
        self.tombstone = Some(self.tombstone.map_or(timestamp, |t| t.max(timestamp)));
        self.cells.retain(|_, cell| cell.timestamp > timestamp);
    }

    fn live(&self) -> impl Iterator<Item = Column> + '_ {
        self.cells.iter().filter_map(|(name, cell)| {
            cell.value
                .as_ref()
                .map(|v| Column::new(name.clone(), v.clone(), cell.timestamp))
        })
    }

    fn slice(&self, range: &SliceRange) -> Vec<Column> {
        self.cells
            .range::<str, _>(bounds(&range.start, &range.finish))
            .filter_map(|(name, cell)| {
                cell.value
                    .as_ref()
                    .map(|v| Column::new(name.clone(), v.clone(), cell.timestamp))
            })
            .take(range.count)
            .collect()
    }

    fn has_live(&self) -> bool {
        self.cells.values().any(|c| c.value.is_some())
    }

    /// Drop column and row tombstones older than `horizon`. Shadowed cells
    /// are already gone, so this only forgets the deletes themselves.
    fn compact(&mut self, horizon: i64) -> usize {
        let before = self.cells.len();
        self.cells
            .retain(|_, cell| cell.value.is_some() || cell.timestamp >= horizon);
        let mut purged = before - self.cells.len();
        if self.tombstone.is_some_and(|t| t < horizon) {
            self.tombstone = None;
            purged += 1;
        }
        purged
    }

    fn is_empty(&self) -> bool {
        self.tombstone.is_none() && self.cells.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SuperRow {
    tombstone: Option<i64>,
    columns: BTreeMap<String, Row>,
}

impl SuperRow {
    fn write(&mut self, super_column: &SuperColumn) {
        let floor = self.tombstone;
        let row = self.columns.entry(super_column.name.clone()).or_default();
        for column in &super_column.columns {
            row.write(&column.name, Some(column.value.clone()), column.timestamp, floor);
        }
    }

    fn delete_column(&mut self, name: &str, timestamp: i64) {
        self.columns
            .entry(name.to_string())
            .or_default()
            .delete_all(timestamp);
    }

    fn delete_all(&mut self, timestamp: i64) {
        self.tombstone = Some(self.tombstone.map_or(timestamp, |t| t.max(timestamp)));
        for row in self.columns.values_mut() {
            row.delete_all(timestamp);
        }
    }

    fn compact(&mut self, horizon: i64) -> usize {
        let mut purged = 0;
        self.columns.retain(|_, row| {
            purged += row.compact(horizon);
            if row.is_empty() {
                purged += 1;
                return false;
            }
            true
        });
        if self.tombstone.is_some_and(|t| t < horizon) {
            self.tombstone = None;
            purged += 1;
        }
        purged
    }

    fn is_empty(&self) -> bool {
        self.tombstone.is_none() && self.columns.is_empty()
    }

    fn slice(&self, range: &SliceRange) -> Vec<SuperColumn> {
        self.columns
            .range::<str, _>(bounds(&range.start, &range.finish))
            .filter(|(_, row)| row.has_live())
            .map(|(name, row)| SuperColumn::new(name.clone(), row.live().collect()))
            .take(range.count)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Family {
    Standard(BTreeMap<String, Row>),
    Super(BTreeMap<String, SuperRow>),
}

impl Family {
    fn new(kind: FamilyKind) -> Self {
        match kind {
            FamilyKind::Standard => Family::Standard(BTreeMap::new()),
            FamilyKind::Super => Family::Super(BTreeMap::new()),
        }
    }

    fn kind(&self) -> FamilyKind {
        match self {
            Family::Standard(_) => FamilyKind::Standard,
            Family::Super(_) => FamilyKind::Super,
        }
    }

    fn clear(&mut self) {
        match self {
            Family::Standard(rows) => rows.clear(),
            Family::Super(rows) => rows.clear(),
        }
    }

    fn compact(&mut self, horizon: i64) -> usize {
        let mut purged = 0;
        match self {
            Family::Standard(rows) => rows.retain(|_, row| {
                purged += row.compact(horizon);
                let keep = !row.is_empty();
                purged += usize::from(!keep);
                keep
            }),
            Family::Super(rows) => rows.retain(|_, row| {
                purged += row.compact(horizon);
                let keep = !row.is_empty();
                purged += usize::from(!keep);
                keep
            }),
        }
        purged
    }
}

fn bounds<'a>(start: &'a str, finish: &'a str) -> (Bound<&'a str>, Bound<&'a str>) {
    let lower = if start.is_empty() {
        Bound::Unbounded
    } else {
        Bound::Included(start)
    };
    let upper = if finish.is_empty() {
        Bound::Unbounded
    } else {
        Bound::Included(finish)
    };
    (lower, upper)
}

fn wrong_kind(name: &str, expected: FamilyKind, actual: FamilyKind) -> StorageError {
    StorageError::WrongFamilyKind {
        name: name.to_string(),
        expected: expected.as_str(),
        actual: actual.as_str(),
    }
}

fn unknown_family(name: &str) -> StorageError {
    StorageError::UnknownColumnFamily {
        name: name.to_string(),
    }
}

// ----------------------------------------------------------------------------
// MemoryStore
// ----------------------------------------------------------------------------

/// Column store held entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    families: RwLock<BTreeMap<String, Family>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that every family of the batch exists and fits its mutations.
    pub(crate) fn validate_batch(&self, batch: &MutationBatch) -> StorageResult<()> {
        let families = self.families.read();
        for (_, by_family) in batch.rows() {
            for (name, mutations) in by_family {
                let family = families.get(name).ok_or_else(|| unknown_family(name))?;
                for mutation in mutations {
                    match (mutation, family.kind()) {
                        (Mutation::Insert(_), FamilyKind::Super) => {
                            return Err(wrong_kind(name, FamilyKind::Standard, FamilyKind::Super))
                        }
                        (Mutation::InsertSuper(_), FamilyKind::Standard) => {
                            return Err(wrong_kind(name, FamilyKind::Super, FamilyKind::Standard))
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn check_family(&self, family: &str) -> StorageResult<()> {
        if self.families.read().contains_key(family) {
            Ok(())
        } else {
            Err(unknown_family(family))
        }
    }

    pub(crate) fn check_create(&self, def: &ColumnFamilyDef) -> StorageResult<()> {
        match self.families.read().get(&def.name) {
            Some(existing) if existing.kind() != def.kind => {
                Err(wrong_kind(&def.name, def.kind, existing.kind()))
            }
            _ => Ok(()),
        }
    }

    /// Serialize the full contents for a snapshot.
    pub(crate) fn export(&self) -> StorageResult<Vec<u8>> {
        let families = self.families.read();
        Ok(bincode::serialize(&*families)?)
    }

    /// Replace the full contents from a snapshot.
    pub(crate) fn import(&self, data: &[u8]) -> StorageResult<()> {
        let restored: BTreeMap<String, Family> = bincode::deserialize(data)?;
        *self.families.write() = restored;
        Ok(())
    }

    pub fn family_names(&self) -> Vec<String> {
        self.families.read().keys().cloned().collect()
    }

    fn apply(families: &mut BTreeMap<String, Family>, batch: &MutationBatch) {
        for (key, by_family) in batch.rows() {
            for (name, mutations) in by_family {
                let Some(family) = families.get_mut(name) else {
                    continue;
                };
                match family {
                    Family::Standard(rows) => {
                        let row = rows.entry(key.to_string()).or_default();
                        for mutation in mutations {
                            match mutation {
                                Mutation::Insert(c) => {
                                    row.write(&c.name, Some(c.value.clone()), c.timestamp, None)
                                }
                                Mutation::Delete { names, timestamp } => {
                                    for n in names {
                                        row.write(n, None, *timestamp, None);
                                    }
                                }
                                Mutation::InsertSuper(_) => {}
                            }
                        }
                    }
                    Family::Super(rows) => {
                        let row = rows.entry(key.to_string()).or_default();
                        for mutation in mutations {
                            match mutation {
                                Mutation::InsertSuper(sc) => row.write(sc),
                                Mutation::Delete { names, timestamp } => {
                                    for n in names {
                                        row.delete_column(n, *timestamp);
                                    }
                                }
                                Mutation::Insert(_) => {}
                            }
                        }
                    }
                }
            }
        }
    }
}

impl ColumnStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create_column_family(&self, def: &ColumnFamilyDef) -> StorageResult<()> {
        let mut families = self.families.write();
        match families.get(&def.name) {
            Some(existing) if existing.kind() == def.kind => Ok(()),
            Some(existing) => Err(wrong_kind(&def.name, def.kind, existing.kind())),
            None => {
                debug!(target: "sdnstats::storage", family = %def.name, kind = def.kind.as_str(), "Created column family");
                families.insert(def.name.clone(), Family::new(def.kind));
                Ok(())
            }
        }
    }

    fn column_families(&self) -> StorageResult<Vec<String>> {
        Ok(self.family_names())
    }

    fn get_slice(&self, family: &str, key: &str, range: &SliceRange) -> StorageResult<Vec<Column>> {
        range.check()?;
        let families = self.families.read();
        match families.get(family) {
            Some(Family::Standard(rows)) => Ok(rows.get(key).map(|r| r.slice(range)).unwrap_or_default()),
            Some(other) => Err(wrong_kind(family, FamilyKind::Standard, other.kind())),
            None => Err(unknown_family(family)),
        }
    }

    fn get_super_slice(
        &self,
        family: &str,
        key: &str,
        range: &SliceRange,
    ) -> StorageResult<Vec<SuperColumn>> {
        range.check()?;
        let families = self.families.read();
        match families.get(family) {
            Some(Family::Super(rows)) => Ok(rows.get(key).map(|r| r.slice(range)).unwrap_or_default()),
            Some(other) => Err(wrong_kind(family, FamilyKind::Super, other.kind())),
            None => Err(unknown_family(family)),
        }
    }

    fn get_range_super_slices(
        &self,
        family: &str,
        keys: &KeyRange,
        range: &SliceRange,
    ) -> StorageResult<Vec<KeySlice<SuperColumn>>> {
        keys.check()?;
        range.check()?;
        let families = self.families.read();
        let rows = match families.get(family) {
            Some(Family::Super(rows)) => rows,
            Some(other) => return Err(wrong_kind(family, FamilyKind::Super, other.kind())),
            None => return Err(unknown_family(family)),
        };
        Ok(rows
            .range::<str, _>(bounds(&keys.start_key, &keys.end_key))
            .filter_map(|(key, row)| {
                let columns = row.slice(range);
                (!columns.is_empty()).then(|| KeySlice {
                    key: key.clone(),
                    columns,
                })
            })
            .take(keys.count)
            .collect())
    }

    fn batch_mutate(&self, batch: &MutationBatch) -> StorageResult<()> {
        self.validate_batch(batch)?;
        let mut families = self.families.write();
        Self::apply(&mut families, batch);
        Ok(())
    }

    fn remove(&self, family: &str, key: &str, timestamp: i64) -> StorageResult<()> {
        let mut families = self.families.write();
        match families.get_mut(family) {
            Some(Family::Standard(rows)) => rows.entry(key.to_string()).or_default().delete_all(timestamp),
            Some(Family::Super(rows)) => rows.entry(key.to_string()).or_default().delete_all(timestamp),
            None => return Err(unknown_family(family)),
        }
        Ok(())
    }

    fn truncate(&self, family: &str) -> StorageResult<()> {
        let mut families = self.families.write();
        families
            .get_mut(family)
            .ok_or_else(|| unknown_family(family))?
            .clear();
        Ok(())
    }

    fn reconnect(&self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }

    fn compact(&self, horizon: i64) -> StorageResult<usize> {
        let mut families = self.families.write();
        let purged: usize = families.values_mut().map(|f| f.compact(horizon)).sum();
        debug!(target: "sdnstats::storage", horizon, purged, "Compacted memory store");
        Ok(purged)
    }
}
