// ============================================================================
// STATS INDEX
// ============================================================================
// Two super-column indexes maintained by every stats put:
// - target index:     key `cluster:target_type`, one super column per target
// - stats-type index: key `cluster:target_type:target_id:base_stat_type`,
//                     a `base` super column plus one per parameter
// Both are only ever written in the same batch as the data they describe.
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::constants::{
    BASE_SUPER_COLUMN, CONTROLLER_ATTRIBUTE, LAST_UPDATED_ATTRIBUTE, MAX_RANGE_ROWS,
    MAX_SLICE_COLUMNS, PARAM_SUPER_COLUMN_PREFIX, STATS_TYPE_INDEX_CF, STAT_PARAMETER_SEPARATOR,
    STORAGE_TIMESTAMP_SCALE, TARGET_INDEX_CF,
};
use crate::error::{StatsError, StatsResult};
use crate::storage::{
    Column, KeyRange, MutationBatch, SliceRange, StatsConnection, SuperColumn,
};

/// Decoded attributes of one index super column.
pub type IndexAttributes = BTreeMap<String, JsonValue>;

/// Split `base__parameter` on the first separator.
pub fn split_stat_type(stat_type: &str) -> (&str, Option<&str>) {
    match stat_type.split_once(STAT_PARAMETER_SEPARATOR) {
        Some((base, param)) => (base, Some(param)),
        None => (stat_type, None),
    }
}

fn target_key(cluster: &str, target_type: &str) -> String {
    format!("{}:{}", cluster, target_type)
}

fn stats_type_key(cluster: &str, target_type: &str, target_id: &str, base: &str) -> String {
    format!("{}:{}:{}:{}", cluster, target_type, target_id, base)
}

fn decode_attributes(columns: &[Column]) -> IndexAttributes {
    columns
        .iter()
        .map(|c| {
            let value = if c.name == LAST_UPDATED_ATTRIBUTE {
                c.value
                    .parse::<i64>()
                    .map(JsonValue::from)
                    .unwrap_or_else(|_| JsonValue::from(c.value.clone()))
            } else {
                JsonValue::from(c.value.clone())
            };
            (c.name.clone(), value)
        })
        .collect()
}

// ----------------------------------------------------------------------------
// Index Entries
// ----------------------------------------------------------------------------

/// Index entry of one base stat type of one target.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatTypeIndexEntry {
    #[serde(flatten)]
    pub attributes: IndexAttributes,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, IndexAttributes>,
}

impl StatTypeIndexEntry {
    fn decode(super_columns: &[SuperColumn]) -> StatsResult<Self> {
        let mut entry = Self::default();
        for sc in super_columns {
            if sc.name == BASE_SUPER_COLUMN {
                entry.attributes = decode_attributes(&sc.columns);
            } else if let Some(param) = sc.name.strip_prefix(PARAM_SUPER_COLUMN_PREFIX) {
                entry
                    .parameters
                    .insert(param.to_string(), decode_attributes(&sc.columns));
            } else {
                return Err(StatsError::Internal(format!(
                    "Unexpected super column in stats type index: {}",
                    sc.name
                )));
            }
        }
        Ok(entry)
    }

    pub fn last_updated(&self) -> Option<i64> {
        self.attributes
            .get(LAST_UPDATED_ATTRIBUTE)
            .and_then(JsonValue::as_i64)
    }
}

// ----------------------------------------------------------------------------
// Pending Index Updates
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StatTypeUpdate {
    base: Option<i64>,
    parameters: BTreeMap<String, i64>,
}

/// Newest timestamps seen while building a put batch, folded into index
/// mutations once the whole payload has been read.
#[derive(Debug, Default)]
pub(crate) struct IndexUpdates {
    targets: BTreeMap<(String, String), i64>,
    stat_types: BTreeMap<(String, String, String), StatTypeUpdate>,
}

impl IndexUpdates {
    pub(crate) fn record(&mut self, target_type: &str, target_id: &str, stat_type: &str, timestamp: i64) {
        let latest = self
            .targets
            .entry((target_type.to_string(), target_id.to_string()))
            .or_insert(timestamp);
        *latest = (*latest).max(timestamp);

        let (base, param) = split_stat_type(stat_type);
        let update = self
            .stat_types
            .entry((target_type.to_string(), target_id.to_string(), base.to_string()))
            .or_default();
        let slot = match param {
            Some(p) => update.parameters.entry(p.to_string()).or_insert(timestamp),
            None => update.base.get_or_insert(timestamp),
        };
        *slot = (*slot).max(timestamp);
    }

    pub(crate) fn write_into(self, cluster: &str, controller_id: &str, batch: &mut MutationBatch) {
        for ((target_type, target_id), latest) in self.targets {
            let ts = latest * STORAGE_TIMESTAMP_SCALE;
            batch.insert_super(
                target_key(cluster, &target_type),
                TARGET_INDEX_CF,
                SuperColumn::new(
                    target_id,
                    vec![
                        Column::new(LAST_UPDATED_ATTRIBUTE, latest.to_string(), ts),
                        Column::new(CONTROLLER_ATTRIBUTE, controller_id, ts),
                    ],
                ),
            );
        }

        for ((target_type, target_id, base), update) in self.stat_types {
            let key = stats_type_key(cluster, &target_type, &target_id, &base);
            let last_updated = |latest: i64| {
                vec![Column::new(
                    LAST_UPDATED_ATTRIBUTE,
                    latest.to_string(),
                    latest * STORAGE_TIMESTAMP_SCALE,
                )]
            };
            if let Some(latest) = update.base {
                batch.insert_super(
                    key.clone(),
                    STATS_TYPE_INDEX_CF,
                    SuperColumn::new(BASE_SUPER_COLUMN, last_updated(latest)),
                );
            }
            for (param, latest) in update.parameters {
                batch.insert_super(
                    key.clone(),
                    STATS_TYPE_INDEX_CF,
                    SuperColumn::new(
                        format!("{}{}", PARAM_SUPER_COLUMN_PREFIX, param),
                        last_updated(latest),
                    ),
                );
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Index Reads
// ----------------------------------------------------------------------------

/// Read side of the target and stats-type indexes.
#[derive(Debug, Clone)]
pub struct StatsIndex {
    conn: Arc<StatsConnection>,
}

impl StatsIndex {
    pub fn new(conn: Arc<StatsConnection>) -> Self {
        Self { conn }
    }

    /// Index entry of one base stat type.
    pub fn get_stat_type_entry(
        &self,
        cluster: &str,
        target_type: &str,
        target_id: &str,
        stat_type: &str,
    ) -> StatsResult<StatTypeIndexEntry> {
        let key = stats_type_key(cluster, target_type, target_id, stat_type);
        let super_columns = self.conn.call("get_super_slice", |s| {
            s.get_super_slice(STATS_TYPE_INDEX_CF, &key, &SliceRange::all(MAX_SLICE_COLUMNS))
        })?;
        StatTypeIndexEntry::decode(&super_columns)
    }

    /// Entries of every stat type recorded for a target, keyed by base type.
    pub fn get_stats_type_index(
        &self,
        cluster: &str,
        target_type: &str,
        target_id: &str,
    ) -> StatsResult<BTreeMap<String, StatTypeIndexEntry>> {
        let prefix = format!("{}:{}:{}", cluster, target_type, target_id);
        let keys = KeyRange::new(format!("{}:", prefix), format!("{};", prefix), MAX_RANGE_ROWS);
        let rows = self.conn.call("get_range_slices", |s| {
            s.get_range_super_slices(STATS_TYPE_INDEX_CF, &keys, &SliceRange::all(MAX_SLICE_COLUMNS))
        })?;

        // Target ids contain ':' themselves, so the scan also returns rows of
        // longer ids that start with this one (`00:01` vs `00:01:02`).
        let row_prefix = format!("{}:", prefix);
        let mut index = BTreeMap::new();
        for row in rows {
            let Some(stat_type) = row
                .key
                .strip_prefix(&row_prefix)
                .filter(|rest| !rest.contains(':'))
            else {
                continue;
            };
            index.insert(stat_type.to_string(), StatTypeIndexEntry::decode(&row.columns)?);
        }
        debug!(
            target: "sdnstats::index",
            cluster,
            target_type,
            target_id,
            stat_types = index.len(),
            "Read stats type index"
        );
        Ok(index)
    }

    /// Target types with at least one indexed target.
    pub fn get_stats_target_types(&self, cluster: &str) -> StatsResult<BTreeMap<String, IndexAttributes>> {
        let keys = KeyRange::new(format!("{}:", cluster), format!("{};", cluster), MAX_RANGE_ROWS);
        let rows = self.conn.call("get_range_slices", |s| {
            s.get_range_super_slices(TARGET_INDEX_CF, &keys, &SliceRange::all(MAX_SLICE_COLUMNS))
        })?;

        let prefix_len = cluster.len() + 1;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.key.get(prefix_len..).map(str::to_string))
            .map(|target_type| (target_type, IndexAttributes::new()))
            .collect())
    }

    /// Targets of one type with their `last-updated` time and controller.
    pub fn get_stats_targets(
        &self,
        cluster: &str,
        target_type: &str,
    ) -> StatsResult<BTreeMap<String, IndexAttributes>> {
        let key = target_key(cluster, target_type);
        let super_columns = self.conn.call("get_super_slice", |s| {
            s.get_super_slice(TARGET_INDEX_CF, &key, &SliceRange::all(MAX_SLICE_COLUMNS))
        })?;
        Ok(super_columns
            .into_iter()
            .map(|sc| {
                let attributes = decode_attributes(&sc.columns);
                (sc.name, attributes)
            })
            .collect())
    }
}
