// ============================================================================
// EVENTS STORE
// ============================================================================
// Structured log events in the `events` super column family:
// - row key       `cluster|node_id|bucket`
// - super column  `<padded offset>:<pk-tag>`, one sub-column per field
// The pk-tag keeps events at the same millisecond apart; one is drawn at
// random when the producer does not supply it.
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::bucket::TimeBucketer;
use crate::constants::{
    EVENTS_CF, MAX_GENERATED_PK_TAG, PK_TAG_FIELD, STORAGE_TIMESTAMP_SCALE, TIMESTAMP_FIELD,
};
use crate::error::{StatsError, StatsResult};
use crate::stats::{bucket_slices, check_range, is_full_bucket};
use crate::storage::{Column, Mutation, MutationBatch, StatsConnection, SuperColumn};
use crate::types::{json_timestamp, stringify_json};

/// Suffix that widens a column-name bound past every tag at the same offset.
const TAGGED_FINISH_SUFFIX: &str = ";";

/// One decoded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: i64,

    #[serde(rename = "pk-tag", default, skip_serializing_if = "Option::is_none")]
    pub pk_tag: Option<String>,

    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl EventRecord {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            pk_tag: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Reads and writes the event log.
#[derive(Debug, Clone)]
pub struct EventsStore {
    conn: Arc<StatsConnection>,
    bucketer: TimeBucketer,
}

impl EventsStore {
    pub fn new(conn: Arc<StatsConnection>) -> Self {
        Self {
            conn,
            bucketer: TimeBucketer::events(),
        }
    }

    fn row_key(cluster: &str, node_id: &str, bucket: i64) -> String {
        format!("{}|{}|{}", cluster, node_id, bucket)
    }

    /// Store a put payload of the form `{node_id: [{timestamp, pk-tag?,
    /// field: value, ...}, ...]}` in one batch. Returns the event count.
    pub fn put(&self, cluster: &str, payload: &JsonValue) -> StatsResult<usize> {
        let by_node = payload
            .as_object()
            .ok_or_else(|| StatsError::invalid_data("events data must be an object keyed by node id"))?;

        let mut rng = rand::thread_rng();
        let mut batch = MutationBatch::new();
        let mut count = 0usize;
        for (node_id, events) in by_node {
            let events = events.as_array().ok_or_else(|| {
                StatsError::invalid_data(format!("events of node '{}' must be a list", node_id))
            })?;
            for event in events {
                let event = event.as_object().ok_or_else(|| {
                    StatsError::invalid_data(format!("event of node '{}' must be an object", node_id))
                })?;
                let timestamp = event
                    .get(TIMESTAMP_FIELD)
                    .and_then(json_timestamp)
                    .ok_or_else(|| {
                        StatsError::invalid_data(format!(
                            "missing or invalid timestamp in event of node '{}'",
                            node_id
                        ))
                    })?;
                let pk_tag = match event.get(PK_TAG_FIELD).map(stringify_json) {
                    Some(tag) if !tag.is_empty() => tag,
                    _ => rng.gen_range(0..=MAX_GENERATED_PK_TAG).to_string(),
                };

                let storage_ts = timestamp * STORAGE_TIMESTAMP_SCALE;
                let columns = event
                    .iter()
                    .filter(|(name, _)| name.as_str() != TIMESTAMP_FIELD && name.as_str() != PK_TAG_FIELD)
                    .map(|(name, value)| Column::new(name.clone(), stringify_json(value), storage_ts))
                    .collect();

                let (bucket, offset) = self.bucketer.split(timestamp);
                batch.insert_super(
                    Self::row_key(cluster, node_id, bucket),
                    EVENTS_CF,
                    SuperColumn::new(format!("{}:{}", self.bucketer.pad(offset), pk_tag), columns),
                );
                count += 1;
            }
        }

        if !batch.is_empty() {
            self.conn.call("batch_mutate", |s| s.batch_mutate(&batch))?;
        }
        debug!(target: "sdnstats::events", cluster, events = count, "Stored events");
        Ok(count)
    }

    /// Events of a node in `[start, end]`, oldest first.
    pub fn get(
        &self,
        cluster: &str,
        node_id: &str,
        start: i64,
        end: i64,
        include_pk_tag: bool,
    ) -> StatsResult<Vec<EventRecord>> {
        check_range(start, end)?;

        let mut events = Vec::new();
        for (bucket, range) in bucket_slices(&self.bucketer, start, end, TAGGED_FINISH_SUFFIX) {
            let key = Self::row_key(cluster, node_id, bucket);
            let super_columns = self
                .conn
                .call("get_super_slice", |s| s.get_super_slice(EVENTS_CF, &key, &range))?;

            for sc in super_columns {
                let Some((offset, tag)) = self.bucketer.parse_column(&sc.name) else {
                    continue;
                };
                let mut record = EventRecord::new(self.bucketer.join(bucket, offset));
                if include_pk_tag {
                    record.pk_tag = tag.map(str::to_string);
                }
                record.fields = sc.columns.into_iter().map(|c| (c.name, c.value)).collect();
                events.push(record);
            }
        }
        debug!(
            target: "sdnstats::events",
            cluster,
            node_id,
            events = events.len(),
            "Read events"
        );
        Ok(events)
    }

    /// Remove every event of a node in `[start, end]`.
    pub fn delete(&self, cluster: &str, node_id: &str, start: i64, end: i64) -> StatsResult<()> {
        check_range(start, end)?;

        let deletion_ts = end * STORAGE_TIMESTAMP_SCALE + 1;
        let mut batch = MutationBatch::new();
        for (bucket, range) in bucket_slices(&self.bucketer, start, end, TAGGED_FINISH_SUFFIX) {
            let key = Self::row_key(cluster, node_id, bucket);
            if is_full_bucket(&range) {
                self.conn
                    .call("remove", |s| s.remove(EVENTS_CF, &key, deletion_ts))?;
                continue;
            }
            let names: Vec<String> = self
                .conn
                .call("get_super_slice", |s| s.get_super_slice(EVENTS_CF, &key, &range))?
                .into_iter()
                .map(|sc| sc.name)
                .collect();
            if !names.is_empty() {
                batch.push(key, EVENTS_CF, Mutation::Delete { names, timestamp: deletion_ts });
            }
        }

        if !batch.is_empty() {
            self.conn.call("batch_mutate", |s| s.batch_mutate(&batch))?;
        }
        debug!(target: "sdnstats::events", cluster, node_id, start, end, "Deleted events");
        Ok(())
    }
}
