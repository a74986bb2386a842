// ============================================================================
// STATS STORE
// ============================================================================
// Bucketed time series, one standard column family per target type:
// - row key  `cluster|target_id|stat_type|bucket`
// - column   zero-padded offset within the bucket, value as string
// - storage timestamp `ts * 1000`, last write wins
// Puts fold data points and both index updates into a single batch.
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::bucket::TimeBucketer;
use crate::constants::{
    CONTROLLER_TARGET_TYPE, LATEST_LOOKBACK_MS, LOCALHOST_ID, MAX_RANGE_DAYS, MAX_SLICE_COLUMNS,
    ONE_DAY_MS, PUT_TARGET_TYPE_SUFFIX, REVERSE_SCAN_CHUNK_MS, STORAGE_TIMESTAMP_SCALE,
};
use crate::error::{StatsError, StatsResult};
use crate::index::IndexUpdates;
use crate::logging::PerfTimer;
use crate::sampling::{average, average_over_window, downsample_index, rate, rate_over_window};
use crate::storage::connection::stats_family;
use crate::storage::{Column, Mutation, MutationBatch, SliceRange, StatsConnection};
use crate::types::{
    json_timestamp, now_millis, stringify_json, timestamp_in_range, DataFormat, RawSample,
    StatPoint, StatValue,
};

// ----------------------------------------------------------------------------
// Series Identity & Queries
// ----------------------------------------------------------------------------

/// One time series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesId {
    pub cluster: String,
    pub target_type: String,
    pub target_id: String,
    pub stat_type: String,
}

impl SeriesId {
    pub fn new(
        cluster: impl Into<String>,
        target_type: impl Into<String>,
        target_id: impl Into<String>,
        stat_type: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            target_type: target_type.into(),
            target_id: target_id.into(),
            stat_type: stat_type.into(),
        }
    }

    pub fn family(&self) -> String {
        stats_family(&self.target_type)
    }

    pub fn row_key(&self, bucket: i64) -> String {
        row_key(&self.cluster, &self.target_id, &self.stat_type, bucket)
    }
}

fn row_key(cluster: &str, target_id: &str, stat_type: &str, bucket: i64) -> String {
    format!("{}|{}|{}|{}", cluster, target_id, stat_type, bucket)
}

/// A range read.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsQuery {
    pub start: i64,
    pub end: i64,
    /// Downsampling group width in ms; 0 returns every raw point
    pub sample_interval: i64,
    /// Averaging/rate window in ms, centred on each returned point
    pub window: i64,
    pub data_format: DataFormat,
    /// Raw point cap, honoured only without sampling and windowing
    pub limit: Option<usize>,
}

impl StatsQuery {
    pub fn range(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            sample_interval: 0,
            window: 0,
            data_format: DataFormat::Value,
            limit: None,
        }
    }

    pub fn with_sample_interval(mut self, sample_interval: i64) -> Self {
        self.sample_interval = sample_interval;
        self
    }

    pub fn with_window(mut self, window: i64) -> Self {
        self.window = window;
        self
    }

    pub fn with_format(mut self, data_format: DataFormat) -> Self {
        self.data_format = data_format;
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    fn validate(&self) -> StatsResult<()> {
        check_range(self.start, self.end)?;
        if self.sample_interval < 0 {
            return Err(StatsError::InvalidSampling {
                name: "sample interval",
                value: self.sample_interval,
            });
        }
        if self.window < 0 {
            return Err(StatsError::InvalidSampling {
                name: "window",
                value: self.window,
            });
        }
        Ok(())
    }
}

/// A range is valid when ordered, inside the accepted timestamp range and
/// no wider than `MAX_RANGE_DAYS` day buckets.
pub(crate) fn check_range(start: i64, end: i64) -> StatsResult<()> {
    if end < start
        || !timestamp_in_range(start)
        || !timestamp_in_range(end)
        || (end - start) / ONE_DAY_MS > MAX_RANGE_DAYS
    {
        return Err(StatsError::InvalidTimeRange { start, end });
    }
    Ok(())
}

/// Per-bucket column bounds covering `[start, end]`.
///
/// An empty bound means the bucket edge. `finish_suffix` is appended to the
/// last bucket's finish so tagged columns at the end offset are included.
pub(crate) fn bucket_slices(
    bucketer: &TimeBucketer,
    start: i64,
    end: i64,
    finish_suffix: &str,
) -> Vec<(i64, SliceRange)> {
    let (start_bucket, start_offset) = bucketer.split(start);
    let (end_bucket, end_offset) = bucketer.split(end);
    (start_bucket..=end_bucket)
        .map(|bucket| {
            let lo = if bucket == start_bucket {
                bucketer.pad(start_offset)
            } else {
                String::new()
            };
            let hi = if bucket == end_bucket {
                format!("{}{}", bucketer.pad(end_offset), finish_suffix)
            } else {
                String::new()
            };
            (bucket, SliceRange::new(lo, hi, MAX_SLICE_COLUMNS))
        })
        .collect()
}

/// Whether the slice for a bucket spans the whole bucket.
pub(crate) fn is_full_bucket(range: &SliceRange) -> bool {
    range.start.is_empty() && range.finish.is_empty()
}

// ----------------------------------------------------------------------------
// Stats Store
// ----------------------------------------------------------------------------

/// Reads and writes bucketed stats.
#[derive(Debug, Clone)]
pub struct StatsStore {
    conn: Arc<StatsConnection>,
    controller_id: String,
    bucketer: TimeBucketer,
}

struct PendingPoint<'a> {
    target_type: String,
    key: String,
    column: Column,
    stat_type: &'a str,
    target_id: String,
    timestamp: i64,
}

impl StatsStore {
    pub fn new(conn: Arc<StatsConnection>, controller_id: impl Into<String>) -> Self {
        Self {
            conn,
            controller_id: controller_id.into(),
            bucketer: TimeBucketer::stats(),
        }
    }

    pub fn controller_id(&self) -> &str {
        &self.controller_id
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Store every data point of a put payload.
    ///
    /// The payload is `{target_type: {target_id: {stat_type: [{timestamp,
    /// value}, ...]}}}`. Nothing is written unless the whole payload is
    /// well formed. Returns the number of points written.
    pub fn put(&self, cluster: &str, payload: &JsonValue) -> StatsResult<usize> {
        let _timer = PerfTimer::with_threshold("stats_put", 500);

        let points = self.parse_put(cluster, payload)?;

        let mut batch = MutationBatch::new();
        let mut updates = IndexUpdates::default();
        let mut target_types: Vec<&str> = Vec::new();
        for point in &points {
            if !target_types.contains(&point.target_type.as_str()) {
                target_types.push(&point.target_type);
            }
            updates.record(&point.target_type, &point.target_id, point.stat_type, point.timestamp);
        }

        for target_type in &target_types {
            self.conn.ensure_stats_family(target_type)?;
        }
        for point in &points {
            batch.insert(
                point.key.clone(),
                stats_family(&point.target_type),
                point.column.clone(),
            );
        }
        updates.write_into(cluster, &self.controller_id, &mut batch);

        if !batch.is_empty() {
            self.conn.call("batch_mutate", |s| s.batch_mutate(&batch))?;
        }
        debug!(
            target: "sdnstats::stats",
            cluster,
            points = points.len(),
            mutations = batch.len(),
            "Stored stats"
        );
        Ok(points.len())
    }

    fn parse_put<'a>(&self, cluster: &str, payload: &'a JsonValue) -> StatsResult<Vec<PendingPoint<'a>>> {
        let by_target_type = payload
            .as_object()
            .ok_or_else(|| StatsError::invalid_data("stats data must be an object keyed by target type"))?;

        let mut points = Vec::new();
        for (raw_target_type, targets) in by_target_type {
            let target_type = raw_target_type
                .strip_suffix(PUT_TARGET_TYPE_SUFFIX)
                .unwrap_or(raw_target_type);
            let targets = targets.as_object().ok_or_else(|| {
                StatsError::invalid_data(format!("targets of '{}' must be an object", raw_target_type))
            })?;

            for (raw_target_id, stats) in targets {
                let target_id = if target_type == CONTROLLER_TARGET_TYPE && raw_target_id == LOCALHOST_ID {
                    self.controller_id.as_str()
                } else {
                    raw_target_id.as_str()
                };
                let stats = stats.as_object().ok_or_else(|| {
                    StatsError::invalid_data(format!("stats of target '{}' must be an object", raw_target_id))
                })?;

                for (stat_type, samples) in stats {
                    let samples = samples.as_array().ok_or_else(|| {
                        StatsError::invalid_data(format!("values of '{}' must be a list", stat_type))
                    })?;
                    for sample in samples {
                        let (timestamp, value) = parse_sample(stat_type, sample)?;
                        let (bucket, offset) = self.bucketer.split(timestamp);
                        points.push(PendingPoint {
                            target_type: target_type.to_string(),
                            key: row_key(cluster, target_id, stat_type, bucket),
                            column: Column::new(
                                self.bucketer.pad(offset),
                                value,
                                timestamp * STORAGE_TIMESTAMP_SCALE,
                            ),
                            stat_type,
                            target_id: target_id.to_string(),
                            timestamp,
                        });
                    }
                }
            }
        }
        Ok(points)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    fn read_raw(&self, series: &SeriesId, start: i64, end: i64, limit: Option<usize>) -> StatsResult<Vec<RawSample>> {
        let family = series.family();
        let mut raw = Vec::new();
        if !self.conn.has_family(&family) {
            return Ok(raw);
        }

        for (bucket, range) in bucket_slices(&self.bucketer, start, end, "") {
            let key = series.row_key(bucket);
            let columns = self
                .conn
                .call("get_slice", |s| s.get_slice(&family, &key, &range))?;
            raw.extend(columns.into_iter().filter_map(|c| {
                let (offset, _) = self.bucketer.parse_column(&c.name)?;
                Some((self.bucketer.join(bucket, offset), c.value))
            }));
            if let Some(limit) = limit {
                if raw.len() > limit {
                    raw.truncate(limit);
                    break;
                }
            }
        }
        Ok(raw)
    }

    /// Points of a series in `[start, end]`, downsampled and aggregated as
    /// the query asks.
    pub fn get(&self, series: &SeriesId, query: &StatsQuery) -> StatsResult<Vec<StatPoint>> {
        query.validate()?;
        let _timer = PerfTimer::with_threshold("stats_get", 1000);

        let limit = if query.sample_interval == 0 && query.window == 0 {
            query.limit
        } else {
            None
        };
        let raw: Vec<StatPoint> = self
            .read_raw(series, query.start, query.end, limit)?
            .into_iter()
            .map(|(ts, value)| StatPoint(ts, StatValue::parse(&value)))
            .collect();

        let mut result = Vec::new();
        let mut last_group = None;
        for (i, point) in raw.iter().enumerate() {
            if query.sample_interval != 0 {
                let group = downsample_index(point.timestamp(), query.sample_interval);
                if last_group == Some(group) {
                    continue;
                }
                last_group = Some(group);
            }

            let value = match query.data_format {
                DataFormat::Value if query.sample_interval == 0 => Some(point.value().clone()),
                DataFormat::Value => average_over_window(&raw, i, query.window)?,
                DataFormat::Rate => rate_over_window(&raw, i, query.window)?.map(StatValue::Float),
            };
            if let Some(value) = value {
                result.push(StatPoint(point.timestamp(), value));
            }
        }

        debug!(
            target: "sdnstats::stats",
            series = ?series,
            raw = raw.len(),
            returned = result.len(),
            "Read stats"
        );
        Ok(result)
    }

    /// Most recent point of a series within the last day.
    pub fn get_latest(
        &self,
        series: &SeriesId,
        window: i64,
        data_format: DataFormat,
    ) -> StatsResult<Option<StatPoint>> {
        self.get_latest_at(series, window, data_format, now_millis())
    }

    /// [`get_latest`](Self::get_latest) evaluated as if the clock read `now`.
    pub fn get_latest_at(
        &self,
        series: &SeriesId,
        window: i64,
        data_format: DataFormat,
        now: i64,
    ) -> StatsResult<Option<StatPoint>> {
        if window < 0 {
            return Err(StatsError::InvalidSampling { name: "window", value: window });
        }
        if !timestamp_in_range(now) {
            return Err(StatsError::InvalidTimeRange { start: now, end: now });
        }
        let family = series.family();
        if !self.conn.has_family(&family) {
            return Ok(None);
        }

        let min_points = match data_format {
            DataFormat::Value => 1,
            DataFormat::Rate => 2,
        };
        let (now_bucket, now_offset) = self.bucketer.split(now);
        let (end_bucket, end_offset) = self.bucketer.split(now - LATEST_LOOKBACK_MS);

        let mut points: VecDeque<StatPoint> = VecDeque::new();
        let mut latest: Option<i64> = None;

        'buckets: for bucket in (end_bucket..=now_bucket).rev() {
            let key = series.row_key(bucket);
            let floor = if bucket == end_bucket { end_offset } else { 0 };
            let mut hi = if bucket == now_bucket {
                now_offset
            } else {
                self.bucketer.period() - 1
            };

            while hi >= floor {
                let lo = (hi - REVERSE_SCAN_CHUNK_MS + 1).max(floor);
                let range = SliceRange::new(self.bucketer.pad(lo), self.bucketer.pad(hi), MAX_SLICE_COLUMNS);
                let columns = self
                    .conn
                    .call("get_slice", |s| s.get_slice(&family, &key, &range))?;

                for column in columns.into_iter().rev() {
                    let Some((offset, _)) = self.bucketer.parse_column(&column.name) else {
                        continue;
                    };
                    let ts = self.bucketer.join(bucket, offset);
                    if let Some(latest) = latest {
                        if points.len() >= min_points && (window == 0 || latest - ts > window / 2) {
                            break 'buckets;
                        }
                    }
                    latest.get_or_insert(ts);
                    points.push_front(StatPoint(ts, StatValue::parse(&column.value)));
                }

                if lo == floor {
                    break;
                }
                hi = lo - 1;
            }
        }

        let Some(latest) = latest else {
            return Ok(None);
        };
        let points = Vec::from(points);
        let value = match data_format {
            DataFormat::Value => average(&points)?,
            DataFormat::Rate => rate(&points)?.map(StatValue::Float),
        };
        Ok(value.map(|v| StatPoint(latest, v)))
    }

    // ------------------------------------------------------------------------
    // Deletes
    // ------------------------------------------------------------------------

    /// Remove every point of a series in `[start, end]`.
    pub fn delete(&self, series: &SeriesId, start: i64, end: i64) -> StatsResult<()> {
        check_range(start, end)?;
        let family = series.family();
        if !self.conn.has_family(&family) {
            return Ok(());
        }

        let deletion_ts = end * STORAGE_TIMESTAMP_SCALE + 1;
        let mut batch = MutationBatch::new();
        let mut rows_removed = 0usize;
        for (bucket, range) in bucket_slices(&self.bucketer, start, end, "") {
            let key = series.row_key(bucket);
            if is_full_bucket(&range) {
                self.conn
                    .call("remove", |s| s.remove(&family, &key, deletion_ts))?;
                rows_removed += 1;
                continue;
            }
            let names: Vec<String> = self
                .conn
                .call("get_slice", |s| s.get_slice(&family, &key, &range))?
                .into_iter()
                .map(|c| c.name)
                .collect();
            if !names.is_empty() {
                batch.push(key, family.clone(), Mutation::Delete { names, timestamp: deletion_ts });
            }
        }

        let columns_removed = batch.len();
        if !batch.is_empty() {
            self.conn.call("batch_mutate", |s| s.batch_mutate(&batch))?;
        }
        debug!(
            target: "sdnstats::stats",
            series = ?series,
            start,
            end,
            rows_removed,
            columns_removed,
            "Deleted stats"
        );
        Ok(())
    }
}

fn parse_sample(stat_type: &str, sample: &JsonValue) -> StatsResult<(i64, String)> {
    let sample = sample
        .as_object()
        .ok_or_else(|| StatsError::invalid_data(format!("value of '{}' must be an object", stat_type)))?;
    let timestamp = sample
        .get("timestamp")
        .and_then(json_timestamp)
        .ok_or_else(|| StatsError::invalid_data(format!("missing or invalid timestamp for '{}'", stat_type)))?;
    let value = sample
        .get("value")
        .ok_or_else(|| StatsError::invalid_data(format!("missing value for '{}'", stat_type)))?;
    Ok((timestamp, stringify_json(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{MAX_TIMESTAMP_MS, MIN_TIMESTAMP_MS, ONE_HOUR_MS, ONE_MINUTE_MS};
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn store() -> StatsStore {
        let conn = Arc::new(StatsConnection::new(Arc::new(MemoryStore::new()), "test"));
        conn.bootstrap().unwrap();
        StatsStore::new(conn, "c1")
    }

    fn series(stat_type: &str) -> SeriesId {
        SeriesId::new("default", "switch", "00:01", stat_type)
    }

    fn put_series(store: &StatsStore, stat_type: &str, samples: &[(i64, JsonValue)]) {
        let values: Vec<JsonValue> = samples
            .iter()
            .map(|(ts, v)| json!({"timestamp": ts, "value": v}))
            .collect();
        store
            .put("default", &json!({"switch-stats": {"00:01": {stat_type: values}}}))
            .unwrap();
    }

    #[test]
    fn test_bucket_slices_span_boundaries() {
        let b = TimeBucketer::stats();
        let slices = bucket_slices(&b, ONE_DAY_MS - 10, 3 * ONE_DAY_MS + 5, "");
        assert_eq!(slices.len(), 4);
        assert_eq!(slices[0].1.start, "86399990");
        assert!(slices[0].1.finish.is_empty());
        assert!(is_full_bucket(&slices[1].1));
        assert_eq!(slices[3].1.finish, "00000005");

        let tagged = bucket_slices(&b, 0, 5, ";");
        assert_eq!(tagged[0].1.finish, "00000005;");
    }

    #[test]
    fn test_put_and_get_across_buckets() {
        let store = store();
        let samples = [
            (ONE_DAY_MS - 1, json!(1)),
            (ONE_DAY_MS, json!(2.5)),
            (2 * ONE_DAY_MS + 7, json!("up")),
        ];
        put_series(&store, "mixed", &samples);

        let points = store
            .get(&series("mixed"), &StatsQuery::range(0, 3 * ONE_DAY_MS))
            .unwrap();
        assert_eq!(
            points,
            vec![
                StatPoint(ONE_DAY_MS - 1, StatValue::Int(1)),
                StatPoint(ONE_DAY_MS, StatValue::Float(2.5)),
                StatPoint(2 * ONE_DAY_MS + 7, StatValue::Text("up".into())),
            ]
        );
    }

    #[test]
    fn test_rewrite_same_timestamp_overwrites() {
        let store = store();
        put_series(&store, "flow-count", &[(1000, json!(5))]);
        put_series(&store, "flow-count", &[(1000, json!(6))]);
        let points = store
            .get(&series("flow-count"), &StatsQuery::range(0, 2000))
            .unwrap();
        assert_eq!(points, vec![StatPoint(1000, StatValue::Int(6))]);
    }

    #[test]
    fn test_bad_payload_writes_nothing() {
        let store = store();
        let payload = json!({
            "switch-stats": {"00:01": {
                "flow-count": [{"timestamp": 1, "value": 1}],
                "packet-count": [{"value": 2}]
            }}
        });
        assert!(matches!(
            store.put("default", &payload),
            Err(StatsError::InvalidStatsData { .. })
        ));
        assert!(store
            .get(&series("flow-count"), &StatsQuery::range(0, 10))
            .unwrap()
            .is_empty());

        assert!(store.put("default", &json!([1, 2])).is_err());
        assert!(store
            .put("default", &json!({"switch": {"00:01": {"x": {"timestamp": 1}}}}))
            .is_err());
    }

    #[test]
    fn test_invalid_queries() {
        let store = store();
        let s = series("flow-count");
        assert!(matches!(
            store.get(&s, &StatsQuery::range(10, 5)),
            Err(StatsError::InvalidTimeRange { start: 10, end: 5 })
        ));
        assert!(matches!(
            store.get(&s, &StatsQuery::range(0, 5).with_sample_interval(-1)),
            Err(StatsError::InvalidSampling { .. })
        ));
        assert!(matches!(
            store.delete(&s, 10, 5),
            Err(StatsError::InvalidTimeRange { .. })
        ));
    }

    #[test]
    fn test_unknown_target_type_reads_empty() {
        let store = store();
        let s = SeriesId::new("default", "host", "h1", "cpu");
        assert!(store.get(&s, &StatsQuery::range(0, 10)).unwrap().is_empty());
        assert_eq!(store.get_latest_at(&s, 0, DataFormat::Value, 10).unwrap(), None);
        store.delete(&s, 0, 10).unwrap();
    }

    #[test]
    fn test_downsampling_keeps_one_point_per_group() {
        let store = store();
        let samples: Vec<(i64, JsonValue)> = (0..30).map(|i| (i * 20_000, json!(i))).collect();
        put_series(&store, "flow-count", &samples);

        let points = store
            .get(
                &series("flow-count"),
                &StatsQuery::range(0, 10 * ONE_MINUTE_MS).with_sample_interval(ONE_MINUTE_MS),
            )
            .unwrap();
        // 30 points over 10 minutes land in 10 one-minute groups.
        assert_eq!(points.len(), 10);
        assert_eq!(points[0], StatPoint(0, StatValue::Int(0)));
        assert_eq!(points[1], StatPoint(60_000, StatValue::Int(3)));
    }

    #[test]
    fn test_windowed_average_and_rate() {
        let store = store();
        put_series(
            &store,
            "packet-count",
            &[(0, json!(0)), (10_000, json!(100)), (20_000, json!(400))],
        );
        let s = series("packet-count");

        let avg = store
            .get(
                &s,
                &StatsQuery::range(0, 20_000)
                    .with_sample_interval(10_000)
                    .with_window(20_000),
            )
            .unwrap();
        assert_eq!(avg[1], StatPoint(10_000, StatValue::Int(166)));

        let rate = store
            .get(&s, &StatsQuery::range(0, 20_000).with_format(DataFormat::Rate))
            .unwrap();
        assert_eq!(
            rate,
            vec![
                StatPoint(0, StatValue::Float(0.01)),
                StatPoint(10_000, StatValue::Float(0.01)),
                StatPoint(20_000, StatValue::Float(0.03)),
            ]
        );
    }

    #[test]
    fn test_limit_applies_after_crossing_bucket() {
        let store = store();
        let samples: Vec<(i64, JsonValue)> = (0..4)
            .flat_map(|day| (0..3).map(move |i| (day * ONE_DAY_MS + i, json!(i))))
            .collect();
        put_series(&store, "flow-count", &samples);
        let s = series("flow-count");

        let limited = store
            .get(&s, &StatsQuery::range(0, 4 * ONE_DAY_MS).with_limit(Some(4)))
            .unwrap();
        assert_eq!(limited.len(), 4);

        let unbounded = store
            .get(&s, &StatsQuery::range(0, 4 * ONE_DAY_MS).with_limit(Some(100)))
            .unwrap();
        assert_eq!(unbounded.len(), 12);

        let sampled = store
            .get(
                &s,
                &StatsQuery::range(0, 4 * ONE_DAY_MS)
                    .with_limit(Some(1))
                    .with_sample_interval(1),
            )
            .unwrap();
        assert_eq!(sampled.len(), 12);
    }

    #[test]
    fn test_latest_respects_lookback_and_chunks() {
        let store = store();
        let now = 10 * ONE_DAY_MS + 5 * ONE_HOUR_MS;
        put_series(
            &store,
            "flow-count",
            &[
                (now - ONE_DAY_MS - 1, json!(1)),
                (now - 3 * ONE_HOUR_MS, json!(2)),
                (now - ONE_HOUR_MS, json!(3)),
                (now + 1, json!(99)),
            ],
        );
        let s = series("flow-count");

        assert_eq!(
            store.get_latest_at(&s, 0, DataFormat::Value, now).unwrap(),
            Some(StatPoint(now - ONE_HOUR_MS, StatValue::Int(3)))
        );
        let rate = store.get_latest_at(&s, 0, DataFormat::Rate, now).unwrap().unwrap();
        assert_eq!(rate.timestamp(), now - ONE_HOUR_MS);
        assert_eq!(rate.value(), &StatValue::Float(1.0 / (2 * ONE_HOUR_MS) as f64));

        // The point just past the lookback never contributes.
        let wide = store
            .get_latest_at(&s, 4 * ONE_DAY_MS, DataFormat::Value, now)
            .unwrap()
            .unwrap();
        assert_eq!(wide.value(), &StatValue::Int(2));

        let later = now + 2 * ONE_DAY_MS;
        assert_eq!(store.get_latest_at(&s, 0, DataFormat::Value, later).unwrap(), None);
    }

    #[test]
    fn test_latest_lookback_edge_is_inclusive() {
        let store = store();
        let now = 10 * ONE_DAY_MS + 5 * ONE_HOUR_MS;
        put_series(
            &store,
            "flow-count",
            &[(now - ONE_DAY_MS - 1, json!(1)), (now - ONE_DAY_MS, json!(7))],
        );
        let s = series("flow-count");

        assert_eq!(
            store.get_latest_at(&s, 0, DataFormat::Value, now).unwrap(),
            Some(StatPoint(now - ONE_DAY_MS, StatValue::Int(7)))
        );
        // Only one point is inside the lookback, so there is no rate.
        assert_eq!(store.get_latest_at(&s, 0, DataFormat::Rate, now).unwrap(), None);
    }

    #[test]
    fn test_latest_counts_chunk_edges_once() {
        let store = store();
        let now = 10 * ONE_DAY_MS + 5 * ONE_HOUR_MS;
        // Points on both sides of the one-hour chunk edges and of the bucket edge.
        put_series(
            &store,
            "flow-count",
            &[
                (10 * ONE_DAY_MS - 1, json!(10)),
                (10 * ONE_DAY_MS, json!(20)),
                (now - 2 * ONE_HOUR_MS, json!(30)),
                (now - 2 * ONE_HOUR_MS + 1, json!(40)),
                (now - ONE_HOUR_MS, json!(50)),
                (now - ONE_HOUR_MS + 1, json!(60)),
            ],
        );
        let avg = store
            .get_latest_at(&series("flow-count"), 4 * ONE_DAY_MS, DataFormat::Value, now)
            .unwrap()
            .unwrap();
        assert_eq!(avg, StatPoint(now - ONE_HOUR_MS + 1, StatValue::Int(35)));
    }

    #[test]
    fn test_out_of_range_timestamps_are_rejected() {
        let store = store();
        let s = series("flow-count");
        let payload = json!({"switch-stats": {"00:01": {"flow-count": [
            {"timestamp": 10_000_000_000_000_000i64, "value": 1}
        ]}}});
        assert!(matches!(
            store.put("default", &payload),
            Err(StatsError::InvalidStatsData { .. })
        ));

        put_series(&store, "flow-count", &[(MAX_TIMESTAMP_MS, json!(3))]);
        assert_eq!(
            store.get(&s, &StatsQuery::range(MAX_TIMESTAMP_MS - 10, MAX_TIMESTAMP_MS)).unwrap(),
            vec![StatPoint(MAX_TIMESTAMP_MS, StatValue::Int(3))]
        );

        assert!(matches!(
            store.get(&s, &StatsQuery::range(0, i64::MAX)),
            Err(StatsError::InvalidTimeRange { .. })
        ));
        assert!(matches!(
            store.delete(&s, i64::MIN, 0),
            Err(StatsError::InvalidTimeRange { .. })
        ));
        assert!(matches!(
            store.get_latest_at(&s, 0, DataFormat::Value, i64::MIN),
            Err(StatsError::InvalidTimeRange { .. })
        ));
    }

    #[test]
    fn test_range_span_is_capped() {
        let store = store();
        let s = series("flow-count");
        let widest = MAX_RANGE_DAYS * ONE_DAY_MS;
        assert!(store.get(&s, &StatsQuery::range(0, widest)).is_ok());
        assert!(matches!(
            store.get(&s, &StatsQuery::range(0, widest + ONE_DAY_MS)),
            Err(StatsError::InvalidTimeRange { .. })
        ));
        assert!(matches!(
            store.delete(&s, MIN_TIMESTAMP_MS, MAX_TIMESTAMP_MS),
            Err(StatsError::InvalidTimeRange { .. })
        ));
    }

    #[test]
    fn test_non_finite_values_survive_reads() {
        let store = store();
        put_series(&store, "queue-depth", &[(0, json!(1)), (1000, json!("inf"))]);
        let s = series("queue-depth");

        let rate = store
            .get(&s, &StatsQuery::range(0, 1000).with_format(DataFormat::Rate))
            .unwrap();
        assert_eq!(
            serde_json::to_value(&rate).unwrap(),
            json!([[0, "Infinity"], [1000, "Infinity"]])
        );
    }

    #[test]
    fn test_delete_partial_and_full_buckets() {
        let store = store();
        let samples: Vec<(i64, JsonValue)> = (0..5).map(|day| (day * ONE_DAY_MS + 100, json!(day))).collect();
        put_series(&store, "flow-count", &samples);
        let s = series("flow-count");

        store.delete(&s, ONE_DAY_MS + 50, 3 * ONE_DAY_MS + 100).unwrap();
        let left: Vec<i64> = store
            .get(&s, &StatsQuery::range(0, 5 * ONE_DAY_MS))
            .unwrap()
            .iter()
            .map(StatPoint::timestamp)
            .collect();
        assert_eq!(left, vec![100, 4 * ONE_DAY_MS + 100]);
    }
}
