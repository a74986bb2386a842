//! Stats, index and events surviving a reopen of the WAL backend.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::make_timestamp;
use sdnstats::storage::{WalStore, WalSyncMode};
use sdnstats::{DataFormat, SeriesId, StatPoint, StatValue, StatsContext, StatsQuery};

fn open(dir: &std::path::Path, snapshot_every: u64) -> StatsContext {
    let store = WalStore::open(dir)
        .unwrap()
        .with_sync_mode(WalSyncMode::EveryWrite)
        .with_snapshot_every(snapshot_every);
    StatsContext::with_store(Arc::new(store), "c1").unwrap()
}

fn series() -> SeriesId {
    SeriesId::new("default", "switch", "00:00:00:00:00:00:00:01", "OFPacketIn")
}

fn write_fixture(ctx: &StatsContext) {
    let samples: Vec<_> = (0..6)
        .map(|hour| json!({"timestamp": make_timestamp(1, hour), "value": hour * 10}))
        .collect();
    ctx.stats()
        .unwrap()
        .put(
            "default",
            &json!({"switch-stats": {"00:00:00:00:00:00:00:01": {"OFPacketIn": samples}}}),
        )
        .unwrap();
    ctx.events()
        .unwrap()
        .put(
            "default",
            &json!({"c1": [{"timestamp": make_timestamp(1, 2), "pk-tag": "7", "message": "flap"}]}),
        )
        .unwrap();
}

fn full_range() -> StatsQuery {
    StatsQuery::range(make_timestamp(0, 0), make_timestamp(2, 0))
}

#[test]
fn test_reopen_without_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    {
        let ctx = open(dir.path(), 0);
        write_fixture(&ctx);
    }

    let ctx = open(dir.path(), 0);
    let points = ctx.stats().unwrap().get(&series(), &full_range()).unwrap();
    assert_eq!(points.len(), 6);
    assert_eq!(points[3], StatPoint(make_timestamp(1, 3), StatValue::Int(30)));

    let entry = ctx
        .index()
        .unwrap()
        .get_stat_type_entry("default", "switch", "00:00:00:00:00:00:00:01", "OFPacketIn")
        .unwrap();
    assert_eq!(entry.last_updated(), Some(make_timestamp(1, 5)));

    let events = ctx
        .events()
        .unwrap()
        .get("default", "c1", make_timestamp(1, 0), make_timestamp(1, 5), true)
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].pk_tag.as_deref(), Some("7"));
    assert_eq!(events[0].field("message"), Some("flap"));
}

#[test]
fn test_deletes_survive_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    {
        let ctx = open(dir.path(), 2);
        write_fixture(&ctx);
        ctx.stats()
            .unwrap()
            .delete(&series(), make_timestamp(1, 1), make_timestamp(1, 4))
            .unwrap();
    }

    let ctx = open(dir.path(), 2);
    let stats = ctx.stats().unwrap();
    let values: Vec<_> = stats
        .get(&series(), &full_range())
        .unwrap()
        .into_iter()
        .map(|p| p.1)
        .collect();
    assert_eq!(values, vec![StatValue::Int(0), StatValue::Int(50)]);

    let rate = stats
        .get(
            &series(),
            &full_range().with_format(DataFormat::Rate),
        )
        .unwrap();
    let per_ms = 50.0 / (5 * 3_600_000) as f64;
    assert_eq!(
        rate,
        vec![
            StatPoint(make_timestamp(1, 0), StatValue::Float(per_ms)),
            StatPoint(make_timestamp(1, 5), StatValue::Float(per_ms)),
        ]
    );
}

#[test]
fn test_flush_is_persistent() {
    let dir = tempfile::tempdir().unwrap();
    {
        let ctx = open(dir.path(), 0);
        write_fixture(&ctx);
        ctx.flush().unwrap();
    }
    let ctx = open(dir.path(), 0);
    assert!(ctx.stats().unwrap().get(&series(), &full_range()).unwrap().is_empty());
    assert!(ctx.index().unwrap().get_stats_target_types("default").unwrap().is_empty());
}
