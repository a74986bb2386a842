//! The filler against a live server on an ephemeral port.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use common::memory_context;
use sdnstats::filler::{FillerConfig, StatKind, StatsFiller};
use sdnstats::server::StatsServer;
use sdnstats::{EngineConfig, SeriesId, StatValue, StatsQuery};

#[tokio::test]
async fn test_fill_running_server() {
    let ctx = memory_context();
    let server = Arc::new(StatsServer::with_context(EngineConfig::default(), ctx.clone()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = {
        let server = server.clone();
        tokio::spawn(async move { server.run_on(listener).await })
    };

    let end_secs = 1_297_278_987;
    let mut filler = StatsFiller::new(FillerConfig {
        url: format!("http://{}/rest/v1", addr),
        controller_id: "c1".into(),
        period: Duration::from_secs(60),
        switches: 2,
        stats: vec![StatKind::Cpu, StatKind::Of, StatKind::Log],
        seed: Some(42),
        ..Default::default()
    })
    .unwrap();
    let summary = filler.fill_until(end_secs).await.unwrap();
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.samples, 12);
    assert_eq!(summary.failed_requests, 0);

    let start_ms = (end_secs - 60) * 1000;
    let end_ms = end_secs * 1000;
    let stats = ctx.stats().unwrap();
    let idle = stats
        .get(&SeriesId::new("default", "controller", "c1", "cpu-idle"), &StatsQuery::range(start_ms, end_ms))
        .unwrap();
    assert_eq!(idle.len(), 12);
    assert_eq!(idle[0].timestamp(), start_ms);

    let packet_in = stats
        .get(
            &SeriesId::new("default", "switch", "00:00:00:00:00:00:00:02", "OFPacketIn"),
            &StatsQuery::range(start_ms, end_ms),
        )
        .unwrap();
    assert_eq!(packet_in.len(), 12);
    assert!(packet_in
        .iter()
        .all(|p| matches!(p.value(), StatValue::Int(v) if (1..=100).contains(v))));

    let targets = ctx.index().unwrap().get_stats_targets("default", "switch").unwrap();
    assert_eq!(targets.len(), 2);

    let events = ctx.events().unwrap().get("default", "c1", start_ms, end_ms, false).unwrap();
    assert_eq!(events.len(), 24);

    server.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_fill_reports_unreachable_server() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut filler = StatsFiller::new(FillerConfig {
        url: format!("http://{}/rest/v1", addr),
        period: Duration::from_secs(10),
        seed: Some(1),
        ..Default::default()
    })
    .unwrap();
    assert!(filler.fill().await.is_err());
}
