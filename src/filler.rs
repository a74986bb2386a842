// ============================================================================
// STATS FILLER
// ============================================================================
// Synthetic load for a running server. Generates controller OS stats,
// per-switch OpenFlow counters and log events over a period ending now,
// and PUTs them to the stats and events endpoints in batches.
// Output is reproducible for a given seed.
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;

use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::Client as HttpClient;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::api::ErrorResponse;
use crate::constants::{CONTROLLER_TARGET_TYPE, LOCALHOST_ID, PUT_TARGET_TYPE_SUFFIX};
use crate::error::{ConfigError, EngineResult};
use crate::types::now_millis;

/// Upper bound of the generated memory and swap sizes.
const MAX_MEMORY_BYTES: i64 = 1_000_000_000;

/// Upper bound of the generated OpenFlow counters.
const MAX_OF_COUNTER: i64 = 100;

const SWITCH_TARGET_TYPE: &str = "switch";

/// Families of generated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum StatKind {
    /// cpu-idle, cpu-nice, cpu-user, cpu-system
    Cpu,
    /// mem-used, mem-free
    Mem,
    /// swap-used
    Swap,
    /// OFPacketIn, OFFlowMod, OFActiveFlow per switch
    Of,
    /// One log event per component
    Log,
}

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FillerConfig {
    /// Server URL including the REST base path
    pub url: String,
    pub cluster: String,
    /// Target id of the controller stats and node id of the events
    pub controller_id: String,
    /// Span of time to fill, ending now
    pub period: Duration,
    /// Seconds between samples
    pub interval_secs: u64,
    /// Samples per PUT
    pub batch: usize,
    pub switches: usize,
    pub stats: Vec<StatKind>,
    /// Component names of the generated log events
    pub components: Vec<String>,
    pub seed: Option<u64>,
}

impl Default for FillerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000/rest/v1".into(),
            cluster: "default".into(),
            controller_id: LOCALHOST_ID.into(),
            period: Duration::from_secs(600),
            interval_secs: 5,
            batch: 5,
            switches: 0,
            stats: vec![StatKind::Cpu, StatKind::Mem, StatKind::Swap],
            components: vec!["sdnplatform".into(), "cassandra".into()],
            seed: None,
        }
    }
}

impl FillerConfig {
    /// Samples per series over the whole period.
    pub fn num_samples(&self) -> u64 {
        if self.interval_secs == 0 {
            return 0;
        }
        self.period.as_secs() / self.interval_secs
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stats.is_empty() {
            return Err(ConfigError::invalid_value("stats", "at least one stat kind is required"));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::invalid_value("interval", "must be at least one second"));
        }
        if self.batch == 0 {
            return Err(ConfigError::invalid_value("batch", "must be greater than 0"));
        }
        if self.stats.contains(&StatKind::Of) && self.switches == 0 {
            return Err(ConfigError::invalid_value(
                "switches",
                "must be nonzero to generate OpenFlow stats",
            ));
        }
        if self.stats.contains(&StatKind::Log) && self.components.is_empty() {
            return Err(ConfigError::invalid_value("components", "log events need at least one component"));
        }
        if self.num_samples() == 0 {
            return Err(ConfigError::invalid_value(
                "period",
                format!(
                    "{} is shorter than the {}s sampling interval",
                    humantime::format_duration(self.period),
                    self.interval_secs
                ),
            ));
        }
        Ok(())
    }
}

/// Colon-separated, zero-padded datapath id of a switch number.
pub fn int_to_dpid(value: u64) -> String {
    value
        .to_be_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

// ----------------------------------------------------------------------------
// Generation
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Sample {
    timestamp: i64,
    value: JsonValue,
}

/// target type -> target id -> stat type -> samples
type StatsPayload = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<Sample>>>>;

/// One generated batch, ready to PUT.
#[derive(Debug, Clone, Default)]
pub struct FillBatch {
    stats: StatsPayload,
    events: BTreeMap<String, Vec<JsonValue>>,
    pub samples: usize,
}

impl FillBatch {
    pub fn stats_payload(&self) -> Option<JsonValue> {
        (!self.stats.is_empty()).then(|| json!(self.stats))
    }

    pub fn events_payload(&self) -> Option<JsonValue> {
        (!self.events.is_empty()).then(|| json!(self.events))
    }

    fn push_stat(&mut self, target_type: &str, target_id: &str, stat_type: &str, sample: Sample) {
        self.stats
            .entry(format!("{}{}", target_type, PUT_TARGET_TYPE_SUFFIX))
            .or_default()
            .entry(target_id.to_string())
            .or_default()
            .entry(stat_type.to_string())
            .or_default()
            .push(sample);
    }
}

/// Totals of a fill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillSummary {
    pub batches: usize,
    pub samples: usize,
    pub failed_requests: usize,
}

pub struct StatsFiller {
    config: FillerConfig,
    rng: StdRng,
    switch_ids: Vec<String>,
    client: HttpClient,
}

impl StatsFiller {
    pub fn new(config: FillerConfig) -> EngineResult<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let switch_ids = (1..=config.switches as u64).map(int_to_dpid).collect();
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .build()?;

        Ok(Self {
            config,
            rng,
            switch_ids,
            client,
        })
    }

    pub fn switch_ids(&self) -> &[String] {
        &self.switch_ids
    }

    /// Two-decimal percentage in `(0, max]`.
    fn percentage(&mut self, max: f64) -> f64 {
        let hundredths = (max * 100.0) as i64;
        if hundredths < 2 {
            return 0.01;
        }
        self.rng.gen_range(1..=hundredths) as f64 / 100.0
    }

    /// Integer in `[1, max]`.
    fn int_up_to(&mut self, max: i64) -> i64 {
        if max <= 1 {
            1
        } else {
            self.rng.gen_range(1..=max)
        }
    }

    /// Generate `count` samples per series starting at `start_secs`.
    pub fn generate_batch(&mut self, start_secs: i64, count: usize) -> FillBatch {
        let mut batch = FillBatch {
            samples: count,
            ..Default::default()
        };
        let controller_id = self.config.controller_id.clone();
        let controller = |batch: &mut FillBatch, stat_type: &str, timestamp: i64, value: JsonValue| {
            batch.push_stat(CONTROLLER_TARGET_TYPE, &controller_id, stat_type, Sample { timestamp, value });
        };

        for i in 0..count as i64 {
            let timestamp = (start_secs + i * self.config.interval_secs as i64) * 1000;

            if self.config.stats.contains(&StatKind::Cpu) {
                let mut remaining = 100.0;
                for stat_type in ["cpu-idle", "cpu-nice", "cpu-user"] {
                    let v = self.percentage(remaining);
                    remaining -= v;
                    controller(&mut batch, stat_type, timestamp, json!(round2(v)));
                }
                controller(&mut batch, "cpu-system", timestamp, json!(round2(remaining.max(0.0))));
            }
            if self.config.stats.contains(&StatKind::Mem) {
                let total = self.int_up_to(MAX_MEMORY_BYTES);
                let used = self.int_up_to(total);
                controller(&mut batch, "mem-used", timestamp, json!(used));
                controller(&mut batch, "mem-free", timestamp, json!(total - used));
            }
            if self.config.stats.contains(&StatKind::Swap) {
                let total = self.int_up_to(MAX_MEMORY_BYTES);
                let used = self.int_up_to(total);
                controller(&mut batch, "swap-used", timestamp, json!(used));
            }
            if self.config.stats.contains(&StatKind::Of) {
                for dpid in self.switch_ids.clone() {
                    for stat_type in ["OFPacketIn", "OFFlowMod", "OFActiveFlow"] {
                        let value = self.int_up_to(MAX_OF_COUNTER);
                        batch.push_stat(
                            SWITCH_TARGET_TYPE,
                            &dpid,
                            stat_type,
                            Sample { timestamp, value: json!(value) },
                        );
                    }
                }
            }
            if self.config.stats.contains(&StatKind::Log) {
                let events = batch.events.entry(controller_id.clone()).or_default();
                for component in &self.config.components {
                    events.push(json!({
                        "timestamp": timestamp,
                        "component": component,
                        "log-level": "Error",
                        "message": "Another log message",
                    }));
                }
            }
        }
        batch
    }

    // ------------------------------------------------------------------------
    // Upload
    // ------------------------------------------------------------------------

    fn stats_url(&self) -> String {
        format!("{}/stats/data/{}", self.config.url.trim_end_matches('/'), self.config.cluster)
    }

    fn events_url(&self) -> String {
        format!("{}/events/data/{}", self.config.url.trim_end_matches('/'), self.config.cluster)
    }

    /// PUT a payload; false when the server rejected it.
    async fn put(&self, url: &str, payload: &JsonValue) -> EngineResult<bool> {
        debug!(target: "sdnstats::filler", url, "Sending batch");
        let response = self.client.put(url).json(payload).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(error) => warn!(
                target: "sdnstats::filler",
                url,
                status = status.as_u16(),
                error_type = %error.error_type,
                description = %error.description,
                "Server rejected batch"
            ),
            Err(_) => warn!(target: "sdnstats::filler", url, status = status.as_u16(), body = %body, "Server rejected batch"),
        }
        Ok(false)
    }

    /// Fill the configured period ending now.
    pub async fn fill(&mut self) -> EngineResult<FillSummary> {
        self.fill_until(now_millis() / 1000).await
    }

    /// Fill the configured period ending at `end_secs`.
    pub async fn fill_until(&mut self, end_secs: i64) -> EngineResult<FillSummary> {
        let total = self.config.num_samples() as usize;
        let interval = self.config.interval_secs as i64;
        let mut start_secs = end_secs - total as i64 * interval;
        let mut remaining = total;
        let mut summary = FillSummary::default();

        info!(
            target: "sdnstats::filler",
            url = %self.config.url,
            cluster = %self.config.cluster,
            samples = total,
            interval_secs = interval,
            switches = self.switch_ids.len(),
            "Filling stats"
        );

        while remaining > 0 {
            let count = remaining.min(self.config.batch);
            let batch = self.generate_batch(start_secs, count);

            if let Some(payload) = batch.stats_payload() {
                if !self.put(&self.stats_url(), &payload).await? {
                    summary.failed_requests += 1;
                }
            }
            if let Some(payload) = batch.events_payload() {
                if !self.put(&self.events_url(), &payload).await? {
                    summary.failed_requests += 1;
                }
            }

            remaining -= count;
            start_secs += interval * count as i64;
            summary.batches += 1;
            summary.samples += count;
            debug!(
                target: "sdnstats::filler",
                progress = %format!("{:.2}%", (total - remaining) as f64 * 100.0 / total as f64),
                "Batch sent"
            );
        }

        info!(
            target: "sdnstats::filler",
            batches = summary.batches,
            samples = summary.samples,
            failed_requests = summary.failed_requests,
            "Fill complete"
        );
        Ok(summary)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
