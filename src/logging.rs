// ============================================================================
// LOGGING & OBSERVABILITY
// ============================================================================
// tracing-subscriber setup driven by LoggingConfig:
// - EnvFilter seeded with the configured level (RUST_LOG still wins)
// - json, pretty or compact console output
// - optional non-blocking file sink through tracing-appender
// ============================================================================

use std::path::Path;
use std::time::Instant;

use tracing::level_filters::LevelFilter;
use tracing::{info, trace, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::{EngineError, EngineResult};

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

// ----------------------------------------------------------------------------
// Logger Initialization
// ----------------------------------------------------------------------------

fn level_filter(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

fn console_layer(config: &LoggingConfig) -> BoxedLayer {
    match config.format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_target(true)
            .with_file(config.source_location)
            .with_line_number(config.source_location)
            .with_thread_names(true)
            .boxed(),
        "compact" => fmt::layer()
            .compact()
            .with_ansi(config.colors)
            .with_target(true)
            .boxed(),
        _ => fmt::layer()
            .pretty()
            .with_ansi(config.colors)
            .with_target(true)
            .with_file(config.source_location)
            .with_line_number(config.source_location)
            .with_thread_names(true)
            .boxed(),
    }
}

/// Initialize the logging system based on configuration.
///
/// When a log file is configured the returned guard must be held for the
/// life of the process; dropping it flushes and stops the writer thread.
pub fn init_logging(config: &LoggingConfig) -> EngineResult<Option<WorkerGuard>> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter(&config.level).into())
        .from_env_lossy();

    let mut layers: Vec<BoxedLayer> = vec![console_layer(config)];
    let mut guard = None;

    if let Some(file) = config.file.as_deref() {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| EngineError::Internal(format!("Invalid log file path: {}", file)))?;
        std::fs::create_dir_all(dir)?;

        let appender = tracing_appender::rolling::never(dir, name);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed(),
        );
        guard = Some(worker);
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| EngineError::Internal(format!("Failed to set logger: {}", e)))?;

    info!(
        target: "sdnstats::init",
        level = %config.level,
        format = %config.format,
        file = ?config.file,
        "Logging initialized"
    );

    Ok(guard)
}

// ----------------------------------------------------------------------------
// Performance Timer
// ----------------------------------------------------------------------------

/// Measures an operation and warns when it runs past a threshold.
///
/// Reports when dropped.
pub struct PerfTimer {
    name: &'static str,
    start: Instant,
    threshold_ms: u64,
}

impl PerfTimer {
    /// Start a timer with a warning threshold
    pub fn with_threshold(name: &'static str, threshold_ms: u64) -> Self {
        Self {
            name,
            start: Instant::now(),
            threshold_ms,
        }
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Get elapsed time in microseconds
    pub fn elapsed_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        let elapsed = self.elapsed_ms();
        if elapsed > self.threshold_ms {
            warn!(
                target: "sdnstats::perf",
                operation = self.name,
                elapsed_ms = elapsed,
                threshold_ms = self.threshold_ms,
                "Operation exceeded threshold"
            );
        } else {
            trace!(
                target: "sdnstats::perf",
                operation = self.name,
                elapsed_us = self.elapsed_us(),
                "Operation completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter_parsing() {
        assert_eq!(level_filter("DEBUG"), LevelFilter::DEBUG);
        assert_eq!(level_filter("warn"), LevelFilter::WARN);
        assert_eq!(level_filter("chatty"), LevelFilter::INFO);
    }

    #[test]
    fn test_perf_timer_measures() {
        let timer = PerfTimer::with_threshold("test", 10_000);
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(timer.elapsed_us() >= 2_000);
    }
}
