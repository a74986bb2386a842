//! # sdnstats - Time-Series Stats & Event-Log Engine
//!
//! Storage and query engine for controller/switch statistics and structured
//! log events. Series are keyed by cluster, target and stat type, partitioned
//! into day-sized buckets, and served over a small REST surface.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                               SDNSTATS ENGINE                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  REST (axum) → STATS CONTEXT → STATS / INDEX / EVENTS STORES → CONNECTION   │
//! │                                       │                          │          │
//! │                              SAMPLING ENGINE               COLUMN STORE     │
//! │                                                         (memory | wal)      │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Bucketed series**: one storage row per series per day, columns ordered
//!   by zero-padded offsets
//! - **Downsampling & windows**: snapped sample intervals, windowed average
//!   and rate
//! - **Atomic writes**: data points and both indexes commit in one batch
//! - **Event log**: arbitrary named fields with pk-tag disambiguation
//! - **Durable backend**: write-ahead log with snapshots

pub mod api;
pub mod bucket;
pub mod cli;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod events;
pub mod filler;
pub mod index;
pub mod logging;
pub mod metadata;
pub mod sampling;
pub mod server;
pub mod stats;
pub mod storage;
pub mod types;

pub use bucket::TimeBucketer;
pub use config::EngineConfig;
pub use context::StatsContext;
pub use error::{
    ApiError, ConfigError, EngineError, EngineResult, StatsError, StatsResult, StorageError,
    StorageResult,
};
pub use events::{EventRecord, EventsStore};
pub use index::StatsIndex;
pub use metadata::{MetadataRegistry, StatMetadata};
pub use stats::{SeriesId, StatsQuery, StatsStore};
pub use types::{DataFormat, StatPoint, StatValue};
