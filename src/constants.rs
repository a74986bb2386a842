// ============================================================================
// CONSTANTS & VERSION INFORMATION
// ============================================================================
// Storage schema names, bucket geometry and the standard interval ladders.
// Changing any of the schema names or the bucket period makes existing data
// unreadable.
// ============================================================================

/// Engine version - follows semantic versioning
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ENGINE_NAME: &str = "sdnstats";
pub const ENGINE_FULL_NAME: &str = "SDN Stats Engine";

// ----------------------------------------------------------------------------
// Time Units (milliseconds)
// ----------------------------------------------------------------------------

pub const ONE_SECOND_MS: i64 = 1000;
pub const THIRTY_SECONDS_MS: i64 = 30 * ONE_SECOND_MS;
pub const ONE_MINUTE_MS: i64 = 60 * ONE_SECOND_MS;
pub const FIVE_MINUTES_MS: i64 = 5 * ONE_MINUTE_MS;
pub const TEN_MINUTES_MS: i64 = 10 * ONE_MINUTE_MS;
pub const ONE_HOUR_MS: i64 = 60 * ONE_MINUTE_MS;
pub const FOUR_HOURS_MS: i64 = 4 * ONE_HOUR_MS;
pub const ONE_DAY_MS: i64 = 24 * ONE_HOUR_MS;
pub const ONE_WEEK_MS: i64 = 7 * ONE_DAY_MS;
pub const FOUR_WEEKS_MS: i64 = 4 * ONE_WEEK_MS;

// ----------------------------------------------------------------------------
// Bucketing
// ----------------------------------------------------------------------------

/// Bucket period for stats rows (1 day)
pub const STATS_BUCKET_PERIOD_MS: i64 = ONE_DAY_MS;

/// Bucket period for event rows (1 day)
pub const EVENTS_BUCKET_PERIOD_MS: i64 = ONE_DAY_MS;

/// How far back a latest-value lookup may reach
pub const LATEST_LOOKBACK_MS: i64 = ONE_DAY_MS;

/// Column span read per storage call when scanning backwards
pub const REVERSE_SCAN_CHUNK_MS: i64 = ONE_HOUR_MS;

/// Upper bound on columns returned by a single slice
pub const MAX_SLICE_COLUMNS: usize = 1_000_000;

/// Upper bound on rows returned by a single key-range scan
pub const MAX_RANGE_ROWS: usize = 100_000;

// ----------------------------------------------------------------------------
// Interval Ladders
// ----------------------------------------------------------------------------

/// Standard downsampling intervals, ascending
pub const DOWNSAMPLE_INTERVALS: [i64; 7] = [
    ONE_MINUTE_MS,
    TEN_MINUTES_MS,
    ONE_HOUR_MS,
    FOUR_HOURS_MS,
    ONE_DAY_MS,
    ONE_WEEK_MS,
    FOUR_WEEKS_MS,
];

/// Standard window sizes, ascending
pub const WINDOW_INTERVALS: [i64; 4] = [
    THIRTY_SECONDS_MS,
    ONE_MINUTE_MS,
    FIVE_MINUTES_MS,
    TEN_MINUTES_MS,
];

// ----------------------------------------------------------------------------
// Storage Schema
// ----------------------------------------------------------------------------

pub const TARGET_INDEX_CF: &str = "target_index";
pub const STATS_TYPE_INDEX_CF: &str = "stats_type_index";
pub const EVENTS_CF: &str = "events";

/// Suffix appended to a target type to name its stats column family
pub const STATS_CF_SUFFIX: &str = "_stats";

/// Suffix carried by target types in put payloads
pub const PUT_TARGET_TYPE_SUFFIX: &str = "-stats";

/// Target types whose stats column families exist from the start
pub const BOOTSTRAP_TARGET_TYPES: [&str; 3] = ["controller", "switch", "port"];

pub const CONTROLLER_TARGET_TYPE: &str = "controller";

/// Placeholder id that stat producers use for the local controller
pub const LOCALHOST_ID: &str = "localhost";

pub const LAST_UPDATED_ATTRIBUTE: &str = "last-updated";
pub const CONTROLLER_ATTRIBUTE: &str = "controller";
pub const BASE_SUPER_COLUMN: &str = "base";
pub const PARAM_SUPER_COLUMN_PREFIX: &str = "param:";

/// Separator between a base stat type and its parameter
pub const STAT_PARAMETER_SEPARATOR: &str = "__";

pub const PK_TAG_FIELD: &str = "pk-tag";
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Synthesized pk-tags are drawn from `0..=MAX_GENERATED_PK_TAG`
pub const MAX_GENERATED_PK_TAG: u64 = 10_000_000_000;

// ----------------------------------------------------------------------------
// Query Defaults
// ----------------------------------------------------------------------------

pub const DEFAULT_SAMPLE_COUNT: i64 = 50;

/// Storage timestamps are microseconds
pub const STORAGE_TIMESTAMP_SCALE: i64 = 1000;

/// Largest accepted epoch millisecond timestamp. Half of what the
/// microsecond storage clock can hold, so bucket and range arithmetic on
/// accepted timestamps stays in range.
pub const MAX_TIMESTAMP_MS: i64 = i64::MAX / STORAGE_TIMESTAMP_SCALE / 2;
pub const MIN_TIMESTAMP_MS: i64 = -MAX_TIMESTAMP_MS;

/// Widest range a stats or events query may span, in day buckets
pub const MAX_RANGE_DAYS: i64 = 100_000;

/// Default configuration file name
pub const DEFAULT_CONFIG_PATH: &str = "sdnstats.toml";

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "SDNSTATS_";
