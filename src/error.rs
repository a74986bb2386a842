// ============================================================================
// ERROR HANDLING FRAMEWORK
// ============================================================================
// Error types for every layer of the engine:
// - StorageError: failures inside a column store backend
// - StatsError: the engine taxonomy callers of the stores see
// - ConfigError: configuration loading and validation
// - ApiError: what the REST layer reports back to clients
// ============================================================================

use std::path::PathBuf;

use thiserror::Error;

// ----------------------------------------------------------------------------
// Storage Errors
// ----------------------------------------------------------------------------

/// Errors raised by a column store backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Transport failure: {message}")]
    Transport { message: String },

    #[error("Unknown column family: {name}")]
    UnknownColumnFamily { name: String },

    #[error("Column family '{name}' is a {actual} family, expected {expected}")]
    WrongFamilyKind {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("Data corruption detected: {message}")]
    DataCorruption { message: String },
}

impl StorageError {
    pub fn transport(message: impl Into<String>) -> Self {
        StorageError::Transport {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        StorageError::InvalidRequest {
            message: message.into(),
        }
    }

    /// Whether reconnecting to the backend may clear this failure.
    pub fn is_transport(&self) -> bool {
        matches!(self, StorageError::Transport { .. } | StorageError::Io(_))
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, StorageError::DataCorruption { .. })
    }
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Serialization {
            message: e.to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Stats Errors
// ----------------------------------------------------------------------------

/// The error taxonomy of the stats and events stores.
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("Error adding stats data with incorrect format: {reason}")]
    InvalidStatsData { reason: String },

    #[error("Invalid stats time range; start = {start}; end = {end}")]
    InvalidTimeRange { start: i64, end: i64 },

    #[error("Invalid data format: {0}")]
    InvalidDataFormat(String),

    #[error("Invalid {name}: {value}")]
    InvalidSampling { name: &'static str, value: i64 },

    #[error("Invalid stats type; name = {0}")]
    InvalidStatsType(String),

    #[error("Invalid non-numeric stat value for rate or average value computation: {0}")]
    NonnumericValue(String),

    /// For callers that need a rate where fewer than two points exist
    #[error("Error computing rate; not enough raw data")]
    RateComputation,

    #[error("Error connecting to stats database: {source}")]
    DatabaseConnection { source: StorageError },

    #[error("Error accessing stats database: {source}")]
    DatabaseAccess { source: StorageError },

    #[error("Invalid stats metadata from \"{origin}\": {reason}")]
    InvalidStatsMetadata { origin: String, reason: String },

    #[error("Error creating column family; name = {name}")]
    CreateColumnFamily { name: String, source: StorageError },

    #[error("Stats internal error: \"{0}\"")]
    Internal(String),
}

impl StatsError {
    pub fn invalid_data(reason: impl Into<String>) -> Self {
        StatsError::InvalidStatsData {
            reason: reason.into(),
        }
    }

    pub fn invalid_metadata(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        StatsError::InvalidStatsMetadata {
            origin: origin.into(),
            reason: reason.into(),
        }
    }

    /// Stable kind name used in error bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StatsError::InvalidStatsData { .. } => "InvalidStatsData",
            StatsError::InvalidTimeRange { .. } => "InvalidTimeRange",
            StatsError::InvalidDataFormat(_) => "InvalidDataFormat",
            StatsError::InvalidSampling { .. } => "InvalidSampling",
            StatsError::InvalidStatsType(_) => "InvalidStatsType",
            StatsError::NonnumericValue(_) => "NonnumericValue",
            StatsError::RateComputation => "RateComputation",
            StatsError::DatabaseConnection { .. } => "DatabaseConnection",
            StatsError::DatabaseAccess { .. } => "DatabaseAccess",
            StatsError::InvalidStatsMetadata { .. } => "InvalidStatsMetadata",
            StatsError::CreateColumnFamily { .. } => "CreateColumnFamily",
            StatsError::Internal(_) => "Internal",
        }
    }

    /// Errors the caller caused and can fix by changing the request.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            StatsError::InvalidStatsData { .. }
                | StatsError::InvalidTimeRange { .. }
                | StatsError::InvalidDataFormat(_)
                | StatsError::InvalidSampling { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StatsError::InvalidStatsType(_))
    }
}

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

/// Errors related to configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// REST Errors
// ----------------------------------------------------------------------------

/// Errors reported by the REST layer.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("The request data for a PUT request must be a JSON dictionary object: {0}")]
    InvalidPutData(String),

    #[error(
        "Invalid time range specified in stats REST API. \
         2 out of 3 of start-time, end-time, and duration params must be specified."
    )]
    InvalidTimeRange,

    #[error("Invalid time duration units: {0}")]
    InvalidTimeDurationUnits(String),

    #[error("Invalid query parameter: {name}={value}")]
    InvalidQueryParameter { name: &'static str, value: String },

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Error accessing stats: {0}")]
    Stats(StatsError),

    #[error("Unknown REST error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid_param(name: &'static str, value: impl Into<String>) -> Self {
        ApiError::InvalidQueryParameter {
            name,
            value: value.into(),
        }
    }

    /// Translate an engine error, attaching the request path for not-found kinds.
    pub fn from_stats(error: StatsError, path: &str) -> Self {
        match error {
            StatsError::InvalidStatsData { reason } => ApiError::InvalidPutData(reason),
            e if e.is_not_found() => ApiError::ResourceNotFound(path.to_string()),
            e => ApiError::Stats(e),
        }
    }

    /// Kind name carried in the `error_type` field of error bodies.
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::InvalidPutData(_) => "InvalidPutData",
            ApiError::InvalidTimeRange => "InvalidTimeRange",
            ApiError::InvalidTimeDurationUnits(_) => "InvalidTimeDurationUnits",
            ApiError::InvalidQueryParameter { .. } => "InvalidQueryParameter",
            ApiError::ResourceNotFound(_) => "ResourceNotFound",
            ApiError::Stats(e) => e.kind(),
            ApiError::Internal(_) => "Internal",
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::ResourceNotFound(_) => 404,
            ApiError::Stats(e) if e.is_not_found() => 404,
            ApiError::Stats(e) if e.is_caller_error() => 400,
            ApiError::Stats(_) | ApiError::Internal(_) => 500,
            _ => 400,
        }
    }
}

// ----------------------------------------------------------------------------
// Top-Level Engine Error
// ----------------------------------------------------------------------------

/// Any failure the engine binary can run into.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Stats error: {0}")]
    Stats(#[from] StatsError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::Config(_) => false,
            EngineError::Stats(e) => !matches!(e, StatsError::Internal(_)),
            EngineError::Storage(e) => e.is_recoverable(),
            EngineError::Io(_) => true,
            EngineError::Http(e) => e.is_timeout() || e.is_connect(),
            EngineError::Internal(_) => false,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "config",
            EngineError::Stats(_) => "stats",
            EngineError::Storage(_) => "storage",
            EngineError::Io(_) => "io",
            EngineError::Http(_) => "http",
            EngineError::Internal(_) => "internal",
        }
    }
}

// ----------------------------------------------------------------------------
// Result Type Aliases
// ----------------------------------------------------------------------------

pub type StorageResult<T> = Result<T, StorageError>;

pub type StatsResult<T> = Result<T, StatsError>;

pub type EngineResult<T> = Result<T, EngineError>;

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_status_codes() {
        assert_eq!(ApiError::InvalidTimeRange.status_code(), 400);
        assert_eq!(ApiError::ResourceNotFound("/x".into()).status_code(), 404);
        assert_eq!(ApiError::Internal("boom".into()).status_code(), 500);

        let conn = ApiError::Stats(StatsError::DatabaseConnection {
            source: StorageError::transport("closed"),
        });
        assert_eq!(conn.status_code(), 500);
        assert_eq!(conn.error_type(), "DatabaseConnection");

        let format = ApiError::Stats(StatsError::InvalidDataFormat("median".into()));
        assert_eq!(format.status_code(), 400);

        let rate = ApiError::Stats(StatsError::RateComputation);
        assert_eq!(rate.status_code(), 500);
        assert_eq!(rate.error_type(), "RateComputation");
    }

    #[test]
    fn test_stats_error_translation() {
        let api = ApiError::from_stats(StatsError::InvalidStatsType("foobar".into()), "/m/foobar");
        assert_eq!(api.error_type(), "ResourceNotFound");
        assert_eq!(api.status_code(), 404);

        let api = ApiError::from_stats(StatsError::invalid_data("missing value"), "/p");
        assert_eq!(api.error_type(), "InvalidPutData");
        assert_eq!(api.status_code(), 400);
    }

    #[test]
    fn test_transport_classification() {
        assert!(StorageError::transport("reset").is_transport());
        assert!(StorageError::Io(std::io::Error::other("disk")).is_transport());
        assert!(!StorageError::invalid_request("bad slice").is_transport());
        assert!(!StorageError::DataCorruption { message: "crc".into() }.is_recoverable());
    }
}
