//! Route handlers. Engine calls block, so each runs on the blocking pool.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{OriginalUri, Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::params::{EventsParams, StatsParams, TimeRangeParams};
use super::AppState;
use crate::constants::{CONTROLLER_TARGET_TYPE, LOCALHOST_ID};
use crate::context::StatsContext;
use crate::error::{ApiError, ApiResult};
use crate::events::EventRecord;
use crate::index::{IndexAttributes, StatTypeIndexEntry};
use crate::metadata::MetadataView;
use crate::stats::{SeriesId, StatsQuery};

/// Body of successful write and delete responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub description: String,
}

impl Default for SuccessResponse {
    fn default() -> Self {
        Self {
            description: "success".to_string(),
        }
    }
}

async fn run_blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("worker task failed: {}", e)))?
}

fn parse_body(body: &Bytes) -> ApiResult<JsonValue> {
    serde_json::from_slice(body).map_err(|e| ApiError::InvalidPutData(e.to_string()))
}

/// Producers still report the local controller as `localhost`.
fn resolve_target_id(ctx: &StatsContext, target_type: &str, target_id: String) -> String {
    if target_type == CONTROLLER_TARGET_TYPE && target_id == LOCALHOST_ID {
        ctx.controller_id().to_string()
    } else {
        target_id
    }
}

fn resolve_node_id(ctx: &StatsContext, node_id: String) -> String {
    if node_id == LOCALHOST_ID {
        ctx.controller_id().to_string()
    } else {
        node_id
    }
}

fn to_json<T: Serialize>(value: &T) -> ApiResult<JsonValue> {
    serde_json::to_value(value).map_err(|e| ApiError::Internal(e.to_string()))
}

// ----------------------------------------------------------------------------
// Stats Data
// ----------------------------------------------------------------------------

pub async fn put_stats(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> ApiResult<Json<SuccessResponse>> {
    let payload = parse_body(&body)?;
    let path = uri.path().to_string();
    run_blocking(move || {
        state
            .ctx
            .stats()
            .and_then(|stats| stats.put(&cluster, &payload))
            .map_err(|e| ApiError::from_stats(e, &path))
    })
    .await?;
    Ok(Json(SuccessResponse::default()))
}

pub async fn get_stats(
    State(state): State<AppState>,
    Path((cluster, target_type, target_id, stat_type)): Path<(String, String, String, String)>,
    Query(params): Query<StatsParams>,
    OriginalUri(uri): OriginalUri,
) -> ApiResult<Json<JsonValue>> {
    let range = params.range.resolve_now()?;
    let window = params.window()?;
    let data_format = params.data_format()?;
    let limit = params.limit()?;
    let path = uri.path().to_string();

    let data = run_blocking(move || {
        let ctx = &state.ctx;
        let target_id = resolve_target_id(ctx, &target_type, target_id);
        let series = SeriesId::new(cluster, target_type, target_id, stat_type);
        let stats = ctx.stats().map_err(|e| ApiError::from_stats(e, &path))?;

        match range {
            Some((start, end)) => {
                let sample_interval =
                    params.sample_interval(start, end, ctx.default_sample_count())?;
                let query = StatsQuery::range(start, end)
                    .with_sample_interval(sample_interval)
                    .with_window(window)
                    .with_format(data_format)
                    .with_limit(limit);
                let points = stats
                    .get(&series, &query)
                    .map_err(|e| ApiError::from_stats(e, &path))?;
                to_json(&points)
            }
            None => {
                let latest = stats
                    .get_latest(&series, window, data_format)
                    .map_err(|e| ApiError::from_stats(e, &path))?;
                to_json(&latest)
            }
        }
    })
    .await?;
    Ok(Json(data))
}

pub async fn delete_stats(
    State(state): State<AppState>,
    Path((cluster, target_type, target_id, stat_type)): Path<(String, String, String, String)>,
    Query(range): Query<TimeRangeParams>,
    OriginalUri(uri): OriginalUri,
) -> ApiResult<Json<SuccessResponse>> {
    let (start, end) = range.require()?;
    let path = uri.path().to_string();
    run_blocking(move || {
        let ctx = &state.ctx;
        let target_id = resolve_target_id(ctx, &target_type, target_id);
        let series = SeriesId::new(cluster, target_type, target_id, stat_type);
        ctx.stats()
            .and_then(|stats| stats.delete(&series, start, end))
            .map_err(|e| ApiError::from_stats(e, &path))
    })
    .await?;
    Ok(Json(SuccessResponse::default()))
}

// ----------------------------------------------------------------------------
// Metadata & Indexes
// ----------------------------------------------------------------------------

async fn metadata(
    state: AppState,
    cluster: String,
    stat_type: Option<String>,
    path: String,
) -> ApiResult<Json<MetadataView>> {
    let view = run_blocking(move || {
        state
            .ctx
            .metadata()
            .get(&cluster, stat_type.as_deref())
            .map_err(|e| ApiError::from_stats(e, &path))
    })
    .await?;
    Ok(Json(view))
}

pub async fn get_all_metadata(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    OriginalUri(uri): OriginalUri,
) -> ApiResult<Json<MetadataView>> {
    metadata(state, cluster, None, uri.path().to_string()).await
}

pub async fn get_metadata(
    State(state): State<AppState>,
    Path((cluster, stat_type)): Path<(String, String)>,
    OriginalUri(uri): OriginalUri,
) -> ApiResult<Json<MetadataView>> {
    metadata(state, cluster, Some(stat_type), uri.path().to_string()).await
}

pub async fn get_stats_type_index(
    State(state): State<AppState>,
    Path((cluster, target_type, target_id)): Path<(String, String, String)>,
    OriginalUri(uri): OriginalUri,
) -> ApiResult<Json<BTreeMap<String, StatTypeIndexEntry>>> {
    let path = uri.path().to_string();
    let index = run_blocking(move || {
        let ctx = &state.ctx;
        let target_id = resolve_target_id(ctx, &target_type, target_id);
        ctx.index()
            .and_then(|index| index.get_stats_type_index(&cluster, &target_type, &target_id))
            .map_err(|e| ApiError::from_stats(e, &path))
    })
    .await?;
    Ok(Json(index))
}

pub async fn get_stat_type_entry(
    State(state): State<AppState>,
    Path((cluster, target_type, target_id, stat_type)): Path<(String, String, String, String)>,
    OriginalUri(uri): OriginalUri,
) -> ApiResult<Json<StatTypeIndexEntry>> {
    let path = uri.path().to_string();
    let entry = run_blocking(move || {
        let ctx = &state.ctx;
        let target_id = resolve_target_id(ctx, &target_type, target_id);
        ctx.index()
            .and_then(|index| {
                index.get_stat_type_entry(&cluster, &target_type, &target_id, &stat_type)
            })
            .map_err(|e| ApiError::from_stats(e, &path))
    })
    .await?;
    Ok(Json(entry))
}

pub async fn get_target_types(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    OriginalUri(uri): OriginalUri,
) -> ApiResult<Json<BTreeMap<String, IndexAttributes>>> {
    let path = uri.path().to_string();
    let types = run_blocking(move || {
        state
            .ctx
            .index()
            .and_then(|index| index.get_stats_target_types(&cluster))
            .map_err(|e| ApiError::from_stats(e, &path))
    })
    .await?;
    Ok(Json(types))
}

pub async fn get_targets(
    State(state): State<AppState>,
    Path((cluster, target_type)): Path<(String, String)>,
    OriginalUri(uri): OriginalUri,
) -> ApiResult<Json<BTreeMap<String, IndexAttributes>>> {
    let path = uri.path().to_string();
    let targets = run_blocking(move || {
        state
            .ctx
            .index()
            .and_then(|index| index.get_stats_targets(&cluster, &target_type))
            .map_err(|e| ApiError::from_stats(e, &path))
    })
    .await?;
    Ok(Json(targets))
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

pub async fn put_events(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> ApiResult<Json<SuccessResponse>> {
    let payload = parse_body(&body)?;
    let path = uri.path().to_string();
    run_blocking(move || {
        state
            .ctx
            .events()
            .and_then(|events| events.put(&cluster, &payload))
            .map_err(|e| ApiError::from_stats(e, &path))
    })
    .await?;
    Ok(Json(SuccessResponse::default()))
}

pub async fn get_events(
    State(state): State<AppState>,
    Path((cluster, node_id)): Path<(String, String)>,
    Query(params): Query<EventsParams>,
    OriginalUri(uri): OriginalUri,
) -> ApiResult<Json<Vec<EventRecord>>> {
    let (start, end) = params.range.require()?;
    let include_pk_tag = params.include_pk_tag();
    let path = uri.path().to_string();
    let events = run_blocking(move || {
        let ctx = &state.ctx;
        let node_id = resolve_node_id(ctx, node_id);
        ctx.events()
            .and_then(|events| events.get(&cluster, &node_id, start, end, include_pk_tag))
            .map_err(|e| ApiError::from_stats(e, &path))
    })
    .await?;
    Ok(Json(events))
}

pub async fn delete_events(
    State(state): State<AppState>,
    Path((cluster, node_id)): Path<(String, String)>,
    Query(range): Query<TimeRangeParams>,
    OriginalUri(uri): OriginalUri,
) -> ApiResult<Json<SuccessResponse>> {
    let (start, end) = range.require()?;
    let path = uri.path().to_string();
    run_blocking(move || {
        let ctx = &state.ctx;
        let node_id = resolve_node_id(ctx, node_id);
        ctx.events()
            .and_then(|events| events.delete(&cluster, &node_id, start, end))
            .map_err(|e| ApiError::from_stats(e, &path))
    })
    .await?;
    Ok(Json(SuccessResponse::default()))
}

/// Fallback for unknown routes.
pub async fn not_found(OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::ResourceNotFound(uri.path().to_string())
}
