//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::Value as JsonValue;
use tower::ServiceExt;

use sdnstats::api::{create_router, AppState};
use sdnstats::storage::MemoryStore;
use sdnstats::StatsContext;

pub const BASE_TIME: i64 = 1_297_278_987_000;
pub const LOCAL_CONTROLLER_ID: &str = "c1";

const SECOND: i64 = 1000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

pub fn make_timestamp(day: i64, hour: i64) -> i64 {
    BASE_TIME + day * DAY + hour * HOUR
}

pub fn make_timestamp_min(day: i64, hour: i64, minute: i64) -> i64 {
    make_timestamp(day, hour) + minute * MINUTE
}

pub fn memory_context() -> Arc<StatsContext> {
    Arc::new(StatsContext::with_store(Arc::new(MemoryStore::new()), LOCAL_CONTROLLER_ID).unwrap())
}

/// Router over a fresh in-memory store, mounted at `/rest/v1`.
pub fn test_app() -> (Router, Arc<StatsContext>) {
    let ctx = memory_context();
    (create_router(AppState::new(ctx.clone()), "/rest/v1"), ctx)
}

pub fn query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

pub async fn send(app: &Router, method: Method, uri: &str, body: Option<&JsonValue>) -> (StatusCode, JsonValue) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(serde_json::to_vec(json).unwrap())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, JsonValue) {
    send(app, Method::GET, uri, None).await
}

pub async fn put(app: &Router, uri: &str, body: &JsonValue) -> (StatusCode, JsonValue) {
    send(app, Method::PUT, uri, Some(body)).await
}

pub async fn delete(app: &Router, uri: &str) -> (StatusCode, JsonValue) {
    send(app, Method::DELETE, uri, None).await
}
