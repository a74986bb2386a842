//! Route table.

use axum::routing::{get, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::AppState;

/// Build the application router with every route nested under `base_path`.
pub fn create_router(state: AppState, base_path: &str) -> Router {
    let api_routes = Router::new()
        // Stats data
        .route("/stats/data/:cluster", put(handlers::put_stats))
        .route(
            "/stats/data/:cluster/:target_type/:target_id/:stat_type",
            get(handlers::get_stats).delete(handlers::delete_stats),
        )
        // Metadata
        .route("/stats/metadata/:cluster", get(handlers::get_all_metadata))
        .route("/stats/metadata/:cluster/:stat_type", get(handlers::get_metadata))
        // Indexes
        .route(
            "/stats/index/:cluster/:target_type/:target_id",
            get(handlers::get_stats_type_index),
        )
        .route(
            "/stats/index/:cluster/:target_type/:target_id/:stat_type",
            get(handlers::get_stat_type_entry),
        )
        .route("/stats/target/:cluster", get(handlers::get_target_types))
        .route("/stats/target/:cluster/:target_type", get(handlers::get_targets))
        // Events
        .route("/events/data/:cluster", put(handlers::put_events))
        .route(
            "/events/data/:cluster/:node_id",
            get(handlers::get_events).delete(handlers::delete_events),
        );

    let base_path = base_path.trim_end_matches('/');
    let router = if base_path.is_empty() {
        Router::new().merge(api_routes)
    } else {
        Router::new().nest(base_path, api_routes)
    };

    router
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
