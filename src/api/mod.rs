// ============================================================================
// REST API
// ============================================================================
// axum surface over the stats context:
// - /stats/data, /stats/metadata, /stats/index, /stats/target
// - /events/data
// Every engine call runs on the blocking pool; errors render as
// `{"error_type": ..., "description": ...}`.
// ============================================================================

pub mod error;
pub mod handlers;
pub mod params;
pub mod router;

use std::sync::Arc;

use crate::context::StatsContext;

pub use error::ErrorResponse;
pub use handlers::SuccessResponse;
pub use router::create_router;

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub ctx: Arc<StatsContext>,
}

impl AppState {
    pub fn new(ctx: Arc<StatsContext>) -> Self {
        Self { ctx }
    }
}
