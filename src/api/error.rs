//! HTTP rendering of [`ApiError`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::ApiError;

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_type: String,
    pub description: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(target: "sdnstats::api", error_type = self.error_type(), error = %self, "Request failed");
        } else {
            warn!(target: "sdnstats::api", error_type = self.error_type(), error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            error_type: self.error_type().to_string(),
            description: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
