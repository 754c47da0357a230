//! Maps `SilcError` onto HTTP status codes per the error taxonomy (§7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use silc_core::error::SilcError;

pub struct ApiError(pub SilcError);

impl From<SilcError> for ApiError {
    fn from(e: SilcError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, status_label) = match &self.0 {
            SilcError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            SilcError::PortsExhausted | SilcError::NameExhausted { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "exhausted")
            }
            SilcError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            SilcError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            SilcError::Busy => (StatusCode::CONFLICT, "busy"),
            SilcError::Timeout => (StatusCode::OK, "timeout"),
            SilcError::SessionGone => (StatusCode::GONE, "session_gone"),
            SilcError::Io(_) | SilcError::PtyClosed => {
                (StatusCode::INTERNAL_SERVER_ERROR, "io_error")
            }
            SilcError::Auth => (StatusCode::UNAUTHORIZED, "auth_error"),
        };
        (
            status,
            Json(serde_json::json!({
                "status": status_label,
                "error": self.0.to_string(),
            })),
        )
            .into_response()
    }
}
