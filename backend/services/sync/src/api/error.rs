use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use syncline_common::error::SynclineError;

pub struct ApiError(pub SynclineError);

impl From<SynclineError> for ApiError {
    fn from(err: SynclineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            SynclineError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            SynclineError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            SynclineError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            other => {
                tracing::error!(error = %other, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
