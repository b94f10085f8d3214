//! Error responses for the HTTP surface

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use simcloud_common::{Error, ErrorCode};

/// Driver error rendered as a Kubernetes-style `Status` response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

/// HTTP status for an error kind
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = status_for(code);
        if status.is_server_error() {
            warn!(error = %self.0, reason = %code, "Request failed");
        }

        // Return K8s-style Status response
        let body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": self.0.to_string(),
            "reason": code.as_str(),
            "code": status.as_u16()
        });

        (status, axum::Json(body)).into_response()
    }
}
