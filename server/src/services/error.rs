use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use joblib::error::Error;
use serde_json::json;

/// A failed request, rendered as `{"success": false, "error": ...}` with a matching status.
#[derive(thiserror::Error, Debug)]
#[error("{message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let (status, message) = match &err {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
            Error::NotFound => (StatusCode::NOT_FOUND, "File not found".to_string()),
            Error::Forbidden => (StatusCode::FORBIDDEN, err.to_string()),
            Error::Storage(_) | Error::Launch(_) => {
                tracing::warn!(error = %err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn statuses_follow_error_kind() {
        let cases = [
            (Error::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (Error::NotFound, StatusCode::NOT_FOUND),
            (Error::Forbidden, StatusCode::FORBIDDEN),
            (
                Error::Storage(io::Error::new(io::ErrorKind::Other, "/secret/path")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status, status);
            assert!(!api.message.contains("/secret/path"));
        }
    }
}
