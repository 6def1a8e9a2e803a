//! HTTP error handling and response mapping.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relay_core::{llm::ChatError, RelayError};
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub RelayError);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(RelayError::InvalidRequest(rejection.body_text()))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RelayError::InvalidRequest(_) | RelayError::InvalidModel(_) => StatusCode::BAD_REQUEST,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::Upstream(ChatError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `{"error": {...}}` envelope, also used for mid-stream error events.
    pub fn body(&self) -> Value {
        let (error_type, code) = match &self.0 {
            RelayError::InvalidRequest(_) => ("invalid_request_error", Value::Null),
            RelayError::InvalidModel(_) => ("invalid_request_error", json!("model_not_found")),
            RelayError::NotFound(_) => ("not_found_error", json!("model_not_found")),
            RelayError::Upstream(_) => ("upstream_error", Value::Null),
            RelayError::Internal(_) => ("server_error", Value::Null),
        };
        json!({
            "error": {
                "message": self.0.to_string(),
                "type": error_type,
                "param": null,
                "code": code,
            }
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.0, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self.0, "request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (RelayError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (RelayError::InvalidModel("m".into()), StatusCode::BAD_REQUEST),
            (RelayError::NotFound("m".into()), StatusCode::NOT_FOUND),
            (RelayError::Upstream(ChatError::Network("down".into())), StatusCode::BAD_GATEWAY),
            (RelayError::Upstream(ChatError::Timeout("slow".into())), StatusCode::GATEWAY_TIMEOUT),
            (RelayError::Internal("bug".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[test]
    fn unknown_model_body() {
        let body = ApiError(RelayError::InvalidModel("nope".into())).body();
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(body["error"]["code"], "model_not_found");
        assert!(body["error"]["param"].is_null());
        assert!(body["error"]["message"].as_str().unwrap().contains("nope"));
    }
}
