use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gatekeeper_core::{FieldError, GateError};
use serde_json::json;
use tracing::{error, warn};

/// A [`GateError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub GateError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            GateError::Validation(_) => StatusCode::BAD_REQUEST,
            GateError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GateError::Forbidden(_) => StatusCode::FORBIDDEN,
            GateError::NotFound(_) => StatusCode::NOT_FOUND,
            GateError::Conflict(_) => StatusCode::CONFLICT,
            GateError::Store(_) | GateError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(GateError::Validation(vec![FieldError::new(
            "body",
            rejection.body_text(),
        )]))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self.0 {
            GateError::Validation(details) => json!({
                "error": "invalid input",
                "details": details,
            }),
            other if status.is_server_error() => {
                error!(error = %other, "request failed");
                json!({ "error": status.canonical_reason().unwrap_or("internal error") })
            }
            other => {
                warn!(status = status.as_u16(), error = %other, "request rejected");
                json!({ "error": other.to_string() })
            }
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (GateError::invalid("level", "bad"), StatusCode::BAD_REQUEST),
            (GateError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (GateError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (GateError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (GateError::Conflict("x".into()), StatusCode::CONFLICT),
            (GateError::Store("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (GateError::Timeout("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (GateError::Config("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
