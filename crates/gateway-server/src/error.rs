//! HTTP error responses.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::{ErrorPayload, GatewayError};
use serde::Serialize;

/// A gateway error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        Self(error)
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let retry_after = self.0.retry_after();

        let mut response = (
            status,
            Json(ErrorEnvelope {
                error: self.0.to_payload(),
            }),
        )
            .into_response();

        if let Some(wait) = retry_after {
            // Whole seconds, rounded up
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Handler result
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_rate_limited_response() {
        let response =
            ApiError(GatewayError::rate_limited("user:u1", Duration::from_millis(1500))).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");

        let body = response.into_body().collect().await.expect("body").to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["error"]["kind"], "rate_limited");
        assert_eq!(value["error"]["retryAfterMs"], 1500);
    }

    #[test]
    fn test_status_mapping() {
        let response = ApiError(GatewayError::validation("bad", None, "invalid_json")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());

        let response = ApiError(GatewayError::Cancelled).into_response();
        assert_eq!(response.status().as_u16(), 499);
    }
}
