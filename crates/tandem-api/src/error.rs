//! API error types and HTTP response mapping.

use axum::Json;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::HeaderName;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use tandem_core::Error as CoreError;
use tandem_flow::error::Error as FlowError;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message (safe for clients).
    pub message: String,
    /// Optional error category (e.g., `admission_denied`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Optional request ID for correlation.
    pub request_id: Option<String>,
}

/// HTTP API error with stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    error: Option<&'static str>,
    request_id: Option<String>,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    /// Returns an error response for invalid input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Returns an error response for authentication failures.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// Returns an error response when the Authorization header is missing.
    #[must_use]
    pub fn missing_auth() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "MISSING_AUTH",
            "Authorization header required",
        )
    }

    /// Returns an error response when the bearer token is invalid.
    #[must_use]
    pub fn invalid_token() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "INVALID_TOKEN",
            "Invalid bearer token",
        )
    }

    /// Returns an error response for missing resources.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Returns an error response for lost initiation races (CAS).
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// Returns an error response for admission denials.
    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new_with_error(
            StatusCode::TOO_MANY_REQUESTS,
            "ADMISSION_DENIED",
            message,
            Some("admission_denied"),
        )
    }

    /// Returns an error response when the voice provider rejects or
    /// cannot be reached.
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", message)
    }

    /// Returns an internal error response.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// Attaches a request ID for correlation.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attaches a Retry-After header value in seconds.
    #[must_use]
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the request ID, if one was attached.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Returns the stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self::new_with_error(status, code, message, None)
    }

    fn new_with_error(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        error: Option<&'static str>,
    ) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            error,
            request_id: None,
            retry_after_secs: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = self.request_id;
        let retry_after_secs = self.retry_after_secs;
        let mut response = (
            self.status,
            Json(ApiErrorBody {
                code: self.code.to_string(),
                message: self.message,
                error: self.error.map(str::to_string),
                request_id: request_id.clone(),
            }),
        )
            .into_response();

        if let Some(request_id) = request_id {
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("x-request-id"), value);
            }
        }

        if let Some(secs) = retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("retry-after"), value);
            }
        }

        response
    }
}

impl From<FlowError> for ApiError {
    fn from(value: FlowError) -> Self {
        match &value {
            FlowError::NotFound { .. } => Self::not_found(value.to_string()),
            FlowError::Validation { .. } => Self::bad_request(value.to_string()),
            FlowError::AdmissionDenied { .. } => {
                let retry_after = value.retry_after_secs();
                let error = Self::too_many_requests(value.to_string());
                match retry_after {
                    Some(secs) => error.with_retry_after(secs),
                    None => error,
                }
            }
            FlowError::Dispatch { .. } => Self::bad_gateway(value.to_string()),
            FlowError::Conflict { .. } => Self::conflict(value.to_string()),
            FlowError::Storage { .. } => Self::internal(value.to_string()),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(value: CoreError) -> Self {
        // Core errors reaching the API layer are all input validation.
        Self::bad_request(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_flow::error::DenialReason;

    #[test]
    fn admission_denial_maps_to_429_with_retry_after() {
        let denial = FlowError::AdmissionDenied {
            reason: DenialReason::RateLimited {
                limit: 3,
                window_secs: 60,
                retry_after_secs: 17,
            },
        };
        let error = ApiError::from(denial);
        assert_eq!(error.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(error.code(), "ADMISSION_DENIED");

        let response = error.into_response();
        let retry_after = response
            .headers()
            .get("retry-after")
            .expect("Retry-After header should be present");
        assert_eq!(retry_after.to_str().unwrap(), "17");
    }

    #[test]
    fn concurrency_denial_has_no_retry_after() {
        let denial = FlowError::AdmissionDenied {
            reason: DenialReason::MaxConcurrent {
                current: 5,
                limit: 5,
            },
        };
        let response = ApiError::from(denial).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get("retry-after").is_none());
    }

    #[test]
    fn flow_errors_map_to_distinct_statuses() {
        let cases = [
            (
                ApiError::from(FlowError::not_found("call", 42)),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(FlowError::validation("no phone")),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(FlowError::dispatch("provider said no")),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ApiError::from(FlowError::storage("lock poisoned")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.status(), expected);
        }
    }

    #[test]
    fn request_id_echoes_in_header_and_body() {
        let error = ApiError::not_found("call (42)").with_request_id("01ARZ3NDEKTSV4RRFFQ69G5FAV");
        let response = error.into_response();

        let header = response
            .headers()
            .get("x-request-id")
            .expect("x-request-id header should be present");
        assert_eq!(header.to_str().unwrap(), "01ARZ3NDEKTSV4RRFFQ69G5FAV");
    }
}
