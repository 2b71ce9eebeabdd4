//! Provider webhook routes.
//!
//! ## Routes
//!
//! - `POST /webhooks/provider` - Receive call status events from the provider
//!
//! The provider authenticates with a shared secret in the
//! `X-Provider-Secret` header, checked before the body is parsed. Once
//! authenticated, the endpoint always acknowledges with `200` so the
//! provider never retries events we have already judged: unparseable
//! bodies, unmatched calls, and reconciliation failures are logged and
//! acknowledged.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::server::AppState;

/// Header carrying the provider's shared webhook secret.
pub const PROVIDER_SECRET_HEADER: &str = "x-provider-secret";

/// Acknowledgement body; providers retry on status code alone.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    /// Always `"ok"`.
    pub status: &'static str,
}

impl Default for WebhookAck {
    fn default() -> Self {
        Self { status: "ok" }
    }
}

/// Receive a call status event from the provider.
pub(crate) async fn provider_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    verify_webhook_secret(
        state.config.webhook_secret.as_deref(),
        state.config.debug,
        &headers,
    )?;

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(error = %err, "acknowledging webhook with unparseable body");
            return Ok(Json(WebhookAck::default()));
        }
    };

    match state.reconciler.reconcile(&payload).await {
        Ok(outcome) => {
            tracing::debug!(outcome = outcome.as_label(), "webhook reconciled");
        }
        Err(err) => {
            tracing::warn!(error = %err, "webhook reconciliation failed");
        }
    }

    Ok(Json(WebhookAck::default()))
}

/// Compares the presented secret against the configured one.
///
/// An unconfigured secret only passes in debug mode; production
/// startup validation rejects that configuration outright.
fn verify_webhook_secret(
    configured: Option<&str>,
    debug: bool,
    headers: &HeaderMap,
) -> Result<(), ApiError> {
    let Some(expected) = configured.filter(|secret| !secret.trim().is_empty()) else {
        if debug {
            tracing::debug!("webhook secret not configured; accepting webhook in debug mode");
            return Ok(());
        }
        return Err(ApiError::internal("webhook secret is not configured"));
    };

    let presented = headers
        .get(PROVIDER_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());

    match presented {
        Some(value) if value == expected => Ok(()),
        Some(_) => Err(ApiError::unauthorized("invalid webhook secret")),
        None => Err(ApiError::unauthorized("missing X-Provider-Secret header")),
    }
}

/// Creates the webhook router.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhooks/provider", post(provider_webhook))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn headers_with_secret(secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(PROVIDER_SECRET_HEADER, secret.parse().expect("header"));
        headers
    }

    #[test]
    fn matching_secret_passes() {
        let headers = headers_with_secret("hunter2");
        assert!(verify_webhook_secret(Some("hunter2"), false, &headers).is_ok());
    }

    #[test]
    fn wrong_secret_is_unauthorized() {
        let headers = headers_with_secret("guess");
        let err = verify_webhook_secret(Some("hunter2"), false, &headers)
            .expect_err("secret should be rejected");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn missing_header_is_unauthorized() {
        let err = verify_webhook_secret(Some("hunter2"), false, &HeaderMap::new())
            .expect_err("absent header should be rejected");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn unset_secret_only_passes_in_debug() {
        assert!(verify_webhook_secret(None, true, &HeaderMap::new()).is_ok());

        let err = verify_webhook_secret(None, false, &HeaderMap::new())
            .expect_err("unset secret should fail closed");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn ack_body_is_ok() {
        let value = serde_json::to_value(WebhookAck::default()).expect("serialize");
        assert_eq!(value["status"], "ok");
    }
}
