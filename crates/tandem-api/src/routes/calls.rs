//! Call lifecycle routes.
//!
//! ## Routes
//!
//! - `POST /calls/initiate` - Dispatch the earliest pending call
//! - `POST /calls/:call_id/initiate` - Dispatch one specific call
//! - `POST /calls/sweep` - Fail `InProgress` calls older than the call timeout

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use tandem_core::observability::call_span;
use tandem_core::{CallId, PhoneNumber, ProviderCallId, TenantId};

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::server::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for the initiate endpoints. The body is optional; an
/// empty body means no override.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCallRequest {
    /// Phone number to dial instead of the stored one.
    #[serde(default)]
    pub phone_override: Option<String>,
}

/// Response for a successfully dispatched call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCallResponse {
    /// Human-readable confirmation.
    pub message: String,
    /// Internal id of the dispatched call.
    pub call_id: CallId,
    /// Provider-assigned id for the live call.
    pub provider_call_id: ProviderCallId,
    /// Raw provider response body.
    pub provider_response: Value,
}

/// Response for a stale-call sweep.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResponse {
    /// Number of calls moved to `Failed`.
    pub swept: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// Dispatch the earliest pending call.
///
/// Scoped to the `X-Tenant-Id` tenant when the header is present,
/// otherwise picks the oldest pending call across all tenants.
pub(crate) async fn initiate_next_call(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    body: Bytes,
) -> Result<Json<InitiateCallResponse>, ApiError> {
    let request = parse_initiate_body(&ctx, &body)?;
    let phone_override = parse_phone_override(&ctx, request.phone_override)?;

    let tenant = ctx.tenant.as_ref();
    let tenant_label = tenant.map_or("*", TenantId::as_str);
    tracing::info!(
        tenant = tenant_label,
        phone_override = phone_override.is_some(),
        "initiating next pending call"
    );

    let initiated = state
        .orchestrator
        .initiate_next_pending(tenant, phone_override)
        .instrument(call_span("initiate_next", tenant_label))
        .await
        .map_err(|err| ApiError::from(err).with_request_id(ctx.request_id.clone()))?;

    Ok(Json(InitiateCallResponse {
        message: "call dispatched".to_owned(),
        call_id: initiated.call_id,
        provider_call_id: initiated.provider_call_id,
        provider_response: initiated.provider_response,
    }))
}

/// Dispatch one specific pending call.
///
/// Requires a tenant scope; ids owned by other tenants report as not
/// found rather than as a scope error.
pub(crate) async fn initiate_call(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(call_id): Path<i64>,
    body: Bytes,
) -> Result<Json<InitiateCallResponse>, ApiError> {
    let request = parse_initiate_body(&ctx, &body)?;
    let phone_override = parse_phone_override(&ctx, request.phone_override)?;

    let tenant = ctx.require_tenant()?;
    let call_id = CallId::from_i64(call_id);
    tracing::info!(
        tenant = %tenant,
        call_id = %call_id,
        phone_override = phone_override.is_some(),
        "initiating call"
    );

    let initiated = state
        .orchestrator
        .initiate_specific(call_id, tenant, phone_override)
        .instrument(call_span("initiate", tenant.as_str()))
        .await
        .map_err(|err| ApiError::from(err).with_request_id(ctx.request_id.clone()))?;

    Ok(Json(InitiateCallResponse {
        message: "call dispatched".to_owned(),
        call_id: initiated.call_id,
        provider_call_id: initiated.provider_call_id,
        provider_response: initiated.provider_response,
    }))
}

/// Fail `InProgress` calls whose dispatch outlived the call timeout.
pub(crate) async fn sweep_stale_calls(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
) -> Result<Json<SweepResponse>, ApiError> {
    let max_age = Duration::from_secs(state.config.admission.max_call_secs);

    let swept = state
        .orchestrator
        .fail_stale_calls(max_age)
        .instrument(call_span("sweep", "*"))
        .await
        .map_err(|err| ApiError::from(err).with_request_id(ctx.request_id.clone()))?;

    tracing::info!(swept, max_age_secs = max_age.as_secs(), "stale call sweep finished");
    Ok(Json(SweepResponse { swept }))
}

fn parse_initiate_body(
    ctx: &RequestContext,
    body: &Bytes,
) -> Result<InitiateCallRequest, ApiError> {
    if body.is_empty() {
        return Ok(InitiateCallRequest::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        ApiError::bad_request(format!("invalid request body: {err}"))
            .with_request_id(ctx.request_id.clone())
    })
}

fn parse_phone_override(
    ctx: &RequestContext,
    raw: Option<String>,
) -> Result<Option<PhoneNumber>, ApiError> {
    raw.map(PhoneNumber::new)
        .transpose()
        .map_err(|err| ApiError::from(err).with_request_id(ctx.request_id.clone()))
}

/// Creates the call lifecycle router.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/calls/initiate", post(initiate_next_call))
        .route("/calls/:call_id/initiate", post(initiate_call))
        .route("/calls/sweep", post(sweep_stale_calls))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ctx() -> RequestContext {
        RequestContext {
            tenant: None,
            request_id: "req-1".to_owned(),
        }
    }

    #[test]
    fn initiate_request_accepts_camel_case_override() {
        let body = Bytes::from_static(br#"{"phoneOverride": "+15551234567"}"#);
        let request = parse_initiate_body(&test_ctx(), &body).expect("parse");
        assert_eq!(request.phone_override.as_deref(), Some("+15551234567"));
    }

    #[test]
    fn empty_body_means_no_override() {
        let request = parse_initiate_body(&test_ctx(), &Bytes::new()).expect("parse");
        assert!(request.phone_override.is_none());
    }

    #[test]
    fn malformed_body_is_a_bad_request() {
        let body = Bytes::from_static(b"{not json");
        let err = parse_initiate_body(&test_ctx(), &body).expect_err("body should be rejected");
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(err.request_id(), Some("req-1"));
    }

    #[test]
    fn invalid_phone_override_is_a_bad_request() {
        let err = parse_phone_override(&test_ctx(), Some("not-a-number".to_owned()))
            .expect_err("override should be rejected");
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn initiate_response_serializes_camel_case() {
        let response = InitiateCallResponse {
            message: "call dispatched".to_owned(),
            call_id: CallId::from_i64(42),
            provider_call_id: ProviderCallId::new_unchecked("abc-123"),
            provider_response: serde_json::json!({"id": "abc-123"}),
        };

        let value = serde_json::to_value(&response).expect("serialize");
        assert_eq!(value["callId"], 42);
        assert_eq!(value["providerCallId"], "abc-123");
        assert_eq!(value["providerResponse"]["id"], "abc-123");
    }
}
