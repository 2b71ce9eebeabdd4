//! Request context extraction and authentication middleware.
//!
//! Dispatch-trigger endpoints authenticate with a static bearer service
//! token, matched exactly against the configured value. Tenant scope
//! arrives in the `X-Tenant-Id` header; endpoints that operate on a
//! specific record require it, the queue-draining endpoint treats it as
//! an optional filter.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::extract::State;
use axum::http::header::HeaderName;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ulid::Ulid;

use tandem_core::TenantId;

use crate::error::ApiError;
use crate::server::AppState;

/// Header name for request IDs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request context derived from authentication and headers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Tenant scope, when the caller supplied one.
    pub tenant: Option<TenantId>,
    /// Request ID for tracing/correlation.
    pub request_id: String,
}

impl RequestContext {
    /// Returns the tenant, or a 400 naming the missing header.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::bad_request`] when no `X-Tenant-Id` header
    /// was supplied.
    pub fn require_tenant(&self) -> Result<&TenantId, ApiError> {
        self.tenant.as_ref().ok_or_else(|| {
            ApiError::bad_request("X-Tenant-Id header is required for this endpoint")
                .with_request_id(self.request_id.clone())
        })
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<Self>() {
            return Ok(existing.clone());
        }

        let headers = &parts.headers;
        let request_id =
            request_id_from_headers(headers).unwrap_or_else(|| Ulid::new().to_string());

        verify_service_token(headers, state, &request_id)?;

        let tenant = match header_string(headers, "X-Tenant-Id") {
            Some(raw) => Some(TenantId::new(&raw).map_err(|err| {
                ApiError::bad_request(format!("invalid X-Tenant-Id header: {err}"))
                    .with_request_id(request_id.clone())
            })?),
            None => None,
        };

        let ctx = Self { tenant, request_id };

        parts.extensions.insert(ctx.clone());
        Ok(ctx)
    }
}

fn verify_service_token(
    headers: &HeaderMap,
    state: &AppState,
    request_id: &str,
) -> Result<(), ApiError> {
    let Some(expected) = state
        .config
        .api_token
        .as_deref()
        .filter(|t| !t.trim().is_empty())
    else {
        // Config validation requires a token outside debug mode; a bare
        // debug instance runs open.
        if state.config.debug {
            return Ok(());
        }
        return Err(ApiError::internal("service token is not configured")
            .with_request_id(request_id.to_string()));
    };

    let token = bearer_token(headers)
        .ok_or_else(|| ApiError::missing_auth().with_request_id(request_id.to_string()))?;
    if token != expected {
        return Err(ApiError::invalid_token().with_request_id(request_id.to_string()));
    }
    Ok(())
}

fn request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    header_string(headers, "X-Request-Id").or_else(|| header_string(headers, "X-Request-ID"))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = header_string(headers, "Authorization")?;
    let token = raw.strip_prefix("Bearer ")?;
    Some(token.to_string())
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?;
    value.to_str().ok().map(str::to_string)
}

/// Authentication middleware.
///
/// Runs before the route handlers and injects a verified
/// [`RequestContext`] into request extensions; every response carries
/// the request id back in `x-request-id`.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    let ctx = match RequestContext::from_request_parts(&mut parts, &state).await {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };

    let mut req = Request::from_parts(parts, body);
    let request_id = ctx.request_id.clone();
    req.extensions_mut().insert(ctx);

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}
