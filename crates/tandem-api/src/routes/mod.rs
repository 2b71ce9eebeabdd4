//! HTTP route handlers.

use std::sync::Arc;

use axum::Router;

use crate::server::AppState;

pub mod calls;
pub mod webhooks;

/// Builds the authenticated `/api/v1` router.
///
/// Everything merged here sits behind the bearer-token middleware.
/// Webhook routes authenticate with the provider's shared secret
/// instead and are mounted separately by the server.
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new().merge(calls::routes())
}

/// Builds the webhook router.
///
/// Mounted under `/api/v1` but outside the bearer-token middleware;
/// each handler verifies the shared provider secret itself.
pub fn webhook_routes() -> Router<Arc<AppState>> {
    Router::new().merge(webhooks::routes())
}
