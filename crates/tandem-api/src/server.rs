//! API server implementation.
//!
//! Provides health, ready, and call lifecycle endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tandem_flow::admission::AdmissionController;
use tandem_flow::dispatch::{CallDispatcher, HttpDispatcher};
use tandem_flow::orchestrator::{CallOrchestrator, OrchestratorDefaults};
use tandem_flow::reconcile::WebhookReconciler;
use tandem_flow::store::{CallStore, MemoryStore};

use crate::config::{Config, CorsConfig};

// ============================================================================
// Health and Ready Responses
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReadyResponse {
    /// Service readiness status.
    pub ready: bool,
    /// Optional message about readiness state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Call record store, probed by the readiness check.
    store: Arc<dyn CallStore>,
    /// Orchestrator behind the initiate and sweep endpoints.
    pub(crate) orchestrator: Arc<CallOrchestrator>,
    /// Reconciler behind the provider webhook endpoint.
    pub(crate) reconciler: Arc<WebhookReconciler>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("store", &"<CallStore>")
            .field("orchestrator", &self.orchestrator)
            .field("reconciler", &self.reconciler)
            .finish()
    }
}

impl AppState {
    /// Creates application state around the given store and dispatcher.
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<dyn CallStore>,
        dispatcher: Arc<dyn CallDispatcher>,
    ) -> Self {
        let admission = Arc::new(AdmissionController::new(Arc::clone(&store)));
        let defaults = OrchestratorDefaults {
            rate_limit: config.admission.rate_limit,
            rate_window_secs: config.admission.rate_window_secs,
            max_concurrent_calls: config.admission.max_concurrent_calls,
        };
        let orchestrator = Arc::new(
            CallOrchestrator::new(Arc::clone(&store), dispatcher, admission)
                .with_defaults(defaults),
        );
        let reconciler = Arc::new(WebhookReconciler::new(Arc::clone(&store)));

        Self {
            config,
            store,
            orchestrator,
            reconciler,
        }
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint handler.
///
/// Returns 200 OK if the service is alive. This is a shallow check
/// that doesn't verify dependencies.
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness check endpoint handler.
///
/// Returns 200 OK if the service is ready to accept requests. A cheap
/// store read is enough to prove the call store is still usable; lock
/// poisoning is the failure mode that matters here.
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.fetch_earliest_pending(None).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                message: Some(format!("store check failed: {e}")),
            }),
        ),
    }
}

// ============================================================================
// Server
// ============================================================================

/// The tandem API server.
///
/// Serves the call lifecycle API plus health and metrics endpoints.
pub struct Server {
    config: Config,
    store: Arc<dyn CallStore>,
    dispatcher: Option<Arc<dyn CallDispatcher>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("store", &"<CallStore>")
            .field("dispatcher", &self.dispatcher.is_some())
            .finish()
    }
}

impl Server {
    /// Creates a new server with the given configuration.
    ///
    /// Uses an in-memory store and an HTTP dispatcher built from the
    /// provider configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: Arc::new(MemoryStore::new()),
            dispatcher: None,
        }
    }

    /// Creates a new server with an explicit call store.
    #[must_use]
    pub fn with_store(config: Config, store: Arc<dyn CallStore>) -> Self {
        Self {
            config,
            store,
            dispatcher: None,
        }
    }

    /// Creates a new `ServerBuilder`.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Creates the router with all routes and middleware.
    fn create_router(&self) -> Router {
        let dispatcher = self.dispatcher.clone().unwrap_or_else(|| {
            let provider = &self.config.provider;
            Arc::new(HttpDispatcher::with_timeout(
                provider.base_url.clone(),
                provider.api_key.clone().unwrap_or_default(),
                provider.assistant_id.clone().unwrap_or_default(),
                provider.phone_number_id.clone().unwrap_or_default(),
                Duration::from_secs(provider.timeout_secs),
            ))
        });
        let state = Arc::new(AppState::new(
            self.config.clone(),
            Arc::clone(&self.store),
            dispatcher,
        ));

        // Build CORS layer from config
        let cors = self.build_cors_layer();

        let auth_layer =
            middleware::from_fn_with_state(Arc::clone(&state), crate::context::auth_middleware);
        let metrics_layer = middleware::from_fn(crate::metrics::metrics_middleware);

        Router::new()
            // Health, ready, and metrics endpoints (no auth required)
            .route("/health", get(health))
            .route("/ready", get(ready))
            .route("/metrics", get(crate::metrics::serve_metrics))
            // Call routes (bearer auth via middleware + RequestContext)
            .nest("/api/v1", crate::routes::api_v1_routes().layer(auth_layer))
            // Webhook routes authenticate with the provider secret instead
            .nest("/api/v1", crate::routes::webhook_routes())
            // Middleware (order matters): Metrics outermost for timing, then trace, then CORS.
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(metrics_layer)
            // Shared state
            .with_state(state)
    }

    /// Builds the CORS layer from configuration.
    fn build_cors_layer(&self) -> CorsLayer {
        let cors_config = &self.config.cors;
        let cors = Self::build_cors_base(cors_config);
        Self::apply_cors_allowed_origins(cors, cors_config)
    }

    fn build_cors_base(cors_config: &CorsConfig) -> CorsLayer {
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            // Allow common headers including auth and tenant scoping
            .allow_headers([
                header::AUTHORIZATION,
                header::CONTENT_TYPE,
                header::ACCEPT,
                header::HeaderName::from_static("x-tenant-id"),
                header::HeaderName::from_static("x-request-id"),
            ])
            // Expose headers the browser needs to read
            .expose_headers([
                header::CONTENT_TYPE,
                header::RETRY_AFTER,
                header::HeaderName::from_static("x-request-id"),
            ])
            // Set max age for preflight caching
            .max_age(Duration::from_secs(cors_config.max_age_seconds))
    }

    fn cors_allows_any_origin(cors_config: &CorsConfig) -> bool {
        cors_config.allowed_origins.len() == 1
            && cors_config
                .allowed_origins
                .first()
                .is_some_and(|origin| origin == "*")
    }

    fn parse_cors_origins(cors_config: &CorsConfig) -> Vec<HeaderValue> {
        let mut allowed = Vec::new();
        for origin in &cors_config.allowed_origins {
            match HeaderValue::from_str(origin) {
                Ok(value) => allowed.push(value),
                Err(_) => {
                    tracing::error!(
                        origin = %origin,
                        "Invalid CORS origin; expected a valid HeaderValue"
                    );
                }
            }
        }
        allowed
    }

    fn apply_cors_allowed_origins(cors: CorsLayer, cors_config: &CorsConfig) -> CorsLayer {
        if cors_config.allowed_origins.is_empty() {
            return cors;
        }

        if Self::cors_allows_any_origin(cors_config) {
            return cors.allow_origin(Any);
        }

        if cors_config
            .allowed_origins
            .iter()
            .any(|origin| origin == "*")
        {
            tracing::error!(
                origins = ?cors_config.allowed_origins,
                "Invalid CORS config: '*' must be the only allowed origin"
            );
            return cors;
        }

        let allowed = Self::parse_cors_origins(cors_config);

        if allowed.is_empty() {
            tracing::warn!("All configured CORS origins were invalid; disabling CORS");
            cors
        } else {
            tracing::info!(origins = ?cors_config.allowed_origins, "CORS configured");
            cors.allow_origin(AllowOrigin::list(allowed))
        }
    }

    /// Starts the server and blocks until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the server
    /// cannot bind to the port.
    pub async fn serve(&self) -> anyhow::Result<()> {
        self.config.validate()?;

        // Initialize metrics before starting the server
        crate::metrics::init_metrics();

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = self.create_router();

        tracing::info!(
            http_port = self.config.http_port,
            debug = self.config.debug,
            "starting tandem API server"
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind to {addr}"))?;

        axum::serve(listener, router)
            .await
            .context("server error")?;

        Ok(())
    }

    /// Creates a test router for the server.
    ///
    /// This is useful for integration tests where you want to test
    /// the routes without actually binding to a port.
    #[doc(hidden)]
    #[must_use]
    pub fn test_router(&self) -> Router {
        self.create_router()
    }
}

/// Builder for constructing a server.
pub struct ServerBuilder {
    config: Config,
    store: Arc<dyn CallStore>,
    dispatcher: Option<Arc<dyn CallDispatcher>>,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("store", &"<CallStore>")
            .field("dispatcher", &self.dispatcher.is_some())
            .finish()
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            store: Arc::new(MemoryStore::new()),
            dispatcher: None,
        }
    }
}

impl ServerBuilder {
    /// Creates a new server builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the HTTP port.
    #[must_use]
    pub fn http_port(mut self, port: u16) -> Self {
        self.config.http_port = port;
        self
    }

    /// Enables debug mode.
    ///
    /// See `Config::debug` for behavior changes (unset secrets are
    /// tolerated instead of rejected at startup).
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.debug = enabled;
        self
    }

    /// Sets the bearer token required on the call endpoints.
    #[must_use]
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.config.api_token = Some(token.into());
        self
    }

    /// Sets the shared secret required on the webhook endpoint.
    #[must_use]
    pub fn webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.webhook_secret = Some(secret.into());
        self
    }

    /// Sets the base URL of the outbound call provider.
    #[must_use]
    pub fn provider_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.provider.base_url = base_url.into();
        self
    }

    /// Sets the call store used by request handlers.
    ///
    /// By default, the server uses an in-memory store intended only
    /// for tests/dev.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn CallStore>) -> Self {
        self.store = store;
        self
    }

    /// Sets the dispatcher, replacing the HTTP one built from config.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Arc<dyn CallDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Builds the server.
    #[must_use]
    pub fn build(self) -> Server {
        Server {
            config: self.config,
            store: self.store,
            dispatcher: self.dispatcher,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
