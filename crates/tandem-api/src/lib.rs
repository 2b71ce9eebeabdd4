//! # tandem-api
//!
//! HTTP composition layer for the tandem call orchestration service.
//!
//! This crate provides the API surface for tandem, handling:
//!
//! - **Authentication**: Service bearer token and webhook shared secret
//! - **Routing**: HTTP endpoint configuration
//! - **Service Wiring**: Composition of the store, orchestrator, and reconciler
//! - **Observability**: Metrics, tracing, and health checks
//!
//! ## Design Principles
//!
//! This crate is a **thin composition layer** with no domain policy.
//! All business logic lives in `tandem-flow`.
//!
//! ## Endpoints
//!
//! ```text
//! GET  /health                          - Health check
//! GET  /ready                           - Readiness check
//! GET  /metrics                         - Prometheus metrics
//! POST /api/v1/calls/initiate           - Dispatch the earliest pending call
//! POST /api/v1/calls/{call_id}/initiate - Dispatch one specific call
//! POST /api/v1/calls/sweep              - Fail calls older than the call timeout
//! POST /api/v1/webhooks/provider        - Provider call status events
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tandem_api::server::Server;
//!
//! let server = Server::builder()
//!     .http_port(8080)
//!     .debug(true)
//!     .build();
//!
//! server.serve().await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::context::RequestContext;
    pub use crate::error::{ApiError, ApiResult};
    pub use crate::server::Server;
}
