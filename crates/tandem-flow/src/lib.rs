//! # tandem-flow
//!
//! Call lifecycle engine for the Tandem outbound-calling service.
//!
//! This crate implements the call orchestration domain, providing:
//!
//! - **Lifecycle State Machine**: `Pending` to `InProgress` to
//!   `Completed`/`Failed`, enforced by compare-and-transition writes
//! - **Admission Control**: per-tenant sliding-window rate limiting and
//!   a concurrency ceiling checked atomically with the state transition
//! - **Provider Dispatch**: the outbound HTTP call that starts a voice
//!   call, with correlation ids embedded for the return path
//! - **Webhook Reconciliation**: terminal outcomes applied from
//!   provider events, tolerant of duplicates and reordering
//!
//! ## Core Concepts
//!
//! - **Call record**: one attempt to reach one customer, owned by a
//!   tenant and linked to the service record that motivated it
//! - **Claim**: the atomic `Pending` to `InProgress` step; whoever wins
//!   it owns the dispatch, so a record is never dispatched twice
//! - **Reconciliation**: webhook events closing claimed calls with the
//!   outcome, cost, and artifacts the provider reports
//!
//! ## Guarantees
//!
//! - **Monotonic**: terminal statuses never regress
//! - **Idempotent**: duplicate webhook deliveries apply as no-ops
//! - **Tenant-isolated**: reads are tenant-scoped; one tenant can never
//!   observe or mutate another tenant's calls
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tandem_core::TenantId;
//! use tandem_flow::admission::AdmissionController;
//! use tandem_flow::dispatch::HttpDispatcher;
//! use tandem_flow::orchestrator::CallOrchestrator;
//! use tandem_flow::store::MemoryStore;
//!
//! # async fn demo() -> tandem_flow::error::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let dispatcher = Arc::new(HttpDispatcher::new(
//!     "https://api.provider.example",
//!     "provider-api-key",
//!     "assistant-id",
//!     "phone-number-id",
//! ));
//! let admission = Arc::new(AdmissionController::new(store.clone()));
//! let orchestrator = CallOrchestrator::new(store, dispatcher, admission);
//!
//! // Dispatch the oldest pending call for one tenant.
//! let tenant = TenantId::new("acme-motors")?;
//! let outcome = orchestrator.initiate_next_pending(Some(&tenant), None).await?;
//! println!("provider call {}", outcome.provider_call_id);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod admission;
pub mod call;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod reconcile;
pub mod service;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::admission::AdmissionController;
    pub use crate::call::{CallRecord, CallStatus, TransitionUpdate};
    pub use crate::dispatch::{CallDispatcher, DispatchRequest, DispatchSuccess, HttpDispatcher};
    pub use crate::error::{DenialReason, Error, Result};
    pub use crate::metrics::CallMetrics;
    pub use crate::orchestrator::{CallInitiated, CallOrchestrator, OrchestratorDefaults};
    pub use crate::reconcile::{ProviderEvent, ReconcileOutcome, WebhookReconciler};
    pub use crate::service::{NewServiceRecord, ServiceRecord, TenantSettings};
    pub use crate::store::{CallStore, CasResult, ClaimResult, MemoryStore};
}
