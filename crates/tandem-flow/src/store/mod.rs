//! Storage abstraction for call lifecycle state.
//!
//! # Design Principles
//!
//! - **Tenant isolation**: every caller-facing read is tenant-scoped,
//!   with one documented exception for webhook correlation where the
//!   record found determines the tenant.
//! - **CAS everywhere**: all state transitions go through conditional
//!   writes, so no caller ever holds a lock across the provider call.
//! - **Atomic multi-field writes**: a transition and its fields (and the
//!   mirrored service record status) commit together; a reader never
//!   observes a terminal status without its report fields.
//!
//! # CAS Semantics
//!
//! [`CallStore::compare_and_transition`] updates a record only if its
//! current status equals the expected status. The result distinguishes
//! a missing record from a lost race so callers can map them to the
//! right outcome (not-found vs conflict vs idempotent no-op).
//!
//! [`CallStore::claim_for_dispatch`] is the Pending to InProgress CAS
//! fused with the tenant's concurrency ceiling. Checking the ceiling in
//! the same atomic step as the transition is what keeps the in-progress
//! count consistent under concurrent dispatch attempts; a separate
//! count-then-transition would over-admit.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tandem_core::{CallId, PhoneNumber, ProviderCallId, TenantId};

use crate::call::{CallRecord, CallStatus, TransitionUpdate};
use crate::error::Result;
use crate::service::{NewServiceRecord, ServiceRecord, TenantSettings};

/// Result of a compare-and-transition operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasResult {
    /// The record was in the expected status and has been transitioned.
    Success,
    /// No record with that id exists.
    NotFound,
    /// The record exists but is not in the expected status.
    StateMismatch {
        /// The status actually found.
        actual: CallStatus,
    },
}

impl CasResult {
    /// Returns true if the transition was applied.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if the record was not found.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Result of a dispatch claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    /// The record was `Pending`, the tenant had concurrency headroom,
    /// and the record is now `InProgress` with `dispatched_at` and the
    /// resolved phone number set.
    Claimed,
    /// No record with that id exists for that tenant.
    NotFound,
    /// Another actor already moved the record out of `Pending`.
    StateConflict {
        /// The status actually found.
        actual: CallStatus,
    },
    /// The tenant is at its in-progress ceiling; the record stays
    /// `Pending` and a later attempt may succeed.
    ConcurrencyExceeded {
        /// In-progress calls counted in the same atomic step.
        current: usize,
        /// Configured ceiling.
        limit: usize,
    },
}

/// Storage interface for call lifecycle state.
///
/// # Thread Safety
///
/// Implementations must be safe to share across request handlers
/// (`Send + Sync`); all methods take `&self`.
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Creates a `Pending` call for an existing service record.
    ///
    /// The store assigns the id and `created_at`. Fails with a
    /// validation error if the service record does not exist for the
    /// tenant.
    async fn insert_call(&self, tenant: &TenantId, service_record_id: i64) -> Result<CallRecord>;

    /// Creates a service record (collaborator seam; the intake subsystem
    /// and tests create work through this).
    async fn insert_service_record(&self, record: NewServiceRecord) -> Result<ServiceRecord>;

    /// Creates or replaces a tenant's settings.
    async fn upsert_tenant_settings(
        &self,
        tenant: &TenantId,
        settings: TenantSettings,
    ) -> Result<()>;

    /// Returns the oldest `Pending` record by `created_at`, ties broken
    /// by `id` ascending, optionally restricted to one tenant.
    async fn fetch_earliest_pending(&self, tenant: Option<&TenantId>)
        -> Result<Option<CallRecord>>;

    /// Tenant-scoped lookup by id.
    ///
    /// A record owned by a different tenant is indistinguishable from an
    /// absent one; cross-tenant existence never leaks.
    async fn fetch_by_id(&self, id: CallId, tenant: &TenantId) -> Result<Option<CallRecord>>;

    /// Lookup by the provider's call id, for webhook correlation.
    ///
    /// Not tenant-scoped: the caller does not yet know the tenant. The
    /// record found determines the tenant for everything that follows.
    async fn fetch_by_provider_call_id(
        &self,
        provider_call_id: &ProviderCallId,
    ) -> Result<Option<CallRecord>>;

    /// Tenant-scoped service record lookup.
    async fn fetch_service_record(
        &self,
        id: i64,
        tenant: &TenantId,
    ) -> Result<Option<ServiceRecord>>;

    /// Returns the tenant's settings, if any were configured.
    async fn fetch_tenant_settings(&self, tenant: &TenantId) -> Result<Option<TenantSettings>>;

    /// Counts records currently `InProgress` for the tenant.
    ///
    /// Advisory: the authoritative check is inside
    /// [`claim_for_dispatch`](Self::claim_for_dispatch).
    async fn count_in_progress(&self, tenant: &TenantId) -> Result<usize>;

    /// Atomically claims a `Pending` record for dispatch.
    ///
    /// In one step: verifies the record exists for the tenant, is
    /// `Pending`, and that the tenant's in-progress count is below
    /// `max_concurrent`; then transitions it to `InProgress`, stamping
    /// `dispatched_at = now` and the resolved phone number, and mirrors
    /// the status onto the linked service record.
    async fn claim_for_dispatch(
        &self,
        id: CallId,
        tenant: &TenantId,
        phone: PhoneNumber,
        max_concurrent: usize,
        now: DateTime<Utc>,
    ) -> Result<ClaimResult>;

    /// Atomically transitions a record from `expected` to `new`,
    /// applying `update` in the same write and mirroring the status onto
    /// the linked service record.
    ///
    /// Returns [`CasResult::StateMismatch`] without touching anything if
    /// the record is not in `expected`; invalid target states (e.g. out
    /// of a terminal state) are a validation error.
    async fn compare_and_transition(
        &self,
        id: CallId,
        expected: CallStatus,
        new: CallStatus,
        update: TransitionUpdate,
    ) -> Result<CasResult>;

    /// Returns `InProgress` records whose `dispatched_at` is older than
    /// `older_than`, across all tenants, for the stale-call sweep.
    async fn fetch_stale_in_progress(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<CallRecord>>;
}
