//! In-memory store implementation.
//!
//! This module provides [`MemoryStore`], an in-memory implementation of
//! the [`CallStore`] trait suitable for testing, development, and
//! single-process deployments.
//!
//! ## Limitations
//!
//! - **Single-process only**: state is not shared across process boundaries
//! - **No persistence**: all state is lost when the process exits

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tandem_core::{CallId, PhoneNumber, ProviderCallId, TenantId};

use super::{CallStore, CasResult, ClaimResult};
use crate::call::{CallRecord, CallStatus, TransitionUpdate};
use crate::error::{Error, Result};
use crate::service::{NewServiceRecord, ServiceRecord, TenantSettings};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

#[derive(Debug, Default)]
struct Inner {
    calls: HashMap<CallId, CallRecord>,
    service_records: HashMap<i64, ServiceRecord>,
    settings: HashMap<TenantId, TenantSettings>,
    next_call_id: i64,
    next_service_record_id: i64,
}

impl Inner {
    /// Mirrors a call status onto the linked service record.
    ///
    /// Runs inside the same write-lock section as the call transition,
    /// so both updates commit together.
    fn mirror_service_status(&mut self, service_record_id: i64, status: CallStatus) {
        if let Some(service) = self.service_records.get_mut(&service_record_id) {
            service.status = status;
        }
    }

    fn count_in_progress(&self, tenant: &TenantId) -> usize {
        self.calls
            .values()
            .filter(|c| c.status == CallStatus::InProgress && c.tenant_id == *tenant)
            .count()
    }
}

/// Applies the optional fields of a transition update to a record.
fn apply_update(record: &mut CallRecord, update: TransitionUpdate) {
    let TransitionUpdate {
        phone_number,
        provider_call_id,
        dispatched_at,
        ended_at,
        ended_reason,
        cost,
        transcript_ref,
        summary_ref,
    } = update;
    if phone_number.is_some() {
        record.phone_number = phone_number;
    }
    if provider_call_id.is_some() {
        record.provider_call_id = provider_call_id;
    }
    if dispatched_at.is_some() {
        record.dispatched_at = dispatched_at;
    }
    if ended_at.is_some() {
        record.ended_at = ended_at;
    }
    if ended_reason.is_some() {
        record.ended_reason = ended_reason;
    }
    if cost.is_some() {
        record.cost = cost;
    }
    if transcript_ref.is_some() {
        record.transcript_ref = transcript_ref;
    }
    if summary_ref.is_some() {
        record.summary_ref = summary_ref;
    }
}

/// In-memory call store.
///
/// One `RwLock` guards all collections, so a call transition and its
/// service-record mirror are a single atomic section.
///
/// ## Example
///
/// ```rust
/// use tandem_flow::store::MemoryStore;
///
/// let store = MemoryStore::new();
/// // Use store in tests or as the default backend...
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of calls currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn call_count(&self) -> Result<usize> {
        let count = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner.calls.len()
        };
        Ok(count)
    }

    /// Replaces a call record wholesale. Test seam for backdating
    /// timestamps; bypasses id assignment and transition checks.
    pub(crate) fn put_call(&self, record: CallRecord) -> Result<()> {
        {
            let mut inner = self.inner.write().map_err(poison_err)?;
            let id = record.id;
            inner.calls.insert(id, record);
        }
        Ok(())
    }
}

#[async_trait]
impl CallStore for MemoryStore {
    async fn insert_call(&self, tenant: &TenantId, service_record_id: i64) -> Result<CallRecord> {
        let mut inner = self.inner.write().map_err(poison_err)?;

        let owned_by_tenant = inner
            .service_records
            .get(&service_record_id)
            .is_some_and(|s| s.tenant_id == *tenant);
        if !owned_by_tenant {
            drop(inner);
            return Err(Error::validation(format!(
                "service record {service_record_id} does not exist for tenant {tenant}"
            )));
        }

        inner.next_call_id += 1;
        let record = CallRecord::new_pending(
            CallId::from_i64(inner.next_call_id),
            tenant.clone(),
            service_record_id,
            Utc::now(),
        );
        inner.calls.insert(record.id, record.clone());
        drop(inner);
        Ok(record)
    }

    async fn insert_service_record(&self, record: NewServiceRecord) -> Result<ServiceRecord> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        inner.next_service_record_id += 1;
        let service = ServiceRecord {
            id: inner.next_service_record_id,
            tenant_id: record.tenant_id,
            customer_name: record.customer_name,
            phone_number: record.phone_number,
            service_type: record.service_type,
            advisor_name: record.advisor_name,
            status: CallStatus::Pending,
        };
        inner.service_records.insert(service.id, service.clone());
        drop(inner);
        Ok(service)
    }

    async fn upsert_tenant_settings(
        &self,
        tenant: &TenantId,
        settings: TenantSettings,
    ) -> Result<()> {
        {
            let mut inner = self.inner.write().map_err(poison_err)?;
            inner.settings.insert(tenant.clone(), settings);
        }
        Ok(())
    }

    async fn fetch_earliest_pending(
        &self,
        tenant: Option<&TenantId>,
    ) -> Result<Option<CallRecord>> {
        let result = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner
                .calls
                .values()
                .filter(|c| c.status == CallStatus::Pending)
                .filter(|c| tenant.is_none_or(|t| c.tenant_id == *t))
                .min_by(|a, b| {
                    a.created_at
                        .cmp(&b.created_at)
                        .then_with(|| a.id.cmp(&b.id))
                })
                .cloned()
        };
        Ok(result)
    }

    async fn fetch_by_id(&self, id: CallId, tenant: &TenantId) -> Result<Option<CallRecord>> {
        let result = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner
                .calls
                .get(&id)
                .filter(|c| c.tenant_id == *tenant)
                .cloned()
        };
        Ok(result)
    }

    async fn fetch_by_provider_call_id(
        &self,
        provider_call_id: &ProviderCallId,
    ) -> Result<Option<CallRecord>> {
        let result = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner
                .calls
                .values()
                .find(|c| c.provider_call_id.as_ref() == Some(provider_call_id))
                .cloned()
        };
        Ok(result)
    }

    async fn fetch_service_record(
        &self,
        id: i64,
        tenant: &TenantId,
    ) -> Result<Option<ServiceRecord>> {
        let result = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner
                .service_records
                .get(&id)
                .filter(|s| s.tenant_id == *tenant)
                .cloned()
        };
        Ok(result)
    }

    async fn fetch_tenant_settings(&self, tenant: &TenantId) -> Result<Option<TenantSettings>> {
        let result = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner.settings.get(tenant).cloned()
        };
        Ok(result)
    }

    async fn count_in_progress(&self, tenant: &TenantId) -> Result<usize> {
        let count = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner.count_in_progress(tenant)
        };
        Ok(count)
    }

    async fn claim_for_dispatch(
        &self,
        id: CallId,
        tenant: &TenantId,
        phone: PhoneNumber,
        max_concurrent: usize,
        now: DateTime<Utc>,
    ) -> Result<ClaimResult> {
        let mut inner = self.inner.write().map_err(poison_err)?;

        let Some(record) = inner.calls.get(&id).filter(|c| c.tenant_id == *tenant) else {
            drop(inner);
            return Ok(ClaimResult::NotFound);
        };

        if record.status != CallStatus::Pending {
            let actual = record.status;
            drop(inner);
            return Ok(ClaimResult::StateConflict { actual });
        }

        // Counted under the same write lock as the transition below, so
        // two concurrent claims can never both observe headroom.
        let current = inner.count_in_progress(tenant);
        if current >= max_concurrent {
            drop(inner);
            return Ok(ClaimResult::ConcurrencyExceeded {
                current,
                limit: max_concurrent,
            });
        }

        let service_record_id = {
            let record = inner
                .calls
                .get_mut(&id)
                .ok_or_else(|| Error::storage("record vanished under write lock"))?;
            record.status = CallStatus::InProgress;
            record.dispatched_at = Some(now);
            record.phone_number = Some(phone);
            record.service_record_id
        };
        inner.mirror_service_status(service_record_id, CallStatus::InProgress);
        drop(inner);
        Ok(ClaimResult::Claimed)
    }

    async fn compare_and_transition(
        &self,
        id: CallId,
        expected: CallStatus,
        new: CallStatus,
        update: TransitionUpdate,
    ) -> Result<CasResult> {
        let mut inner = self.inner.write().map_err(poison_err)?;

        let Some(record) = inner.calls.get_mut(&id) else {
            drop(inner);
            return Ok(CasResult::NotFound);
        };

        if record.status != expected {
            let actual = record.status;
            drop(inner);
            return Ok(CasResult::StateMismatch { actual });
        }

        if !expected.can_transition_to(new) {
            drop(inner);
            return Err(Error::validation(format!(
                "invalid transition {expected} -> {new}"
            )));
        }

        record.status = new;
        apply_update(record, update);
        let service_record_id = record.service_record_id;
        inner.mirror_service_status(service_record_id, new);
        drop(inner);
        Ok(CasResult::Success)
    }

    async fn fetch_stale_in_progress(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<CallRecord>> {
        let mut result = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner
                .calls
                .values()
                .filter(|c| c.status == CallStatus::InProgress)
                .filter(|c| c.dispatched_at.is_some_and(|t| t < older_than))
                .cloned()
                .collect::<Vec<_>>()
        };
        result.sort_by_key(|c| (c.dispatched_at, c.id));
        Ok(result)
    }
}
