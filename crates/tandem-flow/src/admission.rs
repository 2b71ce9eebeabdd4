//! Per-tenant admission control for outbound dispatch.
//!
//! Two independent gates:
//!
//! - **Rate**: a sliding window of dispatch timestamps per tenant.
//!   Expired timestamps are pruned lazily on each check; no background
//!   sweep is needed for correctness, and pruning on access bounds the
//!   per-tenant memory to `limit` entries.
//! - **Concurrency**: a count of the tenant's `InProgress` records.
//!   This gate is advisory, a fast refusal before any provider traffic.
//!   The authoritative check runs inside
//!   [`CallStore::claim_for_dispatch`](crate::store::CallStore::claim_for_dispatch),
//!   where the count and the transition share one atomic step; checking
//!   here and transitioning there would otherwise over-admit under
//!   concurrent dispatch attempts.
//!
//! The controller is an owned component: construct one at process start
//! and hand out references. Window state is process-local and rebuilt
//! empty on restart.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tandem_core::TenantId;

use crate::error::{Error, Result};
use crate::store::CallStore;

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("admission lock poisoned")
}

/// Sliding-window rate limiter and concurrency gate, keyed by tenant.
pub struct AdmissionController {
    windows: Mutex<HashMap<TenantId, VecDeque<Instant>>>,
    store: Arc<dyn CallStore>,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("windows", &self.windows)
            .field("store", &"<dyn CallStore>")
            .finish()
    }
}

impl AdmissionController {
    /// Creates a controller over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn CallStore>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Attempts to admit one dispatch for the tenant.
    ///
    /// Returns true and records the dispatch timestamp if fewer than
    /// `limit` admitted timestamps fall inside the trailing
    /// `window_seconds`; returns false and records nothing otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the window lock is poisoned.
    pub fn try_acquire(
        &self,
        tenant: &TenantId,
        limit: u32,
        window_seconds: u64,
    ) -> Result<bool> {
        self.acquire_at(tenant, limit, window_seconds, Instant::now())
    }

    /// Seconds until the tenant's window frees a slot.
    ///
    /// Zero when a dispatch would be admitted right now.
    ///
    /// # Errors
    ///
    /// Returns an error if the window lock is poisoned.
    pub fn time_until_reset(&self, tenant: &TenantId, window_seconds: u64) -> Result<Duration> {
        self.time_until_reset_at(tenant, window_seconds, Instant::now())
    }

    /// Advisory concurrency gate: true if the tenant's `InProgress`
    /// count is below `max_concurrent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub async fn try_acquire_concurrency(
        &self,
        tenant: &TenantId,
        max_concurrent: usize,
    ) -> Result<bool> {
        let current = self.store.count_in_progress(tenant).await?;
        Ok(current < max_concurrent)
    }

    /// Clock-injected body of [`try_acquire`](Self::try_acquire).
    pub(crate) fn acquire_at(
        &self,
        tenant: &TenantId,
        limit: u32,
        window_seconds: u64,
        now: Instant,
    ) -> Result<bool> {
        let window = Duration::from_secs(window_seconds);
        let mut windows = self.windows.lock().map_err(poison_err)?;
        let timestamps = windows.entry(tenant.clone()).or_default();
        prune(timestamps, window, now);

        if timestamps.len() >= limit as usize {
            return Ok(false);
        }
        timestamps.push_back(now);
        Ok(true)
    }

    /// Clock-injected body of [`time_until_reset`](Self::time_until_reset).
    pub(crate) fn time_until_reset_at(
        &self,
        tenant: &TenantId,
        window_seconds: u64,
        now: Instant,
    ) -> Result<Duration> {
        let window = Duration::from_secs(window_seconds);
        let mut windows = self.windows.lock().map_err(poison_err)?;
        let Some(timestamps) = windows.get_mut(tenant) else {
            return Ok(Duration::ZERO);
        };
        prune(timestamps, window, now);
        let oldest = timestamps.front().copied();
        if timestamps.is_empty() {
            windows.remove(tenant);
        }
        let Some(oldest) = oldest else {
            return Ok(Duration::ZERO);
        };
        Ok((oldest + window).saturating_duration_since(now))
    }
}

/// Drops timestamps that have aged out of the window.
fn prune(timestamps: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while timestamps
        .front()
        .is_some_and(|&t| t + window <= now)
    {
        timestamps.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::store::MemoryStore;

    use super::*;

    fn controller() -> AdmissionController {
        AdmissionController::new(Arc::new(MemoryStore::new()))
    }

    fn tenant(name: &str) -> TenantId {
        TenantId::new_unchecked(name)
    }

    #[test]
    fn three_then_denied_then_reset() {
        let admission = controller();
        let acme = tenant("acme-motors");
        let t0 = Instant::now();

        let results: Vec<bool> = (0..4)
            .map(|_| admission.acquire_at(&acme, 3, 60, t0).unwrap())
            .collect();
        assert_eq!(results, vec![true, true, true, false]);

        // The full window elapses; the oldest timestamps expire.
        let later = t0 + Duration::from_secs(60);
        assert!(admission.acquire_at(&acme, 3, 60, later).unwrap());
    }

    #[test]
    fn windows_are_per_tenant() {
        let admission = controller();
        let acme = tenant("acme-motors");
        let rival = tenant("rival-autos");
        let t0 = Instant::now();

        assert!(admission.acquire_at(&acme, 1, 60, t0).unwrap());
        assert!(!admission.acquire_at(&acme, 1, 60, t0).unwrap());
        assert!(admission.acquire_at(&rival, 1, 60, t0).unwrap());
    }

    #[test]
    fn refused_attempts_do_not_extend_the_window() {
        let admission = controller();
        let acme = tenant("acme-motors");
        let t0 = Instant::now();

        assert!(admission.acquire_at(&acme, 1, 60, t0).unwrap());
        // Hammering while denied must not push the reset point out.
        for i in 1..=10 {
            let now = t0 + Duration::from_secs(i);
            assert!(!admission.acquire_at(&acme, 1, 60, now).unwrap());
        }
        assert!(admission
            .acquire_at(&acme, 1, 60, t0 + Duration::from_secs(60))
            .unwrap());
    }

    #[test]
    fn time_until_reset_reports_oldest_expiry() {
        let admission = controller();
        let acme = tenant("acme-motors");
        let t0 = Instant::now();

        assert_eq!(
            admission.time_until_reset_at(&acme, 60, t0).unwrap(),
            Duration::ZERO
        );

        admission.acquire_at(&acme, 3, 60, t0).unwrap();
        admission
            .acquire_at(&acme, 3, 60, t0 + Duration::from_secs(10))
            .unwrap();
        admission
            .acquire_at(&acme, 3, 60, t0 + Duration::from_secs(20))
            .unwrap();

        let reset = admission
            .time_until_reset_at(&acme, 60, t0 + Duration::from_secs(30))
            .unwrap();
        assert_eq!(reset, Duration::from_secs(30));
    }

    #[test]
    fn reset_is_zero_once_window_expires() {
        let admission = controller();
        let acme = tenant("acme-motors");
        let t0 = Instant::now();
        admission.acquire_at(&acme, 1, 60, t0).unwrap();

        let reset = admission
            .time_until_reset_at(&acme, 60, t0 + Duration::from_secs(61))
            .unwrap();
        assert_eq!(reset, Duration::ZERO);
    }

    #[tokio::test]
    async fn concurrency_gate_reads_in_progress_count() {
        use chrono::Utc;
        use tandem_core::PhoneNumber;

        use crate::service::NewServiceRecord;
        use crate::store::CallStore;

        let store = Arc::new(MemoryStore::new());
        let admission = AdmissionController::new(store.clone());
        let acme = tenant("acme-motors");

        assert!(admission.try_acquire_concurrency(&acme, 1).await.unwrap());

        let service = store
            .insert_service_record(NewServiceRecord {
                tenant_id: acme.clone(),
                customer_name: "Jordan".to_string(),
                phone_number: None,
                service_type: None,
                advisor_name: None,
            })
            .await
            .unwrap();
        let call = store.insert_call(&acme, service.id).await.unwrap();
        store
            .claim_for_dispatch(
                call.id,
                &acme,
                PhoneNumber::new_unchecked("+15551234567"),
                5,
                Utc::now(),
            )
            .await
            .unwrap();

        assert!(!admission.try_acquire_concurrency(&acme, 1).await.unwrap());
        assert!(admission.try_acquire_concurrency(&acme, 2).await.unwrap());
    }
}
