//! Call lifecycle orchestration.
//!
//! The orchestrator drives a call from `Pending` to a live provider
//! dispatch:
//!
//! 1. **Select** the record (earliest pending, or a specific id)
//! 2. **Resolve** the outbound phone number (override, then service
//!    record, then tenant default)
//! 3. **Admit** through the rate window and the concurrency ceiling
//! 4. **Claim** the record (`Pending` to `InProgress`, atomically)
//! 5. **Dispatch** to the provider and record its call id
//!
//! The claim happens *before* the provider call, so a record is never
//! dispatched twice: whichever caller wins the claim owns the dispatch,
//! and every loser gets a conflict without reaching the provider. A
//! dispatch that then fails moves the record to `Failed`; a dispatch
//! that succeeds leaves it `InProgress` until the webhook reconciler
//! delivers the terminal outcome.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use tandem_core::{CallId, PhoneNumber, TenantId};

use crate::admission::AdmissionController;
use crate::call::{CallRecord, CallStatus, TransitionUpdate};
use crate::dispatch::{CallDispatcher, DispatchRequest};
use crate::error::{DenialReason, Error, Result};
use crate::metrics::{CallMetrics, TimingGuard};
use crate::service::{ServiceRecord, TenantSettings};
use crate::store::{CallStore, CasResult, ClaimResult};

/// `ended_reason` recorded when the provider rejects a dispatch.
pub const DISPATCH_FAILED_REASON: &str = "dispatch-failed";

/// `ended_reason` recorded by the stale-call sweep.
pub const STALE_SWEEP_REASON: &str = "call-timeout-exceeded";

/// Process-wide admission limits, applied when a tenant has no
/// stored overrides.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorDefaults {
    /// Dispatches allowed per rate window.
    pub rate_limit: u32,
    /// Rate window length in seconds.
    pub rate_window_secs: u64,
    /// Simultaneous in-progress calls allowed per tenant.
    pub max_concurrent_calls: usize,
}

impl Default for OrchestratorDefaults {
    fn default() -> Self {
        Self {
            rate_limit: 10,
            rate_window_secs: 60,
            max_concurrent_calls: 5,
        }
    }
}

/// Limits for one tenant after applying stored overrides.
#[derive(Debug, Clone, Copy)]
struct EffectiveLimits {
    rate_limit: u32,
    rate_window_secs: u64,
    max_concurrent_calls: usize,
}

impl EffectiveLimits {
    fn resolve(defaults: OrchestratorDefaults, settings: &TenantSettings) -> Self {
        Self {
            rate_limit: settings.rate_limit.unwrap_or(defaults.rate_limit),
            rate_window_secs: settings.rate_window_secs.unwrap_or(defaults.rate_window_secs),
            max_concurrent_calls: settings
                .max_concurrent_calls
                .unwrap_or(defaults.max_concurrent_calls),
        }
    }
}

/// Outcome of a successful initiation.
#[derive(Debug, Clone)]
pub struct CallInitiated {
    /// The record that was dispatched.
    pub call_id: CallId,
    /// Provider-assigned id for the live call.
    pub provider_call_id: tandem_core::ProviderCallId,
    /// The provider's raw response body.
    pub provider_response: serde_json::Value,
}

/// Coordinates the store, admission gates, and provider dispatcher.
pub struct CallOrchestrator {
    store: Arc<dyn CallStore>,
    dispatcher: Arc<dyn CallDispatcher>,
    admission: Arc<AdmissionController>,
    defaults: OrchestratorDefaults,
    metrics: CallMetrics,
}

impl fmt::Debug for CallOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOrchestrator")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl CallOrchestrator {
    /// Creates an orchestrator with default admission limits.
    #[must_use]
    pub fn new(
        store: Arc<dyn CallStore>,
        dispatcher: Arc<dyn CallDispatcher>,
        admission: Arc<AdmissionController>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            admission,
            defaults: OrchestratorDefaults::default(),
            metrics: CallMetrics::new(),
        }
    }

    /// Replaces the process-wide admission limits.
    #[must_use]
    pub fn with_defaults(mut self, defaults: OrchestratorDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Dispatches the oldest `Pending` call, optionally restricted to
    /// one tenant.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no pending call exists in scope
    /// - [`Error::Validation`] if no phone number can be resolved
    /// - [`Error::AdmissionDenied`] if an admission gate refuses; the
    ///   record stays `Pending`
    /// - [`Error::Conflict`] if another caller claimed the record first
    /// - [`Error::Dispatch`] if the provider rejects the call; the
    ///   record moves to `Failed`
    pub async fn initiate_next_pending(
        &self,
        tenant: Option<&TenantId>,
        phone_override: Option<PhoneNumber>,
    ) -> Result<CallInitiated> {
        let record = self
            .store
            .fetch_earliest_pending(tenant)
            .await?
            .ok_or_else(|| {
                let scope =
                    tenant.map_or_else(|| "any tenant".to_owned(), |t| format!("tenant {t}"));
                Error::not_found("pending call", scope)
            })?;

        debug!(call_id = %record.id, tenant = %record.tenant_id, "selected earliest pending call");
        self.initiate(record, phone_override).await
    }

    /// Dispatches one specific call for the tenant.
    ///
    /// The record must currently be `Pending`; anything else is a
    /// conflict, including records that already completed. Re-dispatch
    /// of a finished call is deliberately not supported here; create a
    /// new call for the same service record instead.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`Self::initiate_next_pending`], with
    /// [`Error::NotFound`] covering ids owned by other tenants.
    pub async fn initiate_specific(
        &self,
        call_id: CallId,
        tenant: &TenantId,
        phone_override: Option<PhoneNumber>,
    ) -> Result<CallInitiated> {
        let record = self
            .store
            .fetch_by_id(call_id, tenant)
            .await?
            .ok_or_else(|| Error::not_found("call", call_id))?;

        self.initiate(record, phone_override).await
    }

    /// Fails `InProgress` calls whose dispatch is older than `max_age`.
    ///
    /// Covers webhooks that never arrive: the record would otherwise
    /// hold a concurrency slot forever. Swept calls get
    /// [`STALE_SWEEP_REASON`] as their `ended_reason`. A webhook racing
    /// the sweep simply wins its CAS first and the sweep skips the
    /// record.
    ///
    /// Returns the number of calls swept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `max_age` does not fit a
    /// timestamp offset, or [`Error::Storage`] if the store fails.
    pub async fn fail_stale_calls(&self, max_age: Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|_| Error::validation("stale-call max age out of range"))?;
        let cutoff = Utc::now() - max_age;

        let stale = self.store.fetch_stale_in_progress(cutoff).await?;
        let mut swept: u64 = 0;
        for call in stale {
            let update = TransitionUpdate::ended(STALE_SWEEP_REASON, Utc::now());
            let cas = self
                .store
                .compare_and_transition(call.id, CallStatus::InProgress, CallStatus::Failed, update)
                .await?;
            match cas {
                CasResult::Success => {
                    swept += 1;
                    self.metrics.record_transition(
                        CallStatus::InProgress.as_label(),
                        CallStatus::Failed.as_label(),
                    );
                    warn!(
                        call_id = %call.id,
                        tenant = %call.tenant_id,
                        dispatched_at = ?call.dispatched_at,
                        "swept stale in-progress call"
                    );
                }
                // A concurrent webhook delivered the real outcome.
                CasResult::StateMismatch { .. } | CasResult::NotFound => {}
            }
        }

        if swept > 0 {
            self.metrics.record_swept(swept);
        }
        Ok(usize::try_from(swept).unwrap_or(usize::MAX))
    }

    /// Shared initiation path once a record has been selected.
    async fn initiate(
        &self,
        record: CallRecord,
        phone_override: Option<PhoneNumber>,
    ) -> Result<CallInitiated> {
        let tenant = record.tenant_id.clone();

        let settings = self
            .store
            .fetch_tenant_settings(&tenant)
            .await?
            .unwrap_or_default();
        let service = self
            .store
            .fetch_service_record(record.service_record_id, &tenant)
            .await?
            .ok_or_else(|| {
                Error::validation(format!(
                    "call {} references missing service record {}",
                    record.id, record.service_record_id
                ))
            })?;

        let phone = resolve_phone(&record, phone_override, &service, &settings)?;
        let limits = EffectiveLimits::resolve(self.defaults, &settings);

        self.check_rate(&tenant, limits)?;
        self.check_concurrency(&tenant, limits).await?;

        // The authoritative admission: CAS and ceiling commit in one
        // atomic step, so the advisory checks above can be stale
        // without over-admitting.
        match self
            .store
            .claim_for_dispatch(
                record.id,
                &tenant,
                phone.clone(),
                limits.max_concurrent_calls,
                Utc::now(),
            )
            .await?
        {
            ClaimResult::Claimed => {
                self.metrics.record_transition(
                    CallStatus::Pending.as_label(),
                    CallStatus::InProgress.as_label(),
                );
            }
            ClaimResult::NotFound => {
                return Err(Error::not_found("call", record.id));
            }
            ClaimResult::StateConflict { actual } => {
                debug!(call_id = %record.id, %actual, "lost the dispatch claim");
                return Err(Error::Conflict {
                    id: record.id,
                    expected: CallStatus::Pending,
                    actual,
                });
            }
            ClaimResult::ConcurrencyExceeded { current, limit } => {
                self.metrics.record_admission_denied("concurrency");
                return Err(Error::AdmissionDenied {
                    reason: DenialReason::MaxConcurrent { current, limit },
                });
            }
        }

        let request = DispatchRequest {
            call_id: record.id,
            tenant_id: tenant.clone(),
            phone_number: phone,
            customer_name: service.customer_name.clone(),
            service_type: service.service_type.clone(),
            advisor_name: service.advisor_name.clone(),
            location_name: settings.location_name.clone(),
            review_link: settings.review_link.clone(),
        };

        let dispatched = {
            let metrics = self.metrics.clone();
            let _timing = TimingGuard::new(move |elapsed| metrics.observe_dispatch_duration(elapsed));
            self.dispatcher.dispatch(&request).await
        };

        match dispatched {
            Ok(success) => {
                self.metrics.record_dispatch("success");
                self.record_provider_call_id(record.id, &success.provider_call_id)
                    .await;
                info!(
                    call_id = %record.id,
                    tenant = %tenant,
                    provider_call_id = %success.provider_call_id,
                    "call dispatched"
                );
                Ok(CallInitiated {
                    call_id: record.id,
                    provider_call_id: success.provider_call_id,
                    provider_response: success.raw,
                })
            }
            Err(err) => {
                self.metrics.record_dispatch("failure");
                self.fail_after_dispatch_error(record.id, &tenant).await;
                Err(err)
            }
        }
    }

    /// Rate-window gate. Denials carry a retry hint from the window.
    fn check_rate(&self, tenant: &TenantId, limits: EffectiveLimits) -> Result<()> {
        if self
            .admission
            .try_acquire(tenant, limits.rate_limit, limits.rate_window_secs)?
        {
            return Ok(());
        }

        let retry_after = self
            .admission
            .time_until_reset(tenant, limits.rate_window_secs)?;
        self.metrics.record_admission_denied("rate");
        Err(Error::AdmissionDenied {
            reason: DenialReason::RateLimited {
                limit: limits.rate_limit,
                window_secs: limits.rate_window_secs,
                retry_after_secs: ceil_secs(retry_after),
            },
        })
    }

    /// Advisory concurrency gate; fails fast before any state is
    /// touched. The claim re-checks the ceiling atomically.
    async fn check_concurrency(&self, tenant: &TenantId, limits: EffectiveLimits) -> Result<()> {
        if self
            .admission
            .try_acquire_concurrency(tenant, limits.max_concurrent_calls)
            .await?
        {
            return Ok(());
        }

        let current = self.store.count_in_progress(tenant).await?;
        self.metrics.record_admission_denied("concurrency");
        Err(Error::AdmissionDenied {
            reason: DenialReason::MaxConcurrent {
                current,
                limit: limits.max_concurrent_calls,
            },
        })
    }

    /// Records the provider's call id on the already-claimed record.
    ///
    /// Runs as `InProgress` to `InProgress` so a terminal webhook that
    /// raced ahead is never overwritten; losing that race is benign and
    /// the webhook's fields stand.
    async fn record_provider_call_id(
        &self,
        call_id: CallId,
        provider_call_id: &tandem_core::ProviderCallId,
    ) {
        let update = TransitionUpdate::dispatched(provider_call_id.clone());
        match self
            .store
            .compare_and_transition(call_id, CallStatus::InProgress, CallStatus::InProgress, update)
            .await
        {
            Ok(CasResult::Success) => {}
            Ok(CasResult::StateMismatch { actual }) => {
                debug!(
                    %call_id,
                    %actual,
                    "call reached a terminal status before its provider id was recorded"
                );
            }
            Ok(CasResult::NotFound) => {
                warn!(%call_id, "call record disappeared while recording provider id");
            }
            Err(err) => {
                warn!(%call_id, error = %err, "failed to record provider call id");
            }
        }
    }

    /// Moves a claimed record to `Failed` after the provider rejected
    /// the dispatch. Best effort: the dispatch error is what the caller
    /// sees either way.
    async fn fail_after_dispatch_error(&self, call_id: CallId, tenant: &TenantId) {
        let update = TransitionUpdate::ended(DISPATCH_FAILED_REASON, Utc::now());
        match self
            .store
            .compare_and_transition(call_id, CallStatus::InProgress, CallStatus::Failed, update)
            .await
        {
            Ok(CasResult::Success) => {
                self.metrics.record_transition(
                    CallStatus::InProgress.as_label(),
                    CallStatus::Failed.as_label(),
                );
                warn!(%call_id, tenant = %tenant, "call failed: provider rejected the dispatch");
            }
            Ok(CasResult::StateMismatch { actual }) => {
                warn!(%call_id, %actual, "dispatch failed but the call had already moved");
            }
            Ok(CasResult::NotFound) => {
                warn!(%call_id, "call record disappeared after failed dispatch");
            }
            Err(err) => {
                warn!(%call_id, error = %err, "failed to mark call failed after dispatch error");
            }
        }
    }
}

/// Applies the phone resolution order: explicit override, then the
/// service record's number, then the tenant default.
fn resolve_phone(
    call: &CallRecord,
    phone_override: Option<PhoneNumber>,
    service: &ServiceRecord,
    settings: &TenantSettings,
) -> Result<PhoneNumber> {
    phone_override
        .or_else(|| service.phone_number.clone())
        .or_else(|| settings.default_phone_number.clone())
        .ok_or_else(|| {
            Error::validation(format!(
                "call {} has no phone number: no override, no service record number, no tenant default",
                call.id
            ))
        })
}

/// Rounds a duration up to whole seconds for `Retry-After` style hints.
fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchSuccess;
    use crate::service::NewServiceRecord;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tandem_core::ProviderCallId;

    struct MockDispatcher {
        count: AtomicUsize,
        requests: Mutex<Vec<DispatchRequest>>,
        fail: bool,
    }

    impl MockDispatcher {
        fn succeeding() -> Arc<Self> {
            Arc::new(Self {
                count: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                count: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                fail: true,
            })
        }

        fn dispatch_count(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }

        fn last_request(&self) -> DispatchRequest {
            self.requests
                .lock()
                .unwrap()
                .last()
                .cloned()
                .expect("no dispatch was captured")
        }
    }

    #[async_trait]
    impl CallDispatcher for MockDispatcher {
        async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchSuccess> {
            let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(Error::dispatch("mock provider refused the call"));
            }
            let id = format!("prov-{n}");
            Ok(DispatchSuccess {
                provider_call_id: ProviderCallId::new_unchecked(&id),
                raw: json!({ "id": id, "status": "queued" }),
            })
        }
    }

    fn tenant() -> TenantId {
        TenantId::new("acme-motors").unwrap()
    }

    fn phone(value: &str) -> PhoneNumber {
        PhoneNumber::new(value).unwrap()
    }

    fn orchestrator(
        store: &Arc<MemoryStore>,
        dispatcher: Arc<MockDispatcher>,
    ) -> CallOrchestrator {
        let admission = Arc::new(AdmissionController::new(store.clone()));
        CallOrchestrator::new(store.clone(), dispatcher, admission)
    }

    async fn seed_call(
        store: &MemoryStore,
        tenant: &TenantId,
        service_phone: Option<&str>,
    ) -> CallRecord {
        let service = store
            .insert_service_record(NewServiceRecord {
                tenant_id: tenant.clone(),
                customer_name: "Jordan Blake".to_owned(),
                phone_number: service_phone.map(phone),
                service_type: Some("oil change".to_owned()),
                advisor_name: Some("Sam".to_owned()),
            })
            .await
            .unwrap();
        store.insert_call(tenant, service.id).await.unwrap()
    }

    #[tokio::test]
    async fn initiates_earliest_pending_and_records_provider_id() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = MockDispatcher::succeeding();
        let orch = orchestrator(&store, dispatcher.clone());
        let acme = tenant();

        let call = seed_call(&store, &acme, Some("+15551234567")).await;

        let outcome = orch.initiate_next_pending(Some(&acme), None).await.unwrap();
        assert_eq!(outcome.call_id, call.id);
        assert_eq!(outcome.provider_call_id.as_str(), "prov-1");
        assert_eq!(outcome.provider_response["status"], "queued");

        let stored = store.fetch_by_id(call.id, &acme).await.unwrap().unwrap();
        assert_eq!(stored.status, CallStatus::InProgress);
        assert_eq!(
            stored.provider_call_id,
            Some(ProviderCallId::new_unchecked("prov-1"))
        );
        assert!(stored.dispatched_at.is_some());
        assert_eq!(stored.phone_number, Some(phone("+15551234567")));

        let request = dispatcher.last_request();
        assert_eq!(request.call_id, call.id);
        assert_eq!(request.customer_name, "Jordan Blake");
        assert_eq!(request.tenant_id, acme);
    }

    #[tokio::test]
    async fn initiate_next_pending_without_work_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let orch = orchestrator(&store, MockDispatcher::succeeding());

        let err = orch
            .initiate_next_pending(Some(&tenant()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn initiate_specific_is_tenant_scoped() {
        let store = Arc::new(MemoryStore::new());
        let orch = orchestrator(&store, MockDispatcher::succeeding());
        let acme = tenant();
        let rival = TenantId::new("rival-motors").unwrap();

        let call = seed_call(&store, &acme, Some("+15551234567")).await;

        let err = orch
            .initiate_specific(call.id, &rival, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn phone_override_beats_service_record_number() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = MockDispatcher::succeeding();
        let orch = orchestrator(&store, dispatcher.clone());
        let acme = tenant();

        let call = seed_call(&store, &acme, Some("+15551234567")).await;
        orch.initiate_specific(call.id, &acme, Some(phone("+15559990000")))
            .await
            .unwrap();

        assert_eq!(
            dispatcher.last_request().phone_number,
            phone("+15559990000")
        );
        let stored = store.fetch_by_id(call.id, &acme).await.unwrap().unwrap();
        assert_eq!(stored.phone_number, Some(phone("+15559990000")));
    }

    #[tokio::test]
    async fn tenant_default_phone_is_the_last_resort() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = MockDispatcher::succeeding();
        let orch = orchestrator(&store, dispatcher.clone());
        let acme = tenant();

        store
            .upsert_tenant_settings(
                &acme,
                TenantSettings {
                    default_phone_number: Some(phone("+15550001111")),
                    ..TenantSettings::default()
                },
            )
            .await
            .unwrap();

        let call = seed_call(&store, &acme, None).await;
        orch.initiate_specific(call.id, &acme, None).await.unwrap();

        assert_eq!(
            dispatcher.last_request().phone_number,
            phone("+15550001111")
        );
    }

    #[tokio::test]
    async fn unresolvable_phone_is_a_validation_error() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = MockDispatcher::succeeding();
        let orch = orchestrator(&store, dispatcher.clone());
        let acme = tenant();

        let call = seed_call(&store, &acme, None).await;
        let err = orch.initiate_specific(call.id, &acme, None).await.unwrap_err();

        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(dispatcher.dispatch_count(), 0);
        // The record was never claimed.
        let stored = store.fetch_by_id(call.id, &acme).await.unwrap().unwrap();
        assert_eq!(stored.status, CallStatus::Pending);
    }

    #[tokio::test]
    async fn rate_denial_leaves_the_record_pending() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = MockDispatcher::succeeding();
        let orch = orchestrator(&store, dispatcher.clone()).with_defaults(OrchestratorDefaults {
            rate_limit: 1,
            rate_window_secs: 60,
            max_concurrent_calls: 10,
        });
        let acme = tenant();

        let first = seed_call(&store, &acme, Some("+15551234567")).await;
        let second = seed_call(&store, &acme, Some("+15551234567")).await;

        orch.initiate_specific(first.id, &acme, None).await.unwrap();
        let err = orch
            .initiate_specific(second.id, &acme, None)
            .await
            .unwrap_err();

        match err {
            Error::AdmissionDenied {
                reason: DenialReason::RateLimited { limit, retry_after_secs, .. },
            } => {
                assert_eq!(limit, 1);
                assert!(retry_after_secs > 0);
            }
            other => panic!("expected rate denial, got {other:?}"),
        }

        assert_eq!(dispatcher.dispatch_count(), 1);
        let stored = store.fetch_by_id(second.id, &acme).await.unwrap().unwrap();
        assert_eq!(stored.status, CallStatus::Pending);
    }

    #[tokio::test]
    async fn concurrency_denial_leaves_the_record_pending() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = MockDispatcher::succeeding();
        let orch = orchestrator(&store, dispatcher.clone()).with_defaults(OrchestratorDefaults {
            rate_limit: 100,
            rate_window_secs: 60,
            max_concurrent_calls: 1,
        });
        let acme = tenant();

        let first = seed_call(&store, &acme, Some("+15551234567")).await;
        let second = seed_call(&store, &acme, Some("+15551234567")).await;

        orch.initiate_specific(first.id, &acme, None).await.unwrap();
        let err = orch
            .initiate_specific(second.id, &acme, None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::AdmissionDenied {
                reason: DenialReason::MaxConcurrent { current: 1, limit: 1 },
            }
        ));
        assert_eq!(dispatcher.dispatch_count(), 1);
        let stored = store.fetch_by_id(second.id, &acme).await.unwrap().unwrap();
        assert_eq!(stored.status, CallStatus::Pending);
    }

    #[tokio::test]
    async fn tenant_settings_override_default_limits() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = MockDispatcher::succeeding();
        // Generous process defaults; the tenant pins itself to one
        // dispatch per window.
        let orch = orchestrator(&store, dispatcher.clone());
        let acme = tenant();

        store
            .upsert_tenant_settings(
                &acme,
                TenantSettings {
                    rate_limit: Some(1),
                    ..TenantSettings::default()
                },
            )
            .await
            .unwrap();

        let first = seed_call(&store, &acme, Some("+15551234567")).await;
        let second = seed_call(&store, &acme, Some("+15551234567")).await;

        orch.initiate_specific(first.id, &acme, None).await.unwrap();
        let err = orch
            .initiate_specific(second.id, &acme, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::AdmissionDenied {
                reason: DenialReason::RateLimited { limit: 1, .. },
            }
        ));
    }

    #[tokio::test]
    async fn dispatch_failure_moves_the_call_to_failed() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = MockDispatcher::failing();
        let orch = orchestrator(&store, dispatcher.clone());
        let acme = tenant();

        let call = seed_call(&store, &acme, Some("+15551234567")).await;
        let err = orch.initiate_specific(call.id, &acme, None).await.unwrap_err();
        assert!(matches!(err, Error::Dispatch { .. }));

        let stored = store.fetch_by_id(call.id, &acme).await.unwrap().unwrap();
        assert_eq!(stored.status, CallStatus::Failed);
        assert_eq!(stored.ended_reason.as_deref(), Some(DISPATCH_FAILED_REASON));
        assert!(stored.ended_at.is_some());

        // The mirror follows the call.
        let service = store
            .fetch_service_record(stored.service_record_id, &acme)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(service.status, CallStatus::Failed);
    }

    #[tokio::test]
    async fn initiating_a_non_pending_call_is_a_conflict() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = MockDispatcher::succeeding();
        let orch = orchestrator(&store, dispatcher.clone());
        let acme = tenant();

        let call = seed_call(&store, &acme, Some("+15551234567")).await;
        orch.initiate_specific(call.id, &acme, None).await.unwrap();

        let err = orch.initiate_specific(call.id, &acme, None).await.unwrap_err();
        match err {
            Error::Conflict { id, expected, actual } => {
                assert_eq!(id, call.id);
                assert_eq!(expected, CallStatus::Pending);
                assert_eq!(actual, CallStatus::InProgress);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(dispatcher.dispatch_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_initiations_dispatch_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = MockDispatcher::succeeding();
        let orch = Arc::new(orchestrator(&store, dispatcher.clone()));
        let acme = tenant();

        let call = seed_call(&store, &acme, Some("+15551234567")).await;

        let a = tokio::spawn({
            let orch = orch.clone();
            let acme = acme.clone();
            async move { orch.initiate_specific(call.id, &acme, None).await }
        });
        let b = tokio::spawn({
            let orch = orch.clone();
            let acme = acme.clone();
            async move { orch.initiate_specific(call.id, &acme, None).await }
        });

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1, "exactly one initiation must win");

        let loser = if a.is_err() { a } else { b };
        assert!(matches!(loser.unwrap_err(), Error::Conflict { .. }));

        // The loser short-circuited before the provider.
        assert_eq!(dispatcher.dispatch_count(), 1);
    }

    #[tokio::test]
    async fn sweep_fails_only_stale_calls() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = MockDispatcher::succeeding();
        let orch = orchestrator(&store, dispatcher.clone());
        let acme = tenant();

        let stale = seed_call(&store, &acme, Some("+15551234567")).await;
        let fresh = seed_call(&store, &acme, Some("+15551234567")).await;
        orch.initiate_specific(stale.id, &acme, None).await.unwrap();
        orch.initiate_specific(fresh.id, &acme, None).await.unwrap();

        // Backdate the first dispatch beyond the max age.
        let mut backdated = store.fetch_by_id(stale.id, &acme).await.unwrap().unwrap();
        backdated.dispatched_at =
            backdated.dispatched_at.map(|t| t - chrono::Duration::hours(2));
        store.put_call(backdated).unwrap();

        let swept = orch
            .fail_stale_calls(Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(swept, 1);

        let failed = store.fetch_by_id(stale.id, &acme).await.unwrap().unwrap();
        assert_eq!(failed.status, CallStatus::Failed);
        assert_eq!(failed.ended_reason.as_deref(), Some(STALE_SWEEP_REASON));

        let untouched = store.fetch_by_id(fresh.id, &acme).await.unwrap().unwrap();
        assert_eq!(untouched.status, CallStatus::InProgress);
    }
}
