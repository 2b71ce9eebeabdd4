//! Webhook reconciliation.
//!
//! Inbound provider events close the loop the dispatcher opened. The
//! reconciler normalizes each raw payload into one [`ProviderEvent`],
//! correlates it to a call record, and applies terminal outcomes
//! through the store's CAS.
//!
//! # Delivery guarantees
//!
//! The provider retries webhooks and does not order them, so the
//! reconciler assumes nothing:
//!
//! - **Duplicates** re-apply as no-ops: a record that is already
//!   terminal acknowledges without touching any field.
//! - **Out-of-order** reports (arriving before the dispatch claim
//!   committed) are acknowledged and left alone; the stale sweep picks
//!   the record up if nothing else does.
//! - **Unmatched** events are logged and acknowledged. Erroring would
//!   only provoke provider retry storms for events this service can
//!   never process.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use tandem_core::{CallId, ProviderCallId, TenantId};

use crate::call::{CallRecord, CallStatus, TransitionUpdate};
use crate::error::Result;
use crate::metrics::CallMetrics;
use crate::store::{CallStore, CasResult};

/// `endedReason` values that mean the conversation finished normally.
/// Everything else (no-answer, busy, voicemail, provider errors,
/// unknown reasons) maps to `Failed`.
const COMPLETED_REASONS: &[&str] = &[
    "assistant-ended-call",
    "assistant-said-end-call-phrase",
    "customer-ended-call",
    "assistant-forwarded-call",
];

/// Correlation handles carried by an event.
///
/// The embedded pair is authoritative when present: it was injected
/// into `variableValues` at dispatch and keeps the lookup
/// tenant-scoped. The provider call id is the fallback for events
/// where the provider did not echo the variables back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correlation {
    /// Internal call id echoed back from `variableValues`.
    pub call_id: Option<CallId>,
    /// Tenant echoed back from `variableValues`.
    pub tenant_id: Option<TenantId>,
    /// Provider-assigned call id.
    pub provider_call_id: Option<ProviderCallId>,
}

impl Correlation {
    fn from_message(message: &Value) -> Self {
        let call = message.get("call");
        let provider_call_id = call
            .and_then(|c| c.get("id"))
            .and_then(Value::as_str)
            .and_then(|id| ProviderCallId::new(id).ok());

        let variables = call
            .and_then(|c| c.get("assistantOverrides"))
            .and_then(|o| o.get("variableValues"))
            .filter(|v| v.is_object());
        let call_id = variables
            .and_then(|v| v.get("call_id"))
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse::<CallId>().ok());
        let tenant_id = variables
            .and_then(|v| v.get("tenant_id"))
            .and_then(Value::as_str)
            .and_then(|raw| TenantId::new(raw).ok());

        Self {
            call_id,
            tenant_id,
            provider_call_id,
        }
    }
}

/// One provider event, normalized from the wire.
///
/// Payloads arrive either as `{ "message": { ... } }` or as the bare
/// inner object; both normalize to the same variant. Normalization
/// never fails: shapes this service does not process become
/// [`ProviderEvent::Unrecognized`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// Mid-call progress. Observed, never applied to state.
    StatusUpdate {
        /// Provider's in-call status string, when present.
        status: Option<String>,
        /// Handles identifying the call.
        correlation: Correlation,
    },
    /// Terminal outcome for a call.
    EndOfCallReport {
        /// Why the call ended, in the provider's taxonomy.
        ended_reason: Option<String>,
        /// Total cost the provider billed for the call.
        cost: Option<f64>,
        /// Conversation transcript.
        transcript: Option<String>,
        /// Post-call summary.
        summary: Option<String>,
        /// Handles identifying the call.
        correlation: Correlation,
    },
    /// An event type this service does not process.
    Unrecognized {
        /// The raw `type` field (empty when absent).
        event_type: String,
    },
}

impl ProviderEvent {
    /// Normalizes a raw webhook body.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        let message = payload
            .get("message")
            .filter(|m| m.is_object())
            .unwrap_or(payload);
        let event_type = message
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default();

        match event_type {
            "status-update" => Self::StatusUpdate {
                status: string_field(message, "status"),
                correlation: Correlation::from_message(message),
            },
            "end-of-call-report" => Self::EndOfCallReport {
                ended_reason: string_field(message, "endedReason"),
                cost: message.get("cost").and_then(Value::as_f64),
                transcript: string_field(message, "transcript")
                    .or_else(|| nested_string(message, "artifact", "transcript")),
                summary: string_field(message, "summary")
                    .or_else(|| nested_string(message, "analysis", "summary")),
                correlation: Correlation::from_message(message),
            },
            other => Self::Unrecognized {
                event_type: other.to_owned(),
            },
        }
    }

    /// Bounded label for metrics; raw event types are logged, not
    /// used as label values.
    #[must_use]
    pub fn type_label(&self) -> &'static str {
        match self {
            Self::StatusUpdate { .. } => "status-update",
            Self::EndOfCallReport { .. } => "end-of-call-report",
            Self::Unrecognized { .. } => "unrecognized",
        }
    }
}

fn string_field(message: &Value, key: &str) -> Option<String> {
    message
        .get(key)
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

fn nested_string(message: &Value, outer: &str, key: &str) -> Option<String> {
    message
        .get(outer)
        .and_then(|v| v.get(key))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

/// What reconciliation did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Terminal report applied; the call completed normally.
    Completed {
        /// The record that was closed.
        call_id: CallId,
    },
    /// Terminal report applied; the call failed.
    Failed {
        /// The record that was closed.
        call_id: CallId,
    },
    /// The record was already terminal; duplicate delivery.
    AlreadyTerminal {
        /// The record the duplicate referred to.
        call_id: CallId,
    },
    /// The record is still `Pending`: the report outran the dispatch
    /// commit. Left for the stale sweep.
    StillPending {
        /// The record the early report referred to.
        call_id: CallId,
    },
    /// No record matched the event's correlation handles.
    Unmatched,
    /// Event type observed but not processed.
    Ignored {
        /// Bounded event-type label.
        event_type: String,
    },
}

impl ReconcileOutcome {
    /// Metrics label for this outcome.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::AlreadyTerminal { .. } => "duplicate",
            Self::StillPending { .. } => "still_pending",
            Self::Unmatched => "unmatched",
            Self::Ignored { .. } => "ignored",
        }
    }
}

/// Applies provider events to call records.
pub struct WebhookReconciler {
    store: Arc<dyn CallStore>,
    metrics: CallMetrics,
}

impl fmt::Debug for WebhookReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookReconciler").finish_non_exhaustive()
    }
}

impl WebhookReconciler {
    /// Creates a reconciler over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn CallStore>) -> Self {
        Self {
            store,
            metrics: CallMetrics::new(),
        }
    }

    /// Processes one authenticated webhook payload.
    ///
    /// Duplicate, early, and unmatched events all acknowledge as
    /// successful outcomes rather than erroring; the provider would
    /// retry anything else, and retrying cannot help.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store itself fails.
    pub async fn reconcile(&self, payload: &Value) -> Result<ReconcileOutcome> {
        let event = ProviderEvent::from_payload(payload);
        let event_label = event.type_label();

        let outcome = self.apply(event).await?;
        self.metrics
            .record_webhook_event(event_label, outcome.as_label());
        Ok(outcome)
    }

    async fn apply(&self, event: ProviderEvent) -> Result<ReconcileOutcome> {
        match event {
            ProviderEvent::StatusUpdate {
                status,
                correlation,
            } => {
                debug!(
                    status = status.as_deref().unwrap_or("unknown"),
                    call_id = ?correlation.call_id,
                    provider_call_id = ?correlation.provider_call_id,
                    "status update observed"
                );
                Ok(ReconcileOutcome::Ignored {
                    event_type: "status-update".to_owned(),
                })
            }
            ProviderEvent::Unrecognized { event_type } => {
                debug!(%event_type, "unrecognized webhook event type");
                Ok(ReconcileOutcome::Ignored { event_type })
            }
            ProviderEvent::EndOfCallReport {
                ended_reason,
                cost,
                transcript,
                summary,
                correlation,
            } => {
                let Some(record) = self.correlate(&correlation).await? else {
                    warn!(
                        call_id = ?correlation.call_id,
                        tenant = ?correlation.tenant_id,
                        provider_call_id = ?correlation.provider_call_id,
                        "end-of-call report matched no record"
                    );
                    return Ok(ReconcileOutcome::Unmatched);
                };
                self.apply_report(&record, ended_reason, cost, transcript, summary)
                    .await
            }
        }
    }

    /// Finds the record an event refers to.
    ///
    /// The embedded pair first, tenant-scoped. The provider call id
    /// second, tenant-blind: the record found determines the tenant.
    async fn correlate(&self, correlation: &Correlation) -> Result<Option<CallRecord>> {
        if let (Some(call_id), Some(tenant)) =
            (correlation.call_id, correlation.tenant_id.as_ref())
        {
            if let Some(record) = self.store.fetch_by_id(call_id, tenant).await? {
                return Ok(Some(record));
            }
        }

        if let Some(provider_call_id) = correlation.provider_call_id.as_ref() {
            if let Some(record) = self
                .store
                .fetch_by_provider_call_id(provider_call_id)
                .await?
            {
                return Ok(Some(record));
            }
        }

        Ok(None)
    }

    async fn apply_report(
        &self,
        record: &CallRecord,
        ended_reason: Option<String>,
        cost: Option<f64>,
        transcript: Option<String>,
        summary: Option<String>,
    ) -> Result<ReconcileOutcome> {
        let target = classify_ended_reason(ended_reason.as_deref());
        let reason = ended_reason.unwrap_or_else(|| "unknown".to_owned());

        let mut update = TransitionUpdate::ended(reason.clone(), Utc::now());
        if let Some(cost) = cost {
            update = update.with_cost(cost);
        }
        if let Some(transcript) = transcript {
            update = update.with_transcript_ref(transcript);
        }
        if let Some(summary) = summary {
            update = update.with_summary_ref(summary);
        }

        let cas = self
            .store
            .compare_and_transition(record.id, CallStatus::InProgress, target, update)
            .await?;
        match cas {
            CasResult::Success => {
                self.metrics
                    .record_transition(CallStatus::InProgress.as_label(), target.as_label());
                info!(
                    call_id = %record.id,
                    tenant = %record.tenant_id,
                    %reason,
                    status = %target,
                    "call closed by end-of-call report"
                );
                Ok(if target == CallStatus::Completed {
                    ReconcileOutcome::Completed { call_id: record.id }
                } else {
                    ReconcileOutcome::Failed { call_id: record.id }
                })
            }
            CasResult::StateMismatch { actual } if actual.is_terminal() => {
                debug!(call_id = %record.id, %actual, "duplicate end-of-call report");
                Ok(ReconcileOutcome::AlreadyTerminal { call_id: record.id })
            }
            CasResult::StateMismatch { actual } => {
                warn!(
                    call_id = %record.id,
                    %actual,
                    "end-of-call report arrived before the dispatch commit"
                );
                Ok(ReconcileOutcome::StillPending { call_id: record.id })
            }
            CasResult::NotFound => Ok(ReconcileOutcome::Unmatched),
        }
    }
}

/// Maps the provider's `endedReason` to a terminal status.
fn classify_ended_reason(reason: Option<&str>) -> CallStatus {
    match reason {
        Some(reason) if COMPLETED_REASONS.contains(&reason) => CallStatus::Completed,
        _ => CallStatus::Failed,
    }
}
