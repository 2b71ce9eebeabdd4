//! Call lifecycle state and record types.
//!
//! This module provides:
//! - `CallStatus`: The state machine for an outbound call
//! - `CallRecord`: The tracked entity for one call attempt
//! - `TransitionUpdate`: The fields a state transition may set

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tandem_core::{CallId, PhoneNumber, ProviderCallId, TenantId, TenantScoped};

/// Call lifecycle state machine.
///
/// States follow a directed graph:
/// ```text
/// ┌─────────┐  claimed for dispatch  ┌────────────┐  terminal webhook   ┌───────────┐
/// │ PENDING │───────────────────────►│ IN_PROGRESS│────────────────────►│ COMPLETED │
/// └─────────┘                        └────────────┘                     └───────────┘
///                                          │
///                                          │ dispatch failure,
///                                          │ failure report, or
///                                          │ stale-call sweep
///                                          ▼
///                                     ┌────────┐
///                                     │ FAILED │
///                                     └────────┘
/// ```
///
/// `Completed` and `Failed` are terminal; no operation in this crate
/// moves a record out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    /// Created, waiting to be dispatched.
    Pending,
    /// Claimed and handed to the provider; awaiting the terminal webhook.
    InProgress,
    /// Conversation finished normally.
    Completed,
    /// Dispatch failed, the provider reported a failure, or the call
    /// exceeded the maximum duration without a terminal webhook.
    Failed,
}

impl CallStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if the transition from self to target is valid.
    ///
    /// `InProgress -> InProgress` is allowed: it is how the provider call
    /// id is recorded after a successful dispatch without opening a window
    /// for a raced terminal transition to be overwritten.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Pending => matches!(target, Self::InProgress | Self::Failed),
            Self::InProgress => {
                matches!(target, Self::InProgress | Self::Completed | Self::Failed)
            }
            Self::Completed | Self::Failed => false,
        }
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns all valid target states from the current state.
    #[must_use]
    pub fn valid_transitions(&self) -> Vec<Self> {
        match self {
            Self::Pending => vec![Self::InProgress, Self::Failed],
            Self::InProgress => vec![Self::InProgress, Self::Completed, Self::Failed],
            Self::Completed | Self::Failed => vec![],
        }
    }
}

impl Default for CallStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// One outbound call attempt and its lifecycle.
///
/// Created `Pending` by an external collaborator (campaign/bulk upload);
/// this crate only ever reads a `Pending` record, writes `InProgress`,
/// and later a terminal state. Nothing here deletes a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    /// Store-assigned identifier, unique across tenants.
    pub id: CallId,
    /// Owning tenant. Never changes after creation.
    pub tenant_id: TenantId,
    /// The service record this call is about.
    pub service_record_id: i64,
    /// Current lifecycle state.
    pub status: CallStatus,
    /// Dialing string, resolved at dispatch time
    /// (override > service record > tenant default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<PhoneNumber>,
    /// Provider-assigned call id, set once after a successful dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_call_id: Option<ProviderCallId>,
    /// Creation time; dispatch ordering key (ties broken by `id`).
    pub created_at: DateTime<Utc>,
    /// Set when the record is claimed for dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    /// Set by the terminal transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Provider-reported or locally assigned reason for the terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_reason: Option<String>,
    /// Provider-reported call cost.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    /// Reference to the stored transcript, from the end-of-call report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_ref: Option<String>,
    /// Reference to the stored summary, from the end-of-call report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_ref: Option<String>,
}

impl CallRecord {
    /// Creates a new pending record.
    ///
    /// The store assigns the real id on insert; the one given here is a
    /// placeholder for construction.
    #[must_use]
    pub fn new_pending(
        id: CallId,
        tenant_id: TenantId,
        service_record_id: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            service_record_id,
            status: CallStatus::Pending,
            phone_number: None,
            provider_call_id: None,
            created_at,
            dispatched_at: None,
            ended_at: None,
            ended_reason: None,
            cost: None,
            transcript_ref: None,
            summary_ref: None,
        }
    }
}

impl TenantScoped for CallRecord {
    fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }
}

/// Fields a `compare_and_transition` may set alongside the status.
///
/// All fields are applied in the same store write as the status change,
/// so a reader never observes a terminal status without its report
/// fields (or the reverse).
#[derive(Debug, Clone, Default)]
pub struct TransitionUpdate {
    /// Phone number resolved for this dispatch.
    pub phone_number: Option<PhoneNumber>,
    /// Provider call id returned by a successful dispatch.
    pub provider_call_id: Option<ProviderCallId>,
    /// Dispatch timestamp.
    pub dispatched_at: Option<DateTime<Utc>>,
    /// Terminal timestamp.
    pub ended_at: Option<DateTime<Utc>>,
    /// Terminal reason.
    pub ended_reason: Option<String>,
    /// Provider-reported cost.
    pub cost: Option<f64>,
    /// Transcript reference from the end-of-call report.
    pub transcript_ref: Option<String>,
    /// Summary reference from the end-of-call report.
    pub summary_ref: Option<String>,
}

impl TransitionUpdate {
    /// An update that changes the status and nothing else.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Update for recording a successful dispatch on a claimed record.
    #[must_use]
    pub fn dispatched(provider_call_id: ProviderCallId) -> Self {
        Self {
            provider_call_id: Some(provider_call_id),
            ..Self::default()
        }
    }

    /// Update for a terminal transition with a reason.
    #[must_use]
    pub fn ended(reason: impl Into<String>, ended_at: DateTime<Utc>) -> Self {
        Self {
            ended_at: Some(ended_at),
            ended_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Sets the provider-reported cost.
    #[must_use]
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    /// Sets the transcript reference.
    #[must_use]
    pub fn with_transcript_ref(mut self, transcript_ref: impl Into<String>) -> Self {
        self.transcript_ref = Some(transcript_ref.into());
        self
    }

    /// Sets the summary reference.
    #[must_use]
    pub fn with_summary_ref(mut self, summary_ref: impl Into<String>) -> Self {
        self.summary_ref = Some(summary_ref.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!CallStatus::Pending.is_terminal());
        assert!(!CallStatus::InProgress.is_terminal());
        assert!(CallStatus::Completed.is_terminal());
        assert!(CallStatus::Failed.is_terminal());
    }

    #[test]
    fn valid_transition_paths() {
        assert!(CallStatus::Pending.can_transition_to(CallStatus::InProgress));
        assert!(CallStatus::Pending.can_transition_to(CallStatus::Failed));
        assert!(CallStatus::InProgress.can_transition_to(CallStatus::Completed));
        assert!(CallStatus::InProgress.can_transition_to(CallStatus::Failed));
        assert!(CallStatus::InProgress.can_transition_to(CallStatus::InProgress));
    }

    #[test]
    fn no_regression_from_terminal() {
        for terminal in [CallStatus::Completed, CallStatus::Failed] {
            for target in [
                CallStatus::Pending,
                CallStatus::InProgress,
                CallStatus::Completed,
                CallStatus::Failed,
            ] {
                assert!(
                    !terminal.can_transition_to(target),
                    "{terminal} must not transition to {target}"
                );
            }
        }
    }

    #[test]
    fn pending_cannot_complete_directly() {
        assert!(!CallStatus::Pending.can_transition_to(CallStatus::Completed));
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&CallStatus::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
        let back: CallStatus = serde_json::from_str("\"COMPLETED\"").unwrap();
        assert_eq!(back, CallStatus::Completed);
    }

    #[test]
    fn labels_are_lowercase() {
        assert_eq!(CallStatus::InProgress.as_label(), "in_progress");
        assert_eq!(CallStatus::Pending.as_label(), "pending");
    }

    #[test]
    fn transition_update_builders() {
        let update = TransitionUpdate::ended("assistant-ended-call", Utc::now())
            .with_cost(0.42)
            .with_transcript_ref("transcripts/42.json");
        assert_eq!(update.ended_reason.as_deref(), Some("assistant-ended-call"));
        assert_eq!(update.cost, Some(0.42));
        assert!(update.provider_call_id.is_none());
    }
}
