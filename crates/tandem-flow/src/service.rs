//! Collaborator entities the orchestrator reads and mirrors.
//!
//! `ServiceRecord` and `TenantSettings` are owned by other subsystems
//! (service intake, tenant administration). The orchestrator reads them
//! for phone resolution and admission limits, and mirrors call status
//! onto the service record as a side effect of call transitions.

use serde::{Deserialize, Serialize};

use tandem_core::{PhoneNumber, TenantId, TenantScoped};

use crate::call::CallStatus;

/// The business entity a call is about (e.g., a vehicle service visit).
///
/// Its `status` mirrors the linked call record's transitions and is only
/// mutated by the store as part of a call transition, never independently
/// by this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    /// Store-assigned identifier.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Customer name, templated into the provider dispatch.
    pub customer_name: String,
    /// Customer phone number, second in the resolution chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<PhoneNumber>,
    /// Kind of service performed, templated into the provider dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    /// Advisor who handled the visit, templated into the dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisor_name: Option<String>,
    /// Mirrored call status.
    pub status: CallStatus,
}

impl TenantScoped for ServiceRecord {
    fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }
}

/// Input for creating a service record; the store assigns the id and
/// starts the status at `Pending`.
#[derive(Debug, Clone)]
pub struct NewServiceRecord {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Customer name.
    pub customer_name: String,
    /// Customer phone number, if known.
    pub phone_number: Option<PhoneNumber>,
    /// Kind of service performed.
    pub service_type: Option<String>,
    /// Advisor who handled the visit.
    pub advisor_name: Option<String>,
}

/// Per-tenant overrides for admission limits and dialing defaults.
///
/// Absent settings (or absent fields) fall back to process-wide
/// configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSettings {
    /// Maximum dispatches per rate window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    /// Rate window length in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_window_secs: Option<u64>,
    /// Maximum simultaneous in-progress calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_calls: Option<usize>,
    /// Fallback dialing string when neither an override nor a service
    /// record phone is available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_phone_number: Option<PhoneNumber>,
    /// Business name templated into the provider dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
    /// Review link templated into the provider dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_link: Option<String>,
}
