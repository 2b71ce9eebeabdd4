//! Error types for call lifecycle operations.
//!
//! The taxonomy is a closed set returned as explicit results: expected
//! control flow (no eligible record, a lost CAS race, an admission
//! refusal) travels through these variants, never through panics.

use tandem_core::CallId;

use crate::call::CallStatus;

/// The result type used throughout the flow crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Why an admission request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// The tenant exhausted its dispatch rate window.
    RateLimited {
        /// Maximum dispatches per window.
        limit: u32,
        /// Window length in seconds.
        window_secs: u64,
        /// Seconds until the oldest in-window dispatch expires.
        retry_after_secs: u64,
    },
    /// The tenant is at its in-progress call ceiling.
    MaxConcurrent {
        /// In-progress calls observed.
        current: usize,
        /// Configured ceiling.
        limit: usize,
    },
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited {
                limit,
                window_secs,
                retry_after_secs,
            } => write!(
                f,
                "rate limit reached: {limit} per {window_secs}s (retry in {retry_after_secs}s)"
            ),
            Self::MaxConcurrent { current, limit } => {
                write!(f, "max concurrent calls reached: {current}/{limit}")
            }
        }
    }
}

/// Errors that can occur in call lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No matching record exists (or it belongs to another tenant).
    #[error("not found: {entity} ({id})")]
    NotFound {
        /// The kind of entity looked up.
        entity: &'static str,
        /// The lookup key, rendered for diagnostics.
        id: String,
    },

    /// Upstream data prevents the operation (e.g., no resolvable phone).
    #[error("validation error: {message}")]
    Validation {
        /// Description of what must be fixed upstream.
        message: String,
    },

    /// Rate or concurrency limit refused the dispatch; the record stays
    /// `Pending` and a later attempt may succeed.
    #[error("admission denied: {reason}")]
    AdmissionDenied {
        /// Which gate refused, with retry guidance.
        reason: DenialReason,
    },

    /// The provider rejected the dispatch or was unreachable.
    #[error("dispatch error: {message}")]
    Dispatch {
        /// HTTP status from the provider, absent on transport errors.
        status: Option<u16>,
        /// Condensed description of the failure.
        message: String,
        /// Raw provider error payload, kept verbatim for diagnostics.
        payload: Option<serde_json::Value>,
    },

    /// A compare-and-transition lost its race: another actor already
    /// moved the record. Benign; the caller skips, it does not retry.
    #[error("state conflict: call {id} is {actual} (expected {expected})")]
    Conflict {
        /// The record whose transition was refused.
        id: CallId,
        /// Status the caller expected.
        expected: CallStatus,
        /// Status actually found.
        actual: CallStatus,
    },

    /// A store operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new dispatch error without provider payload.
    #[must_use]
    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::Dispatch {
            status: None,
            message: message.into(),
            payload: None,
        }
    }

    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Seconds after which the caller may retry, when computable.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::AdmissionDenied {
                reason: DenialReason::RateLimited {
                    retry_after_secs, ..
                },
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl From<tandem_core::Error> for Error {
    fn from(err: tandem_core::Error) -> Self {
        Self::Validation {
            message: err.to_string(),
        }
    }
}
