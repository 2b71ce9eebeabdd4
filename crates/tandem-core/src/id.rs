//! Strongly-typed identifiers for tandem entities.
//!
//! IDs are newtypes so a call id can never be confused with a service
//! record id or a provider's identifier at compile time. Serialization
//! is transparent: a `CallId` serializes as a bare integer, a
//! `ProviderCallId` as a bare string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Identifier of a call record.
///
/// Assigned by the store at creation time and treated as opaque by
/// callers. The provider webhook embeds this id as a decimal string
/// for correlation, so [`FromStr`] accepts exactly that form.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CallId(i64);

impl CallId {
    /// Creates a `CallId` from a raw integer.
    #[must_use]
    pub fn from_i64(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw integer value.
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CallId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| Error::invalid_id(format!("not a valid call id: {s:?}")))
    }
}

/// Identifier assigned by the voice provider to a placed call.
///
/// Opaque to tandem; recorded on the call record after a successful
/// dispatch and used to correlate inbound webhooks that do not carry
/// the embedded internal id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderCallId(String);

impl ProviderCallId {
    /// Creates a provider call id, rejecting empty values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] if the value is empty or whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, Error> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(Error::invalid_id("provider call id must not be empty"));
        }
        Ok(Self(value))
    }

    /// Creates a provider call id without validation.
    ///
    /// For internal use where the value is known valid (e.g. test fixtures).
    #[must_use]
    pub fn new_unchecked(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderCallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id_roundtrip() {
        let id = CallId::from_i64(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!("42".parse::<CallId>().unwrap(), id);
        assert_eq!(" 42 ".parse::<CallId>().unwrap(), id);
    }

    #[test]
    fn test_call_id_rejects_garbage() {
        assert!("abc".parse::<CallId>().is_err());
        assert!("".parse::<CallId>().is_err());
        assert!("12.5".parse::<CallId>().is_err());
    }

    #[test]
    fn test_call_id_serde_transparent() {
        let id = CallId::from_i64(7);
        assert_eq!(serde_json::to_string(&id).unwrap(), "7");
        let back: CallId = serde_json::from_str("7").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_call_id_ordering() {
        assert!(CallId::from_i64(1) < CallId::from_i64(2));
    }

    #[test]
    fn test_provider_call_id_rejects_empty() {
        assert!(ProviderCallId::new("").is_err());
        assert!(ProviderCallId::new("   ").is_err());
        assert!(ProviderCallId::new("abc-123").is_ok());
    }

    #[test]
    fn test_provider_call_id_serde_transparent() {
        let id = ProviderCallId::new_unchecked("abc-123");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc-123\"");
    }
}
