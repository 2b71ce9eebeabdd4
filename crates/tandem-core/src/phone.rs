//! Validated phone numbers.
//!
//! The provider requires dialing strings in E.164 form (`+` followed by
//! country code and subscriber number). Validation here is structural,
//! not a full numbering-plan check: leading `+`, digits only, plausible
//! length.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A phone number in E.164-style form.
///
/// # Example
///
/// ```rust
/// use tandem_core::phone::PhoneNumber;
///
/// let phone = PhoneNumber::new("+15551234567").unwrap();
/// assert_eq!(phone.as_str(), "+15551234567");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Minimum digits after the `+` (shortest national numbers in use).
    const MIN_DIGITS: usize = 8;
    /// Maximum digits after the `+` (E.164 limit).
    const MAX_DIGITS: usize = 15;

    /// Creates a phone number after validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPhoneNumber`] if the value is not a
    /// plausible E.164 dialing string.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        Self::validate(&value)?;
        Ok(Self(value))
    }

    /// Creates a phone number without validation.
    ///
    /// Intended for values that have already been validated (e.g., read
    /// back from the store).
    #[must_use]
    pub fn new_unchecked(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the number as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(value: &str) -> Result<()> {
        let Some(digits) = value.strip_prefix('+') else {
            return Err(Error::invalid_phone_number(format!(
                "'{value}' must start with '+'"
            )));
        };

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::invalid_phone_number(format!(
                "'{value}' may contain only digits after '+'"
            )));
        }

        if digits.len() < Self::MIN_DIGITS || digits.len() > Self::MAX_DIGITS {
            return Err(Error::invalid_phone_number(format!(
                "'{value}' must have between {} and {} digits",
                Self::MIN_DIGITS,
                Self::MAX_DIGITS
            )));
        }

        Ok(())
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PhoneNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
