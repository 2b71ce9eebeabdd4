//! Error types and result aliases for tandem primitives.
//!
//! Validation failures on core types are structured for programmatic
//! handling; higher layers wrap them into their own taxonomies.

/// The result type used throughout the core crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when constructing or parsing core primitives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// An invalid tenant identifier was provided.
    #[error("invalid tenant id: {message}")]
    InvalidTenant {
        /// Description of what made the tenant id invalid.
        message: String,
    },

    /// An invalid phone number was provided.
    #[error("invalid phone number: {message}")]
    InvalidPhoneNumber {
        /// Description of what made the number invalid.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Creates a new invalid-id error.
    #[must_use]
    pub fn invalid_id(message: impl Into<String>) -> Self {
        Self::InvalidId {
            message: message.into(),
        }
    }

    /// Creates a new invalid-tenant error.
    #[must_use]
    pub fn invalid_tenant(message: impl Into<String>) -> Self {
        Self::InvalidTenant {
            message: message.into(),
        }
    }

    /// Creates a new invalid-phone-number error.
    #[must_use]
    pub fn invalid_phone_number(message: impl Into<String>) -> Self {
        Self::InvalidPhoneNumber {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_id("not a number");
        assert_eq!(err.to_string(), "invalid identifier: not a number");

        let err = Error::invalid_phone_number("missing leading +");
        assert_eq!(err.to_string(), "invalid phone number: missing leading +");
    }
}
