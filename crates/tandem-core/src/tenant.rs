//! Multi-tenant isolation primitives.
//!
//! Tenant isolation is enforced at two levels in tandem:
//! - **Service boundaries**: API requests are scoped to a single tenant
//! - **Query isolation**: store lookups filter by tenant so one tenant can
//!   never observe another tenant's calls, not even their existence
//!
//! # Example
//!
//! ```rust
//! use tandem_core::tenant::TenantId;
//!
//! let tenant = TenantId::new("acme-motors").unwrap();
//! assert_eq!(tenant.as_str(), "acme-motors");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A unique identifier for a tenant (organization).
///
/// Tenant IDs must be:
/// - Non-empty
/// - Lowercase alphanumeric with hyphens
/// - Between 3 and 63 characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a new tenant ID after validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the tenant ID is invalid.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Creates a tenant ID without validation.
    ///
    /// Intended for IDs that have already been validated (e.g., read back
    /// from the store).
    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the tenant ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validates a tenant ID string.
    fn validate(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::invalid_tenant("tenant ID cannot be empty"));
        }

        if id.len() < 3 {
            return Err(Error::invalid_tenant(format!(
                "tenant ID '{id}' is too short (minimum 3 characters)"
            )));
        }

        if id.len() > 63 {
            return Err(Error::invalid_tenant(format!(
                "tenant ID '{id}' is too long (maximum 63 characters)"
            )));
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::invalid_tenant(format!(
                "tenant ID '{id}' contains invalid characters (only lowercase letters, digits, and hyphens allowed)"
            )));
        }

        if id.starts_with('-') || id.ends_with('-') {
            return Err(Error::invalid_tenant(format!(
                "tenant ID '{id}' cannot start or end with a hyphen"
            )));
        }

        Ok(())
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Capability trait for entities that belong to exactly one tenant.
///
/// The store layer requires this generically wherever it filters by
/// tenant, so the scoping rule is a compile-time property of the entity
/// rather than a convention about field names.
pub trait TenantScoped {
    /// Returns the owning tenant.
    fn tenant_id(&self) -> &TenantId;
}
