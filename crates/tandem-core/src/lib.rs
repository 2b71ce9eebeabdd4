//! # tandem-core
//!
//! Core domain primitives for the tandem call orchestrator.
//!
//! This crate provides the foundational types used across all tandem
//! components:
//!
//! - **Identifiers**: Strongly-typed IDs for calls and provider calls
//! - **Tenant Context**: Multi-tenant isolation primitives
//! - **Phone Numbers**: Validated E.164-style dialing strings
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialization helpers
//!
//! ## Crate Boundary
//!
//! `tandem-core` is the **only** crate allowed to define shared primitives.
//! Higher layers (`tandem-flow`, `tandem-api`) depend on it and never
//! redefine these types.
//!
//! ## Example
//!
//! ```rust
//! use tandem_core::prelude::*;
//!
//! let tenant = TenantId::new("acme-motors").unwrap();
//! let phone = PhoneNumber::new("+15551234567").unwrap();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;
pub mod phone;
pub mod tenant;

pub use error::{Error, Result};
pub use id::{CallId, ProviderCallId};
pub use observability::{LogFormat, init_logging};
pub use phone::PhoneNumber;
pub use tenant::{TenantId, TenantScoped};

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use tandem_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{CallId, ProviderCallId};
    pub use crate::phone::PhoneNumber;
    pub use crate::tenant::{TenantId, TenantScoped};
}
