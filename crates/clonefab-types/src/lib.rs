//! Clonefab Types
//!
//! Leaf vocabulary shared by the ledger and the factory kernel.
//!
//! # Overview
//!
//! - [`Identity`]: opaque 20-byte handle for accounts, templates and instances
//! - [`ParamSet`]: the parameters an instance is initialized with
//! - [`ParamLimits`]: validation bounds applied before any state mutation
//!
//! # Example
//!
//! ```rust
//! use clonefab_types::{Identity, ParamLimits, ParamSet};
//!
//! let deployer = Identity::named("deployer");
//! let first = Identity::derive(&deployer, 0);
//! assert_ne!(first, Identity::derive(&deployer, 1));
//!
//! let params = ParamSet::new("ClonedToken", "CTKN");
//! assert!(params.validate(&ParamLimits::default()).is_ok());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod identity;
pub mod params;

// Re-exports
pub use identity::{Identity, IdentityParseError, IDENTITY_LEN};
pub use params::{ParamField, ParamLimits, ParamSet, ValidationError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
