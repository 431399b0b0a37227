//! Clonefab Ledger - append-only record of every initialized instance
//!
//! The ledger holds exactly one [`LedgerEntry`] per successfully initialized
//! instance. Entries are never mutated or removed, sequences are gapless and
//! strictly increasing, and each entry carries the hash of its predecessor so
//! a persisted ledger can be replayed and checked from scratch.
//!
//! # Example
//!
//! ```rust
//! use clonefab_ledger::{CreationLedger, NewEntry};
//! use clonefab_types::{Identity, ParamSet};
//!
//! let ledger = CreationLedger::new();
//! let alice = Identity::named("alice");
//! let instance = Identity::derive(&Identity::named("deployer"), 1);
//!
//! let entry = ledger
//!     .append(NewEntry {
//!         instance,
//!         creator: alice,
//!         params: ParamSet::new("ClonedToken", "CTKN"),
//!         deploy_nonce: 1,
//!     })
//!     .unwrap();
//!
//! assert_eq!(entry.sequence, 0);
//! assert_eq!(ledger.lookup_by_instance(&instance), Some(entry));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod entry;
pub mod error;
pub mod ledger;
pub mod store;

// Re-exports
pub use entry::{ChainHash, LedgerEntry, NewEntry, GENESIS_HASH};
pub use error::{LedgerError, StoreError};
pub use ledger::{CreationLedger, IntegrityReport};
pub use store::{JsonLinesStore, LedgerStore, MemoryStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
