//! Clonefab Kernel - template-instance clone factory
//!
//! A [`TemplateFactory`] clones new instances from one published template.
//! Every successful [`InstanceFactory::create`] deploys an instance at a
//! predictable address, initializes it exactly once, appends one entry to
//! the creation ledger and announces an [`FactoryEvent::InstanceCreated`].
//! A failed create leaves no trace.
//!
//! # Example
//!
//! ```rust
//! use clonefab_kernel::{FactoryConfig, InstanceFactory, LedgerReader, TemplateFactory};
//! use clonefab_types::{Identity, ParamSet};
//!
//! let factory = TemplateFactory::new(FactoryConfig::default()).unwrap();
//! let alice = Identity::named("alice");
//!
//! let instance = factory
//!     .create(alice, ParamSet::new("ClonedToken", "CTKN"))
//!     .unwrap();
//!
//! let entry = factory.lookup_by_instance(&instance).unwrap();
//! assert_eq!(entry.sequence, 0);
//! assert_eq!(entry.creator, alice);
//!
//! let handle = factory.instance(&instance).unwrap();
//! assert_eq!(handle.symbol().unwrap(), "CTKN");
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod api;
pub mod config;
pub mod deployer;
pub mod error;
pub mod events;
pub mod factory;
pub mod gate;
pub mod instance;
pub mod logging;
pub mod template;
pub mod test_harness;

pub use api::*;
pub use config::{FactoryConfig, LogConfig};
pub use deployer::{InstanceDeployer, StagedInstance};
pub use error::{ConfigError, ErrorClass, FactoryError, FactoryResult, InternalError};
pub use events::{CursorError, EventBus, EventCursor, FactoryEvent};
pub use factory::{FactoryBuilder, TemplateFactory};
pub use gate::InitializationGate;
pub use instance::{InitializationRecord, InstanceHandle, InstanceStorage};
pub use template::{TemplateCode, TemplateRegistry};

/// Re-export test harness for external use
pub use test_harness::{run_simulator, SimulatorConfig, SimulatorReport};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
