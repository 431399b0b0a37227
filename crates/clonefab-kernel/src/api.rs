//! Public operation traits implemented by [`crate::TemplateFactory`]

use crate::error::FactoryResult;
use clonefab_ledger::LedgerEntry;
use clonefab_types::{Identity, ParamSet};

/// API version of the factory operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersion {
    /// Breaking changes
    pub major: u16,
    /// Additive changes
    pub minor: u16,
    /// Fixes
    pub patch: u16,
}

/// Current factory API version
pub const FACTORY_API_VERSION: ApiVersion = ApiVersion {
    major: 1,
    minor: 0,
    patch: 0,
};

/// Mutating entry points
pub trait InstanceFactory {
    /// Deploy, initialize and record a new instance as one unit
    ///
    /// # Errors
    /// `Unconfigured` without a template, `InvalidParameters` for rejected
    /// input, `Internal` if a presumed-unreachable step fails. On error
    /// nothing is deployed, recorded or announced.
    fn create(&self, owner: Identity, params: ParamSet) -> FactoryResult<Identity>;

    /// Deploy an instance without initializing it
    ///
    /// # Errors
    /// `Unconfigured` without a template.
    fn deploy_uninitialized(&self) -> FactoryResult<Identity>;

    /// Initialize a previously deployed instance, record and announce it
    ///
    /// # Errors
    /// `UnknownInstance`, `AlreadyInitialized`, `InvalidParameters`, or
    /// `Internal` if recording fails. On error the instance is untouched.
    fn initialize(
        &self,
        instance: Identity,
        owner: Identity,
        params: ParamSet,
    ) -> FactoryResult<LedgerEntry>;
}

/// Read-only ledger queries
pub trait LedgerReader {
    /// Entry for `instance`, if it was initialized
    fn lookup_by_instance(&self, instance: &Identity) -> Option<LedgerEntry>;

    /// Entries created by `creator`, ascending by sequence
    fn list_by_creator(&self, creator: &Identity) -> Vec<LedgerEntry>;

    /// Entry at `sequence`
    fn entry_at(&self, sequence: u64) -> Option<LedgerEntry>;

    /// Number of recorded creations
    fn ledger_len(&self) -> usize;
}
