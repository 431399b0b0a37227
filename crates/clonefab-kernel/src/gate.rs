//! Initialization gate
//!
//! Each instance carries a [`once_cell::sync::OnceCell`] holding its
//! [`InitializationRecord`]. Setting it is a single compare-and-set, so of
//! any number of concurrent initializers exactly one wins and every other
//! one sees [`FactoryError::AlreadyInitialized`].

use crate::deployer::InstanceDeployer;
use crate::error::{FactoryError, FactoryResult};
use crate::instance::{InitializationRecord, InstanceStorage};
use chrono::Utc;
use clonefab_types::{Identity, ParamLimits, ParamSet, ValidationError};

/// One-shot initializer for instance storage
#[derive(Debug, Clone, Default)]
pub struct InitializationGate {
    limits: ParamLimits,
}

impl InitializationGate {
    /// Create gate validating against `limits`
    #[inline]
    #[must_use]
    pub fn new(limits: ParamLimits) -> Self {
        Self { limits }
    }

    /// Limits parameters are checked against
    #[inline]
    #[must_use]
    pub fn limits(&self) -> &ParamLimits {
        &self.limits
    }

    /// Check every precondition and build the record without touching state
    ///
    /// # Errors
    /// [`FactoryError::AlreadyInitialized`] if the latch already fired, then
    /// [`FactoryError::InvalidParameters`] for a zero owner or bad params.
    pub fn prepare(
        &self,
        storage: &InstanceStorage,
        owner: Identity,
        params: ParamSet,
    ) -> FactoryResult<InitializationRecord> {
        if storage.is_initialized() {
            return Err(FactoryError::AlreadyInitialized(storage.id()));
        }
        if owner.is_zero() {
            return Err(ValidationError::ZeroOwner.into());
        }
        params.validate(&self.limits)?;

        Ok(InitializationRecord {
            owner,
            parameters: params,
            initialized_at: Utc::now(),
        })
    }

    /// Fire the latch with a prepared record
    ///
    /// # Errors
    /// Returns [`FactoryError::AlreadyInitialized`] if another caller won.
    pub fn latch(&self, storage: &InstanceStorage, record: InitializationRecord) -> FactoryResult<()> {
        storage
            .latch(record)
            .map_err(|_| FactoryError::AlreadyInitialized(storage.id()))
    }

    /// [`Self::prepare`] followed by [`Self::latch`]
    ///
    /// # Errors
    /// As [`Self::prepare`] and [`Self::latch`].
    pub fn initialize_storage(
        &self,
        storage: &InstanceStorage,
        owner: Identity,
        params: ParamSet,
    ) -> FactoryResult<()> {
        let record = self.prepare(storage, owner, params)?;
        self.latch(storage, record)
    }

    /// Initialize a deployed instance by identity
    ///
    /// This only fires the latch. Recording the creation is the facade's job.
    ///
    /// # Errors
    /// [`FactoryError::UnknownInstance`] if `deployer` never produced
    /// `instance`, otherwise as [`Self::initialize_storage`].
    pub fn initialize(
        &self,
        deployer: &InstanceDeployer,
        instance: &Identity,
        owner: Identity,
        params: ParamSet,
    ) -> FactoryResult<()> {
        let storage = deployer.resolve(instance)?;
        self.initialize_storage(&storage, owner, params)
    }
}
