//! Instance storage and the caller-facing handle

use crate::error::{FactoryError, FactoryResult};
use chrono::{DateTime, Utc};
use clonefab_types::{Identity, ParamSet};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// State written by the initialization gate, exactly once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializationRecord {
    /// Owner assigned at initialization
    pub owner: Identity,
    /// Parameters applied at initialization
    pub parameters: ParamSet,
    /// When the latch fired
    pub initialized_at: DateTime<Utc>,
}

/// Independent storage block of one instance
///
/// Behaviour is shared with the template through the `template` pointer;
/// everything else belongs to the instance.
#[derive(Debug)]
pub struct InstanceStorage {
    id: Identity,
    template: Identity,
    deploy_nonce: u64,
    record: OnceCell<InitializationRecord>,
}

impl InstanceStorage {
    pub(crate) fn new(id: Identity, template: Identity, deploy_nonce: u64) -> Self {
        Self {
            id,
            template,
            deploy_nonce,
            record: OnceCell::new(),
        }
    }

    /// Instance identity
    #[inline]
    #[must_use]
    pub fn id(&self) -> Identity {
        self.id
    }

    /// Template the instance delegates to
    #[inline]
    #[must_use]
    pub fn template(&self) -> Identity {
        self.template
    }

    /// Deployer nonce that produced this instance
    #[inline]
    #[must_use]
    pub fn deploy_nonce(&self) -> u64 {
        self.deploy_nonce
    }

    /// Initialization record, once the latch has fired
    #[inline]
    #[must_use]
    pub fn record(&self) -> Option<&InitializationRecord> {
        self.record.get()
    }

    /// Whether the latch has fired
    #[inline]
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.record.get().is_some()
    }

    /// Fire the latch; the record is handed back if it had already fired
    pub(crate) fn latch(&self, record: InitializationRecord) -> Result<(), InitializationRecord> {
        self.record.set(record)
    }
}

/// Read-only view of a deployed instance
///
/// Every business accessor fails with [`FactoryError::NotInitialized`] until
/// the instance has been initialized.
#[derive(Debug, Clone)]
pub struct InstanceHandle {
    storage: Arc<InstanceStorage>,
}

impl InstanceHandle {
    pub(crate) fn new(storage: Arc<InstanceStorage>) -> Self {
        Self { storage }
    }

    /// Instance identity
    #[inline]
    #[must_use]
    pub fn id(&self) -> Identity {
        self.storage.id()
    }

    /// Template the instance was cloned from
    #[inline]
    #[must_use]
    pub fn template(&self) -> Identity {
        self.storage.template()
    }

    /// Whether the instance has been initialized
    #[inline]
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.storage.is_initialized()
    }

    /// Configured name
    ///
    /// # Errors
    /// Returns [`FactoryError::NotInitialized`] before initialization.
    pub fn name(&self) -> FactoryResult<String> {
        Ok(self.record()?.parameters.name.clone())
    }

    /// Configured symbol
    ///
    /// # Errors
    /// Returns [`FactoryError::NotInitialized`] before initialization.
    pub fn symbol(&self) -> FactoryResult<String> {
        Ok(self.record()?.parameters.symbol.clone())
    }

    /// Owner assigned at initialization
    ///
    /// # Errors
    /// Returns [`FactoryError::NotInitialized`] before initialization.
    pub fn owner(&self) -> FactoryResult<Identity> {
        Ok(self.record()?.owner)
    }

    fn record(&self) -> FactoryResult<&InitializationRecord> {
        self.storage
            .record()
            .ok_or(FactoryError::NotInitialized(self.storage.id()))
    }
}
