//! Instance deployer
//!
//! Allocates instance storage at deterministic identities. Each identity is
//! [`Identity::derive`] of the deployer identity and a monotonically
//! increasing nonce, so anyone who knows the deployer and its nonce can
//! predict the next address. Deployment never initializes.

use crate::error::{FactoryError, FactoryResult};
use crate::instance::{InstanceHandle, InstanceStorage};
use crate::template::TemplateCode;
use clonefab_types::Identity;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Storage allocated for the next address but not yet registered
///
/// Dropping it without [`InstanceDeployer::commit`] leaves no trace.
#[derive(Debug)]
pub struct StagedInstance {
    storage: Arc<InstanceStorage>,
}

impl StagedInstance {
    /// Identity the instance will have once committed
    #[inline]
    #[must_use]
    pub fn id(&self) -> Identity {
        self.storage.id()
    }

    /// Nonce the commit will consume
    #[inline]
    #[must_use]
    pub fn nonce(&self) -> u64 {
        self.storage.deploy_nonce()
    }

    /// Storage block, usable before commit
    #[inline]
    #[must_use]
    pub fn storage(&self) -> &InstanceStorage {
        &self.storage
    }
}

/// Allocator of template and instance identities
#[derive(Debug)]
pub struct InstanceDeployer {
    identity: Identity,
    nonce: Mutex<u64>,
    templates: DashMap<Identity, TemplateCode>,
    instances: DashMap<Identity, Arc<InstanceStorage>>,
}

impl InstanceDeployer {
    /// Create a deployer with nonce 0
    #[must_use]
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            nonce: Mutex::new(0),
            templates: DashMap::new(),
            instances: DashMap::new(),
        }
    }

    /// Deployer identity
    #[inline]
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Nonce the next deployment will use
    #[inline]
    #[must_use]
    pub fn nonce(&self) -> u64 {
        *self.nonce.lock()
    }

    /// Address the next deployment will produce
    #[must_use]
    pub fn predict_next(&self) -> Identity {
        Identity::derive(&self.identity, *self.nonce.lock())
    }

    /// Publish a template resource at the next address
    pub fn publish_template(&self, code: TemplateCode) -> Identity {
        let mut nonce = self.nonce.lock();
        let id = Identity::derive(&self.identity, *nonce);
        *nonce += 1;

        tracing::debug!(template = %id, label = %code.label, version = code.version, "template published");
        self.templates.insert(id, code);
        id
    }

    /// Descriptor of a published template
    #[must_use]
    pub fn template_code(&self, template: &Identity) -> Option<TemplateCode> {
        self.templates.get(template).map(|code| code.clone())
    }

    /// Allocate storage for the next address without consuming the nonce
    ///
    /// # Errors
    /// Returns [`FactoryError::UnknownTemplate`] if `template` was not
    /// published by this deployer.
    pub fn stage(&self, template: Identity) -> FactoryResult<StagedInstance> {
        if !self.templates.contains_key(&template) {
            return Err(FactoryError::UnknownTemplate(template));
        }
        let nonce = *self.nonce.lock();
        let id = Identity::derive(&self.identity, nonce);

        tracing::debug!(instance = %id, nonce, "instance staged");
        Ok(StagedInstance {
            storage: Arc::new(InstanceStorage::new(id, template, nonce)),
        })
    }

    /// Register a staged instance and advance the nonce
    ///
    /// # Errors
    /// Returns an internal error if another deployment consumed the staged
    /// nonce in the meantime.
    pub fn commit(&self, staged: StagedInstance) -> FactoryResult<InstanceHandle> {
        let mut nonce = self.nonce.lock();
        if staged.nonce() != *nonce {
            return Err(FactoryError::invariant(format!(
                "staged nonce {} but deployer is at {}",
                staged.nonce(),
                *nonce
            )));
        }
        self.register(&mut *nonce, staged.storage)
    }

    /// Allocate and register a new uninitialized instance
    ///
    /// # Errors
    /// Returns [`FactoryError::UnknownTemplate`] if `template` was not
    /// published by this deployer.
    pub fn deploy(&self, template: Identity) -> FactoryResult<Identity> {
        if !self.templates.contains_key(&template) {
            return Err(FactoryError::UnknownTemplate(template));
        }
        let mut nonce = self.nonce.lock();
        let id = Identity::derive(&self.identity, *nonce);
        let storage = Arc::new(InstanceStorage::new(id, template, *nonce));
        self.register(&mut *nonce, storage)?;
        Ok(id)
    }

    fn register(&self, nonce: &mut u64, storage: Arc<InstanceStorage>) -> FactoryResult<InstanceHandle> {
        let id = storage.id();
        if self.instances.contains_key(&id) {
            return Err(FactoryError::invariant(format!("instance {id} deployed twice")));
        }
        self.instances.insert(id, Arc::clone(&storage));
        *nonce += 1;

        tracing::debug!(instance = %id, nonce = storage.deploy_nonce(), "instance deployed");
        Ok(InstanceHandle::new(storage))
    }

    /// Storage of a deployed instance
    ///
    /// # Errors
    /// Returns [`FactoryError::UnknownInstance`] if `instance` was never
    /// deployed here.
    pub fn resolve(&self, instance: &Identity) -> FactoryResult<Arc<InstanceStorage>> {
        self.instances
            .get(instance)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(FactoryError::UnknownInstance(*instance))
    }

    /// Number of deployed instances, initialized or not
    #[inline]
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Re-register a recovered instance without touching the nonce
    pub(crate) fn restore(&self, storage: InstanceStorage) -> FactoryResult<()> {
        let id = storage.id();
        if self.instances.contains_key(&id) {
            return Err(FactoryError::invariant(format!("instance {id} restored twice")));
        }
        self.instances.insert(id, Arc::new(storage));
        Ok(())
    }

    /// Advance the nonce so it is at least `floor`
    pub(crate) fn advance_nonce_to(&self, floor: u64) {
        let mut nonce = self.nonce.lock();
        if *nonce < floor {
            *nonce = floor;
        }
    }
}
