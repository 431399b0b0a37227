//! Factory facade
//!
//! [`TemplateFactory`] composes the registry, deployer, gate and ledger. All
//! mutating operations run under one commit lock, so no two creations or
//! initializations interleave. Each operation stages its work, checks
//! everything that can be rejected, records the ledger entry, and only then
//! makes the instance visible.

use crate::api::{InstanceFactory, LedgerReader};
use crate::config::FactoryConfig;
use crate::deployer::InstanceDeployer;
use crate::error::{FactoryError, FactoryResult};
use crate::events::{EventBus, FactoryEvent};
use crate::gate::InitializationGate;
use crate::instance::{InitializationRecord, InstanceHandle, InstanceStorage};
use crate::template::{TemplateCode, TemplateRegistry};
use clonefab_ledger::{
    CreationLedger, IntegrityReport, JsonLinesStore, LedgerEntry, LedgerError, LedgerStore,
    MemoryStore, NewEntry,
};
use clonefab_types::{Identity, ParamSet};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Builder for [`TemplateFactory`]
pub struct FactoryBuilder {
    config: FactoryConfig,
    store: Option<Box<dyn LedgerStore>>,
    publish_template: bool,
}

impl FactoryBuilder {
    /// Back the ledger with `store` and replay what it holds
    #[must_use]
    pub fn store(mut self, store: Box<dyn LedgerStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Skip publishing the configured template
    ///
    /// The factory starts unconfigured until
    /// [`TemplateFactory::configure_template`] is called.
    #[must_use]
    pub fn without_template(mut self) -> Self {
        self.publish_template = false;
        self
    }

    /// Build the factory
    ///
    /// # Errors
    /// `Config` if the configuration is invalid, `Internal` if the ledger
    /// cannot be replayed or does not match this deployer, `Unconfigured` if
    /// the ledger has history but no template is published.
    pub fn build(self) -> FactoryResult<TemplateFactory> {
        self.config.validate()?;

        let store = self.store.unwrap_or_else(|| Box::new(MemoryStore::new()));
        let ledger = CreationLedger::open(store).map_err(|e| {
            error!(error = %e, "ledger replay failed");
            FactoryError::from(e)
        })?;

        let deployer = InstanceDeployer::new(Identity::named(&self.config.deployer));
        let registry = TemplateRegistry::new();
        if self.publish_template {
            let template = deployer.publish_template(self.config.template.clone());
            registry.set_template(template)?;
        }

        let factory = TemplateFactory {
            gate: InitializationGate::new(self.config.limits),
            events: EventBus::new(self.config.event_capacity),
            registry,
            deployer,
            ledger,
            commit: Mutex::new(()),
            config: self.config,
        };
        factory.replay()?;

        info!(
            deployer = %factory.deployer.identity(),
            instances = factory.ledger.len(),
            "factory ready"
        );
        Ok(factory)
    }
}

/// Clone factory
pub struct TemplateFactory {
    config: FactoryConfig,
    registry: TemplateRegistry,
    deployer: InstanceDeployer,
    gate: InitializationGate,
    ledger: CreationLedger,
    events: EventBus,
    commit: Mutex<()>,
}

impl TemplateFactory {
    /// Start building a factory from `config`
    #[must_use]
    pub fn builder(config: FactoryConfig) -> FactoryBuilder {
        FactoryBuilder {
            config,
            store: None,
            publish_template: true,
        }
    }

    /// In-memory factory with the configured template published
    ///
    /// # Errors
    /// `Config` if the configuration is invalid.
    pub fn new(config: FactoryConfig) -> FactoryResult<Self> {
        Self::builder(config).build()
    }

    /// Rebuild a factory from a persisted ledger
    ///
    /// # Errors
    /// As [`FactoryBuilder::build`].
    pub fn restore(config: FactoryConfig, store: Box<dyn LedgerStore>) -> FactoryResult<Self> {
        Self::builder(config).store(store).build()
    }

    /// Factory backed by `config.ledger_path` if set, in memory otherwise
    ///
    /// # Errors
    /// `Internal` if the ledger file cannot be opened, otherwise as
    /// [`FactoryBuilder::build`].
    pub fn open(config: FactoryConfig) -> FactoryResult<Self> {
        match config.ledger_path.clone() {
            Some(path) => {
                let store = JsonLinesStore::open(&path).map_err(LedgerError::from)?;
                debug!(path = %path.display(), "using json-lines ledger");
                Self::restore(config, Box::new(store))
            }
            None => Self::new(config),
        }
    }

    /// Publish `code` and make it the factory's template
    ///
    /// # Errors
    /// `AlreadyConfigured` if a template is already set. Nothing is
    /// published in that case.
    pub fn configure_template(&self, code: TemplateCode) -> FactoryResult<Identity> {
        let _commit = self.commit.lock();
        if let Ok(existing) = self.registry.get_template() {
            return Err(FactoryError::AlreadyConfigured(existing));
        }
        let template = self.deployer.publish_template(code);
        self.registry.set_template(template)?;
        Ok(template)
    }

    /// Active template identity
    ///
    /// # Errors
    /// `Unconfigured` if no template is set.
    pub fn template(&self) -> FactoryResult<Identity> {
        self.registry.get_template()
    }

    /// Identity the next deployment will receive
    #[must_use]
    pub fn predict_next(&self) -> Identity {
        self.deployer.predict_next()
    }

    /// Deployer identity
    #[inline]
    #[must_use]
    pub fn deployer_identity(&self) -> Identity {
        self.deployer.identity()
    }

    /// Handle to a deployed instance
    ///
    /// # Errors
    /// `UnknownInstance` if it was never deployed.
    pub fn instance(&self, instance: &Identity) -> FactoryResult<InstanceHandle> {
        self.deployer.resolve(instance).map(InstanceHandle::new)
    }

    /// Deployed instances, initialized or not
    #[inline]
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.deployer.instance_count()
    }

    /// Subscribe to creation events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FactoryEvent> {
        self.events.subscribe()
    }

    /// Snapshot of every ledger entry in sequence order
    #[must_use]
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.ledger.entries()
    }

    /// Re-check the ledger hash chain
    #[must_use]
    pub fn verify(&self) -> IntegrityReport {
        self.ledger.verify()
    }

    /// Configuration the factory was built with
    #[inline]
    #[must_use]
    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    fn replay(&self) -> FactoryResult<()> {
        let mut next_nonce = self.deployer.nonce().max(self.ledger.reserved_nonces());
        let entries = self.ledger.entries();
        if !entries.is_empty() {
            next_nonce = next_nonce.max(self.replay_entries(entries)?);
        }
        self.deployer.advance_nonce_to(next_nonce);

        debug!(next_nonce, "deployer restored from ledger");
        Ok(())
    }

    /// Re-register every recorded instance and return the nonce after the
    /// highest one seen
    fn replay_entries(&self, entries: Vec<LedgerEntry>) -> FactoryResult<u64> {
        let template = self.registry.get_template()?;
        let deployer = self.deployer.identity();

        let mut next_nonce = 0;
        for entry in entries {
            if Identity::derive(&deployer, entry.deploy_nonce) != entry.instance {
                return Err(FactoryError::invariant(format!(
                    "ledger entry {} was not deployed by {deployer}",
                    entry.sequence
                )));
            }
            let storage = InstanceStorage::new(entry.instance, template, entry.deploy_nonce);
            let record = InitializationRecord {
                owner: entry.creator,
                parameters: entry.params,
                initialized_at: entry.timestamp,
            };
            self.gate.latch(&storage, record)?;
            self.deployer.restore(storage)?;
            next_nonce = next_nonce.max(entry.deploy_nonce.saturating_add(1));
        }
        Ok(next_nonce)
    }

    fn deploy_locked(&self) -> FactoryResult<Identity> {
        let template = self.registry.get_template()?;
        let staged = self.deployer.stage(template)?;
        self.ledger
            .reserve_nonces(staged.nonce().saturating_add(1))
            .map_err(|e| {
                error!(error = %e, "nonce reservation failed");
                FactoryError::from(e)
            })?;
        let handle = self.deployer.commit(staged)?;
        Ok(handle.id())
    }

    fn record(&self, new: NewEntry) -> FactoryResult<LedgerEntry> {
        self.ledger.append(new).map_err(|e| {
            error!(error = %e, "ledger append failed");
            FactoryError::from(e)
        })
    }

    fn announce(&self, entry: &LedgerEntry) {
        self.events.publish(FactoryEvent::from_entry(entry));
        metrics::counter!("clonefab_instances_created_total").increment(1);
        info!(
            instance = %entry.instance,
            owner = %entry.creator,
            sequence = entry.sequence,
            symbol = %entry.params.symbol,
            "instance created"
        );
    }

    fn create_locked(&self, owner: Identity, params: ParamSet) -> FactoryResult<Identity> {
        let template = self.registry.get_template()?;
        let staged = self.deployer.stage(template).map_err(|e| match e {
            FactoryError::UnknownTemplate(id) => {
                FactoryError::invariant(format!("configured template {id} is not published"))
            }
            other => other,
        })?;

        let record = self.gate.prepare(staged.storage(), owner, params.clone())?;
        let entry = self.record(NewEntry {
            instance: staged.id(),
            creator: owner,
            params,
            deploy_nonce: staged.nonce(),
        })?;
        self.gate.latch(staged.storage(), record).map_err(|_| {
            FactoryError::invariant(format!("fresh instance {} was already latched", staged.id()))
        })?;
        let handle = self.deployer.commit(staged)?;

        self.announce(&entry);
        Ok(handle.id())
    }

    fn initialize_locked(
        &self,
        instance: Identity,
        owner: Identity,
        params: ParamSet,
    ) -> FactoryResult<LedgerEntry> {
        let storage = self.deployer.resolve(&instance)?;
        let record = self.gate.prepare(&storage, owner, params.clone())?;
        let entry = self.record(NewEntry {
            instance,
            creator: owner,
            params,
            deploy_nonce: storage.deploy_nonce(),
        })?;
        self.gate.latch(&storage, record).map_err(|_| {
            FactoryError::invariant(format!("instance {instance} latched outside the factory"))
        })?;

        self.announce(&entry);
        Ok(entry)
    }
}

impl InstanceFactory for TemplateFactory {
    fn create(&self, owner: Identity, params: ParamSet) -> FactoryResult<Identity> {
        let _commit = self.commit.lock();
        self.create_locked(owner, params)
            .map_err(|e| rejected("create", e))
    }

    fn deploy_uninitialized(&self) -> FactoryResult<Identity> {
        let _commit = self.commit.lock();
        self.deploy_locked()
            .map_err(|e| rejected("deploy_uninitialized", e))
    }

    fn initialize(
        &self,
        instance: Identity,
        owner: Identity,
        params: ParamSet,
    ) -> FactoryResult<LedgerEntry> {
        let _commit = self.commit.lock();
        self.initialize_locked(instance, owner, params)
            .map_err(|e| rejected("initialize", e))
    }
}

impl LedgerReader for TemplateFactory {
    fn lookup_by_instance(&self, instance: &Identity) -> Option<LedgerEntry> {
        self.ledger.lookup_by_instance(instance)
    }

    fn list_by_creator(&self, creator: &Identity) -> Vec<LedgerEntry> {
        self.ledger.list_by_creator(creator)
    }

    fn entry_at(&self, sequence: u64) -> Option<LedgerEntry> {
        self.ledger.entry_at(sequence)
    }

    fn ledger_len(&self) -> usize {
        self.ledger.len()
    }
}

impl std::fmt::Debug for TemplateFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateFactory")
            .field("deployer", &self.deployer.identity())
            .field("template", &self.registry.get_template().ok())
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

fn rejected(operation: &'static str, err: FactoryError) -> FactoryError {
    let class = err.class();
    metrics::counter!(
        "clonefab_rejections_total",
        "operation" => operation,
        "class" => class.to_string()
    )
    .increment(1);
    if err.is_fatal() {
        error!(operation, %class, error = %err, "internal consistency failure");
    } else {
        warn!(operation, %class, error = %err, "request rejected");
    }
    err
}
