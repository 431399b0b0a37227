//! Testing utilities for the clonefab workspace
//!
//! Shared accounts, parameter sets and factories.

#![allow(missing_docs)]

use clonefab_kernel::{FactoryConfig, TemplateFactory};
use clonefab_ledger::{LedgerEntry, LedgerStore, MemoryStore, StoreError};
use clonefab_types::{Identity, ParamSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub fn alice() -> Identity {
    Identity::named("alice")
}

pub fn bob() -> Identity {
    Identity::named("bob")
}

pub fn carol() -> Identity {
    Identity::named("carol")
}

/// Parameters of the canonical cloned token
pub fn cloned_token_params() -> ParamSet {
    ParamSet::new("ClonedToken", "CTKN")
}

pub fn token_params(index: usize) -> ParamSet {
    ParamSet::new(format!("Token {index}"), format!("TK{index}"))
}

/// In-memory factory with the default template published
pub fn factory() -> TemplateFactory {
    TemplateFactory::new(FactoryConfig::default()).unwrap()
}

pub fn factory_with_store(store: Box<dyn LedgerStore>) -> TemplateFactory {
    TemplateFactory::restore(FactoryConfig::default(), store).unwrap()
}

/// Factory with no template configured
pub fn unconfigured_factory() -> TemplateFactory {
    TemplateFactory::builder(FactoryConfig::default())
        .without_template()
        .build()
        .unwrap()
}

/// Store that can be switched to reject writes
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    failing: Arc<AtomicBool>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag that makes every later write fail while set
    pub fn switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.failing)
    }
}

impl FailingStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

impl LedgerStore for FailingStore {
    fn append(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.check()?;
        self.inner.append(entry)
    }

    fn load(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        self.inner.load()
    }

    fn reserve(&self, next: u64) -> Result<(), StoreError> {
        self.check()?;
        self.inner.reserve(next)
    }

    fn reserved(&self) -> Result<u64, StoreError> {
        self.inner.reserved()
    }
}
