//! In-memory creation ledger with pluggable persistence

use crate::entry::{ChainHash, LedgerEntry, NewEntry, GENESIS_HASH};
use crate::error::{LedgerError, StoreError};
use crate::store::{LedgerStore, MemoryStore};
use chrono::Utc;
use clonefab_types::Identity;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<LedgerEntry>,
    by_instance: HashMap<Identity, usize>,
    by_creator: HashMap<Identity, Vec<usize>>,
    reserved_nonce: u64,
}

impl LedgerState {
    fn head_hash(&self) -> ChainHash {
        self.entries.last().map_or(GENESIS_HASH, |e| e.hash)
    }

    fn push(&mut self, entry: LedgerEntry) {
        let index = self.entries.len();
        self.by_instance.insert(entry.instance, index);
        self.by_creator.entry(entry.creator).or_default().push(index);
        self.entries.push(entry);
    }

    /// Check `entry` could be the next one in this state
    fn check_next(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let position = self.entries.len() as u64;
        if entry.sequence != position {
            return Err(LedgerError::corrupt(
                position,
                format!("found sequence {}, expected {position}", entry.sequence),
            ));
        }
        if entry.prev_hash != self.head_hash() {
            return Err(LedgerError::corrupt(position, "broken hash chain"));
        }
        if !entry.hash_is_valid() {
            return Err(LedgerError::corrupt(position, "hash mismatch"));
        }
        if self.by_instance.contains_key(&entry.instance) {
            return Err(LedgerError::corrupt(
                position,
                format!("instance {} recorded twice", entry.instance),
            ));
        }
        Ok(())
    }
}

/// Replay `entries` from scratch and stop at the first bad one
fn walk<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> IntegrityReport {
    let mut replay = LedgerState::default();
    let mut checked = 0u64;

    for entry in entries {
        let position = checked;
        checked = checked.saturating_add(1);
        if let Err(err) = replay.check_next(entry) {
            tracing::warn!(%err, "ledger integrity check failed");
            return IntegrityReport {
                valid: false,
                entries_checked: checked,
                first_invalid: Some(position),
            };
        }
        replay.push(entry.clone());
    }

    IntegrityReport {
        valid: true,
        entries_checked: checked,
        first_invalid: None,
    }
}

/// Result of [`CreationLedger::verify`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Every entry checked out
    pub valid: bool,
    /// Entries walked before stopping
    pub entries_checked: u64,
    /// Position of the first bad entry in the history
    pub first_invalid: Option<u64>,
}

/// Append-only ledger of initialized instances
///
/// Readers take a shared lock and see either the full effect of an append
/// or none of it. Appends go to the store first; a store failure leaves the
/// ledger untouched.
pub struct CreationLedger {
    state: RwLock<LedgerState>,
    store: Box<dyn LedgerStore>,
}

impl CreationLedger {
    /// Create an empty ledger backed by a [`MemoryStore`]
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            store: Box::new(MemoryStore::new()),
        }
    }

    /// Replay `store` into a new ledger
    ///
    /// # Errors
    /// Returns [`LedgerError::Store`] if the history or the nonce watermark
    /// cannot be loaded and [`LedgerError::Corrupt`] for the first entry that
    /// breaks sequencing, hashing or instance uniqueness.
    pub fn open(store: Box<dyn LedgerStore>) -> Result<Self, LedgerError> {
        let mut state = LedgerState::default();
        for entry in store.load()? {
            state.check_next(&entry)?;
            state.push(entry);
        }
        state.reserved_nonce = store.reserved()?;

        tracing::debug!(
            entries = state.entries.len(),
            reserved_nonce = state.reserved_nonce,
            "ledger replayed"
        );

        Ok(Self {
            state: RwLock::new(state),
            store,
        })
    }

    /// Record a newly initialized instance
    ///
    /// # Errors
    /// Returns [`LedgerError::DuplicateInstance`] if `new.instance` already
    /// has an entry and [`LedgerError::Store`] if persistence fails. In both
    /// cases nothing is recorded.
    pub fn append(&self, new: NewEntry) -> Result<LedgerEntry, LedgerError> {
        let mut state = self.state.write();

        if state.by_instance.contains_key(&new.instance) {
            return Err(LedgerError::DuplicateInstance(new.instance));
        }

        let sequence = state.entries.len() as u64;
        let entry = LedgerEntry::seal(sequence, new, Utc::now(), state.head_hash());
        self.store.append(&entry)?;
        state.push(entry.clone());

        tracing::debug!(
            sequence,
            instance = %entry.instance,
            creator = %entry.creator,
            "ledger entry appended"
        );
        Ok(entry)
    }

    /// Persist that every deploy nonce below `next` has been handed out
    ///
    /// The watermark never moves backwards; a lower `next` is a no-op.
    ///
    /// # Errors
    /// Returns [`LedgerError::Store`] if persistence fails, leaving the
    /// previous watermark in place.
    pub fn reserve_nonces(&self, next: u64) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        if next <= state.reserved_nonce {
            return Ok(());
        }
        self.store.reserve(next)?;
        state.reserved_nonce = next;

        tracing::debug!(next_nonce = next, "deploy nonces reserved");
        Ok(())
    }

    /// Deploy nonce watermark, `0` if nothing was reserved
    #[must_use]
    pub fn reserved_nonces(&self) -> u64 {
        self.state.read().reserved_nonce
    }

    /// Entry for `instance`, if it was initialized
    #[must_use]
    pub fn lookup_by_instance(&self, instance: &Identity) -> Option<LedgerEntry> {
        let state = self.state.read();
        state
            .by_instance
            .get(instance)
            .map(|&i| state.entries[i].clone())
    }

    /// Every entry created by `creator`, in sequence order
    #[must_use]
    pub fn list_by_creator(&self, creator: &Identity) -> Vec<LedgerEntry> {
        let state = self.state.read();
        state
            .by_creator
            .get(creator)
            .map(|indices| indices.iter().map(|&i| state.entries[i].clone()).collect())
            .unwrap_or_default()
    }

    /// Entry at `sequence`
    #[must_use]
    pub fn entry_at(&self, sequence: u64) -> Option<LedgerEntry> {
        let index = usize::try_from(sequence).ok()?;
        self.state.read().entries.get(index).cloned()
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Whether no instance has been recorded
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all entries in sequence order
    #[must_use]
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.state.read().entries.clone()
    }

    /// Hash of the latest entry, [`GENESIS_HASH`] when empty
    #[must_use]
    pub fn head_hash(&self) -> ChainHash {
        self.state.read().head_hash()
    }

    /// Walk the chain and report the first entry that does not check out
    #[must_use]
    pub fn verify(&self) -> IntegrityReport {
        walk(&self.state.read().entries)
    }

    /// Check a persisted history without opening a ledger over it
    ///
    /// Corruption shows up in the report instead of failing.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the history cannot be read at all.
    pub fn verify_store(store: &dyn LedgerStore) -> Result<IntegrityReport, StoreError> {
        Ok(walk(&store.load()?))
    }
}

impl Default for CreationLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CreationLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("CreationLedger")
            .field("entries", &state.entries.len())
            .field("head_hash", &hex::encode(state.head_hash()))
            .finish_non_exhaustive()
    }
}
