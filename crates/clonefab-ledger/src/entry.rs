//! Ledger records

use chrono::{DateTime, Utc};
use clonefab_types::{Identity, ParamSet};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 link between consecutive entries
pub type ChainHash = [u8; 32];

/// `prev_hash` of the first entry
pub const GENESIS_HASH: ChainHash = [0u8; 32];

/// Caller-supplied part of an entry; the ledger assigns the rest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    /// Initialized instance
    pub instance: Identity,
    /// Account that initialized it
    pub creator: Identity,
    /// Parameters the instance was initialized with
    pub params: ParamSet,
    /// Deployer nonce that produced `instance`
    pub deploy_nonce: u64,
}

/// One immutable, fixed-shape ledger record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Position in the ledger, starting at 0
    pub sequence: u64,
    /// Initialized instance
    pub instance: Identity,
    /// Account that initialized it
    pub creator: Identity,
    /// Parameters the instance was initialized with
    pub params: ParamSet,
    /// Append time
    pub timestamp: DateTime<Utc>,
    /// Deployer nonce that produced `instance`
    pub deploy_nonce: u64,
    /// Hash of the previous entry, [`GENESIS_HASH`] for the first
    #[serde(with = "hex_hash")]
    pub prev_hash: ChainHash,
    /// Hash of this entry
    #[serde(with = "hex_hash")]
    pub hash: ChainHash,
}

impl LedgerEntry {
    pub(crate) fn seal(
        sequence: u64,
        new: NewEntry,
        timestamp: DateTime<Utc>,
        prev_hash: ChainHash,
    ) -> Self {
        let mut entry = Self {
            sequence,
            instance: new.instance,
            creator: new.creator,
            params: new.params,
            timestamp,
            deploy_nonce: new.deploy_nonce,
            prev_hash,
            hash: GENESIS_HASH,
        };
        entry.hash = entry.compute_hash();
        entry
    }

    /// Hash over every field except `hash` itself
    #[must_use]
    pub fn compute_hash(&self) -> ChainHash {
        let mut hasher = Sha256::new();
        hasher.update(self.sequence.to_le_bytes());
        hasher.update(self.instance.as_bytes());
        hasher.update(self.creator.as_bytes());
        hasher.update(self.params.name.as_bytes());
        hasher.update([0]);
        hasher.update(self.params.symbol.as_bytes());
        hasher.update([0]);
        hasher.update(self.timestamp.timestamp().to_le_bytes());
        hasher.update(self.timestamp.timestamp_subsec_nanos().to_le_bytes());
        hasher.update(self.deploy_nonce.to_le_bytes());
        hasher.update(self.prev_hash);
        hasher.finalize().into()
    }

    /// Whether the stored hash matches the contents
    #[inline]
    #[must_use]
    pub fn hash_is_valid(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

mod hex_hash {
    use super::ChainHash;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(hash: &ChainHash, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(hash))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<ChainHash, D::Error> {
        let text = String::deserialize(d)?;
        let raw = hex::decode(&text).map_err(D::Error::custom)?;
        ChainHash::try_from(raw.as_slice())
            .map_err(|_| D::Error::custom(format!("expected 32-byte hash, got {}", raw.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(sequence: u64, prev_hash: ChainHash) -> LedgerEntry {
        LedgerEntry::seal(
            sequence,
            NewEntry {
                instance: Identity::derive(&Identity::named("deployer"), sequence + 1),
                creator: Identity::named("alice"),
                params: ParamSet::new("ClonedToken", "CTKN"),
                deploy_nonce: sequence + 1,
            },
            Utc::now(),
            prev_hash,
        )
    }

    #[test]
    fn sealed_entry_has_valid_hash() {
        let entry = sample(0, GENESIS_HASH);
        assert!(entry.hash_is_valid());
        assert_ne!(entry.hash, GENESIS_HASH);
    }

    #[test]
    fn tampering_breaks_hash() {
        let mut entry = sample(0, GENESIS_HASH);
        entry.params.symbol = "EVIL".to_string();
        assert!(!entry.hash_is_valid());
    }

    #[test]
    fn hash_covers_prev_link() {
        let a = sample(0, GENESIS_HASH);
        let mut b = a.clone();
        b.prev_hash = [7u8; 32];
        assert_ne!(a.compute_hash(), b.compute_hash());
    }

    #[test]
    fn json_shape_is_flat_and_hex_encoded() {
        let entry = sample(0, GENESIS_HASH);
        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["sequence"], 0);
        assert_eq!(value["params"]["symbol"], "CTKN");
        assert_eq!(value["prev_hash"], hex::encode(GENESIS_HASH));
        assert_eq!(value["creator"], Identity::named("alice").to_string());

        let back: LedgerEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
        assert!(back.hash_is_valid());
    }

    #[test]
    fn short_hash_is_rejected() {
        let entry = sample(0, GENESIS_HASH);
        let mut value = serde_json::to_value(&entry).unwrap();
        value["hash"] = serde_json::Value::String("abcd".to_string());

        assert!(serde_json::from_value::<LedgerEntry>(value).is_err());
    }
}
