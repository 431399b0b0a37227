//! Error types for the creation ledger

use clonefab_types::Identity;
use std::path::PathBuf;

/// Ledger failures
///
/// None of these are expected in normal operation: the factory only appends
/// for fresh instances and stores are assumed healthy. Every variant is an
/// internal-consistency failure from the caller's point of view.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// An entry already references this instance
    #[error("instance {0} already has a ledger entry")]
    DuplicateInstance(Identity),

    /// Replayed or stored data violates a ledger invariant
    #[error("ledger corrupt at position {position}: {reason}")]
    Corrupt {
        /// Index of the first offending record in the stored history
        position: u64,
        /// What was wrong
        reason: String,
    },

    /// Backing store failed
    #[error("ledger store failure: {0}")]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Create corruption error
    pub fn corrupt(position: u64, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            position,
            reason: reason.into(),
        }
    }

    /// Whether the error means recorded history cannot be trusted
    #[inline]
    #[must_use]
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Self::Corrupt { .. }
                | Self::Store(StoreError::Decode { .. } | StoreError::Watermark { .. })
        )
    }
}

/// Persistence failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error on the backing file
    #[error("io error on {path}: {source}")]
    Io {
        /// Backing file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Entry could not be encoded
    #[error("failed to encode entry {sequence}: {source}")]
    Encode {
        /// Sequence of the entry being written
        sequence: u64,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// Stored line could not be decoded
    #[error("failed to decode line {line}: {source}")]
    Decode {
        /// 1-based line number
        line: usize,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// Nonce watermark could not be decoded
    #[error("failed to decode nonce watermark {path}: {source}")]
    Watermark {
        /// Watermark file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// Store refused the write
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
