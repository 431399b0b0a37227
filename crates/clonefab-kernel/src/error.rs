//! Factory error taxonomy
//!
//! Every public operation returns [`FactoryError`]. Callers that only care
//! about the broad outcome use [`FactoryError::class`].

use clonefab_ledger::LedgerError;
use clonefab_types::{Identity, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Result alias used throughout the kernel
pub type FactoryResult<T> = Result<T, FactoryError>;

/// Errors surfaced by the factory
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    /// No template has been registered
    #[error("no template configured")]
    Unconfigured,

    /// The registry already points at a template
    #[error("template already configured as {0}")]
    AlreadyConfigured(Identity),

    /// Identity does not name a published template
    #[error("unknown template {0}")]
    UnknownTemplate(Identity),

    /// Identity does not name a deployed instance
    #[error("unknown instance {0}")]
    UnknownInstance(Identity),

    /// Initialization parameters were rejected
    #[error("invalid parameters: {0}")]
    InvalidParameters(#[from] ValidationError),

    /// The instance's one-shot latch has already fired
    #[error("instance {0} is already initialized")]
    AlreadyInitialized(Identity),

    /// Instance state was read before initialization
    #[error("instance {0} is not initialized")]
    NotInitialized(Identity),

    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Internal consistency failure
    #[error("internal error: {0}")]
    Internal(#[from] InternalError),
}

impl FactoryError {
    /// Broad category of this error
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unconfigured | Self::AlreadyConfigured(_) | Self::Config(_) => {
                ErrorClass::Configuration
            }
            Self::UnknownTemplate(_) | Self::UnknownInstance(_) => ErrorClass::Resolution,
            Self::InvalidParameters(_) => ErrorClass::Validation,
            Self::AlreadyInitialized(_) | Self::NotInitialized(_) => ErrorClass::LatchContention,
            Self::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Whether the factory can no longer be trusted after this error
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Internal
    }

    /// Whether the caller can fix the request and retry
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Validation | ErrorClass::Resolution
        )
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Self::Internal(InternalError::Invariant(message.into()))
    }
}

impl From<LedgerError> for FactoryError {
    fn from(value: LedgerError) -> Self {
        Self::Internal(InternalError::Ledger(value))
    }
}

/// Broad error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Registry or configuration problem
    Configuration,
    /// Referenced template or instance does not exist
    Resolution,
    /// Input rejected before any state change
    Validation,
    /// One-shot latch already fired, or not yet fired
    LatchContention,
    /// Internal consistency failure
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::Configuration => "configuration",
            ErrorClass::Resolution => "resolution",
            ErrorClass::Validation => "validation",
            ErrorClass::LatchContention => "latch-contention",
            ErrorClass::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Internal consistency failures
#[derive(Debug, thiserror::Error)]
pub enum InternalError {
    /// Ledger rejected a write or replay
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    /// Component state disagreed with itself
    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read {path}: {source}")]
    Read {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`crate::FactoryConfig`]
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending key
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}
