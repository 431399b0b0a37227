//! Factory configuration
//!
//! Read once at construction. There is no runtime reconfiguration.

use crate::error::ConfigError;
use crate::template::TemplateCode;
use clonefab_types::ParamLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default deployer label
pub const DEFAULT_DEPLOYER: &str = "clonefab-deployer";

/// Default event channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Top-level factory configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    /// Label the deployer identity is derived from
    pub deployer: String,
    /// Template published at startup
    pub template: TemplateCode,
    /// Parameter validation limits
    pub limits: ParamLimits,
    /// Capacity of the creation event channel
    pub event_capacity: usize,
    /// JSON-lines ledger file, in-memory when unset
    pub ledger_path: Option<PathBuf>,
    /// Logging setup
    pub log: LogConfig,
}

impl FactoryConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML text
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] for malformed input and
    /// [`ConfigError::Invalid`] if the result fails [`Self::validate`].
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError::Read`] if the file cannot be read, otherwise as
    /// [`Self::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first bad key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deployer.trim().is_empty() {
            return Err(invalid("deployer", "must not be empty"));
        }
        if self.template.label.trim().is_empty() {
            return Err(invalid("template.label", "must not be empty"));
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity", "must be greater than zero"));
        }
        if self.limits.max_name_len == 0 {
            return Err(invalid("limits.max_name_len", "must be greater than zero"));
        }
        if self.limits.max_symbol_len == 0 {
            return Err(invalid("limits.max_symbol_len", "must be greater than zero"));
        }
        Ok(())
    }

    /// With deployer label
    #[inline]
    #[must_use]
    pub fn with_deployer(mut self, label: impl Into<String>) -> Self {
        self.deployer = label.into();
        self
    }

    /// With template descriptor
    #[inline]
    #[must_use]
    pub fn with_template(mut self, template: TemplateCode) -> Self {
        self.template = template;
        self
    }

    /// With parameter limits
    #[inline]
    #[must_use]
    pub fn with_limits(mut self, limits: ParamLimits) -> Self {
        self.limits = limits;
        self
    }

    /// With event channel capacity
    #[inline]
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// With ledger file
    #[inline]
    #[must_use]
    pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = Some(path.into());
        self
    }
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            deployer: DEFAULT_DEPLOYER.to_string(),
            template: TemplateCode::default(),
            limits: ParamLimits::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            ledger_path: None,
            log: LogConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
