//! Template registry
//!
//! Holds the single template identity the factory clones from. It is set
//! once and never replaced.

use crate::error::{FactoryError, FactoryResult};
use clonefab_types::Identity;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Descriptor of a published template resource
///
/// The factory never interprets it beyond recording which template an
/// instance was cloned from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateCode {
    /// Human readable template name
    pub label: String,
    /// Template revision
    pub version: u32,
}

impl TemplateCode {
    /// Create descriptor
    #[inline]
    #[must_use]
    pub fn new(label: impl Into<String>, version: u32) -> Self {
        Self {
            label: label.into(),
            version,
        }
    }
}

impl Default for TemplateCode {
    fn default() -> Self {
        Self::new("BaseERC721", 1)
    }
}

/// Write-once pointer to the active template
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    template: OnceCell<Identity>,
}

impl TemplateRegistry {
    /// Create an unconfigured registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the template identity
    ///
    /// # Errors
    /// Returns [`FactoryError::AlreadyConfigured`] with the existing identity
    /// if a template was already set, even if it is the same one.
    pub fn set_template(&self, template: Identity) -> FactoryResult<()> {
        self.template
            .set(template)
            .map_err(|_| FactoryError::AlreadyConfigured(self.existing()))?;
        tracing::info!(%template, "template configured");
        Ok(())
    }

    /// Active template identity
    ///
    /// # Errors
    /// Returns [`FactoryError::Unconfigured`] before [`Self::set_template`]
    /// has succeeded.
    pub fn get_template(&self) -> FactoryResult<Identity> {
        self.template.get().copied().ok_or(FactoryError::Unconfigured)
    }

    /// Whether a template is set
    #[inline]
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.template.get().is_some()
    }

    fn existing(&self) -> Identity {
        self.template.get().copied().unwrap_or(Identity::ZERO)
    }
}
