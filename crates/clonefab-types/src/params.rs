//! Initialization parameters
//!
//! [`ParamSet`] is what a caller hands the factory to initialize a new
//! instance. Validation runs before any state is touched, so a rejected
//! parameter set never leaves a trace.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Parameters applied to an instance exactly once
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamSet {
    /// Human readable name
    pub name: String,
    /// Short ticker symbol
    pub symbol: String,
}

impl ParamSet {
    /// Create a parameter set
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
        }
    }

    /// Check the parameters against `limits`
    ///
    /// # Errors
    /// Returns the first rule the parameters break, checking `name` before
    /// `symbol`.
    pub fn validate(&self, limits: &ParamLimits) -> Result<(), ValidationError> {
        check_text(ParamField::Name, &self.name, limits.max_name_len)?;
        check_text(ParamField::Symbol, &self.symbol, limits.max_symbol_len)?;

        if let Some(ch) = self.symbol.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidSymbolChar { ch });
        }

        Ok(())
    }
}

fn check_text(field: ParamField, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if value.trim() != value {
        return Err(ValidationError::Untrimmed { field });
    }
    let len = value.chars().count();
    if len > max {
        return Err(ValidationError::TooLong { field, len, max });
    }
    Ok(())
}

/// Bounds for [`ParamSet::validate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamLimits {
    /// Maximum name length in characters
    pub max_name_len: usize,
    /// Maximum symbol length in characters
    pub max_symbol_len: usize,
}

impl Default for ParamLimits {
    fn default() -> Self {
        Self {
            max_name_len: 64,
            max_symbol_len: 11,
        }
    }
}

/// Which parameter a validation error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamField {
    /// [`ParamSet::name`]
    Name,
    /// [`ParamSet::symbol`]
    Symbol,
}

impl fmt::Display for ParamField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamField::Name => f.write_str("name"),
            ParamField::Symbol => f.write_str("symbol"),
        }
    }
}

/// Rejected initialization input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Field is empty or whitespace only
    #[error("{field} must not be empty")]
    Empty {
        /// Offending field
        field: ParamField,
    },

    /// Field has leading or trailing whitespace
    #[error("{field} has leading or trailing whitespace")]
    Untrimmed {
        /// Offending field
        field: ParamField,
    },

    /// Field exceeds its length limit
    #[error("{field} is {len} characters, limit is {max}")]
    TooLong {
        /// Offending field
        field: ParamField,
        /// Actual length in characters
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Symbol contains a character outside `[A-Za-z0-9]`
    #[error("symbol contains invalid character {ch:?}")]
    InvalidSymbolChar {
        /// First offending character
        ch: char,
    },

    /// Owner is the zero identity
    #[error("owner must not be the zero identity")]
    ZeroOwner,
}

impl ValidationError {
    /// Field the error refers to, if any
    #[must_use]
    pub fn field(&self) -> Option<ParamField> {
        match self {
            Self::Empty { field } | Self::Untrimmed { field } | Self::TooLong { field, .. } => {
                Some(*field)
            }
            Self::InvalidSymbolChar { .. } => Some(ParamField::Symbol),
            Self::ZeroOwner => None,
        }
    }
}
