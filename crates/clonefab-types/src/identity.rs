//! Opaque identities
//!
//! Every participant the factory deals with (accounts, templates, instances)
//! is named by an [`Identity`]. Instance identities are derived from the
//! deployer identity and a monotonically increasing nonce, so the address of
//! the next instance can be computed before it is created.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Length of an identity in bytes
pub const IDENTITY_LEN: usize = 20;

const ACCOUNT_DOMAIN: &[u8] = b"account:";
const INSTANCE_DOMAIN: &[u8] = b"instance:";

/// Opaque 20-byte handle
///
/// Rendered as `0x`-prefixed lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity([u8; IDENTITY_LEN]);

impl Identity {
    /// The all-zero identity. Never a valid owner.
    pub const ZERO: Self = Self([0u8; IDENTITY_LEN]);

    /// Wrap raw bytes
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; IDENTITY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        &self.0
    }

    /// Identity of a named account (e.g. `"alice"`)
    #[must_use]
    pub fn named(label: &str) -> Self {
        truncated_digest(&[ACCOUNT_DOMAIN, label.as_bytes()])
    }

    /// Deterministic address of the resource a deployer creates at `nonce`
    #[must_use]
    pub fn derive(deployer: &Identity, nonce: u64) -> Self {
        truncated_digest(&[INSTANCE_DOMAIN, &deployer.0, &nonce.to_le_bytes()])
    }

    /// Whether this is [`Identity::ZERO`]
    #[inline]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; IDENTITY_LEN]
    }
}

fn truncated_digest(parts: &[&[u8]]) -> Identity {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; IDENTITY_LEN];
    bytes.copy_from_slice(&digest[..IDENTITY_LEN]);
    Identity(bytes)
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({self})")
    }
}

/// Failure to parse an [`Identity`] from text
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IdentityParseError {
    /// Not valid hex
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Wrong number of bytes
    #[error("expected 20 bytes, got {0}")]
    InvalidLength(usize),
}

impl FromStr for Identity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let raw = hex::decode(digits)?;
        let bytes: [u8; IDENTITY_LEN] = raw
            .as_slice()
            .try_into()
            .map_err(|_| IdentityParseError::InvalidLength(raw.len()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_is_deterministic() {
        assert_eq!(Identity::named("alice"), Identity::named("alice"));
        assert_ne!(Identity::named("alice"), Identity::named("bob"));
    }

    #[test]
    fn derive_depends_on_deployer_and_nonce() {
        let deployer = Identity::named("deployer");
        let other = Identity::named("other-deployer");

        assert_eq!(Identity::derive(&deployer, 3), Identity::derive(&deployer, 3));
        assert_ne!(Identity::derive(&deployer, 3), Identity::derive(&deployer, 4));
        assert_ne!(Identity::derive(&deployer, 3), Identity::derive(&other, 3));
    }

    #[test]
    fn account_and_instance_domains_do_not_collide() {
        let deployer = Identity::ZERO;
        let derived = Identity::derive(&deployer, 0);
        assert_ne!(derived, Identity::named(""));
    }

    #[test]
    fn display_parses_back() {
        let id = Identity::named("alice");
        let text = id.to_string();

        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 2 + IDENTITY_LEN * 2);
        assert_eq!(text.parse::<Identity>().unwrap(), id);
    }

    #[test]
    fn parse_accepts_bare_hex() {
        let id = Identity::named("bob");
        let bare = hex::encode(id.as_bytes());
        assert_eq!(bare.parse::<Identity>().unwrap(), id);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let result = "0xabcd".parse::<Identity>();
        assert_eq!(result, Err(IdentityParseError::InvalidLength(2)));
    }

    #[test]
    fn parse_rejects_non_hex() {
        let result = "0xzz".parse::<Identity>();
        assert!(matches!(result, Err(IdentityParseError::InvalidHex(_))));
    }

    #[test]
    fn serde_uses_hex_string() {
        let id = Identity::named("carol");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));

        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn zero_is_zero() {
        assert!(Identity::ZERO.is_zero());
        assert!(!Identity::named("alice").is_zero());
    }
}
