//! Address: 20-byte account identifier for identities and controllers.
//!
//! Displays as a `0x`-prefixed, 40-character lowercase hex string. Parsing
//! accepts either case, with or without the prefix.

use ed25519_dalek::VerifyingKey;
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("Invalid address format: expected 40 hex chars with optional 0x prefix")]
    InvalidFormat,
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// An account address on the ledger.
///
/// Identities (the profile whose notes are synchronized) and controllers
/// (keys granted permissions over an identity) share this type.
///
/// # Examples
/// ```
/// use notes_sync::Address;
///
/// let addr: Address = "0x00000000000000000000000000000000000000ff".parse().unwrap();
/// assert_eq!(addr.to_string(), "0x00000000000000000000000000000000000000ff");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    pub const LENGTH: usize = 20;

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Derive the address controlled by an ed25519 public key.
    ///
    /// Takes the trailing 20 bytes of the key's SHA-256 digest.
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[digest.len() - Self::LENGTH..]);
        Self(bytes)
    }

    /// Short form for log lines (`0x1234…abcd`).
    pub fn fmt_short(&self) -> String {
        let full = hex::encode(self.0);
        format!("0x{}…{}", &full[..4], &full[full.len() - 4..])
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.len() != Self::LENGTH * 2 {
            return Err(AddressError::InvalidFormat);
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits.to_ascii_lowercase(), &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

// Serialize as hex string for consistency in logs, errors, JSON
impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
