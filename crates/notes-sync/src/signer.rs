//! Signing capability used to prove control over an identity.

use crate::address::Address;
use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("Signature request declined")]
    Declined,

    #[error("Signing failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
#[error("Signature does not verify against the embedded key")]
pub struct InvalidSignature;

/// A signature together with the public key that produced it.
///
/// The signer's address is recovered from the embedded key after the
/// signature has been checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    #[serde(with = "hex_array")]
    pub public_key: [u8; 32],
    #[serde(with = "hex_array")]
    pub signature: [u8; 64],
}

impl SignedMessage {
    /// Verify the signature over `message` and return the signer's address.
    pub fn recover_signer(&self, message: &[u8]) -> Result<Address, InvalidSignature> {
        let key = VerifyingKey::from_bytes(&self.public_key).map_err(|_| InvalidSignature)?;
        let signature = Signature::from_bytes(&self.signature);
        key.verify_strict(message, &signature)
            .map_err(|_| InvalidSignature)?;
        Ok(Address::from_public_key(&key))
    }
}

/// Something that can sign messages on behalf of an identity.
///
/// Wallet-backed implementations may prompt the user, who can decline.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, identity: &Address, message: &[u8]) -> Result<SignedMessage, SignError>;
}

/// Signer backed by a local ed25519 key.
pub struct KeypairSigner {
    key: SigningKey,
}

impl KeypairSigner {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self::new(SigningKey::from_bytes(&rand::random::<[u8; 32]>()))
    }

    /// Address controlled by this key.
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.key.verifying_key())
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }
}

#[async_trait]
impl Signer for KeypairSigner {
    async fn sign(&self, _identity: &Address, message: &[u8]) -> Result<SignedMessage, SignError> {
        let signature = self.key.sign(message);
        Ok(SignedMessage {
            public_key: self.key.verifying_key().to_bytes(),
            signature: signature.to_bytes(),
        })
    }
}

mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(bytes: &[u8; N], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(d: D) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(d)?;
        let mut out = [0u8; N];
        hex::decode_to_slice(s, &mut out).map_err(serde::de::Error::custom)?;
        Ok(out)
    }
}
