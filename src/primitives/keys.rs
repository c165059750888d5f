// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use ed25519_dalek::{
    Signature as Ed25519Signature, Signer, SigningKey as Ed25519SigningKey, Verifier,
    VerifyingKey as Ed25519VerifyingKey,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::Hash as HashTrait;

pub const ADDRESS_BYTES: usize = 32;
pub const SIGNATURE_BYTES: usize = 64;

/// 32 byte account identifier. This is the raw Ed25519 public key; the
/// all-zero address denotes the system (coinbase) sender.
#[derive(Clone, Copy, PartialEq, Eq, HashTrait, Default, PartialOrd, Ord)]
pub struct Address(pub [u8; ADDRESS_BYTES]);

impl Address {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn zero() -> Self {
        Self([0; ADDRESS_BYTES])
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; ADDRESS_BYTES]
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hexstr: &str) -> Result<Self, &'static str> {
        let bytes = hex::decode(hexstr).map_err(|_| "invalid hexstr")?;
        if bytes.len() != ADDRESS_BYTES {
            return Err("invalid address length");
        }
        let mut out = Self([0; ADDRESS_BYTES]);
        out.0.copy_from_slice(&bytes);
        Ok(out)
    }

    #[cfg(test)]
    #[must_use]
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address").field(&self.to_hex()).finish()
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        String::serialize(&self.to_hex(), serializer)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        Address::from_hex(&string).map_err(|err| serde::de::Error::custom(err.to_owned()))
    }
}

/// 64 byte detached Ed25519 signature
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_BYTES]);

impl Signature {
    #[must_use]
    pub fn zero() -> Self {
        Self([0; SIGNATURE_BYTES])
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; SIGNATURE_BYTES]
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hexstr: &str) -> Result<Self, &'static str> {
        let bytes = hex::decode(hexstr).map_err(|_| "invalid hexstr")?;
        if bytes.len() != SIGNATURE_BYTES {
            return Err("invalid signature length");
        }
        let mut out = Self([0; SIGNATURE_BYTES]);
        out.0.copy_from_slice(&bytes);
        Ok(out)
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature").field(&self.to_hex()).finish()
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        String::serialize(&self.to_hex(), serializer)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Signature, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        Signature::from_hex(&string).map_err(|err| serde::de::Error::custom(err.to_owned()))
    }
}

/// Ed25519 keypair as used by miners and wallets
#[derive(Clone)]
pub struct Keypair(Ed25519SigningKey);

impl Keypair {
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self(Ed25519SigningKey::from_bytes(&seed))
    }

    #[must_use]
    pub fn generate() -> Self {
        Self::from_seed(rand::random())
    }

    #[must_use]
    pub fn address(&self) -> Address {
        Address(self.0.verifying_key().to_bytes())
    }

    #[must_use]
    pub fn seed(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message).to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Keypair").field(&self.address()).finish()
    }
}

/// Verify an Ed25519 signature against the raw public key in `address`.
///
/// Returns `false` for malformed public keys rather than surfacing a decode
/// error; a peer controls both fields.
#[must_use]
pub fn verify(address: &Address, message: &[u8], signature: &Signature) -> bool {
    let Ok(pub_key) = Ed25519VerifyingKey::from_bytes(&address.0) else {
        return false;
    };
    let sig = Ed25519Signature::from_bytes(&signature.0);
    pub_key.verify(message, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_signs_and_verifies() {
        let keypair = Keypair::generate();
        let sig = keypair.sign(b"message");
        assert!(verify(&keypair.address(), b"message", &sig));
        assert!(!verify(&keypair.address(), b"other message", &sig));
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let keypair = Keypair::generate();
        let other = Keypair::generate();
        let sig = keypair.sign(b"message");
        assert!(!verify(&other.address(), b"message", &sig));
    }

    #[test]
    fn verify_rejects_zero_key() {
        let keypair = Keypair::generate();
        let sig = keypair.sign(b"message");
        assert!(!verify(&Address::zero(), b"message", &sig));
    }

    #[test]
    fn keypair_is_deterministic_from_seed() {
        let a = Keypair::from_seed([7; 32]);
        let b = Keypair::from_seed([7; 32]);
        assert_eq!(a.address(), b.address());
        assert_eq!(a.sign(b"x"), b.sign(b"x"));
    }
}
