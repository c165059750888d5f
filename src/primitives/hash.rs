// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash as HashTrait;

/// 32 byte hash output. Comparison is lexicographic over the raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, HashTrait, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn zero() -> Self {
        Self([0; 32])
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hexstr: &str) -> Result<Self, &'static str> {
        let bytes = hex::decode(hexstr).map_err(|_| "invalid hexstr")?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, &'static str> {
        if slice.len() != 32 {
            return Err("invalid slice length! expected 32");
        }
        let mut out = Self([0; 32]);
        out.0.copy_from_slice(slice);
        Ok(out)
    }

    #[inline]
    #[must_use]
    pub fn hash_from_slice<T: AsRef<[u8]>>(slice: T) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(slice.as_ref());
        let mut out = Self([0; 32]);
        out.0.copy_from_slice(&hasher.finalize());
        out
    }
}

impl PartialOrd for Hash256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Hash256 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash256").field(&self.to_hex()).finish()
    }
}

impl Serialize for Hash256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        String::serialize(&self.to_hex(), serializer)
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D>(deserializer: D) -> Result<Hash256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        Hash256::from_hex(&string).map_err(|err| serde::de::Error::custom(err.to_owned()))
    }
}

/// Single SHA-256 over `bytes`
#[inline]
#[must_use]
pub fn sha256<T: AsRef<[u8]>>(bytes: T) -> Hash256 {
    Hash256::hash_from_slice(bytes)
}

/// Merkle root over an ordered list of 32 byte leaves.
///
/// The empty list maps to the all-zero hash. At each level an odd tail is
/// paired with itself. A single leaf therefore reduces to itself, not to
/// `SHA256(leaf ‖ leaf)`. The rule is consensus-visible and must not change.
#[must_use]
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return Hash256::zero();
    }

    let mut level = leaves.to_vec();

    while level.len() > 1 {
        if level.len() % 2 != 0 {
            level.push(*level.last().unwrap());
        }

        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks_exact(2) {
            let mut hasher = Sha256::new();
            hasher.update(pair[0].0);
            hasher.update(pair[1].0);
            let mut parent = Hash256([0; 32]);
            parent.0.copy_from_slice(&hasher.finalize());
            next.push(parent);
        }
        level = next;
    }

    level[0]
}

/// Per-shard sort key: `SHA256(id ‖ seed)`
#[inline]
#[must_use]
pub fn mix_hash(id: &Hash256, seed: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(id.0);
    hasher.update(seed.0);
    let mut out = Hash256([0; 32]);
    out.0.copy_from_slice(&hasher.finalize());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_hashes_known_vectors() {
        assert_eq!(
            sha256(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn merkle_root_of_empty_list_is_zero() {
        assert_eq!(merkle_root(&[]), Hash256::zero());
    }

    #[test]
    fn merkle_root_of_single_leaf_is_the_leaf() {
        let leaf = sha256(b"leaf");
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn merkle_root_of_two_leaves() {
        let a = sha256(b"a");
        let b = sha256(b"b");
        let expected = sha256([a.0, b.0].concat());
        assert_eq!(merkle_root(&[a, b]), expected);
    }

    #[test]
    fn merkle_root_duplicates_odd_tail() {
        let a = sha256(b"a");
        let b = sha256(b"b");
        let c = sha256(b"c");
        let left = sha256([a.0, b.0].concat());
        let right = sha256([c.0, c.0].concat());
        let expected = sha256([left.0, right.0].concat());
        assert_eq!(merkle_root(&[a, b, c]), expected);
    }

    #[test]
    fn mix_hash_matches_concat_hash() {
        let id = sha256(b"id");
        let seed = sha256(b"seed");
        assert_eq!(mix_hash(&id, &seed), sha256([id.0, seed.0].concat()));
    }

    #[test]
    fn hash256_orders_lexicographically() {
        let mut lo = Hash256::zero();
        let mut hi = Hash256::zero();
        lo.0[0] = 1;
        hi.0[0] = 2;
        assert!(lo < hi);
        hi.0[0] = 1;
        hi.0[31] = 1;
        assert!(lo < hi);
    }

    #[test]
    fn hash256_serde_round_trip() {
        let h = sha256(b"round trip");
        let json = serde_json::to_string(&h).unwrap();
        let back: Hash256 = serde_json::from_str(&json).unwrap();
        assert_eq!(h, back);
    }
}
