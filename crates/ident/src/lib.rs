//! # Ident - Identifier & Hashing Primitives
//!
//! Every Part and Block in a ShardKV store is named by a fixed-length random
//! [`Id`]. Logical keys are hashed into a [`fingerprint`] of the same length so
//! that routing can compare keys and shard names directly with
//! [`xor_distance`].
//!
//! Two projections of an id are used as map keys:
//!
//! ```text
//! Id / fingerprint (32 bytes)
//!   ├── numeric_key() -> u64     first 8 bytes, big-endian (Part/Block maps)
//!   └── slot_key()    -> String  lowercase hex of all 32 bytes (Block slot map)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use ident::{fingerprint, Id};
//!
//! let f = fingerprint("user:42");
//! assert_eq!(f, fingerprint("user:42"));
//! assert_eq!(f.slot_key().len(), 64);
//! let _same = Id::from_bytes(*f.as_bytes());
//! ```

use rand::rngs::OsRng;
use rand::TryRngCore;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Length in bytes of every identifier and key fingerprint.
pub const ID_LEN: usize = 32;

/// Length in bytes of a block content checksum.
pub const CHECKSUM_LEN: usize = 32;

/// Errors produced while generating identifiers.
#[derive(Debug, Error)]
pub enum IdError {
    /// The operating system entropy source could not be read.
    #[error("entropy source failed: {0}")]
    Entropy(String),
}

/// Opaque, fixed-length name of a Part or Block, also used for key
/// fingerprints.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id([u8; ID_LEN]);

impl Id {
    /// Wraps raw bytes without validation.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Projects the id into a 64-bit map key (first 8 bytes, big-endian).
    ///
    /// Distinct random ids are assumed never to collide in this projection.
    #[must_use]
    pub fn numeric_key(&self) -> u64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(head)
    }

    /// Projects the id into the textual key used inside a Block's slot map.
    #[must_use]
    pub fn slot_key(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses the lowercase or uppercase hex form produced by [`Id::slot_key`].
    pub fn from_hex(s: &str) -> Option<Self> {
        decode_hex::<ID_LEN>(s).map(Self)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({}..)", hex::encode(&self.0[..6]))
    }
}

/// Content hash over a Block's slots.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; CHECKSUM_LEN]);

impl Checksum {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; CHECKSUM_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; CHECKSUM_LEN] {
        &self.0
    }
}

impl From<blake3::Hash> for Checksum {
    fn from(h: blake3::Hash) -> Self {
        Self(*h.as_bytes())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({}..)", hex::encode(&self.0[..6]))
    }
}

/// Generates a new identifier from the operating system's CSPRNG.
///
/// # Errors
///
/// Returns [`IdError::Entropy`] if the entropy source fails. Callers building
/// topology treat this as fatal: a shard name cannot be defaulted.
pub fn random_id() -> Result<Id, IdError> {
    let mut buf = [0u8; ID_LEN];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| IdError::Entropy(e.to_string()))?;
    Ok(Id(buf))
}

/// Hashes a logical key into its routing coordinate.
#[must_use]
pub fn fingerprint(key: &str) -> Id {
    Id(*blake3::hash(key.as_bytes()).as_bytes())
}

/// Byte-wise XOR of two ids.
///
/// Comparing two distances with `Ord` on the returned arrays is the same as
/// comparing them as 256-bit big-endian integers.
#[inline]
#[must_use]
pub fn xor_distance(a: &Id, b: &Id) -> [u8; ID_LEN] {
    let mut out = [0u8; ID_LEN];
    for (i, o) in out.iter_mut().enumerate() {
        *o = a.0[i] ^ b.0[i];
    }
    out
}

fn decode_hex<const N: usize>(s: &str) -> Option<[u8; N]> {
    let mut out = [0u8; N];
    hex::decode_to_slice(s, &mut out).ok()?;
    Some(out)
}

// ids and checksums are persisted as hex strings so the manifest stays readable

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        decode_hex::<ID_LEN>(&s)
            .map(Id)
            .ok_or_else(|| de::Error::custom(format!("invalid id: {s:?}")))
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        decode_hex::<CHECKSUM_LEN>(&s)
            .map(Checksum)
            .ok_or_else(|| de::Error::custom(format!("invalid checksum: {s:?}")))
    }
}
