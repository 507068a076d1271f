//! Namespace identifiers.
//!
//! A namespace groups the data written on chain into one logical stream when
//! it is replicated to external storage.

use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::ReplicaError;

/// Byte length of a namespace.
pub const NAMESPACE_BYTES: usize = 4;

/// A 4-byte namespace identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshSerialize, BorshDeserialize,
)]
pub struct Namespace(pub [u8; NAMESPACE_BYTES]);

impl Namespace {
    pub const fn new(bytes: [u8; NAMESPACE_BYTES]) -> Self {
        Self(bytes)
    }

    /// Parse the string form of a namespace. The input must be exactly
    /// [`NAMESPACE_BYTES`] bytes long.
    ///
    /// Only namespaces whose bytes are valid UTF-8 round-trip through
    /// `Display` and `load_str`; other namespaces display as `0x…` hex.
    pub fn load_str(s: &str) -> Result<Self, ReplicaError> {
        Self::from_slice(s.as_bytes())
    }

    /// Build a namespace from raw bytes of exactly [`NAMESPACE_BYTES`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ReplicaError> {
        let arr: [u8; NAMESPACE_BYTES] =
            bytes
                .try_into()
                .map_err(|_| ReplicaError::InvalidNamespaceLength {
                    expected: NAMESPACE_BYTES,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; NAMESPACE_BYTES] {
        &self.0
    }
}

/// Prints the raw bytes when they are valid UTF-8, `0x…` hex otherwise.
/// The hex form is never 4 bytes long, so it can't be mistaken for a namespace.
impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "0x{}", hex::encode(self.0)),
        }
    }
}

impl FromStr for Namespace {
    type Err = ReplicaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::load_str(s)
    }
}

impl From<[u8; NAMESPACE_BYTES]> for Namespace {
    fn from(bytes: [u8; NAMESPACE_BYTES]) -> Self {
        Self(bytes)
    }
}
