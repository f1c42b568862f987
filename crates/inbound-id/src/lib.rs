//! Stable executable identities plus the canonical CBOR hashing they are built on.
//!
//! An [`ExecutableId`] is the SHA-256 digest of a deduplication string. It is
//! opaque (not invertible) and stable across restarts as long as the
//! deduplication inputs do not change.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_cbor::{ser::Write as CborWrite, value::Value as CborValue};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Serialize a value into canonical CBOR bytes using RFC 8949 deterministic rules.
pub fn to_canonical_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_cbor::Error> {
    let mut buf = Vec::with_capacity(128);
    write_canonical_cbor(value, &mut buf)?;
    Ok(buf)
}

/// Serialize a value directly into an arbitrary CBOR writer using canonical settings.
pub fn write_canonical_cbor<T: Serialize, W>(value: &T, writer: W) -> Result<(), serde_cbor::Error>
where
    W: CborWrite,
{
    // Round-tripping through `Value` sorts map keys.
    let canonical_value: CborValue = serde_cbor::value::to_value(value)?;
    let mut serializer = serde_cbor::ser::Serializer::new(writer);
    serializer.self_describe()?;
    canonical_value.serialize(&mut serializer)
}

/// Hex-encoded SHA-256 digest of a value's canonical CBOR encoding.
pub fn canonical_digest_hex<T: Serialize>(value: &T) -> Result<String, serde_cbor::Error> {
    let bytes = to_canonical_cbor(value)?;
    Ok(hex::encode(sha256(&bytes)))
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&digest);
    arr
}

/// Identity of one inbound executable, derived from its deduplication string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutableId([u8; 32]);

impl ExecutableId {
    /// Derive the identity for a deduplication string.
    pub fn from_dedup_id(dedup_id: &str) -> Self {
        Self(sha256(dedup_id.as_bytes()))
    }

    /// Borrow the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Render the digest as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short prefix used in log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }

    /// Parse an identity from its 64-character hex representation.
    pub fn from_hex_str(s: &str) -> Result<Self, IdParseError> {
        if s.len() != 64 {
            return Err(IdParseError::InvalidLength(s.len()));
        }
        let mut buf = [0u8; 32];
        hex::decode_to_slice(s, &mut buf).map_err(IdParseError::InvalidHex)?;
        Ok(Self(buf))
    }

    /// Attempt to build an identity from raw bytes, ensuring the length matches.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdLengthError> {
        if bytes.len() != 32 {
            return Err(IdLengthError(bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for ExecutableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExecutableId").field(&self.short()).finish()
    }
}

impl fmt::Display for ExecutableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ExecutableId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex_str(s)
    }
}

impl From<[u8; 32]> for ExecutableId {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for ExecutableId {
    type Error = IdLengthError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(value)
    }
}

impl Serialize for ExecutableId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ExecutableId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Error returned when an identity string is malformed.
#[derive(Debug, thiserror::Error)]
pub enum IdParseError {
    #[error("executable id hex length must be 64, got {0}")]
    InvalidLength(usize),
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Error returned when attempting to create an identity from the wrong byte length.
#[derive(Debug, thiserror::Error)]
#[error("executable id must be 32 bytes, got {0}")]
pub struct IdLengthError(pub usize);
