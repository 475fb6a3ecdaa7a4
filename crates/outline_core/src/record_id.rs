//! Content-addressed record identifiers.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A 32-byte BLAKE3 content hash identifying a thought or a context.
///
/// Thought ids hash the normalized text of the thought, so two occurrences of
/// the same text anywhere in the graph resolve to the same record. Context ids
/// hash the ordered sequence of ancestor thought ids.
///
/// # Examples
///
/// ```
/// use outline_core::RecordId;
///
/// assert_eq!(RecordId::hash_text("Apple"), RecordId::hash_text("  apple "));
/// assert_ne!(RecordId::hash_text("apple"), RecordId::hash_text("apples"));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId([u8; 32]);

impl RecordId {
    /// The length of a RecordId in bytes.
    pub const LEN: usize = 32;

    /// The length of a RecordId as a hex string.
    pub const HEX_LEN: usize = 64;

    /// Creates a RecordId from raw bytes.
    #[inline]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns a reference to the underlying 32-byte hash.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns this RecordId as a lowercase hex string (64 characters).
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a RecordId from a hex string.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidHex` if the string is not valid hex
    /// or is not exactly 64 characters long.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != Self::HEX_LEN {
            return Err(StoreError::InvalidHex(format!(
                "expected {} hex chars, got {}",
                Self::HEX_LEN,
                s.len()
            )));
        }

        let bytes = hex::decode(s).map_err(|e| StoreError::InvalidHex(e.to_string()))?;

        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| StoreError::InvalidHex("invalid length".to_string()))?;

        Ok(Self(arr))
    }

    /// Computes the id of a thought from its text.
    ///
    /// The text is normalized first (see [`normalize_text`]), so values that
    /// differ only in case or surrounding whitespace share an id.
    pub fn hash_text(value: &str) -> Self {
        let normalized = normalize_text(value);
        let canonical = canonical_bytes(IdKind::Text, normalized.as_bytes());
        Self::hash_canonical(&canonical)
    }

    /// Computes the id of a context from its path of ancestor thought ids.
    ///
    /// Order-sensitive: `[a, b]` and `[b, a]` produce different ids. The empty
    /// path is the root context.
    pub fn hash_path(path: &[RecordId]) -> Self {
        let mut payload = Vec::with_capacity(path.len() * Self::LEN);
        for id in path {
            payload.extend_from_slice(id.as_bytes());
        }
        let canonical = canonical_bytes(IdKind::Path, &payload);
        Self::hash_canonical(&canonical)
    }

    /// Returns the id of the root context.
    pub fn root() -> Self {
        Self::hash_path(&[])
    }

    fn hash_canonical(canonical: &[u8]) -> Self {
        let hash = blake3::hash(canonical);
        Self::from_bytes(*hash.as_bytes())
    }
}

/// Normalizes thought text before hashing: trims, collapses runs of
/// whitespace to a single space, and lower-cases.
pub fn normalize_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({}...)", &self.as_hex()[..12])
    }
}

// Hex strings in human-readable formats (change events are JSON), raw bytes
// everywhere else (postcard values in redb).
impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.as_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Self::from_hex(&s).map_err(serde::de::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(Self)
        }
    }
}

/// Id kind discriminant for the canonical envelope.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IdKind {
    /// Normalized thought text.
    Text = 1,
    /// Concatenated ancestor ids.
    Path = 2,
}

/// Canonical envelope magic bytes.
const MAGIC: &[u8; 5] = b"OUTL1";

/// Constructs canonical bytes for hashing.
///
/// Format:
/// - Magic: "OUTL1" (5 bytes)
/// - Kind: u8 (1 byte)
/// - Length: u64 LE (8 bytes)
/// - Payload: variable bytes
fn canonical_bytes(kind: IdKind, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + 1 + 8 + payload.len());
    out.extend_from_slice(MAGIC);
    out.push(kind as u8);
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(payload);
    out
}
