use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of a [`BlobHash`] in bytes (SHA-256).
pub const HASH_LEN: usize = 32;

/// Content digest identifying a blob in the content store.
///
/// Hashes are the only handle the rest of the system ever holds on file
/// content - snapshots, log entries, and diffs all carry hashes, never bytes.
/// Rendering is lowercase hex; parsing happens at the boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobHash([u8; HASH_LEN]);

#[derive(Debug, Error)]
#[error("invalid blob hash: {0:?}")]
pub struct HashParseError(String);

impl BlobHash {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn parse(raw: &str) -> Result<Self, HashParseError> {
        let bytes = hex::decode(raw).map_err(|_| HashParseError(raw.to_string()))?;
        let bytes: [u8; HASH_LEN] = bytes
            .try_into()
            .map_err(|_| HashParseError(raw.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Full digests drown debug output; eight hex chars identify a blob in practice.
        write!(f, "BlobHash({}..)", &self.to_hex()[..8])
    }
}

impl FromStr for BlobHash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BlobHash {
    type Error = HashParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BlobHash> for String {
    fn from(value: BlobHash) -> Self {
        value.to_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BlobHash {
        BlobHash::from_bytes([0xab; HASH_LEN])
    }

    #[test]
    fn hex_round_trip() {
        let hash = sample();
        let parsed = BlobHash::parse(&hash.to_hex()).expect("parse");
        assert_eq!(parsed, hash);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(BlobHash::parse("").is_err());
        assert!(BlobHash::parse("abcd").is_err());
        assert!(BlobHash::parse(&"zz".repeat(HASH_LEN)).is_err());
    }

    #[test]
    fn serde_as_hex_string() {
        let json = serde_json::to_string(&sample()).expect("serialize");
        assert_eq!(json, format!("\"{}\"", "ab".repeat(HASH_LEN)));
        let back: BlobHash = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, sample());
    }
}
