//! Content addressing: bytes → storage key.
//!
//! Keys have the form `<first 3 hex chars>/<40-char SHA-1 hex digest>`, which
//! scatters blobs over at most 4096 shard directories. The same layout is
//! used on disk, so a key doubles as the blob's path relative to the root.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::defaults::{DIGEST_HEX_LEN, SHARD_PREFIX_LEN};
use crate::{Error, Result};

/// Identifier of a blob in the blob store, derived from its content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageKey {
    digest: String,
}

impl StorageKey {
    /// Parse a key as stored in a record.
    ///
    /// Leading/trailing slashes are tolerated (older rows were written with
    /// them); anything else that is not `<shard>/<digest>` with a matching
    /// shard prefix is rejected, which also rules out path traversal.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim_matches(|c| c == '/' || c == '\\');
        let (shard, digest) = trimmed
            .split_once('/')
            .ok_or_else(|| Error::InvalidStorageKey(raw.to_string()))?;

        let well_formed = digest.len() == DIGEST_HEX_LEN
            && digest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
            && shard == &digest[..SHARD_PREFIX_LEN];
        if !well_formed {
            return Err(Error::InvalidStorageKey(raw.to_string()));
        }

        Ok(Self {
            digest: digest.to_string(),
        })
    }

    /// Full hex digest.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Shard directory name.
    pub fn shard(&self) -> &str {
        &self.digest[..SHARD_PREFIX_LEN]
    }

    /// Path of the blob relative to the storage root.
    pub fn relative_path(&self) -> PathBuf {
        Path::new(self.shard()).join(&self.digest)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.shard(), self.digest)
    }
}

impl TryFrom<String> for StorageKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<StorageKey> for String {
    fn from(key: StorageKey) -> Self {
        key.to_string()
    }
}

/// Compute the storage key of a byte sequence.
///
/// Deterministic and side-effect free; the empty sequence has a well defined
/// key like any other.
pub fn address_of(data: &[u8]) -> StorageKey {
    let digest = hex::encode(Sha1::digest(data));
    StorageKey { digest }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA1: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    #[test]
    fn test_address_of_empty_input() {
        let key = address_of(b"");
        assert_eq!(key.digest(), EMPTY_SHA1);
        assert_eq!(key.to_string(), format!("da3/{}", EMPTY_SHA1));
    }

    #[test]
    fn test_address_of_known_vector() {
        // sha1("abc")
        let key = address_of(b"abc");
        assert_eq!(
            key.to_string(),
            "a99/a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_address_is_deterministic() {
        let data = b"the same bytes every time";
        assert_eq!(address_of(data), address_of(data));
        assert_eq!(address_of(data).to_string(), address_of(data).to_string());
    }

    #[test]
    fn test_distinct_content_distinct_keys() {
        assert_ne!(address_of(b"A"), address_of(b"B"));
        assert_ne!(address_of(b"A"), address_of(b"A\n"));
    }

    #[test]
    fn test_shard_is_digest_prefix() {
        let key = address_of(b"shard me");
        assert_eq!(key.shard().len(), 3);
        assert!(key.digest().starts_with(key.shard()));
        assert_eq!(
            key.relative_path(),
            PathBuf::from(key.shard()).join(key.digest())
        );
    }

    #[test]
    fn test_parse_round_trips_display() {
        let key = address_of(b"round trip");
        let parsed = StorageKey::parse(&key.to_string()).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_parse_tolerates_surrounding_slashes() {
        let key = address_of(b"legacy");
        let parsed = StorageKey::parse(&format!("/{}/", key)).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_parse_rejects_traversal() {
        assert!(matches!(
            StorageKey::parse("../etc/passwd"),
            Err(Error::InvalidStorageKey(_))
        ));
    }

    #[test]
    fn test_parse_rejects_mismatched_shard() {
        let key = address_of(b"mismatch");
        let raw = format!("fff/{}", key.digest());
        if key.shard() != "fff" {
            assert!(StorageKey::parse(&raw).is_err());
        }
    }

    #[test]
    fn test_parse_rejects_uppercase_and_short() {
        let key = address_of(b"case");
        let upper = format!("{}/{}", key.shard(), key.digest().to_uppercase());
        assert!(StorageKey::parse(&upper).is_err());
        assert!(StorageKey::parse("abc/abc").is_err());
        assert!(StorageKey::parse("").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let key = address_of(b"serde");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key));
        let back: StorageKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<StorageKey>("\"nope\"").is_err());
    }
}
