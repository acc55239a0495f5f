//! Frame and content hash types.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Format of a frame's storage key, e.g. `20240302T031000Z`.
pub const TIMESTAMP_KEY_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// SHA-256 digest of a frame's raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 12 hex digits, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid content hash: {0}")]
pub struct ParseHashError(String);

impl FromStr for ContentHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).map_err(|e| ParseHashError(e.to_string()))?;
        Ok(Self(out))
    }
}

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One timestamped MUF map image.
///
/// Immutable: the hash is computed once at construction and the bytes are
/// shared, so clones are cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    timestamp: DateTime<Utc>,
    source_id: String,
    raw_bytes: Arc<[u8]>,
    content_hash: ContentHash,
}

impl Frame {
    pub fn new(timestamp: DateTime<Utc>, source_id: impl Into<String>, raw_bytes: Vec<u8>) -> Self {
        let content_hash = ContentHash::of(&raw_bytes);
        Self {
            timestamp,
            source_id: source_id.into(),
            raw_bytes: raw_bytes.into(),
            content_hash,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw_bytes
    }

    pub fn content_hash(&self) -> ContentHash {
        self.content_hash
    }

    /// Storage key derived from the timestamp.
    pub fn key(&self) -> String {
        timestamp_key(self.timestamp)
    }

    /// Persisted description of this frame, minus the bytes.
    pub fn meta(&self) -> FrameMeta {
        FrameMeta {
            timestamp: self.timestamp,
            source_id: self.source_id.clone(),
            content_hash: self.content_hash,
            size: self.raw_bytes.len() as u64,
        }
    }
}

/// Sidecar metadata written next to each cached frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub content_hash: ContentHash,
    pub size: u64,
}

/// Storage key for a timestamp. Sorting keys lexically sorts by time.
pub fn timestamp_key(timestamp: DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_KEY_FORMAT).to_string()
}

/// Inverse of [`timestamp_key`].
pub fn parse_timestamp_key(key: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(key, TIMESTAMP_KEY_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_identical_bytes_share_hash() {
        let t1 = Utc.with_ymd_and_hms(2024, 3, 2, 3, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 3, 2, 3, 10, 0).unwrap();
        let a = Frame::new(t1, "a.png", b"same map".to_vec());
        let b = Frame::new(t2, "b.png", b"same map".to_vec());
        let c = Frame::new(t2, "b.png", b"new map".to_vec());

        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(b.content_hash(), c.content_hash());
    }

    #[test]
    fn test_hash_display_parses_back() {
        let hash = ContentHash::of(b"muf");
        let text = hash.to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(text.parse::<ContentHash>().unwrap(), hash);
        assert!(text.starts_with(&hash.short()));
        assert!("not-hex".parse::<ContentHash>().is_err());
    }

    #[test]
    fn test_timestamp_key_is_sortable_and_reversible() {
        let early = Utc.with_ymd_and_hms(2023, 12, 31, 23, 50, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(timestamp_key(late), "20240101T000000Z");
        assert!(timestamp_key(early) < timestamp_key(late));
        assert_eq!(parse_timestamp_key(&timestamp_key(early)), Some(early));
        assert_eq!(parse_timestamp_key("garbage"), None);
    }

    #[test]
    fn test_meta_json_shape() {
        let t = Utc.with_ymd_and_hms(2024, 3, 2, 3, 0, 0).unwrap();
        let frame = Frame::new(t, "/images/CTIPe-MUF_20240302T030000.png", vec![1, 2, 3]);
        let json = serde_json::to_value(frame.meta()).unwrap();
        assert_eq!(json["size"], 3);
        assert_eq!(json["source_id"], "/images/CTIPe-MUF_20240302T030000.png");
        assert_eq!(
            json["content_hash"].as_str().unwrap(),
            frame.content_hash().to_string()
        );
    }
}
