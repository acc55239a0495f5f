//! Provider listing entries.
//!
//! The provider publishes a JSON array of objects, one per available frame:
//!
//! ```json
//! [
//!   {"url": "/images/animations/ctipe/muf/CTIPe-MUF_20240302T031000.png",
//!    "time_tag": "2024-03-02T03:10:00Z"}
//! ]
//! ```
//!
//! `time_tag` is optional; without it the timestamp is recovered from the
//! file name. Entries that yield no identifier or timestamp are skipped and
//! counted instead of failing the listing. So are entries timestamped with
//! sub-second precision: frames are keyed by whole seconds.

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde_json::Value;

/// One listed frame: when it is valid for and where to get it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameRef {
    pub timestamp: DateTime<Utc>,
    /// Provider path, joined with the base URL to download.
    pub source_id: String,
}

/// A parsed listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Usable entries, ascending by timestamp, one per timestamp.
    pub refs: Vec<FrameRef>,

    /// Entries that were malformed or had no recoverable timestamp.
    pub skipped: usize,

    /// Entries dropped because an earlier entry had the same timestamp.
    pub duplicates: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ListingError {
    #[error("listing is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("listing is not a JSON array")]
    NotAnArray,
}

/// File name timestamp layouts seen in provider paths, most precise first.
const NAME_FORMATS: [&str; 4] = ["%Y%m%dT%H%M%S", "%Y%m%dT%H%M", "%Y%m%d%H%M%S", "%Y%m%d%H%M"];

impl Listing {
    /// Parse the provider's JSON index.
    pub fn parse(bytes: &[u8]) -> Result<Self, ListingError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let entries = value.as_array().ok_or(ListingError::NotAnArray)?;

        let mut listing = Listing::default();
        let mut refs = Vec::with_capacity(entries.len());
        for entry in entries {
            match parse_entry(entry) {
                Some(frame_ref) => refs.push(frame_ref),
                None => listing.skipped += 1,
            }
        }

        // Stable sort keeps the first-listed entry for a repeated timestamp.
        refs.sort_by_key(|r| r.timestamp);
        let before = refs.len();
        refs.dedup_by_key(|r| r.timestamp);
        listing.duplicates = before - refs.len();
        listing.refs = refs;
        Ok(listing)
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }
}

fn parse_entry(entry: &Value) -> Option<FrameRef> {
    let url = entry.get("url")?.as_str()?.trim();
    if url.is_empty() {
        return None;
    }

    let timestamp = entry
        .get("time_tag")
        .and_then(Value::as_str)
        .and_then(parse_time_tag)
        .or_else(|| timestamp_from_name(url))?;
    if timestamp.nanosecond() != 0 {
        return None;
    }

    Some(FrameRef {
        timestamp,
        source_id: url.to_string(),
    })
}

fn parse_time_tag(tag: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(tag) {
        return Some(dt.with_timezone(&Utc));
    }
    // Provider time tags sometimes omit the offset.
    NaiveDateTime::parse_from_str(tag, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(tag, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Recover the timestamp from a path like `.../CTIPe-MUF_20240302T031000.png`.
pub fn timestamp_from_name(path: &str) -> Option<DateTime<Utc>> {
    let name = path.rsplit('/').next()?;
    let stem = name.split('.').next()?;
    let stamp = stem.rsplit('_').next()?;
    let stamp = stamp.trim_end_matches(['Z', 'z']);

    NAME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(stamp, fmt).ok())
        .map(|naive| naive.and_utc())
}
