//! AnimMUF Frame Store
//!
//! Local, append-only cache of provider frames keyed by timestamp. It is
//! the only state that survives between runs, so a re-run never downloads
//! a frame that is already cached.
//!
//! # Layout
//!
//! ```text
//! <target_dir>/frames/
//!   20240302T031000Z.frame   raw image bytes
//!   20240302T031000Z.json    {timestamp, source_id, content_hash, size}
//!   20240302T032000Z.gone    provider reported this frame permanently missing
//! ```
//!
//! The `.json` sidecar is written last and acts as the commit marker: a
//! frame exists once its sidecar does. Both files are written to a
//! temporary name and renamed into place.
//!
//! Gone markers age out with the same retention as frames, so a frame the
//! provider lost is requested once per retention window, not once per run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use animmuf_common::error::StoreError;
use animmuf_frame_model::{parse_timestamp_key, timestamp_key, Frame, FrameMeta};
use chrono::{DateTime, Utc};

const BLOB_EXT: &str = "frame";
const META_EXT: &str = "json";
const GONE_EXT: &str = "gone";
const TMP_EXT: &str = "tmp";

/// Result of [`FrameStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// New frame persisted.
    Stored,
    /// Same bytes already cached at this timestamp; nothing written.
    Unchanged,
    /// Another worker is writing this timestamp right now; treated as a
    /// duplicate and skipped.
    InFlight,
}

/// Timestamp-keyed on-disk frame cache.
#[derive(Debug)]
pub struct FrameStore {
    root: PathBuf,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases a per-timestamp write claim on drop.
struct WriteClaim<'a> {
    store: &'a FrameStore,
    key: String,
}

impl Drop for WriteClaim<'_> {
    fn drop(&mut self) {
        self.store.claims().remove(&self.key);
    }
}

impl FrameStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Leftover temporary files from an interrupted run are removed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;

        let store = Self {
            root,
            in_flight: Mutex::new(HashSet::new()),
        };
        let mut removed = 0usize;
        for path in store.entries_with_ext(TMP_EXT)? {
            if std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::warn!(removed, root = %store.root.display(), "Removed partial frame writes");
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a frame is committed for `timestamp`.
    pub fn has(&self, timestamp: DateTime<Utc>) -> bool {
        self.meta_path(&timestamp_key(timestamp)).is_file()
    }

    /// Whether `timestamp` was recorded as permanently missing.
    pub fn is_gone(&self, timestamp: DateTime<Utc>) -> bool {
        self.gone_path(&timestamp_key(timestamp)).is_file()
    }

    /// Record that the provider no longer has `timestamp`. The marker holds
    /// the reason for inspection.
    pub fn mark_gone(&self, timestamp: DateTime<Utc>, reason: &str) -> Result<(), StoreError> {
        let key = timestamp_key(timestamp);
        write_atomic(&self.gone_path(&key), reason.as_bytes())?;
        tracing::debug!(key = %key, reason, "Frame marked gone");
        Ok(())
    }

    /// Timestamps with a gone marker, ascending.
    pub fn gone_timestamps(&self) -> Result<Vec<DateTime<Utc>>, StoreError> {
        self.keys_with_ext(GONE_EXT)
    }

    /// Persist `frame`.
    ///
    /// Idempotent for identical content. Different content at an already
    /// stored timestamp is a [`StoreError::Conflict`] and nothing is written.
    pub fn put(&self, frame: &Frame) -> Result<PutOutcome, StoreError> {
        let key = frame.key();
        let Some(_claim) = self.claim(&key) else {
            tracing::debug!(key = %key, "Frame write already in flight");
            return Ok(PutOutcome::InFlight);
        };

        let meta_path = self.meta_path(&key);
        if meta_path.is_file() {
            let stored = self.read_meta(&meta_path)?;
            if stored.content_hash == frame.content_hash() {
                return Ok(PutOutcome::Unchanged);
            }
            return Err(StoreError::Conflict {
                timestamp: frame.timestamp(),
                stored: stored.content_hash.to_string(),
                offered: frame.content_hash().to_string(),
            });
        }

        let meta_json = serde_json::to_vec_pretty(&frame.meta())
            .map_err(|e| StoreError::corrupt(&meta_path, e.to_string()))?;
        write_atomic(&self.blob_path(&key), frame.raw_bytes())?;
        write_atomic(&meta_path, &meta_json)?;

        tracing::debug!(
            key = %key,
            hash = %frame.content_hash().short(),
            bytes = frame.raw_bytes().len(),
            "Frame stored"
        );
        Ok(PutOutcome::Stored)
    }

    /// Load the frame stored at `timestamp`, verifying its hash.
    pub fn get(&self, timestamp: DateTime<Utc>) -> Result<Option<Frame>, StoreError> {
        let key = timestamp_key(timestamp);
        let meta_path = self.meta_path(&key);
        if !meta_path.is_file() {
            return Ok(None);
        }
        self.load(&key, &meta_path).map(Some)
    }

    /// Frames with `from <= timestamp <= to`, ascending.
    pub fn get_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Frame>, StoreError> {
        let mut frames = Vec::new();
        for timestamp in self.timestamps()? {
            if timestamp < from || timestamp > to {
                continue;
            }
            let key = timestamp_key(timestamp);
            frames.push(self.load(&key, &self.meta_path(&key))?);
        }
        Ok(frames)
    }

    /// Every committed timestamp, ascending.
    pub fn timestamps(&self) -> Result<Vec<DateTime<Utc>>, StoreError> {
        self.keys_with_ext(META_EXT)
    }

    fn keys_with_ext(&self, ext: &str) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let mut timestamps: Vec<_> = self
            .entries_with_ext(ext)?
            .iter()
            .filter_map(|path| path.file_stem()?.to_str().and_then(parse_timestamp_key))
            .collect();
        timestamps.sort();
        Ok(timestamps)
    }

    /// Remove frames and gone markers older than `cutoff`. Returns how many
    /// frames were removed.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0;
        for timestamp in self.timestamps()? {
            if timestamp < cutoff && self.remove(timestamp)? {
                removed += 1;
            }
        }
        for timestamp in self.gone_timestamps()? {
            if timestamp < cutoff {
                self.clear_gone(timestamp)?;
            }
        }
        if removed > 0 {
            tracing::info!(removed, cutoff = %cutoff, "Pruned old frames");
        }
        Ok(removed)
    }

    /// Remove frames whose timestamp is not in `keep`. Returns how many
    /// were removed.
    pub fn retain_only(&self, keep: &HashSet<DateTime<Utc>>) -> Result<usize, StoreError> {
        let mut removed = 0;
        for timestamp in self.timestamps()? {
            if !keep.contains(&timestamp) && self.remove(timestamp)? {
                removed += 1;
            }
        }
        for timestamp in self.gone_timestamps()? {
            if !keep.contains(&timestamp) {
                self.clear_gone(timestamp)?;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "Removed frames no longer listed by the provider");
        }
        Ok(removed)
    }

    fn remove(&self, timestamp: DateTime<Utc>) -> Result<bool, StoreError> {
        let key = timestamp_key(timestamp);
        let Some(_claim) = self.claim(&key) else {
            return Ok(false);
        };
        // Sidecar first: once it is gone the frame no longer exists.
        let meta_path = self.meta_path(&key);
        match std::fs::remove_file(&meta_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(StoreError::io(&meta_path, e)),
        }
        let blob_path = self.blob_path(&key);
        if let Err(e) = std::fs::remove_file(&blob_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %e, path = %blob_path.display(), "Failed to remove frame blob");
            }
        }
        tracing::debug!(key = %key, "Frame removed");
        Ok(true)
    }

    fn clear_gone(&self, timestamp: DateTime<Utc>) -> Result<(), StoreError> {
        let path = self.gone_path(&timestamp_key(timestamp));
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    fn load(&self, key: &str, meta_path: &Path) -> Result<Frame, StoreError> {
        let meta = self.read_meta(meta_path)?;
        let blob_path = self.blob_path(key);
        let bytes = std::fs::read(&blob_path).map_err(|e| StoreError::io(&blob_path, e))?;
        let frame = Frame::new(meta.timestamp, meta.source_id, bytes);
        if frame.content_hash() != meta.content_hash {
            return Err(StoreError::corrupt(
                blob_path,
                format!(
                    "hash {} does not match recorded {}",
                    frame.content_hash(),
                    meta.content_hash
                ),
            ));
        }
        if frame.key() != key {
            return Err(StoreError::corrupt(
                meta_path,
                format!("metadata timestamp {} does not match key", meta.timestamp),
            ));
        }
        Ok(frame)
    }

    fn read_meta(&self, path: &Path) -> Result<FrameMeta, StoreError> {
        let bytes = std::fs::read(path).map_err(|e| StoreError::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::corrupt(path, e.to_string()))
    }

    fn claim(&self, key: &str) -> Option<WriteClaim<'_>> {
        if self.claims().insert(key.to_string()) {
            Some(WriteClaim {
                store: self,
                key: key.to_string(),
            })
        } else {
            None
        }
    }

    fn claims(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // A panicking writer cannot leave the set inconsistent.
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn entries_with_ext(&self, ext: &str) -> Result<Vec<PathBuf>, StoreError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&self.root, e))?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ext) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{BLOB_EXT}"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{META_EXT}"))
    }

    fn gone_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{GONE_EXT}"))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension(format!(
        "{}.{TMP_EXT}",
        path.extension().and_then(|e| e.to_str()).unwrap_or_default()
    ));
    std::fs::write(&tmp, bytes).map_err(|e| StoreError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn frame(minute: i64, bytes: &[u8]) -> Frame {
        Frame::new(t(minute), format!("/muf/CTIPe-MUF_{minute}.png"), bytes.to_vec())
    }

    fn open() -> (tempfile::TempDir, FrameStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::open(dir.path().join("frames")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_then_get() {
        let (_dir, store) = open();
        let f = frame(0, b"png bytes");

        assert!(!store.has(t(0)));
        assert_eq!(store.put(&f).unwrap(), PutOutcome::Stored);
        assert!(store.has(t(0)));

        let loaded = store.get(t(0)).unwrap().unwrap();
        assert_eq!(loaded, f);
        assert!(store.get(t(5)).unwrap().is_none());
    }

    #[test]
    fn test_put_is_idempotent() {
        let (_dir, store) = open();
        let f = frame(0, b"png bytes");

        store.put(&f).unwrap();
        let files_before = std::fs::read_dir(store.root()).unwrap().count();
        assert_eq!(store.put(&f).unwrap(), PutOutcome::Unchanged);
        let files_after = std::fs::read_dir(store.root()).unwrap().count();

        assert_eq!(files_before, files_after);
        assert_eq!(store.timestamps().unwrap(), vec![t(0)]);
    }

    #[test]
    fn test_conflicting_bytes_are_rejected() {
        let (_dir, store) = open();
        store.put(&frame(0, b"original")).unwrap();

        let err = store.put(&frame(0, b"corrected")).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.get(t(0)).unwrap().unwrap().raw_bytes(), b"original");
    }

    #[test]
    fn test_in_flight_write_is_a_duplicate() {
        let (_dir, store) = open();
        let f = frame(0, b"png");
        let _claim = store.claim(&f.key()).unwrap();

        assert_eq!(store.put(&f).unwrap(), PutOutcome::InFlight);
        assert!(!store.has(t(0)));
    }

    #[test]
    fn test_get_range_is_inclusive_and_ascending() {
        let (_dir, store) = open();
        for minute in [20, 0, 10, 30] {
            store.put(&frame(minute, &[minute as u8])).unwrap();
        }

        let range = store.get_range(t(10), t(30)).unwrap();
        let got: Vec<_> = range.iter().map(Frame::timestamp).collect();
        assert_eq!(got, vec![t(10), t(20), t(30)]);
    }

    #[test]
    fn test_prune_older_than() {
        let (_dir, store) = open();
        for minute in [0, 10, 20] {
            store.put(&frame(minute, &[minute as u8])).unwrap();
        }

        assert_eq!(store.prune_older_than(t(15)).unwrap(), 2);
        assert_eq!(store.timestamps().unwrap(), vec![t(20)]);
        assert_eq!(store.prune_older_than(t(15)).unwrap(), 0);
    }

    #[test]
    fn test_retain_only() {
        let (_dir, store) = open();
        for minute in [0, 10, 20] {
            store.put(&frame(minute, &[minute as u8])).unwrap();
        }

        let keep: HashSet<_> = [t(10)].into_iter().collect();
        assert_eq!(store.retain_only(&keep).unwrap(), 2);
        assert_eq!(store.timestamps().unwrap(), vec![t(10)]);
    }

    #[test]
    fn test_gone_markers_persist_until_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("frames");
        {
            let store = FrameStore::open(&root).unwrap();
            store.mark_gone(t(0), "HTTP 404").unwrap();
            store.mark_gone(t(20), "HTTP 410").unwrap();
        }

        let store = FrameStore::open(&root).unwrap();
        assert!(store.is_gone(t(0)));
        assert!(!store.has(t(0)));
        assert!(store.timestamps().unwrap().is_empty());
        assert_eq!(store.gone_timestamps().unwrap(), vec![t(0), t(20)]);
        assert_eq!(std::fs::read_to_string(store.gone_path(&timestamp_key(t(20)))).unwrap(), "HTTP 410");

        assert_eq!(store.prune_older_than(t(10)).unwrap(), 0);
        assert_eq!(store.gone_timestamps().unwrap(), vec![t(20)]);

        store.retain_only(&HashSet::new()).unwrap();
        assert!(!store.is_gone(t(20)));
    }

    #[test]
    fn test_tampered_blob_is_corrupt() {
        let (_dir, store) = open();
        let f = frame(0, b"png");
        store.put(&f).unwrap();
        std::fs::write(store.blob_path(&f.key()), b"tampered").unwrap();

        let err = store.get(t(0)).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_reopen_sees_cached_frames_and_drops_partials() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("frames");
        {
            let store = FrameStore::open(&root).unwrap();
            store.put(&frame(0, b"png")).unwrap();
        }
        std::fs::write(root.join("20240302T001000Z.frame.tmp"), b"partial").unwrap();

        let store = FrameStore::open(&root).unwrap();
        assert!(store.has(t(0)));
        assert!(!root.join("20240302T001000Z.frame.tmp").exists());
        assert_eq!(store.timestamps().unwrap(), vec![t(0)]);
    }
}
