//! Index Cache implementation
//!
//! RwLock-guarded per-segment sub-indexes with one snapshot file each.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::codec::{decode_snapshot, encode_snapshot, Record};
use crate::error::{DriftError, Result};
use crate::segment::{parse_file_id, SegmentId};

use super::SubIndex;

/// Suffix of a snapshot that is still being written
const TEMP_SUFFIX: &str = ".tmp";

/// In-memory index mirrored to per-segment snapshot files
pub struct IndexCache {
    /// Directory where snapshots are stored
    cache_dir: PathBuf,

    /// Snapshot file name prefix
    file_prefix: String,

    /// segment id → (key → record), ascending by id
    segments: RwLock<BTreeMap<SegmentId, SubIndex>>,
}

impl IndexCache {
    /// Open `cache_dir` for snapshot file operations without loading it
    pub(crate) fn new(cache_dir: &Path, file_prefix: &str) -> Result<Self> {
        fs::create_dir_all(cache_dir)?;
        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
            file_prefix: file_prefix.to_string(),
            segments: RwLock::new(BTreeMap::new()),
        })
    }

    /// Rebuild the index from every snapshot in `cache_dir`
    ///
    /// Leftover temporary files from an interrupted rewrite are removed.
    /// If a key shows up in several snapshots (a crash between the two
    /// snapshot writes of an overwrite), the newest segment keeps it and the
    /// older snapshots are rewritten. Starts with one empty sub-index for
    /// segment `0` when no snapshot exists.
    pub fn load_all(cache_dir: &Path, file_prefix: &str) -> Result<Self> {
        fs::create_dir_all(cache_dir)?;

        let mut segments: BTreeMap<SegmentId, SubIndex> = BTreeMap::new();

        for entry in fs::read_dir(cache_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();

            if !name.starts_with(file_prefix) {
                tracing::debug!("Ignoring foreign file {:?} in {:?}", name, cache_dir);
                continue;
            }

            if let Some(stem) = name.strip_suffix(TEMP_SUFFIX) {
                if parse_file_id(stem, file_prefix).is_some() {
                    tracing::warn!("Removing interrupted snapshot write {:?}", path);
                    fs::remove_file(&path)?;
                    continue;
                }
            }

            let id = parse_file_id(&name, file_prefix).ok_or_else(|| {
                DriftError::CorruptSnapshot {
                    path: path.clone(),
                    reason: "file name does not end in a segment id".to_string(),
                }
            })?;

            let bytes = fs::read(&path)?;
            let sub = decode_snapshot(&bytes).map_err(|reason| DriftError::CorruptSnapshot {
                path: path.clone(),
                reason,
            })?;

            segments.insert(id, sub);
        }

        let dirty = resolve_duplicates(&mut segments);

        if segments.is_empty() {
            segments.insert(0, SubIndex::new());
        }

        let cache = Self {
            cache_dir: cache_dir.to_path_buf(),
            file_prefix: file_prefix.to_string(),
            segments: RwLock::new(segments),
        };

        for id in dirty {
            tracing::warn!("Snapshot {} held keys owned by a newer segment, rewriting", id);
            cache.snapshot(id)?;
        }

        Ok(cache)
    }

    /// Point `key` at `record` inside `segment_id` and persist the change
    ///
    /// The key is also dropped from whichever other sub-index held it. Both
    /// snapshots are rewritten before the change becomes visible to `get`,
    /// so a failed write leaves the index as it was. Returns the segment the
    /// key moved out of.
    ///
    /// `segment_id` must be the newest segment holding `key`. Callers
    /// serialize mutations.
    pub fn put(
        &self,
        key: &str,
        segment_id: SegmentId,
        record: Record,
    ) -> Result<Option<SegmentId>> {
        let (target, moved) = {
            let segments = self.segments.read();

            let mut target = segments.get(&segment_id).cloned().unwrap_or_default();
            target.insert(key.to_string(), record);

            let moved = segments
                .iter()
                .find(|(id, sub)| **id != segment_id && sub.contains_key(key))
                .map(|(id, sub)| {
                    let mut sub = sub.clone();
                    sub.remove(key);
                    (*id, sub)
                });

            (target, moved)
        };

        self.write_snapshot(segment_id, &target)?;

        // The key is durable now; if the older snapshot still lists it,
        // load_all keeps the newer segment's copy
        if let Some((older, sub)) = &moved {
            if let Err(e) = self.write_snapshot(*older, sub) {
                tracing::warn!(
                    "Failed to drop {:?} from snapshot {}: {}; it is resolved on load",
                    key,
                    older,
                    e
                );
            }
        }

        let moved_from = moved.as_ref().map(|(id, _)| *id);
        let mut segments = self.segments.write();
        segments.insert(segment_id, target);
        if let Some((older, sub)) = moved {
            segments.insert(older, sub);
        }

        Ok(moved_from)
    }

    /// Find the segment and record for `key`, newest segment first
    ///
    /// Every sub-index is checked so a key indexed twice is reported.
    pub fn get(&self, key: &str) -> Result<Option<(SegmentId, Record)>> {
        let segments = self.segments.read();

        let mut found: Option<(SegmentId, Record)> = None;
        for (id, sub) in segments.iter().rev() {
            if let Some(record) = sub.get(key) {
                if let Some((newer, _)) = found {
                    return Err(DriftError::invariant(format!(
                        "key {:?} indexed in segments {} and {}",
                        key, newer, id
                    )));
                }
                found = Some((*id, *record));
            }
        }

        Ok(found)
    }

    /// Drop a segment's sub-index entirely
    pub fn remove(&self, segment_id: SegmentId) -> Option<SubIndex> {
        self.segments.write().remove(&segment_id)
    }

    /// Install a complete sub-index for `segment_id`, replacing any existing one
    pub fn install(&self, segment_id: SegmentId, sub: SubIndex) {
        self.segments.write().insert(segment_id, sub);
    }

    /// Copy of one segment's sub-index
    pub fn sub_index(&self, segment_id: SegmentId) -> Option<SubIndex> {
        self.segments.read().get(&segment_id).cloned()
    }

    /// Segment ids that have a sub-index, ascending
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.read().keys().copied().collect()
    }

    /// Total number of indexed keys
    pub fn key_count(&self) -> usize {
        self.segments.read().values().map(|sub| sub.len()).sum()
    }

    /// Bytes of live entries in one segment
    pub fn live_bytes(&self, segment_id: SegmentId) -> u64 {
        self.segments
            .read()
            .get(&segment_id)
            .map(live_bytes_of)
            .unwrap_or(0)
    }

    /// Bytes of live entries across all segments
    pub fn total_live_bytes(&self) -> u64 {
        self.segments.read().values().map(live_bytes_of).sum()
    }

    /// Highest record end offset in one segment, if it has any records
    pub fn max_record_end(&self, segment_id: SegmentId) -> Result<Option<u64>> {
        let segments = self.segments.read();
        let Some(sub) = segments.get(&segment_id) else {
            return Ok(None);
        };

        let mut max: Option<u64> = None;
        for record in sub.values() {
            max = max.max(Some(record.end()?));
        }
        Ok(max)
    }

    /// Atomically rewrite the snapshot file for `segment_id`
    pub fn snapshot(&self, segment_id: SegmentId) -> Result<()> {
        let sub = self.sub_index(segment_id).unwrap_or_default();
        self.write_snapshot(segment_id, &sub)
    }

    /// Move a staged, fully synced snapshot file into place for `segment_id`
    ///
    /// Only the file moves; the in-memory sub-index is left alone.
    pub fn install_snapshot(&self, src: &Path, segment_id: SegmentId) -> Result<()> {
        let path = self.snapshot_path(segment_id);
        fs::rename(src, &path)?;
        tracing::debug!("Installed snapshot {:?} from {:?}", path, src);
        Ok(())
    }

    /// Remove the snapshot file for `segment_id`
    pub fn delete_snapshot(&self, segment_id: SegmentId) -> Result<()> {
        match fs::remove_file(self.snapshot_path(segment_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Get the cache directory path
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Generate the snapshot path for a segment id
    pub fn snapshot_path(&self, segment_id: SegmentId) -> PathBuf {
        self.cache_dir
            .join(format!("{}{}", self.file_prefix, segment_id))
    }

    /// Write a temporary file, sync it, then rename it over the live one
    fn write_snapshot(&self, segment_id: SegmentId, sub: &SubIndex) -> Result<()> {
        let bytes = encode_snapshot(sub);
        let path = self.snapshot_path(segment_id);
        let tmp = self.temp_path(segment_id);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        tracing::debug!("Wrote snapshot {:?} ({} bytes)", path, bytes.len());
        Ok(())
    }

    fn temp_path(&self, segment_id: SegmentId) -> PathBuf {
        self.cache_dir
            .join(format!("{}{}{}", self.file_prefix, segment_id, TEMP_SUFFIX))
    }
}

fn live_bytes_of(sub: &SubIndex) -> u64 {
    sub.values().map(|record| u64::from(record.size)).sum()
}

/// Keep each key only in the highest segment that lists it
///
/// Returns the ids whose sub-index lost keys.
fn resolve_duplicates(segments: &mut BTreeMap<SegmentId, SubIndex>) -> Vec<SegmentId> {
    let mut owner: HashMap<String, SegmentId> = HashMap::new();
    for (id, sub) in segments.iter() {
        for key in sub.keys() {
            owner.insert(key.clone(), *id);
        }
    }

    let mut dirty = Vec::new();
    for (id, sub) in segments.iter_mut() {
        let before = sub.len();
        sub.retain(|key, _| owner.get(key) == Some(id));
        if sub.len() != before {
            dirty.push(*id);
        }
    }
    dirty
}
