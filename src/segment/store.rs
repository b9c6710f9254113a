//! Segment Store
//!
//! Owns the set of segment files and every raw write against them.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use crate::error::{DriftError, Result};

use super::{parse_file_id, SegmentId, SegmentReader};

/// Manages the segment files of one store
///
/// ## Concurrency:
/// - `ids`: RwLock (many concurrent readers, exclusive rotation/retirement)
/// - `create_lock`: store-wide guard around directory and file creation
/// - `writer`: cached append handle on the active segment
/// - All methods use `&self`; appends are additionally serialized by the
///   engine's write lock
pub struct SegmentStore {
    /// Directory where segments are stored
    data_dir: PathBuf,

    /// Segment file name prefix
    file_prefix: String,

    /// `sync_data` after each append
    sync_writes: bool,

    /// Known segment ids, ascending; never empty
    ids: RwLock<BTreeSet<SegmentId>>,

    /// Serializes file creation so racing callers never both create a path
    create_lock: Mutex<()>,

    /// Open append handle on the active segment
    writer: Mutex<Option<ActiveWriter>>,
}

/// Append handle plus the file length it has observed
struct ActiveWriter {
    id: SegmentId,
    file: File,
    len: u64,
}

impl ActiveWriter {
    fn open(path: &Path, id: SegmentId) -> Result<Self> {
        let file = OpenOptions::new().append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { id, file, len })
    }

    fn write(&mut self, bytes: &[u8], sync: bool) -> io::Result<()> {
        self.file.write_all(bytes)?;
        self.file.flush()?;
        if sync {
            self.file.sync_data()?;
        }
        self.len += bytes.len() as u64;
        Ok(())
    }
}

impl SegmentStore {
    /// Open or create segment storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Discover existing segment files
    /// 3. Merge in ids known from the index (segments may not be created yet)
    /// 4. Fall back to a single segment `0` when nothing exists
    pub fn open(
        data_dir: &Path,
        file_prefix: &str,
        sync_writes: bool,
        known_ids: impl IntoIterator<Item = SegmentId>,
    ) -> Result<Self> {
        fs::create_dir_all(data_dir)?;

        let mut ids: BTreeSet<SegmentId> = known_ids.into_iter().collect();
        let mut discovered = 0usize;

        for entry in fs::read_dir(data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            match parse_file_id(&name.to_string_lossy(), file_prefix) {
                Some(id) => {
                    ids.insert(id);
                    discovered += 1;
                }
                None => tracing::debug!("Ignoring foreign file {:?} in {:?}", name, data_dir),
            }
        }

        if ids.is_empty() {
            ids.insert(0);
        }

        tracing::debug!(
            "Opened segment store at {:?}: {} segment files, active segment {}",
            data_dir,
            discovered,
            ids.iter().next_back().copied().unwrap_or(0)
        );

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            file_prefix: file_prefix.to_string(),
            sync_writes,
            ids: RwLock::new(ids),
            create_lock: Mutex::new(()),
            writer: Mutex::new(None),
        })
    }

    /// The highest known segment id
    pub fn active_id(&self) -> SegmentId {
        self.ids.read().iter().next_back().copied().unwrap_or(0)
    }

    /// All known segment ids, ascending
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.ids.read().iter().copied().collect()
    }

    /// All ids except the active one, ascending
    pub fn sealed_ids(&self) -> Vec<SegmentId> {
        let ids = self.ids.read();
        let mut sealed: Vec<SegmentId> = ids.iter().copied().collect();
        sealed.pop();
        sealed
    }

    /// Number of known segments
    pub fn segment_count(&self) -> usize {
        self.ids.read().len()
    }

    /// Create the file for `id` (and its directory) if absent
    ///
    /// Idempotent; guarded by a store-wide lock.
    pub fn ensure_file(&self, id: SegmentId) -> Result<()> {
        let path = self.segment_path(id);
        let _guard = self.create_lock.lock();

        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Advance the active id by one and create its empty file
    pub fn rotate(&self) -> Result<SegmentId> {
        let next = self.active_id() + 1;
        self.ensure_file(next)?;
        self.ids.write().insert(next);
        Ok(next)
    }

    /// Append `bytes` to the active segment and return their offset
    ///
    /// The offset is the file length before the write.
    pub fn append(&self, id: SegmentId, bytes: &[u8]) -> Result<u64> {
        let active = self.active_id();
        if id != active {
            return Err(DriftError::invariant(format!(
                "append to segment {} but active segment is {}",
                id, active
            )));
        }

        let mut writer = self.writer.lock();

        let stale = !matches!(writer.as_ref(), Some(w) if w.id == id);
        if stale {
            *writer = Some(ActiveWriter::open(&self.segment_path(id), id)?);
        }
        let Some(handle) = writer.as_mut() else {
            return Err(DriftError::invariant("active segment writer missing"));
        };

        let offset = handle.len;
        if let Err(e) = handle.write(bytes, self.sync_writes) {
            // Length is unknown after a partial write; reopen on the next append
            *writer = None;
            return Err(e.into());
        }

        Ok(offset)
    }

    /// Force buffered appends on the active segment to disk
    pub fn sync(&self) -> Result<()> {
        if let Some(handle) = self.writer.lock().as_mut() {
            handle.file.sync_data()?;
        }
        Ok(())
    }

    /// Current file length of segment `id`
    pub fn size_of(&self, id: SegmentId) -> Result<u64> {
        Ok(fs::metadata(self.segment_path(id))?.len())
    }

    /// Sum of all segment file lengths
    pub fn total_bytes(&self) -> Result<u64> {
        let mut total = 0;
        for id in self.segment_ids() {
            match fs::metadata(self.segment_path(id)) {
                Ok(meta) => total += meta.len(),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    /// Open a read handle on segment `id`
    pub fn open_reader(&self, id: SegmentId) -> Result<SegmentReader> {
        SegmentReader::open(&self.segment_path(id), id)
    }

    /// Read exactly `size` bytes from segment `id` at `offset`
    pub fn read_range(&self, id: SegmentId, offset: u64, size: u32) -> Result<Vec<u8>> {
        self.open_reader(id)?.read_range(offset, size)
    }

    /// Remove segment `id` and its file
    pub fn delete(&self, id: SegmentId) -> Result<()> {
        {
            let mut writer = self.writer.lock();
            if matches!(writer.as_ref(), Some(w) if w.id == id) {
                *writer = None;
            }
        }

        match fs::remove_file(self.segment_path(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.ids.write().remove(&id);
        Ok(())
    }

    /// Move a finished file into place as segment `id`
    ///
    /// Replaces an existing file for `id` atomically. Falls back to
    /// copy + remove when `rename` fails (e.g. across devices).
    pub fn install(&self, src: &Path, id: SegmentId) -> Result<()> {
        {
            let mut writer = self.writer.lock();
            if matches!(writer.as_ref(), Some(w) if w.id == id) {
                *writer = None;
            }
        }

        let dst = self.segment_path(id);
        if let Err(rename_err) = fs::rename(src, &dst) {
            tracing::debug!("rename {:?} -> {:?} failed ({}), copying", src, dst, rename_err);
            fs::copy(src, &dst)?;
            File::open(&dst)?.sync_all()?;
            fs::remove_file(src)?;
        }

        self.ids.write().insert(id);
        Ok(())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Generate the file path for the segment with given id
    pub fn segment_path(&self, id: SegmentId) -> PathBuf {
        self.data_dir.join(format!("{}{}", self.file_prefix, id))
    }
}
