//! Retirement journal
//!
//! A pass stages everything it will install under `{base_dir}/merge/`:
//!
//! ```text
//! merge/
//!   0, 1, ...                  merged segment data
//!   0.snapshot, 1.snapshot     matching index snapshots
//!   RETIRE                     commit record, written last
//! ```
//!
//! Until `RETIRE` exists the pass can be thrown away. Once it exists the
//! pass is committed: [`apply`] moves the staged files into place and
//! deletes the retired ones, and running it again after a crash finishes
//! the same work.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{DriftError, Result};
use crate::index::IndexCache;
use crate::segment::{SegmentId, SegmentStore};

/// Commit record file name
const JOURNAL_FILE: &str = "RETIRE";

/// Suffix of a staged snapshot
const SNAPSHOT_SUFFIX: &str = ".snapshot";

/// What a committed pass replaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Journal {
    /// Segments retired by the pass, ascending
    pub merged: Vec<SegmentId>,

    /// Number of output segments; they take ids `0..outputs`
    pub outputs: u64,
}

impl Journal {
    /// Durably write the commit record
    pub fn write(&self, merge_dir: &Path) -> Result<()> {
        let merged: Vec<String> = self.merged.iter().map(|id| id.to_string()).collect();
        let text = format!("merged {}\noutputs {}\n", merged.join(" "), self.outputs);

        let path = journal_path(merge_dir);
        let tmp = merge_dir.join(format!("{}.tmp", JOURNAL_FILE));
        write_synced(&tmp, text.as_bytes())?;
        fs::rename(&tmp, &path)?;
        sync_dir(merge_dir)?;

        tracing::debug!("Committed retirement of {:?} into {} segments", self.merged, self.outputs);
        Ok(())
    }

    /// Read the commit record, if the pass got that far
    pub fn read(merge_dir: &Path) -> Result<Option<Self>> {
        let path = journal_path(merge_dir);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let malformed = || DriftError::invariant(format!("malformed retirement journal {:?}", path));

        let mut lines = text.lines();
        let merged = lines
            .next()
            .and_then(|line| line.strip_prefix("merged"))
            .ok_or_else(malformed)?
            .split_whitespace()
            .map(|id| id.parse::<SegmentId>().map_err(|_| malformed()))
            .collect::<Result<Vec<_>>>()?;
        let outputs = lines
            .next()
            .and_then(|line| line.strip_prefix("outputs "))
            .and_then(|n| n.trim().parse::<u64>().ok())
            .ok_or_else(malformed)?;

        Ok(Some(Self { merged, outputs }))
    }

    /// Drop the commit record once [`apply`] has finished
    pub fn remove(merge_dir: &Path) -> Result<()> {
        match fs::remove_file(journal_path(merge_dir)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Scratch data file for output segment `i`
pub(crate) fn data_path(merge_dir: &Path, i: u64) -> PathBuf {
    merge_dir.join(i.to_string())
}

/// Staged snapshot for output segment `i`
pub(crate) fn snapshot_path(merge_dir: &Path, i: u64) -> PathBuf {
    merge_dir.join(format!("{}{}", i, SNAPSHOT_SUFFIX))
}

/// Whether `merge_dir` holds a commit record
pub(crate) fn is_committed(merge_dir: &Path) -> bool {
    journal_path(merge_dir).is_file()
}

/// Write `bytes` to a fresh file and fsync it
pub(crate) fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Move a committed pass into place on disk
///
/// Outputs go in before anything is deleted. Each staged file is renamed,
/// so a file that is already gone was installed by an earlier attempt.
/// Touches files only; the in-memory index is the caller's business.
pub(crate) fn apply(
    journal: &Journal,
    merge_dir: &Path,
    segments: &SegmentStore,
    index: &IndexCache,
) -> Result<()> {
    for i in 0..journal.outputs {
        let data = data_path(merge_dir, i);
        if data.exists() {
            segments.install(&data, i)?;
        }
        let snapshot = snapshot_path(merge_dir, i);
        if snapshot.exists() {
            index.install_snapshot(&snapshot, i)?;
        }
    }

    // Snapshot goes first: a data file without a snapshot is merely adopted
    // as empty on restart, a snapshot without its data file is fatal
    for &id in journal.merged.iter().filter(|&&id| id >= journal.outputs) {
        index.delete_snapshot(id)?;
        segments.delete(id)?;
    }

    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

fn journal_path(merge_dir: &Path) -> PathBuf {
    merge_dir.join(JOURNAL_FILE)
}
