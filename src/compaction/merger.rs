//! Merge phase
//!
//! Copies live entries out of sealed segments into scratch output files.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::codec::Record;
use crate::error::{DriftError, Result};
use crate::index::SubIndex;
use crate::segment::{SegmentReader, SegmentStore};

use super::journal::data_path;
use super::MergePlan;

/// Finished scratch files, in the order they become segments `0, 1, ...`
///
/// File `i` lives at `merge_dir/i`.
#[derive(Debug)]
pub struct MergeOutput {
    /// Sub-index of each file, offsets relative to that file
    pub indexes: Vec<SubIndex>,

    /// Total bytes written across all files
    pub bytes_written: u64,
}

/// Copy every planned entry into `merge_dir`
///
/// Segments are processed oldest first, entries in file order, so merging an
/// already merged run reproduces it byte for byte.
pub fn merge(
    plan: &MergePlan,
    segments: &SegmentStore,
    merge_dir: &Path,
    max_segment_bytes: u64,
) -> Result<MergeOutput> {
    if merge_dir.exists() {
        fs::remove_dir_all(merge_dir)?;
    }
    let mut writer = MergeWriter::new(merge_dir, max_segment_bytes)?;
    let mut placed: HashSet<&str> = HashSet::new();

    for (id, sub) in &plan.inputs {
        if sub.is_empty() {
            continue;
        }

        let mut reader = segments.open_reader(*id)?;
        let mut entries: Vec<(&String, &Record)> = sub.iter().collect();
        entries.sort_by_key(|(_, record)| record.offset);

        for (key, record) in entries {
            if !placed.insert(key.as_str()) {
                return Err(DriftError::invariant(format!(
                    "key {:?} indexed in more than one sealed segment",
                    key
                )));
            }
            writer.copy_entry(&mut reader, key, *record)?;
        }
    }

    writer.finish()
}

/// Scratch file currently being filled
struct OutputFile {
    writer: BufWriter<File>,
    len: u64,
    index: SubIndex,
}

impl OutputFile {
    fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            len: 0,
            index: SubIndex::new(),
        })
    }

    fn copy(&mut self, reader: &mut SegmentReader, key: &str, record: Record) -> Result<()> {
        reader.transfer_range(record.offset, record.size, &mut self.writer)?;
        self.index
            .insert(key.to_string(), Record::new(self.len, record.size));
        self.len += u64::from(record.size);
        Ok(())
    }

    /// Flush and fsync, returning the sub-index and length
    fn seal(self) -> Result<(SubIndex, u64)> {
        let file = self.writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok((self.index, self.len))
    }
}

/// Sequence of scratch files rotated at the segment threshold
struct MergeWriter {
    dir: PathBuf,
    max_segment_bytes: u64,
    current: Option<OutputFile>,
    finished: Vec<SubIndex>,
    bytes_written: u64,
}

impl MergeWriter {
    fn new(dir: &Path, max_segment_bytes: u64) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            max_segment_bytes,
            current: None,
            finished: Vec::new(),
            bytes_written: 0,
        })
    }

    /// Same rule as the write path: roll over once full, never proactively
    fn copy_entry(&mut self, reader: &mut SegmentReader, key: &str, record: Record) -> Result<()> {
        let full = self
            .current
            .as_ref()
            .map_or(true, |out| out.len > self.max_segment_bytes);
        if full {
            self.roll()?;
        }

        let out = self
            .current
            .as_mut()
            .ok_or_else(|| DriftError::invariant("merge output file missing"))?;
        out.copy(reader, key, record)
    }

    fn roll(&mut self) -> Result<()> {
        self.seal_current()?;
        let path = data_path(&self.dir, self.finished.len() as u64);
        self.current = Some(OutputFile::create(&path)?);
        Ok(())
    }

    fn seal_current(&mut self) -> Result<()> {
        if let Some(out) = self.current.take() {
            let (index, len) = out.seal()?;
            self.bytes_written += len;
            self.finished.push(index);
        }
        Ok(())
    }

    fn finish(mut self) -> Result<MergeOutput> {
        self.seal_current()?;
        Ok(MergeOutput {
            indexes: self.finished,
            bytes_written: self.bytes_written,
        })
    }
}
