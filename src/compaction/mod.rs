//! Compaction Module
//!
//! Merges every sealed segment into a fresh, dense run of segments that
//! reuse the lowest ids, then retires the originals.
//!
//! ## Phases
//! 1. **Plan** (write lock held briefly): copy the sealed sub-indexes
//! 2. **Merge** (no engine lock): copy each live entry into scratch files
//!    under `{base_dir}/merge/`, rotating at the segment threshold
//! 3. **Retire** (write lock + exclusive layout lock): drop entries that were
//!    rewritten meanwhile, stage the new snapshots, commit the retirement
//!    journal, then move the outputs into place and delete the originals
//!
//! A failure before the journal is committed leaves the store untouched and
//! the pass can simply be run again. After the commit the scratch directory
//! is kept, and the next [`Engine::open`](crate::Engine::open) finishes the
//! retirement before loading the index. The active segment is never part of
//! a pass.

mod journal;
mod merger;
mod worker;

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use crate::codec::encode_snapshot;
use crate::config::Config;
use crate::error::{DriftError, Result};
use crate::index::{IndexCache, SubIndex};
use crate::segment::{SegmentId, SegmentStore};

use journal::Journal;

pub(crate) use journal::is_committed;
pub use merger::{merge, MergeOutput};
pub(crate) use worker::CompactionWorker;

/// Outcome of one compaction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Sealed segments retired by the pass
    pub segments_merged: usize,

    /// Segments produced by the pass
    pub segments_written: usize,

    /// Live entries copied into the new segments
    pub entries_copied: usize,

    /// Segment bytes freed (input bytes minus output bytes)
    pub bytes_reclaimed: u64,
}

impl CompactionStats {
    /// Whether the pass changed anything on disk
    pub fn is_noop(&self) -> bool {
        self.segments_merged == 0
    }
}

/// Sealed segments selected for one pass, oldest first
#[derive(Debug, Clone)]
pub struct MergePlan {
    /// (segment id, copy of its sub-index), ascending id
    pub inputs: Vec<(SegmentId, SubIndex)>,

    /// Total file bytes of the inputs
    pub input_bytes: u64,
}

impl MergePlan {
    /// Ids of the planned segments
    pub fn merged_ids(&self) -> BTreeSet<SegmentId> {
        self.inputs.iter().map(|(id, _)| *id).collect()
    }
}

/// Select the segments for a pass
///
/// Returns `None` when there is no sealed segment, or when every sealed
/// segment is fully live so nothing can be reclaimed.
pub fn plan(segments: &SegmentStore, index: &IndexCache) -> Result<Option<MergePlan>> {
    let sealed = segments.sealed_ids();
    if sealed.is_empty() {
        return Ok(None);
    }

    let mut inputs = Vec::with_capacity(sealed.len());
    let mut input_bytes = 0u64;
    let mut live_bytes = 0u64;

    for id in sealed {
        let size = match segments.size_of(id) {
            Ok(size) => size,
            Err(DriftError::Io(e)) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        input_bytes += size;
        live_bytes += index.live_bytes(id);
        inputs.push((id, index.sub_index(id).unwrap_or_default()));
    }

    if live_bytes == input_bytes {
        return Ok(None);
    }

    Ok(Some(MergePlan {
        inputs,
        input_bytes,
    }))
}

/// Swap the merged output in for the planned segments
///
/// `output` must come from [`merge`] into `merge_dir`. Keys written while
/// the copy ran are dropped from the output first. Caller must hold the
/// engine write lock and the exclusive layout lock.
pub fn retire(
    plan: &MergePlan,
    output: MergeOutput,
    merge_dir: &Path,
    segments: &SegmentStore,
    index: &IndexCache,
) -> Result<CompactionStats> {
    let merged = plan.merged_ids();
    let MergeOutput {
        mut indexes,
        bytes_written,
    } = output;

    // Keys rewritten during the copy phase now live in a newer segment
    let mut entries_copied = 0;
    for sub in indexes.iter_mut() {
        let mut stale = Vec::new();
        for key in sub.keys() {
            let live_in = index.get(key)?.map(|(id, _)| id);
            if !live_in.map_or(false, |id| merged.contains(&id)) {
                stale.push(key.clone());
            }
        }
        for key in stale {
            sub.remove(&key);
        }
        entries_copied += sub.len();
    }

    let outputs = indexes.len() as u64;
    let lowest_retained = segments
        .segment_ids()
        .into_iter()
        .find(|id| !merged.contains(id))
        .unwrap_or(SegmentId::MAX);
    if outputs > lowest_retained {
        return Err(DriftError::invariant(format!(
            "{} merged segments would overlap retained segment {}",
            outputs, lowest_retained
        )));
    }

    // Stage: nothing outside merge_dir changes yet
    for (i, sub) in indexes.iter().enumerate() {
        journal::write_synced(&journal::snapshot_path(merge_dir, i as u64), &encode_snapshot(sub))?;
    }

    // Commit
    let record = Journal {
        merged: merged.iter().copied().collect(),
        outputs,
    };
    record.write(merge_dir)?;

    journal::apply(&record, merge_dir, segments, index)?;

    for id in &merged {
        index.remove(*id);
    }
    for (new_id, sub) in indexes.into_iter().enumerate() {
        index.install(new_id as SegmentId, sub);
    }
    Journal::remove(merge_dir)?;

    Ok(CompactionStats {
        segments_merged: merged.len(),
        segments_written: outputs as usize,
        entries_copied,
        bytes_reclaimed: plan.input_bytes.saturating_sub(bytes_written),
    })
}

/// Settle compaction scratch left by an earlier process
///
/// A committed retirement is finished; anything else in the scratch
/// directory is an abandoned copy phase and is removed. Must run before the
/// index is loaded.
pub(crate) fn recover(config: &Config) -> Result<()> {
    let merge_dir = config.merge_dir();
    if !merge_dir.exists() {
        return Ok(());
    }

    match Journal::read(&merge_dir)? {
        Some(record) => {
            tracing::warn!(
                "Finishing interrupted retirement of segments {:?} into {} segments",
                record.merged,
                record.outputs
            );
            let segments = SegmentStore::open(
                &config.data_dir(),
                &config.data_file_prefix,
                config.sync_writes,
                std::iter::empty(),
            )?;
            let index = IndexCache::new(&config.cache_dir(), &config.cache_file_prefix)?;
            journal::apply(&record, &merge_dir, &segments, &index)?;
        }
        None => tracing::warn!("Removing stale compaction scratch {:?}", merge_dir),
    }

    match fs::remove_dir_all(&merge_dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
