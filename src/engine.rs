//! Engine Module
//!
//! The store object that coordinates all components.
//!
//! ## Responsibilities
//! - Write path: append, snapshot, index, rotate
//! - Read path: index lookup, exact range read
//! - Schedule compaction after a rotation, inline or in the background
//! - Rebuild and verify state on startup

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::codec::{self, Record};
use crate::compaction::{self, CompactionStats, CompactionWorker};
use crate::config::{CompactionMode, Config};
use crate::error::{DriftError, Result};
use crate::index::IndexCache;
use crate::segment::{SegmentId, SegmentStore};

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes**: serialized by `write_lock`
///   - ensure file → size check → rotate → append → snapshot → index
///     runs as one unit
///
/// - **Reads**: concurrent with each other and with writes
///   - hold `layout` shared for lookup + range read
///   - a range is published in the index only after its bytes are on disk,
///     so reading the active segment never observes a torn entry
///
/// - **Compaction**: one pass at a time (`compaction_lock`)
///   - copy phase runs without `write_lock`
///   - retirement holds `write_lock` and `layout` exclusively
///   - a retirement that fails after committing blocks further writes and
///     compaction until the store is reopened
pub struct Engine {
    shared: Arc<Shared>,

    /// Present in `CompactionMode::Background`
    worker: Option<CompactionWorker>,
}

/// State reachable from both the caller and the compaction worker
struct Shared {
    /// Engine configuration
    config: Config,

    /// Segment files
    segments: SegmentStore,

    /// In-memory index with snapshots
    index: IndexCache,

    /// Serializes write units and compaction retirement
    write_lock: Mutex<()>,

    /// Shared by readers, exclusive while segment files are swapped
    layout: RwLock<()>,

    /// Single concurrent compaction
    compaction_lock: Mutex<()>,

    /// A committed retirement failed part way; only `open` can finish it
    retirement_pending: AtomicBool,

    compactions_completed: AtomicU64,
    compactions_failed: AtomicU64,
}

/// Point-in-time counters describing the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Id of the segment receiving writes
    pub active_segment: SegmentId,

    /// Number of segments (active included)
    pub segment_count: usize,

    /// Number of distinct keys
    pub key_count: usize,

    /// Bytes of entries still referenced by the index
    pub live_bytes: u64,

    /// Bytes of all segment files
    pub total_bytes: u64,

    /// Compaction passes that finished (no-op passes included)
    pub compactions_completed: u64,

    /// Compaction passes that returned an error
    pub compactions_failed: u64,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate config, create the base directory
    /// 2. Finish a committed compaction retirement, drop other scratch
    /// 3. Rebuild the index from snapshots (no segment is scanned)
    /// 4. Discover segment files
    /// 5. Check every indexed range lies inside its segment file
    pub fn open(config: Config) -> Result<Self> {
        // Step 1: Validate and create the root
        config.validate()?;
        fs::create_dir_all(&config.base_dir)?;

        // Step 2: Settle an interrupted pass before any snapshot is read
        compaction::recover(&config)?;

        // Step 3: Index from snapshots
        let index = IndexCache::load_all(&config.cache_dir(), &config.cache_file_prefix)?;

        // Step 4: Segments known to either side
        let segments = SegmentStore::open(
            &config.data_dir(),
            &config.data_file_prefix,
            config.sync_writes,
            index.segment_ids(),
        )?;

        // Step 5: Refuse to serve an index pointing at missing bytes
        verify_layout(&segments, &index)?;

        tracing::info!(
            "Opened store at {:?}: {} segments, {} keys, active segment {}",
            config.base_dir,
            segments.segment_count(),
            index.key_count(),
            segments.active_id()
        );

        let mode = config.compaction_mode;
        let shared = Arc::new(Shared {
            config,
            segments,
            index,
            write_lock: Mutex::new(()),
            layout: RwLock::new(()),
            compaction_lock: Mutex::new(()),
            retirement_pending: AtomicBool::new(false),
            compactions_completed: AtomicU64::new(0),
            compactions_failed: AtomicU64::new(0),
        });

        let worker = match mode {
            CompactionMode::Inline => None,
            CompactionMode::Background => {
                let background = Arc::clone(&shared);
                Some(CompactionWorker::spawn(move || background.compact_logged())?)
            }
        };

        Ok(Self { shared, worker })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified base directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().base_dir(path).build())
    }

    /// Store `value` under `key`
    ///
    /// Returns once the entry and its snapshot are durable; the new value
    /// is visible to `read` only after that. If the write rotated the
    /// active segment, a compaction pass runs before returning (inline mode)
    /// or is queued (background mode); a failing pass is logged and does
    /// not fail the write.
    pub fn write(&self, key: &str, value: &str) -> Result<()> {
        let rotated = self.shared.write(key, value)?;

        if rotated {
            match &self.worker {
                Some(worker) => {
                    if !worker.schedule() {
                        tracing::debug!("Compaction already pending");
                    }
                }
                None => self.shared.compact_logged(),
            }
        }

        Ok(())
    }

    /// Get the latest value for `key`
    pub fn read(&self, key: &str) -> Result<Option<String>> {
        self.shared.read(key)
    }

    /// Run one compaction pass now
    ///
    /// Returns a no-op result when nothing is mergeable or reclaimable.
    pub fn compact(&self) -> Result<CompactionStats> {
        self.shared.compact()
    }

    /// Snapshot of engine counters
    pub fn stats(&self) -> Result<EngineStats> {
        let shared = &self.shared;
        Ok(EngineStats {
            active_segment: shared.segments.active_id(),
            segment_count: shared.segments.segment_count(),
            key_count: shared.index.key_count(),
            live_bytes: shared.index.total_live_bytes(),
            total_bytes: shared.segments.total_bytes()?,
            compactions_completed: shared.compactions_completed.load(Ordering::SeqCst),
            compactions_failed: shared.compactions_failed.load(Ordering::SeqCst),
        })
    }

    /// Close the engine gracefully
    ///
    /// Waits for queued background compaction to finish and syncs the
    /// active segment.
    pub fn close(mut self) -> Result<()> {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
        self.shared.segments.sync()
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Get the segment directory path
    pub fn data_dir(&self) -> &Path {
        self.shared.segments.data_dir()
    }

    /// Get the snapshot directory path
    pub fn cache_dir(&self) -> &Path {
        self.shared.index.cache_dir()
    }

    /// Id of the segment receiving writes
    pub fn active_segment(&self) -> SegmentId {
        self.shared.segments.active_id()
    }

    /// All segment ids, ascending
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.shared.segments.segment_ids()
    }

    /// Number of distinct keys
    pub fn key_count(&self) -> usize {
        self.shared.index.key_count()
    }
}

impl Shared {
    /// One write unit; returns whether the active segment rotated
    fn write(&self, key: &str, value: &str) -> Result<bool> {
        codec::validate_entry(key, value)?;
        let entry = codec::encode_entry(key, value);
        let size = u32::try_from(entry.len()).map_err(|_| {
            DriftError::InvalidInput(format!("entry of {} bytes is too large", entry.len()))
        })?;

        let _write_guard = self.write_lock.lock();
        self.check_retirement()?;

        // Step 1: Make sure the active segment exists
        let mut active = self.segments.active_id();
        self.segments.ensure_file(active)?;

        // Step 2: Roll over once the active segment is full
        let mut rotated = false;
        let active_size = self.segments.size_of(active)?;
        if active_size > self.config.max_segment_bytes {
            let previous = active;
            active = self.segments.rotate()?;
            rotated = true;
            tracing::debug!(
                "Segment {} sealed at {} bytes, active segment is now {}",
                previous,
                active_size,
                active
            );
        }

        // Step 3: Append; the index is untouched if this fails
        let offset = self.segments.append(active, &entry)?;

        // Step 4: Snapshot, then publish; a failed snapshot leaves the
        // entry as unreferenced bytes
        self.index.put(key, active, Record::new(offset, size))?;

        Ok(rotated)
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        let _layout = self.layout.read();

        let Some((segment_id, record)) = self.index.get(key)? else {
            return Ok(None);
        };

        let bytes = self
            .segments
            .read_range(segment_id, record.offset, record.size)?;
        let (stored_key, value) = codec::decode_entry(&bytes)?;
        if stored_key != key {
            return Err(DriftError::invariant(format!(
                "segment {} offset {} holds key {:?}, index expected {:?}",
                segment_id, record.offset, stored_key, key
            )));
        }

        Ok(Some(value.to_string()))
    }

    fn compact(&self) -> Result<CompactionStats> {
        let _pass = self.compaction_lock.lock();

        let result = self.compact_locked();
        match &result {
            Ok(stats) => {
                self.compactions_completed.fetch_add(1, Ordering::SeqCst);
                if stats.is_noop() {
                    tracing::debug!("Compaction found nothing to reclaim");
                } else {
                    tracing::info!(
                        "Compaction merged {} segments into {}, copied {} entries, reclaimed {} bytes",
                        stats.segments_merged,
                        stats.segments_written,
                        stats.entries_copied,
                        stats.bytes_reclaimed
                    );
                }
            }
            Err(_) => {
                self.compactions_failed.fetch_add(1, Ordering::SeqCst);
            }
        }
        result
    }

    /// Body of a pass; caller holds `compaction_lock`
    fn compact_locked(&self) -> Result<CompactionStats> {
        let plan = {
            let _write_guard = self.write_lock.lock();
            self.check_retirement()?;
            compaction::plan(&self.segments, &self.index)?
        };
        let Some(plan) = plan else {
            return Ok(CompactionStats::default());
        };

        let merge_dir = self.config.merge_dir();
        let result = compaction::merge(
            &plan,
            &self.segments,
            &merge_dir,
            self.config.max_segment_bytes,
        )
        .and_then(|output| {
            let _write_guard = self.write_lock.lock();
            let _layout = self.layout.write();
            compaction::retire(&plan, output, &merge_dir, &self.segments, &self.index)
        });

        if result.is_err() && compaction::is_committed(&merge_dir) {
            self.retirement_pending.store(true, Ordering::SeqCst);
            tracing::error!(
                "Compaction retirement failed after commit; keeping {:?} for the next open",
                merge_dir
            );
            return result;
        }

        match fs::remove_dir_all(&merge_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove compaction scratch {:?}: {}", merge_dir, e),
        }

        result
    }

    fn check_retirement(&self) -> Result<()> {
        if self.retirement_pending.load(Ordering::SeqCst) {
            return Err(DriftError::invariant(
                "reopen the store to finish an interrupted compaction",
            ));
        }
        Ok(())
    }

    /// Compaction owed after a rotation: failures are reported, not retried
    fn compact_logged(&self) {
        if let Err(e) = self.compact() {
            tracing::error!("Compaction failed: {}", e);
        }
    }
}

/// Every indexed range must lie inside an existing segment file
fn verify_layout(segments: &SegmentStore, index: &IndexCache) -> Result<()> {
    for id in index.segment_ids() {
        let Some(end) = index.max_record_end(id)? else {
            continue;
        };
        let size = match segments.size_of(id) {
            Ok(size) => size,
            Err(DriftError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DriftError::invariant(format!(
                    "snapshot for segment {} has entries but the segment file is missing",
                    id
                )))
            }
            Err(e) => return Err(e),
        };
        if end > size {
            return Err(DriftError::invariant(format!(
                "snapshot for segment {} references byte {} but the file has {}",
                id, end, size
            )));
        }
    }
    Ok(())
}
