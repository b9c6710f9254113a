//! Tests for compaction
//!
//! These tests verify:
//! - Live values survive a pass unchanged
//! - Retired segment and snapshot files are removed
//! - Merged output reuses the lowest ids and rotates at the threshold
//! - A second pass with no intervening writes is a no-op
//! - A pass that would collide with a retained segment leaves the store intact
//! - Keys rewritten during the copy phase are dropped from the output
//! - A retirement that fails after committing is finished on the next open
//! - Background compaction

use std::fs;
use std::path::Path;

use driftkv::codec::Record;
use driftkv::compaction::{merge, plan, retire};
use driftkv::config::{CompactionMode, Config};
use driftkv::engine::Engine;
use driftkv::index::IndexCache;
use driftkv::segment::SegmentStore;
use driftkv::{CompactionStats, DriftError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config_with_max(base_dir: &Path, max_segment_bytes: u64) -> Config {
    Config::builder()
        .base_dir(base_dir)
        .max_segment_bytes(max_segment_bytes)
        .build()
}

/// Write `entries` into segment 0 without ever rotating, then seal it by
/// adopting an empty segment file with id `sealing_id`
fn seed_sealed_segment(base_dir: &Path, entries: &[(&str, &str)], sealing_id: u64) {
    let engine = Engine::open_path(base_dir).unwrap();
    for (key, value) in entries {
        engine.write(key, value).unwrap();
    }
    engine.close().unwrap();

    fs::write(base_dir.join("data").join(format!("db{}", sealing_id)), b"").unwrap();
}

fn segment_bytes(base_dir: &Path, id: u64) -> Vec<u8> {
    fs::read(base_dir.join("data").join(format!("db{}", id))).unwrap()
}

fn segment_exists(base_dir: &Path, id: u64) -> bool {
    base_dir.join("data").join(format!("db{}", id)).exists()
}

fn snapshot_exists(base_dir: &Path, id: u64) -> bool {
    base_dir.join("cache").join(format!("cache{}", id)).exists()
}

// =============================================================================
// No-op Tests
// =============================================================================

#[test]
fn test_compact_without_sealed_segments_is_noop() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open_path(temp_dir.path()).unwrap();
    engine.write("key", "value").unwrap();
    engine.write("key", "other").unwrap();

    let stats = engine.compact().unwrap();

    assert!(stats.is_noop());
    assert_eq!(stats, CompactionStats::default());
    assert_eq!(engine.segment_ids(), vec![0]);
    assert_eq!(engine.stats().unwrap().compactions_completed, 1);
}

#[test]
fn test_compact_fully_live_segments_is_noop() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_with_max(temp_dir.path(), 6)).unwrap();
    engine.write("a", "1").unwrap();
    engine.write("b", "2").unwrap();
    engine.write("c", "3").unwrap(); // rotates: segment 0 holds 8 bytes

    let stats = engine.compact().unwrap();

    assert!(stats.is_noop());
    assert_eq!(engine.segment_ids(), vec![0, 1]);
}

// =============================================================================
// Merge Tests
// =============================================================================

#[test]
fn test_compact_reports_stats() {
    let temp_dir = TempDir::new().unwrap();
    seed_sealed_segment(
        temp_dir.path(),
        &[("k", "1"), ("k", "2"), ("other", "x")],
        1,
    );

    let engine = Engine::open_path(temp_dir.path()).unwrap();
    let stats = engine.compact().unwrap();

    assert_eq!(
        stats,
        CompactionStats {
            segments_merged: 1,
            segments_written: 1,
            entries_copied: 2,
            bytes_reclaimed: 4,
        }
    );
    assert_eq!(segment_bytes(temp_dir.path(), 0), b"k:2;other:x;");
    assert_eq!(engine.read("k").unwrap(), Some("2".to_string()));
    assert_eq!(engine.read("other").unwrap(), Some("x".to_string()));
}

#[test]
fn test_compact_twice_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    seed_sealed_segment(
        temp_dir.path(),
        &[("a", "1"), ("b", "2"), ("a", "3"), ("c", "4")],
        1,
    );

    let engine = Engine::open_path(temp_dir.path()).unwrap();
    let first = engine.compact().unwrap();
    assert!(!first.is_noop());

    let data = segment_bytes(temp_dir.path(), 0);
    let snapshot = fs::read(temp_dir.path().join("cache").join("cache0")).unwrap();

    let second = engine.compact().unwrap();

    assert!(second.is_noop());
    assert_eq!(engine.segment_ids(), vec![0, 1]);
    assert_eq!(segment_bytes(temp_dir.path(), 0), data);
    assert_eq!(
        fs::read(temp_dir.path().join("cache").join("cache0")).unwrap(),
        snapshot
    );
}

#[test]
fn test_compact_inline_after_rotation() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_with_max(temp_dir.path(), 20)).unwrap();

    for key in ["k1", "k2", "k3", "k4", "k5"] {
        engine.write(key, "a").unwrap(); // 5 bytes each
    }
    assert_eq!(engine.segment_ids(), vec![0]);

    // Rotates, leaving k1's first entry dead in segment 0
    engine.write("k1", "b").unwrap();

    let stats = engine.stats().unwrap();
    assert_eq!(stats.compactions_completed, 1);
    assert_eq!(stats.segment_count, 2);
    assert_eq!(stats.total_bytes, 25);
    assert_eq!(stats.live_bytes, 25);

    assert_eq!(segment_bytes(temp_dir.path(), 0), b"k2:a;k3:a;k4:a;k5:a;");
    assert_eq!(segment_bytes(temp_dir.path(), 1), b"k1:b;");
    assert_eq!(engine.read("k1").unwrap(), Some("b".to_string()));
    for key in ["k2", "k3", "k4", "k5"] {
        assert_eq!(engine.read(key).unwrap(), Some("a".to_string()));
    }
}

#[test]
fn test_compact_retires_fully_dead_segment() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_with_max(temp_dir.path(), 6)).unwrap();

    engine.write("name", "henry").unwrap();
    engine.write("name", "list").unwrap();

    // Segment 0 held only the overwritten entry and produced no output
    assert_eq!(engine.segment_ids(), vec![1]);
    assert!(!segment_exists(temp_dir.path(), 0));
    assert!(!snapshot_exists(temp_dir.path(), 0));
    assert_eq!(engine.read("name").unwrap(), Some("list".to_string()));
}

#[test]
fn test_compact_output_reuses_lowest_ids() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_with_max(temp_dir.path(), 6)).unwrap();

    engine.write("name", "henry").unwrap();
    engine.write("name", "list").unwrap();
    engine.write("age", "123").unwrap();
    assert_eq!(engine.segment_ids(), vec![1, 2]);

    // Segment 2 goes dead; segments 1 and 2 merge into segment 0
    engine.write("age", "124").unwrap();

    assert_eq!(engine.segment_ids(), vec![0, 3]);
    assert_eq!(segment_bytes(temp_dir.path(), 0), b"name:list;");
    for id in [1, 2] {
        assert!(!segment_exists(temp_dir.path(), id));
        assert!(!snapshot_exists(temp_dir.path(), id));
    }
    assert!(snapshot_exists(temp_dir.path(), 0));
    assert!(!temp_dir.path().join("merge").exists());

    assert_eq!(engine.read("name").unwrap(), Some("list".to_string()));
    assert_eq!(engine.read("age").unwrap(), Some("124".to_string()));
}

#[test]
fn test_compact_output_rotates_at_threshold() {
    let temp_dir = TempDir::new().unwrap();
    seed_sealed_segment(
        temp_dir.path(),
        &[("a", "1"), ("b", "2"), ("c", "3"), ("a", "4")],
        2,
    );

    let engine = Engine::open(config_with_max(temp_dir.path(), 6)).unwrap();
    let stats = engine.compact().unwrap();

    assert_eq!(stats.segments_merged, 1);
    assert_eq!(stats.segments_written, 2);
    assert_eq!(stats.entries_copied, 3);
    assert_eq!(engine.segment_ids(), vec![0, 1, 2]);
    assert_eq!(segment_bytes(temp_dir.path(), 0), b"b:2;c:3;");
    assert_eq!(segment_bytes(temp_dir.path(), 1), b"a:4;");

    assert_eq!(engine.read("a").unwrap(), Some("4".to_string()));
    assert_eq!(engine.read("b").unwrap(), Some("2".to_string()));
    assert_eq!(engine.read("c").unwrap(), Some("3".to_string()));
}

#[test]
fn test_compact_refuses_to_overlap_retained_segment() {
    let temp_dir = TempDir::new().unwrap();
    seed_sealed_segment(
        temp_dir.path(),
        &[("a", "1"), ("b", "2"), ("c", "3"), ("a", "4")],
        1,
    );

    let engine = Engine::open(config_with_max(temp_dir.path(), 6)).unwrap();
    let result = engine.compact();

    assert!(result.is_err());
    assert_eq!(engine.stats().unwrap().compactions_failed, 1);

    // Nothing was retired
    assert_eq!(engine.segment_ids(), vec![0, 1]);
    assert_eq!(segment_bytes(temp_dir.path(), 0), b"a:1;b:2;c:3;a:4;");
    assert!(!temp_dir.path().join("merge").exists());
    assert_eq!(engine.read("a").unwrap(), Some("4".to_string()));
    assert_eq!(engine.read("b").unwrap(), Some("2".to_string()));
}

#[test]
fn test_retire_drops_keys_rewritten_during_copy() {
    let temp_dir = TempDir::new().unwrap();
    let merge_dir = temp_dir.path().join("merge");
    let segments = SegmentStore::open(&temp_dir.path().join("data"), "db", true, []).unwrap();
    let index = IndexCache::load_all(&temp_dir.path().join("cache"), "cache").unwrap();

    segments.ensure_file(0).unwrap();
    for (key, entry) in [("a", b"a:1;"), ("b", b"b:1;"), ("a", b"a:2;")] {
        let offset = segments.append(0, entry).unwrap();
        index.put(key, 0, Record::new(offset, 4)).unwrap();
    }
    segments.rotate().unwrap();

    let merge_plan = plan(&segments, &index).unwrap().unwrap();

    // "b" is overwritten after its sub-index was copied into the plan
    let offset = segments.append(1, b"b:2;").unwrap();
    index.put("b", 1, Record::new(offset, 4)).unwrap();

    let output = merge(&merge_plan, &segments, &merge_dir, 1024).unwrap();
    assert_eq!(output.indexes[0].len(), 2);

    let stats = retire(&merge_plan, output, &merge_dir, &segments, &index).unwrap();

    assert_eq!(stats.segments_merged, 1);
    assert_eq!(stats.segments_written, 1);
    assert_eq!(stats.entries_copied, 1);
    // Output copies entries in file order: "b:1;a:2;"
    assert_eq!(index.get("a").unwrap(), Some((0, Record::new(4, 4))));
    assert_eq!(index.get("b").unwrap(), Some((1, Record::new(0, 4))));
    assert_eq!(index.sub_index(0).unwrap().len(), 1);
    assert_eq!(segments.read_range(0, 4, 4).unwrap(), b"a:2;".to_vec());
    assert!(!merge_dir.join("RETIRE").exists());

    // The installed snapshot agrees with memory
    drop(index);
    let reloaded = IndexCache::load_all(&temp_dir.path().join("cache"), "cache").unwrap();
    assert_eq!(reloaded.get("a").unwrap(), Some((0, Record::new(4, 4))));
    assert_eq!(reloaded.get("b").unwrap(), Some((1, Record::new(0, 4))));
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_compact_does_not_use_live_snapshot_temp_path() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open_path(temp_dir.path()).unwrap();
        for (key, value) in [("a", "1"), ("a", "2"), ("b", "3")] {
            engine.write(key, value).unwrap();
        }
    }

    let cache_dir = temp_dir.path().join("cache");
    {
        let engine = Engine::open(config_with_max(temp_dir.path(), 8)).unwrap();

        // Rewriting snapshot 0 in place would fail from here on
        fs::create_dir(cache_dir.join("cache0.tmp")).unwrap();

        // Rotates and compacts segment 0
        engine.write("c", "4").unwrap();

        let stats = engine.stats().unwrap();
        assert_eq!(stats.compactions_completed, 1);
        assert_eq!(stats.compactions_failed, 0);
        assert_eq!(segment_bytes(temp_dir.path(), 0), b"a:2;b:3;");
        assert_eq!(engine.read("a").unwrap(), Some("2".to_string()));
        assert_eq!(engine.read("b").unwrap(), Some("3".to_string()));
        assert_eq!(engine.read("c").unwrap(), Some("4".to_string()));
    }

    let engine = Engine::open(config_with_max(temp_dir.path(), 8)).unwrap();
    assert_eq!(engine.read("a").unwrap(), Some("2".to_string()));
    assert_eq!(engine.read("b").unwrap(), Some("3".to_string()));
    assert_eq!(engine.read("c").unwrap(), Some("4".to_string()));
}

#[test]
fn test_interrupted_retirement_finishes_on_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let blocker = temp_dir.path().join("cache").join("cache0");

    {
        let engine = Engine::open(config_with_max(temp_dir.path(), 6)).unwrap();
        engine.write("name", "henry").unwrap();
        engine.write("name", "list").unwrap();
        engine.write("age", "123").unwrap();
        assert_eq!(engine.segment_ids(), vec![1, 2]);

        // The merged snapshot cannot be moved onto a directory
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("occupied"), b"").unwrap();

        // Rotates; segments 1 and 2 merge into segment 0 and retirement fails
        engine.write("age", "124").unwrap();
        assert_eq!(engine.stats().unwrap().compactions_failed, 1);
        assert!(temp_dir.path().join("merge").join("RETIRE").exists());

        let result = engine.write("city", "oslo");
        assert!(matches!(result, Err(DriftError::InvariantViolation(_))));
        assert!(engine.compact().is_err());

        assert_eq!(engine.read("name").unwrap(), Some("list".to_string()));
        assert_eq!(engine.read("age").unwrap(), Some("124".to_string()));
    }

    let result = Engine::open(config_with_max(temp_dir.path(), 6));
    assert!(matches!(result, Err(DriftError::Io(_))));
    assert!(temp_dir.path().join("merge").exists());

    fs::remove_dir_all(&blocker).unwrap();

    let engine = Engine::open(config_with_max(temp_dir.path(), 6)).unwrap();
    assert_eq!(engine.segment_ids(), vec![0, 3]);
    assert_eq!(segment_bytes(temp_dir.path(), 0), b"name:list;");
    for id in [1, 2] {
        assert!(!segment_exists(temp_dir.path(), id));
        assert!(!snapshot_exists(temp_dir.path(), id));
    }
    assert!(!temp_dir.path().join("merge").exists());
    assert_eq!(engine.read("name").unwrap(), Some("list".to_string()));
    assert_eq!(engine.read("age").unwrap(), Some("124".to_string()));

    engine.write("city", "oslo").unwrap();
    assert_eq!(engine.read("city").unwrap(), Some("oslo".to_string()));
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_reopen_after_compaction() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = Engine::open(config_with_max(temp_dir.path(), 6)).unwrap();
        engine.write("name", "henry").unwrap();
        engine.write("name", "list").unwrap();
        engine.write("age", "123").unwrap();
        engine.write("age", "124").unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(config_with_max(temp_dir.path(), 6)).unwrap();
    assert_eq!(engine.segment_ids(), vec![0, 3]);
    assert_eq!(engine.read("name").unwrap(), Some("list".to_string()));
    assert_eq!(engine.read("age").unwrap(), Some("124".to_string()));

    // New segments continue after the highest id
    engine.write("city", "oslo").unwrap();
    assert_eq!(engine.active_segment(), 4);
}

#[test]
fn test_many_overwrites_keep_latest_values() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_with_max(temp_dir.path(), 32)).unwrap();

    for round in 0..20 {
        for key in ["alpha", "beta", "gamma"] {
            engine.write(key, &format!("{}-{}", key, round)).unwrap();
        }
    }

    for key in ["alpha", "beta", "gamma"] {
        assert_eq!(engine.read(key).unwrap(), Some(format!("{}-19", key)));
    }
    let stats = engine.stats().unwrap();
    assert_eq!(stats.key_count, 3);
    assert_eq!(stats.compactions_failed, 0);
    assert!(stats.total_bytes < 20 * 3 * 12);
}

// =============================================================================
// Background Compaction Tests
// =============================================================================

#[test]
fn test_background_compaction() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .base_dir(temp_dir.path())
        .max_segment_bytes(16)
        .compaction_mode(CompactionMode::Background)
        .build();

    {
        let engine = Engine::open(config).unwrap();
        for round in 0..30 {
            engine.write("key", &format!("v{}", round)).unwrap();
            engine.write(&format!("k{}", round), "x").unwrap();
        }
        assert_eq!(engine.read("key").unwrap(), Some("v29".to_string()));
        // Waits for the queued pass
        engine.close().unwrap();
    }

    let engine = Engine::open(config_with_max(temp_dir.path(), 16)).unwrap();
    assert_eq!(engine.read("key").unwrap(), Some("v29".to_string()));
    for round in 0..30 {
        assert_eq!(
            engine.read(&format!("k{}", round)).unwrap(),
            Some("x".to_string())
        );
    }
    assert!(!temp_dir.path().join("merge").exists());
}
