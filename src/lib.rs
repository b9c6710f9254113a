//! # DriftKV
//!
//! An embedded, single-node, append-only key-value store with:
//! - Log-structured segment files rotated at a configurable size
//! - An in-memory index mirrored to per-segment snapshot files, so restart
//!   never rescans segment data
//! - Compaction that merges sealed segments and retires the originals
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Caller                             │
//! │               write(key, value) / read(key)                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                         Engine                              │
//! │            (Single Writer / Multi Reader)                   │
//! └──────┬──────────────────────┬──────────────────────┬────────┘
//!        │                      │                      │
//!        ▼                      ▼                      ▼
//!   ┌──────────┐         ┌─────────────┐        ┌────────────┐
//!   │ Segment  │◄────────│ Compaction  │───────►│   Index    │
//!   │  Store   │         │  (merge)    │        │   Cache    │
//!   └──────────┘         └─────────────┘        └─────┬──────┘
//!   data/db0..dbN                                     │
//!                                               cache/cache0..N
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod segment;
pub mod index;
pub mod compaction;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DriftError, Result};
pub use config::{CompactionMode, Config};
pub use compaction::CompactionStats;
pub use engine::{Engine, EngineStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of DriftKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
