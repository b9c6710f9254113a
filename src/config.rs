//! Configuration for DriftKV
//!
//! Centralized configuration with sensible defaults. Parsing a configuration
//! file is left to the embedding application; it fills in a [`Config`] through
//! the builder.

use std::path::{Path, PathBuf};

use crate::error::{DriftError, Result};

/// Main configuration for a DriftKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Directory Layout
    // -------------------------------------------------------------------------
    /// Root directory for all store files. Required.
    /// Internal structure:
    ///   {base_dir}/
    ///     ├── data/      (segment files: db0, db1, ...)
    ///     ├── cache/     (index snapshots: cache0, cache1, ...)
    ///     └── merge/     (compaction scratch, only while a pass runs)
    pub base_dir: PathBuf,

    /// Subdirectory holding segment files
    pub data_subdir: String,

    /// File name prefix for segment files (`<prefix><id>`)
    pub data_file_prefix: String,

    /// Subdirectory holding index snapshot files
    pub cache_subdir: String,

    /// File name prefix for index snapshot files (`<prefix><id>`)
    pub cache_file_prefix: String,

    /// Subdirectory used as scratch space by compaction
    pub merge_subdir: String,

    // -------------------------------------------------------------------------
    // Segment Configuration
    // -------------------------------------------------------------------------
    /// The active segment rotates once its size exceeds this many bytes
    pub max_segment_bytes: u64,

    /// `sync_data` the segment after every append
    pub sync_writes: bool,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Where compaction runs after a rotation
    pub compaction_mode: CompactionMode,
}

/// Where the compaction pass owed after a rotation is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionMode {
    /// Run on the writing thread before `write` returns
    Inline,

    /// Hand off to a dedicated background thread
    Background,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::new(),
            data_subdir: "data".to_string(),
            data_file_prefix: "db".to_string(),
            cache_subdir: "cache".to_string(),
            cache_file_prefix: "cache".to_string(),
            merge_subdir: "merge".to_string(),
            max_segment_bytes: u64::MAX,
            sync_writes: true,
            compaction_mode: CompactionMode::Inline,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Directory holding segment files
    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join(&self.data_subdir)
    }

    /// Directory holding index snapshot files
    pub fn cache_dir(&self) -> PathBuf {
        self.base_dir.join(&self.cache_subdir)
    }

    /// Compaction scratch directory
    pub fn merge_dir(&self) -> PathBuf {
        self.base_dir.join(&self.merge_subdir)
    }

    /// Check that the configuration describes a usable layout
    pub fn validate(&self) -> Result<()> {
        if is_blank(&self.base_dir) {
            return Err(DriftError::Config("base_dir must not be blank".to_string()));
        }

        let named = [
            ("data_subdir", &self.data_subdir),
            ("data_file_prefix", &self.data_file_prefix),
            ("cache_subdir", &self.cache_subdir),
            ("cache_file_prefix", &self.cache_file_prefix),
            ("merge_subdir", &self.merge_subdir),
        ];
        for (name, value) in named {
            if value.trim().is_empty() {
                return Err(DriftError::Config(format!("{} must not be empty", name)));
            }
        }

        if self.merge_subdir == self.data_subdir || self.merge_subdir == self.cache_subdir {
            return Err(DriftError::Config(
                "merge_subdir must differ from data_subdir and cache_subdir".to_string(),
            ));
        }

        // Sharing a directory is fine as long as a file name can only parse one way
        if self.data_subdir == self.cache_subdir
            && (self.data_file_prefix.starts_with(&self.cache_file_prefix)
                || self.cache_file_prefix.starts_with(&self.data_file_prefix))
        {
            return Err(DriftError::Config(format!(
                "data_file_prefix {:?} and cache_file_prefix {:?} collide in {:?}",
                self.data_file_prefix, self.cache_file_prefix, self.data_subdir
            )));
        }

        Ok(())
    }
}

fn is_blank(path: &Path) -> bool {
    path.as_os_str().to_string_lossy().trim().is_empty()
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the base directory (root for all storage)
    pub fn base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.base_dir = path.into();
        self
    }

    /// Set the segment subdirectory name
    pub fn data_subdir(mut self, name: impl Into<String>) -> Self {
        self.config.data_subdir = name.into();
        self
    }

    /// Set the segment file prefix
    pub fn data_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.data_file_prefix = prefix.into();
        self
    }

    /// Set the snapshot subdirectory name
    pub fn cache_subdir(mut self, name: impl Into<String>) -> Self {
        self.config.cache_subdir = name.into();
        self
    }

    /// Set the snapshot file prefix
    pub fn cache_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.cache_file_prefix = prefix.into();
        self
    }

    /// Set the compaction scratch subdirectory name
    pub fn merge_subdir(mut self, name: impl Into<String>) -> Self {
        self.config.merge_subdir = name.into();
        self
    }

    /// Set the rotation threshold (in bytes)
    pub fn max_segment_bytes(mut self, bytes: u64) -> Self {
        self.config.max_segment_bytes = bytes;
        self
    }

    /// Enable or disable `sync_data` after each append
    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.config.sync_writes = sync;
        self
    }

    /// Choose where compaction runs
    pub fn compaction_mode(mut self, mode: CompactionMode) -> Self {
        self.config.compaction_mode = mode;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
