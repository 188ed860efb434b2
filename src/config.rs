// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{compression::CompressionType, index::DEFAULT_INDEX_SHARDS, path::absolute_path};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_FILE_FOLDER: &str = ".slab-engine.data";

/// 256 MiB, the default maximum size of a single slab file.
const DEFAULT_SLAB_CAPACITY: u64 = 256 * 1_024 * 1_024;

#[derive(Clone)]
/// Engine configuration builder.
pub struct Config {
    /// Folder the engine's slabs live in.
    pub path: PathBuf,

    /// Maximum size, in bytes, of a single slab file.
    pub slab_capacity: u64,

    /// A sealed slab becomes eligible for compaction once its live ratio
    /// drops at or below this threshold.
    pub compact_live_ratio_threshold: f64,

    /// A sealed slab is never chosen for compaction before it reaches
    /// this age, so an in-flight reader always has time to finish.
    pub compact_min_age: Duration,

    /// Re-hash and re-check a record's stored digest against its payload
    /// on every read, not just on write.
    pub verify_on_read: bool,

    /// Compression applied to writes that do not specify one explicitly.
    pub default_compression: CompressionType,

    /// Number of shards the in-memory block index is striped across.
    pub index_shards: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: absolute_path(Path::new(DEFAULT_FILE_FOLDER)),
            slab_capacity: DEFAULT_SLAB_CAPACITY,
            compact_live_ratio_threshold: 0.5,
            compact_min_age: Duration::from_secs(60),
            verify_on_read: false,
            default_compression: CompressionType::None,
            index_shards: DEFAULT_INDEX_SHARDS,
        }
    }
}

impl Config {
    /// Initializes a new config rooted at `path`.
    #[must_use]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: absolute_path(path.as_ref()),
            ..Default::default()
        }
    }

    /// Sets the maximum size of a single slab file.
    ///
    /// Defaults to 256 MiB.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is 0.
    #[must_use]
    pub fn slab_capacity(mut self, bytes: u64) -> Self {
        assert!(bytes > 0, "slab capacity must be non-zero");
        self.slab_capacity = bytes;
        self
    }

    /// Sets the live-ratio threshold below which a sealed slab becomes a
    /// compaction candidate.
    ///
    /// Defaults to 0.5.
    ///
    /// # Panics
    ///
    /// Panics if `ratio` is outside `0.0..=1.0`.
    #[must_use]
    pub fn compact_live_ratio_threshold(mut self, ratio: f64) -> Self {
        assert!((0.0..=1.0).contains(&ratio), "ratio must be in 0.0..=1.0");
        self.compact_live_ratio_threshold = ratio;
        self
    }

    /// Sets the minimum age a sealed slab must reach before compaction
    /// will consider it.
    ///
    /// Defaults to 60 seconds.
    #[must_use]
    pub fn compact_min_age(mut self, age: Duration) -> Self {
        self.compact_min_age = age;
        self
    }

    /// Enables or disables re-verifying a record's digest on every read.
    ///
    /// Defaults to `false`; the digest is always checked on write.
    #[must_use]
    pub fn verify_on_read(mut self, enabled: bool) -> Self {
        self.verify_on_read = enabled;
        self
    }

    /// Sets the compression applied when a write does not request one.
    ///
    /// Defaults to `None`.
    #[must_use]
    pub fn default_compression(mut self, compression: CompressionType) -> Self {
        self.default_compression = compression;
        self
    }

    /// Sets the number of shards the block index is striped across.
    ///
    /// Defaults to 16.
    ///
    /// # Panics
    ///
    /// Panics if `shards` is 0.
    #[must_use]
    pub fn index_shards(mut self, shards: usize) -> Self {
        assert!(shards > 0, "index_shards must be non-zero");
        self.index_shards = shards;
        self
    }

    /// Opens an engine using this config.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine's slabs cannot be opened or replayed.
    pub fn open(self) -> crate::Result<crate::engine::Engine> {
        crate::engine::Engine::open(self)
    }
}
