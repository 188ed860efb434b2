// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The in-memory block index: a striped map from
//! block-id to the location of its current live record. Grounded on the
//! teacher's `descriptor_table`, generalized from a sharded LRU of open
//! file descriptors to a sharded map of block locations.

use crate::hash::Digest;
use rustc_hash::FxHashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

/// Default number of shards the index is split into, matching
/// `Config::index_shards`'s default.
pub const DEFAULT_INDEX_SHARDS: usize = 16;

/// Where one block's current live record lives.
#[derive(Clone, Debug)]
pub struct IndexEntry {
    pub slab_id: u64,
    pub offset: u64,
    /// Total on-disk length of the record (header + body), used for a
    /// slab's live-ratio accounting.
    pub record_length: u32,
    /// Length of the logical, uncompressed payload, used for the
    /// `avail_bytes`/`gc_bytes`/`move_bytes` statistics.
    pub uncompressed_length: u32,
    /// Digest over the uncompressed payload, checked against a caller's
    /// conditional-read `crc` without touching disk.
    pub hash: Digest,
    pub generation: u64,
    pub tombstone: bool,
}

/// Point-in-time counts derived from the index, backing the `objects`
/// statistic.
#[derive(Copy, Clone, Debug, Default)]
pub struct IndexStats {
    pub live_objects: u64,
}

/// A block-id -> [`IndexEntry`] map, striped across shards so concurrent
/// operations on unrelated block-ids never contend on the same lock.
pub struct BlockIndex {
    shards: Vec<RwLock<FxHashMap<String, IndexEntry>>>,
}

impl BlockIndex {
    #[must_use]
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shards.push(RwLock::new(FxHashMap::default()));
        }
        Self { shards }
    }

    fn shard_for(&self, block_id: &str) -> &RwLock<FxHashMap<String, IndexEntry>> {
        let mut hasher = rustc_hash::FxHasher::default();
        block_id.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    #[must_use]
    pub fn get(&self, block_id: &str) -> Option<IndexEntry> {
        self.shard_for(block_id)
            .read()
            .expect("lock is poisoned")
            .get(block_id)
            .cloned()
    }

    /// Inserts `entry` only if no live entry currently exists for
    /// `block_id`. A tombstoned prior entry does not block the insert.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Exists`] if a live entry is already present.
    pub fn insert_new(&self, block_id: &str, entry: IndexEntry) -> crate::Result<()> {
        let mut shard = self.shard_for(block_id).write().expect("lock is poisoned");
        if let Some(existing) = shard.get(block_id) {
            if !existing.tombstone {
                return Err(crate::Error::Exists);
            }
        }
        shard.insert(block_id.to_string(), entry);
        Ok(())
    }

    /// Unconditionally replaces the entry for `block_id`, returning
    /// whatever was there before (if anything, live or tombstoned).
    pub fn upsert(&self, block_id: &str, entry: IndexEntry) -> Option<IndexEntry> {
        self.shard_for(block_id)
            .write()
            .expect("lock is poisoned")
            .insert(block_id.to_string(), entry)
    }

    /// Replaces the entry for `block_id` with `new_entry`, but only if the
    /// current entry still points at `(expected_slab_id, expected_offset)`.
    /// Returns whether the swap happened. Used by the compactor to move a
    /// record's index entry to its new location without clobbering a
    /// concurrent write or delete that raced ahead of it: the compactor
    /// takes no lock of its own, relying on this check-then-set to detect
    /// the race instead.
    pub fn compare_and_swap_location(
        &self,
        block_id: &str,
        expected_slab_id: u64,
        expected_offset: u64,
        new_entry: IndexEntry,
    ) -> bool {
        let mut shard = self.shard_for(block_id).write().expect("lock is poisoned");
        match shard.get(block_id) {
            Some(current) if current.slab_id == expected_slab_id && current.offset == expected_offset => {
                shard.insert(block_id.to_string(), new_entry);
                true
            }
            _ => false,
        }
    }

    /// Removes the entry for `block_id` entirely, returning the previous
    /// entry if one existed. Used once a tombstone record has been durably
    /// appended, so a deleted block-id is immediately unavailable rather
    /// than waiting for compaction to notice the tombstone.
    pub fn delete(&self, block_id: &str) -> Option<IndexEntry> {
        self.shard_for(block_id)
            .write()
            .expect("lock is poisoned")
            .remove(block_id)
    }

    /// Counts live (non-tombstoned) entries across every shard.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        let live_objects = self
            .shards
            .iter()
            .map(|shard| {
                shard
                    .read()
                    .expect("lock is poisoned")
                    .values()
                    .filter(|e| !e.tombstone)
                    .count() as u64
            })
            .sum();
        IndexStats { live_objects }
    }

    /// Every live entry in the index, block-id and location together.
    /// Used by the compactor to tell which records in a candidate slab are
    /// still live.
    #[must_use]
    pub fn snapshot_live(&self) -> FxHashMap<String, IndexEntry> {
        let mut out = FxHashMap::default();
        for shard in &self.shards {
            for (block_id, entry) in shard.read().expect("lock is poisoned").iter() {
                if !entry.tombstone {
                    out.insert(block_id.clone(), entry.clone());
                }
            }
        }
        out
    }
}
