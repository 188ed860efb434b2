// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Cumulative and point-in-time statistics, tracked as plain atomics so
//! a snapshot never blocks a writer.

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

#[derive(Debug, Default)]
pub struct Metrics {
    /// Total slab capacity committed at startup. Constant after the
    /// engine opens, even as rollover or compaction adds
    /// further slabs.
    init_bytes: AtomicU64,

    /// Total slab capacity currently allocated, including slabs created
    /// after startup. Used to derive `avail_bytes`.
    total_capacity: AtomicU64,

    /// Uncompressed payload bytes currently live across the index.
    live_payload_bytes: AtomicU64,

    /// Cumulative payload bytes freed by deletion or overwrite.
    gc_bytes: AtomicU64,

    /// Cumulative payload bytes copied by the compactor.
    move_bytes: AtomicU64,
}

/// A point-in-time statistics snapshot, minus the parts (`objects`,
/// `active_slots`) that only the block index and slab set can answer.
#[derive(Copy, Clone, Debug, Default)]
pub struct PartialSnapshot {
    pub init_bytes: u64,
    pub avail_bytes: u64,
    pub gc_bytes: u64,
    pub move_bytes: u64,
}

impl Metrics {
    /// Creates a fresh metrics tracker, fixing `init_bytes` to
    /// `initial_total_capacity` — the sum of every slab's capacity as
    /// observed at startup.
    #[must_use]
    pub fn new(initial_total_capacity: u64) -> Self {
        Self {
            init_bytes: AtomicU64::new(initial_total_capacity),
            total_capacity: AtomicU64::new(initial_total_capacity),
            live_payload_bytes: AtomicU64::new(0),
            gc_bytes: AtomicU64::new(0),
            move_bytes: AtomicU64::new(0),
        }
    }

    /// Records capacity added by a slab created after startup (rollover
    /// or a compaction-created slab). Does not affect `init_bytes`.
    pub fn record_slab_created(&self, capacity: u64) {
        self.total_capacity.fetch_add(capacity, Relaxed);
    }

    /// Records a brand-new live record.
    pub fn record_insert(&self, payload_len: u64) {
        self.live_payload_bytes.fetch_add(payload_len, Relaxed);
    }

    /// Records an existing live record being replaced by a new one of a
    /// possibly different length.
    pub fn record_overwrite(&self, old_payload_len: u64, new_payload_len: u64) {
        self.gc_bytes.fetch_add(old_payload_len, Relaxed);
        if new_payload_len >= old_payload_len {
            self.live_payload_bytes
                .fetch_add(new_payload_len - old_payload_len, Relaxed);
        } else {
            self.live_payload_bytes
                .fetch_sub(old_payload_len - new_payload_len, Relaxed);
        }
    }

    /// Records a live record being removed outright by a delete.
    pub fn record_delete(&self, freed_payload_len: u64) {
        self.live_payload_bytes.fetch_sub(freed_payload_len, Relaxed);
        self.gc_bytes.fetch_add(freed_payload_len, Relaxed);
    }

    /// Records the compactor relocating a live record.
    pub fn record_move(&self, payload_len: u64) {
        self.move_bytes.fetch_add(payload_len, Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> PartialSnapshot {
        let init_bytes = self.init_bytes.load(Relaxed);
        let total_capacity = self.total_capacity.load(Relaxed);
        let live_payload_bytes = self.live_payload_bytes.load(Relaxed);
        PartialSnapshot {
            init_bytes,
            avail_bytes: total_capacity.saturating_sub(live_payload_bytes),
            gc_bytes: self.gc_bytes.load(Relaxed),
            move_bytes: self.move_bytes.load(Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_bytes_is_fixed_at_construction() {
        let metrics = Metrics::new(1024);
        metrics.record_slab_created(1024);
        assert_eq!(metrics.snapshot().init_bytes, 1024);
    }

    #[test]
    fn insert_then_delete_round_trips_avail_bytes() {
        let metrics = Metrics::new(1000);
        let before = metrics.snapshot().avail_bytes;

        metrics.record_insert(100);
        assert_eq!(metrics.snapshot().avail_bytes, before - 100);

        metrics.record_delete(100);
        assert_eq!(metrics.snapshot().avail_bytes, before);
        assert_eq!(metrics.snapshot().gc_bytes, 100);
    }

    #[test]
    fn overwrite_tracks_gc_and_live_bytes() {
        let metrics = Metrics::new(1000);
        metrics.record_insert(50);
        metrics.record_overwrite(50, 80);
        let snap = metrics.snapshot();
        assert_eq!(snap.gc_bytes, 50);
        assert_eq!(snap.avail_bytes, 1000 - 80);
    }

    #[test]
    fn move_bytes_accumulates() {
        let metrics = Metrics::new(1000);
        metrics.record_move(10);
        metrics.record_move(20);
        assert_eq!(metrics.snapshot().move_bytes, 30);
    }

    #[test]
    fn slab_created_after_construction_grows_avail_bytes_but_not_init_bytes() {
        let metrics = Metrics::new(1000);
        let before = metrics.snapshot();

        metrics.record_slab_created(1000);
        let after = metrics.snapshot();

        assert_eq!(after.init_bytes, before.init_bytes);
        assert_eq!(after.avail_bytes, before.avail_bytes + 1000);
    }
}
