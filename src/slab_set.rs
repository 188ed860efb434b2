// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The ordered collection of slabs that back one engine: directory
//! scan and replay on open, rollover from the active slab to a fresh
//! one, and victim selection for compaction.

use crate::slab::SlabFile;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Every slab the engine knows about, keyed by slab-id, plus which one is
/// currently accepting writes.
pub struct SlabSet {
    dir: PathBuf,
    slab_capacity: u64,
    next_slab_id: AtomicU64,
    active: Mutex<Arc<SlabFile>>,
    slabs: RwLock<BTreeMap<u64, Arc<SlabFile>>>,
}

impl SlabSet {
    /// Opens (or initializes) the slab set rooted at `dir`.
    ///
    /// Every regularly named slab file found in `dir` is opened and
    /// replayed. The highest-id slab becomes the active slab if it still
    /// has room under `slab_capacity`; otherwise it is sealed and a fresh
    /// slab is created to take writes, covering the case where a rollover
    /// was in flight when the process last stopped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] on disk failure, or
    /// [`crate::Error::Corruption`] if a slab header is invalid.
    pub fn open(dir: &Path, slab_capacity: u64) -> crate::Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mut slabs = BTreeMap::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // Temp files left behind by an interrupted `create_atomic` are
            // not valid slab names and are ignored; the directory is never
            // swept of them, leaving debris for an operator to notice
            // rather than auto-deleting it.
            let Ok(id) = file_name.parse::<u64>() else {
                continue;
            };
            let slab = SlabFile::open(&path)?;
            slabs.insert(id, Arc::new(slab));
        }

        let highest = slabs.keys().next_back().copied();

        let active = match highest {
            Some(id) => {
                let slab = Arc::clone(&slabs[&id]);
                if slab.is_full_for(0) {
                    slab.seal();
                    let fresh = Arc::new(SlabFile::create_atomic(dir, id + 1, slab_capacity)?);
                    slabs.insert(id + 1, Arc::clone(&fresh));
                    fresh
                } else {
                    slab
                }
            }
            None => {
                let fresh = Arc::new(SlabFile::create_atomic(dir, 1, slab_capacity)?);
                slabs.insert(1, Arc::clone(&fresh));
                fresh
            }
        };

        for (&id, slab) in &slabs {
            if id != active.id {
                slab.seal();
            }
        }

        let next_slab_id = slabs.keys().next_back().copied().unwrap_or(0) + 1;

        log::info!(
            "slab set at {} open with {} slab(s), active slab {}",
            dir.display(),
            slabs.len(),
            active.id
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            slab_capacity,
            next_slab_id: AtomicU64::new(next_slab_id),
            active: Mutex::new(active),
            slabs: RwLock::new(slabs),
        })
    }

    /// The slab currently accepting writes.
    #[must_use]
    pub fn active(&self) -> Arc<SlabFile> {
        Arc::clone(&self.active.lock().expect("lock is poisoned"))
    }

    /// Looks up a slab by id, active or sealed.
    #[must_use]
    pub fn get(&self, slab_id: u64) -> Option<Arc<SlabFile>> {
        self.slabs.read().expect("lock is poisoned").get(&slab_id).cloned()
    }

    /// Every slab currently in the set, in ascending id order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<SlabFile>> {
        self.slabs.read().expect("lock is poisoned").values().cloned().collect()
    }

    #[must_use]
    pub fn active_slot_count(&self) -> usize {
        self.slabs.read().expect("lock is poisoned").len()
    }

    /// Seals the current active slab and opens a fresh one to replace it,
    /// returning the new active slab. Called once the active slab can no
    /// longer fit the record a caller is trying to append.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] on disk failure.
    pub fn rollover(&self) -> crate::Result<Arc<SlabFile>> {
        let mut active = self.active.lock().expect("lock is poisoned");
        active.seal();

        let new_id = self.next_slab_id.fetch_add(1, Ordering::SeqCst);
        let fresh = Arc::new(SlabFile::create_atomic(&self.dir, new_id, self.slab_capacity)?);

        self.slabs
            .write()
            .expect("lock is poisoned")
            .insert(new_id, Arc::clone(&fresh));

        log::info!("rolled over to slab {new_id}");

        *active = Arc::clone(&fresh);
        Ok(fresh)
    }

    /// Picks the sealed slab with the lowest live ratio at or below
    /// `threshold`, provided it is at least `min_age` old, preferring the
    /// oldest among ties.
    /// `live_bytes_for` reports how many live payload bytes a candidate
    /// slab holds, per the engine's current block index.
    pub fn pick_compaction_victim(
        &self,
        threshold: f64,
        min_age: std::time::Duration,
        live_bytes_for: impl Fn(&SlabFile) -> u64,
    ) -> Option<Arc<SlabFile>> {
        let now = crate::time::unix_timestamp_millis();
        let min_age_millis = min_age.as_millis() as u64;
        let active_id = self.active().id;

        let mut best: Option<(f64, u64, Arc<SlabFile>)> = None;

        for slab in self.slabs.read().expect("lock is poisoned").values() {
            if slab.id == active_id || !slab.is_sealed() {
                continue;
            }

            let age = now.saturating_sub(slab.created_at_millis());
            if age < min_age_millis {
                continue;
            }

            let ratio = slab.live_ratio(live_bytes_for(slab));
            if ratio > threshold {
                continue;
            }

            let better = match &best {
                None => true,
                Some((best_ratio, best_id, _)) => {
                    ratio < *best_ratio || ((ratio - *best_ratio).abs() < f64::EPSILON && slab.id < *best_id)
                }
            };
            if better {
                best = Some((ratio, slab.id, Arc::clone(slab)));
            }
        }

        best.map(|(_, _, slab)| slab)
    }

    /// Removes a fully-migrated, sealed slab from the set and deletes its
    /// file. The caller must ensure no live record remains in it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] on disk failure.
    pub fn retire(&self, slab_id: u64) -> crate::Result<()> {
        let removed = self.slabs.write().expect("lock is poisoned").remove(&slab_id);
        if let Some(slab) = removed {
            std::fs::remove_file(&slab.path)?;
            log::info!("retired slab {slab_id}");
        }
        Ok(())
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn open_empty_dir_creates_first_active_slab() {
        let dir = tempfile::tempdir().unwrap();
        let set = SlabSet::open(dir.path(), 1024 * 1024).unwrap();
        assert_eq!(set.active().id, 1);
        assert_eq!(set.active_slot_count(), 1);
    }

    #[test]
    fn rollover_seals_old_active_and_creates_new() {
        let dir = tempfile::tempdir().unwrap();
        let set = SlabSet::open(dir.path(), 1024 * 1024).unwrap();
        let old_id = set.active().id;

        let new_active = set.rollover().unwrap();
        assert_ne!(new_active.id, old_id);
        assert!(set.get(old_id).unwrap().is_sealed());
        assert!(!new_active.is_sealed());
        assert_eq!(set.active_slot_count(), 2);
    }

    #[test]
    fn reopen_picks_up_existing_slabs() {
        let dir = tempfile::tempdir().unwrap();
        {
            let set = SlabSet::open(dir.path(), 1024 * 1024).unwrap();
            set.rollover().unwrap();
        }

        let reopened = SlabSet::open(dir.path(), 1024 * 1024).unwrap();
        assert_eq!(reopened.active_slot_count(), 2);
    }

    #[test]
    fn retire_removes_slab_from_set_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let set = SlabSet::open(dir.path(), 1024 * 1024).unwrap();
        set.rollover().unwrap();
        let sealed_id = set.all().iter().find(|s| s.is_sealed()).unwrap().id;

        set.retire(sealed_id).unwrap();
        assert!(set.get(sealed_id).is_none());
    }
}
