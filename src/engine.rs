// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Orchestrates writes, reads, deletes, and appends across the codec,
//! slab set, and block index, and publishes statistics. A single entry
//! struct wrapping config and mutable state, opened once and shared
//! behind an `Arc` by callers.

use crate::{
    api::{Meta, NodeStatus, StorageStats},
    compression::{self, CompressionType},
    config::Config,
    hash::{self, Digest, HashFunction},
    index::{BlockIndex, IndexEntry},
    metrics::Metrics,
    record::Record,
    slab::AppendOutcome,
    slab_set::SlabSet,
};
use rand::RngCore;
use std::sync::Mutex;

/// Options accepted by [`Engine::insert`]/[`Engine::upsert`]/
/// [`Engine::append`].
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    pub content_type: String,
    pub compress: bool,
    /// Caller-asserted digest to check the computed hash against. Absent
    /// skips verification.
    pub hash: Option<Digest>,
    /// Caller-requested `hash-function` discriminant. Absent defaults to
    /// MD5; present and not `0` fails with [`crate::Error::UnsupportedHash`].
    pub hash_fun: Option<u8>,
}

/// Result of a successful write.
#[derive(Clone, Debug)]
pub struct WriteResult {
    pub block_id: String,
    pub meta: Meta,
}

/// Result of [`Engine::get`].
#[derive(Clone, Debug)]
pub enum GetOutcome {
    Payload {
        payload: Vec<u8>,
        meta: Meta,
        compressed: bool,
    },
    NotModified,
}

/// The single entry point front-ends call into.
pub struct Engine {
    config: Config,
    slabs: SlabSet,
    index: BlockIndex,
    metrics: Metrics,
    /// Serializes the "check active slab has room, roll over if not,
    /// append, flush" critical section: a single writer mutex over the
    /// active slab pointer and watermark.
    write_lock: Mutex<()>,
}

impl Engine {
    /// Opens the engine's slabs and rebuilds the in-memory block index by
    /// replaying every slab in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] on disk failure, or
    /// [`crate::Error::Corruption`] if a slab header is invalid.
    pub fn open(config: Config) -> crate::Result<Self> {
        let slabs = SlabSet::open(&config.path, config.slab_capacity)?;
        let index = BlockIndex::new(config.index_shards);

        let mut all_slabs = slabs.all();
        all_slabs.sort_by_key(|slab| slab.id);

        let mut total_capacity = 0u64;
        for slab in &all_slabs {
            total_capacity += slab.capacity;

            let mut locations = slab.record_locations();
            locations.sort_by_key(|(offset, _)| *offset);

            for (offset, loc) in locations {
                if loc.tombstone {
                    index.delete(&loc.block_id);
                } else {
                    index.upsert(
                        &loc.block_id,
                        IndexEntry {
                            slab_id: slab.id,
                            offset,
                            record_length: loc.length,
                            uncompressed_length: loc.uncompressed_length,
                            hash: loc.hash,
                            generation: loc.generation,
                            tombstone: false,
                        },
                    );
                }
            }
        }

        let metrics = Metrics::new(total_capacity);
        for entry in index.snapshot_live().values() {
            metrics.record_insert(u64::from(entry.uncompressed_length));
        }

        log::info!(
            "engine open at {} with {} object(s) across {} slab(s)",
            config.path.display(),
            index.stats().live_objects,
            all_slabs.len()
        );

        Ok(Self {
            config,
            slabs,
            index,
            metrics,
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Inserts a new block, generating a 32-hex-character id if
    /// `block_id` is absent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Exists`] if `block_id` already has a live
    /// entry, [`crate::Error::HashMismatch`] if `options.hash` disagrees
    /// with the computed digest, [`crate::Error::TooLarge`] if the record
    /// cannot fit a fresh slab, or [`crate::Error::NoSpace`] if no slab
    /// could be created to hold it.
    pub fn insert(
        &self,
        block_id: Option<String>,
        payload: Vec<u8>,
        options: WriteOptions,
    ) -> crate::Result<WriteResult> {
        let block_id = block_id.unwrap_or_else(generate_block_id);

        if self.index.get(&block_id).is_some() {
            return Err(crate::Error::Exists);
        }

        let record = self.build_record(&block_id, payload, &options, 1)?;
        let (slab_id, offset) = self.append_record_to_active(&record)?;

        self.index.insert_new(
            &block_id,
            IndexEntry {
                slab_id,
                offset,
                record_length: record.total_len() as u32,
                uncompressed_length: record.uncompressed_length,
                hash: record.hash,
                generation: record.generation,
                tombstone: false,
            },
        )?;

        self.metrics.record_insert(u64::from(record.uncompressed_length));

        Ok(WriteResult {
            block_id,
            meta: meta_of(&record),
        })
    }

    /// Inserts or replaces `block_id`'s live record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::HashMismatch`], [`crate::Error::TooLarge`],
    /// or [`crate::Error::NoSpace`] under the same conditions as
    /// [`Engine::insert`].
    pub fn upsert(
        &self,
        block_id: &str,
        payload: Vec<u8>,
        options: WriteOptions,
    ) -> crate::Result<WriteResult> {
        let previous_generation = self.index.get(block_id).map(|e| e.generation);
        let generation = previous_generation.map_or(1, |g| g + 1);

        let record = self.build_record(block_id, payload, &options, generation)?;
        let (slab_id, offset) = self.append_record_to_active(&record)?;

        let previous = self.index.upsert(
            block_id,
            IndexEntry {
                slab_id,
                offset,
                record_length: record.total_len() as u32,
                uncompressed_length: record.uncompressed_length,
                hash: record.hash,
                generation: record.generation,
                tombstone: false,
            },
        );

        match previous {
            Some(previous) if !previous.tombstone => self
                .metrics
                .record_overwrite(u64::from(previous.uncompressed_length), u64::from(record.uncompressed_length)),
            _ => self.metrics.record_insert(u64::from(record.uncompressed_length)),
        }

        Ok(WriteResult {
            block_id: block_id.to_string(),
            meta: meta_of(&record),
        })
    }

    /// Reads a block, honoring a conditional-read digest and the
    /// caller's tolerance for a still-compressed payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] if `block_id` has no live
    /// entry, or [`crate::Error::Corruption`] if the stored record fails
    /// validation (the stale index entry is evicted first).
    pub fn get(
        &self,
        block_id: &str,
        crc: Option<&str>,
        allow_compressed: bool,
    ) -> crate::Result<GetOutcome> {
        let entry = self.index.get(block_id).ok_or(crate::Error::NotFound)?;

        if let Some(crc) = crc {
            if !crc.is_empty() && crc.eq_ignore_ascii_case(&entry.hash.to_hex()) {
                return Ok(GetOutcome::NotModified);
            }
        }

        let slab = self.slabs.get(entry.slab_id).ok_or(crate::Error::NotFound)?;
        let record = match slab.read(entry.offset, entry.record_length) {
            Ok(record) => record,
            Err(crate::Error::Corruption) => {
                log::warn!("evicting index entry for {block_id}: stored record failed validation");
                self.index.delete(block_id);
                return Err(crate::Error::Corruption);
            }
            Err(e) => return Err(e),
        };

        if self.config.verify_on_read {
            let recomputed = match record.compression {
                CompressionType::None => hash::hash(&record.payload, record.hash_function),
                CompressionType::Lz4 => {
                    let decompressed = compression::decompress(
                        &record.payload,
                        record.compression,
                        record.uncompressed_length,
                    )?;
                    hash::hash(&decompressed, record.hash_function)
                }
            };
            if recomputed != record.hash {
                log::warn!("on-read verification failed for {block_id}");
                return Err(crate::Error::Corruption);
            }
        }

        let meta = meta_of(&record);

        if record.compression == CompressionType::Lz4 && allow_compressed {
            return Ok(GetOutcome::Payload {
                payload: record.payload,
                meta,
                compressed: true,
            });
        }

        let payload = compression::decompress(
            &record.payload,
            record.compression,
            record.uncompressed_length,
        )?;

        Ok(GetOutcome::Payload {
            payload,
            meta,
            compressed: false,
        })
    }

    /// Appends bytes to an existing block by reading its current payload,
    /// concatenating, and performing an upsert. Records
    /// stay immutable within a slab; this is read-modify-write, not a
    /// physical append to an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] if `block_id` is absent, and the
    /// same write errors as [`Engine::upsert`].
    pub fn append(
        &self,
        block_id: &str,
        more: &[u8],
        options: WriteOptions,
    ) -> crate::Result<WriteResult> {
        let current = match self.get(block_id, None, false)? {
            GetOutcome::Payload { mut payload, .. } => {
                payload.extend_from_slice(more);
                payload
            }
            GetOutcome::NotModified => unreachable!("get() with no crc never returns NotModified"),
        };

        self.upsert(block_id, current, options)
    }

    /// Deletes a block by appending a tombstone record and removing its
    /// index entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] if `block_id` has no live entry.
    pub fn delete(&self, block_id: &str) -> crate::Result<()> {
        let previous = self.index.get(block_id).ok_or(crate::Error::NotFound)?;

        let tombstone = Record {
            block_id: block_id.to_string(),
            content_type: String::new(),
            payload: Vec::new(),
            hash_function: HashFunction::Md5,
            compression: CompressionType::None,
            uncompressed_length: 0,
            hash: hash::hash(&[], HashFunction::Md5),
            generation: previous.generation + 1,
            creation_time_millis: crate::time::unix_timestamp_millis(),
            tombstone: true,
        };

        self.append_record_to_active(&tombstone)?;
        self.index.delete(block_id);
        self.metrics.record_delete(u64::from(previous.uncompressed_length));

        Ok(())
    }

    /// Runs one compaction cycle: picks a victim slab, migrates its live
    /// records, and retires it. Returns `true` if a
    /// victim was found and processed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] on disk failure.
    pub fn compact_once(&self) -> crate::Result<bool> {
        let victim = self.slabs.pick_compaction_victim(
            self.config.compact_live_ratio_threshold,
            self.config.compact_min_age,
            |slab| self.live_bytes_in_slab(slab.id),
        );

        let Some(victim) = victim else {
            return Ok(false);
        };

        log::info!("compaction: migrating live records out of slab {}", victim.id);

        let mut locations = victim.record_locations();
        locations.sort_by_key(|(offset, _)| *offset);

        for (offset, loc) in locations {
            if loc.tombstone {
                continue;
            }

            let Some(current) = self.index.get(&loc.block_id) else {
                continue;
            };
            if current.slab_id != victim.id || current.offset != offset {
                // Superseded or deleted since the scan; nothing to move.
                continue;
            }

            let record = match victim.read(offset, loc.length) {
                Ok(record) => record,
                Err(crate::Error::Corruption) => {
                    log::warn!(
                        "compaction: skipping corrupt record for {} in slab {}",
                        loc.block_id,
                        victim.id
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            let (new_slab_id, new_offset) = self.append_record_to_active(&record)?;

            let moved = self.index.compare_and_swap_location(
                &loc.block_id,
                victim.id,
                offset,
                IndexEntry {
                    slab_id: new_slab_id,
                    offset: new_offset,
                    record_length: record.total_len() as u32,
                    uncompressed_length: record.uncompressed_length,
                    hash: record.hash,
                    generation: record.generation,
                    tombstone: false,
                },
            );

            if moved {
                self.metrics.record_move(u64::from(record.uncompressed_length));
            }
        }

        self.slabs.retire(victim.id)?;
        Ok(true)
    }

    /// A statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> StorageStats {
        let partial = self.metrics.snapshot();
        StorageStats {
            init_bytes: partial.init_bytes,
            active_slots: self.slabs.active_slot_count() as u64,
            gc_bytes: partial.gc_bytes,
            move_bytes: partial.move_bytes,
            objects: self.index.stats().live_objects,
            avail_bytes: partial.avail_bytes,
        }
    }

    #[must_use]
    pub fn node_status(&self) -> NodeStatus {
        NodeStatus::default()
    }

    fn live_bytes_in_slab(&self, slab_id: u64) -> u64 {
        self.index
            .snapshot_live()
            .values()
            .filter(|e| e.slab_id == slab_id)
            .map(|e| u64::from(e.record_length))
            .sum()
    }

    fn build_record(
        &self,
        block_id: &str,
        payload: Vec<u8>,
        options: &WriteOptions,
        generation: u64,
    ) -> crate::Result<Record> {
        let hash_function = match options.hash_fun {
            Some(tag) => HashFunction::from_tag(tag)?,
            None => HashFunction::Md5,
        };

        let digest = hash::hash(&payload, hash_function);
        if let Some(expected) = options.hash {
            if expected != digest {
                return Err(crate::Error::HashMismatch);
            }
        }

        let uncompressed_length = payload.len() as u32;
        let codec = if options.compress {
            CompressionType::Lz4
        } else {
            self.config.default_compression
        };
        let (stored_payload, effective_codec) = compression::compress(&payload, codec);

        Ok(Record {
            block_id: block_id.to_string(),
            content_type: options.content_type.clone(),
            payload: stored_payload,
            hash_function,
            compression: effective_codec,
            uncompressed_length,
            hash: digest,
            generation,
            creation_time_millis: crate::time::unix_timestamp_millis(),
            tombstone: false,
        })
    }

    /// Appends `record` to the active slab, rolling over to a fresh slab
    /// and retrying once if the active slab cannot fit it, then flushes
    /// before returning.
    fn append_record_to_active(&self, record: &Record) -> crate::Result<(u64, u64)> {
        if crate::slab::SLAB_HEADER_LEN + record.total_len() as u64 > self.config.slab_capacity {
            return Err(crate::Error::TooLarge);
        }

        let _guard = self.write_lock.lock().expect("lock is poisoned");

        loop {
            let active = self.slabs.active();
            match active.append(record)? {
                AppendOutcome::Written(offset) => {
                    active.flush()?;
                    return Ok((active.id, offset));
                }
                AppendOutcome::Full => {
                    let fresh = self.slabs.rollover().map_err(|_| crate::Error::NoSpace)?;
                    self.metrics.record_slab_created(fresh.capacity);
                }
            }
        }
    }
}

fn meta_of(record: &Record) -> Meta {
    Meta {
        size: record.uncompressed_length,
        crc: record.hash.to_hex(),
        generation: record.generation,
        creation_time: record.creation_time_millis,
    }
}

fn generate_block_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).slab_capacity(1024 * 1024);
        let engine = Engine::open(config).unwrap();
        (dir, engine)
    }

    #[test]
    fn insert_then_get_round_trips() {
        let (_dir, engine) = engine();
        let result = engine
            .insert(Some("a".to_string()), b"hello".to_vec(), WriteOptions::default())
            .unwrap();
        assert_eq!(result.meta.size, 5);

        match engine.get("a", None, false).unwrap() {
            GetOutcome::Payload { payload, meta, .. } => {
                assert_eq!(payload, b"hello");
                assert_eq!(meta.generation, 1);
            }
            GetOutcome::NotModified => panic!("expected payload"),
        }
    }

    #[test]
    fn insert_generates_block_id_when_absent() {
        let (_dir, engine) = engine();
        let result = engine.insert(None, b"x".to_vec(), WriteOptions::default()).unwrap();
        assert_eq!(result.block_id.len(), 32);
        assert!(result.block_id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn insert_twice_fails_with_exists() {
        let (_dir, engine) = engine();
        engine.insert(Some("a".to_string()), b"1".to_vec(), WriteOptions::default()).unwrap();
        let err = engine
            .insert(Some("a".to_string()), b"2".to_vec(), WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, crate::Error::Exists));
    }

    #[test]
    fn get_missing_is_not_found() {
        let (_dir, engine) = engine();
        let err = engine.get("missing", None, false).unwrap_err();
        assert!(matches!(err, crate::Error::NotFound));
    }

    #[test]
    fn conditional_get_with_matching_crc_is_not_modified() {
        let (_dir, engine) = engine();
        let result = engine
            .insert(Some("a".to_string()), b"hello".to_vec(), WriteOptions::default())
            .unwrap();

        let outcome = engine.get("a", Some(result.meta.crc.as_str()), false).unwrap();
        assert!(matches!(outcome, GetOutcome::NotModified));

        let outcome = engine.get("a", Some(""), false).unwrap();
        assert!(matches!(outcome, GetOutcome::Payload { .. }));
    }

    #[test]
    fn delete_then_get_is_not_found() {
        let (_dir, engine) = engine();
        engine.insert(Some("a".to_string()), b"1".to_vec(), WriteOptions::default()).unwrap();
        engine.delete("a").unwrap();
        let err = engine.get("a", None, false).unwrap_err();
        assert!(matches!(err, crate::Error::NotFound));

        let before = engine.stats();
        assert_eq!(before.objects, 0);
    }

    #[test]
    fn append_concatenates_payload() {
        let (_dir, engine) = engine();
        engine
            .insert(Some("b".to_string()), b"text1".to_vec(), WriteOptions::default())
            .unwrap();
        let result = engine.append("b", b"text2", WriteOptions::default()).unwrap();
        assert_eq!(result.meta.size, 10);

        match engine.get("b", None, false).unwrap() {
            GetOutcome::Payload { payload, .. } => assert_eq!(payload, b"text1text2"),
            GetOutcome::NotModified => panic!("expected payload"),
        }
    }

    #[test]
    fn upsert_is_idempotent_on_objects_but_bumps_gc_bytes() {
        let (_dir, engine) = engine();
        engine.upsert("a", b"same".to_vec(), WriteOptions::default()).unwrap();
        let before = engine.stats();

        engine.upsert("a", b"same".to_vec(), WriteOptions::default()).unwrap();
        let after = engine.stats();

        assert_eq!(before.objects, after.objects);
        assert_eq!(after.gc_bytes, before.gc_bytes + 4);
    }

    #[test]
    fn hash_mismatch_on_insert_leaves_store_untouched() {
        let (_dir, engine) = engine();
        let wrong = hash::hash(b"not the payload", HashFunction::Md5);
        let err = engine
            .insert(
                Some("a".to_string()),
                b"hello".to_vec(),
                WriteOptions {
                    hash: Some(wrong),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, crate::Error::HashMismatch));
        assert!(engine.get("a", None, false).is_err());
    }

    #[test]
    fn unsupported_hash_function_on_insert_is_rejected() {
        let (_dir, engine) = engine();
        let err = engine
            .insert(
                Some("a".to_string()),
                b"hello".to_vec(),
                WriteOptions {
                    hash_fun: Some(9),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, crate::Error::UnsupportedHash(9)));
        assert!(engine.get("a", None, false).is_err());
    }

    #[test]
    fn statistics_law_for_insert_then_delete() {
        let (_dir, engine) = engine();
        let s0 = engine.stats();

        engine.insert(Some("a".to_string()), b"hello".to_vec(), WriteOptions::default()).unwrap();
        let s1 = engine.stats();
        assert_eq!(s1.objects, s0.objects + 1);
        assert_eq!(s1.avail_bytes, s0.avail_bytes - 5);

        engine.delete("a").unwrap();
        let s2 = engine.stats();
        assert_eq!(s2.objects, s0.objects);
        assert_eq!(s2.gc_bytes, s1.gc_bytes + 5);
        assert_eq!(s0.init_bytes, s1.init_bytes);
        assert_eq!(s1.init_bytes, s2.init_bytes);
    }

    #[test]
    fn compaction_reclaims_space_and_counts_move_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path())
            .slab_capacity(1024 * 1024)
            .compact_min_age(std::time::Duration::from_secs(0));
        let engine = Engine::open(config).unwrap();
        for i in 0..4 {
            engine
                .insert(Some(format!("k{i}")), vec![b'x'; 1000], WriteOptions::default())
                .unwrap();
        }
        engine.delete("k0").unwrap();
        engine.delete("k1").unwrap();

        // Force the active slab to seal so it becomes compaction-eligible.
        engine.slabs.rollover().unwrap();

        let before = engine.stats();
        let did_work = engine.compact_once().unwrap();
        assert!(did_work);
        let after = engine.stats();

        assert!(after.avail_bytes >= before.avail_bytes);
        assert!(after.move_bytes >= before.move_bytes);

        match engine.get("k2", None, false).unwrap() {
            GetOutcome::Payload { payload, .. } => assert_eq!(payload.len(), 1000),
            GetOutcome::NotModified => panic!("expected payload"),
        }
    }

    #[test]
    fn too_large_record_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).slab_capacity(256);
        let engine = Engine::open(config).unwrap();

        let err = engine
            .insert(Some("a".to_string()), vec![0u8; 10_000], WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, crate::Error::TooLarge));
    }
}
