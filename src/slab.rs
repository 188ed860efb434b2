// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A fixed-capacity, append-only region of disk holding serialized
//! [`Record`]s, using a positioned `read_exact` to pull one record off
//! disk without holding the whole file in memory.

use crate::record::Record;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

pub const SLAB_MAGIC: [u8; 4] = *b"SLAB";
pub const SLAB_FORMAT_VERSION: u8 = 1;

/// The on-disk file name a slab with this id is stored under. Zero-padded
/// so directory listings sort in id order.
#[must_use]
pub fn slab_file_name(slab_id: u64) -> String {
    format!("{slab_id:020}")
}

/// Fixed size, in bytes, of the slab file header.
pub const SLAB_HEADER_LEN: u64 = 4 // magic
    + 1 // format_version
    + 8 // slab_id
    + 8 // creation_time (millis)
    + 8; // capacity

/// Result of [`SlabFile::append`].
pub enum AppendOutcome {
    /// The record was written at this offset.
    Written(u64),
    /// The record would not fit before `capacity`; the slab must be sealed.
    Full,
}

/// What a sequential scan learned about one record without needing the
/// global block index: its location, size, and whether it is a tombstone.
#[derive(Clone, Debug)]
pub struct RecordLocation {
    pub block_id: String,
    /// Total on-disk length of the record (header + body).
    pub length: u32,
    pub uncompressed_length: u32,
    pub hash: crate::hash::Digest,
    pub generation: u64,
    pub tombstone: bool,
}

/// A single slab file: header plus a densely packed sequence of records.
pub struct SlabFile {
    pub id: u64,
    pub path: PathBuf,
    pub capacity: u64,
    write_file: Mutex<File>,
    #[cfg(unix)]
    read_file: File,
    creation_time_millis: u64,
    watermark: AtomicU64,
    sealed: AtomicBool,
    /// offset -> what's there, rebuilt on `open`, maintained on `append`.
    record_index: RwLock<FxHashMap<u64, RecordLocation>>,
}

impl SlabFile {
    /// Creates a new, empty slab file and fsyncs its header.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] on disk failure.
    pub fn create(path: &Path, slab_id: u64, capacity: u64) -> crate::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let creation_time = crate::time::unix_timestamp_millis();

        let mut header = Vec::with_capacity(SLAB_HEADER_LEN as usize);
        header.write_all(&SLAB_MAGIC)?;
        header.write_u8(SLAB_FORMAT_VERSION)?;
        header.write_u64::<LittleEndian>(slab_id)?;
        header.write_u64::<LittleEndian>(creation_time)?;
        header.write_u64::<LittleEndian>(capacity)?;

        file.write_all(&header)?;
        file.sync_all()?;

        log::info!("created slab {slab_id} at {} (capacity {capacity})", path.display());

        #[cfg(unix)]
        let read_file = File::open(path)?;

        Ok(Self {
            id: slab_id,
            path: path.to_path_buf(),
            capacity,
            write_file: Mutex::new(file),
            #[cfg(unix)]
            read_file,
            creation_time_millis: creation_time,
            watermark: AtomicU64::new(SLAB_HEADER_LEN),
            sealed: AtomicBool::new(false),
            record_index: RwLock::new(FxHashMap::default()),
        })
    }

    /// Creates a new slab in `dir` via a temp file that is only renamed
    /// into place once its header is fully written and synced, so a
    /// concurrent directory scan (`SlabSet::open`) never observes a
    /// half-initialized slab file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] on disk failure.
    pub fn create_atomic(dir: &Path, slab_id: u64, capacity: u64) -> crate::Result<Self> {
        let creation_time = crate::time::unix_timestamp_millis();

        let mut header = Vec::with_capacity(SLAB_HEADER_LEN as usize);
        header.write_all(&SLAB_MAGIC)?;
        header.write_u8(SLAB_FORMAT_VERSION)?;
        header.write_u64::<LittleEndian>(slab_id)?;
        header.write_u64::<LittleEndian>(creation_time)?;
        header.write_u64::<LittleEndian>(capacity)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&header)?;
        tmp.as_file().sync_all()?;

        let final_path = dir.join(slab_file_name(slab_id));
        let file = tmp
            .persist(&final_path)
            .map_err(|e| crate::Error::Io(e.error))?;

        log::info!(
            "created slab {slab_id} at {} (capacity {capacity})",
            final_path.display()
        );

        #[cfg(unix)]
        let read_file = File::open(&final_path)?;

        Ok(Self {
            id: slab_id,
            path: final_path,
            capacity,
            write_file: Mutex::new(file),
            #[cfg(unix)]
            read_file,
            creation_time_millis: creation_time,
            watermark: AtomicU64::new(SLAB_HEADER_LEN),
            sealed: AtomicBool::new(false),
            record_index: RwLock::new(FxHashMap::default()),
        })
    }

    /// Opens an existing slab file, validates its header, and replays its
    /// records sequentially to rebuild the record index.
    ///
    /// A record whose header-crc32 fails to validate ends the scan: every
    /// byte from that offset onward is treated as unwritten, so a torn
    /// write from a crash mid-append is dropped rather than corrupting
    /// recovery.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Corruption`] if the slab header itself is
    /// invalid, and [`crate::Error::Io`] on disk failure.
    pub fn open(path: &Path) -> crate::Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut header = [0u8; SLAB_HEADER_LEN as usize];
        file.read_exact(&mut header)?;

        let mut cursor = std::io::Cursor::new(&header[..]);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if magic != SLAB_MAGIC {
            return Err(crate::Error::Corruption);
        }
        let format_version = cursor.read_u8()?;
        if format_version != SLAB_FORMAT_VERSION {
            return Err(crate::Error::Corruption);
        }
        let slab_id = cursor.read_u64::<LittleEndian>()?;
        let creation_time = cursor.read_u64::<LittleEndian>()?;
        let capacity = cursor.read_u64::<LittleEndian>()?;

        file.seek(SeekFrom::Start(SLAB_HEADER_LEN))?;
        let mut reader = BufReader::new(file.try_clone()?);

        let mut record_index = FxHashMap::default();
        let mut offset = SLAB_HEADER_LEN;

        loop {
            match Record::decode_from(&mut reader) {
                Ok(record) => {
                    let length = record.total_len() as u32;
                    record_index.insert(
                        offset,
                        RecordLocation {
                            block_id: record.block_id.clone(),
                            length,
                            uncompressed_length: record.uncompressed_length,
                            hash: record.hash,
                            generation: record.generation,
                            tombstone: record.tombstone,
                        },
                    );
                    offset += u64::from(length);
                }
                Err(crate::Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::trace!("slab {slab_id}: clean end of records at offset {offset}");
                    break;
                }
                Err(crate::Error::Corruption) => {
                    log::warn!(
                        "slab {slab_id}: corrupt record at offset {offset}, truncating recovery here"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        log::info!("opened slab {slab_id} at {} ({} live-or-dead records, watermark {offset})",
            path.display(), record_index.len());

        #[cfg(unix)]
        let read_file = File::open(path)?;

        Ok(Self {
            id: slab_id,
            path: path.to_path_buf(),
            capacity,
            write_file: Mutex::new(file),
            #[cfg(unix)]
            read_file,
            creation_time_millis: creation_time,
            watermark: AtomicU64::new(offset),
            sealed: AtomicBool::new(false),
            record_index: RwLock::new(record_index),
        })
    }

    /// Appends `record` at the current watermark.
    ///
    /// Returns [`AppendOutcome::Full`] without writing anything when the
    /// record would not fit before `capacity`; the caller must seal this
    /// slab and retry against a fresh one.
    ///
    /// The write is not durable until [`SlabFile::flush`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] on disk failure.
    pub fn append(&self, record: &Record) -> crate::Result<AppendOutcome> {
        let bytes = record.encode_to_vec();
        let len = bytes.len() as u64;

        let mut file = self.write_file.lock().expect("lock is poisoned");
        let current = self.watermark.load(Ordering::Acquire);

        if current + len > self.capacity {
            return Ok(AppendOutcome::Full);
        }

        file.seek(SeekFrom::Start(current))?;
        file.write_all(&bytes)?;

        self.watermark.store(current + len, Ordering::Release);
        self.record_index.write().expect("lock is poisoned").insert(
            current,
            RecordLocation {
                block_id: record.block_id.clone(),
                length: len as u32,
                uncompressed_length: record.uncompressed_length,
                hash: record.hash,
                generation: record.generation,
                tombstone: record.tombstone,
            },
        );

        log::trace!("slab {}: appended {len} bytes at offset {current}", self.id);

        Ok(AppendOutcome::Written(current))
    }

    /// Random-reads and decodes the record at `offset`/`length`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Corruption`] if the header-crc32 check
    /// fails, and [`crate::Error::Io`] on disk failure.
    pub fn read(&self, offset: u64, length: u32) -> crate::Result<Record> {
        let mut buf = vec![0u8; length as usize];

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.read_file.read_exact_at(&mut buf, offset)?;
        }

        #[cfg(not(unix))]
        {
            let mut file = self.write_file.lock().expect("lock is poisoned");
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)?;
        }

        let mut cursor = std::io::Cursor::new(buf);
        Record::decode_from(&mut cursor)
    }

    /// Forces outstanding writes to stable storage.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] on disk failure.
    pub fn flush(&self) -> crate::Result<()> {
        self.write_file
            .lock()
            .expect("lock is poisoned")
            .sync_data()
            .map_err(Into::into)
    }

    /// Marks the slab immutable. Idempotent.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn watermark(&self) -> u64 {
        self.watermark.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn created_at_millis(&self) -> u64 {
        self.creation_time_millis
    }

    #[must_use]
    pub fn is_full_for(&self, additional_len: u64) -> bool {
        self.watermark() + additional_len > self.capacity
    }

    /// Snapshot of every record this slab has ever held, live or dead, at
    /// the time of the call. `SlabSet`/`Engine` intersect this with the
    /// current block index to compute liveness and live-ratio.
    #[must_use]
    pub fn record_locations(&self) -> Vec<(u64, RecordLocation)> {
        self.record_index
            .read()
            .expect("lock is poisoned")
            .iter()
            .map(|(offset, loc)| (*offset, loc.clone()))
            .collect()
    }

    /// The live ratio of this slab: live payload bytes
    /// divided by the written watermark (excluding the header). Takes the
    /// sum of record lengths the caller has already determined to be live
    /// in this slab, since liveness is a property of the global block
    /// index, not of the slab alone.
    #[must_use]
    pub fn live_ratio(&self, live_bytes: u64) -> f64 {
        let data_bytes = self.watermark().saturating_sub(SLAB_HEADER_LEN);
        if data_bytes == 0 {
            0.0
        } else {
            (live_bytes as f64 / data_bytes as f64).clamp(0.0, 1.0)
        }
    }
}
