// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A single-node block storage engine: an append-only slab allocator, an
//! in-memory block index, and a background compactor.
//!
//! ##### About
//!
//! Blocks are opaque, immutable byte payloads addressed by a caller- or
//! engine-generated block-id. A block is written once and every later
//! `upsert`/`append` produces a new generation, not an in-place mutation:
//! the previous generation's bytes remain on disk, readable, until a
//! background compactor reclaims the slab holding them.
//!
//! Writes always go to the currently active slab. Once a slab reaches
//! its capacity, it is sealed and a fresh slab becomes active; sealed
//! slabs are immutable and are only ever read from or retired by
//! compaction.
//!
//! # Example usage
//!
//! ```
//! use slab_engine::{Config, WriteOptions};
//! #
//! # let folder = tempfile::tempdir()?;
//!
//! let engine = Config::new(folder.path()).open()?;
//!
//! let result = engine.insert(
//!     Some("my-block".into()),
//!     b"my payload".to_vec(),
//!     WriteOptions::default(),
//! )?;
//!
//! match engine.get(&result.block_id, None, false)? {
//!     slab_engine::GetOutcome::Payload { payload, .. } => {
//!         assert_eq!(payload, b"my payload");
//!     }
//!     slab_engine::GetOutcome::NotModified => unreachable!(),
//! }
//!
//! engine.delete(&result.block_id)?;
//! #
//! # Ok::<(), slab_engine::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

pub mod api;
mod checksum;
mod coding;
pub mod compaction;
pub mod config;
mod compression;
pub mod engine;
mod error;
mod hash;
mod index;
mod metrics;
mod path;
mod record;
mod slab;
mod slab_set;
mod stop_signal;
mod time;

pub use {
    api::{GetRequest, GetResponse, Meta, NodeStatus, StatusResponse, StorageStats},
    compaction::{spawn as spawn_compactor, CompactorHandle},
    compression::CompressionType,
    config::Config,
    engine::{Engine, GetOutcome, WriteOptions, WriteResult},
    error::{Error, Result},
    hash::{Digest, HashFunction},
};
