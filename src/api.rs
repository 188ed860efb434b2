// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Wire-shape DTOs shared by the HTTP and RPC surfaces.
//! These are not exercised by the engine itself; they're the
//! serde-derived shapes a front-end builds from [`crate::engine::Engine`]
//! calls.

use serde::{Deserialize, Serialize};

/// Options accompanying a write (`insert`/`upsert`/`append`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WriteOptions {
    pub content_type: Option<String>,
    /// Requests `lz4` compression; absent or `false` stores raw.
    #[serde(default)]
    pub compress: bool,
    /// Caller-asserted hex digest of the payload, checked against the
    /// computed one. Absent skips verification.
    pub hash: Option<String>,
    /// `hash-function` discriminant the caller's `hash` was computed
    /// with. Only `0` (MD5) is defined.
    pub hash_fun: Option<u8>,
}

/// A conditional-get request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GetRequest {
    pub block_id: String,
    /// If non-empty and equal to the stored hash, the engine answers
    /// `not_modified` without returning a payload.
    #[serde(default)]
    pub crc: String,
    #[serde(default)]
    pub allow_compressed: bool,
}

/// Metadata describing one block version.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Meta {
    /// Length of the uncompressed payload.
    pub size: u32,
    /// Hex-encoded content digest.
    pub crc: String,
    pub generation: u64,
    pub creation_time: u64,
}

/// Result of a read.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetResponse {
    pub block_id: String,
    pub payload: Vec<u8>,
    pub meta: Meta,
    /// `true` iff `payload` is stored compressed (`content-encoding: lz4`
    /// at the HTTP surface).
    #[serde(default)]
    pub compressed: bool,
    pub not_modified: bool,
}

/// Node-level health, always `"normal"` while the engine accepts
/// requests.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeStatus {
    pub status: String,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self {
            status: "normal".to_string(),
        }
    }
}

/// A point-in-time statistics snapshot for the whole engine.
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageStats {
    pub init_bytes: u64,
    pub active_slots: u64,
    pub gc_bytes: u64,
    pub move_bytes: u64,
    pub objects: u64,
    pub avail_bytes: u64,
}

/// `GET /status` response body.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    pub node: NodeStatus,
    pub storage: StorageStats,
}
