// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Opens an engine in a temporary directory, writes and reads back a few
//! blocks, triggers an overwrite and a delete, then prints the resulting
//! statistics.

use slab_engine::{Config, GetOutcome, WriteOptions};

fn main() -> slab_engine::Result<()> {
    env_logger::init();

    let dir = tempfile::tempdir().expect("should create temp dir");
    let engine = Config::new(dir.path())
        .slab_capacity(8 * 1024 * 1024)
        .open()?;

    let greeting = engine.insert(
        Some("greeting".into()),
        b"hello, slab engine".to_vec(),
        WriteOptions::default(),
    )?;
    println!("inserted {} at generation {}", greeting.block_id, greeting.meta.generation);

    match engine.get("greeting", None, false)? {
        GetOutcome::Payload { payload, .. } => {
            println!("read back: {}", String::from_utf8_lossy(&payload));
        }
        GetOutcome::NotModified => unreachable!(),
    }

    let updated = engine.upsert(
        "greeting",
        b"hello again, slab engine".to_vec(),
        WriteOptions::default(),
    )?;
    println!("upserted to generation {}", updated.meta.generation);

    engine.insert(Some("scratch".into()), vec![0u8; 4096], WriteOptions::default())?;
    engine.delete("scratch")?;

    let stats = engine.stats();
    println!(
        "stats: objects={} active_slots={} avail_bytes={} gc_bytes={} move_bytes={}",
        stats.objects, stats.active_slots, stats.avail_bytes, stats.gc_bytes, stats.move_bytes
    );

    Ok(())
}
