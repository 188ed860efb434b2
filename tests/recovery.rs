// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use slab_engine::{Config, GetOutcome, WriteOptions};
use test_log::test;

#[test]
fn insert_then_restart_preserves_payload() -> slab_engine::Result<()> {
    let dir = tempfile::tempdir()?;

    {
        let engine = Config::new(dir.path()).open()?;
        engine.insert(Some("survivor".into()), b"durable bytes".to_vec(), WriteOptions::default())?;
    }

    let engine = Config::new(dir.path()).open()?;
    match engine.get("survivor", None, false)? {
        GetOutcome::Payload { payload, .. } => assert_eq!(payload, b"durable bytes"),
        GetOutcome::NotModified => panic!("expected payload"),
    }

    Ok(())
}

#[test]
fn reopen_after_upsert_returns_latest_generation() -> slab_engine::Result<()> {
    let dir = tempfile::tempdir()?;

    {
        let engine = Config::new(dir.path()).open()?;
        engine.upsert("k", b"v1".to_vec(), WriteOptions::default())?;
        engine.upsert("k", b"v2".to_vec(), WriteOptions::default())?;
        engine.upsert("k", b"v3".to_vec(), WriteOptions::default())?;
    }

    let engine = Config::new(dir.path()).open()?;
    match engine.get("k", None, false)? {
        GetOutcome::Payload { payload, meta, .. } => {
            assert_eq!(payload, b"v3");
            assert_eq!(meta.generation, 3);
        }
        GetOutcome::NotModified => panic!("expected payload"),
    }

    Ok(())
}

#[test]
fn reopen_after_delete_stays_deleted() -> slab_engine::Result<()> {
    let dir = tempfile::tempdir()?;

    {
        let engine = Config::new(dir.path()).open()?;
        engine.insert(Some("gone".into()), b"bye".to_vec(), WriteOptions::default())?;
        engine.delete("gone")?;
    }

    let engine = Config::new(dir.path()).open()?;
    let err = engine.get("gone", None, false).unwrap_err();
    assert!(matches!(err, slab_engine::Error::NotFound));

    Ok(())
}

#[test]
fn truncated_tail_record_is_dropped_but_earlier_data_survives() -> slab_engine::Result<()> {
    let dir = tempfile::tempdir()?;

    {
        let engine = Config::new(dir.path()).open()?;
        engine.insert(Some("a".into()), b"first".to_vec(), WriteOptions::default())?;
        engine.insert(Some("b".into()), b"second".to_vec(), WriteOptions::default())?;
    }

    // Simulate a crash mid-write: truncate the active slab file's tail.
    let mut slab_files: Vec<_> = std::fs::read_dir(dir.path())?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    slab_files.sort();
    let active_slab = slab_files.last().expect("one slab file should exist");
    let len = std::fs::metadata(active_slab)?.len();
    let file = std::fs::OpenOptions::new().write(true).open(active_slab)?;
    file.set_len(len - 3)?;
    drop(file);

    let engine = Config::new(dir.path()).open()?;
    match engine.get("a", None, false)? {
        GetOutcome::Payload { payload, .. } => assert_eq!(payload, b"first"),
        GetOutcome::NotModified => panic!("expected payload"),
    }
    let err = engine.get("b", None, false).unwrap_err();
    assert!(matches!(err, slab_engine::Error::NotFound));

    Ok(())
}
