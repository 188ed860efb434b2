// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The background compactor. A dedicated thread that periodically asks
//! the engine to compact one sealed slab, cooperatively stopping when
//! told to.

use crate::{engine::Engine, stop_signal::StopSignal};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A handle to a running background compactor. Dropping this does not stop
/// the thread; call [`CompactorHandle::stop`] explicitly.
pub struct CompactorHandle {
    stop_signal: StopSignal,
    thread: Option<JoinHandle<()>>,
}

impl CompactorHandle {
    /// Signals the compactor thread to stop after its current cycle and
    /// waits for it to exit.
    pub fn stop(&mut self) {
        self.stop_signal.send();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("compactor thread panicked");
            }
        }
    }
}

impl Drop for CompactorHandle {
    fn drop(&mut self) {
        self.stop_signal.send();
    }
}

/// Spawns a thread that calls [`Engine::compact_once`] every `interval`,
/// sleeping for the full interval whenever a cycle finds nothing to do.
///
/// The thread checks the stop signal both before and after sleeping, so a
/// call to [`CompactorHandle::stop`] is noticed within one sleep interval
/// rather than only between compaction cycles.
#[must_use]
pub fn spawn(engine: Arc<Engine>, interval: Duration) -> CompactorHandle {
    let stop_signal = StopSignal::default();
    let thread_stop_signal = stop_signal.clone();

    let thread = std::thread::Builder::new()
        .name("slab-engine-compactor".into())
        .spawn(move || run(&engine, &thread_stop_signal, interval))
        .expect("failed to spawn compactor thread");

    CompactorHandle {
        stop_signal,
        thread: Some(thread),
    }
}

fn run(engine: &Engine, stop_signal: &StopSignal, interval: Duration) {
    log::info!("compactor started, interval {interval:?}");

    while !stop_signal.is_stopped() {
        match engine.compact_once() {
            Ok(true) => log::debug!("compactor: migrated one slab"),
            Ok(false) => log::trace!("compactor: nothing eligible for compaction"),
            Err(e) => log::error!("compactor: cycle failed: {e}"),
        }

        if stop_signal.is_stopped() {
            break;
        }
        std::thread::sleep(interval);
    }

    log::info!("compactor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, engine::WriteOptions};
    use std::sync::Arc;
    use test_log::test;

    #[test]
    fn spawn_then_stop_does_not_hang() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).slab_capacity(1024 * 1024);
        let engine = Arc::new(Engine::open(config).unwrap());

        engine
            .insert(Some("a".to_string()), b"hello".to_vec(), WriteOptions::default())
            .unwrap();

        let mut handle = spawn(Arc::clone(&engine), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(30));
        handle.stop();

        assert!(engine.get("a", None, false).is_ok());
    }
}
