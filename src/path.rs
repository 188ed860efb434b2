// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::path::{Path, PathBuf};

/// Resolves `path` to an absolute path without requiring it to exist.
///
/// Relative paths are joined onto the process's current directory; already
/// absolute paths are returned unchanged.
#[allow(clippy::module_name_repetitions)]
pub fn absolute_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        #[allow(clippy::expect_used)]
        std::env::current_dir()
            .expect("should have a current directory")
            .join(path)
    }
}
