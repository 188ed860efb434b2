// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Errors that can occur while operating the engine.
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// No index entry exists for the given block-id
    NotFound,

    /// A write targeted a block-id that already has a live entry
    Exists,

    /// The caller-supplied hash did not match the computed digest
    HashMismatch,

    /// The `hash-function` discriminant is not a value this engine defines
    UnsupportedHash(u8),

    /// The compression tag is not one this engine defines
    UnsupportedCompression(u8),

    /// The record cannot fit inside a single slab regardless of which
    /// slab it is appended to
    TooLarge,

    /// No slab could be created to satisfy a write
    NoSpace,

    /// An on-disk record failed its header-crc32 or length check
    Corruption,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::NotFound => write!(f, "no such block"),
            Self::Exists => write!(f, "block already exists"),
            Self::HashMismatch => write!(f, "hash mismatch"),
            Self::UnsupportedHash(tag) => write!(f, "unsupported hash function tag: {tag}"),
            Self::UnsupportedCompression(tag) => {
                write!(f, "unsupported compression tag: {tag}")
            }
            Self::TooLarge => write!(f, "payload too large for a slab"),
            Self::NoSpace => write!(f, "no space: cannot create a new slab"),
            Self::Corruption => write!(f, "corrupt record"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<crate::coding::EncodeError> for Error {
    fn from(value: crate::coding::EncodeError) -> Self {
        match value {
            crate::coding::EncodeError::Io(e) => Self::Io(e),
        }
    }
}

/// Engine result type.
pub type Result<T> = std::result::Result<T, Error>;
