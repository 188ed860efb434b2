// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Content-integrity hashing. MD5 is the only currently
//! defined `hash-function`; the tagged-discriminant encode/decode shape
//! follows `compression.rs`'s `CompressionType`.

use crate::coding::{Decode, Encode, EncodeError};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// A 128-bit content digest.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Digest(pub [u8; 16]);

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({})", hex::encode(self.0))
    }
}

impl Digest {
    /// Hex-encodes the digest, the form used as an ETag.
    #[must_use]
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hex-encoded digest, e.g. from the `v-hash` header.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let array: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(array))
    }
}

/// The `hash-function` discriminant stored in a record header.
///
/// Only `Md5 = 0` is defined; other values are reserved but undefined
/// and are rejected with [`crate::Error::UnsupportedHash`] rather than
/// silently treated as MD5.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HashFunction {
    /// MD5, the only defined hash function.
    Md5,
}

impl Encode for HashFunction {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u8(match self {
            Self::Md5 => 0,
        })?;
        Ok(())
    }
}

impl Decode for HashFunction {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, crate::Error> {
        match reader.read_u8()? {
            0 => Ok(Self::Md5),
            tag => Err(crate::Error::UnsupportedHash(tag)),
        }
    }
}

impl HashFunction {
    /// Resolves a caller-supplied `hash-function` discriminant, the same
    /// tag space [`Decode`] reads off disk.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnsupportedHash`] if `tag` is not `0`.
    pub fn from_tag(tag: u8) -> Result<Self, crate::Error> {
        match tag {
            0 => Ok(Self::Md5),
            tag => Err(crate::Error::UnsupportedHash(tag)),
        }
    }
}

/// Computes the digest of `bytes` under `fun`.
#[must_use]
pub fn hash(bytes: &[u8], fun: HashFunction) -> Digest {
    match fun {
        HashFunction::Md5 => Digest(md5::compute(bytes).0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn md5_matches_known_vector() {
        // "test" -> 098f6bcd4621d373cade4e832627b4f6, a known MD5 vector.
        let digest = hash(b"test", HashFunction::Md5);
        assert_eq!(digest.to_hex(), "098f6bcd4621d373cade4e832627b4f6");
    }

    #[test]
    fn hex_round_trip() {
        let digest = hash(b"round trip me", HashFunction::Md5);
        let hex = digest.to_hex();
        let parsed = Digest::from_hex(&hex).unwrap();
        assert_eq!(digest, parsed);
    }

    #[test]
    fn hash_function_tag_round_trip() {
        let encoded = HashFunction::Md5.encode_into_vec();
        let mut cursor = std::io::Cursor::new(encoded);
        let decoded = HashFunction::decode_from(&mut cursor).unwrap();
        assert_eq!(decoded, HashFunction::Md5);
    }

    #[test]
    fn unsupported_hash_function_tag_is_rejected() {
        let mut cursor = std::io::Cursor::new(vec![7u8]);
        let err = HashFunction::decode_from(&mut cursor).unwrap_err();
        assert!(matches!(err, crate::Error::UnsupportedHash(7)));
    }

    #[test]
    fn from_tag_accepts_only_zero() {
        assert_eq!(HashFunction::from_tag(0).unwrap(), HashFunction::Md5);
        let err = HashFunction::from_tag(3).unwrap_err();
        assert!(matches!(err, crate::Error::UnsupportedHash(3)));
    }
}
