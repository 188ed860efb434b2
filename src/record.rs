// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! On-disk encoding of one block version.
//!
//! A record is a fixed-size header followed by three variable-length
//! blobs (block-id, content-type, payload). A record always holds
//! exactly one block version, so there is no item count or item loop.

use crate::{
    compression::CompressionType,
    hash::{Digest, HashFunction},
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

/// 4-byte record magic, checked on decode so a random file never gets
/// mistaken for a record stream.
pub const MAGIC: [u8; 4] = *b"SLB1";

/// Current on-disk record format version.
pub const RECORD_VERSION: u8 = 1;

/// Fixed size, in bytes, of everything in a record before the variable-length
/// block-id / content-type / payload tail.
pub const HEADER_LEN: usize = 4 // magic
    + 1 // record_version
    + 1 // flags (reserved)
    + 1 // hash_function
    + 1 // compression
    + 2 // block_id_length
    + 2 // content_type_length
    + 4 // payload_length (on-disk length)
    + 4 // uncompressed_length
    + 16 // hash
    + 8 // generation
    + 8 // creation_time (millis)
    + 1 // tombstone_flag
    + 4; // header_crc32

/// One block version, as laid out on disk.
#[derive(Clone, Debug)]
pub struct Record {
    pub block_id: String,
    pub content_type: String,
    /// On-disk payload bytes — compressed if `compression != None`.
    pub payload: Vec<u8>,
    pub hash_function: HashFunction,
    pub compression: CompressionType,
    pub uncompressed_length: u32,
    pub hash: Digest,
    pub generation: u64,
    pub creation_time_millis: u64,
    pub tombstone: bool,
}

impl Record {
    /// Total on-disk length of this record, header plus body. This is
    /// the quantity stored as `record_length`.
    #[must_use]
    pub fn total_len(&self) -> usize {
        HEADER_LEN + self.block_id.len() + self.content_type.len() + self.payload.len()
    }

    /// Serializes the record into `writer`.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from `writer`.
    pub fn encode_into<W: Write>(&self, writer: &mut W) -> crate::Result<()> {
        let mut header =
            crate::checksum::ChecksummedWriter::new(Vec::with_capacity(HEADER_LEN - 4));
        header.write_all(&MAGIC)?;
        header.write_u8(RECORD_VERSION)?;
        header.write_u8(0)?; // flags, reserved
        header.write_u8(match self.hash_function {
            HashFunction::Md5 => 0,
        })?;
        header.write_u8(match self.compression {
            CompressionType::None => 0,
            CompressionType::Lz4 => 1,
        })?;
        header.write_u16::<LittleEndian>(self.block_id.len() as u16)?;
        header.write_u16::<LittleEndian>(self.content_type.len() as u16)?;
        header.write_u32::<LittleEndian>(self.payload.len() as u32)?;
        header.write_u32::<LittleEndian>(self.uncompressed_length)?;
        header.write_all(&self.hash.0)?;
        header.write_u64::<LittleEndian>(self.generation)?;
        header.write_u64::<LittleEndian>(self.creation_time_millis)?;
        header.write_u8(u8::from(self.tombstone))?;

        let crc = header.checksum();
        let header_bytes = header.into_inner();

        writer.write_all(&header_bytes)?;
        writer.write_u32::<LittleEndian>(crc.into_u32())?;
        writer.write_all(self.block_id.as_bytes())?;
        writer.write_all(self.content_type.as_bytes())?;
        writer.write_all(&self.payload)?;

        Ok(())
    }

    /// Serializes the record into a freshly allocated buffer.
    #[must_use]
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.total_len());
        self.encode_into(&mut buf).expect("writing to a Vec cannot fail");
        buf
    }

    /// Deserializes a record from `reader`.
    ///
    /// A record whose header-crc32 does not validate is reported as
    /// [`crate::Error::Corruption`] — the caller (`SlabFile::open`) treats
    /// this as the end of the live stream, not as a reason to abort the
    /// whole slab.
    pub fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let mut header_buf = vec![0u8; HEADER_LEN - 4];
        reader.read_exact(&mut header_buf)?;

        let mut stored_crc_buf = [0u8; 4];
        reader.read_exact(&mut stored_crc_buf)?;
        let stored_crc = crate::checksum::Checksum::from_raw(u32::from_le_bytes(stored_crc_buf));

        let computed_crc = crate::checksum::Checksum::from_bytes(&header_buf);
        computed_crc.check(stored_crc)?;

        let mut cursor = Cursor::new(&header_buf);

        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(crate::Error::Corruption);
        }

        let record_version = cursor.read_u8()?;
        if record_version != RECORD_VERSION {
            return Err(crate::Error::Corruption);
        }

        let _flags = cursor.read_u8()?;

        let hash_function = match cursor.read_u8()? {
            0 => HashFunction::Md5,
            tag => return Err(crate::Error::UnsupportedHash(tag)),
        };

        let compression = match cursor.read_u8()? {
            0 => CompressionType::None,
            1 => CompressionType::Lz4,
            tag => return Err(crate::Error::UnsupportedCompression(tag)),
        };

        let block_id_length = cursor.read_u16::<LittleEndian>()? as usize;
        let content_type_length = cursor.read_u16::<LittleEndian>()? as usize;
        let payload_length = cursor.read_u32::<LittleEndian>()? as usize;
        let uncompressed_length = cursor.read_u32::<LittleEndian>()?;

        let mut hash_bytes = [0u8; 16];
        cursor.read_exact(&mut hash_bytes)?;

        let generation = cursor.read_u64::<LittleEndian>()?;
        let creation_time_millis = cursor.read_u64::<LittleEndian>()?;
        let tombstone = cursor.read_u8()? != 0;

        let mut block_id_bytes = vec![0u8; block_id_length];
        reader.read_exact(&mut block_id_bytes)?;
        let block_id = String::from_utf8(block_id_bytes).map_err(|_| crate::Error::Corruption)?;

        let mut content_type_bytes = vec![0u8; content_type_length];
        reader.read_exact(&mut content_type_bytes)?;
        let content_type =
            String::from_utf8(content_type_bytes).map_err(|_| crate::Error::Corruption)?;

        let mut payload = vec![0u8; payload_length];
        reader.read_exact(&mut payload)?;

        Ok(Self {
            block_id,
            content_type,
            payload,
            hash_function,
            compression,
            uncompressed_length,
            hash: Digest(hash_bytes),
            generation,
            creation_time_millis,
            tombstone,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash;
    use test_log::test;

    fn sample_record(payload: &[u8], generation: u64, tombstone: bool) -> Record {
        let digest = hash(payload, HashFunction::Md5);
        Record {
            block_id: "my-block".to_string(),
            content_type: "text/plain".to_string(),
            payload: payload.to_vec(),
            hash_function: HashFunction::Md5,
            compression: CompressionType::None,
            uncompressed_length: payload.len() as u32,
            hash: digest,
            generation,
            creation_time_millis: 1_700_000_000_000,
            tombstone,
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let record = sample_record(b"hello, slab", 1, false);
        let bytes = record.encode_to_vec();
        assert_eq!(bytes.len(), record.total_len());

        let mut cursor = Cursor::new(bytes);
        let decoded = Record::decode_from(&mut cursor).unwrap();

        assert_eq!(decoded.block_id, record.block_id);
        assert_eq!(decoded.content_type, record.content_type);
        assert_eq!(decoded.payload, record.payload);
        assert_eq!(decoded.generation, record.generation);
        assert_eq!(decoded.hash, record.hash);
        assert!(!decoded.tombstone);
    }

    #[test]
    fn tombstone_round_trips() {
        let record = sample_record(b"", 3, true);
        let bytes = record.encode_to_vec();
        let mut cursor = Cursor::new(bytes);
        let decoded = Record::decode_from(&mut cursor).unwrap();
        assert!(decoded.tombstone);
        assert_eq!(decoded.generation, 3);
    }

    #[test]
    fn corrupt_header_crc_is_reported() {
        let record = sample_record(b"payload bytes", 1, false);
        let mut bytes = record.encode_to_vec();
        // Flip a bit inside the header, leaving the stored crc untouched.
        bytes[10] ^= 0xFF;

        let mut cursor = Cursor::new(bytes);
        let err = Record::decode_from(&mut cursor).unwrap_err();
        assert!(matches!(err, crate::Error::Corruption));
    }

    #[test]
    fn truncated_tail_is_an_io_error_not_a_panic() {
        let record = sample_record(b"payload bytes", 1, false);
        let mut bytes = record.encode_to_vec();
        bytes.truncate(bytes.len() - 3);

        let mut cursor = Cursor::new(bytes);
        let err = Record::decode_from(&mut cursor);
        assert!(err.is_err());
    }
}
