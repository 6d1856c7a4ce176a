//! Splitting file contents into fixed-size blocks and framing each block
//! with a CRC32C checksum.
//!
//! Block frame layout (little-endian):
//!
//! ```text
//! +--------+---------+-----------+----------------+
//! | "BFB1" | len u32 | crc32c u32 | data (len bytes) |
//! +--------+---------+-----------+----------------+
//! ```
//!
//! The same checksum is recorded in the namespace so a reader can verify a
//! replica without trusting the node that served it.

use bfs_types::status_code::{StatusCode, StorageCode};
use bfs_types::{make_error_msg, Result};
use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};

use crate::message::MESSAGE_MAX_SIZE;
use crate::node::STORE_REQUEST_OVERHEAD;

pub const BLOCK_MAGIC: &[u8; 4] = b"BFB1";
pub const BLOCK_HEADER_SIZE: usize = 12;

/// Largest block data that still fits a STORE request inside one message.
pub const MAX_BLOCK_DATA_SIZE: usize =
    MESSAGE_MAX_SIZE - BLOCK_HEADER_SIZE - STORE_REQUEST_OVERHEAD;

/// A block ready to be shipped to storage nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBlock {
    pub checksum: u32,
    pub payload: Bytes,
}

impl EncodedBlock {
    /// Length of the block data, excluding the frame header.
    pub fn data_len(&self) -> usize {
        self.payload.len().saturating_sub(BLOCK_HEADER_SIZE)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BlockCodec {
    block_size: usize,
}

impl BlockCodec {
    /// `block_size` must be non-zero; policy validation enforces that upstream.
    pub fn new(block_size: u64) -> Self {
        Self {
            block_size: (block_size as usize).max(1),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Split `data` into `block_size` slices. Only the last one may be
    /// shorter; empty input yields no blocks.
    pub fn split(&self, data: &Bytes) -> Vec<Bytes> {
        let mut blocks = Vec::with_capacity(data.len().div_ceil(self.block_size));
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + self.block_size).min(data.len());
            blocks.push(data.slice(offset..end));
            offset = end;
        }
        blocks
    }

    pub fn checksum(data: &[u8]) -> u32 {
        crc32c::crc32c(data)
    }

    /// Frame `data`; blocks larger than [`MAX_BLOCK_DATA_SIZE`] are rejected
    /// since no node could accept them.
    pub fn encode(data: &[u8]) -> Result<EncodedBlock> {
        if data.len() > MAX_BLOCK_DATA_SIZE {
            return make_error_msg(
                StatusCode::INVALID_ARG,
                format!(
                    "block of {} bytes exceeds limit {}",
                    data.len(),
                    MAX_BLOCK_DATA_SIZE
                ),
            );
        }
        let checksum = Self::checksum(data);
        let mut buf = BytesMut::with_capacity(BLOCK_HEADER_SIZE + data.len());
        buf.put_slice(BLOCK_MAGIC);
        buf.put_u32_le(data.len() as u32);
        buf.put_u32_le(checksum);
        buf.put_slice(data);
        Ok(EncodedBlock {
            checksum,
            payload: buf.freeze(),
        })
    }

    /// Parse a block frame and return its data after verifying the embedded
    /// checksum.
    pub fn decode(payload: &Bytes) -> Result<Bytes> {
        let (len, checksum) = Self::parse_header(payload)?;
        let data = payload.slice(BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + len);
        let actual = Self::checksum(&data);
        if actual != checksum {
            return make_error_msg(
                StorageCode::CHECKSUM_MISMATCH,
                format!("block frame crc {:#010x} != {:#010x}", actual, checksum),
            );
        }
        Ok(data)
    }

    /// Decode and additionally check the checksum recorded at write time.
    pub fn verify(payload: &Bytes, expected_checksum: u32) -> Result<Bytes> {
        let data = Self::decode(payload)?;
        let actual = Self::checksum(&data);
        if actual != expected_checksum {
            return make_error_msg(
                StorageCode::CHECKSUM_MISMATCH,
                format!(
                    "block crc {:#010x} != recorded {:#010x}",
                    actual, expected_checksum
                ),
            );
        }
        Ok(data)
    }

    fn parse_header(payload: &[u8]) -> Result<(usize, u32)> {
        if payload.len() < BLOCK_HEADER_SIZE || &payload[..4] != BLOCK_MAGIC {
            return make_error_msg(StorageCode::CHECKSUM_MISMATCH, "malformed block frame");
        }
        let len = LittleEndian::read_u32(&payload[4..8]) as usize;
        let checksum = LittleEndian::read_u32(&payload[8..12]);
        if payload.len() - BLOCK_HEADER_SIZE != len {
            return make_error_msg(
                StorageCode::CHECKSUM_MISMATCH,
                format!(
                    "block frame length {} != header {}",
                    payload.len() - BLOCK_HEADER_SIZE,
                    len
                ),
            );
        }
        Ok((len, checksum))
    }
}
