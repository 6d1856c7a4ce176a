//! Storage node request/response messages.
//!
//! Request payload: `opcode u8 | block_id u64 | Option<payload>`.
//! Response payload: `status u8 | Option<payload>`.
//! A HEARTBEAT response carries the node's block list as `Vec<u64>`.

use bfs_types::status_code::StorageCode;
use bfs_types::{BlockId, Result, Status};
use bytes::Bytes;

use crate::wire::{WireDeserialize, WireError, WireSerialize};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Store = 1,
    Fetch = 2,
    Delete = 3,
    Heartbeat = 4,
}

impl TryFrom<u8> for Opcode {
    type Error = WireError;

    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        match v {
            1 => Ok(Self::Store),
            2 => Ok(Self::Fetch),
            3 => Ok(Self::Delete),
            4 => Ok(Self::Heartbeat),
            _ => Err(WireError::InvalidEnumVariant {
                enum_name: "Opcode",
                value: v as u64,
            }),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    Ok = 0,
    NotFound = 1,
    ChecksumFail = 2,
    Full = 3,
}

impl TryFrom<u8> for ResponseStatus {
    type Error = WireError;

    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Ok),
            1 => Ok(Self::NotFound),
            2 => Ok(Self::ChecksumFail),
            3 => Ok(Self::Full),
            _ => Err(WireError::InvalidEnumVariant {
                enum_name: "ResponseStatus",
                value: v as u64,
            }),
        }
    }
}

/// Bytes a STORE request adds around its payload:
/// opcode, block id, option tag and length prefix.
pub const STORE_REQUEST_OVERHEAD: usize = 1 + 8 + 1 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRequest {
    pub opcode: Opcode,
    pub block_id: BlockId,
    pub payload: Option<Bytes>,
}

impl NodeRequest {
    pub fn store(block_id: BlockId, payload: Bytes) -> Self {
        Self {
            opcode: Opcode::Store,
            block_id,
            payload: Some(payload),
        }
    }

    pub fn fetch(block_id: BlockId) -> Self {
        Self {
            opcode: Opcode::Fetch,
            block_id,
            payload: None,
        }
    }

    pub fn delete(block_id: BlockId) -> Self {
        Self {
            opcode: Opcode::Delete,
            block_id,
            payload: None,
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            opcode: Opcode::Heartbeat,
            block_id: BlockId(0),
            payload: None,
        }
    }
}

impl WireSerialize for NodeRequest {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> std::result::Result<(), WireError> {
        (self.opcode as u8).wire_serialize(buf)?;
        self.block_id.0.wire_serialize(buf)?;
        self.payload.wire_serialize(buf)
    }
}

impl WireDeserialize for NodeRequest {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> std::result::Result<Self, WireError> {
        let opcode = Opcode::try_from(u8::wire_deserialize(buf, offset)?)?;
        let block_id = BlockId(u64::wire_deserialize(buf, offset)?);
        let payload = Option::<Bytes>::wire_deserialize(buf, offset)?;
        Ok(Self {
            opcode,
            block_id,
            payload,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResponse {
    pub status: ResponseStatus,
    pub payload: Option<Bytes>,
}

impl NodeResponse {
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            payload: None,
        }
    }

    pub fn ok_with(payload: Bytes) -> Self {
        Self {
            status: ResponseStatus::Ok,
            payload: Some(payload),
        }
    }

    pub fn error(status: ResponseStatus) -> Self {
        Self {
            status,
            payload: None,
        }
    }

    pub fn block_list(ids: &[BlockId]) -> std::result::Result<Self, WireError> {
        let raw: Vec<u64> = ids.iter().map(|id| id.0).collect();
        Ok(Self::ok_with(Bytes::from(raw.to_wire_bytes()?)))
    }

    /// Convert a non-OK response into the matching storage status for
    /// `block_id`; OK yields the optional payload.
    pub fn into_result(self, block_id: BlockId) -> Result<Option<Bytes>> {
        let code = match self.status {
            ResponseStatus::Ok => return Ok(self.payload),
            ResponseStatus::NotFound => StorageCode::BLOCK_NOT_FOUND,
            ResponseStatus::ChecksumFail => StorageCode::CHECKSUM_MISMATCH,
            ResponseStatus::Full => StorageCode::NODE_FULL,
        };
        Err(Status::with_message(code, format!("block {}", block_id)))
    }

    /// Decode the block list carried by a HEARTBEAT response.
    pub fn decode_block_list(payload: &[u8]) -> std::result::Result<Vec<BlockId>, WireError> {
        let raw = Vec::<u64>::from_wire_bytes(payload)?;
        Ok(raw.into_iter().map(BlockId).collect())
    }
}

impl WireSerialize for NodeResponse {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> std::result::Result<(), WireError> {
        (self.status as u8).wire_serialize(buf)?;
        self.payload.wire_serialize(buf)
    }
}

impl WireDeserialize for NodeResponse {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> std::result::Result<Self, WireError> {
        let status = ResponseStatus::try_from(u8::wire_deserialize(buf, offset)?)?;
        let payload = Option::<Bytes>::wire_deserialize(buf, offset)?;
        Ok(Self { status, payload })
    }
}
