//! Wire formats shared by the storage nodes and the client.
//!
//! - [`wire`]: little-endian field encoding (`WireSerialize`/`WireDeserialize`).
//! - [`message`]: the 8-byte CRC32C message header that frames every message.
//! - [`frame`]: async helpers that read/write framed messages on a byte stream.
//! - [`node`]: the STORE/FETCH/DELETE/HEARTBEAT request and response types.
//! - [`block_codec`]: splitting files into blocks and the checksummed block frame.

pub mod block_codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod node;
pub mod wire;

pub use block_codec::{BlockCodec, EncodedBlock, BLOCK_HEADER_SIZE, MAX_BLOCK_DATA_SIZE};
pub use error::NetError;
pub use frame::{read_frame, read_message, write_frame, write_message};
pub use message::{MessageHeader, MESSAGE_HEADER_SIZE, MESSAGE_MAX_SIZE};
pub use node::{NodeRequest, NodeResponse, Opcode, ResponseStatus, STORE_REQUEST_OVERHEAD};
pub use wire::{WireDeserialize, WireError, WireSerialize};
