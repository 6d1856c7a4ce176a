use thiserror::Error;

/// Errors from framing and transporting node messages.
#[derive(Debug, Error)]
pub enum NetError {
    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The frame checksum did not match the computed CRC32C.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// The frame header does not carry the message magic byte.
    #[error("invalid message magic (checksum low byte: {0:#04x})")]
    InvalidMagic(u8),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("wire error: {0}")]
    Wire(#[from] crate::wire::WireError),
}

impl NetError {
    /// Whether the error indicates the payload was damaged in flight rather
    /// than the peer being unreachable.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            NetError::ChecksumMismatch { .. } | NetError::InvalidMagic(_) | NetError::Wire(_)
        )
    }
}
