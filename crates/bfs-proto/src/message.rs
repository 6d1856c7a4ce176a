use crate::error::NetError;

/// Size of the message header in bytes.
pub const MESSAGE_HEADER_SIZE: usize = 8;

/// Magic number stored in the low byte of the header checksum.
pub const MESSAGE_MAGIC_NUM: u8 = 0x86;

/// Largest payload accepted on the wire (block size plus request envelope).
pub const MESSAGE_MAX_SIZE: usize = 256 * 1024 * 1024;

/// Header prepended to every framed message: a 4-byte checksum followed by
/// the 4-byte payload size, both little-endian.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub checksum: u32,
    pub size: u32,
}

impl MessageHeader {
    pub fn for_payload(payload: &[u8]) -> Self {
        Self {
            checksum: calc_message_checksum(payload),
            size: payload.len() as u32,
        }
    }

    pub fn has_magic(&self) -> bool {
        (self.checksum & 0xFF) as u8 == MESSAGE_MAGIC_NUM
    }

    pub fn from_bytes(data: &[u8; MESSAGE_HEADER_SIZE]) -> Self {
        let checksum = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let size = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        Self { checksum, size }
    }

    pub fn to_bytes(&self) -> [u8; MESSAGE_HEADER_SIZE] {
        let mut buf = [0u8; MESSAGE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.checksum.to_le_bytes());
        buf[4..8].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Check magic and size before the payload is read.
    pub fn validate_header(&self) -> Result<(), NetError> {
        if !self.has_magic() {
            return Err(NetError::InvalidMagic((self.checksum & 0xFF) as u8));
        }
        let size = self.size as usize;
        if size > MESSAGE_MAX_SIZE {
            return Err(NetError::MessageTooLarge {
                size,
                max: MESSAGE_MAX_SIZE,
            });
        }
        Ok(())
    }

    /// Check the payload against the header checksum.
    pub fn validate(&self, payload: &[u8]) -> Result<(), NetError> {
        self.validate_header()?;
        let expected = calc_message_checksum(payload);
        if self.checksum != expected {
            return Err(NetError::ChecksumMismatch {
                expected,
                actual: self.checksum,
            });
        }
        Ok(())
    }
}

/// CRC32C of `data` with the low byte replaced by the magic number.
pub fn calc_message_checksum(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    (crc & !0xff) | MESSAGE_MAGIC_NUM as u32
}
