use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("insufficient data: need {need} bytes but only {have} remain")]
    InsufficientData { need: usize, have: usize },
    #[error("invalid enum variant for {enum_name}: {value}")]
    InvalidEnumVariant {
        enum_name: &'static str,
        value: u64,
    },
    #[error("data too large: {size} bytes")]
    DataTooLarge { size: usize },
    #[error("{extra} trailing bytes after message")]
    TrailingBytes { extra: usize },
}

pub trait WireSerialize {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError>;

    fn to_wire_bytes(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = Vec::new();
        self.wire_serialize(&mut buf)?;
        Ok(buf)
    }
}

pub trait WireDeserialize: Sized {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError>;

    /// Decode a whole buffer, rejecting trailing garbage.
    fn from_wire_bytes(buf: &[u8]) -> Result<Self, WireError> {
        let mut offset = 0;
        let value = Self::wire_deserialize(buf, &mut offset)?;
        if offset != buf.len() {
            return Err(WireError::TrailingBytes {
                extra: buf.len() - offset,
            });
        }
        Ok(value)
    }
}

pub(crate) fn read_bytes<'a>(
    buf: &'a [u8],
    offset: &mut usize,
    n: usize,
) -> Result<&'a [u8], WireError> {
    let have = buf.len().saturating_sub(*offset);
    if have < n {
        return Err(WireError::InsufficientData { need: n, have });
    }
    let slice = &buf[*offset..*offset + n];
    *offset += n;
    Ok(slice)
}

macro_rules! impl_wire_for_int {
    ($ty:ty, $size:expr, $read:ident, $write:ident) => {
        impl WireSerialize for $ty {
            fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
                let mut tmp = [0u8; $size];
                LittleEndian::$write(&mut tmp, *self);
                buf.extend_from_slice(&tmp);
                Ok(())
            }
        }

        impl WireDeserialize for $ty {
            fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
                let bytes = read_bytes(buf, offset, $size)?;
                Ok(LittleEndian::$read(bytes))
            }
        }
    };
}

impl_wire_for_int!(u16, 2, read_u16, write_u16);
impl_wire_for_int!(u32, 4, read_u32, write_u32);
impl_wire_for_int!(u64, 8, read_u64, write_u64);

impl WireSerialize for u8 {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        buf.push(*self);
        Ok(())
    }
}

impl WireDeserialize for u8 {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        Ok(read_bytes(buf, offset, 1)?[0])
    }
}

impl WireSerialize for bool {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        buf.push(u8::from(*self));
        Ok(())
    }
}

impl WireDeserialize for bool {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        Ok(u8::wire_deserialize(buf, offset)? != 0)
    }
}

// Length-prefixed (u32) raw bytes.
impl WireSerialize for Bytes {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        let len = u32::try_from(self.len())
            .map_err(|_| WireError::DataTooLarge { size: self.len() })?;
        len.wire_serialize(buf)?;
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl WireDeserialize for Bytes {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let len = u32::wire_deserialize(buf, offset)? as usize;
        let bytes = read_bytes(buf, offset, len)?;
        Ok(Bytes::copy_from_slice(bytes))
    }
}

// Presence flag followed by the value.
impl<T: WireSerialize> WireSerialize for Option<T> {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        match self {
            Some(v) => {
                true.wire_serialize(buf)?;
                v.wire_serialize(buf)
            }
            None => false.wire_serialize(buf),
        }
    }
}

impl<T: WireDeserialize> WireDeserialize for Option<T> {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        if bool::wire_deserialize(buf, offset)? {
            Ok(Some(T::wire_deserialize(buf, offset)?))
        } else {
            Ok(None)
        }
    }
}

// u32 element count followed by the elements.
impl<T: WireSerialize> WireSerialize for Vec<T> {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        let len = u32::try_from(self.len())
            .map_err(|_| WireError::DataTooLarge { size: self.len() })?;
        len.wire_serialize(buf)?;
        for item in self {
            item.wire_serialize(buf)?;
        }
        Ok(())
    }
}

impl<T: WireDeserialize> WireDeserialize for Vec<T> {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let len = u32::wire_deserialize(buf, offset)? as usize;
        // Cap the pre-allocation by what the buffer could possibly hold.
        let mut out = Vec::with_capacity(len.min(buf.len().saturating_sub(*offset)));
        for _ in 0..len {
            out.push(T::wire_deserialize(buf, offset)?);
        }
        Ok(out)
    }
}
