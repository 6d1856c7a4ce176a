//! Reading and writing framed messages on an ordered byte stream.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NetError;
use crate::message::{MessageHeader, MESSAGE_HEADER_SIZE, MESSAGE_MAX_SIZE};
use crate::wire::{WireDeserialize, WireSerialize};

/// Write `payload` prefixed with its header and flush.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MESSAGE_MAX_SIZE {
        return Err(NetError::MessageTooLarge {
            size: payload.len(),
            max: MESSAGE_MAX_SIZE,
        });
    }
    let header = MessageHeader::for_payload(payload);
    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and return its verified payload.
///
/// A clean EOF before any header byte yields [`NetError::ConnectionClosed`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Bytes, NetError>
where
    R: AsyncRead + Unpin,
{
    let mut header_bytes = [0u8; MESSAGE_HEADER_SIZE];
    match reader.read_exact(&mut header_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(NetError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }
    let header = MessageHeader::from_bytes(&header_bytes);
    header.validate_header()?;

    let mut payload = vec![0u8; header.size as usize];
    reader.read_exact(&mut payload).await?;
    header.validate(&payload)?;
    Ok(Bytes::from(payload))
}

pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
    T: WireSerialize,
{
    let payload = msg.to_wire_bytes()?;
    write_frame(writer, &payload).await
}

pub async fn read_message<R, T>(reader: &mut R) -> Result<T, NetError>
where
    R: AsyncRead + Unpin,
    T: WireDeserialize,
{
    let payload = read_frame(reader).await?;
    Ok(T::from_wire_bytes(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, b"hello block").await.unwrap();
        write_frame(&mut a, b"").await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), Bytes::from_static(b"hello block"));
        assert!(read_frame(&mut b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_large_frame_split_across_reads() {
        // Duplex buffer is far smaller than the payload, forcing partial reads.
        let (mut a, mut b) = tokio::io::duplex(64);
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move { write_frame(&mut a, &payload).await });
        let got = read_frame(&mut b).await.unwrap();
        writer.await.unwrap().unwrap();
        assert_eq!(got.as_ref(), expected.as_slice());
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(matches!(read_frame(&mut b).await, Err(NetError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_corrupted_payload_detected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let payload = b"payload";
        let header = MessageHeader::for_payload(payload);
        a.write_all(&header.to_bytes()).await.unwrap();
        a.write_all(b"paYload").await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(NetError::ChecksumMismatch { .. })
        ));
    }
}
