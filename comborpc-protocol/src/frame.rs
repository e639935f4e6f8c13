//! Length-prefixed frame format.
//!
//! Frame layout (8 bytes header + body):
//!
//! ```text
//! +------------------------+---------------------+
//! | body_len (u64, LE)     | body                |
//! | 8 bytes                | body_len bytes      |
//! +------------------------+---------------------+
//! ```
//!
//! The body is opaque at this layer. [`write_frame`] and [`read_frame`] work on any
//! tokio stream and loop until every byte is transferred; a stream that stops short
//! yields an explicit error instead of a truncated frame.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Maximum accepted frame body (64 MiB).
pub const MAX_FRAME_BODY: u64 = 64 * 1024 * 1024;

/// A single frame held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub body: Bytes,
}

impl Frame {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }

    /// Returns the length prefix for a body of `len` bytes.
    pub fn header(len: usize) -> [u8; FRAME_HEADER_SIZE] {
        (len as u64).to_le_bytes()
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let size = self.body.len() as u64;
        if size > MAX_FRAME_BODY {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: MAX_FRAME_BODY,
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.body.len());
        buf.put_u64_le(size);
        buf.put_slice(&self.body);
        Ok(buf)
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` if the declared length is too large.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
        let size = u64::from_le_bytes(header);
        if size > MAX_FRAME_BODY {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: MAX_FRAME_BODY,
            });
        }

        let total_len = FRAME_HEADER_SIZE + size as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let body = buf.split_to(size as usize).freeze();
        Ok(Some(Self { body }))
    }
}

/// Writes one frame (length prefix, then body) to `writer`.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let size = body.len() as u64;
    if size > MAX_FRAME_BODY {
        return Err(ProtocolError::FrameTooLarge {
            size,
            max: MAX_FRAME_BODY,
        });
    }

    write_fully(writer, &Frame::header(body.len())).await?;
    write_fully(writer, body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame from `reader` and returns its body.
pub async fn read_frame<R>(reader: &mut R) -> Result<Bytes, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    let read = read_fully(reader, &mut header).await?;
    if read == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }
    if read < FRAME_HEADER_SIZE {
        return Err(ProtocolError::ShortRead {
            expected: FRAME_HEADER_SIZE,
            read,
        });
    }

    let declared = u64::from_le_bytes(header);
    if declared > MAX_FRAME_BODY {
        return Err(ProtocolError::FrameTooLarge {
            size: declared,
            max: MAX_FRAME_BODY,
        });
    }

    let mut body = vec![0u8; declared as usize];
    let received = read_fully(reader, &mut body).await?;
    if received < body.len() {
        return Err(ProtocolError::BodyTruncated { declared, received });
    }

    Ok(Bytes::from(body))
}

async fn write_fully<W>(writer: &mut W, buf: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while written < buf.len() {
        let n = writer.write(&buf[written..]).await?;
        if n == 0 {
            return Err(ProtocolError::ShortWrite {
                expected: buf.len(),
                written,
            });
        }
        written += n;
    }
    Ok(())
}

/// Fills `buf` from `reader`, stopping early only at end of stream.
/// Returns the number of bytes read.
async fn read_fully<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::new(&b"hello"[..]);
        let mut buf = frame.encode().unwrap();

        assert_eq!(&buf[..FRAME_HEADER_SIZE], &5u64.to_le_bytes());

        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_frame() {
        let mut buf = BytesMut::from(&b"\x05\x00\x00"[..]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());

        let mut buf = BytesMut::from(&b"\x05\x00\x00\x00\x00\x00\x00\x00he"[..]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_frame_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u64_le(MAX_FRAME_BODY + 1);
        let result = Frame::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&Frame::new(&b"one"[..]).encode().unwrap());
        buf.extend_from_slice(&Frame::new(&b"two"[..]).encode().unwrap());

        let first = Frame::decode(&mut buf).unwrap().unwrap();
        let second = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.body.as_ref(), b"one");
        assert_eq!(second.body.as_ref(), b"two");
    }

    #[tokio::test]
    async fn test_stream_roundtrip_empty_body() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"").await.unwrap();
        assert_eq!(wire.len(), FRAME_HEADER_SIZE);

        let body = read_frame(&mut Cursor::new(wire)).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_read_short_header() {
        let mut reader = Cursor::new(vec![1u8, 0, 0]);
        let result = read_frame(&mut reader).await;
        assert!(matches!(
            result,
            Err(ProtocolError::ShortRead {
                expected: 8,
                read: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_read_truncated_body() {
        let mut wire = 10u64.to_le_bytes().to_vec();
        wire.extend_from_slice(b"abcd");
        let result = read_frame(&mut Cursor::new(wire)).await;
        assert!(matches!(
            result,
            Err(ProtocolError::BodyTruncated {
                declared: 10,
                received: 4
            })
        ));
    }

    #[tokio::test]
    async fn test_read_closed_stream() {
        let result = read_frame(&mut Cursor::new(Vec::new())).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_short_write_detected() {
        // A fixed-size buffer accepts 4 bytes and then reports zero-length writes.
        let mut storage = [0u8; 4];
        let mut writer = Cursor::new(&mut storage[..]);
        let result = write_frame(&mut writer, b"payload").await;
        assert!(matches!(
            result,
            Err(ProtocolError::ShortWrite {
                expected: 8,
                written: 4
            })
        ));
    }

    proptest! {
        #[test]
        fn prop_stream_roundtrip(body in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let decoded = rt.block_on(async {
                let mut wire = Vec::new();
                write_frame(&mut wire, &body).await.unwrap();
                read_frame(&mut Cursor::new(wire)).await.unwrap()
            });
            prop_assert_eq!(decoded.as_ref(), body.as_slice());
        }
    }
}
