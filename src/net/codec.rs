//! Frame codec for the bus wire protocol.
//!
//! Frame format:
//! ```text
//! ┌──────────┬──────────┬────────────────────────┐
//! │ len (4B) │ type(1B) │   encoded payload      │
//! │ u32 BE   │ u8       │                        │
//! └──────────┴──────────┴────────────────────────┘
//! ```
//! Length = sizeof(type byte) + sizeof(payload), NOT including the 4-byte prefix.

use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::types::{Error, Result};

/// Frame type: request from the peer.
pub const FRAME_REQUEST: u8 = 0x01;
/// Frame type: response to an earlier request.
pub const FRAME_RESPONSE: u8 = 0x02;
/// Frame type: event, no completion.
pub const FRAME_EVENT: u8 = 0x03;
/// Frame type: handshake.
pub const FRAME_HELLO: u8 = 0x04;
/// Frame type: error report.
pub const FRAME_ERROR: u8 = 0xFF;

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Default cap on a frame's type byte plus payload.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 5 * 1024 * 1024;

/// Split one complete frame off the front of `buf`.
///
/// Returns `(frame_type, payload)`, or `None` when `buf` does not yet hold a
/// whole frame. Oversized or empty frames are protocol errors; the buffer is
/// left untouched in that case since the stream cannot be resynchronized.
pub fn split_frame(buf: &mut BytesMut, max_frame_bytes: u32) -> Result<Option<(u8, Vec<u8>)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let frame_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if frame_len > max_frame_bytes {
        return Err(Error::protocol(format!(
            "frame too large: {} bytes",
            frame_len
        )));
    }
    if frame_len < 1 {
        return Err(Error::protocol("frame too short: missing type byte"));
    }
    let total = HEADER_LEN + frame_len as usize;
    if buf.len() < total {
        buf.reserve(total - buf.len());
        return Ok(None);
    }

    buf.advance(HEADER_LEN);
    let frame_type = buf.get_u8();
    let payload = buf.split_to(frame_len as usize - 1).to_vec();
    Ok(Some((frame_type, payload)))
}

/// Header and payload in one buffer, ready for a single `write_all`.
pub fn encode_frame(frame_type: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let frame_len = u32::try_from(payload.len() + 1)
        .map_err(|_| Error::protocol(format!("payload too large: {} bytes", payload.len())))?;
    let mut out = Vec::with_capacity(HEADER_LEN + frame_len as usize);
    out.extend_from_slice(&frame_len.to_be_bytes());
    out.push(frame_type);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Write an encoded frame with a timeout. A write that takes too long means a
/// slow consumer; the caller drops the connection.
pub async fn timed_write<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &[u8],
    timeout: Duration,
) -> Result<()> {
    let write = async {
        writer.write_all(frame).await?;
        writer.flush().await
    };
    match tokio::time::timeout(timeout, write).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            tracing::warn!("write timeout ({:?}), dropping connection", timeout);
            Err(Error::timeout(format!("frame write exceeded {:?}", timeout)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_input_waits() {
        let frame = encode_frame(FRAME_EVENT, b"hello").unwrap();
        let mut buf = BytesMut::from(&frame[..3]);
        assert!(split_frame(&mut buf, 1024).unwrap().is_none());

        buf.extend_from_slice(&frame[3..7]);
        assert!(split_frame(&mut buf, 1024).unwrap().is_none());

        buf.extend_from_slice(&frame[7..]);
        let (frame_type, payload) = split_frame(&mut buf, 1024).unwrap().unwrap();
        assert_eq!(frame_type, FRAME_EVENT);
        assert_eq!(payload, b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(FRAME_REQUEST, b"a").unwrap());
        buf.extend_from_slice(&encode_frame(FRAME_RESPONSE, b"bc").unwrap());

        let first = split_frame(&mut buf, 1024).unwrap().unwrap();
        let second = split_frame(&mut buf, 1024).unwrap().unwrap();
        assert_eq!(first, (FRAME_REQUEST, b"a".to_vec()));
        assert_eq!(second, (FRAME_RESPONSE, b"bc".to_vec()));
        assert!(split_frame(&mut buf, 1024).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&2048u32.to_be_bytes());
        let err = split_frame(&mut buf, 1024).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_empty_frame_rejected() {
        let mut buf = BytesMut::from(&0u32.to_be_bytes()[..]);
        assert!(split_frame(&mut buf, 1024).is_err());
    }

    #[tokio::test]
    async fn test_timed_write_delivers_bytes() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let frame = encode_frame(FRAME_HELLO, b"x").unwrap();
        timed_write(&mut client, &frame, Duration::from_secs(1))
            .await
            .unwrap();

        let mut received = vec![0u8; frame.len()];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut received)
            .await
            .unwrap();
        assert_eq!(received, frame);
    }

    #[tokio::test]
    async fn test_timed_write_times_out_on_full_pipe() {
        let (mut client, _server) = tokio::io::duplex(4);
        let frame = encode_frame(FRAME_EVENT, &[0u8; 64]).unwrap();
        let err = timed_write(&mut client, &frame, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
