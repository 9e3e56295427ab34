//! Length-prefixed JSON framing
//!
//! A frame is a 4-byte big-endian payload length followed by the JSON
//! encoding of one [`MessageTransport`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::protocol::MessageTransport;
use super::ProtocolError;

/// Largest accepted payload.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Encode one message into a complete frame.
pub fn encode_frame(message: &MessageTransport) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(message)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Take one complete frame off the front of `buf`, if present.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<MessageTransport>, ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    if buf.len() < HEADER_LEN + len {
        buf.reserve(HEADER_LEN + len - buf.len());
        return Ok(None);
    }
    buf.advance(HEADER_LEN);
    let payload = buf.split_to(len);
    let message: MessageTransport = serde_json::from_slice(&payload)?;
    message.validate()?;
    Ok(Some(message))
}

/// Read the next message. `Ok(None)` means the peer closed the stream
/// cleanly between frames.
pub async fn read_message<R>(reader: &mut R, buf: &mut BytesMut) -> Result<Option<MessageTransport>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(message) = decode_frame(buf)? {
            return Ok(Some(message));
        }
        if reader.read_buf(buf).await? == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(ProtocolError::TruncatedFrame(buf.len()));
        }
    }
}

pub async fn write_message<W>(writer: &mut W, message: &MessageTransport) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::{MessageBody, PingMessage, RpcMessage};

    fn ping(ns: i64) -> MessageTransport {
        MessageTransport::new(0, 1, ns, MessageBody::Ping(PingMessage { unix_time_ns: ns }))
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let frame = encode_frame(&ping(5)).unwrap();
        let mut buf = BytesMut::from(&frame[..frame.len() - 3]);
        assert_eq!(decode_frame(&mut buf).unwrap(), None);
        buf.extend_from_slice(&frame[frame.len() - 3..]);
        assert_eq!(decode_frame(&mut buf).unwrap(), Some(ping(5)));
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_LEN + 1) as u32);
        assert!(matches!(decode_frame(&mut buf), Err(ProtocolError::FrameTooLarge(_))));
    }

    #[test]
    fn garbage_payload_is_an_error() {
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.put_slice(b"{{{");
        assert!(matches!(decode_frame(&mut buf), Err(ProtocolError::Json(_))));
    }

    #[tokio::test]
    async fn reads_back_to_back_frames_from_a_stream() {
        let rpc = MessageTransport::new(
            100000,
            9,
            0,
            MessageBody::Rpc(RpcMessage {
                command: "respawn".into(),
            }),
        );
        let mut bytes = encode_frame(&ping(1)).unwrap().to_vec();
        bytes.extend_from_slice(&encode_frame(&rpc).unwrap());

        let mut reader = tokio_test::io::Builder::new()
            .read(&bytes[..6])
            .read(&bytes[6..])
            .build();
        let mut buf = BytesMut::new();
        assert_eq!(read_message(&mut reader, &mut buf).await.unwrap(), Some(ping(1)));
        assert_eq!(read_message(&mut reader, &mut buf).await.unwrap(), Some(rpc));
        assert_eq!(read_message(&mut reader, &mut buf).await.unwrap(), None);
    }

    #[tokio::test]
    async fn eof_mid_frame_is_truncation() {
        let bytes = encode_frame(&ping(1)).unwrap();
        let mut reader = tokio_test::io::Builder::new().read(&bytes[..10]).build();
        let mut buf = BytesMut::new();
        assert!(matches!(
            read_message(&mut reader, &mut buf).await,
            Err(ProtocolError::TruncatedFrame(10))
        ));
    }

    #[tokio::test]
    async fn writes_a_single_frame() {
        let expected = encode_frame(&ping(2)).unwrap();
        let mut writer = tokio_test::io::Builder::new().write(&expected).build();
        write_message(&mut writer, &ping(2)).await.unwrap();
    }
}
