//! Length-prefixed framing over a byte stream.
//!
//! Every frame is a 4-byte big-endian length followed by exactly that many
//! payload bytes. Reads loop until the expected count has been accumulated,
//! so a transport that hands out one byte at a time is handled the same as
//! one that delivers the whole frame at once.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;

pub const HEADER_LEN: usize = 4;

/// Largest payload a frame header can describe.
pub const MAX_FRAME_LEN: usize = u32::MAX as usize;

/// Writes one frame and flushes the writer.
pub async fn send_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::FrameTooLarge {
        len: payload.len() as u64,
        limit: MAX_FRAME_LEN as u64,
    })?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;

    tracing::trace!(bytes = payload.len(), "frame sent");
    Ok(())
}

/// Reads one frame and returns its payload.
pub async fn recv_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    recv_frame_limited(reader, MAX_FRAME_LEN).await
}

/// Reads one frame, rejecting any header that declares more than `limit` bytes.
///
/// An oversized payload is left unread on the stream.
pub async fn recv_frame_limited<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let received = read_full(reader, &mut header).await?;
    if received < HEADER_LEN {
        return Err(FrameError::ConnectionClosed { received });
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > limit {
        return Err(FrameError::FrameTooLarge {
            len: len as u64,
            limit: limit as u64,
        });
    }

    let mut payload = vec![0u8; len];
    let received = read_full(reader, &mut payload).await?;
    if received < len {
        return Err(FrameError::TruncatedFrame {
            expected: len,
            received,
        });
    }

    tracing::trace!(bytes = len, "frame received");
    Ok(payload)
}

/// Fills `buf` from the reader, returning early with the byte count on EOF.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FrameError::Io(e)),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trip_small_payload() {
        let (mut client, mut server) = duplex(64);
        send_frame(&mut client, b"hello").await.unwrap();
        assert_eq!(recv_frame(&mut server).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn round_trip_empty_payload() {
        let (mut client, mut server) = duplex(64);
        send_frame(&mut client, &[]).await.unwrap();
        assert!(recv_frame(&mut server).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn header_is_big_endian_length() {
        let (mut client, mut server) = duplex(1024);
        send_frame(&mut client, &[7u8; 258]).await.unwrap();
        let mut header = [0u8; 4];
        server.read_exact(&mut header).await.unwrap();
        assert_eq!(header, [0, 0, 1, 2]);
    }

    #[tokio::test]
    async fn round_trip_multi_megabyte_payload() {
        let payload: Vec<u8> = (0..3 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        let (mut client, mut server) = duplex(8 * 1024);
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            send_frame(&mut client, &payload).await.unwrap();
        });
        let received = recv_frame(&mut server).await.unwrap();
        writer.await.unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn round_trip_with_one_byte_fragments() {
        // A one-byte pipe forces every write and read to move a single byte.
        let (mut client, mut server) = duplex(1);
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            send_frame(&mut client, &payload).await.unwrap();
            send_frame(&mut client, b"second").await.unwrap();
        });
        assert_eq!(recv_frame(&mut server).await.unwrap(), expected);
        assert_eq!(recv_frame(&mut server).await.unwrap(), b"second");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn closed_before_any_byte() {
        let (client, mut server) = duplex(64);
        drop(client);
        let err = recv_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed { received: 0 }));
    }

    #[tokio::test]
    async fn closed_inside_header() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[0, 0]).await.unwrap();
        drop(client);
        let err = recv_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed { received: 2 }));
    }

    #[tokio::test]
    async fn closed_after_header() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        drop(client);
        let err = recv_frame(&mut server).await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::TruncatedFrame { expected: 10, received: 0 }
        ));
    }

    #[tokio::test]
    async fn closed_mid_payload() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);
        let err = recv_frame(&mut server).await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::TruncatedFrame { expected: 10, received: 3 }
        ));
    }

    #[tokio::test]
    async fn limit_rejects_oversized_header() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&1000u32.to_be_bytes()).await.unwrap();
        let err = recv_frame_limited(&mut server, 999).await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::FrameTooLarge { len: 1000, limit: 999 }
        ));
    }
}
