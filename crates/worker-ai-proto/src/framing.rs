//! Length-prefixed message framing.
//!
//! Wire format: `uint32` little-endian length followed by `length` bytes.
//! Mirrors the framing used throughout the edge-agent protocol: a fixed
//! header read via `read_exact`, then the payload, with end-of-stream
//! during either read treated as a clean connection close rather than
//! an error.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default cap on a single framed message, matching the edge-agent's
/// default frame budget.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("frame length {0} exceeds max_frame_bytes ({1})")]
    TooLarge(u32, u32),
    #[error("frame length must be nonzero")]
    ZeroLength,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads length-prefixed frames from an async stream.
pub struct FrameReader<R> {
    inner: R,
    max_frame_bytes: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_bytes: u32) -> Self {
        Self {
            inner,
            max_frame_bytes,
        }
    }

    /// Reads one frame. Returns `Ok(None)` when the stream closed cleanly
    /// (no bytes, or a partial read truncated by end-of-stream).
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        let mut len_buf = [0u8; 4];
        match read_exact_or_eof(&mut self.inner, &mut len_buf).await? {
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Partial => return Ok(None),
            ReadOutcome::Full => {}
        }

        let length = u32::from_le_bytes(len_buf);
        if length == 0 {
            return Err(FramingError::ZeroLength);
        }
        if length > self.max_frame_bytes {
            return Err(FramingError::TooLarge(length, self.max_frame_bytes));
        }

        let mut payload = vec![0u8; length as usize];
        match read_exact_or_eof(&mut self.inner, &mut payload).await? {
            ReadOutcome::Eof | ReadOutcome::Partial => Ok(None),
            ReadOutcome::Full => Ok(Some(payload)),
        }
    }
}

enum ReadOutcome {
    Full,
    /// Zero bytes were read before hitting EOF.
    Eof,
    /// Some, but not all, bytes were read before hitting EOF.
    Partial,
}

async fn read_exact_or_eof<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<ReadOutcome, std::io::Error> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Ok(if filled == 0 {
                ReadOutcome::Eof
            } else {
                ReadOutcome::Partial
            });
        }
        filled += n;
    }
    Ok(ReadOutcome::Full)
}

/// Writes length-prefixed frames to an async stream.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_frame(&mut self, data: &[u8]) -> Result<(), FramingError> {
        let len = u32::try_from(data.len()).map_err(|_| FramingError::TooLarge(u32::MAX, u32::MAX))?;
        self.inner.write_all(&len.to_le_bytes()).await?;
        self.inner.write_all(data).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let mut buf = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buf);
            writer.write_frame(b"hello").await.unwrap();
        }
        let mut reader = FrameReader::new(buf.as_slice(), DEFAULT_MAX_FRAME_BYTES);
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn clean_eof_on_empty_stream() {
        let mut reader = FrameReader::new(&[][..], DEFAULT_MAX_FRAME_BYTES);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clean_eof_on_truncated_header() {
        let mut reader = FrameReader::new(&[1u8, 2][..], DEFAULT_MAX_FRAME_BYTES);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clean_eof_on_truncated_payload() {
        // Declares a 10-byte payload but only 3 bytes follow.
        let mut data = 10u32.to_le_bytes().to_vec();
        data.extend_from_slice(&[1, 2, 3]);
        let mut reader = FrameReader::new(data.as_slice(), DEFAULT_MAX_FRAME_BYTES);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_zero_length() {
        let mut reader = FrameReader::new(&0u32.to_le_bytes()[..], DEFAULT_MAX_FRAME_BYTES);
        assert!(matches!(
            reader.read_frame().await,
            Err(FramingError::ZeroLength)
        ));
    }

    #[tokio::test]
    async fn rejects_oversized_length() {
        let mut reader = FrameReader::new(&100u32.to_le_bytes()[..], 10);
        assert!(matches!(
            reader.read_frame().await,
            Err(FramingError::TooLarge(100, 10))
        ));
    }

    #[tokio::test]
    async fn round_trip_many_frames_preserves_order() {
        let payloads: Vec<Vec<u8>> = (0u8..20).map(|i| vec![i; (i as usize) + 1]).collect();
        let mut buf = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buf);
            for p in &payloads {
                writer.write_frame(p).await.unwrap();
            }
        }
        let mut reader = FrameReader::new(buf.as_slice(), DEFAULT_MAX_FRAME_BYTES);
        for expected in &payloads {
            let got = reader.read_frame().await.unwrap().unwrap();
            assert_eq!(&got, expected);
        }
        assert!(reader.read_frame().await.unwrap().is_none());
    }
}
