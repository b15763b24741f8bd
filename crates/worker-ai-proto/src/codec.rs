//! Encode/decode envelopes over a framed stream, validating the wire
//! invariants: supported protocol version, `msg_type`/variant agreement,
//! and a cached `stream_id` once the peer has announced one.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::envelope::{Envelope, MsgType, Payload, PROTOCOL_VERSION};
use crate::error::ProtoError;
use crate::framing::{FrameReader, FrameWriter, DEFAULT_MAX_FRAME_BYTES};

/// Stateful codec bound to one connection: remembers the `stream_id`
/// carried by the first envelope it decodes, and stamps it on every
/// envelope it encodes afterward.
pub struct Codec<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    stream_id: Option<String>,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Codec<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_max_frame_bytes(reader, writer, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(reader: R, writer: W, max_frame_bytes: u32) -> Self {
        Self {
            reader: FrameReader::new(reader, max_frame_bytes),
            writer: FrameWriter::new(writer),
            stream_id: None,
        }
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    /// Reads and validates the next envelope. Returns `Ok(None)` on a
    /// clean connection close.
    pub async fn recv(&mut self) -> Result<Option<Envelope>, ProtoError> {
        let Some(bytes) = self.reader.read_frame().await? else {
            return Ok(None);
        };
        let envelope: Envelope = bincode::deserialize(&bytes)?;

        if envelope.protocol_version != PROTOCOL_VERSION {
            return Err(ProtoError::VersionUnsupported(envelope.protocol_version));
        }
        if !envelope.variant_matches_type() {
            return Err(ProtoError::BadMessage);
        }

        if self.stream_id.is_none() {
            debug!(stream_id = %envelope.stream_id, "caching stream_id from first envelope");
            self.stream_id = Some(envelope.stream_id.clone());
        }

        Ok(Some(envelope))
    }

    /// Encodes and sends `payload`, stamping the current protocol
    /// version, cached `stream_id`, and a `msg_type` matching `payload`.
    pub async fn send(&mut self, msg_type: MsgType, payload: Payload) -> Result<(), ProtoError> {
        let stream_id = self.stream_id.clone().unwrap_or_default();
        let envelope = Envelope::new(stream_id, msg_type, payload);
        let bytes = bincode::serialize(&envelope)?;
        self.writer.write_frame(&bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Request;
    use tokio::io::duplex;

    #[tokio::test]
    async fn caches_stream_id_from_first_envelope() {
        let (client, server) = duplex(4096);
        let (_client_r, mut client_w) = tokio::io::split(client);
        let (server_r, server_w) = tokio::io::split(server);

        let envelope = Envelope::new("abc-123", MsgType::End, Payload::Req(Request::End));
        let raw = bincode::serialize(&envelope).unwrap();
        let mut writer = FrameWriter::new(&mut client_w);
        writer.write_frame(&raw).await.unwrap();

        let mut server_codec = Codec::new(server_r, server_w);
        let received = server_codec.recv().await.unwrap().unwrap();
        assert_eq!(received.stream_id, "abc-123");
        assert_eq!(server_codec.stream_id(), Some("abc-123"));
    }

    #[tokio::test]
    async fn rejects_bad_protocol_version() {
        let (client, server) = duplex(4096);
        let (_client_r, mut client_w) = tokio::io::split(client);
        let (server_r, server_w) = tokio::io::split(server);

        let mut bad = Envelope::new("s", MsgType::End, Payload::Req(Request::End));
        bad.protocol_version = 99;
        let raw = bincode::serialize(&bad).unwrap();
        let mut writer = FrameWriter::new(&mut client_w);
        writer.write_frame(&raw).await.unwrap();

        let mut server_codec = Codec::new(server_r, server_w);
        let err = server_codec.recv().await.unwrap_err();
        assert!(matches!(err, ProtoError::VersionUnsupported(99)));
    }

    #[tokio::test]
    async fn rejects_variant_mismatch() {
        let (client, server) = duplex(4096);
        let (_client_r, mut client_w) = tokio::io::split(client);
        let (server_r, server_w) = tokio::io::split(server);

        let bad = Envelope::new("s", MsgType::Frame, Payload::Req(Request::End));
        let raw = bincode::serialize(&bad).unwrap();
        let mut writer = FrameWriter::new(&mut client_w);
        writer.write_frame(&raw).await.unwrap();

        let mut server_codec = Codec::new(server_r, server_w);
        let err = server_codec.recv().await.unwrap_err();
        assert!(matches!(err, ProtoError::BadMessage));
    }
}
