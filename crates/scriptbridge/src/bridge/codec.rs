//! Framed codec for bridge traffic.
//!
//! LengthDelimitedCodec framing (4-byte length prefix) + serde_json bodies.
//! Works over any AsyncRead/AsyncWrite (sockets, pipes, in-memory duplex).

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::config::DEFAULT_MAX_FRAME_LENGTH;

/// Frames above this size get an info log when encoded.
const LARGE_FRAME_BYTES: usize = 100_000;

/// Codec that frames messages with a length prefix and serializes with JSON.
pub struct JsonCodec<T> {
    inner: LengthDelimitedCodec,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    /// Frames larger than `max` are rejected on both encode and decode.
    pub fn with_max_frame_length(max: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(max)
                .new_codec(),
            _phantom: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(bytes) => {
                let item = serde_json::from_slice(&bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json =
            serde_json::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let json_len = json.len();
        tracing::trace!(json_size_bytes = json_len, "Encoding frame");
        if json_len > LARGE_FRAME_BYTES {
            tracing::info!(
                json_size_bytes = json_len,
                json_size_kb = json_len / 1024,
                "Large frame being encoded"
            );
        }
        self.inner.encode(Bytes::from(json), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::{CallId, HostMessage, RemoteMessage};

    #[test]
    fn codec_carries_host_call() {
        let mut codec = JsonCodec::<HostMessage>::new();
        let mut buf = BytesMut::new();

        let msg = HostMessage::Call {
            id: CallId::new(1),
            name: "group.addObject".to_string(),
            args: vec![serde_json::json!({"id": "g1"})],
        };
        codec.encode(msg, &mut buf).unwrap();

        // 4-byte big-endian length prefix
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(len, buf.len() - 4);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        match decoded {
            HostMessage::Call { id, name, args } => {
                assert_eq!(id, CallId::new(1));
                assert_eq!(name, "group.addObject");
                assert_eq!(args, vec![serde_json::json!({"id": "g1"})]);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let mut encoder = JsonCodec::<RemoteMessage>::new();
        let mut full = BytesMut::new();
        encoder
            .encode(RemoteMessage::Ack { id: CallId::new(2) }, &mut full)
            .unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        let mut decoder = JsonCodec::<RemoteMessage>::new();
        assert!(decoder.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut codec = JsonCodec::<HostMessage>::with_max_frame_length(16);
        let mut buf = BytesMut::new();
        let msg = HostMessage::CallbackFault {
            invocation: 1,
            error: "x".repeat(64),
        };
        assert!(codec.encode(msg, &mut buf).is_err());
    }

    #[test]
    fn garbage_body_is_invalid_data() {
        let mut codec = JsonCodec::<RemoteMessage>::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(b"{{{");
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
