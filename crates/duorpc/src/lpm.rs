//! Length-prefixed message (LPM) framing.
//!
//! Every gRPC message on the wire is wrapped in a five byte header:
//!
//! ```text
//! +------------+---------------------------+----------------------+
//! | flag (u8)  | length (u32, big-endian)  | payload (length)     |
//! +------------+---------------------------+----------------------+
//! ```
//!
//! A non-zero flag means the payload is compressed with the stream's
//! negotiated [`Compressor`]. Size bounds of `0` mean unbounded.

use crate::compression::Compressor;
use crate::errorf;
use crate::status::{Code, Error};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use http_body_util::BodyExt;
use hyper::body::Body;
use prost::Message;
use std::borrow::Cow;
use std::sync::Arc;

/// Size of the flag byte plus the length prefix.
pub const HEADER_LEN: usize = 5;

const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Most room reserved for a payload ahead of its bytes arriving. Larger
/// payloads grow the buffer as they are read.
const MAX_RESERVE: usize = 64 * 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One decoded frame, payload still compressed if `compressed` is set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub compressed: bool,
    pub payload: Bytes,
}

/// Frames a serialized message, compressing it unless `compressor` is
/// identity.
///
/// The bound applies to the serialized message. Nothing is produced when it
/// is exceeded.
pub fn encode_envelope(
    payload: &[u8],
    compressor: &dyn Compressor,
    max_bytes: usize,
) -> Result<Bytes, Error> {
    if max_bytes > 0 && payload.len() > max_bytes {
        return Err(errorf!(
            Code::ResourceExhausted,
            "message size {} exceeds sending limit {max_bytes}",
            payload.len()
        ));
    }

    let (flag, body) = if compressor.is_identity() {
        (0, Cow::Borrowed(payload))
    } else {
        let compressed = compressor
            .compress(payload)
            .map_err(|e| errorf!(Code::Internal, "can't compress message: {e}"))?;
        (FLAG_COMPRESSED, Cow::Owned(compressed))
    };

    let len = u32::try_from(body.len()).map_err(|_| {
        errorf!(
            Code::ResourceExhausted,
            "message size {} doesn't fit a length prefix",
            body.len()
        )
    })?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u8(flag);
    buf.put_u32(len);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Serializes and frames a message.
pub fn encode_message<M: Message>(
    message: &M,
    compressor: &dyn Compressor,
    max_bytes: usize,
) -> Result<Bytes, Error> {
    encode_envelope(&message.encode_to_vec(), compressor, max_bytes)
}

/// Splits one envelope off the front of `buf`.
///
/// Returns `Ok(None)` while the envelope is incomplete. The declared length is
/// checked against `max_bytes` as soon as the header is available. At most
/// 64 KiB is reserved for a pending payload, whatever length it declares.
pub fn decode_envelope(buf: &mut BytesMut, max_bytes: usize) -> Result<Option<Envelope>, Error> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let flag = buf[0];
    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if max_bytes > 0 && len > max_bytes {
        return Err(errorf!(
            Code::ResourceExhausted,
            "message size {len} is larger than configured max {max_bytes}"
        ));
    }

    let total = HEADER_LEN + len;
    if buf.len() < total {
        buf.reserve((total - buf.len()).min(MAX_RESERVE));
        return Ok(None);
    }

    buf.advance(HEADER_LEN);
    Ok(Some(Envelope {
        compressed: flag != 0,
        payload: buf.split_to(len).freeze(),
    }))
}

/// Reads length-prefixed messages from an HTTP body.
pub struct LpmReader<B> {
    body: B,
    buf: BytesMut,
    compressor: Arc<dyn Compressor>,
    max_bytes: usize,
    eof: bool,
}

impl<B> LpmReader<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    pub fn new(body: B, compressor: Arc<dyn Compressor>, max_bytes: usize) -> Self {
        Self {
            body,
            buf: BytesMut::new(),
            compressor,
            max_bytes,
            eof: false,
        }
    }

    /// Reads the next raw envelope.
    ///
    /// `Ok(None)` is a clean end of stream: the body ended on an envelope
    /// boundary. Ending mid-envelope is [`Code::InvalidArgument`].
    pub async fn next_envelope(&mut self) -> Result<Option<Envelope>, Error> {
        loop {
            if let Some(envelope) = decode_envelope(&mut self.buf, self.max_bytes)? {
                return Ok(Some(envelope));
            }
            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(errorf!(
                    Code::InvalidArgument,
                    "stream ended with an incomplete message ({} bytes buffered)",
                    self.buf.len()
                ));
            }
            match self.body.frame().await {
                None => self.eof = true,
                Some(Ok(frame)) => {
                    // Request trailers carry nothing we act on.
                    if let Ok(data) = frame.into_data() {
                        self.buf.extend_from_slice(&data);
                    }
                }
                Some(Err(err)) => {
                    let err: BoxError = err.into();
                    return Err(errorf!(Code::Unknown, "can't read request body: {err}"));
                }
            }
        }
    }

    /// Reads the next message payload, decompressed.
    pub async fn next_payload(&mut self) -> Result<Option<Bytes>, Error> {
        let Some(envelope) = self.next_envelope().await? else {
            return Ok(None);
        };
        if !envelope.compressed {
            return Ok(Some(envelope.payload));
        }
        if self.compressor.is_identity() {
            return Err(errorf!(
                Code::Internal,
                "protocol error: compressed flag set on a stream without an encoding"
            ));
        }
        let inflated = self
            .compressor
            .decompress(&envelope.payload, self.max_bytes)?;
        Ok(Some(Bytes::from(inflated)))
    }

    /// Reads and decodes the next message.
    pub async fn next_message<M: Message + Default>(&mut self) -> Result<Option<M>, Error> {
        self.next_payload().await?.map(decode_message).transpose()
    }
}

pub(crate) fn decode_message<M: Message + Default>(payload: Bytes) -> Result<M, Error> {
    M::decode(payload).map_err(|e| errorf!(Code::InvalidArgument, "can't unmarshal protobuf: {e}"))
}
