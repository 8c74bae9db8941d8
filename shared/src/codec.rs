//! Envelope framing shared by the TCP control channel and the UDP data channel
//!
//! Every unit of wire data is laid out as
//!
//! ```text
//! [length: i32 LE][message type: u32 LE][payload: length bytes]
//! ```
//!
//! `length` counts payload bytes only. TCP receivers feed arbitrary chunks into a
//! [`FrameDecoder`] and pull out complete envelopes as they become available; UDP
//! receivers expect exactly one envelope per datagram and use [`decode_datagram`].

use crate::protocol::MessageType;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Size of the fixed `[length][type]` header
pub const HEADER_LEN: usize = 8;

/// Largest payload a peer may announce before the stream is considered hostile
pub const MAX_PAYLOAD_LEN: usize = 1024 * 1024;

/// Protocol violations and payload failures raised while framing
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("negative payload length {0}")]
    NegativeLength(i32),
    #[error("payload length {len} exceeds the {max} byte limit", max = MAX_PAYLOAD_LEN)]
    PayloadTooLarge { len: usize },
    #[error("datagram truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("datagram carries {0} trailing bytes after its envelope")]
    TrailingBytes(usize),
    #[error("payload (de)serialization failed: {0}")]
    Payload(#[from] bincode::Error),
}

/// One decoded unit of wire transfer
///
/// The message type is kept raw so that a well-framed message with an unknown
/// type can still be routed to the dispatcher, which decides what to do with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub message_type: u32,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(message_type: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            payload: payload.into(),
        }
    }

    /// Serializes `message` as the payload of a `kind` envelope
    pub fn from_message<T: Serialize>(kind: MessageType, message: &T) -> Result<Self, CodecError> {
        let payload = bincode::serialize(message)?;
        Ok(Self::new(kind.id(), payload))
    }

    /// Known message type, if the raw id maps to one
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_u32(self.message_type)
    }

    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        Ok(bincode::deserialize(&self.payload)?)
    }

    /// Produces the framed bytes for this envelope
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        encode(self.message_type, &self.payload)
    }
}

/// Frames `payload` behind a `[length][type]` header
pub fn encode(message_type: u32, payload: &[u8]) -> Result<Bytes, CodecError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge { len: payload.len() });
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_i32_le(payload.len() as i32);
    buf.put_u32_le(message_type);
    buf.extend_from_slice(payload);
    Ok(buf.freeze())
}

/// Serializes and frames a typed message in one step
pub fn encode_message<T: Serialize>(kind: MessageType, message: &T) -> Result<Bytes, CodecError> {
    let payload = bincode::serialize(message)?;
    encode(kind.id(), &payload)
}

/// Bytes `message` occupies as an envelope payload
pub fn payload_len<T: Serialize>(message: &T) -> Result<usize, CodecError> {
    Ok(bincode::serialized_size(message)? as usize)
}

/// Validates the announced payload length at the front of `bytes`
fn read_length(bytes: &[u8]) -> Result<usize, CodecError> {
    let len = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if len < 0 {
        return Err(CodecError::NegativeLength(len));
    }
    let len = len as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge { len });
    }
    Ok(len)
}

/// Extracts the next complete envelope from the front of `buf`
///
/// Returns `Ok(None)` while the buffered bytes do not yet hold a whole envelope;
/// the partial envelope is left untouched. A malformed length is reported as
/// soon as its four bytes have arrived.
pub fn try_decode(buf: &mut BytesMut) -> Result<Option<Envelope>, CodecError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = read_length(buf)?;
    if buf.len() < HEADER_LEN + len {
        return Ok(None);
    }

    buf.advance(4);
    let message_type = buf.get_u32_le();
    let payload = buf.split_to(len).freeze();
    Ok(Some(Envelope {
        message_type,
        payload,
    }))
}

/// Decodes a datagram that must contain exactly one envelope
pub fn decode_datagram(datagram: &[u8]) -> Result<Envelope, CodecError> {
    if datagram.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            needed: HEADER_LEN,
            got: datagram.len(),
        });
    }
    let len = read_length(datagram)?;
    let needed = HEADER_LEN + len;
    if datagram.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            got: datagram.len(),
        });
    }
    if datagram.len() > needed {
        return Err(CodecError::TrailingBytes(datagram.len() - needed));
    }

    let message_type = u32::from_le_bytes([datagram[4], datagram[5], datagram[6], datagram[7]]);
    Ok(Envelope {
        message_type,
        payload: Bytes::copy_from_slice(&datagram[HEADER_LEN..]),
    })
}

/// Receive-side accumulator for a byte stream
///
/// Bytes are appended as they arrive; complete envelopes are drained in arrival
/// order. Because the announced length is capped, the accumulator never holds
/// more than one maximum-size envelope plus whatever arrived behind it in the
/// current read.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn next_envelope(&mut self) -> Result<Option<Envelope>, CodecError> {
        try_decode(&mut self.buf)
    }

    /// Drains every complete envelope currently buffered
    pub fn drain(&mut self) -> Result<Vec<Envelope>, CodecError> {
        let mut envelopes = Vec::new();
        while let Some(envelope) = self.next_envelope()? {
            envelopes.push(envelope);
        }
        Ok(envelopes)
    }

    /// Number of bytes held that do not yet form a complete envelope
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
