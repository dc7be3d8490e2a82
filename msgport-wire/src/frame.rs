//! Self-delimiting IPC frames and the stream codec that carries them.
//!
//! Each frame is an 8-byte header (`kind: u32`, `len: u32`, both big-endian)
//! followed by `len` bytes of CBOR payload. Frame boundaries are discoverable
//! by a stateless scan of the byte stream (`find_next`), so partial reads can
//! be buffered and re-scanned.

use std::io;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::bundle::Bundle;
use crate::error::WireError;

/// Fixed frame header size: kind discriminant plus payload length.
pub const HEADER_LEN: usize = 8;

/// Channel-role announcement, sent once immediately after connect.
///
/// Wire form is a 4-byte little-endian integer: zero for a request channel,
/// non-zero for a reverse channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    pub reverse: bool,
}

impl Hello {
    pub const LEN: usize = 4;

    pub fn encode(self) -> [u8; Self::LEN] {
        u32::to_le_bytes(if self.reverse { 1 } else { 0 })
    }

    pub fn decode(bytes: [u8; Self::LEN]) -> Self {
        Self {
            reverse: u32::from_le_bytes(bytes) != 0,
        }
    }
}

/// Frame type discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FrameKind {
    RegisterPort = 1,
    CheckRemotePort = 2,
    SendMessage = 3,
    DeliverMessage = 4,
    Reply = 5,
}

impl FrameKind {
    fn from_u32(value: u32) -> Result<Self, WireError> {
        match value {
            1 => Ok(FrameKind::RegisterPort),
            2 => Ok(FrameKind::CheckRemotePort),
            3 => Ok(FrameKind::SendMessage),
            4 => Ok(FrameKind::DeliverMessage),
            5 => Ok(FrameKind::Reply),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

/// A complete wire frame.
///
/// `RegisterPort`, `CheckRemotePort` and `SendMessage` travel proxy-to-broker
/// on a request channel and are each answered by one `Reply` in send order.
/// `DeliverMessage` travels broker-to-proxy on the reverse channel and has no
/// reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    RegisterPort { bundle: Bundle },
    CheckRemotePort { bundle: Bundle },
    SendMessage { metadata: Bundle, payload: Bundle },
    DeliverMessage { metadata: Bundle, payload: Bundle },
    Reply { status: i32 },
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::RegisterPort { .. } => FrameKind::RegisterPort,
            Frame::CheckRemotePort { .. } => FrameKind::CheckRemotePort,
            Frame::SendMessage { .. } => FrameKind::SendMessage,
            Frame::DeliverMessage { .. } => FrameKind::DeliverMessage,
            Frame::Reply { .. } => FrameKind::Reply,
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = Vec::new();
        let result = match self {
            Frame::RegisterPort { bundle } | Frame::CheckRemotePort { bundle } => {
                ciborium::into_writer(bundle, &mut buf)
            }
            Frame::SendMessage { metadata, payload }
            | Frame::DeliverMessage { metadata, payload } => {
                ciborium::into_writer(&(metadata, payload), &mut buf)
            }
            Frame::Reply { status } => ciborium::into_writer(status, &mut buf),
        };
        result.map_err(|e| WireError::Encode(e.to_string()))?;
        Ok(buf)
    }

    fn decode_payload(kind: FrameKind, payload: &[u8]) -> Result<Self, WireError> {
        match kind {
            FrameKind::RegisterPort => {
                let bundle = ciborium::from_reader(payload)
                    .map_err(|e| WireError::Decode(e.to_string()))?;
                Ok(Frame::RegisterPort { bundle })
            }
            FrameKind::CheckRemotePort => {
                let bundle = ciborium::from_reader(payload)
                    .map_err(|e| WireError::Decode(e.to_string()))?;
                Ok(Frame::CheckRemotePort { bundle })
            }
            FrameKind::SendMessage => {
                let (metadata, payload) = ciborium::from_reader(payload)
                    .map_err(|e| WireError::Decode(e.to_string()))?;
                Ok(Frame::SendMessage { metadata, payload })
            }
            FrameKind::DeliverMessage => {
                let (metadata, payload) = ciborium::from_reader(payload)
                    .map_err(|e| WireError::Decode(e.to_string()))?;
                Ok(Frame::DeliverMessage { metadata, payload })
            }
            FrameKind::Reply => {
                let status = ciborium::from_reader(payload)
                    .map_err(|e| WireError::Decode(e.to_string()))?;
                Ok(Frame::Reply { status })
            }
        }
    }

    /// Append the encoded frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), WireError> {
        let payload = self.encode_payload()?;
        let len: u32 = payload
            .len()
            .try_into()
            .map_err(|_| WireError::Encode("payload too large to length-prefix".to_string()))?;
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u32(self.kind() as u32);
        dst.put_u32(len);
        dst.put_slice(&payload);
        Ok(())
    }

    /// Encode to an owned byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.to_vec())
    }

    /// Decode one frame from a byte range that holds exactly one complete
    /// frame (as reported by [`find_next`]).
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                have: bytes.len(),
                need: HEADER_LEN,
            });
        }
        let kind = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let need = HEADER_LEN + len;
        if bytes.len() < need {
            return Err(WireError::Truncated {
                have: bytes.len(),
                need,
            });
        }
        let kind = FrameKind::from_u32(kind)?;
        Self::decode_payload(kind, &bytes[HEADER_LEN..need])
    }
}

/// Locate the first complete frame in `buf`.
///
/// Returns the total length of that frame (header plus payload), or `None`
/// when the buffer still ends mid-frame. The scan never interprets payload
/// contents.
pub fn find_next(buf: &[u8]) -> Option<usize> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    let total = HEADER_LEN + len;
    if buf.len() < total {
        return None;
    }
    Some(total)
}

/// Tokio codec for framed request/reverse channels.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload_size: u32,
}

impl FrameCodec {
    pub fn new(max_payload_size: u32) -> Self {
        Self { max_payload_size }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]);
        if len > self.max_payload_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame too large: {len} bytes (max {})", self.max_payload_size),
            ));
        }

        let frame_len = HEADER_LEN + len as usize;
        if src.len() < frame_len {
            return Ok(None);
        }

        let bytes = src.split_to(frame_len);
        let frame = Frame::decode(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        Ok(())
    }
}
