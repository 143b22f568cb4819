//! Wire format shared by the query server and its clients.
//!
//! A request is a 2-byte big-endian length followed by that many bytes of JSON:
//! `{"user": "...", "domain": "..."}`. The reply is always exactly one byte.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest payload a 2-byte length prefix can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Default upper bound for a request payload.
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 2048;

/// A single blocklist check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub user: String,
    pub domain: String,
}

impl CheckRequest {
    pub fn new(user: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            domain: domain.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CheckResponse {
    Allowed = 0x00,
    Blocked = 0x01,
    Error = 0xff,
}

impl CheckResponse {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0x00 => Ok(Self::Allowed),
            0x01 => Ok(Self::Blocked),
            0xff => Ok(Self::Error),
            other => Err(ProtocolError::UnknownResponse(other)),
        }
    }
}

impl From<bool> for CheckResponse {
    fn from(blocked: bool) -> Self {
        if blocked { Self::Blocked } else { Self::Allowed }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty request frame")]
    EmptyFrame,
    #[error("request of {size} bytes exceeds the {limit} byte limit")]
    Oversized { size: usize, limit: usize },
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("request has an empty '{0}' field")]
    EmptyField(&'static str),
    #[error("unknown response byte {0:#04x}")]
    UnknownResponse(u8),
}

/// Failure while reading a request frame off the wire.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Encode a request, length prefix included.
pub fn encode_request(request: &CheckRequest) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(request)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::Oversized {
            size: payload.len(),
            limit: MAX_FRAME_LEN,
        });
    }

    let mut buf = BytesMut::with_capacity(2 + payload.len());
    buf.put_u16(payload.len() as u16);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Decode a request payload (without its length prefix).
pub fn decode_request(payload: &[u8]) -> Result<CheckRequest, ProtocolError> {
    let request: CheckRequest = serde_json::from_slice(payload)?;

    if request.user.is_empty() {
        return Err(ProtocolError::EmptyField("user"));
    }
    if request.domain.is_empty() {
        return Err(ProtocolError::EmptyField("domain"));
    }

    Ok(request)
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between frames.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<Bytes>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];

    if reader.read(&mut len_buf[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_buf[1..]).await?;

    let len = u16::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(ProtocolError::EmptyFrame.into());
    }
    if len > max_size {
        return Err(ProtocolError::Oversized {
            size: len,
            limit: max_size,
        }
        .into());
    }

    let mut buf = vec![0; len];
    reader.read_exact(&mut buf).await?;

    Ok(Some(Bytes::from(buf)))
}
