//! Wire frames of the room session protocol.
//!
//! ```text
//! RequestFrame:  [1B typeLen][typeLen B type][4B BE dataLen][dataLen B data]
//! ResponseFrame: [1B status ][4B BE dataLen][dataLen B data]
//! ```
//!
//! Encoding and decoding here is pure; splitting a byte stream into frames is
//! the job of [`crate::core::codec`].

use crate::error::{constants, ProtocolError, Result};
use bytes::{BufMut, BytesMut};

/// Longest request type, in UTF-8 bytes.
pub const MAX_REQUEST_TYPE_LEN: usize = u8::MAX as usize;

/// Status byte plus the 4-byte data length.
pub const RESPONSE_HEADER_LEN: usize = 5;

/// Response status for success.
pub const STATUS_OK: u8 = 0;

/// Status used by hosts for requests no handler accepted.
pub const STATUS_UNHANDLED: u8 = 255;

/// A request sent from guest to host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    request_type: String,
    data: Vec<u8>,
}

impl RequestFrame {
    /// Build a request frame.
    ///
    /// # Errors
    /// `InvalidArgument` if `request_type` is longer than 255 UTF-8 bytes.
    pub fn new(request_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Result<Self> {
        let request_type = request_type.into();
        if request_type.len() > MAX_REQUEST_TYPE_LEN {
            return Err(ProtocolError::InvalidArgument(
                constants::ERR_TYPE_TOO_LONG.into(),
            ));
        }
        Ok(Self {
            request_type,
            data: data.into(),
        })
    }

    /// Request with an empty body.
    pub fn empty(request_type: impl Into<String>) -> Result<Self> {
        Self::new(request_type, Vec::new())
    }

    pub fn request_type(&self) -> &str {
        &self.request_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Size of the encoded frame.
    pub fn encoded_len(&self) -> usize {
        1 + self.request_type.len() + 4 + self.data.len()
    }

    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(self.request_type.len() as u8);
        dst.put_slice(self.request_type.as_bytes());
        dst.put_u32(self.data.len() as u32);
        dst.put_slice(&self.data);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.to_vec()
    }

    /// Total length of the request frame at the front of `src`, once its
    /// header is complete.
    pub(crate) fn frame_len(src: &[u8]) -> Option<usize> {
        let type_len = *src.first()? as usize;
        let len_at = 1 + type_len;
        let len_bytes: [u8; 4] = src.get(len_at..len_at + 4)?.try_into().ok()?;
        Some(len_at + 4 + u32::from_be_bytes(len_bytes) as usize)
    }

    /// Decode one complete frame from the front of `src`.
    ///
    /// # Errors
    /// `FramingError` if `src` is shorter than the frame it announces or the
    /// type is not UTF-8.
    pub fn from_bytes(src: &[u8]) -> Result<Self> {
        let total = Self::frame_len(src)
            .filter(|total| src.len() >= *total)
            .ok_or_else(|| ProtocolError::FramingError(constants::ERR_TRUNCATED_FRAME.into()))?;

        let type_len = src[0] as usize;
        let request_type = std::str::from_utf8(&src[1..1 + type_len])
            .map_err(|_| ProtocolError::FramingError(constants::ERR_INVALID_TYPE_UTF8.into()))?
            .to_owned();
        let data = src[1 + type_len + 4..total].to_vec();

        Ok(Self { request_type, data })
    }
}

/// A response sent from host to guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub status: u8,
    pub data: Vec<u8>,
}

impl ResponseFrame {
    pub fn new(status: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            data: data.into(),
        }
    }

    pub fn ok(data: impl Into<Vec<u8>>) -> Self {
        Self::new(STATUS_OK, data)
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn encoded_len(&self) -> usize {
        RESPONSE_HEADER_LEN + self.data.len()
    }

    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(self.status);
        dst.put_u32(self.data.len() as u32);
        dst.put_slice(&self.data);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.to_vec()
    }

    /// Total length of the response frame at the front of `src`, read from
    /// the fixed header without consuming it.
    pub(crate) fn frame_len(src: &[u8]) -> Option<usize> {
        let len_bytes: [u8; 4] = src.get(1..RESPONSE_HEADER_LEN)?.try_into().ok()?;
        Some(RESPONSE_HEADER_LEN + u32::from_be_bytes(len_bytes) as usize)
    }

    /// Decode one complete frame from the front of `src`.
    ///
    /// # Errors
    /// `FramingError` if `src` is shorter than the frame it announces.
    pub fn from_bytes(src: &[u8]) -> Result<Self> {
        let total = Self::frame_len(src)
            .filter(|total| src.len() >= *total)
            .ok_or_else(|| ProtocolError::FramingError(constants::ERR_TRUNCATED_FRAME.into()))?;

        Ok(Self {
            status: src[0],
            data: src[RESPONSE_HEADER_LEN..total].to_vec(),
        })
    }
}
