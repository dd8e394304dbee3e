//! Tokio codecs that split byte streams into session frames.
//!
//! [`StreamFramer`] is the guest side: it decodes [`ResponseFrame`]s and
//! encodes [`RequestFrame`]s. [`RequestFramer`] is its mirror for hosts.
//!
//! Both decoders only consume a frame once it is entirely buffered, so the
//! decoded sequence does not depend on how reads were chunked. Bytes left
//! over at end of stream are a truncated frame and fail with
//! `FramingError`.

use crate::core::packet::{RequestFrame, ResponseFrame, RESPONSE_HEADER_LEN};
use crate::error::{constants, ProtocolError, Result};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on speculative buffer growth for a partially received frame.
const MAX_RESERVE: usize = 64 * 1024;

fn truncated(buffered: usize) -> ProtocolError {
    ProtocolError::FramingError(format!(
        "{} ({buffered} bytes buffered)",
        constants::ERR_TRUNCATED_FRAME
    ))
}

fn reserve_for(src: &mut BytesMut, total: usize) {
    let missing = total.saturating_sub(src.len());
    src.reserve(missing.min(MAX_RESERVE));
}

/// Guest-side codec: responses in, requests out.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamFramer;

impl Decoder for StreamFramer {
    type Item = ResponseFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(total) = ResponseFrame::frame_len(src) else {
            return Ok(None);
        };
        if src.len() < total {
            reserve_for(src, total);
            return Ok(None);
        }

        let frame = src.split_to(total);
        Ok(Some(ResponseFrame {
            status: frame[0],
            data: frame[RESPONSE_HEADER_LEN..].to_vec(),
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(truncated(src.len())),
        }
    }
}

impl Encoder<RequestFrame> for StreamFramer {
    type Error = ProtocolError;

    fn encode(&mut self, item: RequestFrame, dst: &mut BytesMut) -> Result<()> {
        item.encode_into(dst);
        Ok(())
    }
}

/// Host-side codec: requests in, responses out.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestFramer;

impl Decoder for RequestFramer {
    type Item = RequestFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(total) = RequestFrame::frame_len(src) else {
            return Ok(None);
        };
        if src.len() < total {
            reserve_for(src, total);
            return Ok(None);
        }

        let frame = src.split_to(total);
        RequestFrame::from_bytes(&frame).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(truncated(src.len())),
        }
    }
}

impl Encoder<ResponseFrame> for RequestFramer {
    type Error = ProtocolError;

    fn encode(&mut self, item: ResponseFrame, dst: &mut BytesMut) -> Result<()> {
        item.encode_into(dst);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn waits_for_complete_header_and_body() {
        let mut framer = StreamFramer;
        let bytes = ResponseFrame::ok(b"hello".to_vec()).to_bytes();

        let mut buf = BytesMut::from(&bytes[..3]);
        assert!(framer.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);

        buf.extend_from_slice(&bytes[3..7]);
        assert!(framer.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 7);

        buf.extend_from_slice(&bytes[7..]);
        let frame = framer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.data, b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn eof_with_leftover_bytes_is_a_framing_error() {
        let mut framer = StreamFramer;
        let mut buf = BytesMut::from(&[0u8, 0, 0, 0, 9, 1, 2][..]);
        assert!(matches!(
            framer.decode_eof(&mut buf),
            Err(ProtocolError::FramingError(_))
        ));
    }

    #[test]
    fn eof_on_empty_buffer_is_clean() {
        let mut framer = StreamFramer;
        let mut buf = BytesMut::new();
        assert!(framer.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn zero_length_response_decodes() {
        let mut framer = StreamFramer;
        let mut buf = BytesMut::from(&[3u8, 0, 0, 0, 0][..]);
        let frame = framer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.status, 3);
        assert!(frame.data.is_empty());
    }

    #[test]
    fn request_framer_roundtrips_through_encoder() {
        let mut buf = BytesMut::new();
        let request = RequestFrame::new("c:server_port", Vec::new()).unwrap();
        StreamFramer.encode(request.clone(), &mut buf).unwrap();

        let decoded = RequestFramer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, request);
        assert!(buf.is_empty());
    }
}
