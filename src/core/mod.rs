//! # Core Protocol Components
//!
//! Frame layout and stream framing for the room session protocol.
//!
//! ## Components
//! - **Packet**: request and response frames, pure encode/decode
//! - **Codec**: Tokio codecs that reassemble frames across read boundaries
//!
//! ## Wire Format
//! ```text
//! Request:  [TypeLen(1)] [Type(N)] [DataLen(4, BE)] [Data(M)]
//! Response: [Status(1)] [DataLen(4, BE)] [Data(M)]
//! ```

pub mod codec;
pub mod packet;
