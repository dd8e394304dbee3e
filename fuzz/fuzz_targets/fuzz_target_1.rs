#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use mesh_room::core::codec::StreamFramer;
use mesh_room::core::packet::RequestFrame;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes from the tunnel must never panic the framer
    let mut framer = StreamFramer;
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = framer.decode(&mut buf) {}
    let _ = framer.decode_eof(&mut buf);

    let _ = RequestFrame::from_bytes(data);
});
