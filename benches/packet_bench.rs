use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use mesh_room::core::codec::{RequestFramer, StreamFramer};
use mesh_room::core::packet::{RequestFrame, ResponseFrame};
use mesh_room::protocol::room_code::{is_valid, RoomCode};
use tokio_util::codec::{Decoder, Encoder};

#[allow(clippy::unwrap_used)]
fn bench_frame_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode_decode");
    let payload_sizes = [64usize, 512, 4096, 65536, 1024 * 1024];

    for &size in &payload_sizes {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("encode_request_{size}b"), |b| {
            b.iter_batched(
                || RequestFrame::new("c:player_profiles_list", vec![0u8; size]).unwrap(),
                |frame| {
                    let mut buf = BytesMut::with_capacity(frame.encoded_len());
                    let mut codec = StreamFramer;
                    codec.encode(frame, &mut buf).unwrap();
                },
                BatchSize::SmallInput,
            )
        });
        group.bench_function(format!("decode_response_{size}b"), |b| {
            let encoded = ResponseFrame::ok(vec![0u8; size]).to_bytes();
            b.iter_batched(
                || BytesMut::from(&encoded[..]),
                |mut buf| {
                    let decoded = StreamFramer.decode(&mut buf).unwrap();
                    assert!(decoded.is_some());
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_chunked_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunked_reassembly");
    let request = RequestFrame::new("c:server_port", vec![7u8; 64 * 1024]).unwrap();
    let encoded = request.to_bytes();

    for &chunk in &[16usize, 1024, 16 * 1024] {
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_function(format!("chunk_{chunk}b"), |b| {
            b.iter(|| {
                let mut codec = RequestFramer;
                let mut buf = BytesMut::new();
                let mut frames = 0;
                for piece in encoded.chunks(chunk) {
                    buf.extend_from_slice(piece);
                    while codec.decode(&mut buf).unwrap().is_some() {
                        frames += 1;
                    }
                }
                assert_eq!(frames, 1);
            })
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_room_codes(c: &mut Criterion) {
    let mut group = c.benchmark_group("room_code");
    group.bench_function("validate", |b| {
        b.iter(|| assert!(is_valid("U/WJAJ-47A0-KXTU-SEUQ")))
    });
    group.bench_function("generate", |b| b.iter(|| RoomCode::generate().unwrap()));
    group.finish();
}

criterion_group!(
    benches,
    bench_frame_encode_decode,
    bench_chunked_reassembly,
    bench_room_codes
);
criterion_main!(benches);
