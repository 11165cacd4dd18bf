//! Criterion benchmarks for the serial frame codec.
//!
//! Run with:
//! ```bash
//! cargo bench --package mesh-core --bench frame_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mesh_core::protocol::{encode_to_radio, FrameDecoder, FROM_RADIO_MARKER};

fn from_radio(payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![FROM_RADIO_MARKER];
    buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_to_radio");
    for size in [16usize, 172, 1024] {
        let payload = vec![0x5Au8; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, p| {
            b.iter(|| encode_to_radio(black_box(p)))
        });
    }
    group.finish();
}

fn bench_decode_stream(c: &mut Criterion) {
    // 32 frames delivered in awkward 7-byte reads, as a slow UART would
    let mut stream = Vec::new();
    for i in 0..32u8 {
        stream.extend_from_slice(&from_radio(&vec![i; 40]));
    }

    c.bench_function("frame_decoder_chunked_stream", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            let mut total = 0;
            for chunk in stream.chunks(7) {
                total += decoder.push(black_box(chunk)).len();
            }
            total
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode_stream);
criterion_main!(benches);
