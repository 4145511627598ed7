// ABOUTME: Benchmark suite for header encode/decode and message-type classification throughput
// ABOUTME: Counterpart of smpp_benchmarks.rs, scoped to this crate's header codec and MessageQueue

use bytes::{BufMut, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use wsrpc::header::{self, MessageType};
use wsrpc::queue::MessageQueue;

fn sample_frame(method: &str, message_type: MessageType, seq: i32, body_len: usize) -> bytes::Bytes {
    let mut buf = BytesMut::new();
    header::write_header(&mut buf, method, message_type, seq);
    buf.put_bytes(b'A', body_len);
    header::finalize_length(&mut buf);
    buf.freeze()
}

fn bench_header_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("header_encode");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("call", |b| {
        b.iter(|| {
            let mut buf = BytesMut::new();
            header::write_header(&mut buf, black_box("work"), MessageType::Call, black_box(42));
            header::finalize_length(&mut buf);
            buf
        })
    });

    group.finish();
}

fn bench_header_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("header_decode");
    group.measurement_time(Duration::from_secs(5));

    let frame = sample_frame("work", MessageType::Call, 42, 0);
    group.bench_function("call", |b| {
        b.iter(|| header::peek_header(black_box(&frame)).unwrap())
    });

    group.finish();
}

fn bench_header_decode_by_body_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("header_decode_body_sizes");
    group.measurement_time(Duration::from_secs(5));

    for &size in &[0usize, 64, 256, 4096] {
        let frame = sample_frame("submit", MessageType::Call, 1, size);
        group.bench_with_input(BenchmarkId::new("call", size), &frame, |b, frame| {
            b.iter(|| header::peek_header(black_box(frame)).unwrap())
        });
    }

    group.finish();
}

fn bench_queue_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_classification");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("add_then_get_single_type", |b| {
        b.iter(|| {
            let mut queue = MessageQueue::new();
            queue.add(black_box(sample_frame("work", MessageType::Call, 1, 32))).unwrap();
            queue.get(&[MessageType::Call])
        })
    });

    group.bench_function("add_then_get_interleaved_types", |b| {
        b.iter(|| {
            let mut queue = MessageQueue::new();
            queue.add(sample_frame("work", MessageType::Call, 1, 32)).unwrap();
            queue.add(sample_frame("work", MessageType::Reply, 1, 32)).unwrap();
            queue.add(sample_frame("notify", MessageType::Call, 2, 32)).unwrap();
            queue.get(&[MessageType::Reply, MessageType::Exception])
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_header_encode,
    bench_header_decode,
    bench_header_decode_by_body_size,
    bench_queue_classification,
);
criterion_main!(benches);
