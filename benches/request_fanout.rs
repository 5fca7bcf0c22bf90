//! Request completion benchmark.
//!
//! Measures completion fan-out (observers, `MultiRequest::all`) and frame
//! splitting using Criterion.

use bytes::BytesMut;
use corabus::message::{MultiRequest, Request};
use corabus::net::codec::{encode_frame, split_frame, FRAME_REQUEST};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const MAX_FRAME: u32 = 5 * 1024 * 1024;

fn bench_observer_fanout(c: &mut Criterion) {
    let observer_counts: &[usize] = &[1, 16, 256];

    let mut group = c.benchmark_group("observer_fanout");
    for &count in observer_counts {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &n| {
            b.iter(|| {
                let request = Request::new();
                let hits = Arc::new(AtomicUsize::new(0));
                for _ in 0..n {
                    let hits = hits.clone();
                    request.on_completion(move |_| {
                        hits.fetch_add(1, Ordering::Relaxed);
                    });
                }
                request.succeed().unwrap();
                black_box(hits.load(Ordering::Relaxed))
            });
        });
    }
    group.finish();
}

fn bench_multi_request(c: &mut Criterion) {
    let sizes: &[usize] = &[2, 32, 512];

    let mut group = c.benchmark_group("multi_request_all");
    for &size in sizes {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &n| {
            b.iter(|| {
                let parts: Vec<Request> = (0..n).map(|_| Request::new()).collect();
                let all = MultiRequest::all(parts.clone());
                for part in &parts {
                    part.succeed().unwrap();
                }
                black_box(all.is_successful())
            });
        });
    }
    group.finish();
}

fn bench_split_frame(c: &mut Criterion) {
    let payload_sizes: &[usize] = &[0, 64, 1024, 65536];

    let mut group = c.benchmark_group("split_frame");
    for &size in payload_sizes {
        let wire = encode_frame(FRAME_REQUEST, &vec![0xABu8; size]).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, w| {
            b.iter(|| {
                let mut buf = BytesMut::from(black_box(w.as_slice()));
                split_frame(&mut buf, MAX_FRAME).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_observer_fanout,
    bench_multi_request,
    bench_split_frame
);
criterion_main!(benches);
