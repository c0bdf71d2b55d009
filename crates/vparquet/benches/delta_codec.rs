//! Delta codec benchmarks: encode per backend and decode

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use vparquet::encoding::delta::{
    encode_i64, encode_with, DeltaDecoder, LaneBackend, ScalarBackend,
};

const VALUES: usize = 64 * 1024;

/// Monotonic timestamps with jitter, like span start times
fn timestamps() -> Vec<i64> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let mut t = 1_700_000_000_000_000_000i64;
    (0..VALUES)
        .map(|_| {
            t += rng.gen_range(0..50_000);
            t
        })
        .collect()
}

/// Small durations with occasional outliers
fn durations() -> Vec<i64> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    (0..VALUES)
        .map(|i| {
            if i % 97 == 0 {
                rng.gen_range(0..10_000_000_000)
            } else {
                rng.gen_range(0..2_000_000)
            }
        })
        .collect()
}

fn benchmark_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_encode");
    group.throughput(Throughput::Elements(VALUES as u64));

    for (name, values) in [("timestamps", timestamps()), ("durations", durations())] {
        group.bench_with_input(BenchmarkId::new("scalar", name), &values, |b, values| {
            let mut out = Vec::with_capacity(values.len() * 8);
            b.iter(|| {
                out.clear();
                encode_with(&ScalarBackend, &mut out, black_box(values));
                black_box(out.len())
            });
        });
        group.bench_with_input(BenchmarkId::new("lanes", name), &values, |b, values| {
            let backend = LaneBackend::portable();
            let mut out = Vec::with_capacity(values.len() * 8);
            b.iter(|| {
                out.clear();
                encode_with(&backend, &mut out, black_box(values));
                black_box(out.len())
            });
        });
        if let Some(backend) = LaneBackend::detect() {
            group.bench_with_input(BenchmarkId::new("detected", name), &values, |b, values| {
                let mut out = Vec::with_capacity(values.len() * 8);
                b.iter(|| {
                    out.clear();
                    encode_with(&backend, &mut out, black_box(values));
                    black_box(out.len())
                });
            });
        }
    }
    group.finish();
}

fn benchmark_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_decode");
    group.throughput(Throughput::Elements(VALUES as u64));

    for (name, values) in [("timestamps", timestamps()), ("durations", durations())] {
        let mut encoded = Vec::new();
        encode_i64(&mut encoded, &values);

        group.bench_with_input(BenchmarkId::from_parameter(name), &encoded, |b, encoded| {
            let mut decoder = DeltaDecoder::new();
            let mut out = Vec::with_capacity(VALUES);
            b.iter(|| {
                out.clear();
                decoder
                    .decode_i64(black_box(encoded), &mut out)
                    .expect("decode");
                black_box(out.len())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_encode, benchmark_decode);
criterion_main!(benches);
