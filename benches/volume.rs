use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput};
use sparsevol::{Options, Volume};
use tempfile::tempdir;

const SEGMENT_SHIFT: u32 = 16; // 64 KiB segments, so a bench run crosses several.

fn sequential_write(c: &mut Criterion) {
    let sizes = [64usize, 4096, 65536];

    let mut group = c.benchmark_group("sequential_write");
    group.sampling_mode(SamplingMode::Flat);
    for size in sizes {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let dir = tempdir().unwrap();
            let v = Volume::open(
                dir.path(),
                Options {
                    segment_shift: SEGMENT_SHIFT,
                    ..Options::default()
                },
            )
            .unwrap();
            let buf = vec![0x42u8; size];
            let mut off = 0u64;

            b.iter(|| {
                v.pwrite(&buf, off).unwrap();
                off += size as u64;
            })
        });
    }
    group.finish();
}

fn random_read(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let v = Volume::open(
        dir.path(),
        Options {
            segment_shift: SEGMENT_SHIFT,
            pool_capacity: 16,
        },
    )
    .unwrap();

    let total = 1 << 22; // 4 MiB, several segments.
    v.pwrite(&vec![0u8; total], 0).unwrap();

    let mut group = c.benchmark_group("random_read");
    group.throughput(Throughput::Bytes(4096));
    group.bench_function("4k", |b| {
        let mut buf = vec![0u8; 4096];
        // Not actually randomized per-iteration to keep the bench
        // deterministic; offsets still land in different segments.
        let offsets: Vec<u64> = (0..64).map(|i| (i * 65537) % (total as u64 - 4096)).collect();
        let mut i = 0usize;
        b.iter(|| {
            v.pread(&mut buf, offsets[i % offsets.len()]).unwrap();
            i += 1;
        })
    });
    group.finish();
}

criterion_group!(benches, sequential_write, random_read);
criterion_main!(benches);
