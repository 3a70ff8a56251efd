//! Benchmark suite for bundle operations

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hdag::{Bundle, Database, HdagFile, ListNodeSeq, Pathname};
use tempfile::TempDir;

fn hash(i: u32) -> [u8; 20] {
    let mut h = [0u8; 20];
    // Scatter the first byte so the fanout is populated
    h[0] = (i.wrapping_mul(2_654_435_761) >> 24) as u8;
    h[16..].copy_from_slice(&i.to_be_bytes());
    h
}

/// Layered DAG: node i points at up to three lower-numbered nodes
fn create_test_seq(node_count: u32) -> ListNodeSeq<'static> {
    let mut seq = ListNodeSeq::new(20);
    for i in (0..node_count).rev() {
        let targets: Vec<[u8; 20]> = [1, 7, 31].iter().filter(|&&d| i >= d).map(|&d| hash(i - d)).collect();
        seq.push(&hash(i), targets);
    }
    seq
}

fn bench_organize(c: &mut Criterion) {
    let mut group = c.benchmark_group("organize");

    for size in [1_000u32, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut seq = create_test_seq(size);
                let bundle = Bundle::organized_from_node_seq(&mut seq).unwrap();
                black_box(bundle.node_count());
            });
        });
    }

    group.finish();
}

fn bench_invert(c: &mut Criterion) {
    let mut group = c.benchmark_group("invert");

    for size in [1_000u32, 10_000, 100_000] {
        let bundle = Bundle::organized_from_node_seq(&mut create_test_seq(size)).unwrap();
        group.bench_with_input(BenchmarkId::new("hashless", size), &bundle, |b, bundle| {
            b.iter(|| black_box(bundle.invert(true).unwrap()));
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let bundle = Bundle::organized_from_node_seq(&mut create_test_seq(100_000)).unwrap();

    c.bench_function("find_node_idx", |b| {
        let mut i = 0u32;
        b.iter(|| {
            i = (i + 7919) % 100_000;
            black_box(bundle.find_node_idx(&hash(i)))
        });
    });
}

fn bench_file_round_trip(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let bundle = Bundle::organized_from_node_seq(&mut create_test_seq(10_000)).unwrap();

    c.bench_function("file_round_trip", |b| {
        b.iter(|| {
            let file = bundle
                .to_file(Pathname::Template { dir: dir.path(), suffix: ".hdag" }, 0o644)
                .unwrap();
            let path = file.path().unwrap().to_path_buf();
            file.close().unwrap();
            let reopened = Bundle::from_file(HdagFile::open(&path).unwrap());
            reopened.check().unwrap();
            std::fs::remove_file(&path).unwrap();
        });
    });
}

fn bench_merge(c: &mut Criterion) {
    c.bench_function("merge_two_halves", |b| {
        b.iter(|| {
            let db = Database::create(None, false, 0o755, 20).unwrap();
            let mut upper = ListNodeSeq::new(20);
            let mut lower = ListNodeSeq::new(20);
            for i in (0..2_000u32).rev() {
                let targets: Vec<[u8; 20]> = if i > 0 { vec![hash(i - 1)] } else { vec![] };
                let seq = if i >= 1_000 { &mut upper } else { &mut lower };
                seq.push(&hash(i), targets);
            }
            db.merge(&mut upper).unwrap();
            black_box(db.merge(&mut lower).unwrap());
        });
    });
}

criterion_group!(benches, bench_organize, bench_invert, bench_lookup, bench_file_round_trip, bench_merge);
criterion_main!(benches);
