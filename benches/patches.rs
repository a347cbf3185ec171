//! Patch algebra benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use tabletop::{apply_patches, Board, Patch};

fn make_patches(count: usize) -> Vec<Patch> {
    (0..count)
        .map(|i| {
            Patch::phase(if i % 2 == 0 { "play" } else { "played" })
                .with("activePlayer", i % 4)
                .with("table", json!((0..i % 8).collect::<Vec<_>>()))
        })
        .collect()
}

fn bench_apply_patches(c: &mut Criterion) {
    let base = Board::new("start")
        .with("hands", json!([[0], [1], [2], [3]]))
        .with("table", json!([]))
        .with("scores", json!([]));

    let mut group = c.benchmark_group("apply_patches");
    for count in [4usize, 32, 256] {
        let patches = make_patches(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &patches, |b, patches| {
            b.iter(|| apply_patches(black_box(&base), black_box(patches)))
        });
    }
    group.finish();
}

fn bench_patch_merge(c: &mut Criterion) {
    let patches = make_patches(64);
    c.bench_function("patch_merge_fold", |b| {
        b.iter(|| {
            patches
                .iter()
                .fold(Patch::new(), |acc, p| acc.merge(black_box(p)))
        })
    });
}

criterion_group!(benches, bench_apply_patches, bench_patch_merge);
criterion_main!(benches);
