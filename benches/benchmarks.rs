use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use ndarray::Array2;
use terrascan::{
    components::{
        indexes::normalized_difference, preview::downsample_area, statistics::band_statistics,
    },
    Normalization, PixelArray, Sampling,
};

const SIZE: (usize, usize) = (2048, 2048);

fn band(seed: usize) -> Array2<f64> {
    Array2::from_shape_fn(SIZE, |(row, col)| ((row * 31 + col * 17 + seed) % 4096) as f64)
}

fn bench_statistics(c: &mut Criterion) {
    let band = band(0);
    c.bench_function("statistics_full", |b| {
        b.iter(|| band_statistics(1, black_box(band.view()), Some(0.), Sampling::Full))
    });
    c.bench_function("statistics_sampled", |b| {
        b.iter(|| {
            band_statistics(
                1,
                black_box(band.view()),
                Some(0.),
                Sampling::MaxPixels(100_000),
            )
        })
    });
}

fn bench_index(c: &mut Criterion) {
    let (nir, red) = (band(7), band(3));
    c.bench_function("normalized_difference", |b| {
        b.iter(|| normalized_difference(black_box(nir.view()), Some(0.), red.view(), Some(0.)))
    });
}

fn bench_normalize(c: &mut Criterion) {
    let array = PixelArray::from(band(1));
    c.bench_function("normalize_min_max", |b| {
        b.iter(|| Normalization::default().apply(black_box(&array)))
    });
    c.bench_function("normalize_z_score", |b| {
        b.iter(|| Normalization::ZScore.apply(black_box(&array)))
    });
}

fn bench_preview(c: &mut Criterion) {
    let band = band(5);
    c.bench_function("downsample_area", |b| {
        b.iter(|| downsample_area(black_box(band.view()), None, (256, 256)))
    });
}

criterion_group!(benches, bench_statistics, bench_index, bench_normalize, bench_preview);
criterion_main!(benches);
