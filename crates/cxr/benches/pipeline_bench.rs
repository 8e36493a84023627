//! Benchmarks for the explanation path.
//!
//! Run with: cargo bench --bench pipeline_bench

use std::io::Cursor;

use burn::tensor::backend::AutodiffBackend;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, ImageFormat, Luma};

use cxr::prelude::*;

type Inner = <CpuBackend as AutodiffBackend>::InnerBackend;

fn synthetic_png(seed: u32, size: u32) -> Vec<u8> {
    let gray = image::GrayImage::from_fn(size, size, |x, y| {
        Luma([((x * 7 + y * 13 + seed * 31) % 256) as u8])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(gray)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn tiny_pipeline(image_size: u32, cache_capacity: usize) -> Pipeline<CpuBackend> {
    let device = Default::default();
    let model = DenseNetConfig::tiny(5).init::<Inner>(&device);
    let classifier = Classifier::from_model(model, LabelSet::chest_xray()).unwrap();

    let mut config = PipelineConfig::new("unused").with_cache_capacity(cache_capacity);
    config.preprocess.image_size = image_size;
    Pipeline::new(classifier, config, &device).unwrap()
}

fn bench_explain_uncached(c: &mut Criterion) {
    let mut group = c.benchmark_group("explain_uncached");
    group.sample_size(10);

    for size in [64u32, 128, 224] {
        let pipeline = tiny_pipeline(size, 0);
        let bytes = synthetic_png(1, 256);

        group.bench_with_input(BenchmarkId::from_parameter(size), &bytes, |b, bytes| {
            b.iter(|| black_box(pipeline.explain_image(bytes).unwrap()))
        });
    }

    group.finish();
}

fn bench_explain_cached(c: &mut Criterion) {
    let pipeline = tiny_pipeline(64, 10);
    let bytes = synthetic_png(2, 256);
    pipeline.explain_image(&bytes).unwrap();

    c.bench_function("explain_cached", |b| {
        b.iter(|| black_box(pipeline.explain_image(&bytes).unwrap()))
    });
}

fn bench_preprocess(c: &mut Criterion) {
    let device = Default::default();
    let preprocessor = Preprocessor::new();
    let bytes = synthetic_png(3, 512);

    c.bench_function("preprocess_512_to_224", |b| {
        b.iter(|| black_box(preprocessor.prepare_bytes::<Inner>(&bytes, &device).unwrap()))
    });
}

fn bench_overlay(c: &mut Criterion) {
    let compositor = OverlayCompositor::new();
    let original = image::RgbImage::from_pixel(512, 512, image::Rgb([120, 120, 120]));
    let values = (0..224 * 224).map(|i| (i % 224) as f32 / 223.0).collect();
    let importance = ImportanceMap::new(224, 224, values).unwrap();

    c.bench_function("overlay_composite_jpeg", |b| {
        b.iter(|| black_box(compositor.composite(&original, &importance).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_explain_uncached,
    bench_explain_cached,
    bench_preprocess,
    bench_overlay
);
criterion_main!(benches);
