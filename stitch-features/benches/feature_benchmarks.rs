use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{Luma, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stitch_core::{GrayImage, PreprocessConfig};
use stitch_features::{FeatureDetector, FeatureMatcher, ImagePreprocessing, OrbDetector, SiftDetector};

/// Random rectangles on grey, roughly what a textured photo looks like to FAST/DoG
fn create_benchmark_image(width: u32, height: u32) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(42);
    let mut img = RgbImage::from_pixel(width, height, Rgb([110, 110, 110]));
    for _ in 0..(width * height / 800) {
        let (w, h) = (rng.random_range(6..48), rng.random_range(6..48));
        let x0 = rng.random_range(0..width - w);
        let y0 = rng.random_range(0..height - h);
        let c = Rgb([rng.random::<u8>(), rng.random::<u8>(), rng.random::<u8>()]);
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, c);
            }
        }
    }
    img
}

fn dark(img: &GrayImage) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| Luma([img.get_pixel(x, y)[0] / 4]))
}

fn bench_preprocessing(c: &mut Criterion) {
    let mut group = c.benchmark_group("preprocessing");
    let cfg = PreprocessConfig::default();
    for &(w, h) in &[(320, 240), (800, 600)] {
        let gray = ImagePreprocessing::to_gray(&create_benchmark_image(w, h));
        let night = dark(&gray);
        group.bench_with_input(BenchmarkId::new("normal", format!("{}x{}", w, h)), &gray, |b, img| {
            b.iter(|| ImagePreprocessing::enhance_normal(black_box(img), &cfg))
        });
        group.bench_with_input(BenchmarkId::new("night", format!("{}x{}", w, h)), &night, |b, img| {
            b.iter(|| ImagePreprocessing::enhance_night(black_box(img), &cfg))
        });
    }
    group.finish();
}

fn bench_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("detection");
    group.sample_size(10);
    let gray = ImagePreprocessing::to_gray(&create_benchmark_image(640, 480));
    let orb = OrbDetector::new(1000);
    let sift = SiftDetector::new(1000);
    group.bench_function("orb_640x480", |b| b.iter(|| orb.detect_and_describe(black_box(&gray))));
    group.bench_function("sift_640x480", |b| b.iter(|| sift.detect_and_describe(black_box(&gray))));
    group.finish();
}

fn bench_matching(c: &mut Criterion) {
    let gray = ImagePreprocessing::to_gray(&create_benchmark_image(640, 480));
    let matcher = FeatureMatcher::default();
    let orb = OrbDetector::new(1000).detect_and_describe(&gray);
    let sift = SiftDetector::new(1000).detect_and_describe(&gray);

    let mut group = c.benchmark_group("matching");
    group.bench_function("hamming_ratio", |b| {
        b.iter(|| matcher.match_descriptors(black_box(orb.descriptors()), black_box(orb.descriptors())))
    });
    group.bench_function("euclidean_ratio", |b| {
        b.iter(|| matcher.match_descriptors(black_box(sift.descriptors()), black_box(sift.descriptors())))
    });
    group.finish();
}

criterion_group!(benches, bench_preprocessing, bench_detection, bench_matching);
criterion_main!(benches);
