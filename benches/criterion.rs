use criterion::{criterion_group, criterion_main, Criterion};
use defish::nalgebra::Point2;
use defish::{CorrectParams, CorrectionVariant, Corrector, DistanceMapping};
use image::{Rgb, RgbImage};

fn solid_disc_frame() -> RgbImage {
    let mut frame = RgbImage::new(600, 600);
    for (x, y, pixel) in frame.enumerate_pixels_mut() {
        let dx = x as f64 - 300.0;
        let dy = y as f64 - 300.0;
        if (dx * dx + dy * dy).sqrt() <= 300.0 {
            *pixel = Rgb([50, 120, 200]);
        }
    }
    frame
}

fn params() -> CorrectParams {
    CorrectParams::new(
        CorrectionVariant::PerspectiveLongLatLensedReversed,
        Point2::new(300, 300),
        300,
        DistanceMapping::LongitudeLatitude,
    )
}

fn correct_cold(c: &mut Criterion) {
    let src = solid_disc_frame();
    let params = params().with_cache(false);
    c.bench_function("correct_cold", |b| {
        let mut corrector = Corrector::default();
        let mut dst = RgbImage::new(600, 600);
        b.iter(|| corrector.correct(&src, &mut dst, &params).unwrap())
    });
}

fn correct_cached(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let src = solid_disc_frame();
    let params = params();
    let mut corrector = Corrector::new(dir.path());
    let mut dst = RgbImage::new(600, 600);
    // Warm the remap table once; the measured runs replay it.
    corrector.correct(&src, &mut dst, &params).unwrap();
    c.bench_function("correct_cached", |b| {
        b.iter(|| corrector.correct(&src, &mut dst, &params).unwrap())
    });
}

criterion_group!(
    name = correction;
    config = Criterion::default().sample_size(10);
    targets = correct_cold, correct_cached
);
criterion_main!(correction);
