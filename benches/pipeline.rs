use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use crop_forensics::{
    CropVerifier, VerificationConfig,
    analysis::{features::FeatureExtractor, matching::DescriptorMatcher},
    image_utils::rgb_to_gray,
};
use image::{DynamicImage, Rgb, RgbImage, imageops};
use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Random rectangles on a gradient, dense enough to give a few thousand corners.
fn create_benchmark_image(width: u32, height: u32) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(42);
    let mut image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 200 / width) as u8, (y * 200 / height) as u8, 100])
    });

    for _ in 0..width * height / 1200 {
        let rect = Rect::at(rng.random_range(0..width as i32), rng.random_range(0..height as i32))
            .of_size(rng.random_range(6..40), rng.random_range(6..40));
        draw_filled_rect_mut(&mut image, rect, Rgb([rng.random(), rng.random(), rng.random()]));
    }

    image
}

fn bench_feature_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("feature_extraction");

    for (width, height) in [(320, 240), (800, 600)] {
        let gray = rgb_to_gray(&create_benchmark_image(width, height));

        for parallel in [false, true] {
            let config = VerificationConfig {
                parallel,
                ..Default::default()
            };
            let Ok(extractor) = FeatureExtractor::from_config(&config) else {
                continue;
            };
            let id = format!("{width}x{height}/{}", if parallel { "parallel" } else { "serial" });

            group.bench_with_input(BenchmarkId::from_parameter(id), &gray, |b, gray| {
                b.iter(|| extractor.extract(black_box(gray)))
            });
        }
    }

    group.finish();
}

fn bench_matching(c: &mut Criterion) {
    let reference = create_benchmark_image(800, 600);
    let crop = imageops::crop_imm(&reference, 300, 200, 200, 200).to_image();

    let config = VerificationConfig::default();
    let (Ok(extractor), Ok(matcher)) = (
        FeatureExtractor::from_config(&config),
        DescriptorMatcher::from_config(&config),
    ) else {
        return;
    };
    let ref_features = extractor.extract(&rgb_to_gray(&reference));
    let crop_features = extractor.extract(&rgb_to_gray(&crop));

    c.bench_function("ratio_test_matching", |b| {
        b.iter(|| {
            matcher.match_descriptors(
                black_box(&crop_features.descriptors),
                black_box(&ref_features.descriptors),
            )
        })
    });
}

fn bench_full_verification(c: &mut Criterion) {
    let reference = create_benchmark_image(800, 600);
    let crop = DynamicImage::ImageRgb8(imageops::crop_imm(&reference, 300, 200, 150, 150).to_image());
    let reference = DynamicImage::ImageRgb8(reference);
    let verifier = CropVerifier::new();

    c.bench_function("verify_800x600", |b| {
        b.iter(|| verifier.verify_images(black_box(&reference), black_box(&crop)))
    });
}

criterion_group!(benches, bench_feature_extraction, bench_matching, bench_full_verification);
criterion_main!(benches);
