#![allow(dead_code)]

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage, imageops};
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_filled_rect_mut},
    rect::Rect,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Gradient background covered with random rectangles and discs, plus mild
/// per-pixel noise. Same seed, same image.
pub fn textured_image(width: u32, height: u32, seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (40 + x * 120 / width) as u8,
            (60 + y * 100 / height) as u8,
            90,
        ])
    });

    let shapes = (width * height / 1200).max(8);
    for _ in 0..shapes {
        let rect = Rect::at(
            rng.random_range(-10..width as i32),
            rng.random_range(-10..height as i32),
        )
        .of_size(rng.random_range(6..40), rng.random_range(6..40));
        let color = Rgb([rng.random(), rng.random(), rng.random()]);
        draw_filled_rect_mut(&mut image, rect, color);
    }

    for _ in 0..shapes / 4 {
        let center = (
            rng.random_range(0..width as i32),
            rng.random_range(0..height as i32),
        );
        let color = Rgb([rng.random(), rng.random(), rng.random()]);
        draw_filled_circle_mut(&mut image, center, rng.random_range(4..18), color);
    }

    for pixel in image.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            let noise: i16 = rng.random_range(-6..=6);
            *channel = (*channel as i16 + noise).clamp(0, 255) as u8;
        }
    }

    image
}

pub fn cut(image: &RgbImage, x: u32, y: u32, width: u32, height: u32) -> RgbImage {
    imageops::crop_imm(image, x, y, width, height).to_image()
}

pub fn write_png(dir: &Path, name: &str, image: &RgbImage) -> PathBuf {
    let path = dir.join(name);
    image.save(&path).expect("fixture should be writable");
    path
}
