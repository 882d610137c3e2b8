use std::{cmp::Ordering, sync::OnceLock};

use image::GrayImage;
use imageproc::{
    corners::{Corner, corners_fast9},
    filter::gaussian_blur_f32,
    gradients::{horizontal_sobel, vertical_sobel},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::{
    VerificationConfig,
    error::{Result, VerifyError},
    image_utils::build_pyramid,
};

pub const DESCRIPTOR_BYTES: usize = 32;

/// 256-bit binary descriptor.
pub type Descriptor = [u8; DESCRIPTOR_BYTES];

/// Keypoints closer than this to a level's border are discarded so the
/// orientation patch and the sampling pattern stay inside the image.
const EDGE_THRESHOLD: u32 = 16;
const HALF_PATCH: i32 = 15;
const PATTERN_RADIUS: i32 = 12;
const PATTERN_SEED: u64 = 0x0b1e_5eed;
const HARRIS_RADIUS: i32 = 3;
const HARRIS_K: f64 = 0.04;
const BLUR_SIGMA: f32 = 2.0;

/// Salient point in base-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Orientation in radians, from the intensity centroid.
    pub angle: f32,
    /// Harris corner response at the detection level.
    pub response: f32,
    pub octave: u8,
    /// Diameter of the described patch in base-image pixels.
    pub size: f32,
}

/// Keypoints and descriptors of one image, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Oriented FAST keypoints with steered BRIEF descriptors, detected over a
/// small scale pyramid.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    max_features: usize,
    fast_threshold: u8,
    pyramid_levels: u8,
    scale_factor: f32,
    parallel: bool,
}

#[derive(Clone, Copy)]
struct Candidate {
    x: u32,
    y: u32,
    response: f64,
}

impl FeatureExtractor {
    pub fn new(max_features: usize, fast_threshold: u8) -> Result<Self> {
        if max_features == 0 {
            return Err(VerifyError::InvalidParameter(
                "max_features must be at least 1".into(),
            ));
        }

        if fast_threshold == 0 {
            return Err(VerifyError::InvalidParameter(
                "fast_threshold must be positive".into(),
            ));
        }

        Ok(Self {
            max_features,
            fast_threshold,
            pyramid_levels: 1,
            scale_factor: 1.2,
            parallel: false,
        })
    }

    pub fn from_config(config: &VerificationConfig) -> Result<Self> {
        Ok(Self::new(config.max_features, config.fast_threshold)?
            .with_pyramid(config.pyramid_levels, config.scale_factor)
            .with_parallel(config.parallel))
    }

    pub fn with_pyramid(mut self, levels: u8, scale_factor: f32) -> Self {
        self.pyramid_levels = levels.max(1);
        self.scale_factor = scale_factor.max(1.0 + f32::EPSILON);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Detects and describes up to `max_features` keypoints. A blank or tiny
    /// image yields an empty set.
    pub fn extract(&self, gray: &GrayImage) -> FeatureSet {
        let pyramid = build_pyramid(
            gray,
            self.pyramid_levels,
            self.scale_factor,
            2 * EDGE_THRESHOLD + 1,
        );
        let budgets = self.level_budgets(pyramid.len());

        let mut features = FeatureSet::default();

        for (level, budget) in pyramid.iter().zip(budgets) {
            let candidates = self.detect(&level.image, budget);
            if candidates.is_empty() {
                continue;
            }

            let blurred = gaussian_blur_f32(&level.image, BLUR_SIGMA);
            let describe = |c: &Candidate| {
                let angle = intensity_angle(&level.image, c.x, c.y);
                let descriptor = steered_brief(&blurred, c.x as f32, c.y as f32, angle);
                let keypoint = Keypoint {
                    x: c.x as f32 * level.scale,
                    y: c.y as f32 * level.scale,
                    angle,
                    response: c.response as f32,
                    octave: level.octave,
                    size: (2 * HALF_PATCH + 1) as f32 * level.scale,
                };
                (keypoint, descriptor)
            };

            let described: Vec<(Keypoint, Descriptor)> = if self.parallel {
                candidates.par_iter().map(describe).collect()
            } else {
                candidates.iter().map(describe).collect()
            };

            for (keypoint, descriptor) in described {
                features.keypoints.push(keypoint);
                features.descriptors.push(descriptor);
            }
        }

        log::debug!(
            "extracted {} keypoints from {}x{} image over {} level(s)",
            features.len(),
            gray.width(),
            gray.height(),
            pyramid.len()
        );

        features
    }

    /// Splits the feature cap across levels in proportion to level area.
    fn level_budgets(&self, levels: usize) -> Vec<usize> {
        if levels == 0 {
            return Vec::new();
        }

        let factor = 1.0 / (self.scale_factor as f64 * self.scale_factor as f64);
        let total: f64 = (0..levels).map(|i| factor.powi(i as i32)).sum();
        let mut budgets = Vec::with_capacity(levels);
        let mut assigned = 0usize;

        for i in 0..levels - 1 {
            let n = (self.max_features as f64 * factor.powi(i as i32) / total).round() as usize;
            let n = n.min(self.max_features - assigned);
            budgets.push(n);
            assigned += n;
        }
        budgets.push(self.max_features - assigned);

        budgets
    }

    /// FAST-9 corners, 3x3 non-maximum suppression, border rejection, then
    /// the `budget` strongest by Harris response.
    fn detect(&self, image: &GrayImage, budget: usize) -> Vec<Candidate> {
        if budget == 0 {
            return Vec::new();
        }

        let (width, height) = image.dimensions();
        let corners = corners_fast9(image, self.fast_threshold);
        let kept: Vec<Corner> = suppress_non_maxima(&corners, width, height)
            .into_iter()
            .filter(|c| {
                c.x >= EDGE_THRESHOLD
                    && c.y >= EDGE_THRESHOLD
                    && c.x < width - EDGE_THRESHOLD
                    && c.y < height - EDGE_THRESHOLD
            })
            .collect();

        if kept.is_empty() {
            return Vec::new();
        }

        let gx = horizontal_sobel(image);
        let gy = vertical_sobel(image);

        let mut candidates: Vec<Candidate> = kept
            .into_iter()
            .map(|c| Candidate {
                x: c.x,
                y: c.y,
                response: harris_response(&gx, &gy, c.x, c.y),
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.response
                .partial_cmp(&a.response)
                .unwrap_or(Ordering::Equal)
                .then(a.y.cmp(&b.y))
                .then(a.x.cmp(&b.x))
        });
        candidates.truncate(budget);

        candidates
    }
}

/// Keeps a corner unless an 8-neighbour scores higher, or scores the same
/// and comes earlier in raster order.
fn suppress_non_maxima(corners: &[Corner], width: u32, height: u32) -> Vec<Corner> {
    let mut scores = vec![f32::NEG_INFINITY; (width * height) as usize];
    for c in corners {
        scores[(c.y * width + c.x) as usize] = c.score;
    }

    corners
        .iter()
        .filter(|c| {
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = c.x as i32 + dx;
                    let ny = c.y as i32 + dy;
                    if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                        continue;
                    }
                    let neighbour = scores[(ny as u32 * width + nx as u32) as usize];
                    let earlier = dy < 0 || (dy == 0 && dx < 0);
                    if neighbour > c.score || (neighbour == c.score && earlier) {
                        return false;
                    }
                }
            }
            true
        })
        .copied()
        .collect()
}

fn harris_response(
    gx: &image::ImageBuffer<image::Luma<i16>, Vec<i16>>,
    gy: &image::ImageBuffer<image::Luma<i16>, Vec<i16>>,
    x: u32,
    y: u32,
) -> f64 {
    let (mut sxx, mut syy, mut sxy) = (0.0f64, 0.0f64, 0.0f64);

    for dy in -HARRIS_RADIUS..=HARRIS_RADIUS {
        for dx in -HARRIS_RADIUS..=HARRIS_RADIUS {
            let px = (x as i32 + dx) as u32;
            let py = (y as i32 + dy) as u32;
            let ix = gx.get_pixel(px, py)[0] as f64;
            let iy = gy.get_pixel(px, py)[0] as f64;
            sxx += ix * ix;
            syy += iy * iy;
            sxy += ix * iy;
        }
    }

    let det = sxx * syy - sxy * sxy;
    let trace = sxx + syy;
    det - HARRIS_K * trace * trace
}

/// Orientation of the intensity centroid over a disc of radius `HALF_PATCH`.
fn intensity_angle(image: &GrayImage, x: u32, y: u32) -> f32 {
    let (width, height) = image.dimensions();
    let mut m01 = 0i64;
    let mut m10 = 0i64;

    for dy in -HALF_PATCH..=HALF_PATCH {
        let py = (y as i32 + dy).clamp(0, height as i32 - 1) as u32;
        for dx in -HALF_PATCH..=HALF_PATCH {
            if dx * dx + dy * dy > HALF_PATCH * HALF_PATCH {
                continue;
            }
            let px = (x as i32 + dx).clamp(0, width as i32 - 1) as u32;
            let value = image.get_pixel(px, py)[0] as i64;
            m10 += dx as i64 * value;
            m01 += dy as i64 * value;
        }
    }

    (m01 as f32).atan2(m10 as f32)
}

/// Test-point pairs inside a disc of radius `PATTERN_RADIUS`, drawn once
/// from a fixed seed.
fn sampling_pattern() -> &'static [(i8, i8, i8, i8); DESCRIPTOR_BYTES * 8] {
    static PATTERN: OnceLock<[(i8, i8, i8, i8); DESCRIPTOR_BYTES * 8]> = OnceLock::new();

    PATTERN.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let mut point = move || loop {
            let dx = rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
            let dy = rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
            if dx * dx + dy * dy <= PATTERN_RADIUS * PATTERN_RADIUS {
                return (dx as i8, dy as i8);
            }
        };

        let mut pattern = [(0i8, 0i8, 0i8, 0i8); DESCRIPTOR_BYTES * 8];
        for pair in pattern.iter_mut() {
            let (x1, y1) = point();
            let (x2, y2) = loop {
                let p = point();
                if p != (x1, y1) {
                    break p;
                }
            };
            *pair = (x1, y1, x2, y2);
        }
        pattern
    })
}

fn steered_brief(blurred: &GrayImage, cx: f32, cy: f32, angle: f32) -> Descriptor {
    let (width, height) = blurred.dimensions();
    let (s, c) = angle.sin_cos();
    let sample = |dx: i8, dy: i8| {
        let rx = cx + c * dx as f32 - s * dy as f32;
        let ry = cy + s * dx as f32 + c * dy as f32;
        let px = rx.round().clamp(0.0, (width - 1) as f32) as u32;
        let py = ry.round().clamp(0.0, (height - 1) as f32) as u32;
        blurred.get_pixel(px, py)[0]
    };

    let mut descriptor = [0u8; DESCRIPTOR_BYTES];
    for (i, &(x1, y1, x2, y2)) in sampling_pattern().iter().enumerate() {
        let bit = (sample(x1, y1) < sample(x2, y2)) as u8;
        descriptor[i / 8] |= bit << (i % 8);
    }

    descriptor
}
