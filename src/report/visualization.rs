use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use serde::{Deserialize, Serialize};

use crate::analysis::homography::Pt2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualizationConfig {
    pub stroke_color: [u8; 3],
    pub stroke_width: u32,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            stroke_color: [0, 255, 0],
            stroke_width: 3,
        }
    }
}

/// Draws the crop footprint onto a copy of the reference image.
pub struct Visualizer {
    config: VisualizationConfig,
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Visualizer {
    pub fn new() -> Self {
        Self {
            config: VisualizationConfig::default(),
        }
    }

    pub fn with_config(config: VisualizationConfig) -> Self {
        Self { config }
    }

    /// Closed polyline through `quad`, drawn with the configured stroke.
    pub fn draw_footprint(&self, reference: &RgbImage, quad: &[Pt2; 4]) -> RgbImage {
        let mut vis = reference.clone();
        let color = Rgb(self.config.stroke_color);

        for i in 0..4 {
            self.draw_thick_line(&mut vis, &quad[i], &quad[(i + 1) % 4], color);
        }

        vis
    }

    fn draw_thick_line(&self, image: &mut RgbImage, a: &Pt2, b: &Pt2, color: Rgb<u8>) {
        let (width, height) = image.dimensions();
        let half = (self.config.stroke_width.max(1) - 1) as i32 / 2;
        let extra = self.config.stroke_width.max(1) as i32 - 1 - 2 * half;
        let margin = (half + extra + 1) as f64;

        let Some((start, end)) = clip_segment(
            a,
            b,
            -margin,
            -margin,
            width as f64 + margin,
            height as f64 + margin,
        ) else {
            return;
        };

        for dy in -half..=half + extra {
            for dx in -half..=half + extra {
                draw_line_segment_mut(
                    image,
                    ((start.x + dx as f64) as f32, (start.y + dy as f64) as f32),
                    ((end.x + dx as f64) as f32, (end.y + dy as f64) as f32),
                    color,
                );
            }
        }
    }
}

/// Liang-Barsky clipping of segment `a`-`b` to an axis-aligned box.
fn clip_segment(a: &Pt2, b: &Pt2, x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Option<(Pt2, Pt2)> {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;

    for (p, q) in [
        (-dx, a.x - x_min),
        (dx, x_max - a.x),
        (-dy, a.y - y_min),
        (dy, y_max - a.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }

        let t = q / p;
        if p < 0.0 {
            if t > t1 {
                return None;
            }
            t0 = t0.max(t);
        } else {
            if t < t0 {
                return None;
            }
            t1 = t1.min(t);
        }
    }

    Some((
        Pt2::new(a.x + t0 * dx, a.y + t0 * dy),
        Pt2::new(a.x + t1 * dx, a.y + t1 * dy),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64, y: f64, size: f64) -> [Pt2; 4] {
        [
            Pt2::new(x, y),
            Pt2::new(x + size, y),
            Pt2::new(x + size, y + size),
            Pt2::new(x, y + size),
        ]
    }

    #[test]
    fn test_footprint_is_drawn_on_a_copy() {
        let reference = RgbImage::from_pixel(100, 80, Rgb([10, 10, 10]));
        let vis = Visualizer::new().draw_footprint(&reference, &square(20.0, 20.0, 30.0));

        assert_eq!(reference.get_pixel(20, 20), &Rgb([10, 10, 10]));
        assert_eq!(vis.get_pixel(35, 20), &Rgb([0, 255, 0]));
        assert_eq!(vis.get_pixel(50, 35), &Rgb([0, 255, 0]));
        assert_eq!(vis.get_pixel(35, 35), &Rgb([10, 10, 10]));
    }

    #[test]
    fn test_stroke_width_and_color_follow_config() {
        let reference = RgbImage::new(60, 60);
        let config = VisualizationConfig {
            stroke_color: [255, 0, 0],
            stroke_width: 5,
        };
        let vis = Visualizer::with_config(config).draw_footprint(&reference, &square(10.0, 10.0, 40.0));

        assert_eq!(vis.get_pixel(30, 8), &Rgb([255, 0, 0]));
        assert_eq!(vis.get_pixel(30, 12), &Rgb([255, 0, 0]));
        assert_eq!(vis.get_pixel(30, 14), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_far_away_footprint_leaves_image_untouched() {
        let reference = RgbImage::new(40, 40);
        let vis = Visualizer::new().draw_footprint(&reference, &square(1e7, 1e7, 5.0));
        assert_eq!(vis, reference);
    }

    #[test]
    fn test_huge_footprint_is_clipped() {
        let reference = RgbImage::new(40, 40);
        let quad = [
            Pt2::new(-1e9, 20.0),
            Pt2::new(1e9, 20.0),
            Pt2::new(1e9, 1e9),
            Pt2::new(-1e9, 1e9),
        ];
        let vis = Visualizer::new().draw_footprint(&reference, &quad);
        assert_eq!(vis.get_pixel(5, 20), &Rgb([0, 255, 0]));
    }

    #[test]
    fn test_clip_segment() {
        let clipped = clip_segment(&Pt2::new(-10.0, 5.0), &Pt2::new(20.0, 5.0), 0.0, 0.0, 10.0, 10.0);
        let (a, b) = clipped.unwrap();
        assert!((a - Pt2::new(0.0, 5.0)).norm() < 1e-9);
        assert!((b - Pt2::new(10.0, 5.0)).norm() < 1e-9);

        assert!(clip_segment(&Pt2::new(-5.0, -5.0), &Pt2::new(-1.0, 20.0), 0.0, 0.0, 10.0, 10.0).is_none());
    }
}
