use std::path::Path;

use image::{
    GrayImage, Luma, RgbImage,
    imageops::{self, FilterType},
};

use crate::error::{ImageRole, Result, VerifyError};

/// Decodes `path` as a colour image, tagging failures with the input's role.
pub fn load_rgb<P: AsRef<Path>>(path: P, role: ImageRole) -> Result<RgbImage> {
    let path = path.as_ref();
    let image = image::open(path).map_err(|source| VerifyError::Load {
        role,
        path: path.to_path_buf(),
        source,
    })?;

    Ok(image.to_rgb8())
}

pub fn rgb_to_gray(image: &RgbImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut gray = GrayImage::new(width, height);

    for (x, y, pixel) in image.enumerate_pixels() {
        let lum =
            (0.299 * pixel[0] as f64 + 0.587 * pixel[1] as f64 + 0.114 * pixel[2] as f64) as u8;
        gray.put_pixel(x, y, Luma([lum]));
    }

    gray
}

/// One level of a scale pyramid: the resampled image and its scale relative
/// to the base image (`base = level * scale`).
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    pub octave: u8,
    pub scale: f32,
    pub image: GrayImage,
}

/// Builds up to `levels` progressively smaller copies of `base`, stopping
/// early once a level would be smaller than `min_side` pixels.
pub fn build_pyramid(
    base: &GrayImage,
    levels: u8,
    scale_factor: f32,
    min_side: u32,
) -> Vec<PyramidLevel> {
    let (width, height) = base.dimensions();
    let mut pyramid = Vec::with_capacity(levels as usize);
    let mut scale = 1.0f32;

    for octave in 0..levels {
        let w = (width as f32 / scale).round() as u32;
        let h = (height as f32 / scale).round() as u32;

        if w < min_side || h < min_side {
            break;
        }

        let image = if octave == 0 {
            base.clone()
        } else {
            imageops::resize(base, w, h, FilterType::Triangle)
        };

        pyramid.push(PyramidLevel {
            octave,
            scale,
            image,
        });

        scale *= scale_factor;
    }

    pyramid
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_rgb_to_gray_uses_luma_weights() {
        let mut rgb = RgbImage::new(2, 1);
        rgb.put_pixel(0, 0, Rgb([0, 0, 0]));
        rgb.put_pixel(1, 0, Rgb([0, 255, 0]));

        let gray = rgb_to_gray(&rgb);
        assert_eq!(gray.get_pixel(0, 0)[0], 0);
        assert_eq!(gray.get_pixel(1, 0)[0], 149);
    }

    #[test]
    fn test_pyramid_stops_at_min_side() {
        let base = GrayImage::new(100, 80);
        let pyramid = build_pyramid(&base, 8, 2.0, 30);

        assert_eq!(pyramid.len(), 2);
        assert_eq!(pyramid[0].image.dimensions(), (100, 80));
        assert_eq!(pyramid[1].image.dimensions(), (50, 40));
        assert_eq!(pyramid[1].scale, 2.0);
    }

    #[test]
    fn test_pyramid_of_tiny_image_is_empty() {
        let base = GrayImage::new(10, 10);
        assert!(build_pyramid(&base, 3, 1.2, 33).is_empty());
    }
}
