use std::path::Path;

use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::{
    analysis::homography::{Homography, Pt2},
    detection::{Stage, Verdict, VerificationLog, crop::CropDetector},
    error::{ImageRole, Result, VerifyError},
    image_utils::load_rgb,
    report::visualization::VisualizationConfig,
};

pub mod analysis;
pub mod detection;
pub mod error;
pub mod image_utils;
pub mod report;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub max_features: usize,
    pub fast_threshold: u8,
    pub pyramid_levels: u8,
    pub scale_factor: f32,
    pub ratio_threshold: f32,
    pub min_good_matches: usize,
    pub reprojection_threshold: f64,
    pub min_inliers: usize,
    pub max_iterations: usize,
    pub confidence: f64,
    pub seed: u64,
    pub parallel: bool,
    pub overlay: VisualizationConfig,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_features: 5000,
            fast_threshold: 20,
            pyramid_levels: 3,
            scale_factor: 1.2,
            ratio_threshold: 0.75,
            min_good_matches: 10,
            reprojection_threshold: 5.0,
            min_inliers: 10,
            max_iterations: 2000,
            confidence: 0.995,
            seed: 0x5eed_cafe,
            parallel: false,
            overlay: VisualizationConfig::default(),
        }
    }
}

impl VerificationConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(VerifyError::InvalidParameter(msg.into()));

        if self.max_features == 0 {
            return invalid("max_features must be at least 1");
        }
        if self.pyramid_levels == 0 {
            return invalid("pyramid_levels must be at least 1");
        }
        if !(self.scale_factor > 1.0 && self.scale_factor.is_finite()) {
            return invalid("scale_factor must be greater than 1");
        }
        if !(self.ratio_threshold > 0.0 && self.ratio_threshold <= 1.0) {
            return invalid("ratio_threshold must lie in (0, 1]");
        }
        if self.min_good_matches < 4 {
            return invalid("min_good_matches must be at least 4");
        }
        if !(self.reprojection_threshold > 0.0 && self.reprojection_threshold.is_finite()) {
            return invalid("reprojection_threshold must be a positive number of pixels");
        }
        if self.max_iterations == 0 {
            return invalid("max_iterations must be at least 1");
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return invalid("confidence must lie in (0, 1)");
        }
        if self.overlay.stroke_width == 0 {
            return invalid("overlay stroke_width must be at least 1");
        }

        Ok(())
    }

    /// Parses a config; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Entry point for checking whether a crop was cut out of a reference image.
pub struct CropVerifier {
    config: VerificationConfig,
}

impl Default for CropVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CropVerifier {
    pub fn new() -> Self {
        Self {
            config: VerificationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: VerificationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Loads both files and runs the pipeline. Only unreadable inputs or an
    /// invalid config produce an error; a negative verdict is a normal result.
    pub fn verify<P, Q>(&self, reference: P, crop: Q) -> Result<VerificationResult>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let detector = self.detector()?;
        let reference = load_rgb(reference, ImageRole::Reference)?;
        let crop = load_rgb(crop, ImageRole::Crop)?;

        Ok(detector.detect(reference, crop))
    }

    /// Same pipeline on already decoded images.
    pub fn verify_images(&self, reference: &DynamicImage, crop: &DynamicImage) -> Result<VerificationResult> {
        let detector = self.detector()?;
        Ok(detector.detect(reference.to_rgb8(), crop.to_rgb8()))
    }

    fn detector(&self) -> Result<CropDetector> {
        self.config.validate()?;
        CropDetector::new(&self.config)
    }
}

/// Verifies `crop` against `reference` with the default configuration.
pub fn verify<P: AsRef<Path>, Q: AsRef<Path>>(reference: P, crop: Q) -> Result<VerificationResult> {
    CropVerifier::new().verify(reference, crop)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStats {
    pub reference_keypoints: usize,
    pub crop_keypoints: usize,
    pub candidate_matches: usize,
    pub good_matches: usize,
    pub inliers: usize,
}

/// Where the crop sits inside the reference. Present only for a positive verdict.
#[derive(Debug, Clone)]
pub struct Localization {
    /// Maps crop pixel coordinates to reference pixel coordinates.
    pub homography: Homography,
    /// Crop corners in the reference, clockwise from top-left.
    pub footprint: [Pt2; 4],
    pub overlay: RgbImage,
    pub inlier_rms: f64,
}

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub log: VerificationLog,
    pub verdict: Verdict,
    /// Last stage the pipeline completed.
    pub stage: Stage,
    pub stats: MatchStats,
    pub localization: Option<Localization>,
    pub reference: RgbImage,
    pub crop: RgbImage,
}

impl VerificationResult {
    pub fn belongs(&self) -> bool {
        self.verdict.belongs()
    }

    pub fn homography(&self) -> Option<&Homography> {
        self.localization.as_ref().map(|l| &l.homography)
    }

    pub fn overlay(&self) -> Option<&RgbImage> {
        self.localization.as_ref().map(|l| &l.overlay)
    }

    /// Writes the overlay if there is one; returns whether a file was written.
    pub fn save_overlay<P: AsRef<Path>>(&self, path: P) -> Result<bool> {
        match self.overlay() {
            Some(overlay) => {
                overlay.save(path)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
