use image::RgbImage;

use crate::{
    Localization, MatchStats, VerificationConfig, VerificationResult,
    analysis::{
        features::FeatureExtractor,
        homography::{HomographyEstimator, is_convex},
        matching::DescriptorMatcher,
    },
    detection::{RejectReason, Stage, Verdict, VerificationLog},
    error::Result,
    image_utils::rgb_to_gray,
    report::visualization::Visualizer,
};

/// Runs the verification stages in order and halts at the first one that
/// fails, always producing a complete log.
pub struct CropDetector {
    extractor: FeatureExtractor,
    matcher: DescriptorMatcher,
    estimator: HomographyEstimator,
    visualizer: Visualizer,
}

/// Per-call state threaded through the stages.
struct Run {
    log: VerificationLog,
    stage: Stage,
    stats: MatchStats,
}

impl Run {
    fn reject(mut self, reason: RejectReason, reference: RgbImage, crop: RgbImage) -> VerificationResult {
        self.log.push(format!("Reason: {reason}."));
        self.log
            .push("RESULT: the crop DOES NOT BELONG to the reference image.");

        let verdict = Verdict::DoesNotBelong(reason);
        log::info!("verdict {verdict} at stage {:?}", self.stage);

        VerificationResult {
            log: self.log,
            verdict,
            stage: self.stage,
            stats: self.stats,
            localization: None,
            reference,
            crop,
        }
    }
}

impl CropDetector {
    pub fn new(config: &VerificationConfig) -> Result<Self> {
        Ok(Self {
            extractor: FeatureExtractor::from_config(config)?,
            matcher: DescriptorMatcher::from_config(config)?,
            estimator: HomographyEstimator::from_config(config)?,
            visualizer: Visualizer::with_config(config.overlay),
        })
    }

    pub fn detect(&self, reference: RgbImage, crop: RgbImage) -> VerificationResult {
        let mut run = Run {
            log: VerificationLog::new(),
            stage: Stage::ImagesLoaded,
            stats: MatchStats::default(),
        };

        run.log.push(format!(
            "Reference image: {}x{}, crop image: {}x{}",
            reference.width(),
            reference.height(),
            crop.width(),
            crop.height()
        ));

        let ref_features = self.extractor.extract(&rgb_to_gray(&reference));
        let crop_features = self.extractor.extract(&rgb_to_gray(&crop));
        run.stats.reference_keypoints = ref_features.len();
        run.stats.crop_keypoints = crop_features.len();
        run.log.push(format!("Reference keypoints: {}", ref_features.len()));
        run.log.push(format!("Crop keypoints: {}", crop_features.len()));

        if ref_features.is_empty() || crop_features.is_empty() {
            run.log.push("Candidate matches: 0");
            run.log.push("Good matches: 0");
            run.log
                .push("No features found (images too uniform).");
            return run.reject(RejectReason::InsufficientFeatures, reference, crop);
        }
        run.stage = Stage::FeaturesExtracted;

        let outcome = self
            .matcher
            .match_descriptors(&crop_features.descriptors, &ref_features.descriptors);
        run.stats.candidate_matches = outcome.candidates;
        run.stats.good_matches = outcome.good.len();
        run.log.push(format!("Candidate matches: {}", outcome.candidates));
        run.log.push(format!(
            "Good matches: {} (ratio test {:.2})",
            outcome.good.len(),
            self.matcher.ratio()
        ));

        let required = self.estimator.min_matches();
        if outcome.good.len() < required {
            let reason = RejectReason::InsufficientMatches {
                good: outcome.good.len(),
                required,
            };
            return run.reject(reason, reference, crop);
        }
        run.stage = Stage::Matched;

        let Some(estimate) = self.estimator.estimate(
            &outcome.good,
            &crop_features.keypoints,
            &ref_features.keypoints,
        ) else {
            run.log.push("Homography not found.");
            return run.reject(RejectReason::HomographyNotFound, reference, crop);
        };
        run.stats.inliers = estimate.inliers.len();

        let footprint = estimate
            .homography
            .map_rect_corners(crop.width(), crop.height())
            .filter(is_convex);
        let Some(footprint) = footprint else {
            run.log.push(format!(
                "Homography rejected: the crop outline maps to a degenerate shape ({} inliers).",
                estimate.inliers.len()
            ));
            return run.reject(RejectReason::HomographyNotFound, reference, crop);
        };
        run.stage = Stage::Estimated;

        run.log.push(format!(
            "Valid homography: {} inliers of {} good matches, rms {:.2} px.",
            estimate.inliers.len(),
            outcome.good.len(),
            estimate.inlier_rms
        ));
        run.log.push(format!(
            "Crop footprint: ({:.1}, {:.1}) ({:.1}, {:.1}) ({:.1}, {:.1}) ({:.1}, {:.1})",
            footprint[0].x,
            footprint[0].y,
            footprint[1].x,
            footprint[1].y,
            footprint[2].x,
            footprint[2].y,
            footprint[3].x,
            footprint[3].y
        ));

        let overlay = self.visualizer.draw_footprint(&reference, &footprint);
        run.stage = Stage::Confirmed;
        run.log
            .push("RESULT: the crop BELONGS to the reference image.");
        log::info!(
            "verdict BELONGS with {} inliers after {} iterations",
            estimate.inliers.len(),
            estimate.iterations
        );

        VerificationResult {
            log: run.log,
            verdict: Verdict::Belongs,
            stage: run.stage,
            stats: run.stats,
            localization: Some(Localization {
                homography: estimate.homography,
                footprint,
                overlay,
                inlier_rms: estimate.inlier_rms,
            }),
            reference,
            crop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_uniform_images_halt_after_loading() {
        let detector = CropDetector::new(&VerificationConfig::default()).unwrap();
        let reference = RgbImage::from_pixel(200, 150, Rgb([90, 120, 30]));
        let crop = RgbImage::from_pixel(60, 60, Rgb([90, 120, 30]));

        let result = detector.detect(reference, crop);

        assert_eq!(
            result.verdict,
            Verdict::DoesNotBelong(RejectReason::InsufficientFeatures)
        );
        assert_eq!(result.stage, Stage::ImagesLoaded);
        assert!(result.localization.is_none());
        assert!(result.log.contains("Candidate matches: 0"));
        assert!(result.log.contains("Good matches: 0"));
        assert!(result.log.lines().last().unwrap().starts_with("RESULT"));
        assert_eq!(result.crop.dimensions(), (60, 60));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = VerificationConfig {
            ratio_threshold: 2.0,
            ..VerificationConfig::default()
        };
        assert!(CropDetector::new(&config).is_err());
    }
}
