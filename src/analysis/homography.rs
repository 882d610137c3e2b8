use nalgebra::{DMatrix, Matrix3, Point2, Vector3};

use crate::{
    VerificationConfig,
    analysis::{
        features::Keypoint,
        matching::Match,
        ransac::{Estimator, RansacOptions, ransac},
    },
    error::{Result, VerifyError},
};

pub type Pt2 = Point2<f64>;

/// Projective map from crop coordinates to reference coordinates. Only
/// finite, invertible matrices can be constructed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    matrix: Matrix3<f64>,
}

impl Homography {
    pub fn from_matrix(matrix: Matrix3<f64>) -> Option<Self> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let norm = matrix.norm();
        if norm < f64::EPSILON || (matrix / norm).determinant().abs() < 1e-12 {
            return None;
        }

        let scale = matrix[(2, 2)];
        let matrix = if scale.abs() > 1e-12 {
            matrix / scale
        } else {
            matrix / norm
        };

        Some(Self { matrix })
    }

    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            matrix: Matrix3::new(1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0),
        }
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Row-major copy for persistence.
    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        let m = &self.matrix;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ]
    }

    pub fn inverse(&self) -> Option<Self> {
        self.matrix.try_inverse().and_then(Self::from_matrix)
    }

    /// Homogeneous weight of `p` after projection.
    fn weight(&self, p: &Pt2) -> f64 {
        self.matrix[(2, 0)] * p.x + self.matrix[(2, 1)] * p.y + self.matrix[(2, 2)]
    }

    /// Maps `p`; `None` when it lands on the line at infinity.
    pub fn project(&self, p: &Pt2) -> Option<Pt2> {
        let v = self.matrix * Vector3::new(p.x, p.y, 1.0);
        if v.z.abs() < 1e-12 {
            return None;
        }

        let q = Pt2::new(v.x / v.z, v.y / v.z);
        (q.x.is_finite() && q.y.is_finite()).then_some(q)
    }

    /// Corners `(0,0), (w,0), (w,h), (0,h)` mapped into the reference.
    /// `None` unless every corner stays in front of the projection (`w > 0`).
    pub fn map_rect_corners(&self, width: u32, height: u32) -> Option<[Pt2; 4]> {
        let (w, h) = (width as f64, height as f64);
        let corners = [
            Pt2::new(0.0, 0.0),
            Pt2::new(w, 0.0),
            Pt2::new(w, h),
            Pt2::new(0.0, h),
        ];

        if corners.iter().any(|c| self.weight(c) <= 0.0) {
            return None;
        }

        Some([
            self.project(&corners[0])?,
            self.project(&corners[1])?,
            self.project(&corners[2])?,
            self.project(&corners[3])?,
        ])
    }
}

/// A strictly convex quadrilateral has all edge turns with the same sign.
pub fn is_convex(quad: &[Pt2; 4]) -> bool {
    let mut sign = 0.0f64;

    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let c = quad[(i + 2) % 4];
        let turn = cross(&a, &b, &c);

        if turn.abs() < 1e-9 || !turn.is_finite() {
            return false;
        }
        if sign == 0.0 {
            sign = turn.signum();
        } else if turn.signum() != sign {
            return false;
        }
    }

    true
}

fn cross(a: &Pt2, b: &Pt2, c: &Pt2) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Hartley conditioning: centroid to the origin, mean distance `sqrt(2)`.
fn normalize(points: &[Pt2]) -> Option<(Vec<Pt2>, Matrix3<f64>)> {
    if points.is_empty() {
        return None;
    }

    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    if mean_dist < 1e-12 {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let transform = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = points
        .iter()
        .map(|p| Pt2::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();

    Some((normalized, transform))
}

/// Normalized direct linear transform: `dst ~ H src` over at least four
/// correspondences. Singular configurations yield `None`.
pub fn dlt(src: &[Pt2], dst: &[Pt2]) -> Option<Homography> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return None;
    }

    let (src_n, t_src) = normalize(src)?;
    let (dst_n, t_dst) = normalize(dst)?;

    // At least nine rows so the SVD yields the full right singular basis.
    let mut a = DMatrix::<f64>::zeros((2 * n).max(9), 9);
    for (i, (p, q)) in src_n.iter().zip(dst_n.iter()).enumerate() {
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);
        let r0 = 2 * i;
        let r1 = r0 + 1;

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let h = v_t.row(svd.singular_values.imin());

    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    let t_dst_inv = t_dst.try_inverse()?;

    Homography::from_matrix(t_dst_inv * h_norm * t_src)
}

/// One crop point and the reference point it was matched to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub crop: Pt2,
    pub reference: Pt2,
}

pub fn correspondences(
    matches: &[Match],
    crop: &[Keypoint],
    reference: &[Keypoint],
) -> Vec<Correspondence> {
    matches
        .iter()
        .filter_map(|m| {
            let c = crop.get(m.query_idx)?;
            let r = reference.get(m.train_idx)?;
            Some(Correspondence {
                crop: Pt2::new(c.x as f64, c.y as f64),
                reference: Pt2::new(r.x as f64, r.y as f64),
            })
        })
        .collect()
}

struct HomographyModel;

impl HomographyModel {
    fn points(data: &[Correspondence], indices: &[usize]) -> (Vec<Pt2>, Vec<Pt2>) {
        indices
            .iter()
            .map(|&i| (data[i].crop, data[i].reference))
            .unzip()
    }
}

impl Estimator for HomographyModel {
    type Datum = Correspondence;
    type Model = Homography;

    const SAMPLE_SIZE: usize = 4;

    fn fit(data: &[Correspondence], sample: &[usize]) -> Option<Homography> {
        let (src, dst) = Self::points(data, sample);
        dlt(&src, &dst)
    }

    fn residual(model: &Homography, datum: &Correspondence) -> f64 {
        match model.project(&datum.crop) {
            Some(p) => (p - datum.reference).norm(),
            None => f64::INFINITY,
        }
    }

    /// Rejects samples with three collinear points in either image, or whose
    /// triangle orientations disagree between the two images.
    fn is_degenerate(data: &[Correspondence], sample: &[usize]) -> bool {
        let (src, dst) = Self::points(data, sample);
        let triples = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];

        triples.iter().any(|&(i, j, k)| {
            let s = cross(&src[i], &src[j], &src[k]);
            let d = cross(&dst[i], &dst[j], &dst[k]);
            near_collinear(&src[i], &src[j], &src[k], s)
                || near_collinear(&dst[i], &dst[j], &dst[k], d)
                || s.signum() != d.signum()
        })
    }

    fn refit(data: &[Correspondence], inliers: &[usize]) -> Option<Homography> {
        let (src, dst) = Self::points(data, inliers);
        dlt(&src, &dst)
    }
}

fn near_collinear(a: &Pt2, b: &Pt2, c: &Pt2, cross: f64) -> bool {
    let spread = (b.x - a.x).abs() + (b.y - a.y).abs() + (c.x - a.x).abs() + (c.y - a.y).abs();
    cross.abs() <= f32::EPSILON as f64 * spread
}

#[derive(Debug, Clone)]
pub struct HomographyEstimate {
    pub homography: Homography,
    /// Indices into the match list that support the homography.
    pub inliers: Vec<usize>,
    pub inlier_rms: f64,
    pub iterations: usize,
}

/// Robust crop-to-reference homography fit.
#[derive(Debug, Clone)]
pub struct HomographyEstimator {
    options: RansacOptions,
    min_matches: usize,
}

impl HomographyEstimator {
    pub fn new(options: RansacOptions, min_matches: usize) -> Result<Self> {
        if !(options.threshold > 0.0) {
            return Err(VerifyError::InvalidParameter(
                "reprojection threshold must be positive".into(),
            ));
        }

        if options.max_iterations == 0 {
            return Err(VerifyError::InvalidParameter(
                "RANSAC needs at least one iteration".into(),
            ));
        }

        Ok(Self {
            options: RansacOptions {
                min_inliers: options.min_inliers.max(HomographyModel::SAMPLE_SIZE),
                ..options
            },
            min_matches: min_matches.max(HomographyModel::SAMPLE_SIZE),
        })
    }

    pub fn from_config(config: &VerificationConfig) -> Result<Self> {
        Self::new(
            RansacOptions {
                max_iterations: config.max_iterations,
                threshold: config.reprojection_threshold,
                min_inliers: config.min_inliers,
                confidence: config.confidence,
                seed: config.seed,
            },
            config.min_good_matches,
        )
    }

    pub fn min_matches(&self) -> usize {
        self.min_matches
    }

    /// Fits a homography to the matched keypoints. Fewer than `min_matches`
    /// matches skips the fit entirely; no consensus yields `None`.
    pub fn estimate(
        &self,
        matches: &[Match],
        crop: &[Keypoint],
        reference: &[Keypoint],
    ) -> Option<HomographyEstimate> {
        if matches.len() < self.min_matches {
            return None;
        }

        let data = correspondences(matches, crop, reference);
        let consensus = ransac::<HomographyModel>(&data, &self.options);

        log::debug!(
            "homography consensus: {} of {} inliers after {} iterations",
            consensus.inliers.len(),
            data.len(),
            consensus.iterations
        );

        Some(HomographyEstimate {
            homography: consensus.model?,
            inliers: consensus.inliers,
            inlier_rms: consensus.inlier_rms,
            iterations: consensus.iterations,
        })
    }
}
