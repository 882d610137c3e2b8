//! Seeded random-sample-consensus loop.
//!
//! A model type plugs in through [`Estimator`]. Failed or degenerate trials
//! are dropped and sampling continues, so the loop never errors: when no
//! model gathers enough support the returned [`Consensus`] has no model.

use rand::{SeedableRng, rngs::StdRng, seq::IndexedRandom};

#[derive(Debug, Clone)]
pub struct RansacOptions {
    /// Hard cap on sampling rounds.
    pub max_iterations: usize,
    /// Residual at or below which a datum supports a model.
    pub threshold: f64,
    /// Smallest support set accepted as a consensus.
    pub min_inliers: usize,
    /// Probability of having drawn one all-inlier sample, used to stop early.
    pub confidence: f64,
    pub seed: u64,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            threshold: 5.0,
            min_inliers: 10,
            confidence: 0.995,
            seed: 0x5eed_cafe,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Consensus<M> {
    pub model: Option<M>,
    /// Indices of the supporting data, ascending.
    pub inliers: Vec<usize>,
    pub inlier_rms: f64,
    /// Rounds actually drawn.
    pub iterations: usize,
}

impl<M> Default for Consensus<M> {
    fn default() -> Self {
        Self {
            model: None,
            inliers: Vec::new(),
            inlier_rms: f64::INFINITY,
            iterations: 0,
        }
    }
}

pub trait Estimator {
    type Datum;
    type Model;

    /// Size of a minimal sample.
    const SAMPLE_SIZE: usize;

    /// Fits a model to the sampled data; `None` for a singular trial.
    fn fit(data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model>;

    /// Non-negative error of one datum under `model`.
    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64;

    fn is_degenerate(_data: &[Self::Datum], _sample: &[usize]) -> bool {
        false
    }

    /// Least-squares refit over a support set.
    fn refit(_data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

fn support<E: Estimator>(model: &E::Model, data: &[E::Datum], threshold: f64) -> (Vec<usize>, f64) {
    let mut inliers = Vec::new();
    let mut squared = 0.0;

    for (i, datum) in data.iter().enumerate() {
        let r = E::residual(model, datum);
        if r <= threshold {
            inliers.push(i);
            squared += r * r;
        }
    }

    let rms = if inliers.is_empty() {
        f64::INFINITY
    } else {
        (squared / inliers.len() as f64).sqrt()
    };

    (inliers, rms)
}

/// Rounds needed to draw one clean sample with probability `confidence`.
fn required_iterations(confidence: f64, inlier_ratio: f64, sample_size: usize, cap: usize) -> usize {
    if confidence <= 0.0 || inlier_ratio <= 0.0 {
        return cap;
    }

    let denom = (1.0 - inlier_ratio.powi(sample_size as i32)).max(1e-12).ln();
    if denom >= 0.0 {
        return cap;
    }

    let needed = ((1.0 - confidence).ln() / denom).ceil();
    if needed.is_finite() && needed >= 0.0 {
        (needed as usize).min(cap)
    } else {
        cap
    }
}

/// Runs the consensus loop. The first model reaching the largest support
/// wins; equal support is broken by lower RMS.
pub fn ransac<E: Estimator>(data: &[E::Datum], opts: &RansacOptions) -> Consensus<E::Model> {
    let mut best = Consensus::default();

    if data.len() < E::SAMPLE_SIZE {
        return best;
    }

    let indices: Vec<usize> = (0..data.len()).collect();
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut budget = opts.max_iterations;
    let mut sample = Vec::with_capacity(E::SAMPLE_SIZE);
    let mut iterations = 0;

    while iterations < budget {
        iterations += 1;

        sample.clear();
        sample.extend(indices.choose_multiple(&mut rng, E::SAMPLE_SIZE).copied());

        if E::is_degenerate(data, &sample) {
            continue;
        }

        let Some(model) = E::fit(data, &sample) else {
            continue;
        };

        let (inliers, rms) = support::<E>(&model, data, opts.threshold);
        if inliers.len() < opts.min_inliers {
            continue;
        }

        let (model, inliers, rms) = match E::refit(data, &inliers) {
            Some(refined) => {
                let (refined_inliers, refined_rms) = support::<E>(&refined, data, opts.threshold);
                if refined_inliers.len() >= inliers.len() {
                    (refined, refined_inliers, refined_rms)
                } else {
                    (model, inliers, rms)
                }
            }
            None => (model, inliers, rms),
        };

        let better = best.model.is_none()
            || inliers.len() > best.inliers.len()
            || (inliers.len() == best.inliers.len() && rms < best.inlier_rms);

        if better {
            let ratio = inliers.len() as f64 / data.len() as f64;
            best.model = Some(model);
            best.inliers = inliers;
            best.inlier_rms = rms;

            budget = required_iterations(opts.confidence, ratio, E::SAMPLE_SIZE, opts.max_iterations)
                .max(iterations);
        }
    }

    best.iterations = iterations;

    if best.model.is_none() {
        log::warn!(
            "no consensus among {} correspondences after {} iterations",
            data.len(),
            iterations
        );
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    /// y = a x + b
    struct LineEstimator;

    impl Estimator for LineEstimator {
        type Datum = (f64, f64);
        type Model = (f64, f64);

        const SAMPLE_SIZE: usize = 2;

        fn fit(data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model> {
            let (x0, y0) = data[sample[0]];
            let (x1, y1) = data[sample[1]];
            if (x1 - x0).abs() < 1e-9 {
                return None;
            }
            let a = (y1 - y0) / (x1 - x0);
            Some((a, y0 - a * x0))
        }

        fn residual(model: &Self::Model, datum: &Self::Datum) -> f64 {
            (model.0 * datum.0 + model.1 - datum.1).abs()
        }
    }

    fn options() -> RansacOptions {
        RansacOptions {
            max_iterations: 300,
            threshold: 0.1,
            min_inliers: 5,
            confidence: 0.99,
            seed: 7,
        }
    }

    #[test]
    fn test_too_little_data_has_no_model() {
        let consensus = ransac::<LineEstimator>(&[(1.0, 1.0)], &options());
        assert!(consensus.model.is_none());
        assert_eq!(consensus.iterations, 0);
    }

    #[test]
    fn test_line_is_recovered_despite_outliers() {
        let mut data: Vec<(f64, f64)> = (0..12).map(|i| (i as f64, 3.0 * i as f64 - 2.0)).collect();
        data.extend([(2.0, 40.0), (5.0, -9.0), (7.0, 3.0), (9.0, 100.0)]);

        let consensus = ransac::<LineEstimator>(&data, &options());
        let (a, b) = consensus.model.expect("line should be found");

        assert!((a - 3.0).abs() < 1e-9);
        assert!((b + 2.0).abs() < 1e-9);
        assert_eq!(consensus.inliers, (0..12).collect::<Vec<_>>());
        assert!(consensus.iterations <= 300);
    }

    #[test]
    fn test_vertical_data_never_fits() {
        let data: Vec<(f64, f64)> = (0..10).map(|i| (1.0, i as f64)).collect();
        let consensus = ransac::<LineEstimator>(&data, &options());

        assert!(consensus.model.is_none());
        assert_eq!(consensus.iterations, 300);
    }

    #[test]
    fn test_same_seed_same_consensus() {
        let data: Vec<(f64, f64)> = (0..30)
            .map(|i| (i as f64, if i % 3 == 0 { 50.0 - i as f64 } else { 0.5 * i as f64 }))
            .collect();

        let a = ransac::<LineEstimator>(&data, &options());
        let b = ransac::<LineEstimator>(&data, &options());

        assert_eq!(a.inliers, b.inliers);
        assert_eq!(a.iterations, b.iterations);
        assert_eq!(a.model, b.model);
    }

    #[test]
    fn test_iteration_bound_shrinks_with_inlier_ratio() {
        assert_eq!(required_iterations(0.99, 1.0, 4, 2000), 1);
        let half = required_iterations(0.99, 0.5, 4, 2000);
        let tenth = required_iterations(0.99, 0.1, 4, 2000);
        assert!(half < tenth);
        assert_eq!(tenth, 2000);
    }
}
