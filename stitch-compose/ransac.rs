use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use stitch_core::RansacConfig;

/// A model that can be fitted from minimal samples and scored per datum
pub trait Estimator {
    type Datum;
    type Model;

    /// Number of data needed for one minimal fit
    fn sample_size(&self) -> usize;

    /// Reject samples that cannot define a model (e.g. collinear points)
    fn is_valid_sample(&self, data: &[Self::Datum], sample: &[usize]) -> bool;

    fn fit(&self, data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model>;

    /// Non-negative error of one datum under `model`
    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> f64;

    /// Least-squares refit over every inlier; defaults to a minimal-style fit
    fn refit(&self, data: &[Self::Datum], inliers: &[usize]) -> Option<Self::Model> {
        self.fit(data, inliers)
    }
}

/// Best model and the data it explains
#[derive(Debug, Clone)]
pub struct RansacFit<M> {
    pub model: M,
    pub inliers: Vec<usize>,
    pub iterations: usize,
}

/// Random sample consensus with adaptive termination
#[derive(Debug, Clone)]
pub struct Ransac {
    config: RansacConfig,
}

impl Ransac {
    pub fn new(config: RansacConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RansacConfig {
        &self.config
    }

    fn inliers_of<E: Estimator>(&self, estimator: &E, model: &E::Model, data: &[E::Datum]) -> Vec<usize> {
        let threshold = self.config.reprojection_threshold;
        data.iter()
            .enumerate()
            .filter(|(_, d)| estimator.residual(model, d) < threshold)
            .map(|(i, _)| i)
            .collect()
    }

    /// Iterations needed so that an all-inlier sample is drawn with the configured confidence
    pub fn required_iterations(&self, inlier_ratio: f64, sample_size: usize) -> usize {
        let max = self.config.max_iterations;
        if inlier_ratio >= 1.0 {
            return 1;
        }
        let all_inliers = inlier_ratio.powi(sample_size as i32);
        if all_inliers <= f64::EPSILON {
            return max;
        }
        let estimate = ((1.0 - self.config.confidence).ln() / (1.0 - all_inliers).ln()).ceil();
        if estimate.is_finite() && estimate > 0.0 {
            (estimate as usize).min(max)
        } else {
            max
        }
    }

    /// `None` when fewer than `sample_size` data are given or no sample yields a model
    /// with at least `sample_size` inliers
    pub fn run<E: Estimator>(&self, estimator: &E, data: &[E::Datum]) -> Option<RansacFit<E::Model>> {
        let n = data.len();
        let k = estimator.sample_size();
        if n < k || k == 0 {
            return None;
        }

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut best: Option<(E::Model, Vec<usize>)> = None;
        let mut required = self.config.max_iterations;
        let mut iterations = 0;

        while iterations < required {
            iterations += 1;
            let sample = index::sample(&mut rng, n, k).into_vec();
            if !estimator.is_valid_sample(data, &sample) {
                continue;
            }
            let Some(model) = estimator.fit(data, &sample) else {
                continue;
            };

            let inliers = self.inliers_of(estimator, &model, data);
            let improves = best.as_ref().is_none_or(|(_, b)| inliers.len() > b.len());
            if inliers.len() >= k && improves {
                required = required.min(self.required_iterations(inliers.len() as f64 / n as f64, k));
                best = Some((model, inliers));
            }
        }

        let (model, inliers) = best?;

        // Refit on the consensus set; keep it only if it explains at least as much
        if let Some(refined) = estimator.refit(data, &inliers) {
            let refined_inliers = self.inliers_of(estimator, &refined, data);
            if refined_inliers.len() >= inliers.len() {
                return Some(RansacFit { model: refined, inliers: refined_inliers, iterations });
            }
        }
        Some(RansacFit { model, inliers, iterations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// y = a*x + b from (x, y) pairs
    struct LineEstimator;

    impl Estimator for LineEstimator {
        type Datum = (f64, f64);
        type Model = (f64, f64);

        fn sample_size(&self) -> usize {
            2
        }

        fn is_valid_sample(&self, data: &[(f64, f64)], sample: &[usize]) -> bool {
            (data[sample[0]].0 - data[sample[1]].0).abs() > 1e-9
        }

        fn fit(&self, data: &[(f64, f64)], sample: &[usize]) -> Option<(f64, f64)> {
            let (x0, y0) = data[sample[0]];
            let (x1, y1) = data[sample[1]];
            let a = (y1 - y0) / (x1 - x0);
            Some((a, y0 - a * x0))
        }

        fn residual(&self, model: &(f64, f64), d: &(f64, f64)) -> f64 {
            (model.0 * d.0 + model.1 - d.1).abs()
        }
    }

    fn seeded() -> Ransac {
        Ransac::new(RansacConfig { seed: Some(5), ..RansacConfig::default() })
    }

    #[test]
    fn test_line_with_outliers() {
        let mut data: Vec<(f64, f64)> = (0..40).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect();
        data.extend((0..15).map(|i| (i as f64 * 1.7, 500.0 - 13.0 * i as f64)));
        let fit = seeded().run(&LineEstimator, &data).unwrap();
        assert!((fit.model.0 - 2.0).abs() < 1e-9);
        assert!((fit.model.1 - 1.0).abs() < 1e-9);
        assert!(fit.inliers.len() >= 40);
        assert!(fit.iterations < 2000);
    }

    #[test]
    fn test_too_few_data() {
        assert!(seeded().run(&LineEstimator, &[(0.0, 0.0)]).is_none());
    }

    #[test]
    fn test_required_iterations() {
        let ransac = seeded();
        assert_eq!(ransac.required_iterations(1.0, 4), 1);
        assert_eq!(ransac.required_iterations(0.0, 4), 2000);
        let half = ransac.required_iterations(0.5, 4);
        assert!(half > 50 && half < 120, "{}", half);
    }
}
