use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use stitch_core::{Homography, Keypoint, Match, RansacConfig, SessionConfig, StitchError, StitchResult};

use crate::ransac::{Estimator, Ransac};

/// Minimum correspondences for a projective fit
pub const MIN_CORRESPONDENCES: usize = 4;

/// Twice the triangle area below which three points count as collinear (px^2)
const COLLINEAR_AREA: f64 = 1e-3;

/// A correspondence `src` (image being added) -> `dst` (reference frame)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointPair {
    pub src: (f64, f64),
    pub dst: (f64, f64),
}

impl PointPair {
    pub fn new(src: (f64, f64), dst: (f64, f64)) -> Self {
        Self { src, dst }
    }
}

/// Homography plus the indices of the supporting correspondences
#[derive(Debug, Clone)]
pub struct HomographyFit {
    pub homography: Homography,
    pub inliers: Vec<usize>,
}

/// Similarity transform moving the centroid to the origin with mean distance sqrt(2)
fn normalizer(points: &[(f64, f64)]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let (cx, cy) = points.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.0, sy + p.1));
    let (cx, cy) = (cx / n, cy / n);
    let mean_dist = points.iter().map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()).sum::<f64>() / n;
    if mean_dist < 1e-12 || !mean_dist.is_finite() {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

fn transform(m: &Matrix3<f64>, p: (f64, f64)) -> (f64, f64) {
    let v = m * Vector3::new(p.0, p.1, 1.0);
    (v[0] / v[2], v[1] / v[2])
}

/// Undo normalisation and scale so that h33 = 1 when possible
fn denormalize(hn: Matrix3<f64>, t_src: &Matrix3<f64>, t_dst: &Matrix3<f64>) -> Option<Homography> {
    let h = t_dst.try_inverse()? * hn * t_src;
    let h33 = h[(2, 2)];
    let h = if h33.abs() > 1e-12 { h / h33 } else { h / h.amax() };
    Homography::from_matrix(h)
}

/// Exact fit through four correspondences with h33 fixed to 1
fn solve_four(pairs: &[PointPair]) -> Option<Homography> {
    let src: Vec<(f64, f64)> = pairs.iter().map(|p| p.src).collect();
    let dst: Vec<(f64, f64)> = pairs.iter().map(|p| p.dst).collect();
    let t_src = normalizer(&src)?;
    let t_dst = normalizer(&dst)?;

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (i, pair) in pairs.iter().take(4).enumerate() {
        let (x, y) = transform(&t_src, pair.src);
        let (u, v) = transform(&t_dst, pair.dst);
        let r = 2 * i;
        a.row_mut(r).copy_from_slice(&[x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y]);
        a.row_mut(r + 1).copy_from_slice(&[0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y]);
        b[r] = u;
        b[r + 1] = v;
    }

    let h = a.lu().solve(&b)?;
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
    denormalize(hn, &t_src, &t_dst)
}

/// Normalised direct linear transform over any number (>= 4) of correspondences
pub fn fit_dlt(pairs: &[PointPair]) -> Option<Homography> {
    if pairs.len() < MIN_CORRESPONDENCES {
        return None;
    }
    let src: Vec<(f64, f64)> = pairs.iter().map(|p| p.src).collect();
    let dst: Vec<(f64, f64)> = pairs.iter().map(|p| p.dst).collect();
    let t_src = normalizer(&src)?;
    let t_dst = normalizer(&dst)?;

    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for pair in pairs {
        let (x, y) = transform(&t_src, pair.src);
        let (u, v) = transform(&t_dst, pair.dst);
        let rows = [
            SVector::<f64, 9>::from_row_slice(&[-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u]),
            SVector::<f64, 9>::from_row_slice(&[0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]),
        ];
        for r in &rows {
            ata += r * r.transpose();
        }
    }

    let eigen = ata.symmetric_eigen();
    let (min_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = eigen.eigenvectors.column(min_idx);
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    denormalize(hn, &t_src, &t_dst)
}

fn collinear(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> bool {
    ((b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)).abs() < COLLINEAR_AREA
}

fn any_three_collinear(points: &[(f64, f64)]) -> bool {
    let n = points.len();
    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                if collinear(points[i], points[j], points[k]) {
                    return true;
                }
            }
        }
    }
    false
}

/// Projective model over point pairs, scored by reprojection error in the destination frame
pub struct HomographyModel;

impl Estimator for HomographyModel {
    type Datum = PointPair;
    type Model = Homography;

    fn sample_size(&self) -> usize {
        MIN_CORRESPONDENCES
    }

    fn is_valid_sample(&self, data: &[PointPair], sample: &[usize]) -> bool {
        let src: Vec<(f64, f64)> = sample.iter().map(|&i| data[i].src).collect();
        let dst: Vec<(f64, f64)> = sample.iter().map(|&i| data[i].dst).collect();
        !any_three_collinear(&src) && !any_three_collinear(&dst)
    }

    fn fit(&self, data: &[PointPair], sample: &[usize]) -> Option<Homography> {
        let pairs: Vec<PointPair> = sample.iter().map(|&i| data[i]).collect();
        solve_four(&pairs)
    }

    fn residual(&self, model: &Homography, datum: &PointPair) -> f64 {
        match model.apply(datum.src.0, datum.src.1) {
            Some((u, v)) => ((u - datum.dst.0).powi(2) + (v - datum.dst.1).powi(2)).sqrt(),
            None => f64::INFINITY,
        }
    }

    fn refit(&self, data: &[PointPair], inliers: &[usize]) -> Option<Homography> {
        let pairs: Vec<PointPair> = inliers.iter().map(|&i| data[i]).collect();
        fit_dlt(&pairs)
    }
}

/// Robust planar transform from matched keypoints
#[derive(Debug, Clone)]
pub struct HomographyEstimator {
    ransac: Ransac,
}

impl HomographyEstimator {
    pub fn new(config: RansacConfig) -> Self {
        Self { ransac: Ransac::new(config) }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.ransac.clone())
    }

    /// Transform mapping `src` keypoints (match query side) onto `dst` keypoints (train side).
    /// `None` below four matches or when no consistent transform exists.
    pub fn estimate(&self, src: &[Keypoint], dst: &[Keypoint], matches: &[Match]) -> Option<Homography> {
        self.estimate_fit(src, dst, matches).ok().map(|fit| fit.homography)
    }

    pub fn estimate_fit(&self, src: &[Keypoint], dst: &[Keypoint], matches: &[Match]) -> StitchResult<HomographyFit> {
        let pairs: Vec<PointPair> = matches
            .iter()
            .filter_map(|m| {
                let a = src.get(m.query_idx)?;
                let b = dst.get(m.train_idx)?;
                Some(PointPair::new((a.x as f64, a.y as f64), (b.x as f64, b.y as f64)))
            })
            .collect();
        self.estimate_from_pairs(&pairs)
    }

    pub fn estimate_from_pairs(&self, pairs: &[PointPair]) -> StitchResult<HomographyFit> {
        if pairs.len() < MIN_CORRESPONDENCES {
            return Err(StitchError::InsufficientMatches { found: pairs.len(), required: MIN_CORRESPONDENCES });
        }

        let fit = self
            .ransac
            .run(&HomographyModel, pairs)
            .ok_or_else(|| StitchError::HomographyFailure(format!("no consistent transform from {} correspondences", pairs.len())))?;

        if fit.inliers.len() < MIN_CORRESPONDENCES {
            return Err(StitchError::HomographyFailure(format!("only {} inliers", fit.inliers.len())));
        }

        log::debug!(
            "homography: {} of {} correspondences are inliers after {} iterations",
            fit.inliers.len(),
            pairs.len(),
            fit.iterations
        );
        Ok(HomographyFit { homography: fit.model, inliers: fit.inliers })
    }
}

impl Default for HomographyEstimator {
    fn default() -> Self {
        Self::new(RansacConfig::default())
    }
}
