pub mod builder;
pub mod config;
pub mod error;

use nalgebra::{Matrix3, Vector3};

pub use builder::SessionConfigBuilder;
pub use config::{DetectorKind, PreprocessConfig, RansacConfig, SessionConfig};
pub use error::{StitchError, StitchResult};

/// Dense 3-channel 8-bit raster, row-major
pub type RasterImage = image::RgbImage;

/// Single-channel luminance raster
pub type GrayImage = image::GrayImage;

/// Detected keypoint in base-image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Dominant orientation in radians
    pub angle: f32,
    /// Detection scale relative to the base image (1.0 = full resolution)
    pub scale: f32,
    pub response: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, angle: 0.0, scale: 1.0, response: 0.0 }
    }
}

/// 256-bit binary descriptor = 32 bytes
pub type BinaryDescriptor = [u8; 32];

/// Length of a gradient-histogram descriptor (4x4 cells, 8 orientation bins)
pub const FLOAT_DESCRIPTOR_LEN: usize = 128;

pub type FloatDescriptor = [f32; FLOAT_DESCRIPTOR_LEN];

/// Distance used to compare two descriptors of the same family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Euclidean,
    Hamming,
}

/// Descriptors for one image; the variant decides the distance metric downstream
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorSet {
    Float(Vec<FloatDescriptor>),
    Binary(Vec<BinaryDescriptor>),
}

impl DescriptorSet {
    pub fn empty(metric: DistanceMetric) -> Self {
        match metric {
            DistanceMetric::Euclidean => DescriptorSet::Float(Vec::new()),
            DistanceMetric::Hamming => DescriptorSet::Binary(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DescriptorSet::Float(d) => d.len(),
            DescriptorSet::Binary(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metric(&self) -> DistanceMetric {
        match self {
            DescriptorSet::Float(_) => DistanceMetric::Euclidean,
            DescriptorSet::Binary(_) => DistanceMetric::Hamming,
        }
    }
}

/// Keypoints paired one-to-one with their descriptors
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    keypoints: Vec<Keypoint>,
    descriptors: DescriptorSet,
}

impl Features {
    /// Pair keypoints with descriptors, rejecting mismatched lengths
    pub fn new(keypoints: Vec<Keypoint>, descriptors: DescriptorSet) -> StitchResult<Self> {
        if keypoints.len() != descriptors.len() {
            return Err(StitchError::DimensionMismatch {
                what: "keypoints/descriptors",
                left: keypoints.len(),
                right: descriptors.len(),
            });
        }
        Ok(Self { keypoints, descriptors })
    }

    pub fn empty(metric: DistanceMetric) -> Self {
        Self { keypoints: Vec::new(), descriptors: DescriptorSet::empty(metric) }
    }

    pub fn from_binary(pairs: Vec<(Keypoint, BinaryDescriptor)>) -> Self {
        let (keypoints, descriptors) = pairs.into_iter().unzip();
        Self { keypoints, descriptors: DescriptorSet::Binary(descriptors) }
    }

    pub fn from_float(pairs: Vec<(Keypoint, FloatDescriptor)>) -> Self {
        let (keypoints, descriptors) = pairs.into_iter().unzip();
        Self { keypoints, descriptors: DescriptorSet::Float(descriptors) }
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    pub fn descriptors(&self) -> &DescriptorSet {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Correspondence between descriptor `query_idx` of one set and `train_idx` of another
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}

/// Invertible planar projective transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(Matrix3<f64>);

impl Homography {
    pub fn identity() -> Self {
        Homography(Matrix3::identity())
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Homography(Matrix3::new(1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0))
    }

    /// Wrap a matrix; `None` unless every entry is finite and the matrix is invertible
    pub fn from_matrix(m: Matrix3<f64>) -> Option<Self> {
        if m.iter().any(|v| !v.is_finite()) {
            return None;
        }
        m.try_inverse()?;
        Some(Homography(m))
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.0
    }

    pub fn inverse(&self) -> Option<Self> {
        self.0.try_inverse().map(Homography)
    }

    /// Apply `self` first, then `next`
    pub fn then(&self, next: &Homography) -> Homography {
        Homography(next.0 * self.0)
    }

    /// Map a point; `None` when it lands on or behind the line at infinity
    pub fn apply(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let p = self.0 * Vector3::new(x, y, 1.0);
        if p[2].abs() < 1e-12 {
            return None;
        }
        let (u, v) = (p[0] / p[2], p[1] / p[2]);
        (u.is_finite() && v.is_finite()).then_some((u, v))
    }

    /// Maximum absolute entry-wise deviation from the identity after normalising h33 to 1
    pub fn distance_from_identity(&self) -> f64 {
        let h33 = self.0[(2, 2)];
        if h33.abs() < 1e-12 {
            return f64::INFINITY;
        }
        let normalized = self.0 / h33;
        (normalized - Matrix3::identity()).amax()
    }
}

/// Initialize Rayon thread pool with the specified number of threads
pub fn init_thread_pool(n_threads: usize) -> Result<(), rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads.max(1))
        .build_global()
}

/// Worker count used when the caller does not size the pool
pub fn default_thread_count() -> usize {
    num_cpus::get().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_features_reject_length_mismatch() {
        let kps = vec![Keypoint::new(1.0, 2.0), Keypoint::new(3.0, 4.0)];
        let desc = DescriptorSet::Binary(vec![[0u8; 32]]);
        let result = Features::new(kps, desc);
        assert!(matches!(result, Err(StitchError::DimensionMismatch { left: 2, right: 1, .. })));
    }

    #[test]
    fn test_empty_features_keep_metric() {
        let features = Features::empty(DistanceMetric::Hamming);
        assert!(features.is_empty());
        assert_eq!(features.descriptors().metric(), DistanceMetric::Hamming);
    }

    #[test]
    fn test_homography_composition_order() {
        let scale = Homography::from_matrix(Matrix3::new(2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 1.0)).unwrap();
        let shift = Homography::translation(10.0, -5.0);
        let (x, y) = scale.then(&shift).apply(3.0, 4.0).unwrap();
        assert_relative_eq!(x, 16.0);
        assert_relative_eq!(y, 3.0);
    }

    #[test]
    fn test_singular_matrix_rejected() {
        assert!(Homography::from_matrix(Matrix3::zeros()).is_none());
        let mut m = Matrix3::identity();
        m[(0, 1)] = f64::NAN;
        assert!(Homography::from_matrix(m).is_none());
    }

    #[test]
    fn test_identity_distance() {
        assert_relative_eq!(Homography::identity().distance_from_identity(), 0.0);
        assert_relative_eq!(Homography::translation(3.0, 0.0).distance_from_identity(), 3.0);
    }
}
