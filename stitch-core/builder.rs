use crate::config::{DetectorKind, PreprocessConfig, RansacConfig, SessionConfig};
use crate::error::StitchResult;

/// Fluent builder for a validated `SessionConfig`
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfigBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self { config: SessionConfig::default() }
    }

    /// Create builder from existing configuration
    pub fn from_config(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Select the feature detector strategy
    pub fn detector(mut self, detector: DetectorKind) -> Self {
        self.config.detector = detector;
        self
    }

    /// Set the ratio test threshold
    pub fn match_ratio(mut self, ratio: f32) -> Self {
        self.config.match_ratio = ratio;
        self
    }

    /// Set the mean brightness below which images are treated as night shots
    pub fn night_threshold(mut self, threshold: f64) -> Self {
        self.config.night_threshold = threshold;
        self
    }

    /// Set the longest accepted side for added images
    pub fn max_dimension(mut self, max_dimension: u32) -> Self {
        self.config.max_dimension = max_dimension;
        self
    }

    pub fn blend_alpha(mut self, alpha: f32) -> Self {
        self.config.blend_alpha = alpha;
        self
    }

    /// Set the keypoint count below which the enhancement retry runs
    pub fn min_keypoints(mut self, min_keypoints: usize) -> Self {
        self.config.min_keypoints = min_keypoints;
        self
    }

    pub fn max_features(mut self, max_features: usize) -> Self {
        self.config.max_features = max_features;
        self
    }

    pub fn border_size(mut self, border: u32) -> Self {
        self.config.border_size = border;
        self
    }

    /// Enable or disable result captions
    pub fn annotate(mut self, enable: bool) -> Self {
        self.config.annotate = enable;
        self
    }

    pub fn max_canvas_pixels(mut self, limit: u64) -> Self {
        self.config.max_canvas_pixels = limit;
        self
    }

    /// Set the RANSAC inlier threshold in pixels
    pub fn reprojection_threshold(mut self, threshold: f64) -> Self {
        self.config.ransac.reprojection_threshold = threshold;
        self
    }

    pub fn ransac_iterations(mut self, max_iterations: usize) -> Self {
        self.config.ransac.max_iterations = max_iterations;
        self
    }

    /// Fix the RANSAC sampling seed for reproducible runs
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.ransac.seed = Some(seed);
        self
    }

    pub fn ransac(mut self, ransac: RansacConfig) -> Self {
        self.config.ransac = ransac;
        self
    }

    pub fn preprocess(mut self, preprocess: PreprocessConfig) -> Self {
        self.config.preprocess = preprocess;
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.config.name = Some(name.to_string());
        self
    }

    /// Apply night preset
    pub fn preset_night(self) -> Self {
        Self::from_config(SessionConfig::night_preset())
    }

    /// Apply fast preset
    pub fn preset_fast(self) -> Self {
        Self::from_config(SessionConfig::fast_preset())
    }

    /// Generate summary of current configuration
    pub fn summary(&self) -> String {
        self.config.summary()
    }

    /// Validate and return the configuration
    pub fn build(self) -> StitchResult<SessionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
