use crate::error::{StitchError, StitchResult};
use crate::builder::SessionConfigBuilder;

#[cfg(feature = "serde")]
use serde::{Serialize, Deserialize};

/// Feature detector strategy, chosen once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DetectorKind {
    /// Scale-space gradient-histogram descriptor, floating point, Euclidean distance
    #[default]
    Sift,
    /// Oriented FAST corners with steered binary descriptor, Hamming distance
    Orb,
}

impl DetectorKind {
    pub fn label(&self) -> &'static str {
        match self {
            DetectorKind::Sift => "SIFT",
            DetectorKind::Orb => "ORB",
        }
    }

    /// Distance the descriptors of this detector are compared with
    pub fn metric(&self) -> crate::DistanceMetric {
        match self {
            DetectorKind::Sift => crate::DistanceMetric::Euclidean,
            DetectorKind::Orb => crate::DistanceMetric::Hamming,
        }
    }
}

impl std::fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sift" | "a" => Ok(DetectorKind::Sift),
            "orb" | "b" => Ok(DetectorKind::Orb),
            other => Err(format!("unknown detector '{}' (expected sift or orb)", other)),
        }
    }
}

/// Enhancement parameters for the night, normal and retry paths
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PreprocessConfig {
    pub night_clip_limit: f32,
    pub night_grid: u32,
    /// Percentiles mapped to 0 and 255 by the night contrast stretch
    pub stretch_low_percentile: f32,
    pub stretch_high_percentile: f32,
    /// Median filter radius used against low-light grain
    pub denoise_radius: u32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Weight of the enhanced image when edges are blended back in
    pub edge_weight: f32,
    pub normal_clip_limit: f32,
    pub normal_grid: u32,
    pub retry_clip_limit: f32,
    pub retry_grid: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            night_clip_limit: 3.0,
            night_grid: 8,
            stretch_low_percentile: 5.0,
            stretch_high_percentile: 95.0,
            denoise_radius: 1,
            canny_low: 50.0,
            canny_high: 150.0,
            edge_weight: 0.7,
            normal_clip_limit: 2.0,
            normal_grid: 8,
            retry_clip_limit: 4.0,
            retry_grid: 4,
        }
    }
}

impl PreprocessConfig {
    pub fn validate(&self) -> StitchResult<()> {
        for (name, clip) in [
            ("night_clip_limit", self.night_clip_limit),
            ("normal_clip_limit", self.normal_clip_limit),
            ("retry_clip_limit", self.retry_clip_limit),
        ] {
            if !(clip > 0.0 && clip.is_finite()) {
                return Err(StitchError::InvalidConfig(format!("{} must be positive, got {}", name, clip)));
            }
        }
        if self.night_grid == 0 || self.normal_grid == 0 || self.retry_grid == 0 {
            return Err(StitchError::InvalidConfig("CLAHE tile grid must be at least 1".to_string()));
        }
        if !(0.0..100.0).contains(&self.stretch_low_percentile)
            || !(0.0..=100.0).contains(&self.stretch_high_percentile)
            || self.stretch_low_percentile >= self.stretch_high_percentile
        {
            return Err(StitchError::InvalidConfig(format!(
                "stretch percentiles must satisfy 0 <= low < high <= 100, got {} / {}",
                self.stretch_low_percentile, self.stretch_high_percentile
            )));
        }
        if !(0.0..=1.0).contains(&self.edge_weight) {
            return Err(StitchError::InvalidConfig(format!("edge_weight must be in [0, 1], got {}", self.edge_weight)));
        }
        if self.canny_low < 0.0 || self.canny_low > self.canny_high {
            return Err(StitchError::InvalidConfig(format!(
                "canny thresholds must satisfy 0 <= low <= high, got {} / {}",
                self.canny_low, self.canny_high
            )));
        }
        Ok(())
    }
}

/// Robust homography fitting parameters
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RansacConfig {
    /// Inlier threshold in target-image pixels
    pub reprojection_threshold: f64,
    pub max_iterations: usize,
    pub confidence: f64,
    /// Fixed seed for reproducible sampling
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub seed: Option<u64>,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            reprojection_threshold: 5.0,
            max_iterations: 2000,
            confidence: 0.995,
            seed: None,
        }
    }
}

impl RansacConfig {
    pub fn validate(&self) -> StitchResult<()> {
        if !(self.reprojection_threshold > 0.0 && self.reprojection_threshold.is_finite()) {
            return Err(StitchError::InvalidConfig(format!(
                "reprojection_threshold must be positive, got {}",
                self.reprojection_threshold
            )));
        }
        if self.max_iterations == 0 {
            return Err(StitchError::InvalidConfig("max_iterations must be at least 1".to_string()));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(StitchError::InvalidConfig(format!("confidence must be in (0, 1), got {}", self.confidence)));
        }
        Ok(())
    }
}

/// Complete session configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    pub detector: DetectorKind,
    /// Lowe ratio test threshold
    pub match_ratio: f32,
    /// Mean luminance below which an image takes the night path
    pub night_threshold: f64,
    /// Longest side accepted by `add_image`; larger inputs are downscaled
    pub max_dimension: u32,
    pub blend_alpha: f32,
    /// Keypoint floor that triggers the aggressive enhancement retry
    pub min_keypoints: usize,
    pub max_features: usize,
    pub border_size: u32,
    /// Draw the method caption into the top border of final results
    pub annotate: bool,
    pub max_canvas_pixels: u64,
    /// Metadata
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub name: Option<String>,
    pub preprocess: PreprocessConfig,
    pub ransac: RansacConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            detector: DetectorKind::Sift,
            match_ratio: 0.7,
            night_threshold: 100.0,
            max_dimension: 800,
            blend_alpha: 0.5,
            min_keypoints: 20,
            max_features: 1000,
            border_size: 20,
            annotate: true,
            max_canvas_pixels: 40_000_000,
            name: None,
            preprocess: PreprocessConfig::default(),
            ransac: RansacConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Create configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for dark scenes: binary descriptors and stronger enhancement
    pub fn night_preset() -> Self {
        Self {
            detector: DetectorKind::Orb,
            night_threshold: 110.0,
            preprocess: PreprocessConfig {
                night_clip_limit: 4.0,
                normal_clip_limit: 2.5,
                denoise_radius: 2,
                ..PreprocessConfig::default()
            },
            name: Some("Night".to_string()),
            ..Self::default()
        }
    }

    /// Preset trading accuracy for throughput
    pub fn fast_preset() -> Self {
        Self {
            detector: DetectorKind::Orb,
            max_dimension: 640,
            max_features: 500,
            ransac: RansacConfig {
                max_iterations: 500,
                confidence: 0.99,
                ..RansacConfig::default()
            },
            name: Some("Fast".to_string()),
            ..Self::default()
        }
    }

    /// Convert to builder for further customization
    pub fn to_builder(self) -> SessionConfigBuilder {
        SessionConfigBuilder::from_config(self)
    }

    /// Generate human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "SessionConfig: detector={}, ratio={:.2}, night<{:.0}, max_dim={}, alpha={:.2}, ransac={:.1}px/{} iters, features<={}",
            self.detector, self.match_ratio, self.night_threshold, self.max_dimension, self.blend_alpha,
            self.ransac.reprojection_threshold, self.ransac.max_iterations, self.max_features
        )
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> StitchResult<()> {
        if !(self.match_ratio > 0.0 && self.match_ratio < 1.0) {
            return Err(StitchError::InvalidConfig(format!("match_ratio must be in (0, 1), got {}", self.match_ratio)));
        }
        if !(0.0..=1.0).contains(&self.blend_alpha) {
            return Err(StitchError::InvalidConfig(format!("blend_alpha must be in [0, 1], got {}", self.blend_alpha)));
        }
        if !(0.0..=255.0).contains(&self.night_threshold) {
            return Err(StitchError::InvalidConfig(format!(
                "night_threshold must be in [0, 255], got {}",
                self.night_threshold
            )));
        }
        if self.max_dimension == 0 {
            return Err(StitchError::InvalidConfig("max_dimension must be at least 1".to_string()));
        }
        if self.max_features == 0 {
            return Err(StitchError::InvalidConfig("max_features must be at least 1".to_string()));
        }
        if self.max_canvas_pixels == 0 {
            return Err(StitchError::InvalidConfig("max_canvas_pixels must be at least 1".to_string()));
        }
        self.preprocess.validate()?;
        self.ransac.validate()
    }

    /// Save configuration to JSON file
    #[cfg(feature = "serde")]
    pub fn save_json<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from JSON file
    #[cfg(feature = "serde")]
    pub fn load_json<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Save configuration to TOML file
    #[cfg(feature = "serde")]
    pub fn save_toml<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let toml = toml::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Load configuration from TOML file
    #[cfg(feature = "serde")]
    pub fn load_toml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load from a `.json` or `.toml` file, chosen by extension
    #[cfg(feature = "serde")]
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::load_toml(path),
            _ => Self::load_json(path),
        }
    }

    /// Serialize to JSON string
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON string
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML string
    #[cfg(feature = "serde")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Deserialize from TOML string
    #[cfg(feature = "serde")]
    pub fn from_toml(toml_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detector, DetectorKind::Sift);
        assert_eq!(config.match_ratio, 0.7);
        assert_eq!(config.night_threshold, 100.0);
        assert_eq!(config.max_dimension, 800);
        assert_eq!(config.ransac.reprojection_threshold, 5.0);
        assert_eq!(config.min_keypoints, 20);
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(SessionConfig::night_preset().validate().is_ok());
        assert!(SessionConfig::fast_preset().validate().is_ok());
        assert_eq!(SessionConfig::fast_preset().detector, DetectorKind::Orb);
    }

    #[test]
    fn test_ratio_bounds() {
        for ratio in [0.0, 1.0, -0.3, 1.5] {
            let config = SessionConfig { match_ratio: ratio, ..SessionConfig::default() };
            assert!(matches!(config.validate(), Err(StitchError::InvalidConfig(_))), "ratio {} accepted", ratio);
        }
    }

    #[test]
    fn test_nested_validation() {
        let mut config = SessionConfig::default();
        config.preprocess.normal_grid = 0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.ransac.reprojection_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.preprocess.stretch_low_percentile = 95.0;
        config.preprocess.stretch_high_percentile = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_detector_parsing() {
        assert_eq!("SIFT".parse::<DetectorKind>(), Ok(DetectorKind::Sift));
        assert_eq!("orb".parse::<DetectorKind>(), Ok(DetectorKind::Orb));
        assert!("surf".parse::<DetectorKind>().is_err());
    }

    #[test]
    fn test_summary_mentions_detector() {
        let summary = SessionConfig::fast_preset().summary();
        assert!(summary.contains("detector=ORB"));
        assert!(summary.contains("ratio=0.70"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_json_and_toml_round_trip() {
        let mut config = SessionConfig::night_preset();
        config.ransac.seed = Some(7);

        let json = config.to_json().unwrap();
        assert!(json.contains("\"detector\": \"orb\""));
        assert_eq!(SessionConfig::from_json(&json).unwrap(), config);

        let toml_str = config.to_toml().unwrap();
        assert_eq!(SessionConfig::from_toml(&toml_str).unwrap(), config);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SessionConfig::from_json(r#"{ "match_ratio": 0.8 }"#).unwrap();
        assert_eq!(config.match_ratio, 0.8);
        assert_eq!(config.max_dimension, 800);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_invalid_json_rejected() {
        assert!(SessionConfig::from_json(r#"{ "blend_alpha": 2.0 }"#).is_err());
    }
}
