use stitch_core::{DetectorKind, Features, GrayImage, PreprocessConfig, RasterImage, SessionConfig};

use crate::detector::{create_detector, FeatureDetector};
use crate::preprocessing::{ImagePreprocessing, LightingClass};

/// Result of one extraction pass
#[derive(Debug, Clone)]
pub struct Extraction {
    pub features: Features,
    pub lighting: LightingClass,
    /// Set when the first pass fell below the keypoint floor and the
    /// aggressive re-enhancement of the raw luminance was used instead
    pub retried: bool,
}

/// Enhancement followed by detection, with a retry for under-textured inputs
pub struct FeatureExtractor {
    detector: Box<dyn FeatureDetector>,
    preprocess: PreprocessConfig,
    night_threshold: f64,
    min_keypoints: usize,
}

impl FeatureExtractor {
    pub fn new(config: &SessionConfig) -> Self {
        Self::with_detector(create_detector(config.detector, config.max_features), config)
    }

    pub fn with_detector(detector: Box<dyn FeatureDetector>, config: &SessionConfig) -> Self {
        Self {
            detector,
            preprocess: config.preprocess.clone(),
            night_threshold: config.night_threshold,
            min_keypoints: config.min_keypoints,
        }
    }

    pub fn kind(&self) -> DetectorKind {
        self.detector.kind()
    }

    pub fn extract(&self, image: &RasterImage) -> Extraction {
        self.extract_gray(&ImagePreprocessing::to_gray(image))
    }

    pub fn extract_gray(&self, gray: &GrayImage) -> Extraction {
        if gray.width() == 0 || gray.height() == 0 {
            return Extraction {
                features: Features::empty(self.kind().metric()),
                lighting: LightingClass::Night,
                retried: false,
            };
        }

        let enhanced = ImagePreprocessing::preprocess_gray(gray, &self.preprocess, self.night_threshold);
        let features = self.detector.detect_and_describe(&enhanced.gray);
        if features.len() >= self.min_keypoints {
            return Extraction { features, lighting: enhanced.lighting, retried: false };
        }

        let boosted = ImagePreprocessing::enhance_retry(gray, &self.preprocess);
        let retry = self.detector.detect_and_describe(&boosted);
        log::warn!(
            "{} found {} keypoints (< {}), re-enhanced raw luminance gave {}",
            self.kind(),
            features.len(),
            self.min_keypoints,
            retry.len()
        );

        Extraction { features: retry, lighting: enhanced.lighting, retried: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use image::Luma;
    use stitch_core::Keypoint;

    /// Returns `counts[i]` keypoints on the i-th call and records every input
    struct ScriptedDetector {
        counts: Vec<usize>,
        seen: Arc<Mutex<Vec<GrayImage>>>,
    }

    impl FeatureDetector for ScriptedDetector {
        fn kind(&self) -> DetectorKind {
            DetectorKind::Orb
        }

        fn detect_and_describe(&self, gray: &GrayImage) -> Features {
            let mut seen = self.seen.lock().unwrap();
            let n = self.counts.get(seen.len()).copied().unwrap_or(0);
            seen.push(gray.clone());
            Features::from_binary((0..n).map(|i| (Keypoint::new(i as f32, 1.0), [i as u8; 32])).collect())
        }
    }

    fn scripted(counts: Vec<usize>, config: &SessionConfig) -> (FeatureExtractor, Arc<Mutex<Vec<GrayImage>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let detector = ScriptedDetector { counts, seen: Arc::clone(&seen) };
        (FeatureExtractor::with_detector(Box::new(detector), config), seen)
    }

    fn textured(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([(60 + (x * 3 + y * 5) % 90) as u8]))
    }

    #[test]
    fn test_sparse_first_pass_retries_on_raw_luminance() {
        let config = SessionConfig { min_keypoints: 20, ..SessionConfig::default() };
        let (extractor, seen) = scripted(vec![5, 40], &config);
        let raw = textured(80, 60);

        let extraction = extractor.extract_gray(&raw);
        assert!(extraction.retried);
        assert_eq!(extraction.features.len(), 40);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let first = ImagePreprocessing::preprocess_gray(&raw, &config.preprocess, config.night_threshold);
        assert_eq!(seen[0], first.gray);
        assert_eq!(seen[1], ImagePreprocessing::enhance_retry(&raw, &config.preprocess));
    }

    #[test]
    fn test_dense_first_pass_is_kept() {
        let config = SessionConfig { min_keypoints: 20, ..SessionConfig::default() };
        let (extractor, seen) = scripted(vec![25, 90], &config);
        let extraction = extractor.extract_gray(&textured(80, 60));
        assert!(!extraction.retried);
        assert_eq!(extraction.features.len(), 25);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_input_skips_detection() {
        let (extractor, seen) = scripted(vec![50], &SessionConfig::default());
        let extraction = extractor.extract_gray(&GrayImage::new(0, 0));
        assert!(extraction.features.is_empty());
        assert!(!extraction.retried);
        assert!(seen.lock().unwrap().is_empty());
    }
}
