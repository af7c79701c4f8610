use stitch_core::{DetectorKind, Features, GrayImage};

use crate::orb::OrbDetector;
use crate::sift::SiftDetector;

/// Keypoint detection plus description over an already-enhanced luminance image.
///
/// Implementations never fail: an image without usable structure yields an
/// empty [`Features`] whose descriptor family still matches [`Self::kind`].
pub trait FeatureDetector: Send + Sync {
    fn kind(&self) -> DetectorKind;

    fn detect_and_describe(&self, gray: &GrayImage) -> Features;
}

/// Pick the detector strategy once, at session configuration time
pub fn create_detector(kind: DetectorKind, max_features: usize) -> Box<dyn FeatureDetector> {
    match kind {
        DetectorKind::Sift => Box::new(SiftDetector::new(max_features)),
        DetectorKind::Orb => Box::new(OrbDetector::new(max_features)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stitch_core::DistanceMetric;

    #[test]
    fn test_factory_respects_kind() {
        assert_eq!(create_detector(DetectorKind::Sift, 100).kind(), DetectorKind::Sift);
        assert_eq!(create_detector(DetectorKind::Orb, 100).kind(), DetectorKind::Orb);
    }

    #[test]
    fn test_empty_result_keeps_descriptor_family() {
        let blank = GrayImage::new(64, 64);
        let sift = create_detector(DetectorKind::Sift, 100).detect_and_describe(&blank);
        let orb = create_detector(DetectorKind::Orb, 100).detect_and_describe(&blank);
        assert_eq!(sift.descriptors().metric(), DistanceMetric::Euclidean);
        assert_eq!(orb.descriptors().metric(), DistanceMetric::Hamming);
    }
}
