//! Lighting-aware enhancement, keypoint detection and descriptor matching.
//!
//! Two detector strategies share the [`FeatureDetector`] seam: a scale-space
//! detector with 128-float gradient histograms ([`SiftDetector`]) and oriented
//! FAST corners with steered binary tests ([`OrbDetector`]).

pub mod detector;
pub mod extractor;
pub mod fast;
pub mod matcher;
pub mod orb;
pub mod preprocessing;
pub mod pyramid;
pub mod sift;

pub use detector::{create_detector, FeatureDetector};
pub use extractor::{Extraction, FeatureExtractor};
pub use matcher::{cross_check_matches, knn2, FeatureMatcher, KnnError, KnnResult};
pub use orb::OrbDetector;
pub use preprocessing::{EnhancedImage, ImagePreprocessing, LightingClass};
pub use sift::SiftDetector;
