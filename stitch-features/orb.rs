use imageproc::filter::gaussian_blur_f32;
use rayon::prelude::*;
use stitch_brief::BriefGenerator;
use stitch_core::{BinaryDescriptor, DetectorKind, Features, GrayImage, Keypoint};

use crate::detector::FeatureDetector;
use crate::fast::{detect_corners, intensity_centroid_angle};
use crate::pyramid::ImagePyramid;

/// Keypoints closer than this to a level border are discarded so the
/// orientation disk and the rotated BRIEF pattern stay inside the image
const EDGE_BORDER: u32 = 16;

const ORIENTATION_RADIUS: i32 = 15;

/// Smoothing applied before binary tests
const DESCRIPTOR_SIGMA: f32 = 2.0;

/// Oriented FAST corners over an image pyramid with steered BRIEF descriptors
pub struct OrbDetector {
    threshold: u8,
    max_features: usize,
    n_levels: usize,
    scale_factor: f32,
    brief: BriefGenerator,
}

impl OrbDetector {
    pub fn new(max_features: usize) -> Self {
        Self {
            threshold: 20,
            max_features,
            n_levels: 8,
            scale_factor: 1.2,
            brief: BriefGenerator::new(),
        }
    }

    fn detect_level(&self, level_img: &GrayImage, scale: f32) -> Vec<(Keypoint, BinaryDescriptor)> {
        let corners = detect_corners(level_img, self.threshold, EDGE_BORDER);
        if corners.is_empty() {
            return Vec::new();
        }

        let local: Vec<Keypoint> = corners
            .iter()
            .map(|c| Keypoint {
                x: c.x as f32,
                y: c.y as f32,
                angle: intensity_centroid_angle(level_img, c.x, c.y, ORIENTATION_RADIUS),
                scale,
                response: c.score,
            })
            .collect();

        let smoothed = gaussian_blur_f32(level_img, DESCRIPTOR_SIGMA);
        let descriptors = self.brief.generate_descriptors(&smoothed, &local);

        local
            .into_iter()
            .map(|kp| Keypoint { x: kp.x * scale, y: kp.y * scale, ..kp })
            .zip(descriptors)
            .collect()
    }
}

impl FeatureDetector for OrbDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Orb
    }

    fn detect_and_describe(&self, gray: &GrayImage) -> Features {
        let levels = ImagePyramid::generate_scale_levels(
            gray.width(),
            gray.height(),
            self.n_levels,
            self.scale_factor,
            2 * EDGE_BORDER + 1,
        );
        let pyramid = ImagePyramid::build(gray, &levels);

        let mut found: Vec<(Keypoint, BinaryDescriptor)> = levels
            .par_iter()
            .zip(pyramid.par_iter())
            .flat_map_iter(|(level, img)| self.detect_level(img, level.scale))
            .collect();

        found.sort_by(|a, b| b.0.response.total_cmp(&a.0.response));
        found.truncate(self.max_features);

        log::debug!("ORB: {} keypoints over {} levels", found.len(), levels.len());
        Features::from_binary(found)
    }
}
