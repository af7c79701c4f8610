use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use stitch_core::{BinaryDescriptor, GrayImage, Keypoint};

const DESCRIPTOR_BITS: usize = 256;

/// Radius of the disk the test points are drawn from
pub const PATTERN_RADIUS: i32 = 13;

const PATTERN_SEED: u64 = 0x0B1E_F256;

/// Steered BRIEF descriptor generator.
///
/// Each descriptor bit compares two smoothed intensities sampled at a fixed
/// point pair rotated by the keypoint orientation, so descriptors of the same
/// corner seen under in-plane rotation stay close in Hamming distance.
#[derive(Debug, Clone)]
pub struct BriefGenerator {
    pairs: Vec<(f32, f32, f32, f32)>,
}

impl Default for BriefGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl BriefGenerator {
    pub fn new() -> Self {
        Self::with_seed(PATTERN_SEED)
    }

    /// Build a generator whose sampling pattern comes from `seed`
    pub fn with_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut pairs = Vec::with_capacity(DESCRIPTOR_BITS);
        while pairs.len() < DESCRIPTOR_BITS {
            let (x1, y1) = sample_in_disk(&mut rng);
            let (x2, y2) = sample_in_disk(&mut rng);
            if (x1, y1) == (x2, y2) {
                continue;
            }
            pairs.push((x1 as f32, y1 as f32, x2 as f32, y2 as f32));
        }
        Self { pairs }
    }

    /// Test point pairs in keypoint-local coordinates
    pub fn pattern(&self) -> &[(f32, f32, f32, f32)] {
        &self.pairs
    }

    /// Describe keypoints given in `img` coordinates.
    ///
    /// `img` should already be smoothed; samples falling outside it are clamped
    /// to the nearest edge pixel. An empty `img` gives all-zero descriptors.
    pub fn generate_descriptors(&self, img: &GrayImage, kps: &[Keypoint]) -> Vec<BinaryDescriptor> {
        if img.width() == 0 || img.height() == 0 {
            return vec![[0u8; 32]; kps.len()];
        }
        kps.par_iter()
            .map(|kp| {
                let (s, c) = kp.angle.sin_cos();
                let (cx, cy) = (kp.x, kp.y);
                let mut d = [0u8; 32];

                for (i, &(dx1, dy1, dx2, dy2)) in self.pairs.iter().enumerate() {
                    let (rx1, ry1) = (cx + c * dx1 - s * dy1, cy + s * dx1 + c * dy1);
                    let (rx2, ry2) = (cx + c * dx2 - s * dy2, cy + s * dx2 + c * dy2);

                    let val1 = bilinear_sample(img, rx1, ry1);
                    let val2 = bilinear_sample(img, rx2, ry2);

                    let bit = (val1 < val2) as u8;
                    d[i / 8] |= bit << (i % 8);
                }
                d
            })
            .collect()
    }
}

fn sample_in_disk(rng: &mut StdRng) -> (i32, i32) {
    loop {
        let x = rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        let y = rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        if x * x + y * y <= PATTERN_RADIUS * PATTERN_RADIUS {
            return (x, y);
        }
    }
}

/// Bilinear interpolation for subpixel sampling
fn bilinear_sample(img: &GrayImage, x: f32, y: f32) -> f32 {
    let (w, h) = img.dimensions();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let dx = x - x0 as f32;
    let dy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0)[0] as f32;
    let p10 = img.get_pixel(x1, y0)[0] as f32;
    let p01 = img.get_pixel(x0, y1)[0] as f32;
    let p11 = img.get_pixel(x1, y1)[0] as f32;

    let top = p00 * (1.0 - dx) + p10 * dx;
    let bottom = p01 * (1.0 - dx) + p11 * dx;

    top * (1.0 - dy) + bottom * dy
}

/// Number of differing bits between two binary descriptors
pub fn hamming_distance(a: &BinaryDescriptor, b: &BinaryDescriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn create_gradient_image(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 7 + y * 3) % 256) as u8]))
    }

    #[test]
    fn test_empty_image_gives_zeroed_descriptors() {
        let generator = BriefGenerator::new();
        let kps = vec![Keypoint::new(0.0, 0.0), Keypoint::new(3.5, 2.0)];
        for (w, h) in [(0, 0), (0, 12), (12, 0)] {
            let descriptors = generator.generate_descriptors(&GrayImage::new(w, h), &kps);
            assert_eq!(descriptors, vec![[0u8; 32]; 2]);
        }
        assert!(generator.generate_descriptors(&GrayImage::new(0, 0), &[]).is_empty());
    }

    #[test]
    fn test_pattern_is_deterministic_and_inside_disk() {
        let a = BriefGenerator::new();
        let b = BriefGenerator::new();
        assert_eq!(a.pattern(), b.pattern());
        assert_eq!(a.pattern().len(), DESCRIPTOR_BITS);

        let r2 = (PATTERN_RADIUS * PATTERN_RADIUS) as f32;
        for &(x1, y1, x2, y2) in a.pattern() {
            assert!(x1 * x1 + y1 * y1 <= r2);
            assert!(x2 * x2 + y2 * y2 <= r2);
            assert!((x1, y1) != (x2, y2));
        }
    }

    #[test]
    fn test_different_seeds_give_different_patterns() {
        assert_ne!(BriefGenerator::with_seed(1).pattern(), BriefGenerator::with_seed(2).pattern());
    }

    #[test]
    fn test_uniform_image_gives_zero_descriptor() {
        let img = GrayImage::from_pixel(64, 64, Luma([90]));
        let desc = BriefGenerator::new().generate_descriptors(&img, &[Keypoint::new(32.0, 32.0)]);
        assert_eq!(desc, vec![[0u8; 32]]);
    }

    #[test]
    fn test_same_patch_same_descriptor() {
        let img = create_gradient_image(96, 96);
        let generator = BriefGenerator::new();
        let kps = [Keypoint::new(40.0, 40.0), Keypoint::new(40.0, 40.0)];
        let desc = generator.generate_descriptors(&img, &kps);
        assert_eq!(hamming_distance(&desc[0], &desc[1]), 0);
    }

    #[test]
    fn test_border_keypoints_do_not_panic() {
        let img = create_gradient_image(20, 20);
        let kps = [Keypoint::new(0.0, 0.0), Keypoint::new(19.5, 19.5)];
        let desc = BriefGenerator::new().generate_descriptors(&img, &kps);
        assert_eq!(desc.len(), 2);
    }

    #[test]
    fn test_hamming_distance() {
        let a = [0u8; 32];
        let mut b = [0u8; 32];
        b[0] = 0b1011;
        b[31] = 0xFF;
        assert_eq!(hamming_distance(&a, &b), 11);
        assert_eq!(hamming_distance(&b, &b), 0);
    }
}
