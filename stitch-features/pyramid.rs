use image::imageops::{self, FilterType};
use stitch_core::GrayImage;

/// Scale information for pyramid levels
#[derive(Debug, Clone, Copy)]
pub struct ScaleLevel {
    pub level: usize,
    /// Factor mapping level coordinates back to the base image
    pub scale: f32,
    pub width: u32,
    pub height: u32,
}

/// Image pyramid for multi-scale corner detection
pub struct ImagePyramid;

impl ImagePyramid {
    /// Generate scale levels, stopping once a level would fall below `min_size`
    pub fn generate_scale_levels(width: u32, height: u32, n_levels: usize, scale_factor: f32, min_size: u32) -> Vec<ScaleLevel> {
        let mut levels = Vec::new();
        let mut current_scale = 1.0f32;

        for level in 0..n_levels {
            let scaled_width = (width as f32 / current_scale).round() as u32;
            let scaled_height = (height as f32 / current_scale).round() as u32;

            if scaled_width < min_size || scaled_height < min_size {
                break;
            }

            levels.push(ScaleLevel {
                level,
                scale: current_scale,
                width: scaled_width,
                height: scaled_height,
            });

            current_scale *= scale_factor;
        }

        levels
    }

    /// Build one image per scale level; level 0 is the input itself
    pub fn build(img: &GrayImage, scale_levels: &[ScaleLevel]) -> Vec<GrayImage> {
        scale_levels
            .iter()
            .map(|level| {
                if level.level == 0 {
                    img.clone()
                } else {
                    Self::downsample(img, level.width, level.height)
                }
            })
            .collect()
    }

    fn downsample(img: &GrayImage, target_width: u32, target_height: u32) -> GrayImage {
        imageops::resize(img, target_width, target_height, FilterType::Triangle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_levels_shrink_and_stop() {
        let levels = ImagePyramid::generate_scale_levels(200, 100, 8, 1.2, 40);
        assert!(!levels.is_empty());
        assert_eq!(levels[0].scale, 1.0);
        assert!(levels.windows(2).all(|w| w[1].width < w[0].width));
        assert!(levels.iter().all(|l| l.height >= 40));
        assert!(levels.len() < 8);
    }

    #[test]
    fn test_downsampled_levels_keep_intensity() {
        let img = GrayImage::from_pixel(90, 60, Luma([140]));
        let levels = ImagePyramid::generate_scale_levels(90, 60, 3, 1.5, 10);
        let pyramid = ImagePyramid::build(&img, &levels);
        assert_eq!(pyramid.len(), 3);
        assert!(pyramid.iter().all(|layer| layer.pixels().all(|p| p[0].abs_diff(140) <= 1)));

        let ramp = GrayImage::from_fn(100, 10, |x, _| Luma([(x * 2) as u8]));
        let half = ImagePyramid::downsample(&ramp, 50, 5);
        let row: Vec<u8> = (0..50).map(|x| half.get_pixel(x, 2)[0]).collect();
        assert!(row.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_build_matches_level_sizes() {
        let img = GrayImage::from_fn(120, 90, |x, y| Luma([((x + y) % 256) as u8]));
        let levels = ImagePyramid::generate_scale_levels(120, 90, 4, 1.5, 20);
        let pyramid = ImagePyramid::build(&img, &levels);
        for (level, layer) in levels.iter().zip(pyramid.iter()) {
            assert_eq!(layer.dimensions(), (level.width, level.height));
        }
    }
}
