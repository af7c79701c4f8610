use image::Luma;
use imageproc::edges::canny;
use imageproc::filter::{gaussian_blur_f32, median_filter};
use rayon::prelude::*;
use stitch_core::{GrayImage, PreprocessConfig, RasterImage};

/// Lighting classification driving the enhancement path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightingClass {
    Night,
    Normal,
}

/// Enhanced luminance plus how it was produced
#[derive(Debug, Clone)]
pub struct EnhancedImage {
    pub gray: GrayImage,
    pub lighting: LightingClass,
    pub mean_brightness: f64,
}

/// Image enhancement algorithms (CLAHE, percentile stretch, denoise, edge recovery)
pub struct ImagePreprocessing;

impl ImagePreprocessing {
    pub fn to_gray(image: &RasterImage) -> GrayImage {
        image::imageops::grayscale(image)
    }

    /// Mean luminance on the 0-255 scale
    pub fn mean_brightness(gray: &GrayImage) -> f64 {
        let raw = gray.as_raw();
        if raw.is_empty() {
            return 0.0;
        }
        let sum: u64 = raw.par_iter().map(|&v| v as u64).sum();
        sum as f64 / raw.len() as f64
    }

    /// Night iff mean brightness is strictly below the threshold
    pub fn classify(gray: &GrayImage, night_threshold: f64) -> LightingClass {
        Self::classify_mean(Self::mean_brightness(gray), night_threshold)
    }

    pub fn classify_mean(mean: f64, night_threshold: f64) -> LightingClass {
        if mean < night_threshold {
            LightingClass::Night
        } else {
            LightingClass::Normal
        }
    }

    /// Convert to luminance, classify and run the matching enhancement path
    pub fn preprocess(image: &RasterImage, cfg: &PreprocessConfig, night_threshold: f64) -> EnhancedImage {
        Self::preprocess_gray(&Self::to_gray(image), cfg, night_threshold)
    }

    pub fn preprocess_gray(gray: &GrayImage, cfg: &PreprocessConfig, night_threshold: f64) -> EnhancedImage {
        let mean_brightness = Self::mean_brightness(gray);
        let lighting = Self::classify_mean(mean_brightness, night_threshold);
        let enhanced = match lighting {
            LightingClass::Night => Self::enhance_night(gray, cfg),
            LightingClass::Normal => Self::enhance_normal(gray, cfg),
        };
        log::debug!(
            "preprocess {}x{}: mean={:.1} -> {:?}",
            gray.width(), gray.height(), mean_brightness, lighting
        );
        EnhancedImage { gray: enhanced, lighting, mean_brightness }
    }

    /// CLAHE, percentile stretch, median denoise, then edges blended back in
    pub fn enhance_night(gray: &GrayImage, cfg: &PreprocessConfig) -> GrayImage {
        let equalized = Self::apply_clahe(gray, cfg.night_clip_limit, cfg.night_grid);
        let stretched = Self::percentile_stretch(&equalized, cfg.stretch_low_percentile, cfg.stretch_high_percentile);
        let denoised = if cfg.denoise_radius > 0 {
            median_filter(&stretched, cfg.denoise_radius, cfg.denoise_radius)
        } else {
            stretched
        };
        Self::blend_edges(&denoised, cfg.canny_low, cfg.canny_high, cfg.edge_weight)
    }

    /// Mild CLAHE followed by a resolution-dependent Gaussian blur
    pub fn enhance_normal(gray: &GrayImage, cfg: &PreprocessConfig) -> GrayImage {
        let equalized = Self::apply_clahe(gray, cfg.normal_clip_limit, cfg.normal_grid);
        Self::resolution_blur(&equalized)
    }

    /// Aggressive CLAHE on the raw luminance, used when too few keypoints were found
    pub fn enhance_retry(gray: &GrayImage, cfg: &PreprocessConfig) -> GrayImage {
        Self::apply_clahe(gray, cfg.retry_clip_limit, cfg.retry_grid)
    }

    /// Blur sigma for the normal path: 3, 5 and 7 tap equivalents by resolution
    pub fn blur_sigma(width: u32, height: u32) -> f32 {
        let min_dim = width.min(height);
        if min_dim < 500 {
            0.8
        } else if min_dim < 1000 {
            1.1
        } else {
            1.4
        }
    }

    pub fn resolution_blur(gray: &GrayImage) -> GrayImage {
        if gray.width() == 0 || gray.height() == 0 {
            return gray.clone();
        }
        gaussian_blur_f32(gray, Self::blur_sigma(gray.width(), gray.height()))
    }

    /// Apply CLAHE (Contrast Limited Adaptive Histogram Equalization) with a
    /// `grid` x `grid` tile layout and bilinear blending between tile mappings
    pub fn apply_clahe(gray: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 || grid == 0 {
            return gray.clone();
        }

        let (tile_w, tiles_x) = Self::tile_layout(width, grid);
        let (tile_h, tiles_y) = Self::tile_layout(height, grid);

        let luts: Vec<[u8; 256]> = (0..tiles_x * tiles_y)
            .into_par_iter()
            .map(|t| {
                let x0 = (t % tiles_x) * tile_w;
                let y0 = (t / tiles_x) * tile_h;
                let x1 = (x0 + tile_w).min(width);
                let y1 = (y0 + tile_h).min(height);

                let mut histogram = [0u32; 256];
                for y in y0..y1 {
                    for x in x0..x1 {
                        histogram[gray.get_pixel(x, y)[0] as usize] += 1;
                    }
                }
                let area = (x1 - x0) * (y1 - y0);
                Self::clip_histogram(&mut histogram, clip_limit, area);
                Self::histogram_lut(&histogram, area)
            })
            .collect();

        let src: &[u8] = gray.as_raw();
        let mut out = GrayImage::new(width, height);
        let dst: &mut [u8] = &mut out;
        let row_len = width as usize;

        dst.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
            let gy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
            let ty0 = gy.floor();
            let wy = gy - ty0;
            let ty_a = (ty0 as i64).clamp(0, tiles_y as i64 - 1) as usize;
            let ty_b = (ty0 as i64 + 1).clamp(0, tiles_y as i64 - 1) as usize;

            for (x, out_px) in row.iter_mut().enumerate() {
                let gx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
                let tx0 = gx.floor();
                let wx = gx - tx0;
                let tx_a = (tx0 as i64).clamp(0, tiles_x as i64 - 1) as usize;
                let tx_b = (tx0 as i64 + 1).clamp(0, tiles_x as i64 - 1) as usize;

                let v = src[y * row_len + x] as usize;
                let lut = |tx: usize, ty: usize| luts[ty * tiles_x as usize + tx][v] as f32;
                let top = lut(tx_a, ty_a) * (1.0 - wx) + lut(tx_b, ty_a) * wx;
                let bottom = lut(tx_a, ty_b) * (1.0 - wx) + lut(tx_b, ty_b) * wx;
                *out_px = (top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8;
            }
        });

        out
    }

    /// Tile size and tile count along one axis; every tile is non-empty
    fn tile_layout(len: u32, grid: u32) -> (u32, u32) {
        let tiles = grid.min(len).max(1);
        let tile = len.div_ceil(tiles);
        (tile, len.div_ceil(tile))
    }

    /// Clip histogram bins at `clip_limit` times the uniform height and spread the excess
    fn clip_histogram(histogram: &mut [u32; 256], clip_limit: f32, area: u32) {
        let clip = ((clip_limit * area as f32 / 256.0) as u32).max(1);

        let mut excess = 0u32;
        for count in histogram.iter_mut() {
            if *count > clip {
                excess += *count - clip;
                *count = clip;
            }
        }

        let batch = excess / 256;
        let residual = (excess % 256) as usize;
        for count in histogram.iter_mut() {
            *count += batch;
        }
        if residual > 0 {
            let step = (256 / residual).max(1);
            for i in (0..256).step_by(step).take(residual) {
                histogram[i] += 1;
            }
        }
    }

    fn histogram_lut(histogram: &[u32; 256], area: u32) -> [u8; 256] {
        let mut lut = [0u8; 256];
        if area == 0 {
            return lut;
        }
        let scale = 255.0 / area as f32;
        let mut cumulative = 0u32;
        for (i, &count) in histogram.iter().enumerate() {
            cumulative += count;
            lut[i] = (cumulative as f32 * scale).round().clamp(0.0, 255.0) as u8;
        }
        lut
    }

    pub fn histogram(gray: &GrayImage) -> [u32; 256] {
        let mut histogram = [0u32; 256];
        for &v in gray.as_raw() {
            histogram[v as usize] += 1;
        }
        histogram
    }

    /// Smallest intensity whose cumulative share reaches `p` percent
    pub fn percentile(histogram: &[u32; 256], p: f32) -> u8 {
        let total: u64 = histogram.iter().map(|&c| c as u64).sum();
        if total == 0 {
            return 0;
        }
        let target = ((p as f64 / 100.0) * total as f64).ceil().max(1.0);
        let mut cumulative = 0u64;
        for (i, &count) in histogram.iter().enumerate() {
            cumulative += count as u64;
            if cumulative as f64 >= target {
                return i as u8;
            }
        }
        255
    }

    /// Map the `low`..`high` percentile range to 0..255; flat images are returned unchanged
    pub fn percentile_stretch(gray: &GrayImage, low: f32, high: f32) -> GrayImage {
        let histogram = Self::histogram(gray);
        let lo = Self::percentile(&histogram, low) as f32;
        let hi = Self::percentile(&histogram, high) as f32;
        if hi <= lo {
            return gray.clone();
        }
        let scale = 255.0 / (hi - lo);
        let mut lut = [0u8; 256];
        for (v, out) in lut.iter_mut().enumerate() {
            *out = ((v as f32 - lo) * scale).round().clamp(0.0, 255.0) as u8;
        }
        image::ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| Luma([lut[gray.get_pixel(x, y)[0] as usize]]))
    }

    /// Blend a Canny edge map back into the image: `weight * img + (1 - weight) * edges`
    pub fn blend_edges(gray: &GrayImage, low: f32, high: f32, weight: f32) -> GrayImage {
        if gray.width() < 3 || gray.height() < 3 {
            return gray.clone();
        }
        let edges = canny(gray, low, high);
        image::ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
            let v = gray.get_pixel(x, y)[0] as f32;
            let e = edges.get_pixel(x, y)[0] as f32;
            Luma([(weight * v + (1.0 - weight) * e).round().clamp(0.0, 255.0) as u8])
        })
    }

    /// Variance of the 4-neighbour Laplacian, a cheap noise/sharpness estimate
    pub fn laplacian_variance(gray: &GrayImage) -> f64 {
        let (w, h) = gray.dimensions();
        if w < 3 || h < 3 {
            return 0.0;
        }
        let at = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;
        let responses: Vec<f64> = (1..h - 1)
            .into_par_iter()
            .flat_map_iter(|y| {
                (1..w - 1).map(move |x| at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y))
            })
            .collect();
        let n = responses.len() as f64;
        let mean = responses.iter().sum::<f64>() / n;
        responses.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn uniform(width: u32, height: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([value]))
    }

    fn spread(img: &GrayImage) -> u8 {
        let max = img.as_raw().iter().copied().max().unwrap_or(0);
        let min = img.as_raw().iter().copied().min().unwrap_or(0);
        max - min
    }

    #[test]
    fn test_black_is_night_white_is_normal() {
        assert_eq!(ImagePreprocessing::classify(&uniform(16, 16, 0), 100.0), LightingClass::Night);
        assert_eq!(ImagePreprocessing::classify(&uniform(16, 16, 255), 100.0), LightingClass::Normal);
    }

    #[test]
    fn test_threshold_boundary_is_normal() {
        assert_eq!(ImagePreprocessing::classify(&uniform(8, 8, 100), 100.0), LightingClass::Normal);
        assert_eq!(ImagePreprocessing::classify(&uniform(8, 8, 99), 100.0), LightingClass::Night);
    }

    #[test]
    fn test_night_path_runs_for_black_image() {
        let rgb = RasterImage::new(40, 30);
        let enhanced = ImagePreprocessing::preprocess(&rgb, &PreprocessConfig::default(), 100.0);
        assert_eq!(enhanced.lighting, LightingClass::Night);
        assert_eq!(enhanced.gray.dimensions(), (40, 30));
    }

    #[test]
    fn test_normal_path_runs_for_white_image() {
        let rgb = RasterImage::from_pixel(40, 30, image::Rgb([255, 255, 255]));
        let enhanced = ImagePreprocessing::preprocess(&rgb, &PreprocessConfig::default(), 100.0);
        assert_eq!(enhanced.lighting, LightingClass::Normal);
        assert_eq!(enhanced.mean_brightness, 255.0);
    }

    #[test]
    fn test_clahe_keeps_uniform_image_uniform() {
        let out = ImagePreprocessing::apply_clahe(&uniform(64, 48, 77), 2.0, 8);
        assert_eq!(spread(&out), 0);
    }

    #[test]
    fn test_clahe_expands_low_contrast() {
        let img = GrayImage::from_fn(256, 256, |x, y| Luma([100 + ((x + y) % 21) as u8]));
        let out = ImagePreprocessing::apply_clahe(&img, 2.0, 8);
        assert!(spread(&out) > spread(&img), "{} <= {}", spread(&out), spread(&img));
    }

    #[test]
    fn test_clahe_on_tiny_image() {
        let img = GrayImage::from_fn(3, 2, |x, y| Luma([(x * 40 + y * 10) as u8]));
        let out = ImagePreprocessing::apply_clahe(&img, 4.0, 8);
        assert_eq!(out.dimensions(), (3, 2));
    }

    #[test]
    fn test_percentile_stretch_maps_to_full_range() {
        let img = GrayImage::from_fn(20, 20, |x, _| Luma([if x < 10 { 50 } else { 200 }]));
        let out = ImagePreprocessing::percentile_stretch(&img, 5.0, 95.0);
        assert_eq!(out.get_pixel(0, 0)[0], 0);
        assert_eq!(out.get_pixel(19, 0)[0], 255);
    }

    #[test]
    fn test_percentile_stretch_skips_flat_image() {
        let img = uniform(10, 10, 42);
        assert_eq!(ImagePreprocessing::percentile_stretch(&img, 5.0, 95.0), img);
    }

    #[test]
    fn test_blur_sigma_grows_with_resolution() {
        assert_eq!(ImagePreprocessing::blur_sigma(640, 480), 0.8);
        assert_eq!(ImagePreprocessing::blur_sigma(800, 600), 1.1);
        assert_eq!(ImagePreprocessing::blur_sigma(1920, 1080), 1.4);
    }

    #[test]
    fn test_laplacian_variance() {
        assert_eq!(ImagePreprocessing::laplacian_variance(&uniform(10, 10, 9)), 0.0);
        let checker = GrayImage::from_fn(10, 10, |x, y| Luma([if (x + y) % 2 == 0 { 0 } else { 255 }]));
        assert!(ImagePreprocessing::laplacian_variance(&checker) > 1000.0);
    }

    proptest! {
        #[test]
        fn prop_night_iff_mean_below_threshold(value in 0u8..=255, threshold in 0.0f64..=255.0) {
            let class = ImagePreprocessing::classify(&uniform(4, 4, value), threshold);
            prop_assert_eq!(class == LightingClass::Night, (value as f64) < threshold);
        }
    }
}
