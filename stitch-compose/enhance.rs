use imageproc::filter::gaussian_blur_f32;
use rayon::prelude::*;
use stitch_core::{GrayImage, RasterImage};
use stitch_features::ImagePreprocessing;

use crate::color::{hsv_to_rgb, lab_to_rgb, lightness_from_u8, lightness_u8, rgb_to_hsv, rgb_to_lab};

/// Lightness CLAHE applied to a finished panorama
pub const ENHANCE_CLIP_LIMIT: f32 = 2.5;
pub const ENHANCE_GRID: u32 = 8;
/// Blur radius of the unsharp mask
pub const SHARPEN_SIGMA: f32 = 3.0;
/// Output is `(1 + amount) * img - amount * blurred`
pub const SHARPEN_AMOUNT: f32 = 0.5;
pub const SATURATION_GAIN: f32 = 1.2;

/// Whole-image finishing passes for merged results
pub struct Enhancer;

impl Enhancer {
    /// Local contrast enhancement, sharpening and a saturation lift, in that order
    pub fn enhance_panorama(img: &RasterImage) -> RasterImage {
        if img.width() == 0 || img.height() == 0 {
            return img.clone();
        }
        let contrasted = Self::lab_clahe(img, ENHANCE_CLIP_LIMIT, ENHANCE_GRID);
        let sharpened = Self::unsharp_mask(&contrasted, SHARPEN_SIGMA, SHARPEN_AMOUNT);
        let out = Self::scale_saturation(&sharpened, SATURATION_GAIN);
        log::debug!("Enhanced {}x{} panorama", out.width(), out.height());
        out
    }

    /// CLAHE on L*a*b* lightness; chroma is carried through unchanged
    pub fn lab_clahe(img: &RasterImage, clip_limit: f32, grid: u32) -> RasterImage {
        if img.width() == 0 || img.height() == 0 {
            return img.clone();
        }
        let lab: Vec<[f32; 3]> = img.as_raw().par_chunks(3).map(|c| rgb_to_lab([c[0], c[1], c[2]])).collect();
        let lightness = GrayImage::from_raw(img.width(), img.height(), lab.iter().map(|l| lightness_u8(l[0])).collect());
        let Some(lightness) = lightness else {
            return img.clone();
        };
        let equalized = ImagePreprocessing::apply_clahe(&lightness, clip_limit, grid);

        let rgb: Vec<u8> = lab
            .par_iter()
            .zip(equalized.as_raw().par_iter())
            .flat_map_iter(|(l, &v)| lab_to_rgb([lightness_from_u8(v), l[1], l[2]]))
            .collect();
        RasterImage::from_raw(img.width(), img.height(), rgb).unwrap_or_else(|| img.clone())
    }

    pub fn unsharp_mask(img: &RasterImage, sigma: f32, amount: f32) -> RasterImage {
        if img.width() == 0 || img.height() == 0 || !(sigma > 0.0) {
            return img.clone();
        }
        let blurred = gaussian_blur_f32(img, sigma);
        let mut out = RasterImage::new(img.width(), img.height());
        let out_buf: &mut [u8] = &mut out;
        out_buf
            .par_iter_mut()
            .zip(img.as_raw().par_iter().zip(blurred.as_raw().par_iter()))
            .for_each(|(o, (&v, &b))| {
                *o = ((1.0 + amount) * v as f32 - amount * b as f32).round().clamp(0.0, 255.0) as u8;
            });
        out
    }

    /// Multiply HSV saturation by `gain`, clamped to fully saturated
    pub fn scale_saturation(img: &RasterImage, gain: f32) -> RasterImage {
        let mut out = img.clone();
        let out_buf: &mut [u8] = &mut out;
        out_buf.par_chunks_mut(3).for_each(|px| {
            let [h, s, v] = rgb_to_hsv([px[0], px[1], px[2]]);
            px.copy_from_slice(&hsv_to_rgb([h, (s * gain).min(1.0), v]));
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn mean_saturation(img: &RasterImage) -> f32 {
        let total: f32 = img.pixels().map(|p| rgb_to_hsv(p.0)[1]).sum();
        total / (img.width() * img.height()) as f32
    }

    fn luma_std_dev(img: &RasterImage) -> f64 {
        let gray = ImagePreprocessing::to_gray(img);
        let n = gray.as_raw().len() as f64;
        let mean = gray.as_raw().iter().map(|&v| v as f64).sum::<f64>() / n;
        (gray.as_raw().iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n).sqrt()
    }

    /// Muted orange with a narrow brightness ripple
    fn flat_fixture() -> RasterImage {
        RasterImage::from_fn(160, 120, |x, y| Rgb([150 + (x % 16) as u8, 110 + (y % 16) as u8, 80]))
    }

    #[test]
    fn test_enhance_keeps_dimensions() {
        let img = flat_fixture();
        assert_eq!(Enhancer::enhance_panorama(&img).dimensions(), img.dimensions());
        let empty = RasterImage::new(0, 0);
        assert_eq!(Enhancer::enhance_panorama(&empty).dimensions(), (0, 0));
    }

    #[test]
    fn test_enhance_raises_contrast_and_saturation() {
        let img = flat_fixture();
        let out = Enhancer::enhance_panorama(&img);
        assert!(luma_std_dev(&out) > luma_std_dev(&img), "{} vs {}", luma_std_dev(&out), luma_std_dev(&img));
        assert!(mean_saturation(&out) > mean_saturation(&img), "{} vs {}", mean_saturation(&out), mean_saturation(&img));
    }

    #[test]
    fn test_saturation_gain_on_solid_colour() {
        let img = RasterImage::from_pixel(8, 8, Rgb([200, 150, 100]));
        let out = Enhancer::scale_saturation(&img, 1.2);
        let before = rgb_to_hsv([200, 150, 100]);
        let after = rgb_to_hsv(out.get_pixel(3, 3).0);
        assert!((after[1] - before[1] * 1.2).abs() < 0.01, "{:?} -> {:?}", before, after);
        assert!((after[2] - before[2]).abs() <= 1.0);

        let grey = RasterImage::from_pixel(4, 4, Rgb([90, 90, 90]));
        assert_eq!(Enhancer::scale_saturation(&grey, 1.2), grey);
        let vivid = RasterImage::from_pixel(4, 4, Rgb([255, 0, 0]));
        assert_eq!(Enhancer::scale_saturation(&vivid, 1.2), vivid);
    }

    #[test]
    fn test_unsharp_mask_leaves_flat_regions() {
        let img = RasterImage::from_pixel(32, 32, Rgb([60, 120, 180]));
        let out = Enhancer::unsharp_mask(&img, SHARPEN_SIGMA, SHARPEN_AMOUNT);
        assert!(out.as_raw().iter().zip(img.as_raw()).all(|(&a, &b)| (a as i32 - b as i32).abs() <= 1));
        assert_eq!(Enhancer::unsharp_mask(&img, 0.0, SHARPEN_AMOUNT), img);
    }

    #[test]
    fn test_unsharp_mask_overshoots_edges() {
        let img = RasterImage::from_fn(40, 10, |x, _| if x < 20 { Rgb([100, 100, 100]) } else { Rgb([160, 160, 160]) });
        let out = Enhancer::unsharp_mask(&img, SHARPEN_SIGMA, SHARPEN_AMOUNT);
        assert!(out.get_pixel(19, 5)[0] < 100);
        assert!(out.get_pixel(20, 5)[0] > 160);
        assert!((out.get_pixel(0, 5)[0] as i32 - 100).abs() <= 1);
    }
}
