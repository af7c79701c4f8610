use image::Rgb;
use imageproc::drawing::draw_line_segment_mut;
use rayon::prelude::*;
use stitch_core::{Homography, RasterImage, StitchError, StitchResult};

use crate::canvas::CanvasCompositor;
use crate::enhance::Enhancer;

/// Keeps the weighted-average denominator away from zero where neither source is painted
pub const BLEND_EPSILON: f32 = 1e-6;

/// CLAHE applied to lightness after alpha blending
pub const BOOST_CLIP_LIMIT: f32 = 3.0;
pub const BOOST_GRID: u32 = 8;

/// Width of the linear ramp between neighbours in a side-by-side strip
pub const SIDE_BY_SIDE_OVERLAP: u32 = 50;

const SEPARATOR_INSET: u32 = 5;
const SEPARATOR_COLOR: Rgb<u8> = Rgb([200, 200, 200]);

#[inline]
pub fn blend_denominator(mask_a: f32, mask_b: f32) -> f32 {
    mask_a + mask_b + BLEND_EPSILON
}

fn same_size(a: &RasterImage, b: &RasterImage) -> StitchResult<()> {
    if a.dimensions() != b.dimensions() {
        return Err(StitchError::DimensionMismatch {
            what: "blend inputs (pixels)",
            left: a.width() as usize * a.height() as usize,
            right: b.width() as usize * b.height() as usize,
        });
    }
    Ok(())
}

/// Pixel-combination strategies over equally sized rasters
pub struct Blender;

impl Blender {
    /// Per-channel average of the painted (non-zero) samples; unpainted stays 0
    pub fn cumulative(a: &RasterImage, b: &RasterImage) -> StitchResult<RasterImage> {
        same_size(a, b)?;
        let mut out = RasterImage::new(a.width(), a.height());
        let out_buf: &mut [u8] = &mut out;
        out_buf
            .par_iter_mut()
            .zip(a.as_raw().par_iter().zip(b.as_raw().par_iter()))
            .for_each(|(o, (&pa, &pb))| {
                let (ma, mb) = ((pa != 0) as u8 as f32, (pb != 0) as u8 as f32);
                let v = (pa as f32 * ma + pb as f32 * mb) / blend_denominator(ma, mb);
                *o = v.round().clamp(0.0, 255.0) as u8;
            });
        Ok(out)
    }

    /// `alpha * a + (1 - alpha) * b`
    pub fn alpha(a: &RasterImage, b: &RasterImage, alpha: f32) -> StitchResult<RasterImage> {
        same_size(a, b)?;
        let alpha = alpha.clamp(0.0, 1.0);
        let mut out = RasterImage::new(a.width(), a.height());
        let out_buf: &mut [u8] = &mut out;
        out_buf
            .par_iter_mut()
            .zip(a.as_raw().par_iter().zip(b.as_raw().par_iter()))
            .for_each(|(o, (&pa, &pb))| {
                *o = (alpha * pa as f32 + (1.0 - alpha) * pb as f32).round().clamp(0.0, 255.0) as u8;
            });
        Ok(out)
    }

    /// Local contrast enhancement on L*a*b* lightness, chroma untouched
    pub fn boost_contrast(img: &RasterImage) -> RasterImage {
        Enhancer::lab_clahe(img, BOOST_CLIP_LIMIT, BOOST_GRID)
    }

    /// `img` centred on a black `width` x `height` canvas (cropped if larger)
    pub fn pad_centered(img: &RasterImage, width: u32, height: u32) -> RasterImage {
        let mut out = RasterImage::new(width, height);
        let x = (width as i64 - img.width() as i64) / 2;
        let y = (height as i64 - img.height() as i64) / 2;
        image::imageops::replace(&mut out, img, x, y);
        out
    }

    /// Alpha blend without geometry: both images centred on the larger extent, then boosted
    pub fn overlay_unaligned(a: &RasterImage, b: &RasterImage, alpha: f32) -> RasterImage {
        let width = a.width().max(b.width());
        let height = a.height().max(b.height());
        let pa = Self::pad_centered(a, width, height);
        let pb = Self::pad_centered(b, width, height);
        match Self::alpha(&pa, &pb, alpha) {
            Ok(blended) => Self::boost_contrast(&blended),
            Err(_) => pa,
        }
    }

    /// Warp `a` into `b`'s frame through `a_to_b`, place `b` by translation only,
    /// alpha-blend and boost
    pub fn feature_aligned(
        a: &RasterImage,
        b: &RasterImage,
        a_to_b: &Homography,
        alpha: f32,
        max_canvas_pixels: u64,
    ) -> StitchResult<RasterImage> {
        let identity = Homography::identity();
        let canvas = CanvasCompositor::canvas_for_pair(a, a_to_b, b, &identity, max_canvas_pixels)?;
        let (warped_a, placed_b) = CanvasCompositor::composite(a, a_to_b, b, &identity, &canvas)?;
        let blended = Self::alpha(&warped_a, &placed_b, alpha)?;
        Ok(Self::boost_contrast(&blended))
    }

    /// Left-to-right strip with a linear ramp over `overlap` pixels between neighbours
    pub fn side_by_side(images: &[RasterImage], overlap: u32) -> Option<RasterImage> {
        if images.len() < 2 || images.iter().any(|img| img.width() == 0 || img.height() == 0) {
            return None;
        }
        let height = images.iter().map(|img| img.height()).max()?;
        let overlaps: Vec<u32> = images.windows(2).map(|w| overlap.min(w[0].width()).min(w[1].width())).collect();
        let width = images.iter().map(|img| img.width()).sum::<u32>() - overlaps.iter().sum::<u32>();

        let mut out = RasterImage::new(width, height);
        let mut x_offset = 0u32;
        for (i, img) in images.iter().enumerate() {
            let ramp = if i == 0 { 0 } else { overlaps[i - 1] };
            x_offset -= ramp;
            let y_offset = (height - img.height()) / 2;

            for (x, y, px) in img.enumerate_pixels() {
                let dst = out.get_pixel_mut(x_offset + x, y_offset + y);
                if x < ramp {
                    let t = x as f32 / ramp as f32;
                    for c in 0..3 {
                        dst[c] = ((1.0 - t) * dst[c] as f32 + t * px[c] as f32).round() as u8;
                    }
                } else {
                    *dst = *px;
                }
            }

            if ramp > SEPARATOR_INSET {
                let sx = (x_offset + SEPARATOR_INSET) as f32;
                draw_line_segment_mut(
                    &mut out,
                    (sx, y_offset as f32),
                    (sx, (y_offset + img.height() - 1) as f32),
                    SEPARATOR_COLOR,
                );
            }
            x_offset += img.width();
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn solid(w: u32, h: u32, c: [u8; 3]) -> RasterImage {
        RasterImage::from_pixel(w, h, Rgb(c))
    }

    #[test]
    fn test_cumulative_identical_inputs_unchanged() {
        let img = RasterImage::from_fn(30, 20, |x, y| Rgb([(x * 8) as u8, (y * 12) as u8, ((x + y) % 7) as u8]));
        assert_eq!(Blender::cumulative(&img, &img).unwrap(), img);
    }

    #[test]
    fn test_cumulative_masks_background() {
        let a = RasterImage::from_fn(4, 1, |x, _| if x < 2 { Rgb([100, 0, 50]) } else { Rgb([0, 0, 0]) });
        let b = RasterImage::from_fn(4, 1, |x, _| if x >= 1 { Rgb([200, 0, 150]) } else { Rgb([0, 0, 0]) });
        let out = Blender::cumulative(&a, &b).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgb([100, 0, 50]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([150, 0, 100]));
        assert_eq!(out.get_pixel(3, 0), &Rgb([200, 0, 150]));
    }

    #[test]
    fn test_size_mismatch_is_an_error() {
        let result = Blender::cumulative(&solid(3, 3, [1, 1, 1]), &solid(4, 3, [1, 1, 1]));
        assert!(matches!(result, Err(StitchError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_alpha_weights() {
        let out = Blender::alpha(&solid(2, 2, [200, 0, 100]), &solid(2, 2, [0, 100, 100]), 0.25).unwrap();
        assert_eq!(out.get_pixel(1, 1), &Rgb([50, 75, 100]));
    }

    #[test]
    fn test_overlay_pads_to_larger_extent() {
        let out = Blender::overlay_unaligned(&solid(40, 30, [255, 0, 0]), &solid(20, 50, [0, 0, 255]), 0.5);
        assert_eq!(out.dimensions(), (40, 50));
    }

    #[test]
    fn test_pad_centered() {
        let out = Blender::pad_centered(&solid(2, 2, [9, 9, 9]), 6, 4);
        assert_eq!(out.get_pixel(2, 1), &Rgb([9, 9, 9]));
        assert_eq!(out.get_pixel(3, 2), &Rgb([9, 9, 9]));
        assert_eq!(out.get_pixel(1, 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_boost_keeps_grey_neutral() {
        let img = RasterImage::from_fn(64, 64, |x, _| {
            let v = (60 + x) as u8;
            Rgb([v, v, v])
        });
        let boosted = Blender::boost_contrast(&img);
        assert_eq!(boosted.dimensions(), img.dimensions());
        for p in boosted.pixels() {
            assert!((p[0] as i32 - p[1] as i32).abs() <= 1 && (p[1] as i32 - p[2] as i32).abs() <= 1);
        }
    }

    #[test]
    fn test_feature_aligned_identity_canvas() {
        let a = solid(30, 20, [100, 100, 100]);
        let out = Blender::feature_aligned(&a, &a, &Homography::identity(), 0.5, u64::MAX).unwrap();
        assert_eq!(out.dimensions(), (30, 20));
    }

    #[test]
    fn test_side_by_side_geometry() {
        let images = vec![solid(100, 40, [255, 0, 0]), solid(80, 60, [0, 0, 255])];
        let out = Blender::side_by_side(&images, SIDE_BY_SIDE_OVERLAP).unwrap();
        assert_eq!(out.dimensions(), (130, 60));
        assert_eq!(out.get_pixel(10, 30), &Rgb([255, 0, 0]));
        assert_eq!(out.get_pixel(10, 5), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(120, 30), &Rgb([0, 0, 255]));
        let mid = out.get_pixel(75, 30);
        assert!(mid[0] > 0 && mid[2] > 0);
        assert_eq!(out.get_pixel(55, 30), &SEPARATOR_COLOR);
        assert!(Blender::side_by_side(&images[..1], 50).is_none());
    }

    proptest! {
        #[test]
        fn prop_denominator_never_zero(a in any::<bool>(), b in any::<bool>()) {
            prop_assert!(blend_denominator(a as u8 as f32, b as u8 as f32) > 0.0);
        }

        #[test]
        fn prop_cumulative_stays_between_inputs(pa in any::<u8>(), pb in any::<u8>()) {
            let out = Blender::cumulative(&solid(1, 1, [pa, pb, 0]), &solid(1, 1, [pb, pa, 0])).unwrap();
            let (lo, hi) = (pa.min(pb), pa.max(pb));
            let v = out.get_pixel(0, 0)[0];
            prop_assert!(v <= hi);
            prop_assert!(lo == 0 || v >= lo);
            prop_assert_eq!(out.get_pixel(0, 0)[2], 0);
        }
    }
}
