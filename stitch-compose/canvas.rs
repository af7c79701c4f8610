use image::Rgb;
use rayon::prelude::*;
use stitch_core::{Homography, RasterImage, StitchError, StitchResult};

/// Corner coordinates within this distance of an integer are treated as that integer
const SNAP_EPSILON: f64 = 1e-4;

/// Shared output frame: size plus the translation that moves every warped
/// source into non-negative coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub offset: (i64, i64),
}

impl Canvas {
    pub fn translation(&self) -> Homography {
        Homography::translation(self.offset.0 as f64, self.offset.1 as f64)
    }

    /// `h` followed by the canvas translation
    pub fn placement(&self, h: &Homography) -> Homography {
        h.then(&self.translation())
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

pub type Corners = [(f64, f64); 4];

fn snap(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < SNAP_EPSILON { r } else { v }
}

/// Canvas extent, warping and two-image composition
pub struct CanvasCompositor;

impl CanvasCompositor {
    /// Image corners (0,0), (w,0), (w,h), (0,h) mapped through `h`
    pub fn transform_corners(width: u32, height: u32, h: &Homography) -> Option<Corners> {
        let (w, ht) = (width as f64, height as f64);
        Some([h.apply(0.0, 0.0)?, h.apply(w, 0.0)?, h.apply(w, ht)?, h.apply(0.0, ht)?])
    }

    /// Bounding canvas of every corner set (floor of the minimum, ceil of the maximum)
    pub fn compute_canvas(corner_sets: &[Corners], max_pixels: u64) -> StitchResult<Canvas> {
        let points: Vec<(f64, f64)> = corner_sets.iter().flatten().map(|&(x, y)| (snap(x), snap(y))).collect();
        if points.is_empty() {
            return Err(StitchError::HomographyFailure("no corners to bound".to_string()));
        }
        if points.iter().any(|p| !p.0.is_finite() || !p.1.is_finite()) {
            return Err(StitchError::HomographyFailure("transformed corner is not finite".to_string()));
        }

        let min_x = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min).floor();
        let min_y = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min).floor();
        let max_x = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max).ceil();
        let max_y = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max).ceil();

        let width = (max_x - min_x).max(1.0);
        let height = (max_y - min_y).max(1.0);
        if width * height > max_pixels as f64 || width > u32::MAX as f64 || height > u32::MAX as f64 {
            return Err(StitchError::CanvasTooLarge {
                width: width.min(u64::MAX as f64) as u64,
                height: height.min(u64::MAX as f64) as u64,
                limit: max_pixels,
            });
        }

        Ok(Canvas { width: width as u32, height: height as u32, offset: (-min_x as i64, -min_y as i64) })
    }

    /// Canvas holding `base` (at `base_h`) and `other` (at `other_h`)
    pub fn canvas_for_pair(
        base: &RasterImage,
        base_h: &Homography,
        other: &RasterImage,
        other_h: &Homography,
        max_pixels: u64,
    ) -> StitchResult<Canvas> {
        let corners = |img: &RasterImage, h: &Homography| {
            Self::transform_corners(img.width(), img.height(), h)
                .ok_or_else(|| StitchError::HomographyFailure("corner maps to infinity".to_string()))
        };
        Self::compute_canvas(&[corners(base, base_h)?, corners(other, other_h)?], max_pixels)
    }

    /// Resample `src` into a `canvas`-sized raster through `h` (source -> canvas) by
    /// inverse mapping with bilinear interpolation; unmapped pixels stay 0
    pub fn warp(src: &RasterImage, h: &Homography, canvas: &Canvas) -> StitchResult<RasterImage> {
        let inverse = h
            .inverse()
            .ok_or_else(|| StitchError::HomographyFailure("transform is not invertible".to_string()))?;
        let mut out = RasterImage::new(canvas.width, canvas.height);
        let row_len = canvas.width as usize * 3;
        if row_len == 0 {
            return Ok(out);
        }

        let out_buf: &mut [u8] = &mut out;
        out_buf.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
            for x in 0..canvas.width as usize {
                let sample = inverse.apply(x as f64, y as f64).and_then(|(sx, sy)| bilinear(src, sx, sy));
                if let Some(px) = sample {
                    row[x * 3..x * 3 + 3].copy_from_slice(&px.0);
                }
            }
        });
        Ok(out)
    }

    /// Warp `base` and `other` into one shared canvas
    pub fn composite(
        base: &RasterImage,
        base_h: &Homography,
        other: &RasterImage,
        other_h: &Homography,
        canvas: &Canvas,
    ) -> StitchResult<(RasterImage, RasterImage)> {
        let warped_base = Self::warp(base, &canvas.placement(base_h), canvas)?;
        let warped_other = Self::warp(other, &canvas.placement(other_h), canvas)?;
        log::debug!("composited onto {}x{} canvas, offset {:?}", canvas.width, canvas.height, canvas.offset);
        Ok((warped_base, warped_other))
    }
}

/// Bilinear sample; `None` outside the source pixel grid
fn bilinear(src: &RasterImage, x: f64, y: f64) -> Option<Rgb<u8>> {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    let (max_x, max_y) = ((w - 1) as f64, (h - 1) as f64);
    if x < -SNAP_EPSILON || y < -SNAP_EPSILON || x > max_x + SNAP_EPSILON || y > max_y + SNAP_EPSILON {
        return None;
    }
    let (x, y) = (x.clamp(0.0, max_x), y.clamp(0.0, max_y));
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f64, y - y0 as f64);

    let (p00, p10) = (src.get_pixel(x0, y0), src.get_pixel(x1, y0));
    let (p01, p11) = (src.get_pixel(x0, y1), src.get_pixel(x1, y1));
    let mut out = [0u8; 3];
    for (c, v) in out.iter_mut().enumerate() {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        *v = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(out))
}
