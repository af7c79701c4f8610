use std::f32::consts::{PI, SQRT_2};

use image::{ImageBuffer, Luma};
use imageproc::filter::gaussian_blur_f32;
use rayon::prelude::*;
use stitch_core::{DetectorKind, Features, FloatDescriptor, GrayImage, Keypoint, FLOAT_DESCRIPTOR_LEN};

use crate::detector::FeatureDetector;

const IMG_BORDER: usize = 5;
const MAX_INTERP_STEPS: usize = 5;
/// Blur already present in a camera image
const INIT_SIGMA: f32 = 0.5;

const ORI_HIST_BINS: usize = 36;
const ORI_SIG_FACTOR: f32 = 1.5;
const ORI_RADIUS_FACTOR: f32 = 3.0 * ORI_SIG_FACTOR;
const ORI_PEAK_RATIO: f32 = 0.8;

const DESCR_WIDTH: usize = 4;
const DESCR_HIST_BINS: usize = 8;
const DESCR_SCL_FACTOR: f32 = 3.0;
const DESCR_MAG_THR: f32 = 0.2;

type FloatBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Row-major single-channel float image with values in 0..1
#[derive(Debug, Clone)]
struct FloatImage {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl FloatImage {
    fn from_gray(gray: &GrayImage) -> Self {
        Self {
            width: gray.width() as usize,
            height: gray.height() as usize,
            data: gray.as_raw().iter().map(|&v| v as f32 / 255.0).collect(),
        }
    }

    #[inline]
    fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Keep every other pixel in both directions
    fn downsample(&self) -> Self {
        let width = (self.width / 2).max(1);
        let height = (self.height / 2).max(1);
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(self.at(2 * x, 2 * y));
            }
        }
        Self { width, height, data }
    }

    /// Gaussian blur with edge replication
    fn blur(&self, sigma: f32) -> Self {
        if !(sigma > 0.0) {
            return self.clone();
        }
        let Some(buf) = FloatBuffer::from_raw(self.width as u32, self.height as u32, self.data.clone()) else {
            return self.clone();
        };
        let data = gaussian_blur_f32(&buf, sigma).into_raw();
        Self { width: self.width, height: self.height, data }
    }

    /// `self - other`, pixel-wise
    fn minus(&self, other: &Self) -> Self {
        let data = self.data.iter().zip(&other.data).map(|(a, b)| a - b).collect();
        Self { width: self.width, height: self.height, data }
    }

    /// Central-difference gradient (dx, dy) at an interior pixel
    #[inline]
    fn gradient(&self, x: usize, y: usize) -> (f32, f32) {
        (self.at(x + 1, y) - self.at(x - 1, y), self.at(x, y + 1) - self.at(x, y - 1))
    }
}

/// Refined scale-space extremum in octave coordinates
#[derive(Debug, Clone, Copy)]
struct Candidate {
    octave: usize,
    layer: usize,
    x: f32,
    y: f32,
    /// Scale within the octave
    sigma: f32,
    response: f32,
}

/// Value, gradient and Hessian of the DoG stack at an integer location
struct LocalFit {
    value: f32,
    gradient: [f32; 3],
    hessian: [[f32; 3]; 3],
}

fn local_fit(dogs: &[FloatImage], layer: usize, x: usize, y: usize) -> LocalFit {
    let (prev, cur, next) = (&dogs[layer - 1], &dogs[layer], &dogs[layer + 1]);
    let v = cur.at(x, y);

    let dx = (cur.at(x + 1, y) - cur.at(x - 1, y)) * 0.5;
    let dy = (cur.at(x, y + 1) - cur.at(x, y - 1)) * 0.5;
    let ds = (next.at(x, y) - prev.at(x, y)) * 0.5;

    let dxx = cur.at(x + 1, y) + cur.at(x - 1, y) - 2.0 * v;
    let dyy = cur.at(x, y + 1) + cur.at(x, y - 1) - 2.0 * v;
    let dss = next.at(x, y) + prev.at(x, y) - 2.0 * v;
    let dxy = (cur.at(x + 1, y + 1) - cur.at(x - 1, y + 1) - cur.at(x + 1, y - 1) + cur.at(x - 1, y - 1)) * 0.25;
    let dxs = (next.at(x + 1, y) - next.at(x - 1, y) - prev.at(x + 1, y) + prev.at(x - 1, y)) * 0.25;
    let dys = (next.at(x, y + 1) - next.at(x, y - 1) - prev.at(x, y + 1) + prev.at(x, y - 1)) * 0.25;

    LocalFit {
        value: v,
        gradient: [dx, dy, ds],
        hessian: [[dxx, dxy, dxs], [dxy, dyy, dys], [dxs, dys, dss]],
    }
}

/// Solve `m * x = b` by Cramer's rule
fn solve3(m: &[[f32; 3]; 3], b: [f32; 3]) -> Option<[f32; 3]> {
    let det3 = |a: &[[f32; 3]; 3]| {
        a[0][0] * (a[1][1] * a[2][2] - a[1][2] * a[2][1]) - a[0][1] * (a[1][0] * a[2][2] - a[1][2] * a[2][0])
            + a[0][2] * (a[1][0] * a[2][1] - a[1][1] * a[2][0])
    };
    let det = det3(m);
    if det.abs() < 1e-12 || !det.is_finite() {
        return None;
    }
    let mut x = [0.0f32; 3];
    for (col, out) in x.iter_mut().enumerate() {
        let mut replaced = *m;
        for row in 0..3 {
            replaced[row][col] = b[row];
        }
        *out = det3(&replaced) / det;
    }
    Some(x)
}

/// Difference-of-Gaussians detector with 128-element gradient histogram descriptors
pub struct SiftDetector {
    max_features: usize,
    n_layers: usize,
    contrast_threshold: f32,
    edge_threshold: f32,
    sigma: f32,
}

impl SiftDetector {
    pub fn new(max_features: usize) -> Self {
        Self {
            max_features,
            n_layers: 3,
            contrast_threshold: 0.04,
            edge_threshold: 10.0,
            sigma: 1.6,
        }
    }

    fn octave_count(width: usize, height: usize) -> usize {
        let min_dim = width.min(height).max(1) as f32;
        (min_dim.log2().floor() as i64 - 3).max(1) as usize
    }

    /// Gaussian stacks per octave (`n_layers + 3` images each)
    fn build_gaussians(&self, gray: &GrayImage) -> Vec<Vec<FloatImage>> {
        let s = self.n_layers;
        let k = 2f32.powf(1.0 / s as f32);
        let mut increments = vec![0.0f32; s + 3];
        for (i, inc) in increments.iter_mut().enumerate().skip(1) {
            let prev = self.sigma * k.powi(i as i32 - 1);
            let total = prev * k;
            *inc = (total * total - prev * prev).sqrt();
        }

        let base_sigma = (self.sigma * self.sigma - INIT_SIGMA * INIT_SIGMA).max(0.01).sqrt();
        let base = FloatImage::from_gray(gray).blur(base_sigma);
        let n_octaves = Self::octave_count(base.width, base.height);

        let mut octaves: Vec<Vec<FloatImage>> = Vec::with_capacity(n_octaves);
        for o in 0..n_octaves {
            let first = if o == 0 { base.clone() } else { octaves[o - 1][s].downsample() };
            if first.width <= 2 * IMG_BORDER + 2 || first.height <= 2 * IMG_BORDER + 2 {
                break;
            }
            let mut layers = Vec::with_capacity(s + 3);
            layers.push(first);
            for inc in increments.iter().skip(1) {
                let next = layers[layers.len() - 1].blur(*inc);
                layers.push(next);
            }
            octaves.push(layers);
        }
        octaves
    }

    fn find_candidates(&self, octave: usize, dogs: &[FloatImage]) -> Vec<Candidate> {
        let (w, h) = (dogs[0].width, dogs[0].height);
        let prefilter = 0.5 * self.contrast_threshold / self.n_layers as f32;

        (1..=self.n_layers)
            .flat_map(|layer| (IMG_BORDER..h - IMG_BORDER).map(move |y| (layer, y)))
            .collect::<Vec<_>>()
            .into_par_iter()
            .flat_map_iter(|(layer, y)| {
                (IMG_BORDER..w - IMG_BORDER).filter_map(move |x| {
                    let v = dogs[layer].at(x, y);
                    if v.abs() <= prefilter || !is_extremum(dogs, layer, x, y, v) {
                        return None;
                    }
                    self.refine(dogs, octave, layer, x, y)
                })
            })
            .collect()
    }

    /// Quadratic sub-pixel/sub-scale refinement with contrast and edge rejection
    fn refine(&self, dogs: &[FloatImage], octave: usize, layer: usize, x: usize, y: usize) -> Option<Candidate> {
        let s = self.n_layers as isize;
        let (w, h) = (dogs[0].width as isize, dogs[0].height as isize);
        let border = IMG_BORDER as isize;
        let (mut xi, mut yi, mut li) = (x as isize, y as isize, layer as isize);

        for _ in 0..MAX_INTERP_STEPS {
            let fit = local_fit(dogs, li as usize, xi as usize, yi as usize);
            let g = fit.gradient;
            let offset = solve3(&fit.hessian, [-g[0], -g[1], -g[2]])?;

            if offset.iter().all(|o| o.abs() < 0.5) {
                let contrast = fit.value + 0.5 * (g[0] * offset[0] + g[1] * offset[1] + g[2] * offset[2]);
                if contrast.abs() * (s as f32) < self.contrast_threshold {
                    return None;
                }

                let [[dxx, dxy, _], [_, dyy, _], _] = fit.hessian;
                let trace = dxx + dyy;
                let det = dxx * dyy - dxy * dxy;
                let r = self.edge_threshold;
                if det <= 0.0 || trace * trace * r >= (r + 1.0) * (r + 1.0) * det {
                    return None;
                }

                let layer_f = li as f32 + offset[2];
                return Some(Candidate {
                    octave,
                    layer: li as usize,
                    x: xi as f32 + offset[0],
                    y: yi as f32 + offset[1],
                    sigma: self.sigma * 2f32.powf(layer_f / s as f32),
                    response: contrast.abs(),
                });
            }

            if offset.iter().any(|o| !o.is_finite() || o.abs() > w.max(h) as f32) {
                return None;
            }
            xi += offset[0].round() as isize;
            yi += offset[1].round() as isize;
            li += offset[2].round() as isize;

            if li < 1 || li > s || xi < border || xi >= w - border || yi < border || yi >= h - border {
                return None;
            }
        }
        None
    }

    /// Dominant gradient orientations (radians, 0..2pi) around a candidate
    fn orientations(&self, img: &FloatImage, c: &Candidate) -> Vec<f32> {
        let sigma = ORI_SIG_FACTOR * c.sigma;
        let radius = (ORI_RADIUS_FACTOR * c.sigma).round() as isize;
        let weight_scale = -1.0 / (2.0 * sigma * sigma);
        let (cx, cy) = (c.x.round() as isize, c.y.round() as isize);
        let (w, h) = (img.width as isize, img.height as isize);

        let mut hist = [0.0f32; ORI_HIST_BINS];
        for dy in -radius..=radius {
            let y = cy + dy;
            if y <= 0 || y >= h - 1 {
                continue;
            }
            for dx in -radius..=radius {
                let x = cx + dx;
                if x <= 0 || x >= w - 1 {
                    continue;
                }
                let (gx, gy) = img.gradient(x as usize, y as usize);
                let weight = (((dx * dx + dy * dy) as f32) * weight_scale).exp();
                let angle = gy.atan2(gx).rem_euclid(2.0 * PI);
                let bin = (angle * ORI_HIST_BINS as f32 / (2.0 * PI)).round() as usize % ORI_HIST_BINS;
                hist[bin] += weight * (gx * gx + gy * gy).sqrt();
            }
        }

        let n = ORI_HIST_BINS as isize;
        let at = |i: isize| hist[i.rem_euclid(n) as usize];
        let smoothed: Vec<f32> = (0..n)
            .map(|i| (at(i - 2) + at(i + 2)) / 16.0 + (at(i - 1) + at(i + 1)) * 4.0 / 16.0 + at(i) * 6.0 / 16.0)
            .collect();

        let max = smoothed.iter().copied().fold(0.0f32, f32::max);
        if max <= 0.0 {
            return vec![0.0];
        }

        let mut angles = Vec::new();
        for i in 0..ORI_HIST_BINS {
            let l = smoothed[(i + ORI_HIST_BINS - 1) % ORI_HIST_BINS];
            let r = smoothed[(i + 1) % ORI_HIST_BINS];
            let c = smoothed[i];
            if c > l && c > r && c >= ORI_PEAK_RATIO * max {
                let bin = (i as f32 + 0.5 * (l - r) / (l - 2.0 * c + r)).rem_euclid(ORI_HIST_BINS as f32);
                angles.push(bin * 2.0 * PI / ORI_HIST_BINS as f32);
            }
        }
        angles
    }

    /// 4x4 spatial cells of 8-bin orientation histograms, trilinearly weighted
    fn descriptor(&self, img: &FloatImage, c: &Candidate, angle: f32) -> FloatDescriptor {
        let d = DESCR_WIDTH as f32;
        let n = DESCR_HIST_BINS;
        let (sin_t, cos_t) = angle.sin_cos();
        let hist_width = DESCR_SCL_FACTOR * c.sigma;
        let (w, h) = (img.width as isize, img.height as isize);
        let max_radius = ((w * w + h * h) as f32).sqrt();
        let radius = (hist_width * SQRT_2 * (d + 1.0) * 0.5).min(max_radius).round() as isize;
        let bins_per_rad = n as f32 / (2.0 * PI);
        let (cx, cy) = (c.x.round() as isize, c.y.round() as isize);

        let mut desc = [0.0f32; FLOAT_DESCRIPTOR_LEN];
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let xr = (cos_t * dx as f32 + sin_t * dy as f32) / hist_width;
                let yr = (-sin_t * dx as f32 + cos_t * dy as f32) / hist_width;
                let rbin = yr + d / 2.0 - 0.5;
                let cbin = xr + d / 2.0 - 0.5;
                if rbin <= -1.0 || rbin >= d || cbin <= -1.0 || cbin >= d {
                    continue;
                }
                let (x, y) = (cx + dx, cy + dy);
                if x <= 0 || x >= w - 1 || y <= 0 || y >= h - 1 {
                    continue;
                }

                let (gx, gy) = img.gradient(x as usize, y as usize);
                let weight = (-(xr * xr + yr * yr) / (0.5 * d * d)).exp();
                let magnitude = (gx * gx + gy * gy).sqrt() * weight;
                let obin = (gy.atan2(gx) - angle).rem_euclid(2.0 * PI) * bins_per_rad;

                let (r0, c0, o0) = (rbin.floor(), cbin.floor(), obin.floor());
                let (fr, fc, fo) = (rbin - r0, cbin - c0, obin - o0);
                for (ri, wr) in [(r0 as isize, 1.0 - fr), (r0 as isize + 1, fr)] {
                    if ri < 0 || ri >= DESCR_WIDTH as isize {
                        continue;
                    }
                    for (ci, wc) in [(c0 as isize, 1.0 - fc), (c0 as isize + 1, fc)] {
                        if ci < 0 || ci >= DESCR_WIDTH as isize {
                            continue;
                        }
                        let cell = (ri as usize * DESCR_WIDTH + ci as usize) * n;
                        for (oi, wo) in [(o0 as usize % n, 1.0 - fo), ((o0 as usize + 1) % n, fo)] {
                            desc[cell + oi] += magnitude * wr * wc * wo;
                        }
                    }
                }
            }
        }

        normalize_clipped(&mut desc);
        desc
    }
}

/// Unit-normalise, clip large components, renormalise
fn normalize_clipped(desc: &mut FloatDescriptor) {
    let norm = desc.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return;
    }
    let clip = DESCR_MAG_THR * norm;
    desc.iter_mut().for_each(|v| *v = v.min(clip));
    let norm = desc.iter().map(|v| v * v).sum::<f32>().sqrt().max(f32::EPSILON);
    desc.iter_mut().for_each(|v| *v /= norm);
}

fn is_extremum(dogs: &[FloatImage], layer: usize, x: usize, y: usize, v: f32) -> bool {
    let is_max = v > 0.0;
    for img in &dogs[layer - 1..=layer + 1] {
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                let n = img.at(nx, ny);
                if (is_max && n > v) || (!is_max && n < v) {
                    return false;
                }
            }
        }
    }
    true
}

impl FeatureDetector for SiftDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Sift
    }

    fn detect_and_describe(&self, gray: &GrayImage) -> Features {
        if gray.width() as usize <= 2 * IMG_BORDER + 2 || gray.height() as usize <= 2 * IMG_BORDER + 2 {
            return Features::from_float(Vec::new());
        }

        let gaussians = self.build_gaussians(gray);
        let dogs: Vec<Vec<FloatImage>> = gaussians
            .iter()
            .map(|layers| layers.windows(2).map(|pair| pair[1].minus(&pair[0])).collect())
            .collect();

        let candidates: Vec<Candidate> = dogs
            .iter()
            .enumerate()
            .flat_map(|(o, octave_dogs)| self.find_candidates(o, octave_dogs))
            .collect();

        let mut found: Vec<(Keypoint, FloatDescriptor)> = candidates
            .par_iter()
            .flat_map_iter(|c| {
                let img = &gaussians[c.octave][c.layer];
                let octave_scale = (1usize << c.octave) as f32;
                self.orientations(img, c).into_iter().map(move |angle| {
                    let kp = Keypoint {
                        x: c.x * octave_scale,
                        y: c.y * octave_scale,
                        angle,
                        scale: c.sigma * octave_scale / self.sigma,
                        response: c.response,
                    };
                    (kp, self.descriptor(img, c, angle))
                })
            })
            .collect();

        found.sort_by(|a, b| b.0.response.total_cmp(&a.0.response));
        found.truncate(self.max_features);

        log::debug!("SIFT: {} keypoints from {} extrema over {} octaves", found.len(), candidates.len(), gaussians.len());
        Features::from_float(found)
    }
}
