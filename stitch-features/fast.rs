use rayon::prelude::*;
use stitch_core::GrayImage;

/// Bresenham circle of radius 3 used by the FAST segment test
pub const FAST_OFFSETS: [(i32, i32); 16] = [
    (0, -3), (1, -3), (2, -2), (3, -1),
    (3, 0), (3, 1), (2, 2), (1, 3),
    (0, 3), (-1, 3), (-2, 2), (-3, 1),
    (-3, 0), (-3, -1), (-2, -2), (-1, -3),
];

/// Contiguous arc length required for a corner (FAST-9)
const ARC_LENGTH: u32 = 9;

/// Corner candidate in level coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

/// True if the circular 16-bit mask has a run of at least `run` set bits
pub fn has_circular_run(mask: u16, run: u32) -> bool {
    if run == 0 || run > 16 {
        return false;
    }
    let mut acc = mask;
    for i in 1..run {
        acc &= mask.rotate_right(i);
        if acc == 0 {
            return false;
        }
    }
    acc != 0
}

/// Detect FAST-9 corners at least `border` pixels from every edge, keeping only
/// local maxima of the corner score in a 3x3 neighbourhood
pub fn detect_corners(img: &GrayImage, threshold: u8, border: u32) -> Vec<Corner> {
    let (width, height) = img.dimensions();
    let border = border.max(3);
    if width <= 2 * border || height <= 2 * border {
        return Vec::new();
    }

    let w = width as usize;
    let src: &[u8] = img.as_raw();
    let offsets: Vec<isize> = FAST_OFFSETS.iter().map(|&(dx, dy)| dy as isize * w as isize + dx as isize).collect();

    let mut scores = vec![0.0f32; w * height as usize];
    scores
        .par_chunks_mut(w)
        .enumerate()
        .skip(border as usize)
        .take((height - 2 * border) as usize)
        .for_each(|(y, row)| {
            for x in border as usize..width as usize - border as usize {
                row[x] = corner_score(src, y * w + x, &offsets, threshold);
            }
        });

    let at = |x: usize, y: usize| scores[y * w + x];
    (border..height - border)
        .into_par_iter()
        .flat_map_iter(|y| {
            let y = y as usize;
            (border as usize..width as usize - border as usize).filter_map(move |x| {
                let s = at(x, y);
                if s <= 0.0 {
                    return None;
                }
                // Ties resolve towards the first pixel in raster order
                let earlier = [at(x - 1, y - 1), at(x, y - 1), at(x + 1, y - 1), at(x - 1, y)];
                let later = [at(x + 1, y), at(x - 1, y + 1), at(x, y + 1), at(x + 1, y + 1)];
                if earlier.iter().all(|&n| s > n) && later.iter().all(|&n| s >= n) {
                    Some(Corner { x: x as u32, y: y as u32, score: s })
                } else {
                    None
                }
            })
        })
        .collect()
}

/// Segment-test score: summed excess contrast over the circle, 0 if not a corner
fn corner_score(src: &[u8], idx: usize, offsets: &[isize], threshold: u8) -> f32 {
    let center = src[idx] as i32;
    let t = threshold as i32;
    let pixel = |k: usize| src[(idx as isize + offsets[k]) as usize] as i32;

    // Any 9-arc covers at least two of the four compass points
    let compass = [pixel(0), pixel(4), pixel(8), pixel(12)];
    let bright = compass.iter().filter(|&&p| p > center + t).count();
    let dark = compass.iter().filter(|&&p| p < center - t).count();
    if bright < 2 && dark < 2 {
        return 0.0;
    }

    let mut bright_mask = 0u16;
    let mut dark_mask = 0u16;
    let mut bright_sum = 0i32;
    let mut dark_sum = 0i32;
    for k in 0..16 {
        let p = pixel(k);
        if p > center + t {
            bright_mask |= 1 << k;
            bright_sum += p - center - t;
        } else if p < center - t {
            dark_mask |= 1 << k;
            dark_sum += center - t - p;
        }
    }

    let mut score = 0;
    if has_circular_run(bright_mask, ARC_LENGTH) {
        score = score.max(bright_sum);
    }
    if has_circular_run(dark_mask, ARC_LENGTH) {
        score = score.max(dark_sum);
    }
    score as f32
}

/// Intensity-centroid orientation over a disk of `radius`, in radians
pub fn intensity_centroid_angle(img: &GrayImage, x: u32, y: u32, radius: i32) -> f32 {
    let (width, height) = img.dimensions();
    let mut m10 = 0i64;
    let mut m01 = 0i64;
    let r2 = radius * radius;

    for dy in -radius..=radius {
        let py = y as i32 + dy;
        if py < 0 || py >= height as i32 {
            continue;
        }
        for dx in -radius..=radius {
            let px = x as i32 + dx;
            if dx * dx + dy * dy > r2 || px < 0 || px >= width as i32 {
                continue;
            }
            let v = img.get_pixel(px as u32, py as u32)[0] as i64;
            m10 += dx as i64 * v;
            m01 += dy as i64 * v;
        }
    }

    if m10 == 0 && m01 == 0 {
        0.0
    } else {
        (m01 as f32).atan2(m10 as f32)
    }
}
