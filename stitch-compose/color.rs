//! sRGB <-> CIE L*a*b* (D65) for lightness-only contrast work, and HSV for
//! saturation adjustments.

const XN: f32 = 0.950456;
const ZN: f32 = 1.088754;

const RGB_TO_XYZ: [[f32; 3]; 3] = [
    [0.412453, 0.357580, 0.180423],
    [0.212671, 0.715160, 0.072169],
    [0.019334, 0.119193, 0.950227],
];

const XYZ_TO_RGB: [[f32; 3]; 3] = [
    [3.240479, -1.537150, -0.498535],
    [-0.969256, 1.875991, 0.041556],
    [0.055648, -0.204043, 1.057311],
];

fn to_linear(c: f32) -> f32 {
    if c <= 0.04045 { c / 12.92 } else { ((c + 0.055) / 1.055).powf(2.4) }
}

fn to_gamma(c: f32) -> f32 {
    if c <= 0.003_130_8 { 12.92 * c } else { 1.055 * c.powf(1.0 / 2.4) - 0.055 }
}

fn f(t: f32) -> f32 {
    if t > 0.008856 { t.cbrt() } else { 7.787 * t + 16.0 / 116.0 }
}

fn f_inv(t: f32) -> f32 {
    let cube = t * t * t;
    if cube > 0.008856 { cube } else { (t - 16.0 / 116.0) / 7.787 }
}

fn mul(m: &[[f32; 3]; 3], v: [f32; 3]) -> [f32; 3] {
    std::array::from_fn(|i| m[i][0] * v[0] + m[i][1] * v[1] + m[i][2] * v[2])
}

/// 8-bit RGB to (L in 0..100, a, b)
pub fn rgb_to_lab(rgb: [u8; 3]) -> [f32; 3] {
    let linear = rgb.map(|c| to_linear(c as f32 / 255.0));
    let [x, y, z] = mul(&RGB_TO_XYZ, linear);
    let (fx, fy, fz) = (f(x / XN), f(y), f(z / ZN));
    let l = if y > 0.008856 { 116.0 * fy - 16.0 } else { 903.3 * y };
    [l, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

pub fn lab_to_rgb(lab: [f32; 3]) -> [u8; 3] {
    let [l, a, b] = lab;
    let fy = (l + 16.0) / 116.0;
    let y = if l > 903.3 * 0.008856 { fy * fy * fy } else { l / 903.3 };
    let x = f_inv(fy + a / 500.0) * XN;
    let z = f_inv(fy - b / 200.0) * ZN;
    mul(&XYZ_TO_RGB, [x, y, z]).map(|c| (to_gamma(c.clamp(0.0, 1.0)) * 255.0).round().clamp(0.0, 255.0) as u8)
}

/// Lightness on the 8-bit 0..255 scale
pub fn lightness_u8(l: f32) -> u8 {
    (l * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8
}

pub fn lightness_from_u8(v: u8) -> f32 {
    v as f32 * 100.0 / 255.0
}

/// 8-bit RGB to (hue in 0..360 degrees, saturation in 0..1, value in 0..255)
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [f32; 3] {
    let [r, g, b] = rgb.map(|c| c as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let s = if max > 0.0 { delta / max } else { 0.0 };
    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    [h, s, max]
}

pub fn hsv_to_rgb(hsv: [f32; 3]) -> [u8; 3] {
    let [h, s, v] = hsv;
    let c = v * s.clamp(0.0, 1.0);
    let sector = h.rem_euclid(360.0) / 60.0;
    let x = c * (1.0 - (sector % 2.0 - 1.0).abs());
    let (r, g, b) = match sector as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    [r, g, b].map(|ch| (ch + m).round().clamp(0.0, 255.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_reference_points() {
        let white = rgb_to_lab([255, 255, 255]);
        assert_abs_diff_eq!(white[0], 100.0, epsilon = 0.05);
        assert_abs_diff_eq!(white[1], 0.0, epsilon = 0.05);
        assert_abs_diff_eq!(white[2], 0.0, epsilon = 0.05);
        assert_abs_diff_eq!(rgb_to_lab([0, 0, 0])[0], 0.0, epsilon = 1e-4);
        let red = rgb_to_lab([255, 0, 0]);
        assert_abs_diff_eq!(red[0], 53.2, epsilon = 0.3);
        assert!(red[1] > 75.0);
    }

    #[test]
    fn test_grey_has_no_chroma() {
        for v in [10u8, 77, 128, 200] {
            let lab = rgb_to_lab([v, v, v]);
            assert!(lab[1].abs() < 0.05 && lab[2].abs() < 0.05);
        }
    }

    #[test]
    fn test_roundtrip_within_one_level() {
        for rgb in [[12u8, 200, 99], [255, 128, 0], [3, 3, 250], [128, 128, 128], [0, 0, 0], [255, 255, 255]] {
            let back = lab_to_rgb(rgb_to_lab(rgb));
            for c in 0..3 {
                assert!((back[c] as i32 - rgb[c] as i32).abs() <= 1, "{:?} -> {:?}", rgb, back);
            }
        }
    }

    #[test]
    fn test_hsv_primaries() {
        let red = rgb_to_hsv([255, 0, 0]);
        assert_abs_diff_eq!(red[0], 0.0);
        assert_abs_diff_eq!(red[1], 1.0);
        assert_abs_diff_eq!(red[2], 255.0);
        assert_abs_diff_eq!(rgb_to_hsv([0, 255, 0])[0], 120.0);
        assert_abs_diff_eq!(rgb_to_hsv([0, 0, 255])[0], 240.0);
        assert_abs_diff_eq!(rgb_to_hsv([90, 90, 90])[1], 0.0);
        assert_abs_diff_eq!(rgb_to_hsv([0, 0, 0])[1], 0.0);
    }

    #[test]
    fn test_hsv_roundtrip_within_one_level() {
        for rgb in [[12u8, 200, 99], [255, 128, 0], [3, 3, 250], [200, 10, 180], [128, 128, 128], [0, 0, 0]] {
            let back = hsv_to_rgb(rgb_to_hsv(rgb));
            for c in 0..3 {
                assert!((back[c] as i32 - rgb[c] as i32).abs() <= 1, "{:?} -> {:?}", rgb, back);
            }
        }
    }
}
