use image::Rgb;
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use stitch_core::RasterImage;

pub const GLYPH_WIDTH: u32 = 5;
pub const GLYPH_HEIGHT: u32 = 7;
const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;

pub const BORDER_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Rows of a 5x7 glyph, most significant of the low five bits is the leftmost column.
/// Lowercase letters render as uppercase.
fn glyph(c: char) -> [u8; 7] {
    match c.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '=' => [0x00, 0x00, 0x1F, 0x00, 0x1F, 0x00, 0x00],
        '/' => [0x01, 0x01, 0x02, 0x04, 0x08, 0x10, 0x10],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        ' ' => [0x00; 7],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}

/// Borders, captions and labels rendered with a built-in bitmap font
pub struct Annotator;

impl Annotator {
    pub fn text_width(text: &str, scale: u32) -> u32 {
        let n = text.chars().count() as u32;
        if n == 0 { 0 } else { (n * GLYPH_ADVANCE - 1) * scale }
    }

    pub fn text_height(scale: u32) -> u32 {
        GLYPH_HEIGHT * scale
    }

    /// Draw `text` with its top-left corner at (x, y); anything outside the image is clipped
    pub fn draw_text(img: &mut RasterImage, text: &str, x: i32, y: i32, scale: u32, color: Rgb<u8>) {
        let scale = scale.max(1);
        for (i, c) in text.chars().enumerate() {
            let gx = x + (i as u32 * GLYPH_ADVANCE * scale) as i32;
            for (row, bits) in glyph(c).iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if bits & (1 << (GLYPH_WIDTH - 1 - col)) != 0 {
                        let rect = Rect::at(gx + (col * scale) as i32, y + (row as u32 * scale) as i32).of_size(scale, scale);
                        draw_filled_rect_mut(img, rect, color);
                    }
                }
            }
        }
    }

    /// Text on a dark backing box, used for pane labels
    pub fn label(img: &mut RasterImage, text: &str, x: i32, y: i32) {
        let scale = 2;
        let pad = 4;
        let w = Self::text_width(text, scale) + 2 * pad;
        let h = Self::text_height(scale) + 2 * pad;
        draw_filled_rect_mut(img, Rect::at(x, y).of_size(w.max(1), h), BORDER_COLOR);
        Self::draw_text(img, text, x + pad as i32, y + pad as i32, scale, TEXT_COLOR);
    }

    /// Uniform border of `size` pixels on every side
    pub fn add_border(img: &RasterImage, size: u32) -> RasterImage {
        if size == 0 {
            return img.clone();
        }
        let mut out = RasterImage::from_pixel(img.width() + 2 * size, img.height() + 2 * size, BORDER_COLOR);
        image::imageops::replace(&mut out, img, size as i64, size as i64);
        out
    }

    /// Border plus an optional caption centred in the top border strip
    pub fn frame(img: &RasterImage, border: u32, caption: Option<&str>) -> RasterImage {
        let mut out = Self::add_border(img, border);
        let Some(text) = caption else {
            return out;
        };
        let scale = if border >= Self::text_height(2) + 2 {
            2
        } else if border >= Self::text_height(1) + 2 {
            1
        } else {
            return out;
        };
        let x = (out.width() as i32 - Self::text_width(text, scale) as i32) / 2;
        let y = (border as i32 - Self::text_height(scale) as i32) / 2;
        Self::draw_text(&mut out, text, x, y, scale, TEXT_COLOR);
        out
    }
}
