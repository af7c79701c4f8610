use image::Rgb;
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut};
use stitch_compose::{Annotator, MIN_CORRESPONDENCES};
use stitch_core::RasterImage;
use stitch_features::{FeatureExtractor, FeatureMatcher, ImagePreprocessing};

use crate::session::MergeSession;

/// Matches drawn per visualisation, best first
pub const MAX_DRAWN_MATCHES: usize = 50;

const PALETTE: [Rgb<u8>; 6] = [
    Rgb([255, 64, 64]),
    Rgb([64, 255, 64]),
    Rgb([64, 128, 255]),
    Rgb([255, 220, 0]),
    Rgb([255, 0, 255]),
    Rgb([0, 255, 255]),
];

/// Both images side by side with their strongest matches joined by lines.
/// `None` for an out-of-range index or fewer than four matches.
pub fn draw_matches(session: &MergeSession, index_a: usize, index_b: usize) -> Option<RasterImage> {
    let a = session.image(index_a)?;
    let b = session.image(index_b)?;
    let config = session.config();

    let extractor = FeatureExtractor::new(config);
    let features_a = extractor.extract(a).features;
    let features_b = extractor.extract(b).features;
    let mut matches = FeatureMatcher::from_config(config).match_descriptors(features_a.descriptors(), features_b.descriptors());
    if matches.len() < MIN_CORRESPONDENCES {
        log::warn!("Only {} matches between images {} and {}", matches.len(), index_a, index_b);
        return None;
    }
    matches.sort_by(|x, y| x.distance.total_cmp(&y.distance));
    matches.truncate(MAX_DRAWN_MATCHES);

    let mut out = RasterImage::new(a.width() + b.width(), a.height().max(b.height()));
    image::imageops::replace(&mut out, a, 0, 0);
    image::imageops::replace(&mut out, b, a.width() as i64, 0);

    let shift = a.width() as f32;
    for (i, m) in matches.iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        let (Some(ka), Some(kb)) = (features_a.keypoints().get(m.query_idx), features_b.keypoints().get(m.train_idx)) else {
            continue;
        };
        let start = (ka.x, ka.y);
        let end = (kb.x + shift, kb.y);
        draw_line_segment_mut(&mut out, start, end, color);
        draw_hollow_circle_mut(&mut out, (start.0 as i32, start.1 as i32), 4, color);
        draw_hollow_circle_mut(&mut out, (end.0 as i32, end.1 as i32), 4, color);
    }
    log::info!("Drew {} matches between images {} and {}", matches.len(), index_a, index_b);
    Some(out)
}

/// Original next to the enhanced luminance the detectors see
pub fn preprocessed_view(session: &MergeSession, index: usize) -> Option<RasterImage> {
    let original = session.image(index)?;
    let config = session.config();
    let enhanced = ImagePreprocessing::preprocess(original, &config.preprocess, config.night_threshold);
    log::info!(
        "Image {}: mean brightness {:.1}, {:?} path",
        index,
        enhanced.mean_brightness,
        enhanced.lighting
    );

    let enhanced_rgb = image::DynamicImage::ImageLuma8(enhanced.gray).to_rgb8();
    let (w, h) = original.dimensions();
    let mut out = RasterImage::new(w * 2, h);
    image::imageops::replace(&mut out, original, 0, 0);
    image::imageops::replace(&mut out, &enhanced_rgb, w as i64, 0);
    Annotator::label(&mut out, "Original", 10, 10);
    Annotator::label(&mut out, "Preprocessed", w as i32 + 10, 10);
    Some(out)
}
