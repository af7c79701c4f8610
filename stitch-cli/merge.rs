use image::Rgb;
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use stitch_compose::{
    Annotator, Blender, CanvasCompositor, HomographyEstimator, PointPair, MIN_CORRESPONDENCES, SIDE_BY_SIDE_OVERLAP,
};
use stitch_core::{Homography, RasterImage, StitchError, StitchResult};
use stitch_features::{FeatureExtractor, FeatureMatcher};

use crate::session::MergeSession;

const MARKER_RADIUS: i32 = 5;
const REFERENCE_MARKER: Rgb<u8> = Rgb([255, 0, 0]);
const MAPPED_MARKER: Rgb<u8> = Rgb([0, 255, 0]);
const MARKER_LINK: Rgb<u8> = Rgb([0, 0, 255]);

fn frame(session: &MergeSession, img: &RasterImage, caption: String) -> RasterImage {
    let config = session.config();
    let caption = config.annotate.then_some(caption);
    Annotator::frame(img, config.border_size, caption.as_deref())
}

fn require_pair(session: &MergeSession) -> StitchResult<(&RasterImage, &RasterImage)> {
    match session.images() {
        [a, b, ..] => Ok((a, b)),
        images => Err(StitchError::SessionUnderflow { images: images.len() }),
    }
}

/// Alpha blend of the first two images, registered by features when possible.
///
/// With two or more images this always yields a raster: too few matches, a
/// failed estimate or an oversized canvas fall back to a centred overlay.
pub fn aligned_blend(session: &MergeSession, alpha: f32) -> StitchResult<RasterImage> {
    let (a, b) = require_pair(session)?;
    let config = session.config();
    let alpha = alpha.clamp(0.0, 1.0);

    let extractor = FeatureExtractor::new(config);
    let features_a = extractor.extract(a).features;
    let features_b = extractor.extract(b).features;
    let matches = FeatureMatcher::from_config(config).match_descriptors(features_a.descriptors(), features_b.descriptors());
    log::debug!("aligned blend: {} / {} keypoints, {} good matches", features_a.len(), features_b.len(), matches.len());

    let aligned = if matches.len() >= MIN_CORRESPONDENCES {
        HomographyEstimator::from_config(config)
            .estimate_fit(features_a.keypoints(), features_b.keypoints(), &matches)
            .and_then(|fit| Blender::feature_aligned(a, b, &fit.homography, alpha, config.max_canvas_pixels))
    } else {
        Err(StitchError::InsufficientMatches { found: matches.len(), required: MIN_CORRESPONDENCES })
    };

    let (blended, caption) = match aligned {
        Ok(img) => (img, format!("Feature-Aligned Blend (Alpha: {:.2}, Matches: {})", alpha, matches.len())),
        Err(err) => {
            log::warn!("Feature alignment failed ({}); using simple overlay", err);
            (Blender::overlay_unaligned(a, b, alpha), format!("Simple Overlay Blend (Alpha: {:.2})", alpha))
        }
    };
    Ok(frame(session, &blended, caption))
}

/// Every session image in a left-to-right strip with ramped seams
pub fn side_by_side(session: &MergeSession) -> Option<RasterImage> {
    if session.len() < 2 {
        log::error!("{}", StitchError::SessionUnderflow { images: session.len() });
        return None;
    }
    let strip = Blender::side_by_side(session.images(), SIDE_BY_SIDE_OVERLAP)?;
    Some(frame(session, &strip, "Side-by-Side Merge".to_string()))
}

/// Merge the first two images from operator-picked correspondences.
///
/// Each pair is `(point in image 0, point in image 1)`.
pub fn manual(session: &MergeSession, pairs: &[((f64, f64), (f64, f64))]) -> Option<RasterImage> {
    match manual_merge(session, pairs) {
        Ok(img) => Some(img),
        Err(err) => {
            log::error!("Manual merge failed: {}", err);
            None
        }
    }
}

fn manual_merge(session: &MergeSession, pairs: &[((f64, f64), (f64, f64))]) -> StitchResult<RasterImage> {
    let (base, other) = require_pair(session)?;
    if pairs.len() < MIN_CORRESPONDENCES {
        return Err(StitchError::InsufficientMatches { found: pairs.len(), required: MIN_CORRESPONDENCES });
    }
    let config = session.config();

    let correspondences: Vec<PointPair> = pairs.iter().map(|&(p0, p1)| PointPair::new(p1, p0)).collect();
    let fit = HomographyEstimator::from_config(config).estimate_from_pairs(&correspondences)?;
    log::info!("Manual homography from {} points ({} inliers)", pairs.len(), fit.inliers.len());

    let identity = Homography::identity();
    let canvas = CanvasCompositor::canvas_for_pair(base, &identity, other, &fit.homography, config.max_canvas_pixels)?;
    let (warped_base, warped_other) = CanvasCompositor::composite(base, &identity, other, &fit.homography, &canvas)?;
    let mut merged = Blender::cumulative(&warped_base, &warped_other)?;

    let (ox, oy) = (canvas.offset.0 as f64, canvas.offset.1 as f64);
    for &(p0, p1) in pairs {
        let start = ((p0.0 + ox) as f32, (p0.1 + oy) as f32);
        draw_filled_circle_mut(&mut merged, (start.0 as i32, start.1 as i32), MARKER_RADIUS, REFERENCE_MARKER);
        let Some((mx, my)) = fit.homography.apply(p1.0, p1.1) else {
            continue;
        };
        let end = ((mx + ox) as f32, (my + oy) as f32);
        draw_filled_circle_mut(&mut merged, (end.0 as i32, end.1 as i32), MARKER_RADIUS, MAPPED_MARKER);
        draw_line_segment_mut(&mut merged, start, end, MARKER_LINK);
    }

    Ok(frame(session, &merged, format!("Manual Match ({} points)", pairs.len())))
}
