//! Merge sessions and the operations exposed to callers.
//!
//! A [`MergeSession`] owns the ordered image list and configuration; every
//! operation below takes it explicitly and runs to completion on the calling
//! thread. Per-pair failures are recovered (skipped or replaced by a fallback)
//! and logged, so only an underfull session or a collapsed panorama surfaces
//! as "no result".

pub mod debug;
pub mod merge;
pub mod orchestrator;
pub mod session;
pub mod tuning;

pub use orchestrator::{panorama_caption, MergeOrchestrator, MergeReport, MergeState};
pub use session::{fit_to_max_dimension, ImageSource, MergeSession};
pub use tuning::{TuningReport, TuningStatistics};

use stitch_core::{RasterImage, SessionConfig, StitchError, StitchResult};

/// Empty session; `InvalidConfig` when `config` fails validation
pub fn create_session(config: SessionConfig) -> StitchResult<MergeSession> {
    config.validate()?;
    Ok(MergeSession::new(config))
}

/// Decode, downscale and append; `false` when the input cannot be read
pub fn add_image(session: &mut MergeSession, source: impl Into<ImageSource>) -> bool {
    session.add_image(source)
}

pub fn remove_image(session: &mut MergeSession, index: usize) {
    session.remove_image(index)
}

/// Full sequential merge with per-image skip handling
pub fn merge_panorama_report(session: &MergeSession) -> MergeReport {
    if session.len() < 2 {
        let error = StitchError::SessionUnderflow { images: session.len() };
        log::error!("{}", error);
        return MergeReport {
            state: MergeState::Failed,
            panorama: None,
            merged: Vec::new(),
            skipped: Vec::new(),
            error: Some(error),
        };
    }
    let mut orchestrator = MergeOrchestrator::new(session.config());
    orchestrator.run(session)
}

/// Framed panorama, or `None` when fewer than two images could be merged
pub fn merge_panorama(session: &MergeSession) -> Option<RasterImage> {
    merge_panorama_report(session).panorama
}

/// Blend the first two images; only an underfull session is an error
pub fn merge_aligned_blend(session: &MergeSession, alpha: f32) -> StitchResult<RasterImage> {
    merge::aligned_blend(session, alpha)
}

pub fn merge_side_by_side(session: &MergeSession) -> Option<RasterImage> {
    merge::side_by_side(session)
}

/// Each pair is `(point in image 0, point in image 1)`; at least four are needed
pub fn merge_manual(session: &MergeSession, pairs: &[((f64, f64), (f64, f64))]) -> Option<RasterImage> {
    merge::manual(session, pairs)
}

pub fn debug_matches(session: &MergeSession, index_a: usize, index_b: usize) -> Option<RasterImage> {
    debug::draw_matches(session, index_a, index_b)
}

pub fn debug_preprocessed(session: &MergeSession, index: usize) -> Option<RasterImage> {
    debug::preprocessed_view(session, index)
}

/// Contrast, sharpness and saturation lift for a finished panorama
pub fn enhance_panorama(img: &RasterImage) -> RasterImage {
    stitch_compose::Enhancer::enhance_panorama(img)
}

pub fn tune_preprocessing(images: &[RasterImage], config: &SessionConfig) -> TuningReport {
    tuning::tune(images, config)
}
