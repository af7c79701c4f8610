use stitch_compose::{Annotator, Blender, CanvasCompositor, HomographyEstimator, MIN_CORRESPONDENCES};
use stitch_core::{Features, Homography, RasterImage, SessionConfig, StitchError, StitchResult};
use stitch_features::{FeatureExtractor, FeatureMatcher};

use crate::session::MergeSession;

/// Progress of a sequential panorama merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Idle,
    /// Folding image `i` into the running composite
    Merging(usize),
    Success,
    /// At least two images merged, some skipped
    PartialSuccess,
    Failed,
}

impl MergeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MergeState::Success | MergeState::PartialSuccess | MergeState::Failed)
    }
}

/// Outcome of [`MergeOrchestrator::run`]
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub state: MergeState,
    /// Framed composite; present unless the merge failed
    pub panorama: Option<RasterImage>,
    /// Session indices folded into the panorama, in order
    pub merged: Vec<usize>,
    /// Images left out and why
    pub skipped: Vec<(usize, StitchError)>,
    /// Set when `state` is `Failed`
    pub error: Option<StitchError>,
}

impl MergeReport {
    fn failed(error: StitchError, skipped: Vec<(usize, StitchError)>) -> Self {
        Self { state: MergeState::Failed, panorama: None, merged: Vec::new(), skipped, error: Some(error) }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.state, MergeState::Success | MergeState::PartialSuccess)
    }
}

/// Caption written above a finished panorama
pub fn panorama_caption(images: usize, config: &SessionConfig) -> String {
    format!("Panorama ({} images, Detector: {}, Ratio: {:.2})", images, config.detector.label(), config.match_ratio)
}

/// Folds session images left to right into one composite, skipping images
/// that cannot be registered against the running result
pub struct MergeOrchestrator<'a> {
    config: &'a SessionConfig,
    extractor: FeatureExtractor,
    matcher: FeatureMatcher,
    estimator: HomographyEstimator,
    state: MergeState,
}

impl<'a> MergeOrchestrator<'a> {
    pub fn new(config: &'a SessionConfig) -> Self {
        Self {
            config,
            extractor: FeatureExtractor::new(config),
            matcher: FeatureMatcher::from_config(config),
            estimator: HomographyEstimator::from_config(config),
            state: MergeState::Idle,
        }
    }

    pub fn state(&self) -> MergeState {
        self.state
    }

    /// Merge every session image; `state()` reports progress and the final outcome
    pub fn run(&mut self, session: &MergeSession) -> MergeReport {
        let images = session.images();
        if images.len() < 2 {
            self.state = MergeState::Failed;
            log::error!("Need at least 2 images to merge, have {}", images.len());
            return MergeReport::failed(StitchError::SessionUnderflow { images: images.len() }, Vec::new());
        }

        log::info!("Merging {} images with {}", images.len(), self.config.summary());
        let mut composite: Option<RasterImage> = None;
        let mut reference_features: Option<Features> = None;
        let mut merged = vec![0usize];
        let mut skipped = Vec::new();

        for (idx, image) in images.iter().enumerate().skip(1) {
            self.state = MergeState::Merging(idx);
            let reference = composite.as_ref().unwrap_or(&images[0]);
            let ref_features = match reference_features.take() {
                Some(f) => f,
                None => self.extractor.extract(reference).features,
            };

            let ref_index = merged.last().copied().unwrap_or(0);
            match self.merge_pair(reference, &ref_features, ref_index, image, idx) {
                Ok(result) => {
                    log::info!("Merged image {} ({}x{} composite)", idx, result.width(), result.height());
                    composite = Some(result);
                    merged.push(idx);
                }
                Err(err) => {
                    log::warn!("Skipping image {}: {}", idx, err);
                    reference_features = Some(ref_features);
                    skipped.push((idx, err));
                }
            }
        }

        let Some(panorama) = composite else {
            self.state = MergeState::Failed;
            log::error!("No image could be registered against image 0");
            let err = skipped
                .last()
                .map(|(_, e)| e.clone())
                .unwrap_or(StitchError::SessionUnderflow { images: images.len() });
            return MergeReport::failed(err, skipped);
        };

        self.state = if skipped.is_empty() { MergeState::Success } else { MergeState::PartialSuccess };
        if self.state == MergeState::PartialSuccess {
            log::warn!("Panorama built from {} of {} images", merged.len(), images.len());
        }

        let caption = self.config.annotate.then(|| panorama_caption(merged.len(), self.config));
        let framed = Annotator::frame(&panorama, self.config.border_size, caption.as_deref());
        MergeReport { state: self.state, panorama: Some(framed), merged, skipped, error: None }
    }

    /// Register `image` against `reference` and blend them on a shared canvas;
    /// `ref_index` is the last session image folded into `reference`
    fn merge_pair(
        &self,
        reference: &RasterImage,
        ref_features: &Features,
        ref_index: usize,
        image: &RasterImage,
        idx: usize,
    ) -> StitchResult<RasterImage> {
        if ref_features.is_empty() {
            return Err(StitchError::InsufficientFeatures { image: ref_index });
        }
        let extraction = self.extractor.extract(image);
        let features = extraction.features;
        if features.is_empty() {
            return Err(StitchError::InsufficientFeatures { image: idx });
        }

        let matches = self.matcher.match_descriptors(features.descriptors(), ref_features.descriptors());
        log::debug!("Image {}: {} keypoints, {} good matches", idx, features.len(), matches.len());
        if matches.len() < MIN_CORRESPONDENCES {
            return Err(StitchError::InsufficientMatches { found: matches.len(), required: MIN_CORRESPONDENCES });
        }

        let fit = self.estimator.estimate_fit(features.keypoints(), ref_features.keypoints(), &matches)?;
        let identity = Homography::identity();
        let canvas = CanvasCompositor::canvas_for_pair(
            reference,
            &identity,
            image,
            &fit.homography,
            self.config.max_canvas_pixels,
        )?;
        let (warped_ref, warped_new) =
            CanvasCompositor::composite(reference, &identity, image, &fit.homography, &canvas)?;
        Blender::cumulative(&warped_ref, &warped_new)
    }
}
