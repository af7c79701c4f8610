//! Geometry and pixel composition for stitching: robust homography fitting,
//! shared-canvas warping, blending strategies, finishing enhancement and framed
//! captions.

pub mod annotate;
pub mod blend;
pub mod canvas;
pub mod color;
pub mod enhance;
pub mod homography;
pub mod ransac;

pub use annotate::Annotator;
pub use blend::{blend_denominator, Blender, BLEND_EPSILON, SIDE_BY_SIDE_OVERLAP};
pub use canvas::{Canvas, CanvasCompositor, Corners};
pub use enhance::Enhancer;
pub use homography::{fit_dlt, HomographyEstimator, HomographyFit, HomographyModel, PointPair, MIN_CORRESPONDENCES};
pub use ransac::{Estimator, Ransac, RansacFit};
