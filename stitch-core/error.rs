#[derive(Debug, Clone, PartialEq)]
pub enum StitchError {
    LoadFailure { source: String, reason: String },
    InsufficientFeatures { image: usize },
    InsufficientMatches { found: usize, required: usize },
    HomographyFailure(String),
    SessionUnderflow { images: usize },
    CanvasTooLarge { width: u64, height: u64, limit: u64 },
    DimensionMismatch { what: &'static str, left: usize, right: usize },
    InvalidConfig(String),
}

impl std::fmt::Display for StitchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StitchError::LoadFailure { source, reason } => {
                write!(f, "Could not load image {}: {}", source, reason)
            }
            StitchError::InsufficientFeatures { image } => {
                write!(f, "No usable keypoints in image {} after enhancement retry", image)
            }
            StitchError::InsufficientMatches { found, required } => {
                write!(f, "Not enough good matches: found {}, need at least {}", found, required)
            }
            StitchError::HomographyFailure(reason) => {
                write!(f, "Homography estimation failed: {}", reason)
            }
            StitchError::SessionUnderflow { images } => {
                write!(f, "At least 2 images are required to merge, session has {}", images)
            }
            StitchError::CanvasTooLarge { width, height, limit } => {
                write!(f, "Canvas {}x{} exceeds the limit of {} pixels", width, height, limit)
            }
            StitchError::DimensionMismatch { what, left, right } => {
                write!(f, "Dimension mismatch in {}: {} vs {}", what, left, right)
            }
            StitchError::InvalidConfig(reason) => {
                write!(f, "Invalid configuration: {}", reason)
            }
        }
    }
}

impl std::error::Error for StitchError {}

pub type StitchResult<T> = Result<T, StitchError>;
