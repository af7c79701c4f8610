use stitch_core::{RasterImage, SessionConfig};
use stitch_features::{FeatureExtractor, ImagePreprocessing};

/// Laplacian variance above which an image set counts as noisy
const NOISE_THRESHOLD: f64 = 100.0;

/// Mean measurements over a tuning image set
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TuningStatistics {
    pub avg_brightness: f64,
    /// (p95 - p5) / 255 of the luminance
    pub avg_contrast: f64,
    /// Variance of the Laplacian
    pub avg_noise: f64,
    pub avg_features: f64,
    pub avg_min_dimension: f64,
}

#[derive(Debug, Clone)]
pub struct TuningReport {
    pub success: bool,
    pub message: String,
    /// Tuned copy of the input configuration
    pub config: SessionConfig,
    pub statistics: TuningStatistics,
    pub recommendations: Vec<String>,
}

/// Percentile with linear interpolation between closest ranks
fn interpolated_percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() { 0.0 } else { values.iter().sum::<f64>() / values.len() as f64 }
}

/// Measure `images` under `config` and derive enhancement parameters suited to them
pub fn tune(images: &[RasterImage], config: &SessionConfig) -> TuningReport {
    if images.is_empty() {
        return TuningReport {
            success: false,
            message: "No images provided for tuning".to_string(),
            config: config.clone(),
            statistics: TuningStatistics::default(),
            recommendations: Vec::new(),
        };
    }

    let extractor = FeatureExtractor::new(config);
    let mut brightness = Vec::with_capacity(images.len());
    let mut contrast = Vec::with_capacity(images.len());
    let mut noise = Vec::with_capacity(images.len());
    let mut features = Vec::with_capacity(images.len());
    let mut min_dims = Vec::with_capacity(images.len());

    for img in images {
        let gray = ImagePreprocessing::to_gray(img);
        brightness.push(ImagePreprocessing::mean_brightness(&gray));
        let histogram = ImagePreprocessing::histogram(&gray);
        let p5 = ImagePreprocessing::percentile(&histogram, 5.0) as f64;
        let p95 = ImagePreprocessing::percentile(&histogram, 95.0) as f64;
        contrast.push((p95 - p5) / 255.0);
        noise.push(ImagePreprocessing::laplacian_variance(&gray));
        features.push(extractor.extract_gray(&gray).features.len() as f64);
        min_dims.push(img.width().min(img.height()) as f64);
    }

    let statistics = TuningStatistics {
        avg_brightness: mean(&brightness),
        avg_contrast: mean(&contrast),
        avg_noise: mean(&noise),
        avg_features: mean(&features),
        avg_min_dimension: mean(&min_dims),
    };

    let mut tuned = config.clone();
    tuned.night_threshold = interpolated_percentile(&brightness, 25.0);

    let pre = &mut tuned.preprocess;
    if statistics.avg_features < 100.0 {
        pre.night_clip_limit *= 1.2;
        pre.normal_clip_limit *= 1.1;
    } else if statistics.avg_features > 500.0 {
        pre.night_clip_limit *= 0.9;
        pre.normal_clip_limit *= 0.95;
    }

    let grid = if statistics.avg_min_dimension < 500.0 {
        4
    } else if statistics.avg_min_dimension < 1000.0 {
        8
    } else {
        16
    };
    pre.night_grid = grid;
    pre.normal_grid = grid;
    pre.denoise_radius = if statistics.avg_noise > NOISE_THRESHOLD { 2 } else { 1 };

    let mut recommendations = Vec::new();
    if statistics.avg_brightness < 50.0 {
        recommendations.push("Consider using the ORB detector for better feature detection in dark images".to_string());
    }
    if statistics.avg_contrast < 0.3 {
        recommendations.push("Images have low contrast - consider increasing CLAHE limits".to_string());
    }
    if statistics.avg_noise > NOISE_THRESHOLD {
        recommendations.push("High noise detected - denoising has been increased".to_string());
    }
    if statistics.avg_features < 50.0 {
        recommendations.push("Low feature count detected - consider manual feature matching".to_string());
    }

    log::info!(
        "Tuned preprocessing: night threshold {:.1}, night CLAHE {:.2}/{}, normal CLAHE {:.2}/{}, denoise radius {}",
        tuned.night_threshold,
        tuned.preprocess.night_clip_limit,
        tuned.preprocess.night_grid,
        tuned.preprocess.normal_clip_limit,
        tuned.preprocess.normal_grid,
        tuned.preprocess.denoise_radius
    );

    TuningReport {
        success: true,
        message: format!("Tuned on {} images", images.len()),
        config: tuned,
        statistics,
        recommendations,
    }
}
