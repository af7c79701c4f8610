use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use stitch_core::{RasterImage, SessionConfig, StitchError, StitchResult};

/// Where an image added to a session comes from
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Raster(RasterImage),
}

impl From<&str> for ImageSource {
    fn from(path: &str) -> Self {
        ImageSource::Path(PathBuf::from(path))
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        ImageSource::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<RasterImage> for ImageSource {
    fn from(raster: RasterImage) -> Self {
        ImageSource::Raster(raster)
    }
}

impl ImageSource {
    fn describe(&self) -> String {
        match self {
            ImageSource::Path(p) => p.display().to_string(),
            ImageSource::Raster(r) => format!("<raster {}x{}>", r.width(), r.height()),
        }
    }

    /// Decode at full resolution; zero-size rasters are a `LoadFailure`
    pub fn load(self) -> StitchResult<RasterImage> {
        let name = self.describe();
        let raster = match self {
            ImageSource::Path(path) => image::open(&path)
                .map_err(|e| StitchError::LoadFailure { source: name.clone(), reason: e.to_string() })?
                .to_rgb8(),
            ImageSource::Raster(raster) => raster,
        };
        if raster.width() == 0 || raster.height() == 0 {
            return Err(StitchError::LoadFailure { source: name, reason: "image has no pixels".to_string() });
        }
        Ok(raster)
    }
}

/// Shrink so the longest side is at most `max_dimension`, preserving aspect ratio
pub fn fit_to_max_dimension(image: RasterImage, max_dimension: u32) -> RasterImage {
    let (w, h) = image.dimensions();
    let longest = w.max(h);
    if longest <= max_dimension || max_dimension == 0 {
        return image;
    }
    let scale = max_dimension as f64 / longest as f64;
    let nw = ((w as f64 * scale) as u32).max(1);
    let nh = ((h as f64 * scale) as u32).max(1);
    log::info!("Resized image from {}x{} to {}x{}", w, h, nw, nh);
    image::imageops::resize(&image, nw, nh, FilterType::Triangle)
}

/// Caller-owned ordered image list plus the configuration every merge call reads
#[derive(Debug, Clone)]
pub struct MergeSession {
    config: SessionConfig,
    images: Vec<RasterImage>,
}

impl MergeSession {
    pub fn new(config: SessionConfig) -> Self {
        Self { config, images: Vec::new() }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Replace the configuration for later operations; images already added keep their size
    pub fn set_config(&mut self, config: SessionConfig) -> StitchResult<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn images(&self) -> &[RasterImage] {
        &self.images
    }

    pub fn image(&self, index: usize) -> Option<&RasterImage> {
        self.images.get(index)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Decode (if needed), downscale and append; returns the new index
    pub fn try_add_image(&mut self, source: impl Into<ImageSource>) -> StitchResult<usize> {
        let raster = fit_to_max_dimension(source.into().load()?, self.config.max_dimension);
        self.images.push(raster);
        Ok(self.images.len() - 1)
    }

    /// `false` on unreadable or undecodable input; nothing is appended then
    pub fn add_image(&mut self, source: impl Into<ImageSource>) -> bool {
        match self.try_add_image(source) {
            Ok(index) => {
                let img = &self.images[index];
                log::info!("Added image {} ({}x{})", index, img.width(), img.height());
                true
            }
            Err(e) => {
                log::error!("Error loading image: {}", e);
                false
            }
        }
    }

    /// No-op when `index` is out of range
    pub fn remove_image(&mut self, index: usize) {
        if index < self.images.len() {
            self.images.remove(index);
        }
    }

    pub fn clear(&mut self) {
        self.images.clear();
    }
}

impl Default for MergeSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
