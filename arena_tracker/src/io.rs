// THEORY:
// The tracking core never touches the filesystem directly. The two places where it
// wants to persist images are expressed as injected collaborators:
//
// 1.  `BackgroundStore`: loads and saves the median background image, an opaque
//     single-channel blob as far as the core is concerned.
// 2.  `DebugSink`: receives named intermediate images (difference, mask, ROI,
//     bounds) when debugging is enabled.
//
// The PNG implementations below are the defaults used by the command-line driver.
// Failures are returned to the session, which logs them and carries on with the
// in-memory state it already has.

use crate::error::{Result, TrackerError};
use image::GrayImage;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

pub mod image_helper {
    use super::*;
    use image::ImageEncoder;
    use std::io::BufWriter;

    /// Writes a single-channel PNG.
    pub fn save_gray(path: &Path, image: &GrayImage) -> Result<()> {
        let output = BufWriter::new(std::fs::File::create(path)?);
        let encoder = image::codecs::png::PngEncoder::new(output);
        encoder.write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::L8,
        )?;
        Ok(())
    }

    /// Reads any image format `image` can decode and converts it to 8-bit gray.
    pub fn load_gray(path: &Path) -> Result<GrayImage> {
        Ok(image::open(path)?.into_luma8())
    }
}

pub trait BackgroundStore: Send + Sync {
    fn load(&self) -> Result<GrayImage>;
    fn save(&self, median: &GrayImage) -> Result<()>;
}

/// Keeps the background as a PNG at a fixed path.
#[derive(Debug, Clone)]
pub struct PngBackgroundStore {
    path: PathBuf,
}

impl PngBackgroundStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BackgroundStore for PngBackgroundStore {
    fn load(&self) -> Result<GrayImage> {
        let image = image_helper::load_gray(&self.path)?;
        debug!(path = %self.path.display(), "background image loaded");
        Ok(image)
    }

    fn save(&self, median: &GrayImage) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        image_helper::save_gray(&self.path, median)?;
        debug!(path = %self.path.display(), "background image saved");
        Ok(())
    }
}

/// Holds the background in memory. Useful for hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryBackgroundStore {
    image: Mutex<Option<GrayImage>>,
}

impl MemoryBackgroundStore {
    pub fn new(initial: Option<GrayImage>) -> Self {
        Self {
            image: Mutex::new(initial),
        }
    }

    pub fn get(&self) -> Option<GrayImage> {
        self.image
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl BackgroundStore for MemoryBackgroundStore {
    fn load(&self) -> Result<GrayImage> {
        self.get().ok_or(TrackerError::BackgroundNotReady)
    }

    fn save(&self, median: &GrayImage) -> Result<()> {
        *self.image.lock().unwrap_or_else(PoisonError::into_inner) = Some(median.clone());
        Ok(())
    }
}

pub trait DebugSink: Send + Sync {
    /// Receives one named intermediate image.
    fn offer(&self, name: &str, image: &GrayImage) -> Result<()>;
}

/// Writes every offered image to `<dir>/<name>.png`.
#[derive(Debug, Clone)]
pub struct DirectoryDebugSink {
    dir: PathBuf,
}

impl DirectoryDebugSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DebugSink for DirectoryDebugSink {
    fn offer(&self, name: &str, image: &GrayImage) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        image_helper::save_gray(&self.dir.join(format!("{name}.png")), image)
    }
}
