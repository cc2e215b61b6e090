// THEORY:
// The `BackgroundHistogram` learns what the empty arena looks like. Every pixel
// location owns a small intensity histogram; each sampled frame bumps one bin per
// pixel. The background estimate is the per-pixel median read back from those bins.
//
// Key architectural principles:
// 1.  **Order independence**: A histogram forgets insertion order, so the median it
//     yields is the same whichever order the samples arrived in.
// 2.  **Bounded memory per sample**: Adding a frame is O(pixels) and never stores the
//     frame itself. Memory is `pixels * num_bins` counters regardless of how many
//     frames are added.
// 3.  **Lazy sizing**: Storage is allocated on the first frame, taking that frame's
//     dimensions. Later frames must match.
// 4.  **Idempotent readout**: `median_image` only reads the counters; it can be
//     called as often as needed while sampling continues.

use crate::error::{Result, TrackerError};
use image::GrayImage;
use tracing::debug;

pub const DEFAULT_NUM_BINS: usize = 256;
pub const DEFAULT_BIN_SIZE: u16 = 1;

/// Per-pixel intensity histograms over a sequence of sampled frames.
pub struct BackgroundHistogram {
    num_bins: usize,
    bin_size: u16,
    width: u32,
    height: u32,
    /// Pixel-major counters: `counts[pixel * num_bins + bin]`.
    counts: Vec<u32>,
    frames_added: u32,
}

impl BackgroundHistogram {
    /// `num_bins * bin_size` must cover the full 0..=255 intensity range.
    pub fn new(num_bins: usize, bin_size: u16) -> Result<Self> {
        if num_bins == 0 || bin_size == 0 {
            return Err(TrackerError::InvalidConfig(
                "histogram needs at least one bin of non-zero width".into(),
            ));
        }
        if num_bins * (bin_size as usize) < 256 {
            return Err(TrackerError::InvalidConfig(format!(
                "{num_bins} bins of size {bin_size} do not cover intensities 0..=255"
            )));
        }
        Ok(Self {
            num_bins,
            bin_size,
            width: 0,
            height: 0,
            counts: Vec::new(),
            frames_added: 0,
        })
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    pub fn bin_size(&self) -> u16 {
        self.bin_size
    }

    pub fn frames_added(&self) -> u32 {
        self.frames_added
    }

    pub fn is_initialized(&self) -> bool {
        !self.counts.is_empty()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.is_initialized().then_some((self.width, self.height))
    }

    /// Adds one frame. The first call fixes the histogram size.
    pub fn add_image(&mut self, image: &GrayImage) -> Result<()> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(TrackerError::InvalidGeometry(
                "cannot add an empty image to the background histogram".into(),
            ));
        }

        if !self.is_initialized() {
            self.width = width;
            self.height = height;
            self.counts = vec![0; width as usize * height as usize * self.num_bins];
            debug!(width, height, bins = self.num_bins, "background histogram allocated");
        } else if (width, height) != (self.width, self.height) {
            return Err(TrackerError::dimension_mismatch(
                "background histogram",
                (self.width, self.height),
                (width, height),
            ));
        }

        let bin_size = self.bin_size as usize;
        for (pixel, &intensity) in image.as_raw().iter().enumerate() {
            let bin = intensity as usize / bin_size;
            self.counts[pixel * self.num_bins + bin] += 1;
        }
        self.frames_added += 1;
        Ok(())
    }

    /// Per-pixel median, quantised to the bin size. The median is the value of the
    /// first bin whose cumulative count reaches `ceil(frames_added / 2)`.
    pub fn median_image(&self) -> Result<GrayImage> {
        if self.frames_added == 0 {
            return Err(TrackerError::NoFramesAdded);
        }

        let target = self.frames_added.div_ceil(2);
        let pixels = self.width as usize * self.height as usize;
        let mut median = Vec::with_capacity(pixels);

        for bins in self.counts.chunks_exact(self.num_bins) {
            let mut cumulative = 0u32;
            let mut median_bin = self.num_bins - 1;
            for (bin, &count) in bins.iter().enumerate() {
                cumulative += count;
                if cumulative >= target {
                    median_bin = bin;
                    break;
                }
            }
            let value = (median_bin * self.bin_size as usize).min(u8::MAX as usize);
            median.push(value as u8);
        }

        GrayImage::from_raw(self.width, self.height, median).ok_or_else(|| {
            TrackerError::InvalidGeometry("median buffer does not match histogram size".into())
        })
    }

    /// Releases the counters. The histogram can be reused afterwards.
    pub fn clear(&mut self) {
        self.counts = Vec::new();
        self.width = 0;
        self.height = 0;
        self.frames_added = 0;
    }
}
