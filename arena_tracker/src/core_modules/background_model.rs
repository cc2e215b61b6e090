// THEORY:
// The `BackgroundModel` is the store that segmentation reads from. It holds the
// median background image and the two acceptance bounds derived from it for the
// current threshold. A pixel whose intensity falls between the bounds looks like
// background.
//
// The bounds are always rebuilt together from one (median, threshold) pair, inside
// the same `&mut self` call that changed either input, so a reader can never see a
// lower bound from one median and an upper bound from another.

use crate::error::{Result, TrackerError};
use image::GrayImage;

#[derive(Debug, Clone)]
pub struct BackgroundModel {
    median: GrayImage,
    threshold: u8,
    lower_bound: GrayImage,
    upper_bound: GrayImage,
}

impl BackgroundModel {
    pub fn new(median: GrayImage, threshold: u8) -> Result<Self> {
        if median.width() == 0 || median.height() == 0 {
            return Err(TrackerError::InvalidGeometry(
                "background median image is empty".into(),
            ));
        }
        let (lower_bound, upper_bound) = Self::compute_bounds(&median, threshold);
        Ok(Self {
            median,
            threshold,
            lower_bound,
            upper_bound,
        })
    }

    pub fn set_median(&mut self, median: GrayImage) -> Result<()> {
        if median.width() == 0 || median.height() == 0 {
            return Err(TrackerError::InvalidGeometry(
                "background median image is empty".into(),
            ));
        }
        let (lower_bound, upper_bound) = Self::compute_bounds(&median, self.threshold);
        self.median = median;
        self.lower_bound = lower_bound;
        self.upper_bound = upper_bound;
        Ok(())
    }

    pub fn set_threshold(&mut self, threshold: u8) {
        if threshold == self.threshold {
            return;
        }
        let (lower_bound, upper_bound) = Self::compute_bounds(&self.median, threshold);
        self.threshold = threshold;
        self.lower_bound = lower_bound;
        self.upper_bound = upper_bound;
    }

    pub fn median(&self) -> &GrayImage {
        &self.median
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn lower_bound(&self) -> &GrayImage {
        &self.lower_bound
    }

    pub fn upper_bound(&self) -> &GrayImage {
        &self.upper_bound
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.median.dimensions()
    }

    /// Fails with `DimensionMismatch` unless `image` has the model's size.
    pub fn check_dimensions(&self, image: &GrayImage) -> Result<()> {
        if image.dimensions() != self.dimensions() {
            return Err(TrackerError::dimension_mismatch(
                "background model",
                self.dimensions(),
                image.dimensions(),
            ));
        }
        Ok(())
    }

    fn compute_bounds(median: &GrayImage, threshold: u8) -> (GrayImage, GrayImage) {
        let mut lower = median.clone();
        let mut upper = median.clone();
        for value in lower.iter_mut() {
            *value = value.saturating_sub(threshold);
        }
        for value in upper.iter_mut() {
            *value = value.saturating_add(threshold);
        }
        (lower, upper)
    }
}
