// THEORY:
// The `frame` module holds the two "dumb" image containers that flow through the
// pipeline. A `Frame` is one grayscale camera image stamped with its index and
// capture time. A `ForegroundMask` is the binary output of segmentation.
//
// Key architectural principles:
// 1.  **Flat storage**: Both wrap an `image::GrayImage`, a contiguous row-major
//     buffer indexed by `row * width + col`. No per-pixel objects are allocated.
// 2.  **Transient ownership**: A frame lives for one processing step. Only the
//     background estimator keeps information derived from it (its histogram).
// 3.  **Binary convention**: Masks store 255 for foreground and 0 for background so
//     they can be written to disk as ordinary images for inspection.

use image::{GrayImage, Luma};

/// Mask value for foreground pixels.
pub const FOREGROUND: u8 = 255;
/// Mask value for background pixels.
pub const BACKGROUND: u8 = 0;

/// One grayscale camera image plus its position in the stream.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: GrayImage,
    /// Monotonically increasing index assigned by the acquisition side.
    pub index: u64,
    /// Capture time in seconds.
    pub timestamp: f64,
}

impl Frame {
    pub fn new(image: GrayImage, index: u64, timestamp: f64) -> Self {
        Self {
            image,
            index,
            timestamp,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }
}

/// Binary foreground/background image with the same size as the frame it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ForegroundMask {
    image: GrayImage,
}

impl ForegroundMask {
    /// An all-background mask.
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            image: GrayImage::new(width, height),
        }
    }

    /// Wraps an image, normalising every non-zero sample to `FOREGROUND`.
    pub fn from_image(mut image: GrayImage) -> Self {
        for value in image.iter_mut() {
            if *value != BACKGROUND {
                *value = FOREGROUND;
            }
        }
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[inline]
    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        let index = y as usize * self.image.width() as usize + x as usize;
        self.image.as_raw()[index] == FOREGROUND
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, foreground: bool) {
        let value = if foreground { FOREGROUND } else { BACKGROUND };
        self.image.put_pixel(x, y, Luma([value]));
    }

    pub fn count_foreground(&self) -> usize {
        self.image.as_raw().iter().filter(|&&v| v == FOREGROUND).count()
    }

    /// Forces every pixel outside `other` to background.
    pub fn intersect(&mut self, other: &ForegroundMask) {
        for (value, keep) in self.image.iter_mut().zip(other.image.iter()) {
            if *keep == BACKGROUND {
                *value = BACKGROUND;
            }
        }
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }

    pub fn into_image(self) -> GrayImage {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_image_binarises() {
        let image = GrayImage::from_raw(3, 1, vec![0, 7, 255]).unwrap();
        let mask = ForegroundMask::from_image(image);
        assert_eq!(mask.as_image().as_raw(), &vec![0, 255, 255]);
        assert_eq!(mask.count_foreground(), 2);
    }

    #[test]
    fn intersect_clears_outside_pixels() {
        let mut mask = ForegroundMask::from_image(GrayImage::from_raw(2, 2, vec![255; 4]).unwrap());
        let mut keep = ForegroundMask::empty(2, 2);
        keep.set(1, 1, true);
        mask.intersect(&keep);
        assert!(mask.is_foreground(1, 1));
        assert_eq!(mask.count_foreground(), 1);
    }

    #[test]
    fn lookup_matches_written_pixel_on_wide_mask() {
        let mut mask = ForegroundMask::empty(7, 3);
        mask.set(6, 2, true);
        mask.set(0, 1, true);
        assert!(mask.is_foreground(6, 2));
        assert!(mask.is_foreground(0, 1));
        assert!(!mask.is_foreground(2, 2));
        assert!(!mask.is_foreground(6, 0));
    }

    #[test]
    fn empty_frame_detection() {
        let frame = Frame::new(GrayImage::new(0, 10), 4, 0.1);
        assert!(frame.is_empty());
        assert!(!Frame::new(GrayImage::new(1, 1), 5, 0.2).is_empty());
    }
}
