// THEORY:
// A `Blob` is one connected group of foreground pixels found in a single frame.
// Like the other data containers it has no memory: it does not know where it was
// in the previous frame. The heading resolver adds that temporal layer on top of
// the ellipse fitted to a blob.
//
// Key architectural principles:
// 1.  **Full membership**: The blob keeps every pixel coordinate, since the
//     ellipse fitter needs the whole point cloud, not just a summary.
// 2.  **Discovery order**: `label` is the order in which the raster scan first met
//     the blob. Ties between equally sized blobs are broken on it.

use crate::core_modules::geometry::Point;

/// A spatially connected set of foreground pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    /// Zero-based discovery index within the frame. Not persistent.
    pub label: u32,
    /// Top-left and bottom-right corners (inclusive) of the enclosing box.
    pub bounding_box: (Point, Point),
    /// Every pixel coordinate in the blob.
    pub pixels: Vec<Point>,
}

impl Blob {
    /// Number of pixels, the blob's area.
    pub fn area(&self) -> usize {
        self.pixels.len()
    }
}
