// THEORY:
// The `blob_detector` is the spatial grouping layer. It turns the binary foreground
// mask into a list of connected components and offers the two selection policies
// the engine needs:
//
// 1.  **Largest component**: single-animal tracking keeps only the biggest blob and
//     treats everything else as noise.
// 2.  **Counting**: region presence checks count blobs inside a rectangle whose area
//     exceeds a minimum size.
//
// Components are 8-connected and grown with an explicit stack (iterative flood
// fill), so deep blobs cannot overflow the call stack. Seeds are taken in raster
// order, which makes labels, and therefore tie-breaks, deterministic.
// It is a stateless utility with no memory of previous frames.

use crate::core_modules::blob::Blob;
use crate::core_modules::frame::ForegroundMask;
use crate::core_modules::geometry::{Point, Rect};

pub mod blob_detector {
    use super::*;

    const NEIGHBOURS: [(i64, i64); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (-1, 0),
        (1, 0),
        (-1, 1),
        (0, 1),
        (1, 1),
    ];

    /// Labels every 8-connected foreground component inside `region` (the whole
    /// mask when `None`). Pixels outside the region are treated as background.
    pub fn find_components(mask: &ForegroundMask, region: Option<Rect>) -> Vec<Blob> {
        let (width, height) = mask.dimensions();
        let full = Rect::new(0, 0, width, height);
        let Some(area) = region.unwrap_or(full).clamp_to(width, height) else {
            return Vec::new();
        };

        // Visited flags are local to the region window.
        let mut visited = vec![false; area.width as usize * area.height as usize];
        let local = |p: Point| ((p.y - area.y) * area.width + (p.x - area.x)) as usize;

        let mut blobs = Vec::new();
        for y in area.y..area.y + area.height {
            for x in area.x..area.x + area.width {
                let seed = Point { x, y };
                if visited[local(seed)] || !mask.is_foreground(x, y) {
                    continue;
                }
                let label = blobs.len() as u32;
                blobs.push(grow_component(mask, area, seed, label, &mut visited, &local));
            }
        }
        blobs
    }

    fn grow_component(
        mask: &ForegroundMask,
        area: Rect,
        seed: Point,
        label: u32,
        visited: &mut [bool],
        local: &impl Fn(Point) -> usize,
    ) -> Blob {
        let mut pixels = Vec::new();
        let mut stack = vec![seed];
        visited[local(seed)] = true;
        let (mut min_x, mut min_y) = (seed.x, seed.y);
        let (mut max_x, mut max_y) = (seed.x, seed.y);

        while let Some(current) = stack.pop() {
            pixels.push(current);
            min_x = min_x.min(current.x);
            min_y = min_y.min(current.y);
            max_x = max_x.max(current.x);
            max_y = max_y.max(current.y);

            for (dx, dy) in NEIGHBOURS {
                let nx = current.x as i64 + dx;
                let ny = current.y as i64 + dy;
                if nx < 0 || ny < 0 {
                    continue;
                }
                let neighbour = Point {
                    x: nx as u32,
                    y: ny as u32,
                };
                if !area.contains(neighbour) {
                    continue;
                }
                let index = local(neighbour);
                if !visited[index] && mask.is_foreground(neighbour.x, neighbour.y) {
                    visited[index] = true;
                    stack.push(neighbour);
                }
            }
        }

        Blob {
            label,
            bounding_box: (Point { x: min_x, y: min_y }, Point { x: max_x, y: max_y }),
            pixels,
        }
    }

    /// The component with the most pixels. On equal area the lowest label (first
    /// discovered in raster order) wins. `None` when the mask has no foreground.
    pub fn largest_component(mask: &ForegroundMask) -> Option<Blob> {
        let mut best: Option<Blob> = None;
        for blob in find_components(mask, None) {
            match &best {
                Some(current) if current.area() >= blob.area() => {}
                _ => best = Some(blob),
            }
        }
        best
    }

    /// Number of components inside `region` whose area is strictly greater than
    /// `min_area` pixels.
    pub fn count_components(mask: &ForegroundMask, region: Rect, min_area: usize) -> usize {
        find_components(mask, Some(region))
            .iter()
            .filter(|blob| blob.area() > min_area)
            .count()
    }
}
