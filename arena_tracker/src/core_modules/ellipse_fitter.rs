// THEORY:
// The ellipse fitter summarises a blob's point cloud by its first and second
// moments. The mean is the centre, and the eigenvectors of the covariance matrix
// give the principal axes. Axis lengths are two standard deviations along each
// axis, so a blob of uniform density gets an ellipse that roughly hugs its outline.
//
// Key architectural principles:
// 1.  **Closed form**: A 2x2 symmetric matrix has an analytic eigen-decomposition,
//     so no iterative solver or linear algebra crate is needed.
// 2.  **Orientation only mod pi**: `v1` and `-v1` are the same eigenvector. The
//     angle produced here is a raw axis direction; `HeadingResolver` turns it into
//     a heading.
// 3.  **Never fails**: An empty pixel set yields a zero ellipse and a warning.

use crate::core_modules::geometry::Point;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// An oriented ellipse attached to the frame it was measured on.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EllipseParams {
    pub frame: u64,
    /// Centre column.
    pub x: f64,
    /// Centre row.
    pub y: f64,
    /// Semi-major axis.
    pub a: f64,
    /// Semi-minor axis.
    pub b: f64,
    /// Orientation in radians.
    pub theta: f64,
}

impl EllipseParams {
    /// True for the all-zero ellipse produced when no blob was found.
    pub fn is_degenerate(&self) -> bool {
        self.a == 0.0 && self.b == 0.0 && self.x == 0.0 && self.y == 0.0
    }

    /// The end of the major axis that `theta` points at.
    pub fn head_point(&self) -> (f64, f64) {
        (
            self.x + self.a * self.theta.cos(),
            self.y + self.a * self.theta.sin(),
        )
    }
}

/// Fits an ellipse to `pixels` by principal component analysis. `theta` is only
/// meaningful modulo pi.
pub fn fit_ellipse(pixels: &[Point], frame: u64) -> EllipseParams {
    if pixels.is_empty() {
        warn!(frame, "no foreground pixels to fit, returning degenerate ellipse");
        return EllipseParams {
            frame,
            ..EllipseParams::default()
        };
    }

    let n = pixels.len() as f64;
    let (sum_x, sum_y) = pixels.iter().fold((0.0, 0.0), |(sx, sy), p| {
        (sx + p.x as f64, sy + p.y as f64)
    });
    let (mean_x, mean_y) = (sum_x / n, sum_y / n);

    // Population covariance.
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for p in pixels {
        let dx = p.x as f64 - mean_x;
        let dy = p.y as f64 - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    sxx /= n;
    syy /= n;
    sxy /= n;

    let half_trace = (sxx + syy) / 2.0;
    let spread = (((sxx - syy) / 2.0).powi(2) + sxy * sxy).sqrt();
    let lambda1 = half_trace + spread;
    let lambda2 = (half_trace - spread).max(0.0);

    let theta = if sxy.abs() > f64::EPSILON {
        (sxy).atan2(lambda1 - syy)
    } else if sxx >= syy {
        0.0
    } else {
        std::f64::consts::FRAC_PI_2
    };

    EllipseParams {
        frame,
        x: mean_x,
        y: mean_y,
        a: 2.0 * lambda1.sqrt(),
        b: 2.0 * lambda2.sqrt(),
        theta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// Orientation comparison modulo pi.
    fn same_axis(a: f64, b: f64) -> bool {
        let d = (a - b).rem_euclid(PI);
        d < 1e-9 || (PI - d) < 1e-9
    }

    #[test]
    fn square_gives_circle_at_centroid() {
        let pixels: Vec<Point> = (10..30)
            .flat_map(|y| (40..60).map(move |x| Point { x, y }))
            .collect();
        let e = fit_ellipse(&pixels, 7);
        assert_eq!(e.frame, 7);
        assert!(approx(e.x, 49.5));
        assert!(approx(e.y, 19.5));
        // Variance of 20 consecutive integers is (20^2 - 1) / 12.
        let expected = 2.0 * (399.0f64 / 12.0).sqrt();
        assert!(approx(e.a, expected));
        assert!(approx(e.b, expected));
    }

    #[test]
    fn horizontal_line_points_along_x() {
        let pixels: Vec<Point> = (0..9).map(|x| Point { x, y: 3 }).collect();
        let e = fit_ellipse(&pixels, 0);
        assert!(same_axis(e.theta, 0.0));
        assert!(approx(e.b, 0.0));
        assert!(e.a > 0.0);
    }

    #[test]
    fn vertical_line_points_along_y() {
        let pixels: Vec<Point> = (0..9).map(|y| Point { x: 2, y }).collect();
        let e = fit_ellipse(&pixels, 0);
        assert!(same_axis(e.theta, FRAC_PI_2));
    }

    #[test]
    fn diagonal_line_is_quarter_turn() {
        let pixels: Vec<Point> = (0..9).map(|i| Point { x: i, y: i }).collect();
        let e = fit_ellipse(&pixels, 0);
        assert!(same_axis(e.theta, FRAC_PI_4));
        assert!(e.a >= e.b);
    }

    #[test]
    fn elongated_blob_has_major_axis_first() {
        let pixels: Vec<Point> = (0..3)
            .flat_map(|y| (0..12).map(move |x| Point { x, y }))
            .collect();
        let e = fit_ellipse(&pixels, 0);
        assert!(e.a > e.b);
        assert!(same_axis(e.theta, 0.0));
    }

    #[test]
    fn empty_set_is_degenerate() {
        let e = fit_ellipse(&[], 12);
        assert!(e.is_degenerate());
        assert_eq!(e.frame, 12);
        assert_eq!(e.theta, 0.0);
    }

    #[test]
    fn head_point_follows_theta() {
        let e = EllipseParams {
            frame: 0,
            x: 1.0,
            y: 1.0,
            a: 2.0,
            b: 1.0,
            theta: FRAC_PI_2,
        };
        let (hx, hy) = e.head_point();
        assert!(approx(hx, 1.0));
        assert!(approx(hy, 3.0));
    }
}
