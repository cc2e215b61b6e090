// THEORY:
// The region of interest limits where the animal may be found. It is configured as
// a shape in pixel coordinates and rasterised into a mask once per frame size, so
// segmentation only pays an elementwise AND per frame.

use crate::core_modules::ellipse_fitter::EllipseParams;
use crate::core_modules::frame::ForegroundMask;
use crate::error::{Result, TrackerError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoiShape {
    /// The whole frame is in bounds.
    #[default]
    None,
    Rectangle {
        center_x: f64,
        center_y: f64,
        width: f64,
        height: f64,
    },
    Circle {
        center_x: f64,
        center_y: f64,
        radius: f64,
    },
}

impl RoiShape {
    pub fn validate(&self) -> Result<()> {
        let finite = |values: &[f64]| values.iter().all(|v| v.is_finite());
        match *self {
            RoiShape::None => Ok(()),
            RoiShape::Rectangle {
                center_x,
                center_y,
                width,
                height,
            } => {
                if !finite(&[center_x, center_y, width, height]) || width <= 0.0 || height <= 0.0 {
                    return Err(TrackerError::InvalidGeometry(format!(
                        "rectangle ROI needs a finite centre and positive size, got {width}x{height} at ({center_x}, {center_y})"
                    )));
                }
                Ok(())
            }
            RoiShape::Circle {
                center_x,
                center_y,
                radius,
            } => {
                if !finite(&[center_x, center_y, radius]) || radius <= 0.0 {
                    return Err(TrackerError::InvalidGeometry(format!(
                        "circle ROI needs a finite centre and positive radius, got {radius}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Rasterises the shape for a frame of the given size. `None` means no ROI.
    pub fn rasterize(&self, width: u32, height: u32) -> Result<Option<ForegroundMask>> {
        self.validate()?;
        let inside: Box<dyn Fn(f64, f64) -> bool> = match *self {
            RoiShape::None => return Ok(None),
            RoiShape::Rectangle {
                center_x,
                center_y,
                width,
                height,
            } => {
                let (x0, x1) = (center_x - width / 2.0, center_x + width / 2.0);
                let (y0, y1) = (center_y - height / 2.0, center_y + height / 2.0);
                Box::new(move |x, y| x >= x0 && x < x1 && y >= y0 && y < y1)
            }
            RoiShape::Circle {
                center_x,
                center_y,
                radius,
            } => {
                let r2 = radius * radius;
                Box::new(move |x, y| (x - center_x).powi(2) + (y - center_y).powi(2) <= r2)
            }
        };

        let mut mask = ForegroundMask::empty(width, height);
        for y in 0..height {
            for x in 0..width {
                if inside(x as f64, y as f64) {
                    mask.set(x, y, true);
                }
            }
        }
        if mask.count_foreground() == 0 {
            return Err(TrackerError::InvalidGeometry(format!(
                "ROI {self:?} does not overlap a {width}x{height} frame"
            )));
        }
        Ok(Some(mask))
    }

    /// The ROI expressed as an axis-aligned ellipse: centre plus half-extents.
    pub fn as_ellipse(&self) -> Option<EllipseParams> {
        match *self {
            RoiShape::None => None,
            RoiShape::Rectangle {
                center_x,
                center_y,
                width,
                height,
            } => Some(EllipseParams {
                frame: 0,
                x: center_x,
                y: center_y,
                a: width / 2.0,
                b: height / 2.0,
                theta: 0.0,
            }),
            RoiShape::Circle {
                center_x,
                center_y,
                radius,
            } => Some(EllipseParams {
                frame: 0,
                x: center_x,
                y: center_y,
                a: radius,
                b: radius,
                theta: 0.0,
            }),
        }
    }
}
