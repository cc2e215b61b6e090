// THEORY:
// The segmenter is the first per-frame stage. It compares a frame against the
// acceptance bounds of the `BackgroundModel` and marks each pixel as foreground or
// background. Which side of the bounds counts as "foreground" depends on whether the
// animal is darker than, brighter than, or merely different from the arena floor.
//
// The function is pure: it reads the frame, the model and an optional ROI mask and
// returns a fresh mask. Running it twice on the same inputs gives the same mask.

use crate::core_modules::background_model::BackgroundModel;
use crate::core_modules::frame::{BACKGROUND, FOREGROUND, ForegroundMask};
use crate::error::{Result, TrackerError};
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// How the tracked object differs from the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Foreground where `frame < lower_bound`.
    #[default]
    Darker,
    /// Foreground where `frame > upper_bound`.
    Brighter,
    /// Foreground wherever the frame leaves `[lower_bound, upper_bound]`.
    AnyDifference,
}

/// Produces the foreground mask for one frame.
pub fn segment(
    frame: &GrayImage,
    model: &BackgroundModel,
    polarity: Polarity,
    roi: Option<&ForegroundMask>,
) -> Result<ForegroundMask> {
    model.check_dimensions(frame)?;
    if let Some(roi) = roi {
        if roi.dimensions() != frame.dimensions() {
            return Err(TrackerError::dimension_mismatch(
                "ROI mask",
                roi.dimensions(),
                frame.dimensions(),
            ));
        }
    }

    let lower = model.lower_bound().as_raw();
    let upper = model.upper_bound().as_raw();
    let classify: fn(u8, u8, u8) -> bool = match polarity {
        Polarity::Darker => |v, lo, _| v < lo,
        Polarity::Brighter => |v, _, hi| v > hi,
        Polarity::AnyDifference => |v, lo, hi| v < lo || v > hi,
    };

    let raw: Vec<u8> = frame
        .as_raw()
        .iter()
        .zip(lower.iter().zip(upper.iter()))
        .map(|(&v, (&lo, &hi))| {
            if classify(v, lo, hi) {
                FOREGROUND
            } else {
                BACKGROUND
            }
        })
        .collect();

    let image = GrayImage::from_raw(frame.width(), frame.height(), raw).ok_or_else(|| {
        TrackerError::InvalidGeometry("foreground buffer does not match frame size".into())
    })?;
    let mut mask = ForegroundMask::from_image(image);
    if let Some(roi) = roi {
        mask.intersect(roi);
    }
    Ok(mask)
}

/// `|frame - median|` per pixel, offered to the debug sink on the first tracked frame.
pub fn absolute_difference(frame: &GrayImage, model: &BackgroundModel) -> Result<GrayImage> {
    model.check_dimensions(frame)?;
    let raw = frame
        .as_raw()
        .iter()
        .zip(model.median().as_raw().iter())
        .map(|(&v, &m)| v.abs_diff(m))
        .collect();
    GrayImage::from_raw(frame.width(), frame.height(), raw).ok_or_else(|| {
        TrackerError::InvalidGeometry("difference buffer does not match frame size".into())
    })
}
