// THEORY:
// The region trigger detector is the counting side of the engine. Instead of
// following one animal it asks, every frame, how many objects sit inside each
// configured rectangle, and turns one composite condition into a one-shot event
// for an external consumer (for example a feeder or a stimulus controller).
//
// Key architectural principles:
// 1.  **Stateless classification**: Per-region counts depend only on the current
//     frame and mask.
// 2.  **Two-flag debounce**: `pulsed` stops the event from repeating while the
//     condition stays true and clears as soon as it goes false. `has_triggered` is a
//     latch that only an explicit `reset` clears, so a consumer that has not
//     acknowledged the last event never receives another one.
// 3.  **Configurable population**: The "all present" condition is an exact count of
//     qualifying objects in the presence region. The expected count is configuration.

use crate::core_modules::blob_detector::blob_detector;
use crate::core_modules::frame::ForegroundMask;
use crate::core_modules::geometry::Rect;
use crate::error::{Result, TrackerError};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Which side of a fixed intensity level counts as an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntensityPolarity {
    Darker,
    Brighter,
}

/// How a region decides which pixels belong to objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegionDetection {
    /// Use the session's foreground mask.
    #[default]
    ForegroundMask,
    /// Threshold the raw frame inside the region.
    Intensity {
        polarity: IntensityPolarity,
        threshold: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSpec {
    pub name: String,
    pub rect: Rect,
    #[serde(default)]
    pub detection: RegionDetection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceSpec {
    pub region: RegionSpec,
    #[serde(default = "default_expected_count")]
    pub expected_count: usize,
}

fn default_expected_count() -> usize {
    3
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegionTriggerConfig {
    /// Occupancy regions, reported as bits of the feeder status (bit `i` for
    /// region `i`).
    #[serde(default)]
    pub regions: Vec<RegionSpec>,
    /// Region whose exact object count drives the trigger. Without it, the trigger
    /// condition is "every occupancy region occupied".
    #[serde(default)]
    pub presence: Option<PresenceSpec>,
    /// Components must have more pixels than this to count.
    #[serde(default)]
    pub min_component_area: usize,
}

impl RegionTriggerConfig {
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty() && self.presence.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        let specs = self
            .regions
            .iter()
            .chain(self.presence.as_ref().map(|p| &p.region));
        for spec in specs {
            if spec.rect.width == 0 || spec.rect.height == 0 {
                return Err(TrackerError::InvalidGeometry(format!(
                    "region '{}' has zero area",
                    spec.name
                )));
            }
        }
        if self.regions.len() > 32 {
            return Err(TrackerError::InvalidConfig(format!(
                "at most 32 occupancy regions fit in the status mask, got {}",
                self.regions.len()
            )));
        }
        if let Some(presence) = &self.presence {
            if presence.expected_count == 0 {
                return Err(TrackerError::InvalidConfig(
                    "presence region needs an expected count of at least 1".into(),
                ));
            }
        }
        Ok(())
    }
}

/// One-shot notification that the presence condition became true.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub frame: u64,
    pub timestamp: f64,
    /// Qualifying objects seen in the presence region (or occupied regions).
    pub count: usize,
}

/// Result of evaluating one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionReport {
    /// Qualifying component count per occupancy region.
    pub counts: Vec<usize>,
    pub occupancy: Vec<bool>,
    pub presence_count: Option<usize>,
    pub all_present: bool,
    /// True on exactly the frame that fires an event.
    pub detect: bool,
}

impl RegionReport {
    pub fn status_bits(&self) -> u32 {
        self.occupancy
            .iter()
            .enumerate()
            .filter(|(_, occupied)| **occupied)
            .fold(0, |bits, (i, _)| bits | (1 << i))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegionTriggerDetector {
    config: RegionTriggerConfig,
    pulsed: bool,
    has_triggered: bool,
    last_status: u32,
}

impl RegionTriggerDetector {
    pub fn new(config: RegionTriggerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &RegionTriggerConfig {
        &self.config
    }

    /// Replaces the region layout. Debounce flags are kept.
    pub fn set_config(&mut self, config: RegionTriggerConfig) {
        self.config = config;
        self.last_status = 0;
    }

    /// Counts objects in every region and advances the debounce state.
    pub fn evaluate(&mut self, frame: &GrayImage, mask: &ForegroundMask) -> Result<RegionReport> {
        if frame.dimensions() != mask.dimensions() {
            return Err(TrackerError::dimension_mismatch(
                "foreground mask",
                mask.dimensions(),
                frame.dimensions(),
            ));
        }

        let min_area = self.config.min_component_area;
        let counts = self
            .config
            .regions
            .iter()
            .map(|spec| count_in_region(spec, frame, mask, min_area))
            .collect::<Result<Vec<_>>>()?;
        let occupancy: Vec<bool> = counts.iter().map(|&c| c >= 1).collect();

        let presence_count = match &self.config.presence {
            Some(presence) => Some(count_in_region(&presence.region, frame, mask, min_area)?),
            None => None,
        };
        let all_present = match (&self.config.presence, presence_count) {
            (Some(presence), Some(count)) => count == presence.expected_count,
            _ => !occupancy.is_empty() && occupancy.iter().all(|&o| o),
        };

        let detect = self.update_edge(all_present);
        let report = RegionReport {
            counts,
            occupancy,
            presence_count,
            all_present,
            detect,
        };
        self.last_status = report.status_bits();
        Ok(report)
    }

    /// Advances `pulsed`/`has_triggered` for one frame. Returns true when an event
    /// must be emitted.
    pub fn update_edge(&mut self, all_present: bool) -> bool {
        if !all_present {
            self.pulsed = false;
            return false;
        }
        if self.pulsed || self.has_triggered {
            return false;
        }
        self.pulsed = true;
        self.has_triggered = true;
        info!("region trigger fired");
        true
    }

    /// Whether an event has fired since the last reset.
    pub fn fish_status(&self) -> bool {
        self.has_triggered
    }

    /// Returns the latch value, then re-arms the detector.
    pub fn reset(&mut self) -> bool {
        let was_triggered = self.has_triggered;
        self.has_triggered = false;
        self.pulsed = false;
        debug!(was_triggered, "region trigger re-armed");
        was_triggered
    }

    /// Bitmask of occupied regions from the last evaluated frame.
    pub fn feeder_status(&self) -> u32 {
        self.last_status
    }
}

fn count_in_region(
    spec: &RegionSpec,
    frame: &GrayImage,
    mask: &ForegroundMask,
    min_area: usize,
) -> Result<usize> {
    let (width, height) = frame.dimensions();
    let Some(rect) = spec.rect.clamp_to(width, height) else {
        return Err(TrackerError::InvalidGeometry(format!(
            "region '{}' lies outside the {width}x{height} frame",
            spec.name
        )));
    };

    match spec.detection {
        RegionDetection::ForegroundMask => {
            Ok(blob_detector::count_components(mask, rect, min_area))
        }
        RegionDetection::Intensity {
            polarity,
            threshold,
        } => {
            let mut local = ForegroundMask::empty(rect.width, rect.height);
            for y in 0..rect.height {
                for x in 0..rect.width {
                    let value = frame.get_pixel(rect.x + x, rect.y + y).0[0];
                    let hit = match polarity {
                        IntensityPolarity::Darker => value < threshold,
                        IntensityPolarity::Brighter => value > threshold,
                    };
                    if hit {
                        local.set(x, y, true);
                    }
                }
            }
            let whole = Rect::new(0, 0, rect.width, rect.height);
            Ok(blob_detector::count_components(&local, whole, min_area))
        }
    }
}
