// THEORY:
// All tunable parameters live in one serde tree, `TrackerConfig`. Every field has a
// default, so an empty document is a valid configuration and a partial document
// only overrides what it names. The same tree is read from a file plus `ARENA__`
// environment overrides at start-up, and accepted as JSON through the `set-config`
// command at run time.
//
// Env format: ARENA__SECTION__KEY (double underscore separators), for example
// `ARENA__BACKGROUND__THRESHOLD=40`.

use crate::core_modules::background_histogram::{DEFAULT_BIN_SIZE, DEFAULT_NUM_BINS};
use crate::core_modules::heading_resolver::HeadingConfig;
use crate::core_modules::region_trigger::RegionTriggerConfig;
use crate::core_modules::roi::RoiShape;
use crate::core_modules::segmenter::Polarity;
use crate::core_modules::track_buffer::DEFAULT_MAX_TRACK_QUEUE_LENGTH;
use crate::error::{Result, TrackerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What the session does with incoming frames. The two modes never interleave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    #[default]
    Track,
    EstimateBackground,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub mode: OperatingMode,
    #[serde(default)]
    pub background: BackgroundConfig,
    #[serde(default)]
    pub roi: RoiShape,
    #[serde(default)]
    pub heading: HeadingConfig,
    #[serde(default = "default_max_track_queue_length")]
    pub max_track_queue_length: usize,
    #[serde(default)]
    pub regions: RegionTriggerConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

fn default_max_track_queue_length() -> usize {
    DEFAULT_MAX_TRACK_QUEUE_LENGTH
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::default(),
            background: BackgroundConfig::default(),
            roi: RoiShape::default(),
            heading: HeadingConfig::default(),
            max_track_queue_length: default_max_track_queue_length(),
            regions: RegionTriggerConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Half-width of the per-pixel acceptance band around the median.
    #[serde(default = "default_threshold")]
    pub threshold: u8,
    #[serde(default)]
    pub polarity: Polarity,
    #[serde(default = "default_num_bins")]
    pub num_bins: usize,
    #[serde(default = "default_bin_size")]
    pub bin_size: u16,
    /// Frames skipped between two background samples.
    #[serde(default = "default_frames_skip")]
    pub frames_skip: u64,
    /// Samples collected before the estimate is finalized.
    #[serde(default = "default_sample_budget")]
    pub sample_budget: u32,
    /// Where the median image is saved and loaded.
    #[serde(default)]
    pub image_path: Option<PathBuf>,
}

fn default_threshold() -> u8 {
    75
}
fn default_num_bins() -> usize {
    DEFAULT_NUM_BINS
}
fn default_bin_size() -> u16 {
    DEFAULT_BIN_SIZE
}
fn default_frames_skip() -> u64 {
    5
}
fn default_sample_budget() -> u32 {
    100
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            polarity: Polarity::default(),
            num_bins: default_num_bins(),
            bin_size: default_bin_size(),
            frames_skip: default_frames_skip(),
            sample_budget: default_sample_budget(),
            image_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Offer intermediate images to the debug sink on the first frame after
    /// (re)configuration.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_debug_dir")]
    pub output_dir: PathBuf,
}

fn default_debug_dir() -> PathBuf {
    PathBuf::from("debug")
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: default_debug_dir(),
        }
    }
}

impl TrackerConfig {
    /// Reads `path` (any format the `config` crate understands, picked by extension)
    /// when given, then applies `ARENA__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("ARENA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: TrackerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: TrackerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heading.history_buffer_length == 0 {
            return Err(TrackerError::InvalidConfig(
                "heading.history_buffer_length must be at least 1".into(),
            ));
        }
        if !self.heading.min_velocity_magnitude.is_finite()
            || self.heading.min_velocity_magnitude < 0.0
        {
            return Err(TrackerError::InvalidConfig(
                "heading.min_velocity_magnitude must be a non-negative number".into(),
            ));
        }
        if !self.heading.head_tail_weight_velocity.is_finite() {
            return Err(TrackerError::InvalidConfig(
                "heading.head_tail_weight_velocity must be finite".into(),
            ));
        }
        if self.max_track_queue_length == 0 {
            return Err(TrackerError::InvalidConfig(
                "max_track_queue_length must be at least 1".into(),
            ));
        }
        let bg = &self.background;
        if bg.num_bins == 0 || bg.bin_size == 0 || bg.num_bins * (bg.bin_size as usize) < 256 {
            return Err(TrackerError::InvalidConfig(format!(
                "{} bins of size {} do not cover intensities 0..=255",
                bg.num_bins, bg.bin_size
            )));
        }
        if bg.sample_budget == 0 {
            return Err(TrackerError::InvalidConfig(
                "background.sample_budget must be at least 1".into(),
            ));
        }
        self.roi.validate()?;
        self.regions.validate()?;
        Ok(())
    }
}
