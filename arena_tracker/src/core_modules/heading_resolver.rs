// THEORY:
// The `heading_resolver` adds memory to the otherwise stateless measurement chain.
// PCA gives the axis of the animal's body but not which end is the head: `theta` and
// `theta + pi` are equally valid fits. The resolver picks one using two cues:
//
// 1.  **Motion**: animals mostly swim head first, so the mean recent displacement of
//     the centre points roughly at the head.
// 2.  **Continuity**: the heading cannot turn half a circle between two frames, so
//     the new heading should agree with the recent mean heading.
//
// Key architectural principles:
// 1.  **Commit once, then smooth**: Until the first confident velocity match the
//     track has no committed direction, so the first strong motion cue decides the
//     heading outright and re-aligns the orientation window with it. After that, each
//     frame blends weighted velocity agreement with orientation agreement, so a
//     single noisy frame cannot flip the track.
// 2.  **Unwrapped history**: Orientations are stored as a continuous sequence (no jumps
//     larger than pi), so their arithmetic mean is a meaningful direction. Only the
//     emitted `theta` is wrapped into (-pi, pi].
// 3.  **Consecutive frames only**: Velocity is the difference of two consecutive
//     valid centres. A frame without a blob breaks the chain.

use crate::core_modules::ellipse_fitter::EllipseParams;
use crate::core_modules::geometry::Vec2;
use crate::core_modules::history::HistoryBuffer;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f64::consts::{PI, TAU};
use tracing::debug;

/// Minimum |cos| between heading and mean velocity for the motion cue alone to
/// commit a heading.
pub const MIN_VEL_MATCH_DOTPROD: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadingConfig {
    #[serde(default = "default_history_buffer_length")]
    pub history_buffer_length: usize,
    /// Pixels per frame below which the mean velocity is ignored.
    #[serde(default = "default_min_velocity_magnitude")]
    pub min_velocity_magnitude: f64,
    /// Weight of the velocity agreement relative to orientation agreement.
    #[serde(default = "default_head_tail_weight_velocity")]
    pub head_tail_weight_velocity: f64,
}

fn default_history_buffer_length() -> usize {
    5
}
fn default_min_velocity_magnitude() -> f64 {
    1.0
}
fn default_head_tail_weight_velocity() -> f64 {
    3.0
}

impl Default for HeadingConfig {
    fn default() -> Self {
        Self {
            history_buffer_length: default_history_buffer_length(),
            min_velocity_magnitude: default_min_velocity_magnitude(),
            head_tail_weight_velocity: default_head_tail_weight_velocity(),
        }
    }
}

/// Maps any angle into (-pi, pi].
pub fn mod2pi(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

/// Turns mod-pi orientations into a temporally stable mod-2pi heading.
#[derive(Debug, Clone)]
pub struct HeadingResolver {
    config: HeadingConfig,
    velocity_history: HistoryBuffer<Vec2>,
    orientation_history: HistoryBuffer<f64>,
    head_tail_resolved: bool,
    previous_center: Option<Vec2>,
    /// Finalized ellipses of this track, newest last.
    ellipse_history: VecDeque<EllipseParams>,
    ellipse_history_limit: usize,
}

impl HeadingResolver {
    /// `ellipse_history_limit` bounds the per-track record of finalized ellipses.
    pub fn new(config: HeadingConfig, ellipse_history_limit: usize) -> Self {
        let length = config.history_buffer_length;
        Self {
            config,
            velocity_history: HistoryBuffer::new(length),
            orientation_history: HistoryBuffer::new(length),
            head_tail_resolved: false,
            previous_center: None,
            ellipse_history: VecDeque::new(),
            ellipse_history_limit: ellipse_history_limit.max(1),
        }
    }

    pub fn config(&self) -> &HeadingConfig {
        &self.config
    }

    /// Applies new parameters without dropping the track. Shorter windows evict
    /// their oldest entries.
    pub fn update_config(&mut self, config: HeadingConfig, ellipse_history_limit: usize) {
        self.velocity_history
            .set_capacity(config.history_buffer_length);
        self.orientation_history
            .set_capacity(config.history_buffer_length);
        self.config = config;
        self.ellipse_history_limit = ellipse_history_limit.max(1);
        while self.ellipse_history.len() > self.ellipse_history_limit {
            self.ellipse_history.pop_front();
        }
    }

    /// Resolves the head/tail ambiguity of `ellipse` and records it. The returned
    /// ellipse carries a heading in (-pi, pi].
    pub fn resolve(&mut self, ellipse: EllipseParams) -> EllipseParams {
        // 1. Unwrap against the last stored orientation.
        let mut theta = match self.orientation_history.last() {
            Some(last) => last + mod2pi(ellipse.theta - last),
            None => ellipse.theta,
        };

        // 2. Velocity from consecutive centres.
        let center = Vec2::new(ellipse.x, ellipse.y);
        if let Some(previous) = self.previous_center {
            self.velocity_history.push(center - previous);
        }
        self.previous_center = Some(center);

        // 3. Motion cue.
        let head_dir = Vec2::from_angle(theta);
        let mean_velocity = self.velocity_history.mean();
        let vel_mag = if self.velocity_history.is_empty() {
            0.0
        } else {
            mean_velocity.norm()
        };

        let mut velocity_agreement = 0.0;
        if vel_mag > self.config.min_velocity_magnitude {
            let dotprod = head_dir.dot(&mean_velocity) / vel_mag;
            if !self.head_tail_resolved && dotprod.abs() > MIN_VEL_MATCH_DOTPROD {
                if dotprod < 0.0 {
                    theta += PI;
                    self.orientation_history.shift_all(PI);
                }
                self.head_tail_resolved = true;
                debug!(
                    frame = ellipse.frame,
                    flipped = dotprod < 0.0,
                    "head/tail committed from velocity"
                );
                return self.finalize(ellipse, theta);
            }
            velocity_agreement = dotprod;
        }

        // 4. Blend with agreement to the mean orientation. Agreements are cosines,
        // so flipping negates both; flip when keeping scores below zero.
        let orientation_agreement = if self.orientation_history.is_empty() {
            0.0
        } else {
            head_dir.dot(&Vec2::from_angle(self.orientation_history.mean()))
        };
        let keep = self.config.head_tail_weight_velocity * velocity_agreement + orientation_agreement;
        let flip = -keep;
        if flip > keep {
            theta += PI;
        }

        self.finalize(ellipse, theta)
    }

    fn finalize(&mut self, ellipse: EllipseParams, theta: f64) -> EllipseParams {
        // 5. Keep the stored sequence continuous.
        let stored = match self.orientation_history.last() {
            Some(last) => last + mod2pi(theta - last),
            None => theta,
        };
        self.orientation_history.push(stored);

        // 6. Record.
        let resolved = EllipseParams {
            theta: mod2pi(theta),
            ..ellipse
        };
        self.ellipse_history.push_back(resolved);
        if self.ellipse_history.len() > self.ellipse_history_limit {
            self.ellipse_history.pop_front();
        }
        resolved
    }

    /// Marks a frame without a usable blob. The next ellipse starts a new velocity
    /// chain.
    pub fn skip_frame(&mut self) {
        self.previous_center = None;
    }

    /// Forgets the whole track.
    pub fn reset(&mut self) {
        self.velocity_history.clear();
        self.orientation_history.clear();
        self.head_tail_resolved = false;
        self.previous_center = None;
        self.ellipse_history.clear();
    }

    pub fn is_resolved(&self) -> bool {
        self.head_tail_resolved
    }

    pub fn mean_velocity(&self) -> Vec2 {
        self.velocity_history.mean()
    }

    pub fn velocity_history(&self) -> &HistoryBuffer<Vec2> {
        &self.velocity_history
    }

    pub fn orientation_history(&self) -> &HistoryBuffer<f64> {
        &self.orientation_history
    }

    pub fn ellipse_history(&self) -> &VecDeque<EllipseParams> {
        &self.ellipse_history
    }

    pub fn last_ellipse(&self) -> Option<&EllipseParams> {
        self.ellipse_history.back()
    }
}
