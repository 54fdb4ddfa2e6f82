//! Dual-regime motion controller.
//!
//! Far targets get a capped proportional step, near targets are handed to
//! per-axis PID loops, and the band in between falls through to the plain
//! proportional step. Regime choice at the boundaries is deterministic: the
//! cap applies at `d >= max_step_distance`, PID at `d <= max_pid_distance`.

use std::time::Duration;

use crate::pid::{AxisPid, PidGains};

/// Target offset from the aim point, as seen by the controller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AimOffset {
    pub dx: f32,
    pub dy: f32,
    /// Euclidean distance from the aim point.
    pub distance: f32,
}

impl AimOffset {
    pub fn new(dx: f32, dy: f32) -> Self {
        Self {
            dx,
            dy,
            distance: dx.hypot(dy),
        }
    }
}

/// Per-iteration actuation delta, in device units.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepDelta {
    pub dx: f32,
    pub dy: f32,
}

impl StepDelta {
    pub const ZERO: Self = Self { dx: 0.0, dy: 0.0 };

    pub fn is_zero(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0
    }
}

/// Tuning for the dual-regime controller.
#[derive(Clone, Copy, Debug)]
pub struct ControlConfig {
    /// At or beyond this distance the proportional step is rescaled so its
    /// magnitude cannot exceed `max_step_distance * sensitivity`.
    pub max_step_distance: f32,
    /// At or below this distance the PID regime takes over.
    pub max_pid_distance: f32,
    /// Scale applied to the raw offset before regime handling.
    pub sensitivity: f32,
    /// Final multiplier on the emitted step.
    pub step_scale: f32,
    pub gains_x: PidGains,
    pub gains_y: PidGains,
    pub sample_interval: Duration,
}

/// Stateful controller converting aim-point offsets into actuation deltas.
pub struct MotionController {
    config: ControlConfig,
    pid_x: AxisPid,
    pid_y: AxisPid,
}

impl MotionController {
    pub fn new(config: ControlConfig) -> Self {
        let pid_x = AxisPid::new(config.gains_x, config.sample_interval);
        let pid_y = AxisPid::new(config.gains_y, config.sample_interval);
        Self {
            config,
            pid_x,
            pid_y,
        }
    }

    /// Compute the next actuation delta. `None` means no target in range or
    /// tracking disengaged: the output is zero and PID state is cleared so
    /// nothing winds up across idle periods.
    pub fn update(&mut self, target: Option<AimOffset>) -> StepDelta {
        let Some(offset) = target else {
            self.reset();
            return StepDelta::ZERO;
        };

        let cfg = &self.config;
        let mut rel_x = offset.dx * cfg.sensitivity;
        let mut rel_y = offset.dy * cfg.sensitivity;

        if offset.distance >= cfg.max_step_distance {
            // Cap the step so a distant target cannot command an unbounded
            // jump; magnitude tops out at max_step_distance * sensitivity.
            let k = cfg.max_step_distance / offset.distance;
            rel_x *= k;
            rel_y *= k;
        } else if offset.distance <= cfg.max_pid_distance {
            rel_x = self.pid_x.drive(-rel_x);
            rel_y = self.pid_y.drive(-rel_y);
        }
        // Between the thresholds the plain proportional step stands.

        StepDelta {
            dx: rel_x * cfg.step_scale,
            dy: rel_y * cfg.step_scale,
        }
    }

    /// Zero both axis controllers.
    pub fn reset(&mut self) {
        self.pid_x.reset();
        self.pid_y.reset();
    }

    pub fn is_reset(&self) -> bool {
        self.pid_x.is_reset() && self.pid_y.is_reset()
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }
}
