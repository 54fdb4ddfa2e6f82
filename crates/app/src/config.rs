//! Configuration loading and validation.
//!
//! One TOML file populates a strongly-typed [`AppConfig`] exactly once at
//! startup. Unknown keys and missing required options are startup-time
//! errors; nothing downstream ever re-checks an option.

use std::{collections::HashSet, net::SocketAddr, path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use ml_engine::{hostile_class_set, SelectorConfig};
use screen_ingest::{CaptureConfig, Region};
use servo_control::{ChannelConfig, ControlConfig, PidGains};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub capture: CaptureSection,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub control: ControlSection,
    #[serde(default)]
    pub serial: SerialSection,
    #[serde(default)]
    pub input: InputSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureSection {
    /// Side length of the square capture region, centered on the display.
    #[serde(default = "default_region_size")]
    pub region_size: u32,
    #[serde(default = "default_fps")]
    pub target_fps: u32,
    #[serde(default)]
    pub fill_gaps: bool,
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSection {
    pub path: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
    #[serde(default = "default_hostile")]
    pub hostile: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlSection {
    #[serde(default = "default_lock_radius")]
    pub lock_radius: f32,
    #[serde(default = "default_max_step_distance")]
    pub max_step_distance: f32,
    #[serde(default = "default_max_pid_distance")]
    pub max_pid_distance: f32,
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f32,
    #[serde(default = "default_step_scale")]
    pub step_scale: f32,
    #[serde(default = "default_head_bias")]
    pub head_bias: f32,
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: f64,
    #[serde(default = "default_gains")]
    pub pid_x: GainsSection,
    #[serde(default = "default_gains")]
    pub pid_y: GainsSection,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GainsSection {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SerialSection {
    /// Actuation device; required, there is no sensible default.
    pub device: Option<String>,
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
    #[serde(default = "default_covert_prefix")]
    pub covert_prefix: String,
    #[serde(default = "default_serial_timeout_ms")]
    pub timeout_ms: u64,
}

/// Key/button names consumed by the external input listeners. Validated
/// here so a typo fails startup instead of silently never toggling.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputSection {
    #[serde(default = "default_tracking_toggle")]
    pub tracking_toggle: String,
    #[serde(default = "default_engage_button")]
    pub engage_button: String,
    #[serde(default = "default_covert_toggle")]
    pub covert_toggle: String,
    #[serde(default)]
    pub covert_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySection {
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Prometheus exporter listen address; disabled when absent.
    pub metrics_addr: Option<SocketAddr>,
}

fn default_region_size() -> u32 {
    640
}
fn default_fps() -> u32 {
    240
}
fn default_ring_capacity() -> usize {
    8
}
fn default_stop_timeout_ms() -> u64 {
    10_000
}
fn default_confidence() -> f32 {
    0.5
}
fn default_labels() -> Vec<String> {
    vec!["target".into(), "down".into(), "friend".into()]
}
fn default_hostile() -> Vec<String> {
    vec!["target".into()]
}
fn default_lock_radius() -> f32 {
    200.0
}
fn default_max_step_distance() -> f32 {
    100.0
}
fn default_max_pid_distance() -> f32 {
    20.0
}
fn default_sensitivity() -> f32 {
    1.0
}
fn default_step_scale() -> f32 {
    1.0
}
fn default_head_bias() -> f32 {
    0.25
}
fn default_sample_interval_ms() -> f64 {
    1.0
}
fn default_gains() -> GainsSection {
    GainsSection {
        kp: 0.8,
        ki: 0.0,
        kd: 0.0,
    }
}
fn default_baud() -> u32 {
    115_200
}
fn default_covert_prefix() -> String {
    "silent".into()
}
fn default_serial_timeout_ms() -> u64 {
    100
}
fn default_tracking_toggle() -> String {
    "middle".into()
}
fn default_engage_button() -> String {
    "left".into()
}
fn default_covert_toggle() -> String {
    "f8".into()
}
fn default_log_filter() -> String {
    "info".into()
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            region_size: default_region_size(),
            target_fps: default_fps(),
            fill_gaps: false,
            ring_capacity: default_ring_capacity(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            path: None,
            confidence: default_confidence(),
            labels: default_labels(),
            hostile: default_hostile(),
        }
    }
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            lock_radius: default_lock_radius(),
            max_step_distance: default_max_step_distance(),
            max_pid_distance: default_max_pid_distance(),
            sensitivity: default_sensitivity(),
            step_scale: default_step_scale(),
            head_bias: default_head_bias(),
            sample_interval_ms: default_sample_interval_ms(),
            pid_x: default_gains(),
            pid_y: default_gains(),
        }
    }
}

impl Default for InputSection {
    fn default() -> Self {
        Self {
            tracking_toggle: default_tracking_toggle(),
            engage_button: default_engage_button(),
            covert_toggle: default_covert_toggle(),
            covert_enabled: false,
        }
    }
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            device: None,
            baud_rate: default_baud(),
            covert_prefix: default_covert_prefix(),
            timeout_ms: default_serial_timeout_ms(),
        }
    }
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            metrics_addr: None,
        }
    }
}

const KNOWN_BINDINGS: &[&str] = &[
    "left", "right", "middle", "x1", "x2", "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9",
    "f10", "f11", "f12",
];

impl AppConfig {
    /// Read, parse, and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file {}", path.display()))?;
        let config: AppConfig = toml::from_str(&text)
            .with_context(|| format!("failed to parse configuration file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Every cross-field check runs here, before any thread starts.
    pub fn validate(&self) -> Result<()> {
        if self.capture.region_size == 0 {
            bail!("capture.region_size must be positive");
        }
        if self.capture.target_fps == 0 {
            bail!("capture.target_fps must be at least 1");
        }
        if self.capture.ring_capacity == 0 {
            bail!("capture.ring_capacity must be at least 1");
        }
        if self.model.path.as_deref().map_or(true, str::is_empty) {
            bail!("model.path is required");
        }
        if !(0.0..=1.0).contains(&self.model.confidence) {
            bail!("model.confidence must be within [0, 1]");
        }
        if self.model.hostile.is_empty() {
            bail!("model.hostile must name at least one label");
        }
        // Resolving also rejects hostile labels missing from the label list.
        self.hostile_classes()?;
        if self.control.max_pid_distance > self.control.max_step_distance {
            bail!(
                "control.max_pid_distance ({}) must not exceed control.max_step_distance ({})",
                self.control.max_pid_distance,
                self.control.max_step_distance
            );
        }
        if self.control.sample_interval_ms <= 0.0 {
            bail!("control.sample_interval_ms must be positive");
        }
        if self.serial.device.as_deref().map_or(true, str::is_empty) {
            bail!("serial.device is required; no actuation device configured");
        }
        for (key, name) in [
            ("input.tracking_toggle", &self.input.tracking_toggle),
            ("input.engage_button", &self.input.engage_button),
            ("input.covert_toggle", &self.input.covert_toggle),
        ] {
            if !KNOWN_BINDINGS.contains(&name.to_ascii_lowercase().as_str()) {
                bail!("{key} {name:?} is not a recognized binding");
            }
        }
        Ok(())
    }

    pub fn hostile_classes(&self) -> Result<HashSet<i64>> {
        hostile_class_set(&self.model.labels, &self.model.hostile)
    }

    /// Capture region centered on the given display.
    pub fn capture_region(&self, display_width: u32, display_height: u32) -> Region {
        Region::centered(
            display_width,
            display_height,
            self.capture.region_size,
            self.capture.region_size,
        )
    }

    pub fn capture_config(&self, region: Region) -> CaptureConfig {
        CaptureConfig {
            region,
            target_fps: self.capture.target_fps,
            fill_gaps: self.capture.fill_gaps,
            ring_capacity: self.capture.ring_capacity,
            stop_timeout: Duration::from_millis(self.capture.stop_timeout_ms),
        }
    }

    pub fn selector_config(&self) -> Result<SelectorConfig> {
        let size = self.capture.region_size as f32;
        Ok(SelectorConfig {
            confidence: self.model.confidence,
            hostile_classes: self.hostile_classes()?,
            lock_radius: self.control.lock_radius,
            head_bias: self.control.head_bias,
            aim_point: (size / 2.0, size / 2.0),
        })
    }

    pub fn control_config(&self) -> ControlConfig {
        let control = &self.control;
        ControlConfig {
            max_step_distance: control.max_step_distance,
            max_pid_distance: control.max_pid_distance,
            sensitivity: control.sensitivity,
            step_scale: control.step_scale,
            gains_x: PidGains {
                kp: control.pid_x.kp,
                ki: control.pid_x.ki,
                kd: control.pid_x.kd,
            },
            gains_y: PidGains {
                kp: control.pid_y.kp,
                ki: control.pid_y.ki,
                kd: control.pid_y.kd,
            },
            sample_interval: Duration::from_secs_f64(control.sample_interval_ms / 1000.0),
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            device: self.serial.device.clone().unwrap_or_default(),
            baud_rate: self.serial.baud_rate,
            covert_prefix: self.serial.covert_prefix.clone(),
            timeout: Duration::from_millis(self.serial.timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [model]
        path = "network.onnx"

        [serial]
        device = "COM10"
    "#;

    #[test]
    fn minimal_config_validates_with_defaults() {
        let config: AppConfig = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.capture.region_size, 640);
        assert_eq!(config.capture.target_fps, 240);
        assert_eq!(config.model.confidence, 0.5);
        assert_eq!(config.serial.covert_prefix, "silent");
        assert_eq!(config.control.max_step_distance, 100.0);
    }

    #[test]
    fn missing_serial_device_fails_fast() {
        let config: AppConfig = toml::from_str(
            r#"
            [model]
            path = "network.onnx"
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("serial.device"), "{err}");
    }

    #[test]
    fn missing_model_path_fails_fast() {
        let config: AppConfig = toml::from_str(
            r#"
            [serial]
            device = "COM10"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_keys_are_rejected_at_parse_time() {
        let result: std::result::Result<AppConfig, _> = toml::from_str(
            r#"
            [model]
            path = "network.onnx"
            typo_key = 7

            [serial]
            device = "COM10"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn hostile_label_must_exist_in_label_list() {
        let config: AppConfig = toml::from_str(
            r#"
            [model]
            path = "network.onnx"
            labels = ["target", "friend"]
            hostile = ["ghost"]

            [serial]
            device = "COM10"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_distance_thresholds_are_rejected() {
        let config: AppConfig = toml::from_str(
            r#"
            [model]
            path = "network.onnx"

            [control]
            max_step_distance = 50.0
            max_pid_distance = 80.0

            [serial]
            device = "COM10"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unrecognized_binding_is_rejected() {
        let config: AppConfig = toml::from_str(
            r#"
            [model]
            path = "network.onnx"

            [serial]
            device = "COM10"

            [input]
            tracking_toggle = "pedal"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn selector_aim_point_is_region_center() {
        let config: AppConfig = toml::from_str(MINIMAL).unwrap();
        let selector = config.selector_config().unwrap();
        assert_eq!(selector.aim_point, (320.0, 320.0));
        assert!(selector.hostile_classes.contains(&0));
    }

    #[test]
    fn gain_sections_map_to_axis_gains() {
        let config: AppConfig = toml::from_str(
            r#"
            [model]
            path = "network.onnx"

            [control]
            pid_x = { kp = 0.4, ki = 0.04, kd = 0.2 }
            pid_y = { kp = 0.5, ki = 0.05, kd = 0.25 }

            [serial]
            device = "COM10"
            "#,
        )
        .unwrap();
        let control = config.control_config();
        assert_eq!(control.gains_x.kp, 0.4);
        assert_eq!(control.gains_y.kd, 0.25);
        assert_eq!(control.sample_interval, Duration::from_millis(1));
    }
}
