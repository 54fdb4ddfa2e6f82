//! Command handling for the `visual-servo` binary.

use std::sync::{atomic::AtomicBool, Arc};

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    telemetry,
    tracker::{self, console, controls::TrackerEvent, Toggles},
};

pub const USAGE: &str = "Usage: visual-servo <command>\n\n\
Commands:\n  \
run [--config <path>]    start the tracking pipeline (default config/default.toml)\n  \
check <path>             validate a configuration file and print a summary\n  \
ports                    list USB serial devices\n  \
help                     show this message";

/// Dispatch on the first argument. Returns `false` when the command is not
/// recognized so the caller can print usage.
pub fn handle_commands(args: &[String]) -> Result<bool> {
    match args.get(1).map(String::as_str) {
        Some("run") => {
            run_command(&args[2..])?;
            Ok(true)
        }
        Some("check") => {
            let path = args
                .get(2)
                .ok_or_else(|| anyhow!("check requires a configuration path"))?;
            let config = AppConfig::load(path)?;
            println!("configuration ok: {path}");
            println!(
                "  capture  {0}x{0} @ {1} fps, ring {2}",
                config.capture.region_size, config.capture.target_fps, config.capture.ring_capacity
            );
            println!(
                "  model    {} (confidence >= {})",
                config.model.path.as_deref().unwrap_or(""),
                config.model.confidence
            );
            println!(
                "  serial   {} @ {} baud",
                config.serial.device.as_deref().unwrap_or(""),
                config.serial.baud_rate
            );
            Ok(true)
        }
        Some("ports") => {
            let ports = servo_control::usb_ports().context("serial enumeration failed")?;
            if ports.is_empty() {
                println!("no USB serial devices found");
            }
            for port in ports {
                println!(
                    "{}: vid={} pid={} {}",
                    port.device,
                    port.vid.map_or("-".into(), |v| format!("{v:04x}")),
                    port.pid.map_or("-".into(), |p| format!("{p:04x}")),
                    port.manufacturer.as_deref().unwrap_or("")
                );
            }
            Ok(true)
        }
        Some("help") | Some("--help") | Some("-h") => {
            println!("{USAGE}");
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn run_command(args: &[String]) -> Result<()> {
    let mut config_path = "config/default.toml".to_string();
    let mut idx = 0;
    while idx < args.len() {
        match args[idx].as_str() {
            "--config" => {
                idx += 1;
                config_path = args
                    .get(idx)
                    .ok_or_else(|| anyhow!("--config requires a value"))?
                    .clone();
                idx += 1;
            }
            other => return Err(anyhow!("unrecognized flag {other:?}\n\n{USAGE}")),
        }
    }

    let config = AppConfig::load(&config_path)?;
    telemetry::init(&config.telemetry)?;
    info!(config = %config_path, "configuration loaded");

    let toggles = Arc::new(Toggles::new());
    if config.input.covert_enabled {
        toggles.toggle_covert();
    }
    let shutdown = Arc::new(AtomicBool::new(false));
    let (event_tx, event_rx) = crossbeam_channel::bounded::<TrackerEvent>(64);

    // Status consumer: the GUI's stand-in, mapping events onto the log.
    // Detached; it drains until every sender is gone.
    let _event_logger = std::thread::Builder::new()
        .name("event-log".into())
        .spawn(move || {
            for event in event_rx.iter() {
                match event {
                    TrackerEvent::TrackingToggled(on) => info!("tracking toggled: {on}"),
                    TrackerEvent::NoTarget => info!("no target in range"),
                    TrackerEvent::CaptureStartFailed(reason) => {
                        warn!("capture start failed: {reason}")
                    }
                    TrackerEvent::CaptureRuntimeError(reason) => {
                        warn!("capture runtime error: {reason}")
                    }
                    TrackerEvent::EngineLoadFailed(reason) => warn!("engine load failed: {reason}"),
                    TrackerEvent::SerialPortClosed(device) => {
                        warn!("serial port closed: {device}")
                    }
                }
            }
        })
        .expect("failed to spawn event log thread");

    let _console = console::spawn(toggles.clone(), event_tx.clone(), shutdown.clone());

    tracker::run(&config, toggles, event_tx, shutdown)
}
