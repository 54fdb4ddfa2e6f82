//! Orchestrator: ties capture, inference, selection, control, and actuation
//! into the per-frame loop, and supervises capture restarts.
//!
//! One logical thread pulls the newest frame, runs the engine and selector,
//! and hands the controller's delta to the serial channel. Capture faults
//! are recoverable: the driver is stopped, its resources released, and
//! capture re-initialized. Engine and serial failures are fatal. Teardown
//! always runs in order (ring, driver, engine, channel), exactly once.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Once,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use ml_engine::{select, DetectionEngine, EngineConfig, SelectorConfig};
use screen_ingest::{CaptureDriver, DisplaySource};
use servo_control::{ActuationChannel, AimOffset, MotionController};

use crate::{
    config::AppConfig,
    tracker::controls::{emit, Toggles, TrackerEvent},
};

/// Sleep while idle (tracking and covert both off).
const IDLE_SLEEP: Duration = Duration::from_millis(1);
/// Sleep when the ring has no frame yet.
const POLL_SLEEP: Duration = Duration::from_millis(1);
/// Rate limit for the no-frame warning.
const MISSING_WARN_EVERY: Duration = Duration::from_secs(1);
/// A capture thread that publishes nothing for this long has stalled.
const CAPTURE_STALE_AFTER: Duration = Duration::from_secs(2);
/// Consecutive capture start failures tolerated before giving up.
const MAX_START_ATTEMPTS: u32 = 5;
/// Pause between capture re-initializations.
const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Why the iteration loop returned.
enum LoopOutcome {
    Graceful,
    CaptureFault(String),
}

/// Owns every component with a teardown obligation. `shutdown` is the one
/// release path and is idempotent, callable even after partial startup.
#[derive(Default)]
struct Pipeline {
    driver: Option<CaptureDriver>,
    engine: Option<DetectionEngine>,
    channel: Option<ActuationChannel>,
}

impl Pipeline {
    /// Ordered release: ring first, then the capture thread, then engine
    /// device resources, then the serial link.
    fn shutdown(&mut self) {
        if let Some(driver) = self.driver.as_mut() {
            driver.clear_ring();
            driver.stop();
        }
        self.driver = None;
        if let Some(engine) = self.engine.take() {
            engine.close();
        }
        if let Some(channel) = self.channel.as_mut() {
            channel.close();
        }
        self.channel = None;
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run the tracking pipeline until shutdown is requested or a fatal error
/// occurs. Toggle flags are read fresh each iteration; status events go out
/// over `events`.
pub fn run(
    config: &AppConfig,
    toggles: Arc<Toggles>,
    events: Sender<TrackerEvent>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    install_interrupt_handler(shutdown.clone());

    let selector_config = config.selector_config()?;
    let aim_point = selector_config.aim_point;
    let mut controller = MotionController::new(config.control_config());
    let mut pipeline = Pipeline::default();

    // Engine first: a load or bind failure aborts startup outright.
    let model_path = config.model.path.clone().unwrap_or_default();
    let engine_config = EngineConfig::new(
        model_path,
        config.capture.region_size,
        config.capture.region_size,
    );
    let engine = match load_engine(&engine_config) {
        Ok(engine) => engine,
        Err(err) => {
            emit(&events, TrackerEvent::EngineLoadFailed(format!("{err:#}")));
            return Err(err);
        }
    };
    pipeline.engine = Some(engine);

    let mut channel = match ActuationChannel::open(config.channel_config()) {
        Ok(channel) => channel,
        Err(err) => {
            emit(
                &events,
                TrackerEvent::SerialPortClosed(config.channel_config().device),
            );
            return Err(err).context("failed to open actuation channel");
        }
    };
    // Zero-delta probe proves the link end to end before tracking starts.
    if let Err(err) = channel.send(0.0, 0.0, false) {
        emit(
            &events,
            TrackerEvent::SerialPortClosed(channel.device().to_string()),
        );
        return Err(err).context("actuation channel probe failed");
    }
    pipeline.channel = Some(channel);

    info!(
        region = config.capture.region_size,
        fps = config.capture.target_fps,
        device = config.serial.device.as_deref().unwrap_or(""),
        "pipeline initialized"
    );

    let result = supervise(
        config,
        &selector_config,
        aim_point,
        &mut controller,
        &mut pipeline,
        &toggles,
        &events,
        &shutdown,
    );
    pipeline.shutdown();
    result
}

fn load_engine(config: &EngineConfig) -> Result<DetectionEngine> {
    let mut engine = DetectionEngine::load(config).context("engine load failed")?;
    engine.bind_io().context("engine I/O binding failed")?;
    for binding in engine.bindings() {
        debug!(
            name = %binding.name,
            shape = ?binding.shape,
            bytes = binding.byte_len,
            "engine tensor"
        );
    }
    Ok(engine)
}

/// Start capture and run the iteration loop, re-initializing capture on
/// recoverable faults until shutdown or a fatal error.
#[allow(clippy::too_many_arguments)]
fn supervise(
    config: &AppConfig,
    selector_config: &SelectorConfig,
    aim_point: (f32, f32),
    controller: &mut MotionController,
    pipeline: &mut Pipeline,
    toggles: &Toggles,
    events: &Sender<TrackerEvent>,
    shutdown: &AtomicBool,
) -> Result<()> {
    let mut start_attempts: u32 = 0;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }

        let driver = match start_capture(config) {
            Ok(driver) => driver,
            Err(err) => {
                emit(events, TrackerEvent::CaptureStartFailed(format!("{err:#}")));
                start_attempts += 1;
                if start_attempts >= MAX_START_ATTEMPTS {
                    return Err(err).context("capture failed to start repeatedly");
                }
                warn!(attempt = start_attempts, "capture start failed: {err:#}");
                thread::sleep(RESTART_BACKOFF);
                continue;
            }
        };
        start_attempts = 0;
        pipeline.driver = Some(driver);

        let outcome = {
            let Pipeline {
                driver,
                engine,
                channel,
            } = pipeline;
            run_loop(
                driver.as_ref().expect("capture driver just started"),
                engine.as_mut().expect("engine initialized at startup"),
                channel.as_mut().expect("channel opened at startup"),
                controller,
                selector_config,
                aim_point,
                toggles,
                events,
                shutdown,
            )
        };

        if let Some(mut driver) = pipeline.driver.take() {
            driver.clear_ring();
            driver.stop();
        }

        match outcome? {
            LoopOutcome::Graceful => return Ok(()),
            LoopOutcome::CaptureFault(reason) => {
                warn!("re-initializing capture: {reason}");
                metrics::counter!("servo_capture_restarts_total").increment(1);
                thread::sleep(RESTART_BACKOFF);
            }
        }
    }
}

fn start_capture(config: &AppConfig) -> Result<CaptureDriver> {
    let probe = DisplaySource::primary(screen_ingest::Region {
        left: 0,
        top: 0,
        width: 1,
        height: 1,
    })
    .context("no display to capture")?;
    let (display_width, display_height) = probe.display_size();
    let region = config.capture_region(display_width, display_height);
    let source =
        DisplaySource::primary(region).context("capture region does not fit the display")?;
    let driver = CaptureDriver::start(source, config.capture_config(region))
        .context("capture driver start failed")?;
    Ok(driver)
}

/// The per-iteration body: newest frame → inference → selection → control →
/// actuation, gated on the toggle flags.
#[allow(clippy::too_many_arguments)]
fn run_loop(
    driver: &CaptureDriver,
    engine: &mut DetectionEngine,
    channel: &mut ActuationChannel,
    controller: &mut MotionController,
    selector_config: &SelectorConfig,
    aim_point: (f32, f32),
    toggles: &Toggles,
    events: &Sender<TrackerEvent>,
    shutdown: &AtomicBool,
) -> Result<LoopOutcome> {
    let mut had_target = true;
    let mut last_missing_warn = Instant::now() - MISSING_WARN_EVERY;
    let mut last_progress = (driver.frames_published(), Instant::now());

    while !shutdown.load(Ordering::Relaxed) {
        if let Some(err) = driver.take_error() {
            error!("capture runtime error: {err}");
            emit(events, TrackerEvent::CaptureRuntimeError(err.to_string()));
            return Ok(LoopOutcome::CaptureFault(err.to_string()));
        }

        let published = driver.frames_published();
        if published != last_progress.0 {
            last_progress = (published, Instant::now());
        } else if last_progress.1.elapsed() > CAPTURE_STALE_AFTER {
            return Ok(LoopOutcome::CaptureFault("capture stalled".into()));
        }

        let tracking = toggles.tracking();
        let covert = toggles.covert();

        let Some(frame) = driver.latest() else {
            if last_missing_warn.elapsed() >= MISSING_WARN_EVERY {
                warn!("no frame available from capture ring");
                last_missing_warn = Instant::now();
            }
            thread::sleep(POLL_SLEEP);
            continue;
        };

        if !(tracking || covert) {
            controller.update(None);
            thread::sleep(IDLE_SLEEP);
            continue;
        }

        let infer_start = Instant::now();
        let detections = engine.infer(&frame).context("inference failed")?;
        metrics::histogram!("servo_infer_seconds").record(infer_start.elapsed().as_secs_f64());
        metrics::gauge!("servo_detections").set(detections.len() as f64);

        let target = select(&detections, selector_config);
        if target.is_none() && had_target {
            emit(events, TrackerEvent::NoTarget);
        }
        had_target = target.is_some();

        let engaged = toggles.engaged();
        if tracking && engaged {
            let step = controller.update(target.map(|t| {
                let (dx, dy) = t.offset_from(aim_point);
                AimOffset {
                    dx,
                    dy,
                    distance: t.distance,
                }
            }));
            if !step.is_zero() {
                send_step(channel, events, step.dx, step.dy, false)?;
            }
        } else if covert && engaged {
            // Covert regime: raw offset, covert prefix, same payload rules.
            if let Some(target) = target {
                let (dx, dy) = target.offset_from(aim_point);
                send_step(channel, events, dx, dy, true)?;
            }
            controller.update(None);
        } else {
            controller.update(None);
        }
    }

    Ok(LoopOutcome::Graceful)
}

fn send_step(
    channel: &mut ActuationChannel,
    events: &Sender<TrackerEvent>,
    dx: f32,
    dy: f32,
    covert: bool,
) -> Result<()> {
    if let Err(err) = channel.send(dx, dy, covert) {
        emit(
            events,
            TrackerEvent::SerialPortClosed(channel.device().to_string()),
        );
        return Err(err).context("actuation write failed");
    }
    metrics::counter!("servo_steps_total").increment(1);
    Ok(())
}

fn install_interrupt_handler(shutdown: Arc<AtomicBool>) {
    static HANDLER: Once = Once::new();
    HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("failed to install Ctrl+C handler: {err}");
        }
    });
}
