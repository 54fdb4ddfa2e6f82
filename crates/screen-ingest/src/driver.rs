//! Timer-paced capture producer.
//!
//! The driver owns the capture thread outright: a periodic tick paces the
//! grab loop, a dedicated stop event wakes it immediately, and every piece
//! of shared state (ring, state machine, error slot) lives in one owned
//! container instead of flags scattered across the process.

use std::{
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use tracing::{debug, error, warn};

use crate::{
    ring::FrameRing,
    source::FrameSource,
    types::{CaptureError, Frame, Region},
};

/// How the producer thread is paced and how it handles misses.
#[derive(Clone, Copy, Debug)]
pub struct CaptureConfig {
    pub region: Region,
    /// Grabs per second; the tick period is derived from this.
    pub target_fps: u32,
    /// Republish the previous frame when a grab returns no new content.
    pub fill_gaps: bool,
    pub ring_capacity: usize,
    /// Bound on how long `stop` waits for the thread before abandoning it.
    pub stop_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            region: Region {
                left: 0,
                top: 0,
                width: 640,
                height: 640,
            },
            target_fps: 240,
            fill_gaps: false,
            ring_capacity: 8,
            stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Capture thread lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Capturing,
    Stopping,
}

const STATE_IDLE: u8 = 0;
const STATE_CAPTURING: u8 = 1;
const STATE_STOPPING: u8 = 2;

struct DriverShared {
    ring: FrameRing,
    state: AtomicU8,
    frames_published: AtomicU64,
    gaps_filled: AtomicU64,
    ticks_skipped: AtomicU64,
    last_error: Mutex<Option<CaptureError>>,
}

impl DriverShared {
    fn set_state(&self, state: DriverState) {
        let raw = match state {
            DriverState::Idle => STATE_IDLE,
            DriverState::Capturing => STATE_CAPTURING,
            DriverState::Stopping => STATE_STOPPING,
        };
        self.state.store(raw, Ordering::SeqCst);
    }

    fn state(&self) -> DriverState {
        match self.state.load(Ordering::SeqCst) {
            STATE_CAPTURING => DriverState::Capturing,
            STATE_STOPPING => DriverState::Stopping,
            _ => DriverState::Idle,
        }
    }
}

/// Handle to the capture thread. Dropping the driver stops it.
pub struct CaptureDriver {
    shared: Arc<DriverShared>,
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    thread: Option<thread::JoinHandle<()>>,
    capture_thread_id: thread::ThreadId,
    stop_timeout: Duration,
}

impl std::fmt::Debug for CaptureDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureDriver")
            .field("state", &self.shared.state())
            .field("capture_thread_id", &self.capture_thread_id)
            .field("stop_timeout", &self.stop_timeout)
            .finish()
    }
}

impl CaptureDriver {
    /// Arm the periodic timer and start the producer thread.
    ///
    /// The first grab runs synchronously so a source that cannot deliver at
    /// all fails the start instead of dying silently on the thread.
    pub fn start<S: FrameSource>(
        mut source: S,
        config: CaptureConfig,
    ) -> Result<Self, CaptureError> {
        if config.target_fps == 0 {
            return Err(CaptureError::InvalidFrameRate);
        }

        let shared = Arc::new(DriverShared {
            ring: FrameRing::new(config.ring_capacity),
            state: AtomicU8::new(STATE_IDLE),
            frames_published: AtomicU64::new(0),
            gaps_filled: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            last_error: Mutex::new(None),
        });

        let mut sequence: u64 = 0;
        match source.grab(config.region) {
            Ok(Some(pixels)) => {
                publish(&shared, pixels, &mut sequence);
            }
            Ok(None) => {
                debug!("warmup grab returned no content; capture starts on first tick");
            }
            Err(err) => return Err(err),
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let thread_shared = shared.clone();
        let period = Duration::from_secs_f64(1.0 / f64::from(config.target_fps));

        let handle = thread::Builder::new()
            .name("capture-driver".into())
            .spawn(move || {
                capture_loop(source, config, period, thread_shared, stop_rx, sequence);
                let _ = done_tx.send(());
            })
            .map_err(|err| CaptureError::Other(err.into()))?;

        shared.set_state(DriverState::Capturing);
        let capture_thread_id = handle.thread().id();

        Ok(Self {
            shared,
            stop_tx,
            done_rx,
            thread: Some(handle),
            capture_thread_id,
            stop_timeout: config.stop_timeout,
        })
    }

    /// The single authoritative stop routine. Idempotent, and safe to call
    /// from any thread: a call made *on* the capture thread only signals the
    /// loop and never attempts to join it.
    pub fn stop(&mut self) {
        let _ = self.stop_tx.try_send(());

        if thread::current().id() == self.capture_thread_id {
            warn!("capture stop requested from the capture thread; deferring join");
            return;
        }

        let Some(handle) = self.thread.take() else {
            return;
        };
        self.shared.set_state(DriverState::Stopping);

        match self.done_rx.recv_timeout(self.stop_timeout) {
            Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    error!("capture thread panicked during shutdown");
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "capture thread did not stop in time; abandoning its handle"
                );
            }
        }
        self.shared.set_state(DriverState::Idle);
    }

    pub fn state(&self) -> DriverState {
        self.shared.state()
    }

    pub fn is_capturing(&self) -> bool {
        self.shared.state() == DriverState::Capturing
    }

    /// Newest published frame, if any. Never blocks.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.shared.ring.latest()
    }

    /// Total frames published since start (republished gaps included).
    pub fn frames_published(&self) -> u64 {
        self.shared.frames_published.load(Ordering::Relaxed)
    }

    pub fn gaps_filled(&self) -> u64 {
        self.shared.gaps_filled.load(Ordering::Relaxed)
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.shared.ticks_skipped.load(Ordering::Relaxed)
    }

    /// Take the error that stopped the capture thread, if one did. The
    /// orchestrator polls this to decide on a capture restart.
    pub fn take_error(&self) -> Option<CaptureError> {
        self.shared
            .last_error
            .lock()
            .expect("capture error slot poisoned")
            .take()
    }

    /// Release every buffered frame. Part of ordered teardown.
    pub fn clear_ring(&self) {
        self.shared.ring.clear();
    }
}

impl Drop for CaptureDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop<S: FrameSource>(
    mut source: S,
    config: CaptureConfig,
    period: Duration,
    shared: Arc<DriverShared>,
    stop_rx: Receiver<()>,
    mut sequence: u64,
) {
    let ticker = tick(period);
    debug!(
        fps = config.target_fps,
        period_us = period.as_micros() as u64,
        "capture timer armed"
    );

    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(ticker) -> msg => {
                if msg.is_err() {
                    break;
                }
                match source.grab(config.region) {
                    Ok(Some(pixels)) => {
                        publish(&shared, pixels, &mut sequence);
                    }
                    Ok(None) => {
                        if config.fill_gaps {
                            if let Some(previous) = shared.ring.latest() {
                                shared.ring.push(previous);
                                shared.frames_published.fetch_add(1, Ordering::Relaxed);
                                shared.gaps_filled.fetch_add(1, Ordering::Relaxed);
                            } else {
                                shared.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                            }
                        } else {
                            shared.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(err) => {
                        error!("capture error: {err}");
                        *shared
                            .last_error
                            .lock()
                            .expect("capture error slot poisoned") = Some(err);
                        shared.set_state(DriverState::Stopping);
                        break;
                    }
                }
            }
        }
    }

    // Disarm the periodic timer before the thread function returns.
    drop(ticker);
    shared.set_state(DriverState::Idle);
    debug!(
        frames = shared.frames_published.load(Ordering::Relaxed),
        "capture thread exited"
    );
}

fn publish(shared: &DriverShared, pixels: crate::source::FramePixels, sequence: &mut u64) {
    *sequence += 1;
    shared.ring.push(Arc::new(Frame {
        data: pixels.data,
        width: pixels.width,
        height: pixels.height,
        format: pixels.format,
        sequence: *sequence,
        timestamp_ms: current_millis(),
    }));
    shared.frames_published.fetch_add(1, Ordering::Relaxed);
}

fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FramePixels;
    use crate::types::FrameFormat;
    use anyhow::anyhow;
    use std::sync::atomic::AtomicU32;

    fn test_config(fps: u32) -> CaptureConfig {
        CaptureConfig {
            region: Region {
                left: 0,
                top: 0,
                width: 4,
                height: 4,
            },
            target_fps: fps,
            fill_gaps: false,
            ring_capacity: 4,
            stop_timeout: Duration::from_secs(2),
        }
    }

    fn pixels(region: Region) -> FramePixels {
        FramePixels {
            data: vec![0u8; (region.width * region.height * 4) as usize],
            width: region.width,
            height: region.height,
            format: FrameFormat::Rgba8,
        }
    }

    #[test]
    fn zero_fps_is_rejected() {
        let source = |region: Region| Ok(Some(pixels(region)));
        let err = CaptureDriver::start(source, test_config(0)).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidFrameRate));
    }

    #[test]
    fn failing_warmup_grab_fails_start() {
        let source = |_region: Region| -> Result<Option<FramePixels>, CaptureError> {
            Err(CaptureError::Grab(anyhow!("display gone")))
        };
        assert!(CaptureDriver::start(source, test_config(60)).is_err());
    }

    #[test]
    fn publishes_frames_and_stops_cleanly() {
        let source = |region: Region| Ok(Some(pixels(region)));
        let mut driver = CaptureDriver::start(source, test_config(500)).unwrap();
        assert!(driver.is_capturing());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while driver.frames_published() < 5 {
            assert!(
                std::time::Instant::now() < deadline,
                "driver produced no frames"
            );
            thread::sleep(Duration::from_millis(5));
        }

        let newest = driver.latest().expect("ring has frames");
        assert!(newest.sequence >= 5);

        driver.stop();
        assert_eq!(driver.state(), DriverState::Idle);
        let after = driver.frames_published();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(driver.frames_published(), after, "thread kept producing");
    }

    #[test]
    fn stop_is_idempotent() {
        let source = |region: Region| Ok(Some(pixels(region)));
        let mut driver = CaptureDriver::start(source, test_config(200)).unwrap();
        driver.stop();
        driver.stop();
        assert_eq!(driver.state(), DriverState::Idle);
    }

    #[test]
    fn fill_gaps_republishes_previous_frame() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let source = move |region: Region| {
            // First grab (the warmup) delivers, every later one misses.
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Some(pixels(region)))
            } else {
                Ok(None)
            }
        };
        let mut config = test_config(500);
        config.fill_gaps = true;
        let mut driver = CaptureDriver::start(source, config).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while driver.gaps_filled() < 3 {
            assert!(std::time::Instant::now() < deadline, "no gaps were filled");
            thread::sleep(Duration::from_millis(5));
        }
        // Republishing reuses the original frame, so the sequence stays put.
        assert_eq!(driver.latest().unwrap().sequence, 1);
        driver.stop();
    }

    #[test]
    fn misses_without_fill_gaps_skip_the_tick() {
        let source = |_region: Region| -> Result<Option<FramePixels>, CaptureError> { Ok(None) };
        let mut driver = CaptureDriver::start(source, test_config(500)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while driver.ticks_skipped() < 3 {
            assert!(std::time::Instant::now() < deadline, "no ticks observed");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(driver.latest().is_none());
        assert_eq!(driver.frames_published(), 0);
        driver.stop();
    }

    #[test]
    fn runtime_error_parks_driver_and_surfaces_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let source = move |region: Region| {
            if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                Ok(Some(pixels(region)))
            } else {
                Err(CaptureError::Grab(anyhow!("device lost")))
            }
        };
        let mut driver = CaptureDriver::start(source, test_config(500)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while driver.state() != DriverState::Idle {
            assert!(
                std::time::Instant::now() < deadline,
                "driver never observed the error"
            );
            thread::sleep(Duration::from_millis(5));
        }
        let err = driver.take_error().expect("error surfaced");
        assert!(matches!(err, CaptureError::Grab(_)));
        // A second read reports nothing; the error is consumed once.
        assert!(driver.take_error().is_none());
        driver.stop();
    }

    #[test]
    fn clear_ring_releases_frames() {
        let source = |region: Region| Ok(Some(pixels(region)));
        let mut driver = CaptureDriver::start(source, test_config(500)).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while driver.latest().is_none() {
            assert!(std::time::Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
        driver.stop();
        driver.clear_ring();
        assert!(driver.latest().is_none());
    }
}
