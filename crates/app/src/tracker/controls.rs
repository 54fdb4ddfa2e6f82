//! Toggle flags and outward status events.
//!
//! The flags are single-writer/single-reader booleans flipped by external
//! input listeners (or the operator console) and read once per orchestrator
//! iteration; plain atomics, no locking.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::Sender;
use tracing::debug;

/// Lock-free toggle state shared between listeners and the orchestrator.
#[derive(Debug, Default)]
pub struct Toggles {
    /// Master switch for the tracking pipeline.
    tracking: AtomicBool,
    /// Held-engage: actuation commands are only emitted while set.
    engaged: AtomicBool,
    /// Covert mode: wire prefix changes, payload semantics do not.
    covert: AtomicBool,
}

impl Toggles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracking(&self) -> bool {
        self.tracking.load(Ordering::Relaxed)
    }

    pub fn engaged(&self) -> bool {
        self.engaged.load(Ordering::Relaxed)
    }

    pub fn covert(&self) -> bool {
        self.covert.load(Ordering::Relaxed)
    }

    /// Flip the tracking switch and return the new value.
    pub fn toggle_tracking(&self) -> bool {
        !self.tracking.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn set_engaged(&self, engaged: bool) {
        self.engaged.store(engaged, Ordering::Relaxed);
    }

    pub fn toggle_engaged(&self) -> bool {
        !self.engaged.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn toggle_covert(&self) -> bool {
        !self.covert.fetch_xor(true, Ordering::Relaxed)
    }
}

/// Status surfaced to external consumers (GUI, logs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    CaptureStartFailed(String),
    CaptureRuntimeError(String),
    EngineLoadFailed(String),
    SerialPortClosed(String),
    NoTarget,
    TrackingToggled(bool),
}

/// Fire-and-forget event emission; a slow or absent consumer must never
/// stall the control loop.
pub fn emit(events: &Sender<TrackerEvent>, event: TrackerEvent) {
    if events.try_send(event.clone()).is_err() {
        debug!(?event, "event channel full or disconnected; dropping");
    }
}
