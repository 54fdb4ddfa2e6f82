//! Tracking pipeline wiring: the orchestrator loop, shared toggle flags,
//! outward status events, and the headless operator console.

pub mod console;
pub mod controls;
pub mod pipeline;

pub use controls::{Toggles, TrackerEvent};
pub use pipeline::run;
