//! Application wiring for the tracking pipeline: CLI, configuration,
//! telemetry bootstrap, and the orchestrator.

pub mod cli;
pub mod config;
pub mod telemetry;
pub mod tracker;
