//! Display-region acquisition: frame types, the fixed-capacity frame ring,
//! and the timer-paced capture driver that feeds it.
//!
//! The driver owns its producer thread and publishes [`Frame`]s into a
//! [`FrameRing`] shared with a single reader. Acquisition backends implement
//! [`FrameSource`]; [`DisplaySource`] grabs the primary display.

pub mod driver;
pub mod ring;
pub mod source;
mod types;

pub use driver::{CaptureConfig, CaptureDriver, DriverState};
pub use ring::FrameRing;
pub use source::{DisplaySource, FramePixels, FrameSource};
pub use types::{CaptureError, Frame, FrameFormat, Region};
