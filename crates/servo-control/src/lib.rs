//! Closed-loop motion control and the serial actuation channel.
//!
//! [`MotionController`] converts aim-point offsets into bounded actuation
//! deltas (capped proportional step far out, PID close in);
//! [`ActuationChannel`] encodes the deltas onto the wire.

pub mod channel;
pub mod controller;
pub mod pid;

pub use channel::{encode_step, usb_ports, ActuationChannel, ChannelConfig, ChannelError, PortInfo};
pub use controller::{AimOffset, ControlConfig, MotionController, StepDelta};
pub use pid::{AxisPid, PidGains};
