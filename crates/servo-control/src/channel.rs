//! Serial actuation channel.
//!
//! Deltas are rounded to integers and written as one ASCII command,
//! `"{prefix}{dx}:{dy}"`, with no terminator; the device parses on the
//! prefix and colon. Covert mode swaps the prefix, never the payload. A
//! write that fails because the port went away gets exactly one
//! reopen-and-retry before the error propagates.

use std::{io::Write, time::Duration};

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to open serial device {device}")]
    Open {
        device: String,
        #[source]
        source: serialport::Error,
    },
    #[error("write to serial device {device} failed after reopen")]
    Write {
        device: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to enumerate serial ports")]
    Enumerate(#[source] serialport::Error),
}

/// Serial link settings plus the covert-mode prefix literal.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub device: String,
    pub baud_rate: u32,
    pub covert_prefix: String,
    pub timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            baud_rate: 115_200,
            covert_prefix: "silent".to_string(),
            timeout: Duration::from_millis(100),
        }
    }
}

/// Encode one actuation delta as its wire command. Components are rounded
/// to the nearest integer and formatted as signed decimals.
pub fn encode_step(dx: f32, dy: f32, prefix: &str) -> String {
    format!("{prefix}{}:{}", dx.round() as i64, dy.round() as i64)
}

/// Owns the serial connection to the actuation device.
pub struct ActuationChannel {
    config: ChannelConfig,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl ActuationChannel {
    /// Open the configured device eagerly so a dead link fails startup.
    pub fn open(config: ChannelConfig) -> Result<Self, ChannelError> {
        let mut channel = Self { config, port: None };
        channel.reopen()?;
        Ok(channel)
    }

    /// A channel with no connection yet; the first send opens it.
    pub fn detached(config: ChannelConfig) -> Self {
        Self { config, port: None }
    }

    pub fn device(&self) -> &str {
        &self.config.device
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Encode and write one delta. On a closed or failed port the channel
    /// reopens once and retries the write before giving up.
    pub fn send(&mut self, dx: f32, dy: f32, covert: bool) -> Result<(), ChannelError> {
        let prefix = if covert { self.config.covert_prefix.as_str() } else { "" };
        let command = encode_step(dx, dy, prefix);

        let mut reopened = false;
        if self.port.is_none() {
            self.reopen()?;
            reopened = true;
        }

        loop {
            match self.write_command(command.as_bytes()) {
                Ok(()) => return Ok(()),
                Err(err) if !reopened => {
                    warn!(
                        device = %self.config.device,
                        "serial write failed ({err}); reopening once"
                    );
                    self.port = None;
                    self.reopen()?;
                    reopened = true;
                }
                Err(err) => {
                    self.port = None;
                    return Err(ChannelError::Write {
                        device: self.config.device.clone(),
                        source: err,
                    });
                }
            }
        }
    }

    /// Drop the connection. Idempotent; a later send reopens.
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(device = %self.config.device, "serial channel closed");
        }
    }

    fn write_command(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))?;
        port.write_all(bytes)?;
        // Flush-on-write: the device acts on whole commands, not buffers.
        port.flush()
    }

    fn reopen(&mut self) -> Result<(), ChannelError> {
        let port = serialport::new(&self.config.device, self.config.baud_rate)
            .timeout(self.config.timeout)
            .open()
            .map_err(|source| ChannelError::Open {
                device: self.config.device.clone(),
                source,
            })?;
        debug!(device = %self.config.device, baud = self.config.baud_rate, "serial port open");
        self.port = Some(port);
        Ok(())
    }
}

impl Drop for ActuationChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// One enumerated serial device.
#[derive(Clone, Debug)]
pub struct PortInfo {
    pub device: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
}

/// List serial devices that look like USB adapters, the kind the actuation
/// hardware shows up as.
pub fn usb_ports() -> Result<Vec<PortInfo>, ChannelError> {
    let ports = serialport::available_ports().map_err(ChannelError::Enumerate)?;
    Ok(ports
        .into_iter()
        .filter_map(|port| match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => Some(PortInfo {
                device: port.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                serial_number: usb.serial_number,
            }),
            _ => None,
        })
        .collect())
}
