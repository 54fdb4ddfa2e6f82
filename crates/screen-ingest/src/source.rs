//! Frame acquisition seam.
//!
//! The capture driver only ever talks to a [`FrameSource`]; the production
//! backend grabs the primary display through `xcap` and crops the configured
//! region host-side. Tests substitute deterministic sources.

use anyhow::anyhow;

use crate::types::{CaptureError, FrameFormat, Region};

/// Pixels returned by a single grab, before the driver stamps sequence and
/// timestamp onto them.
pub struct FramePixels {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
}

/// One-shot region grabber driven by the capture timer.
pub trait FrameSource: Send + 'static {
    /// Grab the region once. `Ok(None)` marks a transient miss (no new
    /// desktop content, occluded output); the driver decides whether to
    /// republish or skip. `Err` stops the driver.
    fn grab(&mut self, region: Region) -> Result<Option<FramePixels>, CaptureError>;
}

impl<F> FrameSource for F
where
    F: FnMut(Region) -> Result<Option<FramePixels>, CaptureError> + Send + 'static,
{
    fn grab(&mut self, region: Region) -> Result<Option<FramePixels>, CaptureError> {
        self(region)
    }
}

/// Primary-display capture backend.
pub struct DisplaySource {
    monitor: xcap::Monitor,
}

impl DisplaySource {
    /// Bind to the primary display (or the first one reported when none is
    /// marked primary) and validate that `region` fits inside it.
    pub fn primary(region: Region) -> Result<Self, CaptureError> {
        let monitors = xcap::Monitor::all().map_err(|err| CaptureError::Other(anyhow!(err)))?;
        let preferred = monitors.iter().position(|m| m.is_primary()).unwrap_or(0);
        let monitor = monitors
            .into_iter()
            .nth(preferred)
            .ok_or(CaptureError::NoDisplay)?;

        let (width, height) = (monitor.width(), monitor.height());
        if region.right() > width || region.bottom() > height {
            return Err(CaptureError::RegionOutOfBounds {
                region,
                width,
                height,
            });
        }
        Ok(Self { monitor })
    }

    /// Size of the bound display.
    pub fn display_size(&self) -> (u32, u32) {
        (self.monitor.width(), self.monitor.height())
    }
}

impl FrameSource for DisplaySource {
    fn grab(&mut self, region: Region) -> Result<Option<FramePixels>, CaptureError> {
        let image = self
            .monitor
            .capture_image()
            .map_err(|err| CaptureError::Grab(anyhow!(err)))?;
        let (full_width, full_height) = (image.width(), image.height());
        if region.right() > full_width || region.bottom() > full_height {
            return Err(CaptureError::RegionOutOfBounds {
                region,
                width: full_width,
                height: full_height,
            });
        }

        let raw = image.into_raw();
        Ok(Some(crop_rgba(&raw, full_width, region)))
    }
}

/// Copy the region's rows out of a full-display RGBA buffer.
fn crop_rgba(raw: &[u8], full_width: u32, region: Region) -> FramePixels {
    let bpp = FrameFormat::Rgba8.bytes_per_pixel();
    let row_len = region.width as usize * bpp;
    let mut data = Vec::with_capacity(row_len * region.height as usize);
    for row in region.top..region.bottom() {
        let start = (row as usize * full_width as usize + region.left as usize) * bpp;
        data.extend_from_slice(&raw[start..start + row_len]);
    }
    FramePixels {
        data,
        width: region.width,
        height: region.height,
        format: FrameFormat::Rgba8,
    }
}
