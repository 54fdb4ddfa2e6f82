use anyhow::Error;
use thiserror::Error;

/// Rectangular capture region in display pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Region of `width`×`height` centered on a display of the given size.
    pub fn centered(display_width: u32, display_height: u32, width: u32, height: u32) -> Self {
        Self {
            left: display_width.saturating_sub(width) / 2,
            top: display_height.saturating_sub(height) / 2,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.top + self.height
    }

    /// Geometric center of the region, in region-local coordinates.
    pub fn aim_point(&self) -> (f32, f32) {
        (self.width as f32 / 2.0, self.height as f32 / 2.0)
    }
}

/// Raw pixel frame grabbed from the display.
///
/// Frames are immutable once published into the ring: the ring hands out
/// `Arc<Frame>` clones and replaces whole slots on eviction.
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    /// Monotonic per-driver sequence number.
    pub sequence: u64,
    pub timestamp_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgra8,
    Rgba8,
}

impl FrameFormat {
    pub fn bytes_per_pixel(self) -> usize {
        4
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no display available for capture")]
    NoDisplay,
    #[error("capture region {region:?} exceeds display bounds {width}x{height}")]
    RegionOutOfBounds {
        region: Region,
        width: u32,
        height: u32,
    },
    #[error("capture frame rate must be at least 1")]
    InvalidFrameRate,
    #[error("failed to grab display region")]
    Grab(#[source] Error),
    #[error(transparent)]
    Other(#[from] Error),
}
