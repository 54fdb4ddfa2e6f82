//! Host-side frame preprocessing.
//!
//! Converts a captured BGRA/RGBA frame into the network's expected input:
//! RGB channel order, [0, 1] floats, CHW layout. Writes into a caller-owned
//! array so the input staging buffer is allocated once and reused.

use anyhow::{bail, Context, Result};
use ndarray::Array4;
use screen_ingest::{Frame, FrameFormat};

/// Fill `out` (shape `[1, 3, height, width]`) from `frame`.
pub fn frame_to_chw(frame: &Frame, out: &mut Array4<f32>) -> Result<()> {
    let (_, channels, height, width) = out.dim();
    if channels != 3 {
        bail!("input tensor expects {channels} channels, preprocessing produces 3");
    }
    if (frame.width as usize, frame.height as usize) != (width, height) {
        bail!(
            "frame size {}x{} does not match network input {width}x{height}",
            frame.width,
            frame.height
        );
    }
    let bpp = frame.format.bytes_per_pixel();
    let expected = width * height * bpp;
    if frame.data.len() != expected {
        bail!(
            "frame buffer holds {} bytes, expected {expected}",
            frame.data.len()
        );
    }

    // Channel offsets of (r, g, b) within one packed pixel.
    let (r_off, g_off, b_off) = match frame.format {
        FrameFormat::Bgra8 => (2usize, 1usize, 0usize),
        FrameFormat::Rgba8 => (0usize, 1usize, 2usize),
    };

    let plane = width * height;
    let out = out
        .as_slice_mut()
        .context("input staging array is not contiguous")?;
    for (pixel, chunk) in frame.data.chunks_exact(bpp).enumerate() {
        out[pixel] = f32::from(chunk[r_off]) / 255.0;
        out[plane + pixel] = f32::from(chunk[g_off]) / 255.0;
        out[2 * plane + pixel] = f32::from(chunk[b_off]) / 255.0;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(format: FrameFormat, width: u32, height: u32, data: Vec<u8>) -> Frame {
        Frame {
            data,
            width,
            height,
            format,
            sequence: 1,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn bgra_reorders_to_rgb_planes() {
        // Two pixels: pure blue then pure red, full alpha.
        let data = vec![255, 0, 0, 255, 0, 0, 255, 255];
        let frame = frame(FrameFormat::Bgra8, 2, 1, data);
        let mut out = Array4::<f32>::zeros((1, 3, 1, 2));
        frame_to_chw(&frame, &mut out).unwrap();

        let buf = out.as_slice().unwrap();
        // R plane: [0, 1], G plane: [0, 0], B plane: [1, 0].
        assert_eq!(&buf[0..2], &[0.0, 1.0]);
        assert_eq!(&buf[2..4], &[0.0, 0.0]);
        assert_eq!(&buf[4..6], &[1.0, 0.0]);
    }

    #[test]
    fn rgba_keeps_channel_order() {
        let data = vec![255, 128, 0, 255];
        let frame = frame(FrameFormat::Rgba8, 1, 1, data);
        let mut out = Array4::<f32>::zeros((1, 3, 1, 1));
        frame_to_chw(&frame, &mut out).unwrap();

        let buf = out.as_slice().unwrap();
        assert_eq!(buf[0], 1.0);
        assert!((buf[1] - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(buf[2], 0.0);
    }

    #[test]
    fn normalization_spans_unit_interval() {
        let data = vec![0, 0, 0, 255, 255, 255, 255, 255];
        let frame = frame(FrameFormat::Rgba8, 2, 1, data);
        let mut out = Array4::<f32>::zeros((1, 3, 1, 2));
        frame_to_chw(&frame, &mut out).unwrap();
        let buf = out.as_slice().unwrap();
        assert!(buf.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(buf[0], 0.0);
        assert_eq!(buf[1], 1.0);
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let frame = frame(FrameFormat::Bgra8, 4, 4, vec![0; 4 * 4 * 4]);
        let mut out = Array4::<f32>::zeros((1, 3, 2, 2));
        assert!(frame_to_chw(&frame, &mut out).is_err());
    }

    #[test]
    fn reused_buffer_is_fully_overwritten() {
        let mut out = Array4::<f32>::from_elem((1, 3, 1, 2), 9.0);
        let frame = frame(FrameFormat::Rgba8, 2, 1, vec![10, 20, 30, 255, 40, 50, 60, 255]);
        frame_to_chw(&frame, &mut out).unwrap();
        assert!(out.as_slice().unwrap().iter().all(|v| *v < 1.0));
    }
}
