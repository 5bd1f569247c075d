// image.rs — packed-pixel encoding and the headless display hand-off.
//
// The image kernel turns the float accumulation buffer into one `i32` per
// pixel, laid out as 0x00RRGGBB:
//
//   bit  31      24 23      16 15       8 7        0
//        ┌─────────┬──────────┬──────────┬─────────┐
//        │  0x00   │   red    │  green   │  blue   │
//        └─────────┴──────────┴──────────┴─────────┘
//
// Each channel is clamped to [0, 1], scaled to 255 and rounded to nearest.
// The same encoding is implemented in `shaders/image.wgsl`; the two must
// agree bit for bit.
//
// `Frame` wraps one packed result for a display collaborator. The CLI uses
// it to write PNGs through the `image` crate.

use std::path::Path;

use glam::Vec3;

use crate::error::{RaysError, RaysResult};

/// Quantise one linear channel value to 8 bits.
#[inline]
pub fn quantize(v: f32) -> u32 {
    // NaN clamps to 0.
    let v = if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
    (v * 255.0 + 0.5) as u32
}

/// Pack an RGB colour as `0x00RRGGBB`.
#[inline]
pub fn pack_rgb(col: Vec3) -> i32 {
    ((quantize(col.x) << 16) | (quantize(col.y) << 8) | quantize(col.z)) as i32
}

/// Inverse of `pack_rgb` up to quantisation.
#[inline]
pub fn unpack_rgb(px: i32) -> [u8; 3] {
    let px = px as u32;
    [(px >> 16) as u8, (px >> 8) as u8, px as u8]
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One rendered frame of packed pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<i32>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<i32>) -> RaysResult<Self> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(RaysError::dimensions(format!(
                "frame {width}×{height} needs {expected} pixels, got {}",
                pixels.len()
            )));
        }
        Ok(Frame { width, height, pixels })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[i32] {
        &self.pixels
    }

    /// Unpacked `[r, g, b]` at `(x, y)`, or `None` outside the frame.
    pub fn get(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = y as usize * self.width as usize + x as usize;
        self.pixels.get(index).map(|&px| unpack_rgb(px))
    }

    pub fn to_rgb8(&self) -> ::image::RgbImage {
        ::image::RgbImage::from_fn(self.width, self.height, |x, y| {
            ::image::Rgb(self.get(x, y).unwrap_or_default())
        })
    }

    pub fn save_png(&self, path: &Path) -> RaysResult<()> {
        self.to_rgb8()
            .save_with_format(path, ::image::ImageFormat::Png)?;
        tracing::info!(path = %path.display(), width = self.width, height = self.height, "wrote frame");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_known_colours() {
        assert_eq!(pack_rgb(Vec3::ZERO), 0);
        assert_eq!(pack_rgb(Vec3::ONE), 0x00FF_FFFF);
        assert_eq!(pack_rgb(Vec3::new(1.0, 0.0, 0.0)), 0x00FF_0000);
        // 0.25 * 255 + 0.5 = 64.25, 0.5 → 128, 0.75 → 191.75
        assert_eq!(pack_rgb(Vec3::new(0.25, 0.5, 0.75)), (64 << 16) | (128 << 8) | 191);
    }

    #[test]
    fn pack_clamps_out_of_range() {
        assert_eq!(pack_rgb(Vec3::new(2.0, -1.0, f32::NAN)), 0x00FF_0000);
    }

    #[test]
    fn unpack_matches_channels() {
        assert_eq!(unpack_rgb(0x0012_3456), [0x12, 0x34, 0x56]);
    }

    #[test]
    fn frame_rejects_wrong_length() {
        assert!(Frame::new(2, 2, vec![0; 3]).is_err());
        let f = Frame::new(2, 1, vec![0x00FF_0000, 0x0000_00FF]).unwrap();
        assert_eq!(f.get(1, 0), Some([0, 0, 255]));
        let rgb = f.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 0, 0]);
    }

    #[test]
    fn get_outside_frame_is_none() {
        let f = Frame::new(2, 1, vec![0x00FF_0000, 0x0000_00FF]).unwrap();
        assert_eq!(f.get(2, 0), None);
        assert_eq!(f.get(0, 1), None);
        // y * width would wrap in u32 arithmetic.
        assert_eq!(f.get(0, u32::MAX), None);
        assert_eq!(f.get(u32::MAX, u32::MAX), None);
    }
}
