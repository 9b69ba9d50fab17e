//! Contrast enhancement for the snapshot strategy
//!
//! 1-D symbologies decode better when bar edges are pushed apart: convert to
//! luma, then darken everything below the pivot and brighten everything above.

use crate::types::VideoFrame;
use image::{GrayImage, Luma, RgbImage};

/// Grayscale plus contrast stretch parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContrastStretch {
    pub midpoint: u8,
    pub delta: u8,
}

impl Default for ContrastStretch {
    fn default() -> Self {
        Self {
            midpoint: 128,
            delta: 30,
        }
    }
}

impl ContrastStretch {
    pub fn new(midpoint: u8, delta: u8) -> Self {
        Self { midpoint, delta }
    }

    /// Stretch a single luma value.
    #[inline]
    pub fn apply(&self, gray: u8) -> u8 {
        if gray < self.midpoint {
            gray.saturating_sub(self.delta)
        } else {
            gray.saturating_add(self.delta)
        }
    }

    /// Enhanced grayscale copy of `frame`, or `None` if the frame is malformed.
    pub fn enhance(&self, frame: &VideoFrame) -> Option<GrayImage> {
        if !frame.is_valid() {
            return None;
        }
        let rgb = RgbImage::from_raw(frame.width, frame.height, frame.data.clone())?;
        let mut gray = GrayImage::new(frame.width, frame.height);
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            gray.put_pixel(x, y, Luma([self.apply(luma(r, g, b))]));
        }
        Some(gray)
    }

    /// Enhanced frame re-expanded to RGB so any engine can consume it.
    pub fn enhance_frame(&self, frame: &VideoFrame) -> Option<VideoFrame> {
        let gray = self.enhance(frame)?;
        let data = gray.pixels().flat_map(|p| [p.0[0]; 3]).collect();
        Some(VideoFrame::new(data, frame.width, frame.height, frame.device_id.clone()))
    }
}

/// ITU-R BT.601 luma, rounded.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stretch_pivot() {
        let s = ContrastStretch::default();
        assert_eq!(s.apply(0), 0);
        assert_eq!(s.apply(20), 0);
        assert_eq!(s.apply(100), 70);
        assert_eq!(s.apply(127), 97);
        assert_eq!(s.apply(128), 158);
        assert_eq!(s.apply(240), 255);
    }

    #[test]
    fn test_luma_weights() {
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(0, 0, 0), 0);
        assert_eq!(luma(255, 0, 0), 76);
        assert_eq!(luma(0, 255, 0), 150);
        assert_eq!(luma(0, 0, 255), 29);
    }

    #[test]
    fn test_enhance_widens_gap() {
        // Two columns: dark gray and light gray
        let frame = VideoFrame::new(vec![100, 100, 100, 160, 160, 160], 2, 1, "0");
        let gray = ContrastStretch::default().enhance(&frame).unwrap();
        assert_eq!(gray.get_pixel(0, 0).0[0], 70);
        assert_eq!(gray.get_pixel(1, 0).0[0], 190);
    }

    #[test]
    fn test_enhance_rejects_malformed_frame() {
        let frame = VideoFrame::new(vec![0; 5], 2, 1, "0");
        assert!(ContrastStretch::default().enhance(&frame).is_none());
    }

    #[test]
    fn test_enhance_frame_keeps_shape() {
        let frame = VideoFrame::new(vec![10; 4 * 3 * 3], 4, 3, "cam");
        let out = ContrastStretch::default().enhance_frame(&frame).unwrap();
        assert!(out.is_valid());
        assert_eq!(out.device_id, "cam");
        assert!(out.data.iter().all(|&v| v == 0));
    }
}
