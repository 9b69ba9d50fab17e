use super::DecodeEngine;
use crate::decode::enhance::luma;
use crate::errors::ScannerError;
use crate::types::VideoFrame;

/// QR decoding on top of rqrr.
///
/// Detection failures are "nothing in view" and return `Ok(None)`; a grid
/// that was found but failed to decode counts as a hard decode error.
#[derive(Debug, Default, Clone, Copy)]
pub struct RqrrEngine;

impl RqrrEngine {
    pub fn new() -> Self {
        Self
    }
}

impl DecodeEngine for RqrrEngine {
    fn name(&self) -> &str {
        "rqrr"
    }

    fn decode(&self, frame: &VideoFrame) -> Result<Option<String>, ScannerError> {
        if !frame.is_valid() {
            return Ok(None);
        }
        let width = frame.width as usize;
        let data = &frame.data;
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            frame.width as usize,
            frame.height as usize,
            |x, y| {
                let i = (y * width + x) * 3;
                luma(data[i], data[i + 1], data[i + 2])
            },
        );

        let grids = prepared.detect_grids();
        let mut last_error = None;
        for grid in grids {
            match grid.decode() {
                Ok((_meta, content)) if !content.is_empty() => return Ok(Some(content)),
                Ok(_) => {}
                Err(e) => last_error = Some(e),
            }
        }

        match last_error {
            Some(e) => Err(ScannerError::Decode(format!("QR grid found but unreadable: {e}"))),
            None => Ok(None),
        }
    }
}
