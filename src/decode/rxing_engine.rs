use super::DecodeEngine;
use crate::decode::enhance::luma;
use crate::errors::ScannerError;
use crate::types::VideoFrame;
use rxing::Exceptions;

/// Multi-format decoding (EAN/UPC, Code 128, Code 39, ITF, QR, Data Matrix...)
/// through rxing.
///
/// "Nothing found" is `Ok(None)`. A symbol that was located but failed its
/// checksum or format checks is a hard decode error.
#[derive(Debug, Default, Clone, Copy)]
pub struct RxingEngine;

impl RxingEngine {
    pub fn new() -> Self {
        Self
    }
}

impl DecodeEngine for RxingEngine {
    fn name(&self) -> &str {
        "rxing"
    }

    fn decode(&self, frame: &VideoFrame) -> Result<Option<String>, ScannerError> {
        if !frame.is_valid() {
            return Ok(None);
        }
        let gray: Vec<u8> = frame
            .data
            .chunks_exact(3)
            .map(|px| luma(px[0], px[1], px[2]))
            .collect();

        match rxing::helpers::detect_in_luma(gray, frame.width, frame.height, None) {
            Ok(result) => {
                let text = result.getText().trim();
                if text.is_empty() {
                    Ok(None)
                } else {
                    log::trace!("rxing read {:?} {}", result.getBarcodeFormat(), text);
                    Ok(Some(text.to_string()))
                }
            }
            Err(Exceptions::NotFoundException(_)) => Ok(None),
            Err(e) => Err(ScannerError::Decode(format!("symbol found but unreadable: {e}"))),
        }
    }
}
