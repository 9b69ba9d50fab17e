//! Synthetic frames for offline testing
//!
//! Most session tests script the decode engine, so a moving gradient is
//! enough. [`synthetic_ean13_frame`] draws a real EAN-13 symbol for the
//! engines themselves.

use crate::types::VideoFrame;

/// Gradient RGB frame that shifts with `frame_number`.
pub fn synthetic_video_frame(frame_number: u64, width: u32, height: u32) -> VideoFrame {
    let mut data = vec![0u8; (width * height * 3) as usize];

    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }

    VideoFrame::new(data, width, height, "synthetic")
}

/// Striped frame resembling a 1-D barcode: alternating dark and light bars.
pub fn synthetic_barcode_frame(width: u32, height: u32, bar_width: u32) -> VideoFrame {
    let bar = bar_width.max(1);
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for _y in 0..height {
        for x in 0..width {
            let v = if (x / bar) % 2 == 0 { 40 } else { 210 };
            data.extend_from_slice(&[v, v, v]);
        }
    }
    VideoFrame::new(data, width, height, "synthetic")
}

const EAN_L: [&str; 10] = [
    "0001101", "0011001", "0010011", "0111101", "0100011",
    "0110001", "0101111", "0111011", "0110111", "0001011",
];
const EAN_G: [&str; 10] = [
    "0100111", "0110011", "0011011", "0100001", "0011101",
    "0111001", "0000101", "0010001", "0001001", "0010111",
];
const EAN_R: [&str; 10] = [
    "1110010", "1100110", "1101100", "1000010", "1011100",
    "1001110", "1010000", "1000100", "1001000", "1110100",
];
/// Left-half parity per leading digit; `G` digits use the even code set.
const EAN_PARITY: [&str; 10] = [
    "LLLLLL", "LLGLGG", "LLGGLG", "LLGGGL", "LGLLGG",
    "LGGLLG", "LGGGLL", "LGLGLG", "LGLGGL", "LGGLGL",
];
const QUIET_MODULES: usize = 11;

/// EAN-13 check digit for the first twelve digits.
pub fn ean13_check_digit(digits: &[u8; 12]) -> u8 {
    let sum: u32 = digits
        .iter()
        .enumerate()
        .map(|(i, d)| *d as u32 * if i % 2 == 0 { 1 } else { 3 })
        .sum();
    ((10 - sum % 10) % 10) as u8
}

/// Printed EAN-13 symbol, `module_px` pixels per module, with quiet zones.
/// `None` unless `code` is 13 digits with a valid check digit.
pub fn synthetic_ean13_frame(code: &str, module_px: u32, height: u32) -> Option<VideoFrame> {
    let digits: Vec<u8> = code
        .chars()
        .map(|c| c.to_digit(10).map(|d| d as u8))
        .collect::<Option<_>>()?;
    let head: [u8; 12] = digits.get(..12)?.try_into().ok()?;
    if digits.len() != 13 || ean13_check_digit(&head) != digits[12] {
        return None;
    }

    let parity = EAN_PARITY[digits[0] as usize].as_bytes();
    let mut modules = "0".repeat(QUIET_MODULES) + "101";
    for (i, d) in digits[1..7].iter().enumerate() {
        let table = if parity[i] == b'G' { &EAN_G } else { &EAN_L };
        modules.push_str(table[*d as usize]);
    }
    modules.push_str("01010");
    for d in &digits[7..] {
        modules.push_str(EAN_R[*d as usize]);
    }
    modules.push_str("101");
    modules.push_str(&"0".repeat(QUIET_MODULES));

    let module_px = module_px.max(1);
    let width = modules.len() as u32 * module_px;
    let row: Vec<u8> = modules
        .bytes()
        .flat_map(|m| {
            let v = if m == b'1' { 30 } else { 225 };
            std::iter::repeat([v, v, v]).take(module_px as usize).flatten()
        })
        .collect();
    let data = row.repeat(height as usize);
    Some(VideoFrame::new(data, width, height, "synthetic"))
}
