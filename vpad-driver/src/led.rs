//! LED frame encoding
//!
//! The encoder is a pure function from a logical per-button color array to
//! the device's five-frame wire sequence. The device stores LED values
//! column-major internally while buttons are numbered row-major across the
//! physical grid, so every color goes through the index transpose before
//! being laid into the virtual byte stream.

use serde::{Deserialize, Serialize};

use vpad_transport::protocol::{self, cmd, grid, led_layout, Frame};

use crate::error::DriverError;

/// RGB color value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Create a new RGB color
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Black (LED off)
    pub const BLACK: Self = Self { r: 0, g: 0, b: 0 };
    /// Red
    pub const RED: Self = Self { r: 255, g: 0, b: 0 };
    /// Green
    pub const GREEN: Self = Self { r: 0, g: 255, b: 0 };
    /// Blue
    pub const BLUE: Self = Self { r: 0, g: 0, b: 255 };
}

/// Byte 2 of the mode-select frame: custom per-button LED mode
const LED_MODE_CUSTOM: u8 = 0x02;
/// Byte 3 of package1: control flag observed constant in all captures
const PKG_CONTROL_FLAG: u8 = 0x01;
/// Brightness byte used in package1 and the finalize frame
const FULL_BRIGHTNESS: u8 = 0xFF;

/// Map a 0-based logical button index to the device's column-major position.
///
/// `col = i / 5`, `row = i % 5`, position `row * 5 + col`. On the 5x5 grid
/// this transpose is its own inverse.
pub fn device_position(index: usize) -> usize {
    let col = index / grid::COLS;
    let row = index % grid::COLS;
    row * grid::COLS + col
}

/// The five fixed-role frames of one LED update, to be sent strictly in
/// declaration order with a settle delay after each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedSequence {
    pub mode_select: Frame,
    pub package1: Frame,
    pub package2: Frame,
    pub apply: Frame,
    pub finalize: Frame,
}

impl LedSequence {
    /// Frames in wire order, labelled for logging.
    pub fn frames(&self) -> [(&'static str, &Frame); 5] {
        [
            ("mode_select", &self.mode_select),
            ("package1", &self.package1),
            ("package2", &self.package2),
            ("apply", &self.apply),
            ("finalize", &self.finalize),
        ]
    }
}

/// Fixed mode-select frame: selects custom LED mode, payload constant
/// regardless of colors.
pub fn mode_select_frame() -> Frame {
    protocol::command_frame(cmd::LED_MODE, &[LED_MODE_CUSTOM])
}

/// Fixed apply frame: two-byte command, zero payload; commits the staged
/// package frames.
pub fn apply_frame() -> Frame {
    protocol::command_frame(cmd::LED_APPLY, &[])
}

/// Finalize frame carrying the brightness/confirmation byte.
pub fn finalize_frame(brightness: u8) -> Frame {
    protocol::command_frame(cmd::LED_FINALIZE, &[brightness])
}

/// Encode a logical color array (24 or 25 entries, button order) into the
/// five-frame wire sequence. With 24 entries the last device position is
/// encoded black.
pub fn encode(colors: &[Rgb]) -> Result<LedSequence, DriverError> {
    if colors.len() != grid::BUTTONS && colors.len() != grid::BUTTONS - 1 {
        return Err(DriverError::InvalidParameter(format!(
            "expected {} or {} colors, got {}",
            grid::BUTTONS - 1,
            grid::BUTTONS,
            colors.len()
        )));
    }

    // Virtual column-major stream: 3 bytes per device position
    let mut stream = [0u8; led_layout::STREAM_SIZE];
    for (index, color) in colors.iter().enumerate() {
        let base = device_position(index) * 3;
        stream[base] = color.r;
        stream[base + 1] = color.g;
        stream[base + 2] = color.b;
    }

    let mut package1 =
        protocol::command_frame(cmd::LED_PACKAGE, &[0x00, PKG_CONTROL_FLAG, FULL_BRIGHTNESS]);
    package1[led_layout::PKG1_DATA_OFFSET..]
        .copy_from_slice(&stream[..led_layout::PKG1_STREAM_BYTES]);

    let mut package2 = protocol::command_frame(cmd::LED_PACKAGE, &[0x01]);
    package2[led_layout::PKG2_DATA_OFFSET..led_layout::PKG2_DATA_OFFSET + led_layout::PKG2_STREAM_BYTES]
        .copy_from_slice(&stream[led_layout::PKG1_STREAM_BYTES..]);

    Ok(LedSequence {
        mode_select: mode_select_frame(),
        package1,
        package2,
        apply: apply_frame(),
        finalize: finalize_frame(FULL_BRIGHTNESS),
    })
}
