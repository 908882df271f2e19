//! Protocol constants and frame utilities for VPad keypad communication
//!
//! The wire protocol was reverse-engineered from USB captures of the vendor
//! software. All exchanges are 64-byte interrupt transfers; command frames
//! carry the vendor marker 0x56 in byte 0 and a command family in byte 1.

/// Size of every frame exchanged with the device, both directions.
pub const FRAME_SIZE: usize = 64;

/// Fixed-size frame buffer. Interpretation is contextual: command id in
/// bytes 0/1 for outbound frames, event signature for inbound frames.
pub type Frame = [u8; FRAME_SIZE];

/// Vendor marker byte prefixing command frames.
pub const VENDOR_MARKER: u8 = 0x56;

/// Command family bytes (byte 1 of a command frame).
pub mod cmd {
    /// Two-part mode setup during activation
    pub const MODE_SETUP: u8 = 0x42;
    /// Button reporting activation
    pub const BUTTON_ACTIVATE: u8 = 0x43;
    /// Status query (response on the event endpoint, diagnostic only)
    pub const STATUS: u8 = 0x41;
    /// Effects engine activation
    pub const EFFECTS: u8 = 0x52;
    /// LED mode select (custom per-button mode)
    pub const LED_MODE: u8 = 0x81;
    /// LED payload frame, part selected by byte 2 (0 or 1)
    pub const LED_PACKAGE: u8 = 0x83;
    /// Commit the two staged LED payload frames
    pub const LED_APPLY: u8 = 0x84;
    /// Finalize LED update, byte 2 carries the brightness/confirmation value
    pub const LED_FINALIZE: u8 = 0x51;

    /// Get human-readable name for a command family byte
    pub fn name(cmd: u8) -> &'static str {
        match cmd {
            MODE_SETUP => "MODE_SETUP",
            BUTTON_ACTIVATE => "BUTTON_ACTIVATE",
            STATUS => "STATUS",
            EFFECTS => "EFFECTS",
            LED_MODE => "LED_MODE",
            LED_PACKAGE => "LED_PACKAGE",
            LED_APPLY => "LED_APPLY",
            LED_FINALIZE => "LED_FINALIZE",
            _ => "UNKNOWN",
        }
    }
}

/// Inbound event signatures (event endpoint).
pub mod event {
    /// First four bytes of a button transition report
    pub const BUTTON_SIGNATURE: [u8; 4] = [0x43, 0x01, 0x00, 0x00];
    /// Button state code: pressed
    pub const STATE_PRESSED: u8 = 0xC0;
    /// Button state code: released
    pub const STATE_RELEASED: u8 = 0x40;
    /// First byte of a hall-sensor report (hall endpoint)
    pub const HALL_MARKER: u8 = 0x48;
    /// Length of a keyboard-compatibility boot report
    pub const BOOT_REPORT_LEN: usize = 8;
}

/// Physical button grid.
pub mod grid {
    /// Columns in the physical layout
    pub const COLS: usize = 5;
    /// Rows in the physical layout
    pub const ROWS: usize = 5;
    /// Buttons addressable by the LED protocol
    pub const BUTTONS: usize = COLS * ROWS;
}

/// LED wire layout constants.
///
/// The device stores per-button colors column-major in a virtual 75-byte
/// stream (25 positions x 3 bytes) that is split across the two payload
/// frames at a fixed boundary: one button's R byte lands at the end of
/// package1 while its G/B bytes open package2's data area.
pub mod led_layout {
    use super::grid;

    /// Virtual color stream size (25 device positions x RGB)
    pub const STREAM_SIZE: usize = grid::BUTTONS * 3;
    /// Byte offset of color data within the package1 frame
    pub const PKG1_DATA_OFFSET: usize = 24;
    /// Stream bytes carried by package1 (positions 0-12 plus R of 13)
    pub const PKG1_STREAM_BYTES: usize = super::FRAME_SIZE - PKG1_DATA_OFFSET;
    /// Byte offset of color data within the package2 frame
    pub const PKG2_DATA_OFFSET: usize = 3;
    /// Stream bytes carried by package2
    pub const PKG2_STREAM_BYTES: usize = STREAM_SIZE - PKG1_STREAM_BYTES;
}

/// Communication timing constants.
///
/// All values are empirical, calibrated against the shipped firmware. Too
/// short a settle delay makes the device ignore the next frame; the quiet
/// period avoids device-side contention between button scanning and LED
/// writes.
pub mod timing {
    /// Settle delay after each activation handshake step (ms)
    pub const HANDSHAKE_SETTLE_MS: u64 = 30;
    /// Retries per handshake step before the whole sequence is failed
    pub const HANDSHAKE_RETRIES: usize = 3;
    /// Backoff between handshake step retries (ms)
    pub const HANDSHAKE_BACKOFF_MS: u64 = 20;
    /// Timeout for the optional diagnostic read-back after a step (ms)
    pub const HANDSHAKE_READBACK_MS: u64 = 20;
    /// Settle delay after each LED frame (ms); below 9 ms updates drop
    pub const LED_FRAME_SETTLE_MS: u64 = 10;
    /// Quiet window after button activity before LED writes resume (ms)
    pub const QUIET_PERIOD_MS: u64 = 200;
    /// Protection window for mild corruption signals (ms)
    pub const PROTECT_MILD_MS: u64 = 100;
    /// Protection window for severe corruption signals (ms)
    pub const PROTECT_SEVERE_MS: u64 = 1000;
    /// Max frames sent back-to-back before yielding to the scheduler
    pub const BURST_LIMIT: u32 = 5;
    /// Sleep after a hard read error before re-arming (ms)
    pub const READER_ERROR_SLEEP_MS: u64 = 5;
    /// Zero-length completions on the event channel before a mode-switch
    /// warning is logged
    pub const ZERO_LEN_WARN_RUN: u32 = 64;
}

/// Event ingestion queue sizing.
pub mod queue {
    /// Fixed capacity of the typed event queue; overflow drops the oldest
    /// unconsumed event and increments the loss counter
    pub const EVENT_QUEUE_CAPACITY: usize = 16;
}

/// Device identification constants.
pub mod device {
    /// VPad vendor ID
    pub const VENDOR_ID: u16 = 0x0483;
    /// VPad 25-key product ID
    pub const PID_VPAD25: u16 = 0x5652;

    /// Check whether a VID/PID pair is a supported keypad
    pub fn matches(vid: u16, pid: u16) -> bool {
        vid == VENDOR_ID && pid == PID_VPAD25
    }
}

/// Build a 64-byte command frame: `[0x56] [family] [data...]` zero-padded.
///
/// `data` beyond the frame capacity is truncated.
pub fn command_frame(family: u8, data: &[u8]) -> Frame {
    let mut frame = [0u8; FRAME_SIZE];
    frame[0] = VENDOR_MARKER;
    frame[1] = family;
    let len = data.len().min(FRAME_SIZE - 2);
    frame[2..2 + len].copy_from_slice(&data[..len]);
    frame
}
