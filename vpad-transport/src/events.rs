//! Event ingestion: frame classification, the bounded event queue, and the
//! standing reader loops
//!
//! Each inbound endpoint gets one standing read that is re-armed after every
//! completion, whatever its outcome, so a transient error can never
//! permanently silence the channel. Decoded events go into a fixed-capacity
//! queue that drops the oldest entry on overflow and counts the loss; the
//! reader never blocks on a slow consumer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::protocol::{event, grid, queue, timing};
use crate::session::TransportSession;

/// A decoded inbound report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PadEvent {
    /// Button transition
    Button { index: u8, pressed: bool },
    /// Hall-sensor reading
    Hall { sensor: u8, raw: u16 },
    /// Keyboard-compatibility boot report (device's fallback reporting mode)
    BootReport { modifiers: u8, keys: [u8; 6] },
}

/// Classify a frame from the event endpoint.
///
/// Button transitions carry the fixed six-byte signature
/// `[0x43, 0x01, 0x00, 0x00, id, state]` with state 0xC0 (press) or
/// 0x40 (release). An 8-byte frame without that signature is the device's
/// keyboard-compatibility boot report. Anything else is logged and dropped.
pub fn classify_event_frame(data: &[u8]) -> Option<PadEvent> {
    if data.len() >= 6 && data[..4] == event::BUTTON_SIGNATURE {
        let index = data[4];
        if index as usize >= grid::BUTTONS {
            debug!(index, "button id out of range, dropping");
            return None;
        }
        let pressed = match data[5] {
            event::STATE_PRESSED => true,
            event::STATE_RELEASED => false,
            state => {
                debug!(state = format_args!("0x{state:02X}"), "unknown button state code");
                return None;
            }
        };
        return Some(PadEvent::Button { index, pressed });
    }

    if data.len() == event::BOOT_REPORT_LEN {
        let mut keys = [0u8; 6];
        keys.copy_from_slice(&data[2..8]);
        return Some(PadEvent::BootReport {
            modifiers: data[0],
            keys,
        });
    }

    debug!(len = data.len(), head = ?&data[..data.len().min(8)], "unclassified event frame");
    None
}

/// Classify a frame from the hall-sensor endpoint:
/// `[0x48, sensor_id, raw_lo, raw_hi]`, value little-endian.
pub fn classify_hall_frame(data: &[u8]) -> Option<PadEvent> {
    if data.len() >= 4 && data[0] == event::HALL_MARKER {
        return Some(PadEvent::Hall {
            sensor: data[1],
            raw: u16::from_le_bytes([data[2], data[3]]),
        });
    }
    debug!(len = data.len(), "unclassified hall frame");
    None
}

/// Fixed-capacity event queue shared between the reader loops and the
/// application's poll path. Push never blocks: on overflow the oldest
/// unconsumed event is dropped and counted.
pub struct EventQueue {
    entries: Mutex<VecDeque<PadEvent>>,
    capacity: usize,
    lost: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::with_capacity(queue::EVENT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            lost: AtomicU64::new(0),
        }
    }

    pub fn push(&self, event: PadEvent) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
            self.lost.fetch_add(1, Ordering::Relaxed);
        }
        entries.push_back(event);
    }

    pub fn pop(&self) -> Option<PadEvent> {
        self.entries.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Events dropped due to overflow since session start.
    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Which inbound endpoint a reader loop serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestChannel {
    /// Button / keyboard-compat reports
    Event,
    /// Hall-sensor readings
    Hall,
}

impl IngestChannel {
    fn name(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Hall => "hall",
        }
    }
}

/// Standing reader loop for one inbound endpoint.
///
/// Re-arms the read after every completion until `shutdown` is set. Zero
/// length completions are no-ops; a long run of them on the event channel
/// usually means the device switched reporting modes, which is logged but not
/// fatal. Hard errors get a short sleep before re-arming.
///
/// `notify` runs on every decoded event before it is queued; the driver uses
/// it to stamp button activity into the coordination state.
pub async fn run_ingestion<F>(
    session: Arc<TransportSession>,
    channel: IngestChannel,
    queue: Arc<EventQueue>,
    shutdown: Arc<AtomicBool>,
    notify: F,
) where
    F: Fn(&PadEvent) + Send + Sync + 'static,
{
    debug!(channel = channel.name(), "ingestion loop started");
    let mut zero_run: u32 = 0;

    while !shutdown.load(Ordering::Relaxed) {
        let completion = match channel {
            IngestChannel::Event => session.read_event_frame().await,
            IngestChannel::Hall => session.read_hall_frame().await,
        };

        match completion {
            Ok(data) if data.is_empty() => {
                zero_run += 1;
                if channel == IngestChannel::Event && zero_run == timing::ZERO_LEN_WARN_RUN {
                    warn!(
                        run = zero_run,
                        "long run of zero-length completions; device may have \
                         switched reporting modes"
                    );
                }
            }
            Ok(data) => {
                zero_run = 0;
                let event = match channel {
                    IngestChannel::Event => classify_event_frame(&data),
                    IngestChannel::Hall => classify_hall_frame(&data),
                };
                if let Some(event) = event {
                    notify(&event);
                    queue.push(event);
                }
            }
            Err(e) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                // Re-arm regardless; the device may recover
                warn!(channel = channel.name(), error = %e, "read failed, re-arming");
                tokio::time::sleep(Duration::from_millis(timing::READER_ERROR_SLEEP_MS)).await;
            }
        }
    }

    debug!(channel = channel.name(), "ingestion loop exiting");
}
