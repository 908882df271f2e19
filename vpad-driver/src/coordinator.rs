//! Send serialization and coordination
//!
//! The coordinator is the single authority for outbound writes: one async
//! mutex serializes every frame (handshake steps and LED sequences alike),
//! so at most one 64-byte frame is ever in flight. Around that it enforces
//! the post-button-activity quiet period, the burst limit, and the
//! corruption protection window.
//!
//! Its state is the only thing shared between the ingestion loops and the
//! send path. Every field touched from the ingestion side is a plain atomic
//! store or fetch_max, never a compound read-modify-write that a completion
//! firing mid-update could interleave with.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::{debug, warn};

use vpad_transport::protocol::timing;
use vpad_transport::{LinkStatus, TransportSession};

use crate::led::{self, Rgb};

/// Sentinel for "no frame counter sampled yet"
const FRAME_COUNTER_UNSET: u32 = u32::MAX;

/// Outcome of one scheduling tick's flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing pending
    Clean,
    /// Pending update kept dirty: quiet period or session not ready
    Deferred,
    /// Pending update refused: protection window open
    Refused,
    /// The full five-frame sequence went out
    Sent,
    /// A write failed mid-sequence; update re-marked dirty, protection opened
    Failed,
}

pub struct Coordinator {
    /// Mutual-exclusion boundary for all outbound frames
    outbound: AsyncMutex<()>,
    /// Newest requested color state; newer submissions overwrite older ones
    pending: Mutex<Vec<Rgb>>,
    dirty: AtomicBool,
    /// Millis since `epoch` of the last observed button transition; 0 = none
    last_button_activity_ms: AtomicU64,
    /// Millis since `epoch` until which LED writes are refused
    protection_until_ms: AtomicU64,
    corruption_suspected: AtomicBool,
    burst_counter: AtomicU32,
    last_frame_counter: AtomicU32,
    link_was_healthy: AtomicBool,
    recovery_attempts: AtomicU64,
    epoch: Instant,
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            outbound: AsyncMutex::new(()),
            pending: Mutex::new(Vec::new()),
            dirty: AtomicBool::new(false),
            last_button_activity_ms: AtomicU64::new(0),
            protection_until_ms: AtomicU64::new(0),
            corruption_suspected: AtomicBool::new(false),
            burst_counter: AtomicU32::new(0),
            last_frame_counter: AtomicU32::new(FRAME_COUNTER_UNSET),
            link_was_healthy: AtomicBool::new(true),
            recovery_attempts: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Acquire the outbound mutual-exclusion guard. Held across a whole
    /// handshake or recovery pass, and internally across each LED sequence.
    pub async fn lock_outbound(&self) -> MutexGuard<'_, ()> {
        self.outbound.lock().await
    }

    // ---- ingestion-side notifications (atomic stores only) ----

    /// Called from the ingestion path on every button transition.
    pub fn note_button_activity(&self) {
        // max(1) keeps 0 reserved as the "no activity yet" sentinel
        self.note_button_activity_at(self.now_ms().max(1));
    }

    fn note_button_activity_at(&self, at_ms: u64) {
        self.last_button_activity_ms.store(at_ms, Ordering::Release);
    }

    // ---- corruption monitoring ----

    /// Open a protection window and flag suspicion. fetch_max keeps an
    /// already-longer window intact.
    pub fn suspect_corruption(&self, window_ms: u64, reason: &str) {
        let until = self.now_ms() + window_ms;
        self.protection_until_ms.fetch_max(until, Ordering::AcqRel);
        if !self.corruption_suspected.swap(true, Ordering::AcqRel) {
            warn!(window_ms, reason, "corruption suspected; refusing LED writes");
        }
    }

    /// Inspect transport-level indicators: error-status bits, frame-counter
    /// continuity, and connect/enable transitions.
    pub fn observe_link(&self, status: LinkStatus) {
        let healthy = status.connected && status.enabled;
        let was_healthy = self.link_was_healthy.swap(healthy, Ordering::AcqRel);

        if was_healthy && !healthy {
            self.suspect_corruption(timing::PROTECT_SEVERE_MS, "link down");
            return;
        }

        if status.error_bits != 0 {
            self.suspect_corruption(timing::PROTECT_SEVERE_MS, "transfer error bits set");
            return;
        }

        let previous = self
            .last_frame_counter
            .swap(status.frame_counter as u32, Ordering::AcqRel);
        if healthy && previous != FRAME_COUNTER_UNSET && previous == status.frame_counter as u32 {
            self.suspect_corruption(timing::PROTECT_MILD_MS, "frame counter stalled");
        }
    }

    pub fn corruption_suspected(&self) -> bool {
        self.corruption_suspected.load(Ordering::Acquire)
    }

    /// True once the protection window has expired while corruption is still
    /// suspected: time for a validation pass.
    pub fn validation_due(&self) -> bool {
        self.corruption_suspected() && !self.protection_active_at(self.now_ms())
    }

    pub fn clear_corruption(&self) {
        self.corruption_suspected.store(false, Ordering::Release);
    }

    pub fn note_recovery_attempt(&self) {
        self.recovery_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn recovery_attempts(&self) -> u64 {
        self.recovery_attempts.load(Ordering::Relaxed)
    }

    // ---- LED update scheduling ----

    /// Record a new requested color state. Non-blocking; returns false only
    /// for an invalid array length. The newest submission always wins; a
    /// deferred older state is overwritten, never queued behind.
    pub fn submit(&self, colors: &[Rgb]) -> bool {
        use vpad_transport::protocol::grid;
        if colors.len() != grid::BUTTONS && colors.len() != grid::BUTTONS - 1 {
            return false;
        }
        {
            let mut pending = self.pending.lock();
            pending.clear();
            pending.extend_from_slice(colors);
        }
        self.dirty.store(true, Ordering::Release);
        true
    }

    pub fn has_pending(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn quiet_period_active_at(&self, now_ms: u64) -> bool {
        let last = self.last_button_activity_ms.load(Ordering::Acquire);
        last != 0 && now_ms < last + timing::QUIET_PERIOD_MS
    }

    fn protection_active_at(&self, now_ms: u64) -> bool {
        now_ms < self.protection_until_ms.load(Ordering::Acquire)
    }

    /// Try to push the pending color state to the device.
    ///
    /// Deferral keeps the dirty marking; the caller retries on its next
    /// scheduling tick. Transfer errors are handled here (re-mark dirty,
    /// open a protection window), never propagated.
    pub async fn flush(&self, session: &TransportSession) -> FlushOutcome {
        if !self.dirty.load(Ordering::Acquire) {
            return FlushOutcome::Clean;
        }

        let now = self.now_ms();
        if self.protection_active_at(now) {
            return FlushOutcome::Refused;
        }
        if self.quiet_period_active_at(now) || !session.is_ready() {
            return FlushOutcome::Deferred;
        }

        let _guard = self.outbound.lock().await;

        // Snapshot under the lock; clear dirty first so a submission racing
        // with the send re-marks it and gets picked up next tick
        self.dirty.store(false, Ordering::Release);
        let snapshot = self.pending.lock().clone();

        let sequence = match led::encode(&snapshot) {
            Ok(sequence) => sequence,
            Err(e) => {
                // submit() validates lengths, so this is unreachable in
                // practice; drop the state rather than wedge the scheduler
                warn!(error = %e, "pending LED state failed to encode; dropping");
                return FlushOutcome::Failed;
            }
        };

        // The firmware restarts toggle tracking at the start of a custom-LED
        // sequence; this is the one sanctioned parity reset
        session.reset_out_parity_for_led_phase();

        for (label, frame) in sequence.frames() {
            if let Err(e) = session.write_frame(frame).await {
                warn!(frame = label, error = %e, "LED frame write failed");
                self.dirty.store(true, Ordering::Release);
                self.suspect_corruption(timing::PROTECT_SEVERE_MS, "LED write failure");
                return FlushOutcome::Failed;
            }
            self.bump_burst().await;
            tokio::time::sleep(Duration::from_millis(timing::LED_FRAME_SETTLE_MS)).await;
        }

        debug!("LED sequence sent");
        FlushOutcome::Sent
    }

    /// Burst limiting: yield to the scheduler after `BURST_LIMIT` frames so
    /// a tight loop cannot overload the transport's periodic schedule.
    async fn bump_burst(&self) {
        let sent = self.burst_counter.fetch_add(1, Ordering::AcqRel) + 1;
        if sent >= timing::BURST_LIMIT {
            self.burst_counter.store(0, Ordering::Release);
            tokio::task::yield_now().await;
        }
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}
