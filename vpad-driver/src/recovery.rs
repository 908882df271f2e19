//! Recovery supervision
//!
//! Runs when a protection window expires with corruption still suspected.
//! Escalation is strictly tiered: responsiveness probe, then mode-reset with
//! a known-good color state, then a full re-activation followed by one more
//! mode-reset. A final failure leaves the corruption flag set and the
//! session not-ready; the supervisor is retried on the next scheduled tick,
//! never in a synchronous loop.

use std::time::Duration;

use tracing::{debug, info, warn};

use vpad_transport::protocol::{grid, timing, Frame};
use vpad_transport::{TransportError, TransportSession};

use crate::activation;
use crate::coordinator::Coordinator;
use crate::led::{self, Rgb};

/// How a validation pass resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Probe acknowledged; corruption flag cleared, no further action
    Responsive,
    /// Probe failed but the mode-reset restored the device
    ModeReset,
    /// Full re-activation (plus mode-reset retry) was needed
    Reactivated,
    /// All strategies failed; corruption flag stays set, session not ready
    Failed,
}

/// Low intensity used for the benign probe pattern
const PROBE_INTENSITY: u8 = 0x08;

fn probe_frame() -> Frame {
    let mut colors = vec![Rgb::BLACK; grid::BUTTONS];
    colors[0] = Rgb::new(PROBE_INTENSITY, PROBE_INTENSITY, PROBE_INTENSITY);
    // encode cannot fail for a full-length array; fall back to a black
    // payload frame if it ever does
    match led::encode(&colors) {
        Ok(sequence) => sequence.package1,
        Err(_) => led::mode_select_frame(),
    }
}

async fn send_sequence(
    session: &TransportSession,
    sequence: &led::LedSequence,
) -> Result<(), TransportError> {
    session.reset_out_parity_for_led_phase();
    for (label, frame) in sequence.frames() {
        session.write_frame(frame).await.inspect_err(|e| {
            debug!(frame = label, error = %e, "recovery sequence write failed");
        })?;
        tokio::time::sleep(Duration::from_millis(timing::LED_FRAME_SETTLE_MS)).await;
    }
    Ok(())
}

/// Force a known-good color state: mode-select plus an all-off frame set.
async fn mode_reset(session: &TransportSession) -> Result<(), TransportError> {
    let sequence = match led::encode(&vec![Rgb::BLACK; grid::BUTTONS]) {
        Ok(sequence) => sequence,
        Err(e) => return Err(TransportError::Internal(e.to_string())),
    };
    send_sequence(session, &sequence).await
}

/// Validate device responsiveness and escalate as needed.
///
/// `ever_activated` is false when the initial handshake never completed; the
/// probe and mode-reset tiers are skipped then, since the device cannot be
/// expected to acknowledge LED traffic before activation.
pub async fn run_validation(
    session: &TransportSession,
    coordinator: &Coordinator,
    ever_activated: bool,
) -> RecoveryOutcome {
    let _guard = coordinator.lock_outbound().await;
    coordinator.note_recovery_attempt();

    if ever_activated {
        // Tier 1: benign test pattern, one LED at low intensity
        session.reset_out_parity_for_led_phase();
        match session.write_frame(&probe_frame()).await {
            Ok(()) => {
                info!("device responsive to probe; clearing corruption flag");
                coordinator.clear_corruption();
                session.set_ready(true);
                return RecoveryOutcome::Responsive;
            }
            Err(e) => warn!(error = %e, "probe not acknowledged; escalating to mode-reset"),
        }

        // Tier 2: mode-reset with a known-good color state
        if mode_reset(session).await.is_ok() {
            info!("mode-reset restored the device");
            coordinator.clear_corruption();
            session.set_ready(true);
            return RecoveryOutcome::ModeReset;
        }
        warn!("mode-reset failed; escalating to full re-activation");
    }

    // Tier 3: full activation sequence, then one more mode-reset.
    // No diagnostic read-back: the ingestion loop owns the event endpoint.
    session.set_ready(false);
    match activation::run_sequence(session, false).await {
        Ok(()) => {
            if mode_reset(session).await.is_ok() {
                info!("re-activation recovered the device");
                coordinator.clear_corruption();
                session.set_ready(true);
                return RecoveryOutcome::Reactivated;
            }
            warn!("mode-reset still failing after re-activation");
        }
        Err(e) => warn!(error = %e, "re-activation failed"),
    }

    // Corruption flag stays set; retried on the next scheduled tick
    RecoveryOutcome::Failed
}
