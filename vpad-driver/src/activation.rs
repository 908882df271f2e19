//! Activation state machine and the vendor handshake sequence
//!
//! The keypad enumerates as a vendor device but stays silent until a fixed,
//! ordered command sequence unlocks event reporting. The sequence below was
//! reverse-engineered from captures of the vendor software; steps marked
//! non-required never produced a failure in captures and their absence of a
//! response is harmless.
//!
//! Retry semantics: each step may be retried a small fixed number of times,
//! but a failed handshake is never resumed mid-sequence; any re-run starts
//! again from step 1.

use std::time::Duration;

use tracing::{debug, warn};

use vpad_transport::protocol::{self, cmd, timing};
use vpad_transport::TransportSession;

use crate::error::DriverError;

/// Driver lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Discovering,
    AddressAssigned,
    Configured,
    Handshaking,
    Ready,
    /// Reached from `Ready` on corruption detection or from a failed
    /// handshake; only `Recovering` leads back to `Ready`
    Degraded,
    Recovering,
}

impl DriverState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::AddressAssigned => "address-assigned",
            Self::Configured => "configured",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Recovering => "recovering",
        }
    }
}

/// One step of the activation handshake.
pub struct ActivationStep {
    pub ordinal: usize,
    pub label: &'static str,
    /// Command family plus payload; expanded to a full frame at send time
    pub family: u8,
    pub payload: &'static [u8],
    /// Non-required steps log write failures but do not fail the handshake
    pub required: bool,
}

/// The fixed handshake sequence. Order is load-bearing: swapping the two
/// mode-setup parts, or sending button activation before them, leaves the
/// device enumerated but mute.
pub const SEQUENCE: &[ActivationStep] = &[
    ActivationStep {
        ordinal: 1,
        label: "mode setup part 1",
        family: cmd::MODE_SETUP,
        payload: &[0x00, 0x01],
        required: true,
    },
    ActivationStep {
        ordinal: 2,
        label: "mode setup part 2",
        family: cmd::MODE_SETUP,
        payload: &[0x01, 0x02],
        required: true,
    },
    ActivationStep {
        ordinal: 3,
        label: "button activation",
        family: cmd::BUTTON_ACTIVATE,
        payload: &[0x01],
        required: true,
    },
    ActivationStep {
        ordinal: 4,
        label: "status query",
        family: cmd::STATUS,
        payload: &[],
        required: false,
    },
    ActivationStep {
        ordinal: 5,
        label: "effects activation",
        family: cmd::EFFECTS,
        payload: &[0x01],
        required: true,
    },
    ActivationStep {
        ordinal: 6,
        label: "button activation re-assert",
        family: cmd::BUTTON_ACTIVATE,
        payload: &[0x01],
        required: true,
    },
    ActivationStep {
        ordinal: 7,
        label: "status query re-check",
        family: cmd::STATUS,
        payload: &[],
        required: false,
    },
];

/// Run the full handshake sequence from step 1.
///
/// The caller must already hold the outbound send lock. `diagnostic_readback`
/// enables the optional per-step response read; it must be false once the
/// ingestion loops are armed, since the event endpoint then already has a
/// standing read in flight.
pub async fn run_sequence(
    session: &TransportSession,
    diagnostic_readback: bool,
) -> Result<(), DriverError> {
    for step in SEQUENCE {
        let frame = protocol::command_frame(step.family, step.payload);
        let mut sent = false;

        for attempt in 1..=timing::HANDSHAKE_RETRIES {
            match session.write_frame(&frame).await {
                Ok(()) => {
                    sent = true;
                    break;
                }
                Err(e) => {
                    debug!(
                        step = step.ordinal,
                        label = step.label,
                        attempt,
                        error = %e,
                        "handshake write failed"
                    );
                    tokio::time::sleep(Duration::from_millis(timing::HANDSHAKE_BACKOFF_MS)).await;
                }
            }
        }

        if !sent {
            if step.required {
                warn!(
                    step = step.ordinal,
                    label = step.label,
                    "handshake step exhausted retries; sequence failed"
                );
                return Err(DriverError::Handshake {
                    step: step.ordinal,
                    label: step.label,
                    attempts: timing::HANDSHAKE_RETRIES,
                });
            }
            warn!(
                step = step.ordinal,
                label = step.label,
                "optional handshake step failed; continuing"
            );
            continue;
        }

        // The device ignores the next step if it arrives too soon
        tokio::time::sleep(Duration::from_millis(timing::HANDSHAKE_SETTLE_MS)).await;

        if diagnostic_readback {
            match tokio::time::timeout(
                Duration::from_millis(timing::HANDSHAKE_READBACK_MS),
                session.read_event_frame(),
            )
            .await
            {
                Ok(Ok(resp)) if !resp.is_empty() => {
                    debug!(
                        step = step.ordinal,
                        cmd = cmd::name(step.family),
                        head = ?&resp[..resp.len().min(8)],
                        "handshake response"
                    );
                }
                // absence of a response is diagnostic, never fatal
                _ => debug!(step = step.ordinal, "no handshake response"),
            }
        }
    }

    debug!("handshake sequence complete");
    Ok(())
}
