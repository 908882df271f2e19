//! Device driver for the VPad 25-key hall-effect RGB keypad
//!
//! Builds the device-level half of the driver on top of `vpad-transport`:
//! the activation state machine, the pure LED frame encoder, the
//! send-serialization coordinator and the recovery supervisor, all behind
//! the [`PadDriver`] facade.
//!
//! Applications interact through exactly three surfaces: a non-blocking
//! color-array update, a polled event stream, and the ready flag. Raw
//! transport error codes never cross this boundary.

pub mod activation;
pub mod coordinator;
pub mod error;
pub mod led;
pub mod recovery;

pub use activation::DriverState;
pub use coordinator::FlushOutcome;
pub use error::DriverError;
pub use led::{LedSequence, Rgb};
pub use recovery::RecoveryOutcome;

// Re-export the transport surface applications need for wiring
pub use vpad_transport::{
    EventQueue, HostController, LinkStatus, PadEvent, TransportError, TransportSession,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vpad_transport::events::{self, IngestChannel};
use vpad_transport::protocol::timing;

use coordinator::Coordinator;

/// Result of one scheduling tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub flush: FlushOutcome,
    pub recovery: Option<RecoveryOutcome>,
}

/// The driver facade: one instance per attached keypad.
pub struct PadDriver {
    session: Arc<TransportSession>,
    coordinator: Arc<Coordinator>,
    queue: Arc<EventQueue>,
    state: Mutex<DriverState>,
    shutdown: Arc<AtomicBool>,
    ingestion_armed: AtomicBool,
    ever_activated: AtomicBool,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

impl PadDriver {
    /// Attach to a keypad: discover topology, assign an address, configure,
    /// and run the activation handshake.
    ///
    /// A topology failure is fatal and returned as an error. A failed
    /// handshake is not: the driver comes back degraded (`is_ready() ==
    /// false`) and the recovery supervisor retries activation on subsequent
    /// [`tick`](Self::tick)s.
    pub async fn attach(host: Arc<dyn HostController>) -> Result<Self, DriverError> {
        debug!("attaching: discovering topology");
        let session = Arc::new(TransportSession::establish(host).await?);
        debug!(address = session.device_address(), "address assigned");
        session.configure().await?;
        debug!("configured");

        let driver = Self {
            session,
            coordinator: Arc::new(Coordinator::new()),
            queue: Arc::new(EventQueue::new()),
            state: Mutex::new(DriverState::Handshaking),
            shutdown: Arc::new(AtomicBool::new(false)),
            ingestion_armed: AtomicBool::new(false),
            ever_activated: AtomicBool::new(false),
            readers: Mutex::new(Vec::new()),
        };

        {
            let _guard = driver.coordinator.lock_outbound().await;
            match activation::run_sequence(&driver.session, true).await {
                Ok(()) => {
                    driver.ever_activated.store(true, Ordering::Release);
                    driver.session.set_ready(true);
                    driver.set_state(DriverState::Ready);
                    info!("activation complete; device ready");
                }
                Err(e) => {
                    warn!(error = %e, "activation failed; session degraded");
                    driver.set_state(DriverState::Degraded);
                    driver
                        .coordinator
                        .suspect_corruption(timing::PROTECT_SEVERE_MS, "handshake failed");
                }
            }
        }

        if driver.session.is_ready() {
            driver.arm_ingestion();
        }
        Ok(driver)
    }

    fn set_state(&self, next: DriverState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(from = state.name(), to = next.name(), "state transition");
            *state = next;
        }
    }

    pub fn state(&self) -> DriverState {
        *self.state.lock()
    }

    /// Spawn the standing reader loops, once. Button transitions stamp
    /// activity into the coordinator before queuing, so the quiet period is
    /// measured from ingestion time, not poll time.
    fn arm_ingestion(&self) {
        if self.ingestion_armed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut readers = self.readers.lock();

        let coordinator = Arc::clone(&self.coordinator);
        let notify = move |event: &PadEvent| {
            if matches!(event, PadEvent::Button { .. }) {
                coordinator.note_button_activity();
            }
        };
        readers.push(tokio::spawn(events::run_ingestion(
            Arc::clone(&self.session),
            IngestChannel::Event,
            Arc::clone(&self.queue),
            Arc::clone(&self.shutdown),
            notify,
        )));

        if self.session.has_hall_channel() {
            readers.push(tokio::spawn(events::run_ingestion(
                Arc::clone(&self.session),
                IngestChannel::Hall,
                Arc::clone(&self.queue),
                Arc::clone(&self.shutdown),
                |_: &PadEvent| {},
            )));
        }
        debug!("ingestion armed");
    }

    // ---- application surface ----

    /// Queue a new LED state. Always non-blocking; the newest submission
    /// overwrites any deferred older one. Returns false for an invalid
    /// array length (anything but 24 or 25 colors).
    pub fn update_leds(&self, colors: &[Rgb]) -> bool {
        self.coordinator.submit(colors)
    }

    /// Pop the next decoded event, if any.
    pub fn poll_event(&self) -> Option<PadEvent> {
        self.queue.pop()
    }

    /// Events dropped to queue overflow since attach.
    pub fn events_lost(&self) -> u64 {
        self.queue.lost()
    }

    /// Recovery passes run since attach.
    pub fn recovery_attempts(&self) -> u64 {
        self.coordinator.recovery_attempts()
    }

    /// The only status the application sees: true between a successful
    /// activation (or recovery) and the next corruption event.
    pub fn is_ready(&self) -> bool {
        self.session.is_ready()
    }

    /// One scheduling pass: sample link status, run a validation pass if one
    /// is due, otherwise try to flush the pending LED state.
    pub async fn tick(&self) -> TickReport {
        self.coordinator
            .observe_link(self.session.host().link_status());

        if self.coordinator.corruption_suspected() {
            if self.state() == DriverState::Ready {
                self.set_state(DriverState::Degraded);
                self.session.set_ready(false);
            }

            if self.coordinator.validation_due() {
                self.set_state(DriverState::Recovering);
                let outcome = recovery::run_validation(
                    &self.session,
                    &self.coordinator,
                    self.ever_activated.load(Ordering::Acquire),
                )
                .await;
                match outcome {
                    RecoveryOutcome::Failed => {
                        self.set_state(DriverState::Degraded);
                        // space out the next validation pass
                        self.coordinator
                            .suspect_corruption(timing::PROTECT_SEVERE_MS, "recovery failed");
                    }
                    _ => {
                        self.ever_activated.store(true, Ordering::Release);
                        self.set_state(DriverState::Ready);
                        self.arm_ingestion();
                    }
                }
                return TickReport {
                    flush: FlushOutcome::Refused,
                    recovery: Some(outcome),
                };
            }

            return TickReport {
                flush: FlushOutcome::Refused,
                recovery: None,
            };
        }

        TickReport {
            flush: self.coordinator.flush(&self.session).await,
            recovery: None,
        }
    }

    /// Tear the session down: stops the reader loops and reports not-ready.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.session.set_ready(false);
        self.set_state(DriverState::Idle);
        for handle in self.readers.lock().drain(..) {
            handle.abort();
        }
        debug!("driver shut down");
    }
}

impl std::fmt::Debug for PadDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PadDriver")
            .field("state", &self.state())
            .field("ready", &self.is_ready())
            .field("events_lost", &self.events_lost())
            .finish()
    }
}

impl Drop for PadDriver {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.readers.lock().drain(..) {
            handle.abort();
        }
    }
}
