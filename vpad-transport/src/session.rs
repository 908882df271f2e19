//! Transport session: owned device address, endpoint table, and per-endpoint
//! data-toggle parity
//!
//! The session is the only holder of parity state. A toggle bit flips only
//! when the corresponding transfer completes successfully, so it always
//! reflects the last transfer's outcome. The single sanctioned forced reset
//! is [`TransportSession::reset_out_parity_for_led_phase`], invoked at the
//! LED-sequence phase boundary and nowhere else.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::TransportError;
use crate::protocol::FRAME_SIZE;
use crate::topology::{self, EndpointTable};
use crate::HostController;

/// Per-direction data-toggle parity bits, one per endpoint in the table.
#[derive(Debug, Default)]
struct ParityState {
    event_in: AtomicBool,
    hall_in: AtomicBool,
    command_out: AtomicBool,
}

/// An established session with one keypad. Destroyed on detach, recreated on
/// reconnect; the endpoint table is immutable for the session lifetime.
pub struct TransportSession {
    host: Arc<dyn HostController>,
    device_address: u8,
    endpoints: EndpointTable,
    parity: ParityState,
    ready: AtomicBool,
}

impl TransportSession {
    /// Read the configuration descriptors, discover the endpoint topology
    /// (with the known-good fixed-table fallback) and assign an address.
    pub async fn establish(host: Arc<dyn HostController>) -> Result<Self, TransportError> {
        let config = host.read_configuration().await?;
        let endpoints = topology::discover(&config)?.with_fixed_fallback();
        let device_address = host.assign_address().await?;
        debug!(
            address = device_address,
            event_in = format_args!("0x{:02X}", endpoints.event_in.address),
            command_out = format_args!("0x{:02X}", endpoints.command_out.address),
            "session established"
        );
        Ok(Self {
            host,
            device_address,
            endpoints,
            parity: ParityState::default(),
            ready: AtomicBool::new(false),
        })
    }

    /// Select the device configuration.
    pub async fn configure(&self) -> Result<(), TransportError> {
        self.host.configure(self.device_address).await
    }

    pub fn device_address(&self) -> u8 {
        self.device_address
    }

    pub fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    pub fn host(&self) -> &Arc<dyn HostController> {
        &self.host
    }

    /// Ready flag: set once activation completes, cleared on corruption or
    /// teardown. This is the only status the application boundary sees.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// Write one 64-byte frame to the command endpoint. Parity flips only on
    /// success.
    pub async fn write_frame(&self, frame: &[u8; FRAME_SIZE]) -> Result<(), TransportError> {
        let endpoint = self.endpoints.command_out.address;
        let toggle = self.parity.command_out.load(Ordering::Acquire);
        self.host
            .interrupt_out(self.device_address, endpoint, frame, toggle)
            .await?;
        self.parity.command_out.store(!toggle, Ordering::Release);
        Ok(())
    }

    /// One interrupt read on the event endpoint. Empty data is a zero-length
    /// completion; parity still flips (the transfer succeeded).
    pub async fn read_event_frame(&self) -> Result<Vec<u8>, TransportError> {
        let descriptor = self.endpoints.event_in;
        let toggle = self.parity.event_in.load(Ordering::Acquire);
        let data = self
            .host
            .interrupt_in(
                self.device_address,
                descriptor.address,
                descriptor.max_packet_size as usize,
                toggle,
            )
            .await?;
        self.parity.event_in.store(!toggle, Ordering::Release);
        Ok(data)
    }

    /// One interrupt read on the hall-sensor endpoint, if present.
    pub async fn read_hall_frame(&self) -> Result<Vec<u8>, TransportError> {
        let Some(descriptor) = self.endpoints.hall_in else {
            return Err(TransportError::Internal(
                "hall endpoint not present in topology".into(),
            ));
        };
        let toggle = self.parity.hall_in.load(Ordering::Acquire);
        let data = self
            .host
            .interrupt_in(
                self.device_address,
                descriptor.address,
                descriptor.max_packet_size as usize,
                toggle,
            )
            .await?;
        self.parity.hall_in.store(!toggle, Ordering::Release);
        Ok(data)
    }

    pub fn has_hall_channel(&self) -> bool {
        self.endpoints.hall_in.is_some()
    }

    /// Named parity reset at the LED-update phase boundary. The firmware
    /// restarts its own toggle tracking when a custom-LED sequence begins;
    /// resetting anywhere else desynchronizes the endpoint.
    pub fn reset_out_parity_for_led_phase(&self) {
        debug!("resetting OUT parity at LED phase boundary");
        self.parity.command_out.store(false, Ordering::Release);
    }
}
