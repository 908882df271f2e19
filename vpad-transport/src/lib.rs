//! Transport layer for the VPad 25-key hall-effect RGB keypad
//!
//! This crate owns the wire-level half of the driver:
//!
//! - configuration-descriptor topology discovery
//! - the transport session (endpoint table, data-toggle parity, ready flag)
//! - event classification and the bounded ingestion queue
//!
//! The generic USB host stack (enumeration, transfer scheduling) is an
//! external collaborator reached through the [`HostController`] trait; this
//! crate never touches host-controller hardware directly.

pub mod error;
pub mod events;
pub mod protocol;
pub mod session;
pub mod topology;

pub use error::TransportError;
pub use events::{EventQueue, IngestChannel, PadEvent};
pub use protocol::{Frame, FRAME_SIZE};
pub use session::TransportSession;
pub use topology::{Direction, EndpointDescriptor, EndpointTable, TransferType};

use async_trait::async_trait;
use std::sync::Arc;

/// Transport-level signals sampled by the coordination layer to predict
/// corruption: error-status bits, periodic frame-counter continuity, and
/// device connect/enable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    /// Device still physically connected
    pub connected: bool,
    /// Port enabled (a disabled port mid-session signals a reset)
    pub enabled: bool,
    /// Free-running SOF frame counter; stalling indicates schedule trouble
    pub frame_counter: u16,
    /// Raw error-status bits from the last completed transfer window
    pub error_bits: u8,
}

/// Seam to the external USB host stack.
///
/// Implementations provide raw asynchronous transfer primitives; each future
/// resolves when the underlying transfer completes. Transfers to one endpoint
/// are never issued concurrently by this crate, so implementations may assume
/// per-endpoint serialization.
#[async_trait]
pub trait HostController: Send + Sync {
    /// Fetch the full raw configuration-descriptor byte stream.
    async fn read_configuration(&self) -> Result<Vec<u8>, TransportError>;

    /// Allocate and assign a device address, returning it.
    async fn assign_address(&self) -> Result<u8, TransportError>;

    /// Select the device configuration (SET_CONFIGURATION).
    async fn configure(&self, device_address: u8) -> Result<(), TransportError>;

    /// One interrupt IN transfer. An empty result is a valid zero-length
    /// completion, not an error.
    async fn interrupt_in(
        &self,
        device_address: u8,
        endpoint: u8,
        max_len: usize,
        toggle: bool,
    ) -> Result<Vec<u8>, TransportError>;

    /// One interrupt OUT transfer of a full frame.
    async fn interrupt_out(
        &self,
        device_address: u8,
        endpoint: u8,
        frame: &[u8],
        toggle: bool,
    ) -> Result<(), TransportError>;

    /// Sample transport-level status for corruption monitoring.
    fn link_status(&self) -> LinkStatus;
}

/// Type alias for a shared host controller
pub type BoxedHostController = Arc<dyn HostController>;
