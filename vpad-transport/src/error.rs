//! Transport error types

use thiserror::Error;

/// Errors that can occur during transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    /// Endpoint discovery failed; fatal to session start
    #[error("Unusable endpoint topology: {0}")]
    Topology(String),

    /// A descriptor record was self-inconsistent
    #[error("Malformed configuration descriptor at offset {0}")]
    MalformedDescriptor(usize),

    /// Single read/write failure; transient, handled per component policy
    #[error("Transfer failed on endpoint 0x{endpoint:02X}: {reason}")]
    Transfer { endpoint: u8, reason: String },

    #[error("Communication timeout")]
    Timeout,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
