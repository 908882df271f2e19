//! Driver error types

use thiserror::Error;
use vpad_transport::TransportError;

/// Errors from driver operations
#[derive(Error, Debug)]
pub enum DriverError {
    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// An activation step exhausted its retries; the session is degraded
    #[error("Handshake failed at step {step} ({label}) after {attempts} attempts")]
    Handshake {
        step: usize,
        label: &'static str,
        attempts: usize,
    },

    /// Invalid parameter value
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Session is not ready for the requested operation
    #[error("Device not ready")]
    NotReady,
}
