//! # Gateway Error Handling
//!
//! Error types for the gateway core and its collaborators. The serial
//! transport itself never surfaces receive faults through this type: CRC
//! mismatches, character gaps and oversize frames are local flags absorbed by
//! the receive path (the retry/timeout policy is the only escalation). What
//! remains here are the errors a caller can actually act on: queue capacity
//! rejection, configuration problems, serial port I/O failures and internal
//! invariant violations.
//!
//! ## Usage
//!
//! ```rust
//! use modbus_bridge::{GatewayError, GatewayResult};
//!
//! fn handle(result: GatewayResult<()>) {
//!     match result {
//!         Ok(()) => {}
//!         Err(GatewayError::QueueFull { entries, bytes }) => {
//!             // Back-pressure the network client; the request never
//!             // entered the core.
//!             println!("queue full: {} entries / {} bytes", entries, bytes);
//!         }
//!         Err(error) => println!("gateway error: {}", error),
//!     }
//! }
//! ```

use thiserror::Error;

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors surfaced by the gateway core.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// I/O related errors (serial port, network sink).
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Serial port open / connection establishment failures.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Configuration validation or parse failures.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Malformed frame handed in by a collaborator (not a serial receive
    /// fault; those never leave the receive path).
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Request rejected because the queue entry or byte cap would be
    /// exceeded. The request never entered the core.
    #[error("Request queue full: {entries} entries / {bytes} payload bytes")]
    QueueFull { entries: usize, bytes: usize },

    /// Target unit id outside the configured slave address range.
    #[error("Invalid unit id: {unit_id} (max {max})")]
    InvalidUnitId { unit_id: u8, max: u8 },

    /// Internal invariant violation (should not occur in normal operation).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    /// Create a new I/O error.
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error.
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new configuration error.
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create a new frame error.
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if the error condition might clear up on retry.
    ///
    /// Capacity rejection and I/O errors are transient; configuration and
    /// validation failures are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Connection { .. } | Self::QueueFull { .. }
        )
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("YAML error: {}", err))
    }
}
