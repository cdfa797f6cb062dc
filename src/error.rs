//! Error types for the probe-link-ble crate.

use thiserror::Error;

use crate::session::ConnectionState;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// Failed to establish a connection to the probe.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// An I/O operation on an open connection failed.
    #[error("Transport error: {reason}")]
    Transport {
        /// Description of the failure.
        reason: String,
    },

    /// Operation requires a connection but the probe is not connected.
    #[error("Probe not connected")]
    NotConnected,

    /// The operation is not valid in the current state.
    #[error("Invalid state for {operation}: {state}")]
    InvalidState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the object was in.
        state: String,
    },

    /// No visible device matches the requested serial number.
    #[error("Device not found: {serial_number}")]
    DeviceNotFound {
        /// The serial number that was searched for.
        serial_number: String,
    },

    /// The maximum number of sessions has been reached.
    #[error("Maximum sessions ({max}) already connected")]
    MaxSessionsReached {
        /// The maximum number of sessions allowed.
        max: usize,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

}

impl Error {
    pub(crate) fn invalid_state(operation: &'static str, state: ConnectionState) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }

    pub(crate) fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    pub(crate) fn connection_failed(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            reason: reason.into(),
        }
    }

    /// Failure to open (or reach) a probe. The session was never registered
    /// or has moved to `Disconnected`.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::BluetoothUnavailable
                | Self::DeviceNotFound { .. }
                | Self::MaxSessionsReached { .. }
        )
    }

    /// I/O failure on an already open connection.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::NotConnected
                | Self::Bluetooth(_)
                | Self::CharacteristicNotFound { .. }
        )
    }

    /// The caller used an object in a state that does not allow the operation.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
