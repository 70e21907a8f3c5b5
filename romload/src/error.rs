//! Error types for romload.

use std::io;
use thiserror::Error;

/// Result type for romload operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for romload operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The command channel lost its transport and cannot send any more commands.
    #[error("Command channel is closed after a transport failure")]
    ChannelClosed,

    /// The embedding application requested cancellation.
    #[error("Operation interrupted")]
    Interrupted,

    /// No acknowledgement arrived within the configured reply timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The device replied with something the command does not allow.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The memory image does not fit the 16-bit size field.
    #[error("Image is {len} bytes, the device accepts at most 65535")]
    ImageTooLarge {
        /// Actual image length.
        len: usize,
    },

    /// A byte read back from the device differs from the image.
    #[error(
        "Verification failed at address {address:#06x}: expected {expected:#04x}, got {actual:#04x}"
    )]
    VerificationMismatch {
        /// Device address of the mismatching byte.
        address: u16,
        /// Byte from the image.
        expected: u8,
        /// Byte returned by the device.
        actual: u8,
    },
}

impl Error {
    /// Whether this error came from the transport (open, read or write).
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Io(_) | Self::ChannelClosed => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}
