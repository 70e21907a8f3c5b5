//! Port abstraction for the serial link to the board.
//!
//! The protocol layer only ever talks to a [`Port`], so the same channel and
//! session code runs against the native `serialport` backend and against the
//! simulated board used in tests.
//!
//! ```text
//! +------------------------+
//! |  UploadSession         |
//! +-----------+------------+
//!             |
//! +-----------v------------+
//! |  CommandChannel        |  <- FrameDecoder, ConsoleSink
//! +-----------+------------+
//!             |
//! +-----------v------------+
//! |  Port trait            |
//! +-----------+------------+
//!             |
//! +-----------v------------+
//! |  NativePort            |
//! |  (serialport)          |
//! +------------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod sim;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Baud rate the board's USB CDC bridge is configured for.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Timeout of a single port read or write.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Serial port configuration.
///
/// The link is always 8N1 without flow control; only the device path, speed
/// and poll timeout vary.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM19").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Timeout of a single read or write on the port.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the poll timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// Byte transport to the board.
///
/// Reads return whatever chunk the transport has available; chunk boundaries
/// carry no meaning. A read that times out with `ErrorKind::TimedOut` (or
/// returns zero bytes) just means nothing arrived yet. A write that times out
/// means the device has not drained its buffer yet; the bytes it did not
/// accept can be written again.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
