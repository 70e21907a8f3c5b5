//! Upload session: write, verify, reset.
//!
//! ## Example
//!
//! ```rust,no_run
//! use romload::{CommandChannel, ConsoleEcho, MemoryImage, NativePort, UploadSession};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = MemoryImage::from_file("rom.bin")?;
//!     let port = NativePort::open_simple("/dev/ttyACM0", 115_200)?;
//!     let mut channel = CommandChannel::new(port, ConsoleEcho::new(std::io::stdout()));
//!
//!     UploadSession::new(&mut channel).run(&image, true, |phase, done, total| {
//!         println!("{phase}: {done}/{total}");
//!     })?;
//!     Ok(())
//! }
//! ```

use std::fmt;

use log::{debug, info, warn};

use crate::channel::CommandChannel;
use crate::console::ConsoleSink;
use crate::error::{Error, Result};
use crate::image::MemoryImage;
use crate::port::Port;
use crate::protocol::OutboundCommand;

/// Stage of an upload, reported through the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Sending the whole image.
    Write,
    /// Reading the image back byte by byte.
    Verify,
    /// Releasing the i8080 from reset.
    Reset,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Write => "write",
            Self::Verify => "verify",
            Self::Reset => "reset",
        })
    }
}

/// Drives one upload over a command channel.
///
/// Every step waits for its acknowledgement before the next command goes out,
/// and the first failure ends the session. Nothing is retried.
pub struct UploadSession<'c, P: Port, C: ConsoleSink> {
    channel: &'c mut CommandChannel<P, C>,
}

impl<'c, P: Port, C: ConsoleSink> UploadSession<'c, P, C> {
    /// Create a session on `channel`.
    pub fn new(channel: &'c mut CommandChannel<P, C>) -> Self {
        Self { channel }
    }

    /// Write `image`, optionally verify it, then reset the board.
    ///
    /// `progress` receives `(phase, done, total)`; the write and reset phases
    /// report once when they complete, verification reports every byte and
    /// ends with `done == total` before the reset goes out.
    pub fn run<F>(&mut self, image: &MemoryImage, verify: bool, mut progress: F) -> Result<()>
    where
        F: FnMut(Phase, usize, usize),
    {
        self.write(image)?;
        progress(Phase::Write, image.len(), image.len());
        info!("Image written ({} bytes)", image.len());

        if verify {
            self.verify(image, &mut progress)?;
            info!("Image verified");
        }

        self.reset()?;
        progress(Phase::Reset, 1, 1);
        info!("Board reset");
        Ok(())
    }

    /// Load the whole image with a single write-dump command.
    pub fn write(&mut self, image: &MemoryImage) -> Result<()> {
        debug!("Writing {} bytes", image.len());
        let command = OutboundCommand::write_dump(image.as_bytes())?;
        let results = self
            .channel
            .send_command(&command)?;
        if !results.is_empty() {
            warn!("Write-dump returned {} unexpected result byte(s)", results.len());
        }
        Ok(())
    }

    /// Read the image back from the highest address down to 0.
    ///
    /// Stops at the first byte that differs from the image.
    pub fn verify<F>(&mut self, image: &MemoryImage, progress: &mut F) -> Result<()>
    where
        F: FnMut(Phase, usize, usize),
    {
        let total = image.len();
        debug!("Verifying {total} bytes");
        if total == 0 {
            progress(Phase::Verify, 0, 0);
            return Ok(());
        }

        for (done, (address, &expected)) in image
            .as_bytes()
            .iter()
            .enumerate()
            .rev()
            .enumerate()
        {
            #[allow(clippy::cast_possible_truncation)] // Image length fits in u16
            let address = address as u16;
            let results = self
                .channel
                .send_command(&OutboundCommand::read_byte(address))?;

            let Some(&actual) = results.first() else {
                return Err(Error::Protocol(format!(
                    "read of address {address:#06x} returned no result byte"
                )));
            };
            if results.len() > 1 {
                warn!(
                    "Read of address {address:#06x} returned {} result bytes, using the first",
                    results.len()
                );
            }

            if actual != expected {
                return Err(Error::VerificationMismatch {
                    address,
                    expected,
                    actual,
                });
            }
            progress(Phase::Verify, done + 1, total);
        }

        Ok(())
    }

    /// Release the i8080 from reset.
    pub fn reset(&mut self) -> Result<()> {
        let results = self
            .channel
            .send_command(&OutboundCommand::reset())?;
        if !results.is_empty() {
            warn!("Reset returned {} unexpected result byte(s)", results.len());
        }
        Ok(())
    }
}
