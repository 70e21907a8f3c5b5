//! # romload
//!
//! A library for loading memory images into an i8080 running on an FPGA board,
//! through the board's STM32 USB serial bridge.
//!
//! This crate provides:
//!
//! - The inbound frame decoder that separates command replies from console
//!   output on the shared byte stream
//! - A single-flight command channel that matches each command with its
//!   result bytes and acknowledgement
//! - The upload session: write the image, verify it, reset the board
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
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
//!     UploadSession::new(&mut channel).run(&image, true, |_, _, _| {})?;
//!
//!     // Keep printing what the i8080 program writes
//!     channel.follow()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod channel;
pub mod console;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod session;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker consulted while waiting on the board.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    channel::CommandChannel,
    console::{ConsoleEcho, ConsoleSink, NullConsole},
    error::{Error, Result},
    image::MemoryImage,
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{FrameDecoder, InboundEvent, Opcode, OutboundCommand},
    session::{Phase, UploadSession},
};
