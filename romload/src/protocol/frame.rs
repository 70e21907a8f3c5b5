//! Inbound frame decoder.
//!
//! The board multiplexes protocol replies and the i8080's console output on
//! one byte stream. Control frames start with a tag byte:
//!
//! ```text
//! +------+-----------------+--------+
//! | tag  | meaning         | length |
//! +------+-----------------+--------+
//! | 0x01 | acknowledgement | 1      |
//! | 0x02 | result byte     | 2      |
//! | 0x05 | print-time      | 1      |
//! | else | console output  | 1      |
//! +------+-----------------+--------+
//! ```
//!
//! Reads from the port can split a result frame between its tag and its data
//! byte, so the decoder keeps whatever it could not consume and prepends it to
//! the next chunk.

use std::time::{SystemTime, UNIX_EPOCH};

use log::trace;

/// Acknowledgement tag.
pub const TAG_ACK: u8 = 0x01;

/// Result tag, followed by one data byte.
pub const TAG_RESULT: u8 = 0x02;

/// Print-time marker tag.
pub const TAG_PRINT_TIME: u8 = 0x05;

/// Length of a result frame (tag + data byte).
const RESULT_FRAME_LEN: usize = 2;

/// Source of the wall-clock timestamp attached to print-time markers.
pub type Clock = fn() -> u64;

/// Milliseconds since the Unix epoch.
pub fn system_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// A decoded inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundEvent {
    /// The board finished processing the last command.
    Ack,
    /// One byte of command output.
    Result(u8),
    /// The board asked the host to print the current time.
    PrintTime {
        /// Host wall-clock time when the marker was decoded.
        timestamp_millis: u64,
    },
    /// A byte of console output from the i8080.
    Raw(u8),
}

/// Incremental decoder owning the carry-over buffer of one connection.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    clock: Clock,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder stamping print-time markers with the system clock.
    pub fn new() -> Self {
        Self::with_clock(system_clock)
    }

    /// Create a decoder with a custom clock.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            buffer: Vec::new(),
            clock,
        }
    }

    /// Bytes received but not yet decoded.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Append `chunk` and decode every complete frame, in arrival order.
    ///
    /// Never fails: unknown bytes are console output and a truncated result
    /// frame simply waits for the next chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<InboundEvent> {
        let mut events = Vec::new();
        if chunk.is_empty() {
            return events;
        }

        self.buffer
            .extend_from_slice(chunk);

        let mut offset = 0;
        while offset < self.buffer.len() {
            let Some((event, consumed)) = self.decode_at(offset) else {
                trace!(
                    "Incomplete frame, keeping {} byte(s)",
                    self.buffer.len() - offset
                );
                break;
            };
            events.push(event);
            offset += consumed;
        }

        self.buffer
            .drain(..offset);
        events
    }

    fn decode_at(&self, offset: usize) -> Option<(InboundEvent, usize)> {
        let remaining = &self.buffer[offset..];
        match remaining[0] {
            TAG_ACK => Some((InboundEvent::Ack, 1)),
            TAG_RESULT => {
                if remaining.len() < RESULT_FRAME_LEN {
                    return None;
                }
                Some((InboundEvent::Result(remaining[1]), RESULT_FRAME_LEN))
            },
            TAG_PRINT_TIME => Some((
                InboundEvent::PrintTime {
                    timestamp_millis: (self.clock)(),
                },
                1,
            )),
            byte => Some((InboundEvent::Raw(byte), 1)),
        }
    }
}
