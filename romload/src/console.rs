//! Console output from the board.
//!
//! Everything on the inbound stream that is not a command reply ends up in a
//! [`ConsoleSink`]: raw bytes printed by the i8080 program and print-time
//! markers.

use std::io::Write;

use log::warn;

/// Receiver for the console half of the inbound stream.
pub trait ConsoleSink {
    /// A byte of program output.
    fn raw(&mut self, byte: u8);

    /// The board asked for the current host time.
    fn print_time(&mut self, timestamp_millis: u64);

    /// Called once per inbound chunk, after its events were delivered.
    fn flush(&mut self) {}
}

/// Sink that discards console output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsole;

impl ConsoleSink for NullConsole {
    fn raw(&mut self, _byte: u8) {}

    fn print_time(&mut self, _timestamp_millis: u64) {}
}

/// Sink that echoes console output as text to a writer (usually stdout).
///
/// Bytes are decoded as UTF-8 with lossy replacement. An incomplete multi-byte
/// sequence is held back until the rest of it arrives.
pub struct ConsoleEcho<W: Write> {
    out: W,
    pending: Vec<u8>,
    failed: bool,
}

impl<W: Write> ConsoleEcho<W> {
    /// Echo to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out,
            pending: Vec::new(),
            failed: false,
        }
    }

    /// Consume the sink and return the writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, text: &str) {
        if self.failed || text.is_empty() {
            return;
        }
        let result = self
            .out
            .write_all(text.as_bytes());
        self.check(result);
    }

    fn check(&mut self, result: std::io::Result<()>) {
        if let Err(e) = result {
            // Console output is best effort; keep the protocol running.
            warn!("Console output disabled: {e}");
            self.failed = true;
        }
    }
}

impl<W: Write> ConsoleSink for ConsoleEcho<W> {
    fn raw(&mut self, byte: u8) {
        self.pending.push(byte);
        let text = drain_utf8_lossy(&mut self.pending);
        self.emit(&text);
    }

    fn print_time(&mut self, timestamp_millis: u64) {
        let text = format_print_time(timestamp_millis);
        self.emit(&text);
    }

    fn flush(&mut self) {
        if self.failed {
            return;
        }
        let result = self
            .out
            .flush();
        self.check(result);
    }
}

/// Text printed for a print-time marker.
pub fn format_print_time(timestamp_millis: u64) -> String {
    format!("\nCurrent time: {timestamp_millis}ms\n")
}

/// Drain buffered bytes into displayable UTF-8 text without stalling on invalid bytes.
///
/// - Valid UTF-8 is emitted as-is.
/// - Invalid byte sequences emit the replacement char `�` and continue.
/// - Incomplete UTF-8 suffix is kept in `buffer` for the next call.
pub fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            },
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if let Ok(valid) = std::str::from_utf8(&buffer[..valid_up_to]) {
                    output.push_str(valid);
                }

                if let Some(invalid_len) = err.error_len() {
                    output.push('\u{FFFD}');
                    let drain_to = (valid_up_to + invalid_len).min(buffer.len());
                    buffer.drain(..drain_to);
                } else {
                    buffer.drain(..valid_up_to);
                    break;
                }
            },
        }
    }

    output
}
