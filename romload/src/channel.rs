//! Request/response correlation over the shared inbound stream.
//!
//! The board answers a command with zero or more result frames followed by an
//! acknowledgement, interleaved with whatever the i8080 prints. The channel
//! owns the port, the [`FrameDecoder`] and the console sink for one
//! connection, and keeps at most one exchange open.
//!
//! [`CommandChannel::send`] takes `&mut self` and only returns once the
//! exchange is resolved (or failed), so a second command can never overlap
//! the first one.

use std::io::{self, ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::console::ConsoleSink;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{FrameDecoder, InboundEvent, Opcode, OutboundCommand};

/// Size of a single read from the port.
const READ_CHUNK: usize = 256;

/// Largest slice handed to a single port write.
const WRITE_BLOCK: usize = 1024;

/// Reply state of the command currently in flight.
#[derive(Debug)]
struct PendingExchange {
    opcode: Opcode,
    results: Vec<u8>,
    acked: bool,
}

impl PendingExchange {
    fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            results: Vec::new(),
            acked: false,
        }
    }
}

/// Command channel to the board.
pub struct CommandChannel<P: Port, C: ConsoleSink> {
    port: P,
    decoder: FrameDecoder,
    console: C,
    pending: Option<PendingExchange>,
    closed: bool,
    reply_timeout: Option<Duration>,
    interrupted: fn() -> bool,
}

impl<P: Port, C: ConsoleSink> CommandChannel<P, C> {
    /// Create a channel over an opened port.
    pub fn new(port: P, console: C) -> Self {
        Self::with_decoder(port, console, FrameDecoder::new())
    }

    /// Create a channel with a preconfigured decoder.
    pub fn with_decoder(port: P, console: C, decoder: FrameDecoder) -> Self {
        Self {
            port,
            decoder,
            console,
            pending: None,
            closed: false,
            reply_timeout: None,
            interrupted: crate::is_interrupted_requested,
        }
    }

    /// Fail a send whose acknowledgement takes longer than `timeout`.
    ///
    /// Without a timeout the channel waits for as long as the port stays open.
    #[must_use]
    pub fn with_reply_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Replace the global interrupt checker for this channel.
    #[must_use]
    pub fn with_interrupt_checker(mut self, checker: fn() -> bool) -> Self {
        self.interrupted = checker;
        self
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Get a mutable reference to the console sink.
    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    /// Consume the channel and return the port and console sink.
    pub fn into_parts(self) -> (P, C) {
        (self.port, self.console)
    }

    /// Whether a transport failure has made the channel unusable.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send `[opcode] ++ payload` and wait for the acknowledgement.
    ///
    /// Returns the result bytes that arrived before the acknowledgement, in
    /// arrival order. Any failure while the command is in flight closes the
    /// channel.
    pub fn send(&mut self, opcode: Opcode, payload: &[u8]) -> Result<Vec<u8>> {
        self.send_command(&OutboundCommand::new(opcode, payload.to_vec()))
    }

    /// Send a prepared command and wait for the acknowledgement.
    pub fn send_command(&mut self, command: &OutboundCommand) -> Result<Vec<u8>> {
        if self.closed {
            return Err(Error::ChannelClosed);
        }
        debug_assert!(self.pending.is_none(), "single-flight violated");

        let bytes = command.to_bytes();
        trace!(
            "Sending {} ({} payload bytes)",
            command.opcode(),
            command
                .payload()
                .len()
        );

        self.pending = Some(PendingExchange::new(command.opcode()));
        let started = Instant::now();
        if let Err(e) = self.write_command(&bytes, command.opcode(), started) {
            return Err(self.fail(e));
        }

        loop {
            if let Err(e) = self.poll() {
                return Err(self.fail(e));
            }

            if self
                .pending
                .as_ref()
                .is_some_and(|p| p.acked)
            {
                let exchange = self
                    .pending
                    .take()
                    .map(|p| p.results)
                    .unwrap_or_default();
                trace!("{} acknowledged with {} result byte(s)", command.opcode(), exchange.len());
                return Ok(exchange);
            }

            if let Err(e) = self.check_wait(command.opcode(), started) {
                return Err(self.fail(e));
            }
        }
    }

    /// Write the encoded command in blocks.
    ///
    /// A write that times out has not failed: the link is slower than the port
    /// timeout. Inbound bytes keep being drained while the write waits, and the
    /// remaining bytes go out once the device accepts them again.
    fn write_command(&mut self, bytes: &[u8], opcode: Opcode, started: Instant) -> Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            let end = (written + WRITE_BLOCK).min(bytes.len());
            match self
                .port
                .write(&bytes[written..end])
            {
                Ok(0) => return Err(Error::Io(ErrorKind::WriteZero.into())),
                Ok(n) => written += n,
                Err(e) if is_stall(&e) => {
                    trace!("Write stalled at {written}/{} bytes", bytes.len());
                    self.poll()?;
                    self.check_wait(opcode, started)?;
                },
                Err(e) => return Err(e.into()),
            }
        }

        loop {
            match self
                .port
                .flush()
            {
                Ok(()) => return Ok(()),
                Err(e) if is_stall(&e) => self.check_wait(opcode, started)?,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Fail the wait on `opcode` when interrupted or past the reply timeout.
    fn check_wait(&self, opcode: Opcode, started: Instant) -> Result<()> {
        if (self.interrupted)() {
            return Err(Error::Interrupted);
        }
        if let Some(timeout) = self.reply_timeout {
            if started.elapsed() >= timeout {
                return Err(Error::Timeout(format!(
                    "no acknowledgement for {opcode} after {} ms",
                    timeout.as_millis()
                )));
            }
        }
        Ok(())
    }

    /// Read one chunk from the port and dispatch the decoded events.
    ///
    /// Returns the number of bytes read; zero when the read timed out.
    pub fn poll(&mut self) -> Result<usize> {
        if self.closed {
            return Err(Error::ChannelClosed);
        }

        let mut buf = [0u8; READ_CHUNK];
        let n = match self
            .port
            .read(&mut buf)
        {
            Ok(n) => n,
            Err(e) if is_stall(&e) => return Ok(0),
            Err(e) => return Err(self.fail(e.into())),
        };

        for event in self
            .decoder
            .feed(&buf[..n])
        {
            self.dispatch(event);
        }
        if n > 0 {
            self.console
                .flush();
        }
        Ok(n)
    }

    /// Stream console output until the interrupt checker fires.
    pub fn follow(&mut self) -> Result<()> {
        debug!("Following console output of {}", self.port.name());
        while !(self.interrupted)() {
            self.poll()?;
        }
        Ok(())
    }

    /// Close the port. Further sends fail with [`Error::ChannelClosed`].
    pub fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.pending = None;
        self.port
            .close()
    }

    fn dispatch(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Raw(byte) => self
                .console
                .raw(byte),
            InboundEvent::PrintTime { timestamp_millis } => self
                .console
                .print_time(timestamp_millis),
            InboundEvent::Result(byte) => match self.pending {
                Some(ref mut p) if !p.acked => p
                    .results
                    .push(byte),
                _ => trace!("Ignoring result byte {byte:#04x} with no command in flight"),
            },
            InboundEvent::Ack => match self.pending {
                Some(ref mut p) if !p.acked => p.acked = true,
                _ => trace!("Ignoring acknowledgement with no command in flight"),
            },
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        if let Some(p) = self
            .pending
            .take()
        {
            warn!("{} failed: {err}", p.opcode);
        }
        self.closed = true;
        err
    }
}

/// Whether an I/O error only means the port was not ready yet.
fn is_stall(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::sim::{NOISE, PRINT_TIME_LINE, SimBoard};
    use crate::protocol::{MAX_IMAGE_LEN, TAG_ACK, TAG_RESULT};

    #[derive(Default)]
    struct Recorder {
        text: Vec<u8>,
        times: Vec<u64>,
        flushes: usize,
    }

    impl ConsoleSink for Recorder {
        fn raw(&mut self, byte: u8) {
            self.text
                .push(byte);
        }

        fn print_time(&mut self, timestamp_millis: u64) {
            self.times
                .push(timestamp_millis);
        }

        fn flush(&mut self) {
            self.flushes += 1;
        }
    }

    fn never() -> bool {
        false
    }

    fn always() -> bool {
        true
    }

    fn channel(board: SimBoard) -> CommandChannel<SimBoard, Recorder> {
        let _ = env_logger::builder()
            .is_test(true)
            .try_init();
        CommandChannel::with_decoder(board, Recorder::default(), FrameDecoder::with_clock(|| 7))
            .with_interrupt_checker(never)
    }

    #[test]
    fn test_reset_resolves_with_empty_results() {
        let mut ch = channel(SimBoard::new());
        assert_eq!(ch.send(Opcode::Reset, &[]).unwrap(), Vec::<u8>::new());
        assert!(ch.pending.is_none());
        assert_eq!(ch.port().opcodes(), vec![0x04]);
    }

    #[test]
    fn test_read_byte_with_noise_and_byte_sized_chunks() {
        let mut board = SimBoard::new();
        board.memory[0x1234] = 0x5A;
        board.noise = NOISE.to_vec();
        board.chunk_size = 1;

        let mut ch = channel(board);
        assert_eq!(ch.send(Opcode::ReadByte, &[0x12, 0x34]).unwrap(), vec![0x5A]);

        let (_, console) = ch.into_parts();
        assert_eq!(console.text, NOISE);
    }

    #[test]
    fn test_results_before_ack_are_collected_in_order() {
        let mut board = SimBoard::new();
        board.mute_after = Some(0);
        board.inject(&[TAG_RESULT, 1, b'x', TAG_RESULT, 2, TAG_RESULT, 3, TAG_ACK]);
        board.chunk_size = 3;

        let mut ch = channel(board);
        assert_eq!(ch.send(Opcode::ReadByte, &[0, 0]).unwrap(), vec![1, 2, 3]);
        assert_eq!(ch.console_mut().text, b"x");
    }

    #[test]
    fn test_replies_without_pending_exchange_are_ignored() {
        let mut board = SimBoard::new();
        board.memory[2] = 0x30;
        board.inject(&[TAG_ACK, TAG_RESULT, 0x99, b'!']);

        let mut ch = channel(board);
        assert_eq!(ch.poll().unwrap(), 4);
        assert_eq!(ch.console_mut().text, b"!");
        assert_eq!(ch.send(Opcode::ReadByte, &[0, 2]).unwrap(), vec![0x30]);
    }

    #[test]
    fn test_output_after_ack_goes_to_console() {
        let mut board = SimBoard::new();
        board.boot_output = b"READY\n".to_vec();
        board
            .boot_output
            .extend_from_slice(PRINT_TIME_LINE);

        let mut ch = channel(board);
        assert!(ch.send(Opcode::Reset, &[]).unwrap().is_empty());

        let (_, console) = ch.into_parts();
        assert_eq!(console.text, b"READY\n\n");
        assert_eq!(console.times, vec![7]);
    }

    #[test]
    fn test_result_after_ack_is_not_carried_into_next_exchange() {
        let mut board = SimBoard::new();
        board.mute_after = Some(0);
        board.inject(&[TAG_ACK, TAG_RESULT, 0x42]);

        let mut ch = channel(board);
        assert!(ch.send(Opcode::Reset, &[]).unwrap().is_empty());

        ch.port_mut().inject(&[TAG_ACK]);
        assert!(ch.send(Opcode::Reset, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_write_failure_closes_channel() {
        let mut board = SimBoard::new();
        board.fail_writes = true;

        let mut ch = channel(board);
        let err = ch.send(Opcode::Reset, &[]).unwrap_err();
        assert!(err.is_transport());
        assert!(ch.is_closed());
        assert!(ch.pending.is_none());

        ch.port_mut().fail_writes = false;
        assert!(matches!(ch.send(Opcode::Reset, &[]), Err(Error::ChannelClosed)));
    }

    #[test]
    fn test_read_failure_fails_pending_send() {
        let mut board = SimBoard::new();
        board.fail_reads = true;

        let mut ch = channel(board);
        assert!(matches!(ch.send(Opcode::ReadByte, &[0, 0]), Err(Error::Io(_))));
        assert!(ch.is_closed());
        assert!(matches!(ch.poll(), Err(Error::ChannelClosed)));
    }

    #[test]
    fn test_reply_timeout() {
        let mut board = SimBoard::new();
        board.mute_after = Some(0);

        let mut ch = channel(board).with_reply_timeout(Some(Duration::from_millis(20)));
        assert!(matches!(ch.send(Opcode::Reset, &[]), Err(Error::Timeout(_))));
        assert!(ch.is_closed());
    }

    #[test]
    fn test_interrupt_fails_pending_send() {
        let mut board = SimBoard::new();
        board.mute_after = Some(0);

        let mut ch = channel(board).with_interrupt_checker(always);
        assert!(matches!(ch.send(Opcode::Reset, &[]), Err(Error::Interrupted)));
        assert!(matches!(ch.send(Opcode::Reset, &[]), Err(Error::ChannelClosed)));
    }

    #[test]
    fn test_follow_returns_when_interrupted() {
        let mut ch = channel(SimBoard::new()).with_interrupt_checker(always);
        ch.follow().unwrap();
    }

    #[test]
    fn test_close_rejects_further_sends() {
        let mut ch = channel(SimBoard::new());
        ch.close().unwrap();
        assert!(matches!(ch.send(Opcode::Reset, &[]), Err(Error::ChannelClosed)));
    }

    #[test]
    fn test_console_flushed_once_per_chunk() {
        let mut board = SimBoard::new();
        board.inject(b"hello\nworld\n");

        let mut ch = channel(board);
        assert_eq!(ch.poll().unwrap(), 12);
        assert_eq!(ch.poll().unwrap(), 0);

        let (_, console) = ch.into_parts();
        assert_eq!(console.text, b"hello\nworld\n");
        assert_eq!(console.flushes, 1);
    }

    #[test]
    fn test_stalled_write_resumes_where_it_stopped() {
        let mut board = SimBoard::new();
        board.stall_writes = 3;
        board.write_chunk = 700;

        let image = vec![0x55; MAX_IMAGE_LEN];
        let mut ch = channel(board);
        let results = ch
            .send_command(&OutboundCommand::write_dump(&image).unwrap())
            .unwrap();
        assert!(results.is_empty());
        assert!(!ch.is_closed());

        let board = ch.port();
        assert_eq!(board.stall_writes, 0);
        assert!(board.write_calls > 3);
        assert_eq!(board.opcodes(), vec![0x01]);
        assert_eq!(board.commands[0].len(), 3 + MAX_IMAGE_LEN);
        assert!(board.memory[..MAX_IMAGE_LEN].iter().all(|&b| b == 0x55));
    }

    #[test]
    fn test_write_stall_drains_console_output() {
        let mut board = SimBoard::new();
        board.stall_writes = 1;
        board.inject(b"busy");

        let mut ch = channel(board);
        assert!(ch.send(Opcode::Reset, &[]).unwrap().is_empty());
        assert_eq!(ch.console_mut().text, b"busy");
    }

    #[test]
    fn test_write_stall_honours_reply_timeout() {
        let mut board = SimBoard::new();
        board.stall_writes = usize::MAX;

        let mut ch = channel(board).with_reply_timeout(Some(Duration::from_millis(20)));
        assert!(matches!(ch.send(Opcode::Reset, &[]), Err(Error::Timeout(_))));
        assert!(ch.is_closed());
        assert!(ch.port().commands.is_empty());
    }

    #[test]
    fn test_write_stall_honours_interrupt() {
        let mut board = SimBoard::new();
        board.stall_writes = usize::MAX;

        let mut ch = channel(board).with_interrupt_checker(always);
        assert!(matches!(ch.send(Opcode::Reset, &[]), Err(Error::Interrupted)));
        assert_eq!(ch.port().write_calls, 1);
    }
}
