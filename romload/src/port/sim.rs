//! Simulated board for tests.
//!
//! Behaves like the STM32 bridge firmware: parses host commands out of the
//! written bytes, keeps 64 KiB of i8080 memory and queues replies that the
//! next reads hand back in chunks of a configurable size.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};

use crate::error::Result;
use crate::port::Port;
use crate::protocol::{Opcode, TAG_ACK, TAG_PRINT_TIME, TAG_RESULT};

pub(crate) struct SimBoard {
    pub(crate) memory: Vec<u8>,
    /// Every complete command received, as raw bytes.
    pub(crate) commands: Vec<Vec<u8>>,
    /// Console text inserted in front of every reply.
    pub(crate) noise: Vec<u8>,
    /// Replies are handed out at most this many bytes per read.
    pub(crate) chunk_size: usize,
    /// Addresses whose read-back value is replaced.
    pub(crate) corrupt: HashMap<u16, u8>,
    /// Output emitted once the i8080 is released from reset.
    pub(crate) boot_output: Vec<u8>,
    /// Stop answering after this many commands.
    pub(crate) mute_after: Option<usize>,
    pub(crate) fail_writes: bool,
    pub(crate) fail_reads: bool,
    /// Number of upcoming writes that time out without accepting anything.
    pub(crate) stall_writes: usize,
    /// A single write accepts at most this many bytes.
    pub(crate) write_chunk: usize,
    /// Number of write calls made, including stalled ones.
    pub(crate) write_calls: usize,
    /// Send the ack of read commands without the result frame.
    pub(crate) drop_results: bool,
    rx: Vec<u8>,
    tx: VecDeque<u8>,
    closed: bool,
}

impl SimBoard {
    pub(crate) fn new() -> Self {
        Self {
            memory: vec![0; 0x1_0000],
            commands: Vec::new(),
            noise: Vec::new(),
            chunk_size: usize::MAX,
            corrupt: HashMap::new(),
            boot_output: Vec::new(),
            mute_after: None,
            fail_writes: false,
            fail_reads: false,
            stall_writes: 0,
            write_chunk: usize::MAX,
            write_calls: 0,
            drop_results: false,
            rx: Vec::new(),
            tx: VecDeque::new(),
            closed: false,
        }
    }

    /// Queue unsolicited bytes as if the board sent them.
    pub(crate) fn inject(&mut self, bytes: &[u8]) {
        self.tx
            .extend(bytes);
    }

    /// Opcode and payload of every command received so far.
    pub(crate) fn opcodes(&self) -> Vec<u8> {
        self.commands
            .iter()
            .map(|c| c[0])
            .collect()
    }

    /// Addresses of the read-byte commands received, in order.
    pub(crate) fn read_addresses(&self) -> Vec<u16> {
        self.commands
            .iter()
            .filter(|c| c[0] == Opcode::ReadByte.as_byte())
            .map(|c| u16::from_be_bytes([c[1], c[2]]))
            .collect()
    }

    fn command_len(&self) -> Option<usize> {
        let opcode = *self
            .rx
            .first()?;
        match opcode {
            0x01 => {
                if self.rx.len() < 3 {
                    return None;
                }
                Some(3 + usize::from(u16::from_be_bytes([self.rx[1], self.rx[2]])))
            },
            0x02 => Some(4),
            0x03 => Some(3),
            _ => Some(1),
        }
    }

    fn process_commands(&mut self) {
        while let Some(len) = self.command_len() {
            if self.rx.len() < len {
                break;
            }
            let cmd: Vec<u8> = self
                .rx
                .drain(..len)
                .collect();
            self.execute(&cmd);
            self.commands
                .push(cmd);
        }
    }

    fn execute(&mut self, cmd: &[u8]) {
        let muted = self
            .mute_after
            .is_some_and(|n| self.commands.len() >= n);

        let mut reply = self.noise.clone();
        match cmd[0] {
            0x01 => {
                let len = usize::from(u16::from_be_bytes([cmd[1], cmd[2]]));
                for (i, &b) in cmd[3..]
                    .iter()
                    .enumerate()
                {
                    self.memory[len - 1 - i] = b;
                }
            },
            0x02 => {
                let addr = u16::from_be_bytes([cmd[1], cmd[2]]);
                self.memory[usize::from(addr)] = cmd[3];
            },
            0x03 => {
                let addr = u16::from_be_bytes([cmd[1], cmd[2]]);
                let value = self
                    .corrupt
                    .get(&addr)
                    .copied()
                    .unwrap_or(self.memory[usize::from(addr)]);
                if !self.drop_results {
                    reply.extend_from_slice(&[TAG_RESULT, value]);
                }
            },
            _ => {},
        }
        reply.push(TAG_ACK);
        if cmd[0] == 0x04 {
            reply.extend_from_slice(&self.boot_output);
        }

        if !muted {
            self.tx
                .extend(reply);
        }
    }
}

impl Read for SimBoard {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if self.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        if self.tx.is_empty() {
            return Err(io::ErrorKind::TimedOut.into());
        }
        let n = buf
            .len()
            .min(self.chunk_size)
            .min(self.tx.len());
        for (slot, byte) in buf
            .iter_mut()
            .zip(
                self.tx
                    .drain(..n),
            )
        {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimBoard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        self.write_calls += 1;
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        if self.stall_writes > 0 {
            self.stall_writes -= 1;
            return Err(io::ErrorKind::TimedOut.into());
        }
        let n = buf
            .len()
            .min(self.write_chunk);
        self.rx
            .extend_from_slice(&buf[..n]);
        self.process_commands();
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimBoard {
    fn name(&self) -> &str {
        "sim"
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Console noise that cannot be mistaken for a control tag.
pub(crate) const NOISE: &[u8] = b"i8080> ";

/// A print-time marker followed by a newline.
pub(crate) const PRINT_TIME_LINE: &[u8] = &[TAG_PRINT_TIME, b'\n'];
