//! Outbound commands (host → board).
//!
//! A command is its opcode byte followed by the payload. Addresses and the
//! image size are 16-bit big-endian fields.

use byteorder::{BigEndian, WriteBytesExt};
use std::fmt;

use crate::error::{Error, Result};

/// Largest image the 16-bit size field can describe.
pub const MAX_IMAGE_LEN: usize = u16::MAX as usize;

/// Command opcodes understood by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Load a whole memory image (0x01).
    WriteDump = 0x01,
    /// Write one byte of memory (0x02).
    WriteByte = 0x02,
    /// Read one byte of memory (0x03).
    ReadByte = 0x03,
    /// Release the i8080 from reset (0x04).
    Reset = 0x04,
}

impl Opcode {
    /// Wire value of the opcode.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WriteDump => "WriteDump",
            Self::WriteByte => "WriteByte",
            Self::ReadByte => "ReadByte",
            Self::Reset => "Reset",
        };
        f.write_str(name)
    }
}

/// A command ready to be sent on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCommand {
    opcode: Opcode,
    payload: Vec<u8>,
}

impl OutboundCommand {
    /// Create a command with an arbitrary payload.
    pub fn new(opcode: Opcode, payload: Vec<u8>) -> Self {
        Self { opcode, payload }
    }

    /// Build the write-dump command for `image`.
    ///
    /// The board fills memory from the top address down, so the image bytes
    /// go out last byte first, after the big-endian length.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn write_dump(image: &[u8]) -> Result<Self> {
        let len = u16::try_from(image.len()).map_err(|_| Error::ImageTooLarge {
            len: image.len(),
        })?;

        let mut payload = Vec::with_capacity(2 + image.len());
        payload
            .write_u16::<BigEndian>(len)
            .unwrap();
        payload.extend(
            image
                .iter()
                .rev(),
        );
        Ok(Self::new(Opcode::WriteDump, payload))
    }

    /// Build a single-byte write.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn write_byte(addr: u16, value: u8) -> Self {
        let mut payload = Vec::with_capacity(3);
        payload
            .write_u16::<BigEndian>(addr)
            .unwrap();
        payload.push(value);
        Self::new(Opcode::WriteByte, payload)
    }

    /// Build a single-byte read.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn read_byte(addr: u16) -> Self {
        let mut payload = Vec::with_capacity(2);
        payload
            .write_u16::<BigEndian>(addr)
            .unwrap();
        Self::new(Opcode::ReadByte, payload)
    }

    /// Build the reset command.
    pub fn reset() -> Self {
        Self::new(Opcode::Reset, Vec::new())
    }

    /// Command opcode.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Command payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialize as `[opcode] ++ payload`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.payload.len());
        buf.push(self.opcode.as_byte());
        buf.extend_from_slice(&self.payload);
        buf
    }
}
