//! Wire protocol between the host and the board.

pub mod command;
pub mod frame;

// Re-export common types
pub use command::{MAX_IMAGE_LEN, Opcode, OutboundCommand};
pub use frame::{FrameDecoder, InboundEvent, TAG_ACK, TAG_PRINT_TIME, TAG_RESULT};
