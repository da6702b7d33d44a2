//! Binary wire protocol: message and instruction framing.

pub mod header;
pub mod instruction;
pub mod message;

pub use header::{
    INSTRUCTION_HEADER_LENGTH, InstructionFlags, InstructionHeader, MESSAGE_HEADER_LENGTH,
    MessageHeader, SessionId,
};
pub use instruction::{Instruction, InstructionKind, InstructionType};
pub use message::{Message, MessageEncoder, MessageType, SubImage, epoch_ms, image_type_tag};
