//! Fixed frame headers, little-endian throughout.
//!
//! ## Message header (48 bytes, engine → client)
//!
//! ```text
//! session_id:         [u8; 16]
//! client_index_mask:  u64   (8)
//! timestamp_ms:       u64   (8)  epoch milliseconds at send
//! message_type:       u32   (4)
//! message_id:         u32   (4)  global counter
//! buffer_length:      u32   (4)  total frame length incl. header
//! padding:            [u8; 4]
//! ```
//!
//! ## Instruction header (32 bytes, client → engine)
//!
//! ```text
//! session_id:         [u8; 16]
//! client_id:          u32   (4)
//! details:            u32   (4)  low 31 bits: type, high bit: flags
//! instruction_id:     u32   (4)
//! padding:            u32   (4)
//! ```

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};

use crate::error::EngineError;

/// Opaque 16-byte session identifier negotiated at connect time.
pub type SessionId = [u8; 16];

/// Encoded message header size.
pub const MESSAGE_HEADER_LENGTH: usize = 48;

/// Encoded instruction header size.
pub const INSTRUCTION_HEADER_LENGTH: usize = 32;

bitflags! {
    /// Flag bits carried in the high bits of the instruction `details`
    /// word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InstructionFlags: u32 {
        /// The client expects a direct response correlated by
        /// instruction id.
        const SYNCHRONOUS = 0x8000_0000;
    }
}

/// Mask selecting the instruction type tag out of `details`.
pub const INSTRUCTION_TYPE_MASK: u32 = !InstructionFlags::all().bits();

// ── MessageHeader ────────────────────────────────────────────────

/// Fixed preamble of every engine → client frame.
#[derive(Debug, Clone, Copy)]
pub struct MessageHeader {
    pub session_id: SessionId,
    pub client_index_mask: u64,
    pub timestamp_ms: u64,
    pub message_type: u32,
    pub message_id: u32,
    pub buffer_length: u32,
}

impl MessageHeader {
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.session_id);
        buf.put_u64_le(self.client_index_mask);
        buf.put_u64_le(self.timestamp_ms);
        buf.put_u32_le(self.message_type);
        buf.put_u32_le(self.message_id);
        buf.put_u32_le(self.buffer_length);
        buf.put_bytes(0, 4);
    }

    pub fn decode(data: &mut impl Buf) -> Result<Self, EngineError> {
        if data.remaining() < MESSAGE_HEADER_LENGTH {
            return Err(EngineError::TruncatedFrame {
                expected: MESSAGE_HEADER_LENGTH,
                actual: data.remaining(),
            });
        }
        let mut session_id = [0u8; 16];
        data.copy_to_slice(&mut session_id);
        let header = Self {
            session_id,
            client_index_mask: data.get_u64_le(),
            timestamp_ms: data.get_u64_le(),
            message_type: data.get_u32_le(),
            message_id: data.get_u32_le(),
            buffer_length: data.get_u32_le(),
        };
        data.advance(4);
        Ok(header)
    }
}

// ── InstructionHeader ────────────────────────────────────────────

/// Fixed preamble of every client → engine frame.
#[derive(Debug, Clone, Copy)]
pub struct InstructionHeader {
    pub session_id: SessionId,
    pub client_id: u32,
    pub instruction_type: u32,
    pub flags: InstructionFlags,
    pub instruction_id: u32,
}

impl InstructionHeader {
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.session_id);
        buf.put_u32_le(self.client_id);
        buf.put_u32_le(self.instruction_type | self.flags.bits());
        buf.put_u32_le(self.instruction_id);
        buf.put_u32_le(0);
    }

    pub fn decode(data: &mut impl Buf) -> Result<Self, EngineError> {
        if data.remaining() < INSTRUCTION_HEADER_LENGTH {
            return Err(EngineError::TruncatedFrame {
                expected: INSTRUCTION_HEADER_LENGTH,
                actual: data.remaining(),
            });
        }
        let mut session_id = [0u8; 16];
        data.copy_to_slice(&mut session_id);
        let client_id = data.get_u32_le();
        let details = data.get_u32_le();
        let instruction_id = data.get_u32_le();
        data.advance(4);
        Ok(Self {
            session_id,
            client_id,
            instruction_type: details & INSTRUCTION_TYPE_MASK,
            flags: InstructionFlags::from_bits_truncate(details),
            instruction_id,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
