//! Client → engine instructions.
//!
//! Each instruction arrives as a 32-byte header followed by a typed
//! payload. Decoding is one exhaustive match over the type tag;
//! anything malformed or unknown is an error the transport drops and
//! logs, never a panic.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::EngineError;
use crate::wire::header::{InstructionFlags, InstructionHeader, SessionId};

/// Wire type tags for instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum InstructionType {
    Windows = 2,
    Image = 3,
    Screen = 4,
    Mouse = 5,
    Keyboard = 6,
    Cursor = 7,
    Quality = 8,
    Pong = 9,
    DataAck = 10,
    Clipboard = 11,
    Shape = 12,
    ScreenResize = 13,
    KeyboardLayout = 14,
}

impl TryFrom<u32> for InstructionType {
    type Error = EngineError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::Windows),
            3 => Ok(Self::Image),
            4 => Ok(Self::Screen),
            5 => Ok(Self::Mouse),
            6 => Ok(Self::Keyboard),
            7 => Ok(Self::Cursor),
            8 => Ok(Self::Quality),
            9 => Ok(Self::Pong),
            10 => Ok(Self::DataAck),
            11 => Ok(Self::Clipboard),
            12 => Ok(Self::Shape),
            13 => Ok(Self::ScreenResize),
            14 => Ok(Self::KeyboardLayout),
            other => Err(EngineError::UnknownVariant {
                type_name: "InstructionType",
                value: other as u64,
            }),
        }
    }
}

/// Typed instruction payload.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /// Request the current window list.
    Windows,
    /// Request a full image of one window.
    Image { window_id: u32 },
    /// Request screen dimensions and engine version.
    Screen,
    /// Pointer movement / button state.
    Mouse { x: i32, y: i32, button_mask: u32 },
    /// Key press or release.
    Keyboard { key: u32, pressed: bool },
    /// Request a cursor image.
    Cursor { cursor_id: i32 },
    /// Ask to be moved to a quality tier.
    Quality { quality_index: u32 },
    /// Reply to a ping; echoes the ping's send timestamp.
    Pong { send_timestamp_ms: u64 },
    /// Acknowledge received image data; echoes the send timestamp.
    DataAck {
        send_timestamp_ms: u64,
        data_length: u32,
    },
    /// Client-side clipboard content changed.
    Clipboard { content: String },
    /// Request a window's shape mask.
    Shape { window_id: u32 },
    /// Ask for the screen to be resized.
    ScreenResize { width: i32, height: i32 },
    /// Ask for a keyboard layout change.
    KeyboardLayout { layout: String },
}

impl InstructionKind {
    pub fn instruction_type(&self) -> InstructionType {
        match self {
            Self::Windows => InstructionType::Windows,
            Self::Image { .. } => InstructionType::Image,
            Self::Screen => InstructionType::Screen,
            Self::Mouse { .. } => InstructionType::Mouse,
            Self::Keyboard { .. } => InstructionType::Keyboard,
            Self::Cursor { .. } => InstructionType::Cursor,
            Self::Quality { .. } => InstructionType::Quality,
            Self::Pong { .. } => InstructionType::Pong,
            Self::DataAck { .. } => InstructionType::DataAck,
            Self::Clipboard { .. } => InstructionType::Clipboard,
            Self::Shape { .. } => InstructionType::Shape,
            Self::ScreenResize { .. } => InstructionType::ScreenResize,
            Self::KeyboardLayout { .. } => InstructionType::KeyboardLayout,
        }
    }
}

/// A decoded instruction frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub client_id: u32,
    pub id: u32,
    pub synchronous: bool,
    pub kind: InstructionKind,
}

impl Instruction {
    /// Decode one complete instruction frame.
    pub fn decode(mut data: Bytes) -> Result<Self, EngineError> {
        let header = InstructionHeader::decode(&mut data)?;
        let instruction_type = InstructionType::try_from(header.instruction_type)?;

        let kind = match instruction_type {
            InstructionType::Windows => InstructionKind::Windows,
            InstructionType::Screen => InstructionKind::Screen,
            InstructionType::Image => InstructionKind::Image {
                window_id: take_u32(&mut data)?,
            },
            InstructionType::Mouse => InstructionKind::Mouse {
                x: take_i32(&mut data)?,
                y: take_i32(&mut data)?,
                button_mask: take_u32(&mut data)?,
            },
            InstructionType::Keyboard => InstructionKind::Keyboard {
                key: take_u32(&mut data)?,
                pressed: take_u32(&mut data)? > 0,
            },
            InstructionType::Cursor => InstructionKind::Cursor {
                cursor_id: take_i32(&mut data)?,
            },
            InstructionType::Quality => InstructionKind::Quality {
                quality_index: take_u32(&mut data)?,
            },
            InstructionType::Pong => InstructionKind::Pong {
                send_timestamp_ms: take_u64(&mut data)?,
            },
            InstructionType::DataAck => InstructionKind::DataAck {
                send_timestamp_ms: take_u64(&mut data)?,
                data_length: take_u32(&mut data)?,
            },
            InstructionType::Clipboard => InstructionKind::Clipboard {
                content: take_string(&mut data)?,
            },
            InstructionType::Shape => InstructionKind::Shape {
                window_id: take_u32(&mut data)?,
            },
            InstructionType::ScreenResize => InstructionKind::ScreenResize {
                width: take_i32(&mut data)?,
                height: take_i32(&mut data)?,
            },
            InstructionType::KeyboardLayout => InstructionKind::KeyboardLayout {
                layout: take_string(&mut data)?,
            },
        };

        Ok(Self {
            client_id: header.client_id,
            id: header.instruction_id,
            synchronous: header.flags.contains(InstructionFlags::SYNCHRONOUS),
            kind,
        })
    }

    /// Encode a complete instruction frame (client side of the wire).
    pub fn encode(&self, session_id: SessionId) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        let flags = if self.synchronous {
            InstructionFlags::SYNCHRONOUS
        } else {
            InstructionFlags::empty()
        };
        InstructionHeader {
            session_id,
            client_id: self.client_id,
            instruction_type: self.kind.instruction_type() as u32,
            flags,
            instruction_id: self.id,
        }
        .encode_into(&mut buf);

        match &self.kind {
            InstructionKind::Windows | InstructionKind::Screen => {}
            InstructionKind::Image { window_id } | InstructionKind::Shape { window_id } => {
                buf.put_u32_le(*window_id);
            }
            InstructionKind::Mouse { x, y, button_mask } => {
                buf.put_i32_le(*x);
                buf.put_i32_le(*y);
                buf.put_u32_le(*button_mask);
            }
            InstructionKind::Keyboard { key, pressed } => {
                buf.put_u32_le(*key);
                buf.put_u32_le(u32::from(*pressed));
            }
            InstructionKind::Cursor { cursor_id } => {
                buf.put_i32_le(*cursor_id);
            }
            InstructionKind::Quality { quality_index } => {
                buf.put_u32_le(*quality_index);
            }
            InstructionKind::Pong { send_timestamp_ms } => {
                buf.put_u64_le(*send_timestamp_ms);
            }
            InstructionKind::DataAck {
                send_timestamp_ms,
                data_length,
            } => {
                buf.put_u64_le(*send_timestamp_ms);
                buf.put_u32_le(*data_length);
            }
            InstructionKind::Clipboard { content } => {
                buf.put_u32_le(content.len() as u32);
                buf.put_slice(content.as_bytes());
            }
            InstructionKind::ScreenResize { width, height } => {
                buf.put_i32_le(*width);
                buf.put_i32_le(*height);
            }
            InstructionKind::KeyboardLayout { layout } => {
                buf.put_u32_le(layout.len() as u32);
                buf.put_slice(layout.as_bytes());
            }
        }

        buf.freeze()
    }
}

// ── Field readers ────────────────────────────────────────────────

fn take_u32(data: &mut Bytes) -> Result<u32, EngineError> {
    require(data, 4)?;
    Ok(data.get_u32_le())
}

fn take_i32(data: &mut Bytes) -> Result<i32, EngineError> {
    require(data, 4)?;
    Ok(data.get_i32_le())
}

fn take_u64(data: &mut Bytes) -> Result<u64, EngineError> {
    require(data, 8)?;
    Ok(data.get_u64_le())
}

fn take_string(data: &mut Bytes) -> Result<String, EngineError> {
    let length = take_u32(data)? as usize;
    require(data, length)?;
    Ok(String::from_utf8(data.copy_to_bytes(length).to_vec())?)
}

fn require(data: &Bytes, needed: usize) -> Result<(), EngineError> {
    if data.remaining() < needed {
        Err(EngineError::TruncatedFrame {
            expected: needed,
            actual: data.remaining(),
        })
    } else {
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
