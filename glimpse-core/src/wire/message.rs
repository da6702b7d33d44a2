//! Engine → client messages.
//!
//! Every message starts with the 48-byte [`MessageHeader`]. Messages
//! answering a query carry the query's instruction id as the first
//! payload word (`command_id`, 0 for unsolicited broadcasts); Ping,
//! Disconnect, Quality and Clipboard carry none.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::EngineError;
use crate::models::{EngineVersion, MAX_QUALITY_INDEX, Quality, Rectangle, WindowProperties};
use crate::wire::header::{MESSAGE_HEADER_LENGTH, MessageHeader, SessionId};

/// Wire type tags for messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    Windows = 2,
    Image = 3,
    Screen = 4,
    Subimages = 5,
    Mouse = 6,
    CursorImage = 7,
    Ping = 8,
    Disconnect = 9,
    Quality = 10,
    Clipboard = 11,
}

impl TryFrom<u32> for MessageType {
    type Error = EngineError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::Windows),
            3 => Ok(Self::Image),
            4 => Ok(Self::Screen),
            5 => Ok(Self::Subimages),
            6 => Ok(Self::Mouse),
            7 => Ok(Self::CursorImage),
            8 => Ok(Self::Ping),
            9 => Ok(Self::Disconnect),
            10 => Ok(Self::Quality),
            11 => Ok(Self::Clipboard),
            other => Err(EngineError::UnknownVariant {
                type_name: "MessageType",
                value: other as u64,
            }),
        }
    }
}

/// One encoded sub-image within a [`Message::Subimages`] frame.
#[derive(Debug, Clone)]
pub struct SubImage {
    pub rectangle: Rectangle,
    pub depth: u32,
    pub type_tag: [u8; 4],
    pub rgb: Bytes,
    pub alpha: Option<Bytes>,
}

/// Typed message payload.
#[derive(Debug, Clone)]
pub enum Message {
    /// Current layout of visible windows.
    Windows {
        command_id: u32,
        windows: Vec<WindowProperties>,
    },
    /// Full image of one window. Alpha is omitted when unchanged.
    Image {
        command_id: u32,
        window_id: u32,
        depth: u32,
        type_tag: [u8; 4],
        rgb: Bytes,
        alpha: Option<Bytes>,
    },
    /// Screen dimensions, quality ceiling and engine version.
    Screen {
        command_id: u32,
        width: i32,
        height: i32,
        version: EngineVersion,
    },
    /// Damaged sub-rectangles of one window.
    Subimages {
        command_id: u32,
        window_id: u32,
        images: Vec<SubImage>,
    },
    /// Pointer position and cursor id.
    Mouse {
        command_id: u32,
        x: i32,
        y: i32,
        cursor_id: u32,
    },
    /// Cursor bitmap with hotspot.
    CursorImage {
        command_id: u32,
        x: i32,
        y: i32,
        xhot: i32,
        yhot: i32,
        cursor_id: u32,
        data: Bytes,
    },
    /// Keepalive probe; the client echoes the header timestamp back.
    Ping,
    /// The engine is dropping this client.
    Disconnect,
    /// The client's current quality tier parameters.
    Quality { quality: Quality },
    /// Server-side clipboard content changed.
    Clipboard { content: String },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Windows { .. } => MessageType::Windows,
            Self::Image { .. } => MessageType::Image,
            Self::Screen { .. } => MessageType::Screen,
            Self::Subimages { .. } => MessageType::Subimages,
            Self::Mouse { .. } => MessageType::Mouse,
            Self::CursorImage { .. } => MessageType::CursorImage,
            Self::Ping => MessageType::Ping,
            Self::Disconnect => MessageType::Disconnect,
            Self::Quality { .. } => MessageType::Quality,
            Self::Clipboard { .. } => MessageType::Clipboard,
        }
    }

    fn payload_length(&self) -> usize {
        match self {
            Self::Windows { windows, .. } => 8 + windows.len() * 20,
            Self::Image { rgb, alpha, .. } => {
                24 + rgb.len() + alpha.as_ref().map_or(0, Bytes::len)
            }
            Self::Screen { .. } => 28,
            Self::Subimages { images, .. } => {
                12 + images
                    .iter()
                    .map(|i| 32 + aligned(i.rgb.len() + i.alpha.as_ref().map_or(0, Bytes::len)))
                    .sum::<usize>()
            }
            Self::Mouse { .. } => 16,
            Self::CursorImage { data, .. } => 28 + data.len(),
            Self::Ping | Self::Disconnect => 0,
            Self::Quality { .. } => 20,
            Self::Clipboard { content } => 4 + content.len(),
        }
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            Self::Windows {
                command_id,
                windows,
            } => {
                buf.put_u32_le(*command_id);
                buf.put_u32_le(windows.len() as u32);
                for w in windows {
                    buf.put_u32_le(w.id);
                    buf.put_i32_le(w.x);
                    buf.put_i32_le(w.y);
                    buf.put_i32_le(w.width);
                    buf.put_i32_le(w.height);
                }
            }
            Self::Image {
                command_id,
                window_id,
                depth,
                type_tag,
                rgb,
                alpha,
            } => {
                buf.put_u32_le(*command_id);
                buf.put_u32_le(*window_id);
                buf.put_u32_le(*depth);
                buf.put_slice(type_tag);
                buf.put_u32_le(rgb.len() as u32);
                buf.put_u32_le(alpha.as_ref().map_or(0, Bytes::len) as u32);
                buf.put_slice(rgb);
                if let Some(alpha) = alpha {
                    buf.put_slice(alpha);
                }
            }
            Self::Screen {
                command_id,
                width,
                height,
                version,
            } => {
                buf.put_u32_le(*command_id);
                buf.put_i32_le(*width);
                buf.put_i32_le(*height);
                buf.put_u32_le(MAX_QUALITY_INDEX);
                buf.put_u32_le(version.major);
                buf.put_u32_le(version.minor);
                buf.put_u32_le(version.patch);
            }
            Self::Subimages {
                command_id,
                window_id,
                images,
            } => {
                buf.put_u32_le(*command_id);
                buf.put_u32_le(*window_id);
                buf.put_u32_le(images.len() as u32);
                for image in images {
                    buf.put_i32_le(image.rectangle.x);
                    buf.put_i32_le(image.rectangle.y);
                    buf.put_i32_le(image.rectangle.size.width);
                    buf.put_i32_le(image.rectangle.size.height);
                    buf.put_u32_le(image.depth);
                    buf.put_slice(&image.type_tag);
                    buf.put_u32_le(image.rgb.len() as u32);
                    buf.put_u32_le(image.alpha.as_ref().map_or(0, Bytes::len) as u32);
                    buf.put_slice(&image.rgb);
                    if let Some(alpha) = &image.alpha {
                        buf.put_slice(alpha);
                    }
                    // The rgb and alpha planes sit back to back; one pad
                    // realigns the pair for the next sub-image record.
                    let blob_len =
                        image.rgb.len() + image.alpha.as_ref().map_or(0, Bytes::len);
                    buf.put_bytes(0, aligned(blob_len) - blob_len);
                }
            }
            Self::Mouse {
                command_id,
                x,
                y,
                cursor_id,
            } => {
                buf.put_u32_le(*command_id);
                buf.put_i32_le(*x);
                buf.put_i32_le(*y);
                buf.put_u32_le(*cursor_id);
            }
            Self::CursorImage {
                command_id,
                x,
                y,
                xhot,
                yhot,
                cursor_id,
                data,
            } => {
                buf.put_u32_le(*command_id);
                buf.put_i32_le(*x);
                buf.put_i32_le(*y);
                buf.put_i32_le(*xhot);
                buf.put_i32_le(*yhot);
                buf.put_u32_le(*cursor_id);
                buf.put_u32_le(data.len() as u32);
                buf.put_slice(data);
            }
            Self::Ping | Self::Disconnect => {}
            Self::Quality { quality } => {
                buf.put_u32_le(quality.index);
                buf.put_f32_le(quality.image_fps);
                buf.put_f32_le(quality.rgb_quality);
                buf.put_f32_le(quality.alpha_quality);
                buf.put_f32_le(quality.max_mbps);
            }
            Self::Clipboard { content } => {
                buf.put_u32_le(content.len() as u32);
                buf.put_slice(content.as_bytes());
            }
        }
    }
}

/// Round `n` up to the next multiple of four.
fn aligned(n: usize) -> usize {
    (n + 3) & !3
}

/// Build a 4-byte image type tag from a file extension, NUL padded.
pub fn image_type_tag(extension: &str) -> [u8; 4] {
    let mut tag = [0u8; 4];
    for (slot, byte) in tag.iter_mut().zip(extension.bytes()) {
        *slot = byte;
    }
    tag
}

// ── MessageEncoder ───────────────────────────────────────────────

/// Stamps messages with the session id, a global message counter and
/// the send timestamp, and frames them for the wire.
#[derive(Debug)]
pub struct MessageEncoder {
    session_id: SessionId,
    next_message_id: AtomicU32,
}

impl MessageEncoder {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            next_message_id: AtomicU32::new(1),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Encode for the clients selected by `recipient_mask`, stamped
    /// with the current wall clock.
    pub fn encode(&self, recipient_mask: u64, message: &Message) -> Bytes {
        self.encode_at(recipient_mask, message, epoch_ms())
    }

    /// Encode with an explicit timestamp (useful for testing).
    pub fn encode_at(&self, recipient_mask: u64, message: &Message, timestamp_ms: u64) -> Bytes {
        let payload_length = message.payload_length();
        let total = MESSAGE_HEADER_LENGTH + payload_length;
        let mut buf = BytesMut::with_capacity(total);

        MessageHeader {
            session_id: self.session_id,
            client_index_mask: recipient_mask,
            timestamp_ms,
            message_type: message.message_type() as u32,
            message_id: self.next_message_id.fetch_add(1, Ordering::Relaxed),
            buffer_length: total as u32,
        }
        .encode_into(&mut buf);
        message.encode_payload(&mut buf);

        debug_assert_eq!(buf.len(), total);
        buf.freeze()
    }
}

/// Milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::header::MessageHeader;

    const SESSION: SessionId = [3; 16];

    fn header_of(frame: &Bytes) -> MessageHeader {
        MessageHeader::decode(&mut frame.clone()).unwrap()
    }

    #[test]
    fn screen_message_layout() {
        let encoder = MessageEncoder::new(SESSION);
        let frame = encoder.encode_at(
            0x1,
            &Message::Screen {
                command_id: 17,
                width: 1920,
                height: 1080,
                version: EngineVersion::new(1, 2, 3),
            },
            1000,
        );
        assert_eq!(frame.len(), MESSAGE_HEADER_LENGTH + 28);

        let header = header_of(&frame);
        assert_eq!(header.session_id, SESSION);
        assert_eq!(header.client_index_mask, 1);
        assert_eq!(header.timestamp_ms, 1000);
        assert_eq!(header.message_type, MessageType::Screen as u32);
        assert_eq!(header.buffer_length as usize, frame.len());

        let p = &frame[MESSAGE_HEADER_LENGTH..];
        assert_eq!(u32::from_le_bytes(p[0..4].try_into().unwrap()), 17);
        assert_eq!(i32::from_le_bytes(p[4..8].try_into().unwrap()), 1920);
        assert_eq!(i32::from_le_bytes(p[8..12].try_into().unwrap()), 1080);
        assert_eq!(
            u32::from_le_bytes(p[12..16].try_into().unwrap()),
            MAX_QUALITY_INDEX
        );
        assert_eq!(u32::from_le_bytes(p[16..20].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(p[20..24].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(p[24..28].try_into().unwrap()), 3);
    }

    #[test]
    fn message_ids_increment() {
        let encoder = MessageEncoder::new(SESSION);
        let a = encoder.encode_at(1, &Message::Ping, 0);
        let b = encoder.encode_at(1, &Message::Ping, 0);
        assert_eq!(header_of(&b).message_id, header_of(&a).message_id + 1);
    }

    #[test]
    fn ping_and_disconnect_are_header_only() {
        let encoder = MessageEncoder::new(SESSION);
        let ping = encoder.encode_at(0b10, &Message::Ping, 5);
        assert_eq!(ping.len(), MESSAGE_HEADER_LENGTH);
        assert_eq!(header_of(&ping).client_index_mask, 0b10);

        let bye = encoder.encode_at(0b10, &Message::Disconnect, 5);
        assert_eq!(bye.len(), MESSAGE_HEADER_LENGTH);
        assert_eq!(header_of(&bye).message_type, MessageType::Disconnect as u32);
    }

    #[test]
    fn windows_message_layout() {
        let encoder = MessageEncoder::new(SESSION);
        let frame = encoder.encode_at(
            0xFF,
            &Message::Windows {
                command_id: 4,
                windows: vec![
                    WindowProperties {
                        id: 10,
                        x: 0,
                        y: 0,
                        width: 800,
                        height: 600,
                    },
                    WindowProperties {
                        id: 11,
                        x: -5,
                        y: 20,
                        width: 300,
                        height: 200,
                    },
                ],
            },
            0,
        );
        assert_eq!(frame.len(), MESSAGE_HEADER_LENGTH + 8 + 2 * 20);
        let p = &frame[MESSAGE_HEADER_LENGTH..];
        assert_eq!(u32::from_le_bytes(p[4..8].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(p[8..12].try_into().unwrap()), 10);
        assert_eq!(i32::from_le_bytes(p[32..36].try_into().unwrap()), -5);
    }

    #[test]
    fn image_message_carries_both_planes() {
        let encoder = MessageEncoder::new(SESSION);
        let frame = encoder.encode_at(
            1,
            &Message::Image {
                command_id: 0,
                window_id: 9,
                depth: 24,
                type_tag: image_type_tag("jpg"),
                rgb: Bytes::from_static(&[1, 2, 3, 4, 5]),
                alpha: Some(Bytes::from_static(&[9, 9])),
            },
            0,
        );
        assert_eq!(frame.len(), MESSAGE_HEADER_LENGTH + 24 + 5 + 2);
        let p = &frame[MESSAGE_HEADER_LENGTH..];
        assert_eq!(&p[12..16], b"jpg\0");
        assert_eq!(u32::from_le_bytes(p[16..20].try_into().unwrap()), 5);
        assert_eq!(u32::from_le_bytes(p[20..24].try_into().unwrap()), 2);
        assert_eq!(&p[24..29], &[1, 2, 3, 4, 5]);
        assert_eq!(&p[29..31], &[9, 9]);
    }

    #[test]
    fn subimage_planes_sit_back_to_back_with_one_pad() {
        let encoder = MessageEncoder::new(SESSION);
        let frame = encoder.encode_at(
            1,
            &Message::Subimages {
                command_id: 0,
                window_id: 3,
                images: vec![
                    SubImage {
                        rectangle: Rectangle::new(4, 8, 16, 16),
                        depth: 32,
                        type_tag: image_type_tag("png"),
                        rgb: Bytes::from_static(&[1, 2, 3]),
                        alpha: Some(Bytes::from_static(&[7])),
                    },
                    SubImage {
                        rectangle: Rectangle::new(0, 0, 8, 8),
                        depth: 24,
                        type_tag: image_type_tag("png"),
                        rgb: Bytes::from_static(&[5, 6]),
                        alpha: None,
                    },
                ],
            },
            0,
        );
        // Each record pads rgb+alpha as a pair: 4 combined needs none,
        // 2 combined needs two.
        assert_eq!(frame.len(), MESSAGE_HEADER_LENGTH + 12 + (32 + 4) + (32 + 4));
        let p = &frame[MESSAGE_HEADER_LENGTH..];
        assert_eq!(u32::from_le_bytes(p[8..12].try_into().unwrap()), 2);

        // Recorded sizes are the unpadded plane lengths; alpha follows
        // rgb immediately with no padding in between.
        assert_eq!(u32::from_le_bytes(p[36..40].try_into().unwrap()), 3);
        assert_eq!(u32::from_le_bytes(p[40..44].try_into().unwrap()), 1);
        assert_eq!(&p[44..48], &[1, 2, 3, 7]);

        // The next record starts on the 4-byte boundary.
        assert_eq!(i32::from_le_bytes(p[48..52].try_into().unwrap()), 0);
        assert_eq!(u32::from_le_bytes(p[64..68].try_into().unwrap()), 24);
        assert_eq!(u32::from_le_bytes(p[72..76].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(p[76..80].try_into().unwrap()), 0);
        assert_eq!(&p[80..84], &[5, 6, 0, 0]);
    }

    #[test]
    fn quality_message_has_no_command_id() {
        let encoder = MessageEncoder::new(SESSION);
        let quality = Quality::for_index(6);
        let frame = encoder.encode_at(1, &Message::Quality { quality }, 0);
        assert_eq!(frame.len(), MESSAGE_HEADER_LENGTH + 20);
        let p = &frame[MESSAGE_HEADER_LENGTH..];
        assert_eq!(u32::from_le_bytes(p[0..4].try_into().unwrap()), 6);
        assert_eq!(
            f32::from_le_bytes(p[16..20].try_into().unwrap()),
            quality.max_mbps
        );
    }

    #[test]
    fn type_tag_padding() {
        assert_eq!(image_type_tag("png"), *b"png\0");
        assert_eq!(image_type_tag("webp"), *b"webp");
        assert_eq!(image_type_tag(""), [0; 4]);
    }
}
