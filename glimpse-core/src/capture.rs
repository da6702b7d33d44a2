//! Display capture seams.
//!
//! The engine never talks to a display server directly. Everything it
//! needs from one is behind [`DisplayBackend`]; the narrower
//! [`WindowCapture`] is what client groups drive when damaged windows
//! need refreshing, so group logic can be tested against a stub.

use bytes::Bytes;
use thiserror::Error;

use crate::models::{
    Quality, Rectangle, Size, WindowDamage, WindowImageTransfer, WindowProperties,
    WindowVisibility,
};

/// Failures reported by a display backend.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The window disappeared between damage report and grab.
    #[error("window {0:#010x} is gone")]
    WindowGone(u32),

    /// The backend could not produce the requested image.
    #[error("grab failed: {0}")]
    GrabFailed(String),

    /// The display connection itself is unusable.
    #[error("display unavailable: {0}")]
    Unavailable(String),
}

/// An encoded image plane pair as produced by a backend grab.
#[derive(Debug, Clone)]
pub struct ImageBlob {
    pub depth: u32,
    /// Image format tag, e.g. `b"png\0"`.
    pub type_tag: [u8; 4],
    pub rgb: Bytes,
    pub alpha: Option<Bytes>,
    pub rgb_checksum: u32,
    pub alpha_checksum: Option<u32>,
}

/// Pointer position and active cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MouseState {
    pub x: i32,
    pub y: i32,
    pub cursor_id: u32,
}

/// A cursor bitmap with its hotspot.
#[derive(Debug, Clone)]
pub struct CursorBitmap {
    pub xhot: i32,
    pub yhot: i32,
    pub cursor_id: u32,
    pub data: Bytes,
}

/// Asynchronous display-side happenings drained once per tick.
#[derive(Debug, Clone)]
pub enum DisplayEvent {
    /// A window's content changed within the reported region.
    Damage(WindowDamage),
    /// Windows appeared, disappeared, moved or restacked.
    LayoutChanged,
    /// The pointer moved or the cursor glyph changed.
    CursorDirty,
    /// The display-side clipboard changed.
    ClipboardChanged(String),
}

/// Everything the engine needs from a display server.
pub trait DisplayBackend: Send {
    /// Drain events accumulated since the last call.
    fn poll_events(&mut self) -> Vec<DisplayEvent>;

    fn screen_size(&self) -> Size;

    /// Visible windows in stacking order, bottom first.
    fn visible_windows(&self) -> Vec<WindowProperties>;

    /// Visible windows with their coverage by windows above them.
    fn window_visibilities(&self) -> Vec<WindowVisibility>;

    /// Grab and encode the full content of a window at the given
    /// quality.
    fn grab_window(&mut self, window_id: u32, quality: &Quality)
    -> Result<ImageBlob, CaptureError>;

    /// Grab and encode the given sub-rectangles of a window.
    fn grab_sub_images(
        &mut self,
        window_id: u32,
        rectangles: &[Rectangle],
        quality: &Quality,
    ) -> Result<Vec<(Rectangle, ImageBlob)>, CaptureError>;

    /// The window's shape mask, encoded like an image grab.
    fn window_shape(&mut self, window_id: u32) -> Result<ImageBlob, CaptureError>;

    fn mouse_state(&self) -> MouseState;

    fn cursor_image(&mut self, cursor_id: u32) -> Result<CursorBitmap, CaptureError>;

    // Input and environment injection.
    fn send_mouse(&mut self, x: i32, y: i32, button_mask: u32);
    fn send_keyboard(&mut self, key: u32, pressed: bool);
    fn set_clipboard(&mut self, content: &str);
    fn resize_screen(&mut self, width: i32, height: i32);
    fn set_keyboard_layout(&mut self, layout: &str);
}

/// One window refresh request handed to a [`WindowCapture`].
#[derive(Debug)]
pub struct WindowCaptureRequest<'a> {
    pub window_id: u32,
    pub window_size: Size,
    pub damage: &'a WindowDamage,
    /// Checksums of the last full image sent, for unchanged-content
    /// suppression.
    pub rgb_checksum: Option<u32>,
    pub alpha_checksum: Option<u32>,
}

/// Captures, encodes and publishes one damaged window, reporting what
/// was actually transferred.
pub trait WindowCapture {
    fn capture(
        &mut self,
        request: WindowCaptureRequest<'_>,
        quality: &Quality,
        recipient_mask: u64,
    ) -> Result<WindowImageTransfer, CaptureError>;
}

/// Image content checksum: the low four bytes of the blake3 hash,
/// little-endian.
pub fn checksum32(data: &[u8]) -> u32 {
    let hash = blake3::hash(data);
    u32::from_le_bytes(hash.as_bytes()[0..4].try_into().unwrap_or([0; 4]))
}
