//! A synthetic display backend.
//!
//! Renders a deterministic desktop of overlapping windows whose
//! content animates, so the whole pipeline can run and be exercised
//! without a display server. Grabs are zstd-compressed pattern
//! planes tagged `zst`.

use bytes::Bytes;
use tracing::debug;

use glimpse_core::models::{Rectangle, Size, WindowProperties, WindowVisibility};
use glimpse_core::wire::image_type_tag;
use glimpse_core::{
    CaptureError, CursorBitmap, DisplayBackend, DisplayEvent, ImageBlob, MouseState, Quality,
    WindowCoverage, WindowDamage, checksum32,
};

/// How often the animated window repaints fully instead of in a
/// stripe, in poll cycles.
const FULL_REPAINT_PERIOD: u64 = 120;

/// One synthetic window: geometry plus a content seed.
struct SyntheticWindow {
    properties: WindowProperties,
    seed: u64,
    /// Animated windows repaint as the frame counter advances.
    animated: bool,
}

/// Deterministic in-process display.
pub struct SyntheticBackend {
    screen: Size,
    windows: Vec<SyntheticWindow>,
    frame_counter: u64,
    mouse: MouseState,
    clipboard: String,
    keyboard_layout: String,
    pending: Vec<DisplayEvent>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        let windows = vec![
            SyntheticWindow {
                properties: WindowProperties {
                    id: 0x101,
                    x: 40,
                    y: 40,
                    width: 800,
                    height: 600,
                },
                seed: 11,
                animated: true,
            },
            SyntheticWindow {
                properties: WindowProperties {
                    id: 0x102,
                    x: 500,
                    y: 300,
                    width: 640,
                    height: 480,
                },
                seed: 23,
                animated: false,
            },
            SyntheticWindow {
                properties: WindowProperties {
                    id: 0x103,
                    x: 1100,
                    y: 80,
                    width: 400,
                    height: 300,
                },
                seed: 37,
                animated: true,
            },
        ];
        Self {
            screen: Size::new(1920, 1080),
            windows,
            frame_counter: 0,
            mouse: MouseState::default(),
            clipboard: String::new(),
            keyboard_layout: String::new(),
            pending: Vec::new(),
        }
    }

    pub fn clipboard(&self) -> &str {
        &self.clipboard
    }

    pub fn keyboard_layout(&self) -> &str {
        &self.keyboard_layout
    }

    fn window(&self, window_id: u32) -> Result<&SyntheticWindow, CaptureError> {
        self.windows
            .iter()
            .find(|w| w.properties.id == window_id)
            .ok_or(CaptureError::WindowGone(window_id))
    }

    /// One grayscale plane of the window's pattern, clipped to the
    /// given rectangle in window coordinates.
    fn render(&self, window: &SyntheticWindow, rect: &Rectangle) -> Vec<u8> {
        let mut plane = Vec::with_capacity(rect.area().max(0) as usize);
        let phase = if window.animated {
            self.frame_counter
        } else {
            0
        };
        for y in rect.y..rect.y + rect.size.height {
            for x in rect.x..rect.x + rect.size.width {
                plane.push(((x as u64 ^ y as u64) + window.seed + phase) as u8);
            }
        }
        plane
    }

    fn encode(&self, window: &SyntheticWindow, rect: &Rectangle, quality: &Quality) -> Result<ImageBlob, CaptureError> {
        let plane = self.render(window, rect);
        // Denser tiers get more compression effort.
        let level = 1 + (quality.rgb_quality * 8.0) as i32;
        let rgb = zstd::encode_all(plane.as_slice(), level)
            .map_err(|e| CaptureError::GrabFailed(e.to_string()))?;
        let rgb = Bytes::from(rgb);
        let rgb_checksum = checksum32(&rgb);
        Ok(ImageBlob {
            depth: 24,
            type_tag: image_type_tag("zst"),
            rgb,
            alpha: None,
            rgb_checksum,
            alpha_checksum: None,
        })
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayBackend for SyntheticBackend {
    fn poll_events(&mut self) -> Vec<DisplayEvent> {
        self.frame_counter += 1;
        let mut events = std::mem::take(&mut self.pending);

        for window in self.windows.iter().filter(|w| w.animated) {
            let mut damage = WindowDamage::new(window.properties.id);
            if self.frame_counter % FULL_REPAINT_PERIOD == 0 {
                damage.add_full_window();
            } else {
                // A moving stripe through the window.
                let height = window.properties.height;
                let stripe_y = ((self.frame_counter * 8) % height.max(1) as u64) as i32;
                damage.add_rectangle(Rectangle::new(
                    0,
                    stripe_y,
                    window.properties.width,
                    16.min(height - stripe_y),
                ));
            }
            events.push(DisplayEvent::Damage(damage));
        }
        events
    }

    fn screen_size(&self) -> Size {
        self.screen
    }

    fn visible_windows(&self) -> Vec<WindowProperties> {
        self.windows.iter().map(|w| w.properties).collect()
    }

    fn window_visibilities(&self) -> Vec<WindowVisibility> {
        // Stacking order is the vector order, bottom first.
        (0..self.windows.len())
            .map(|i| {
                let base = self.windows[i].properties.rectangle();
                let above: Vec<Rectangle> = self.windows[i + 1..]
                    .iter()
                    .map(|w| w.properties.rectangle())
                    .collect();
                WindowVisibility::new(
                    self.windows[i].properties.id,
                    base,
                    WindowCoverage::of(&base, &above, self.mouse.x, self.mouse.y),
                )
            })
            .collect()
    }

    fn grab_window(&mut self, window_id: u32, quality: &Quality) -> Result<ImageBlob, CaptureError> {
        let window = self.window(window_id)?;
        let rect = Rectangle::new(0, 0, window.properties.width, window.properties.height);
        self.encode(window, &rect, quality)
    }

    fn grab_sub_images(
        &mut self,
        window_id: u32,
        rectangles: &[Rectangle],
        quality: &Quality,
    ) -> Result<Vec<(Rectangle, ImageBlob)>, CaptureError> {
        let window = self.window(window_id)?;
        rectangles
            .iter()
            .map(|rect| Ok((*rect, self.encode(window, rect, quality)?)))
            .collect()
    }

    fn window_shape(&mut self, window_id: u32) -> Result<ImageBlob, CaptureError> {
        // Synthetic windows are plain rectangles; the mask is solid.
        let window = self.window(window_id)?;
        let rect = Rectangle::new(0, 0, window.properties.width, window.properties.height);
        self.encode(window, &rect, &Quality::max())
    }

    fn mouse_state(&self) -> MouseState {
        self.mouse
    }

    fn cursor_image(&mut self, cursor_id: u32) -> Result<CursorBitmap, CaptureError> {
        // A fixed 8x8 arrow-ish bitmap.
        let bitmap: Vec<u8> = (0..64u8).map(|i| if i % 9 == 0 { 0xFF } else { 0 }).collect();
        Ok(CursorBitmap {
            xhot: 0,
            yhot: 0,
            cursor_id,
            data: Bytes::from(bitmap),
        })
    }

    fn send_mouse(&mut self, x: i32, y: i32, _button_mask: u32) {
        self.mouse.x = x.clamp(0, self.screen.width);
        self.mouse.y = y.clamp(0, self.screen.height);
    }

    fn send_keyboard(&mut self, key: u32, pressed: bool) {
        debug!(key, pressed, "synthetic keyboard event");
    }

    fn set_clipboard(&mut self, content: &str) {
        self.clipboard = content.to_string();
    }

    fn resize_screen(&mut self, width: i32, height: i32) {
        if width > 0 && height > 0 {
            self.screen = Size::new(width, height);
            self.pending.push(DisplayEvent::LayoutChanged);
        }
    }

    fn set_keyboard_layout(&mut self, layout: &str) {
        self.keyboard_layout = layout.to_string();
    }
}

// ── Tests ────────────────────────────────────────────────────────
