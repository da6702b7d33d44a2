//! Window descriptions reported by the display backend.

use crate::models::coverage::WindowCoverage;
use crate::models::rect::Rectangle;

/// Position and size of a visible window, as sent in window-list
/// messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowProperties {
    pub id: u32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl WindowProperties {
    pub fn rectangle(&self) -> Rectangle {
        Rectangle::new(self.x, self.y, self.width, self.height)
    }
}

/// A visible window together with how much of it is hidden by windows
/// stacked above it.
#[derive(Debug, Clone)]
pub struct WindowVisibility {
    pub window_id: u32,
    pub rectangle: Rectangle,
    pub coverage: WindowCoverage,
}

impl WindowVisibility {
    pub fn new(window_id: u32, rectangle: Rectangle, coverage: WindowCoverage) -> Self {
        Self {
            window_id,
            rectangle,
            coverage,
        }
    }
}
