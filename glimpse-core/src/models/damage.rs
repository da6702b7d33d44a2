//! Per-window damage accumulation.
//!
//! Damage arrives as small rectangles from the display backend and is
//! coalesced until the next image update drains it. Overlapping or
//! touching rectangles merge into their bounding box on insert, so the
//! stored set stays small and disjoint.

use crate::models::rect::{Rectangle, Size};

/// Accumulated damage for one window.
#[derive(Debug, Clone)]
pub struct WindowDamage {
    window_id: u32,
    rectangles: Vec<Rectangle>,
    full_window: bool,
}

impl WindowDamage {
    pub fn new(window_id: u32) -> Self {
        Self {
            window_id,
            rectangles: Vec::new(),
            full_window: false,
        }
    }

    /// Damage covering the whole window.
    pub fn full(window_id: u32) -> Self {
        Self {
            window_id,
            rectangles: Vec::new(),
            full_window: true,
        }
    }

    pub fn window_id(&self) -> u32 {
        self.window_id
    }

    pub fn rectangles(&self) -> &[Rectangle] {
        &self.rectangles
    }

    pub fn has_damage(&self) -> bool {
        self.full_window || !self.rectangles.is_empty()
    }

    /// Whether the damage amounts to the entire window: either flagged
    /// full, or a single rectangle exactly the window's size.
    pub fn is_full_window(&self, window_size: Size) -> bool {
        self.full_window
            || (self.rectangles.len() == 1 && self.rectangles[0].size == window_size)
    }

    /// Sum of stored rectangle areas in pixels.
    pub fn damaged_area(&self) -> i64 {
        self.rectangles.iter().map(Rectangle::area).sum()
    }

    /// Add one damaged rectangle, merging it with every stored
    /// rectangle it overlaps or touches.
    pub fn add_rectangle(&mut self, rectangle: Rectangle) {
        if self.full_window {
            return;
        }
        let mut merged = rectangle;
        self.rectangles.retain(|existing| {
            if merged.overlap_or_touching(existing) {
                merged.merge(existing);
                false
            } else {
                true
            }
        });
        self.rectangles.push(merged);
    }

    /// Escalate to full-window damage, discarding stored rectangles.
    pub fn add_full_window(&mut self) {
        self.rectangles.clear();
        self.full_window = true;
    }

    /// Fold another window's damage report into this one.
    pub fn merge(&mut self, other: &WindowDamage) {
        if self.full_window {
            return;
        }
        if other.full_window {
            self.add_full_window();
            return;
        }
        for rectangle in &other.rectangles {
            self.add_rectangle(*rectangle);
        }
    }

    /// Drop all damage, returning to the clean state.
    pub fn reset(&mut self) {
        self.rectangles.clear();
        self.full_window = false;
    }
}

// ── Tests ────────────────────────────────────────────────────────
