//! Axis-aligned rectangles and sizes.
//!
//! All damage tracking and sub-image math runs on these. Edges are kept
//! as plain interval bounds (`left..right`, `bottom..top`), so overlap
//! checks are branch-light integer comparisons.

/// Width × height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Area in pixels.
    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }
}

/// An axis-aligned rectangle with cached edge bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub size: Size,
    left: i32,
    right: i32,
    bottom: i32,
    top: i32,
}

impl Rectangle {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            size: Size::new(width, height),
            left: x,
            right: x + width,
            bottom: y,
            top: y + height,
        }
    }

    pub fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn left(&self) -> i32 {
        self.left
    }

    pub fn right(&self) -> i32 {
        self.right
    }

    pub fn bottom(&self) -> i32 {
        self.bottom
    }

    pub fn top(&self) -> i32 {
        self.top
    }

    /// Area in pixels.
    pub fn area(&self) -> i64 {
        self.size.area()
    }

    /// Strict overlap: shared area is non-empty.
    pub fn overlap(&self, other: &Rectangle) -> bool {
        self.left < other.right
            && self.right > other.left
            && self.top > other.bottom
            && self.bottom < other.top
    }

    /// Overlap with a one-pixel adjacency tolerance, so rectangles that
    /// merely touch are treated as one region.
    pub fn overlap_or_touching(&self, other: &Rectangle) -> bool {
        self.left < other.right + 1
            && self.right > other.left - 1
            && self.top > other.bottom - 1
            && self.bottom < other.top + 1
    }

    /// Whether `other` lies entirely inside this rectangle.
    pub fn contains(&self, other: &Rectangle) -> bool {
        self.left <= other.left
            && self.right >= other.right
            && self.bottom <= other.bottom
            && self.top >= other.top
    }

    /// Whether the point is inside this rectangle.
    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.bottom && y < self.top
    }

    /// Fraction of this rectangle's area covered by `other` (0.0..=1.0).
    pub fn overlap_coeff(&self, other: &Rectangle) -> f32 {
        if !self.overlap(other) || self.area() == 0 {
            return 0.0;
        }
        let w = (self.right.min(other.right) - self.left.max(other.left)) as i64;
        let h = (self.top.min(other.top) - self.bottom.max(other.bottom)) as i64;
        (w * h) as f32 / self.area() as f32
    }

    /// Whether any part of this rectangle lies inside the viewport.
    pub fn is_visible(&self, viewport: Size) -> bool {
        self.overlap(&Rectangle::from_size(viewport))
    }

    /// Grow into the bounding box of `self` and `other`.
    pub fn merge(&mut self, other: &Rectangle) {
        self.left = self.left.min(other.left);
        self.right = self.right.max(other.right);
        self.bottom = self.bottom.min(other.bottom);
        self.top = self.top.max(other.top);
        self.x = self.left;
        self.y = self.bottom;
        self.size = Size::new(self.right - self.left, self.top - self.bottom);
    }

    /// Clip this rectangle to `bounds`, returning `None` when disjoint.
    pub fn clipped_to(&self, bounds: &Rectangle) -> Option<Rectangle> {
        if !self.overlap(bounds) {
            return None;
        }
        let left = self.left.max(bounds.left);
        let right = self.right.min(bounds.right);
        let bottom = self.bottom.max(bounds.bottom);
        let top = self.top.min(bounds.top);
        Some(Rectangle::new(left, bottom, right - left, top - bottom))
    }
}

// ── Tests ────────────────────────────────────────────────────────
