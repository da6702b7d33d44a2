//! Visible-coverage calculation for stacked windows.
//!
//! Given a window and the rectangles of windows stacked above it, works
//! out what fraction of the window is hidden, and whether the pointer is
//! resting on the visible part. Quality control lowers the tier of
//! mostly-hidden windows.

use crate::models::rect::Rectangle;

/// How much of a window is covered by windows above it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindowCoverage {
    /// Covered fraction, 0.0 (fully visible) to 1.0 (fully hidden).
    pub coverage: f32,
    /// The pointer is over the visible part of the window.
    pub mouse_over: bool,
}

impl WindowCoverage {
    pub fn new(coverage: f32, mouse_over: bool) -> Self {
        Self {
            coverage,
            mouse_over,
        }
    }

    /// Compute coverage of `base` by the union of `covering` rectangles.
    ///
    /// Union area is computed with a sweep over the distinct x edges of
    /// the clipped rectangles; within each vertical strip the covered y
    /// extent is the union of intervals.
    pub fn of(base: &Rectangle, covering: &[Rectangle], mouse_x: i32, mouse_y: i32) -> Self {
        let mouse_in_base = base.contains_point(mouse_x, mouse_y);

        let clipped: Vec<Rectangle> = covering
            .iter()
            .filter_map(|r| r.clipped_to(base))
            .collect();

        if clipped.is_empty() || base.area() == 0 {
            return Self::new(0.0, mouse_in_base);
        }

        let mouse_under_cover = clipped.iter().any(|r| r.contains_point(mouse_x, mouse_y));

        let mut xs: Vec<i32> = clipped.iter().flat_map(|r| [r.left(), r.right()]).collect();
        xs.sort_unstable();
        xs.dedup();

        let mut covered_area: i64 = 0;
        for pair in xs.windows(2) {
            let (x0, x1) = (pair[0], pair[1]);
            let strip_width = (x1 - x0) as i64;
            if strip_width == 0 {
                continue;
            }

            // Union of y intervals of rectangles spanning this strip.
            let mut spans: Vec<(i32, i32)> = clipped
                .iter()
                .filter(|r| r.left() <= x0 && r.right() >= x1)
                .map(|r| (r.bottom(), r.top()))
                .collect();
            spans.sort_unstable();

            let mut covered_height: i64 = 0;
            let mut current: Option<(i32, i32)> = None;
            for (bottom, top) in spans {
                match current {
                    Some((cb, ct)) if bottom <= ct => {
                        current = Some((cb, ct.max(top)));
                    }
                    Some((cb, ct)) => {
                        covered_height += (ct - cb) as i64;
                        current = Some((bottom, top));
                    }
                    None => current = Some((bottom, top)),
                }
            }
            if let Some((cb, ct)) = current {
                covered_height += (ct - cb) as i64;
            }

            covered_area += strip_width * covered_height;
        }

        let coverage = (covered_area as f32 / base.area() as f32).clamp(0.0, 1.0);
        Self::new(coverage, mouse_in_base && !mouse_under_cover)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncovered_window() {
        let base = Rectangle::new(0, 0, 100, 100);
        let c = WindowCoverage::of(&base, &[], 50, 50);
        assert_eq!(c.coverage, 0.0);
        assert!(c.mouse_over);
    }

    #[test]
    fn half_covered() {
        let base = Rectangle::new(0, 0, 100, 100);
        let above = [Rectangle::new(50, 0, 100, 100)];
        let c = WindowCoverage::of(&base, &above, 10, 10);
        assert!((c.coverage - 0.5).abs() < 1e-6, "coverage = {}", c.coverage);
        assert!(c.mouse_over);
    }

    #[test]
    fn overlapping_covers_count_once() {
        let base = Rectangle::new(0, 0, 100, 100);
        // Two rects both hiding the same left half.
        let above = [
            Rectangle::new(0, 0, 50, 100),
            Rectangle::new(0, 0, 50, 100),
            Rectangle::new(25, 25, 25, 25),
        ];
        let c = WindowCoverage::of(&base, &above, 75, 75);
        assert!((c.coverage - 0.5).abs() < 1e-6, "coverage = {}", c.coverage);
    }

    #[test]
    fn fully_covered() {
        let base = Rectangle::new(10, 10, 80, 80);
        let above = [Rectangle::new(0, 0, 200, 200)];
        let c = WindowCoverage::of(&base, &above, 50, 50);
        assert!((c.coverage - 1.0).abs() < 1e-6);
        // Pointer is over the covering window, not this one.
        assert!(!c.mouse_over);
    }

    #[test]
    fn mouse_over_respects_covering_rect() {
        let base = Rectangle::new(0, 0, 100, 100);
        let above = [Rectangle::new(0, 0, 50, 100)];
        // Pointer in the hidden half.
        let hidden = WindowCoverage::of(&base, &above, 25, 50);
        assert!(!hidden.mouse_over);
        // Pointer in the visible half.
        let visible = WindowCoverage::of(&base, &above, 75, 50);
        assert!(visible.mouse_over);
    }
}
