//! Geometry-related types.

use std::cmp::{max, min};

/// A rectangle with half-open integer extents `x0..x1`, `y0..y1`.
///
/// Unlike [image::math::Rect] the coordinates are signed, so a box can be
/// padded beyond the image border during feature extraction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Rect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl Rect {
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Rect {
        Rect { x0, y0, x1, y1 }
    }

    /// A rectangle that contains nothing; `include` grows it.
    pub fn empty() -> Rect {
        Rect {
            x0: i32::MAX,
            y0: i32::MAX,
            x1: i32::MIN,
            y1: i32::MIN,
        }
    }

    pub fn width(&self) -> i32 {
        max(self.x1 - self.x0, 0)
    }

    pub fn height(&self) -> i32 {
        max(self.y1 - self.y0, 0)
    }

    /// Does this rectangle have area zero?
    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.x0 <= x && x < self.x1 && self.y0 <= y && y < self.y1
    }

    /// Grow the rectangle so that it covers pixel `(x, y)`.
    pub fn include(&mut self, x: i32, y: i32) {
        self.x0 = min(self.x0, x);
        self.y0 = min(self.y0, y);
        self.x1 = max(self.x1, x + 1);
        self.y1 = max(self.y1, y + 1);
    }

    /// Return a rectangle including all the area of this rectangle and
    /// `other`. Empty rectangles are ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        if other.is_empty() {
            *self
        } else if self.is_empty() {
            *other
        } else {
            Rect {
                x0: min(self.x0, other.x0),
                y0: min(self.y0, other.y0),
                x1: max(self.x1, other.x1),
                y1: max(self.y1, other.y1),
            }
        }
    }

    /// Grow the rectangle by `dx` on the left and right and `dy` on the
    /// top and bottom.
    pub fn pad_by(&mut self, dx: i32, dy: i32) {
        self.x0 -= dx;
        self.x1 += dx;
        self.y0 -= dy;
        self.y1 += dy;
    }

    /// Horizontal distance from the right edge of `self` to the left edge
    /// of `other`; negative when they overlap.
    pub fn gap_to(&self, other: &Rect) -> i32 {
        other.x0 - self.x1
    }

    /// Number of columns shared by both rectangles.
    pub fn horizontal_overlap(&self, other: &Rect) -> i32 {
        max(min(self.x1, other.x1) - max(self.x0, other.x0), 0)
    }
}
