//! Integer screen geometry shared by the placement code and the windowing
//! system seam.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self { Self { x, y } }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self { Self { width, height } }
}

/// An axis-aligned rectangle in desktop-surface coordinates.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn origin(&self) -> Point { Point::new(self.x, self.y) }

    pub fn right(&self) -> i32 { self.x.saturating_add(self.width) }

    pub fn bottom(&self) -> i32 { self.y.saturating_add(self.height) }

    pub fn is_empty(&self) -> bool { self.width <= 0 || self.height <= 0 }

    /// True when the two rectangles share a non-empty area. Touching edges do
    /// not count.
    pub fn intersects(&self, other: &Rect) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Smallest rectangle covering both. Empty inputs are ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
    }

    /// Strict containment: points on the border are outside.
    pub fn contains_strict(&self, point: Point) -> bool {
        self.x < point.x && point.x < self.right() && self.y < point.y && point.y < self.bottom()
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.width,
            self.height,
        )
    }

    /// Shrinks each side by `margin`, clamping the size at zero.
    pub fn inset(&self, margin: i32) -> Rect {
        Rect::new(
            self.x.saturating_add(margin),
            self.y.saturating_add(margin),
            self.width.saturating_sub(margin.saturating_mul(2)).max(0),
            self.height.saturating_sub(margin.saturating_mul(2)).max(0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touching_edges_do_not_intersect() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(10, 0, 10, 10);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&Rect::new(9, 9, 5, 5)));
    }

    #[test]
    fn empty_rect_never_intersects() {
        let a = Rect::new(0, 0, 100, 100);
        assert!(!a.intersects(&Rect::new(10, 10, 0, 5)));
        assert!(!Rect::default().intersects(&a));
    }

    #[test]
    fn union_ignores_empty() {
        let a = Rect::new(5, 5, 10, 10);
        assert_eq!(a.union(&Rect::default()), a);
        assert_eq!(a.union(&Rect::new(0, 20, 2, 2)), Rect::new(0, 5, 15, 17));
    }

    #[test]
    fn inset_clamps() {
        assert_eq!(Rect::new(0, 0, 100, 50).inset(2), Rect::new(2, 2, 96, 46));
        assert_eq!(Rect::new(0, 0, 3, 3).inset(2), Rect::new(2, 2, 0, 0));
    }

    #[test]
    fn edges_saturate_near_the_coordinate_limit() {
        let far = Rect::new(i32::MAX - 5, i32::MIN + 5, 100, 100);
        assert_eq!(far.right(), i32::MAX);
        assert_eq!(far.bottom(), i32::MIN + 105);
        assert_eq!(far.translate(10, -10), Rect::new(i32::MAX, i32::MIN, 100, 100));
        assert!(far.intersects(&Rect::new(i32::MAX - 1, i32::MIN + 10, 1, 1)));
    }
}
