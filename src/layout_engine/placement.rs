//! Candidate position generator for automatically placed icons.
//!
//! The generator walks a grid of cells inside a bounding box. Axis 1 is the
//! primary scan direction (x when arranging in rows, y otherwise) and axis 2
//! is the direction the scan line advances in once axis 1 is exhausted. After
//! a full sweep of the grid the tier counter increments and every following
//! candidate is shifted diagonally, so repeated sweeps land next to the
//! previous ones instead of on top of them.
//!
//! The sequence is unbounded; callers decide when to stop.

use serde::{Deserialize, Serialize};

use crate::sys::geometry::Point;

/// Divisors controlling the diagonal offset applied per tier. The offset on
/// an axis is `1 + cell / divisor` pixels per tier. `major` is applied to the
/// axis 1 cell dimension and `minor` to axis 2.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TierOffset {
    #[serde(default = "default_major")]
    pub major: i32,
    #[serde(default = "default_minor")]
    pub minor: i32,
}

impl Default for TierOffset {
    fn default() -> Self {
        Self {
            major: default_major(),
            minor: default_minor(),
        }
    }
}

fn default_major() -> i32 { 24 }

fn default_minor() -> i32 { 16 }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowRules {
    pub in_rows: bool,
    pub rtl: bool,
    pub btt: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PlacementGenerator {
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,

    cell_w: i32,
    cell_h: i32,

    rules: FlowRules,
    tier_offset: TierOffset,

    tier: i32,
    grid_x: i32,
    grid_y: i32,

    x: i32,
    y: i32,
}

impl PlacementGenerator {
    pub fn new() -> Self { Self::default() }

    pub fn set_bounding_box(&mut self, left: i32, top: i32, right: i32, bottom: i32) {
        self.left = left;
        self.top = top;
        self.right = right;
        self.bottom = bottom;
    }

    pub fn set_cell_size(&mut self, cell_w: i32, cell_h: i32) {
        self.cell_w = cell_w;
        self.cell_h = cell_h;
    }

    pub fn set_flow_rules(&mut self, in_rows: bool, rtl: bool, btt: bool) {
        self.rules = FlowRules { in_rows, rtl, btt };
    }

    pub fn set_tier_offset(&mut self, tier_offset: TierOffset) { self.tier_offset = tier_offset; }

    /// False when a single cell does not fit in the bounding box. Such a
    /// generator still produces candidates, but none of them lie inside the
    /// box.
    pub fn is_well_formed(&self) -> bool {
        self.cell_w > 0
            && self.cell_h > 0
            && self.cell_w <= self.right - self.left
            && self.cell_h <= self.bottom - self.top
    }

    pub fn x(&self) -> i32 { self.x }

    pub fn y(&self) -> i32 { self.y }

    pub fn position(&self) -> Point { Point::new(self.x, self.y) }

    pub fn tier(&self) -> i32 { self.tier }

    pub fn reset(&mut self) {
        self.reset_x();
        self.reset_y();
        self.tier = 0;
        self.update_position();
    }

    pub fn advance(&mut self) {
        if self.advance_axis1() {
            self.reset_axis1();
            if self.advance_axis2() {
                self.reset_axis2();
                self.tier += 1;
            }
        }
        self.update_position();
    }

    fn reset_x(&mut self) {
        self.grid_x = if self.rules.rtl {
            self.right - self.cell_w
        } else {
            self.left
        };
    }

    fn reset_y(&mut self) {
        self.grid_y = if self.rules.btt {
            self.bottom - self.cell_h
        } else {
            self.top
        };
    }

    fn reset_axis1(&mut self) {
        if self.rules.in_rows {
            self.reset_x()
        } else {
            self.reset_y()
        }
    }

    fn reset_axis2(&mut self) {
        if self.rules.in_rows {
            self.reset_y()
        } else {
            self.reset_x()
        }
    }

    /// Returns true when the step left the bounding box.
    fn advance_x(&mut self) -> bool {
        if self.rules.rtl {
            self.grid_x -= self.cell_w;
            self.grid_x < self.left
        } else {
            self.grid_x += self.cell_w;
            self.grid_x > self.right - self.cell_w
        }
    }

    /// Returns true when the step left the bounding box.
    fn advance_y(&mut self) -> bool {
        if self.rules.btt {
            self.grid_y -= self.cell_h;
            self.grid_y < self.top
        } else {
            self.grid_y += self.cell_h;
            self.grid_y > self.bottom - self.cell_h
        }
    }

    fn advance_axis1(&mut self) -> bool {
        if self.rules.in_rows {
            self.advance_x()
        } else {
            self.advance_y()
        }
    }

    fn advance_axis2(&mut self) -> bool {
        if self.rules.in_rows {
            self.advance_y()
        } else {
            self.advance_x()
        }
    }

    fn update_position(&mut self) {
        self.x = self.grid_x;
        self.y = self.grid_y;
        if self.tier == 0 {
            return;
        }

        let (x_div, y_div) = if self.rules.in_rows {
            (self.tier_offset.major, self.tier_offset.minor)
        } else {
            (self.tier_offset.minor, self.tier_offset.major)
        };
        let x_sign = if self.rules.rtl { -1.0 } else { 1.0 };
        let y_sign = if self.rules.btt { -1.0 } else { 1.0 };
        let tier = f64::from(self.tier);

        let dx = (1.0 + f64::from(div_or_zero(self.cell_w, x_div))) * tier * x_sign;
        let dy = (1.0 + f64::from(div_or_zero(self.cell_h, y_div))) * tier * y_sign;
        self.x = (f64::from(self.x) + dx) as i32;
        self.y = (f64::from(self.y) + dy) as i32;
    }
}

fn div_or_zero(value: i32, divisor: i32) -> i32 {
    if divisor <= 0 { 0 } else { value / divisor }
}
