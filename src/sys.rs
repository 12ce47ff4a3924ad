//! Geometry and the windowing system seam.

pub mod geometry;
pub mod window_system;
