//! Cell metrics and text measurement.
//!
//! The size of a desktop cell derives from the icon size and the height of
//! the desktop font. Text shaping itself belongs to the renderer; the engine
//! only needs label extents, which it gets through [`TextMeasure`].

use crate::common::config::LayoutSettings;
use crate::sys::geometry::Rect;

/// Vertical gap between the glyph and the label.
pub const DEFAULT_SPACING: i32 = 2;
/// Padding inside a cell around its contents.
pub const DEFAULT_PADDING: i32 = 6;
/// Inset of the placement grid from the working area edges.
pub const DEFAULT_MARGIN: i32 = 2;

/// Space reserved around label text for the focus border.
const LABEL_BORDER: i32 = 4;

/// Measures label text for a given font. Implemented by the renderer; the
/// crate ships an estimating implementation for hosts without one.
pub trait TextMeasure {
    /// Ascent plus descent of one line, in pixels.
    fn line_height(&self, font: &str) -> i32;

    /// Logical extents of `text` wrapped into a box of at most
    /// `max_width` x `max_height` pixels. The rectangle's origin is the
    /// offset of the logical extents relative to the layout origin.
    fn measure(&self, font: &str, text: &str, max_width: i32, max_height: i32) -> Rect;
}

/// Approximates text extents from the point size at the end of a font
/// description such as `"Sans 12"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatedTextMeasure;

impl EstimatedTextMeasure {
    const FALLBACK_POINTS: f64 = 12.0;

    fn pixel_size(font: &str) -> f64 {
        let points = font
            .rsplit(|c: char| c.is_whitespace())
            .next()
            .and_then(|tail| tail.parse::<f64>().ok())
            .filter(|points| *points > 0.0)
            .unwrap_or(Self::FALLBACK_POINTS);
        points * 96.0 / 72.0
    }
}

impl TextMeasure for EstimatedTextMeasure {
    fn line_height(&self, font: &str) -> i32 { (Self::pixel_size(font) * 1.2).ceil() as i32 }

    fn measure(&self, font: &str, text: &str, max_width: i32, max_height: i32) -> Rect {
        let px = Self::pixel_size(font);
        let char_w = (px * 0.55).max(1.0);
        let line_h = self.line_height(font).max(1);

        let total_w = (text.chars().count() as f64 * char_w).ceil() as i32;
        if total_w == 0 {
            return Rect::new(0, 0, 0, line_h.min(max_height.max(0)));
        }
        let max_width = max_width.max(1);
        let lines = (total_w + max_width - 1) / max_width;
        let max_lines = (max_height / line_h).max(1);
        let lines = lines.min(max_lines);
        let width = if lines > 1 { max_width } else { total_w };
        Rect::new(0, 0, width, lines * line_h)
    }
}

/// Geometry shared by every cell for one layout pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellMetrics {
    pub icon_size: i32,
    pub spacing: i32,
    pub padding: i32,
    pub margin: i32,
    /// Label box passed to text measurement.
    pub text_max_w: i32,
    pub text_max_h: i32,
    /// Label box including the border.
    pub text_w: i32,
    pub text_h: i32,
    pub cell_w: i32,
    pub cell_h: i32,
}

impl CellMetrics {
    pub fn compute(settings: &LayoutSettings, measure: &dyn TextMeasure) -> Self {
        let icon_size = settings.icon_size;
        let font_h = measure.line_height(&settings.font);

        let text_max_h = ((f64::from(font_h) * 2.4) as i32).max((f64::from(icon_size) * 0.2) as i32);
        let text_max_w = 100.max((f64::from(icon_size) * 1.2) as i32);
        let text_h = text_max_h + LABEL_BORDER;
        let text_w = text_max_w + LABEL_BORDER;

        let cell_h = icon_size + settings.spacing + text_h + settings.padding * 2;
        let cell_w = text_w.max(icon_size) + settings.padding * 2;

        Self {
            icon_size,
            spacing: settings.spacing,
            padding: settings.padding,
            margin: settings.margin,
            text_max_w,
            text_max_h,
            text_w,
            text_h,
            cell_w,
            cell_h,
        }
    }

    /// Area of the working area in which cells are laid out.
    pub fn grid_area(&self, working_area: Rect) -> Rect { working_area.inset(self.margin) }
}
