use std::fmt;

use serde::{Deserialize, Serialize};

use crate::layout_engine::metrics::CellMetrics;
use crate::sys::geometry::{Point, Rect, Size};

/// Stable identity of a desktop icon: the base name of the file it shows.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IconId(String);

impl IconId {
    pub fn new(name: impl Into<String>) -> Self { Self(name.into()) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for IconId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for IconId {
    fn from(name: &str) -> Self { Self::new(name) }
}

/// What the icon-set listing knows about one entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconSpec {
    pub id: IconId,
    /// Display name rendered in the label.
    pub label: String,
    /// Pixel size of the glyph, if the listing has loaded one.
    #[serde(default)]
    pub glyph: Option<Size>,
}

impl IconSpec {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id: IconId::new(id),
            glyph: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_glyph(mut self, glyph: Size) -> Self {
        self.glyph = Some(glyph);
        self
    }
}

/// Identifies one measurement of a label: the text and the generation of
/// metrics it was measured with. Renderers can key their own per-label
/// surfaces on it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LabelKey {
    pub text: String,
    pub metrics_version: u64,
}

/// Measured label extents, reused until the text or metrics change.
#[derive(Clone, Debug, Default)]
pub struct LabelCache {
    key: Option<LabelKey>,
    extents: Rect,
}

impl LabelCache {
    pub fn key(&self) -> Option<&LabelKey> { self.key.as_ref() }

    pub fn get_or_measure(
        &mut self,
        text: &str,
        metrics_version: u64,
        measure: impl FnOnce() -> Rect,
    ) -> Rect {
        let hit = self
            .key
            .as_ref()
            .is_some_and(|key| key.metrics_version == metrics_version && key.text == text);
        if !hit {
            self.extents = measure();
            self.key = Some(LabelKey {
                text: text.to_string(),
                metrics_version,
            });
        }
        self.extents
    }
}

/// Where the glyph and the label of a placed icon end up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footprint {
    pub icon_rect: Rect,
    pub text_rect: Rect,
}

impl Footprint {
    /// Lays out the glyph and label of a cell whose top-left is `origin`.
    /// `label` is the logical extent of the measured label text.
    pub fn at(origin: Point, glyph: Option<Size>, label: Rect, metrics: &CellMetrics) -> Self {
        let glyph = glyph.unwrap_or(Size::new(metrics.icon_size, metrics.icon_size));

        let icon_rect = Rect::new(
            origin.x.saturating_add(metrics.cell_w.saturating_sub(glyph.width) / 2),
            origin
                .y
                .saturating_add(metrics.padding)
                .saturating_add(metrics.icon_size.saturating_sub(glyph.height) / 2),
            glyph.width,
            glyph.height.saturating_add(metrics.spacing),
        );
        let label_w = label.width.saturating_add(4);
        let text_rect = Rect::new(
            origin.x.saturating_add(metrics.cell_w.saturating_sub(label_w) / 2),
            icon_rect.bottom().saturating_add(label.y),
            label_w,
            label.height.saturating_add(4),
        );

        Self { icon_rect, text_rect }
    }

    pub fn bounds(&self) -> Rect { self.icon_rect.union(&self.text_rect) }

    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self {
            icon_rect: self.icon_rect.translate(dx, dy),
            text_rect: self.text_rect.translate(dx, dy),
        }
    }

    pub fn contains_strict(&self, point: Point) -> bool {
        self.icon_rect.contains_strict(point) || self.text_rect.contains_strict(point)
    }
}

/// Placement record for one icon of the current icon set.
#[derive(Clone, Debug)]
pub struct IconPlacement {
    pub id: IconId,
    pub label: String,
    pub glyph: Option<Size>,
    pub origin: Point,
    pub fixed: bool,
    /// `None` until the icon has been through a layout pass.
    pub footprint: Option<Footprint>,
    pub label_cache: LabelCache,
}

impl IconPlacement {
    pub fn new(spec: IconSpec) -> Self {
        Self {
            id: spec.id,
            label: spec.label,
            glyph: spec.glyph,
            origin: Point::default(),
            fixed: false,
            footprint: None,
            label_cache: LabelCache::default(),
        }
    }

    pub fn fixed_at(spec: IconSpec, origin: Point) -> Self {
        Self {
            origin,
            fixed: true,
            ..Self::new(spec)
        }
    }

    /// Applies a changed listing entry. Returns true if anything changed.
    pub fn update(&mut self, spec: IconSpec) -> bool {
        let changed = self.label != spec.label || self.glyph != spec.glyph;
        self.label = spec.label;
        self.glyph = spec.glyph;
        changed
    }

    /// Moves the icon, shifting its footprint along with it.
    pub fn move_to(&mut self, origin: Point) {
        let dx = origin.x - self.origin.x;
        let dy = origin.y - self.origin.y;
        self.origin = origin;
        if let Some(footprint) = self.footprint.as_mut() {
            *footprint = footprint.translate(dx, dy);
        }
    }

    pub fn is_placed(&self) -> bool { self.footprint.is_some() }
}
