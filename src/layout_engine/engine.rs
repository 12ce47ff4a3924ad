//! The icon layout engine.
//!
//! Holds the ordered icon set of one desktop surface and assigns every icon a
//! cell. Fixed icons keep their stored coordinates. Free icons are placed in
//! listing order at the first generator candidate whose footprint is clear of
//! every fixed icon and every reserved screen area.
//!
//! Mutations only request a recompute. Requests coalesce in a single pending
//! slot until the host calls [`IconLayout::flush`] at its next idle point.

use bitflags::bitflags;
use serde::Serialize;
use tracing::{debug, instrument, trace, warn};

use super::metrics::{CellMetrics, TextMeasure};
use super::placement::PlacementGenerator;
use crate::common::collections::HashMap;
use crate::common::config::LayoutSettings;
use crate::common::deferred::{Deferred, Waker};
use crate::model::icon::{Footprint, IconId, IconPlacement, IconSpec};
use crate::model::position_store::{PositionRecord, PositionStore, StoreError};
use crate::sys::geometry::{Point, Rect, Size};

bitflags! {
    /// Why a recompute was requested.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LayoutTrigger: u8 {
        const ICONS = 1 << 0;
        const WORKING_AREA = 1 << 1;
        const FLOW = 1 << 2;
        const CELL_SIZE = 1 << 3;
        const OVERLAP = 1 << 4;
        const POSITIONS = 1 << 5;
    }
}

/// Screen areas free icons must stay clear of.
pub trait ObstacleSource {
    fn test_overlap(&self, rect: &Rect) -> bool;
}

/// An obstacle source that reserves nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoObstacles;

impl ObstacleSource for NoObstacles {
    fn test_overlap(&self, _rect: &Rect) -> bool { false }
}

/// Everything a renderer needs to draw one placed icon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedIcon {
    pub id: IconId,
    pub origin: Point,
    pub fixed: bool,
    pub icon_rect: Rect,
    pub text_rect: Rect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LabelBasis {
    font: String,
    max_w: i32,
    max_h: i32,
}

pub struct IconLayout {
    order: Vec<IconId>,
    icons: HashMap<IconId, IconPlacement>,
    /// Loaded positions whose icon is not in the current set.
    unmatched: Vec<PositionRecord>,
    working_area: Rect,
    pending: Deferred,
    triggers: LayoutTrigger,
    measure: Box<dyn TextMeasure>,
    metrics: Option<CellMetrics>,
    label_basis: Option<LabelBasis>,
    metrics_version: u64,
    store: Option<PositionStore>,
    recomputes: u64,
    /// Placements changed since the host last called `take_changed`.
    changed: bool,
}

impl IconLayout {
    pub fn new(measure: Box<dyn TextMeasure>) -> Self {
        Self {
            order: Vec::new(),
            icons: HashMap::default(),
            unmatched: Vec::new(),
            working_area: Rect::default(),
            pending: Deferred::new(),
            triggers: LayoutTrigger::empty(),
            measure,
            metrics: None,
            label_basis: None,
            metrics_version: 0,
            store: None,
            recomputes: 0,
            changed: false,
        }
    }

    pub fn with_store(mut self, store: PositionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn store(&self) -> Option<&PositionStore> { self.store.as_ref() }

    pub fn set_waker(&mut self, waker: Waker) { self.pending.set_waker(waker); }

    // Icon set

    /// Replaces the icon set. Icons already present keep their placement
    /// and fixed state; newcomers pick up any loaded position.
    pub fn set_icons(&mut self, specs: impl IntoIterator<Item = IconSpec>) {
        let mut previous = std::mem::take(&mut self.icons);
        self.order.clear();
        for spec in specs {
            if self.icons.contains_key(&spec.id) {
                warn!(icon = %spec.id, "duplicate icon in listing");
                continue;
            }
            let id = spec.id.clone();
            let placement = match previous.remove(&id) {
                Some(mut placement) => {
                    placement.update(spec);
                    placement
                }
                None => self.adopt(spec),
            };
            self.order.push(id.clone());
            self.icons.insert(id, placement);
        }
        self.request_recompute(LayoutTrigger::ICONS);
    }

    /// Inserts an icon at `index` in listing order, or updates it if it is
    /// already present.
    pub fn insert_icon(&mut self, index: usize, spec: IconSpec) {
        if self.icons.contains_key(&spec.id) {
            self.update_icon(spec);
            return;
        }
        let id = spec.id.clone();
        let placement = self.adopt(spec);
        self.order.insert(index.min(self.order.len()), id.clone());
        self.icons.insert(id, placement);
        self.request_recompute(LayoutTrigger::ICONS);
    }

    pub fn push_icon(&mut self, spec: IconSpec) { self.insert_icon(self.order.len(), spec); }

    /// Removes an icon along with its fixed position.
    pub fn remove_icon(&mut self, id: &IconId) -> bool {
        if self.icons.remove(id).is_none() {
            return false;
        }
        self.order.retain(|other| other != id);
        self.request_recompute(LayoutTrigger::ICONS);
        true
    }

    /// Applies a changed listing entry. Returns false for unknown icons.
    pub fn update_icon(&mut self, spec: IconSpec) -> bool {
        let Some(icon) = self.icons.get_mut(&spec.id) else { return false };
        if icon.update(spec) {
            self.request_recompute(LayoutTrigger::ICONS);
        }
        true
    }

    /// Reorders the listing. Unknown ids are ignored and icons missing from
    /// `order` follow in their previous relative order.
    pub fn reorder(&mut self, order: &[IconId]) {
        let mut next: Vec<IconId> = Vec::with_capacity(self.order.len());
        for id in order {
            if self.icons.contains_key(id) && !next.contains(id) {
                next.push(id.clone());
            }
        }
        for id in &self.order {
            if !next.contains(id) {
                next.push(id.clone());
            }
        }
        if next != self.order {
            self.order = next;
            self.request_recompute(LayoutTrigger::ICONS);
        }
    }

    fn adopt(&mut self, spec: IconSpec) -> IconPlacement {
        match self.unmatched.iter().position(|r| r.id == spec.id) {
            Some(index) => {
                let record = self.unmatched.remove(index);
                trace!(icon = %record.id, origin = ?record.origin, "restoring saved position");
                IconPlacement::fixed_at(spec, record.origin)
            }
            None => IconPlacement::new(spec),
        }
    }

    // Environment

    /// Returns true if the area changed, in which case a recompute is queued.
    pub fn set_working_area(&mut self, area: Rect) -> bool {
        if area == self.working_area {
            return false;
        }
        debug!(?area, "working area changed");
        self.working_area = area;
        self.request_recompute(LayoutTrigger::WORKING_AREA);
        true
    }

    pub fn working_area(&self) -> Rect { self.working_area }

    /// Queues a recompute if the change between `old` and `new` affects
    /// placement.
    pub fn apply_settings(&mut self, old: &LayoutSettings, new: &LayoutSettings) -> LayoutTrigger {
        let triggers = settings_triggers(old, new);
        if !triggers.is_empty() {
            self.request_recompute(triggers);
        }
        triggers
    }

    // Recompute scheduling

    /// Returns true if this call moved the engine from idle to pending.
    pub fn request_recompute(&mut self, trigger: LayoutTrigger) -> bool {
        self.triggers |= trigger;
        let scheduled = self.pending.request();
        if scheduled {
            trace!(?trigger, "layout queued");
        }
        scheduled
    }

    pub fn is_pending(&self) -> bool { self.pending.is_pending() }

    pub fn pending_triggers(&self) -> LayoutTrigger { self.triggers }

    /// Runs the pending recompute, if any.
    pub fn flush(&mut self, settings: &LayoutSettings, obstacles: &dyn ObstacleSource) -> bool {
        if !self.pending.is_pending() {
            return false;
        }
        self.recompute(settings, obstacles);
        true
    }

    /// Number of recomputes run so far.
    pub fn recompute_count(&self) -> u64 { self.recomputes }

    /// Returns whether placements or fixed states changed since the last
    /// call, and clears the mark.
    pub fn take_changed(&mut self) -> bool { std::mem::take(&mut self.changed) }

    #[instrument(name = "layout::recompute", skip_all, fields(icons = self.order.len()))]
    pub fn recompute(&mut self, settings: &LayoutSettings, obstacles: &dyn ObstacleSource) {
        self.pending.cancel();
        let triggers = std::mem::take(&mut self.triggers);
        self.recomputes += 1;
        self.changed = true;

        let metrics = self.refresh_metrics(settings);
        let version = self.metrics_version;
        let font = settings.font.as_str();
        let measure = self.measure.as_ref();

        let mut reserved = Vec::new();
        for id in &self.order {
            let Some(icon) = self.icons.get_mut(id) else { continue };
            if !icon.fixed {
                continue;
            }
            let label = measure_label(icon, measure, font, &metrics, version);
            let footprint = Footprint::at(icon.origin, icon.glyph, label, &metrics);
            icon.footprint = Some(footprint);
            reserved.push(footprint.bounds());
        }

        let grid = metrics.grid_area(self.working_area);
        let mut generator = PlacementGenerator::new();
        generator.set_bounding_box(grid.x, grid.y, grid.right(), grid.bottom());
        generator.set_cell_size(metrics.cell_w, metrics.cell_h);
        generator.set_flow_rules(
            settings.arrange_in_rows,
            settings.arrange_rtl,
            settings.arrange_btt,
        );
        generator.set_tier_offset(settings.tier_offset);
        generator.reset();
        if !generator.is_well_formed() {
            warn!(
                ?grid,
                cell_w = metrics.cell_w,
                cell_h = metrics.cell_h,
                "working area cannot hold a single cell"
            );
        }

        let max_attempts = settings.max_placement_attempts.max(1);
        let occupied = |footprint: &Footprint| {
            reserved.iter().any(|r| {
                r.intersects(&footprint.icon_rect) || r.intersects(&footprint.text_rect)
            }) || obstacles.test_overlap(&footprint.icon_rect)
                || obstacles.test_overlap(&footprint.text_rect)
        };

        let mut overlapping = 0;
        for id in &self.order {
            let Some(icon) = self.icons.get_mut(id) else { continue };
            if icon.fixed {
                continue;
            }
            let label = measure_label(icon, measure, font, &metrics, version);

            let first = next_candidate(&mut generator, icon.glyph, label, &metrics);
            // Where the next icon continues if this one ends up on `first`.
            let resume = generator.clone();
            let mut chosen = (!occupied(&first.1)).then_some(first);
            let mut attempts = 1;
            while chosen.is_none() && attempts < max_attempts {
                let next = next_candidate(&mut generator, icon.glyph, label, &metrics);
                attempts += 1;
                if occupied(&next.1) {
                    trace!(icon = %id, origin = ?next.0, "candidate occupied");
                } else {
                    chosen = Some(next);
                }
            }

            let (origin, footprint) = match chosen {
                Some(chosen) => chosen,
                None => {
                    overlapping += 1;
                    warn!(icon = %id, attempts, "no free cell found, placing over an occupied one");
                    generator = resume;
                    first
                }
            };
            icon.origin = origin;
            icon.footprint = Some(footprint);
        }

        debug!(?triggers, tiers = generator.tier(), overlapping, "layout done");
    }

    fn refresh_metrics(&mut self, settings: &LayoutSettings) -> CellMetrics {
        let metrics = CellMetrics::compute(settings, self.measure.as_ref());
        let basis = LabelBasis {
            font: settings.font.clone(),
            max_w: metrics.text_max_w,
            max_h: metrics.text_max_h,
        };
        if self.label_basis.as_ref() != Some(&basis) {
            self.metrics_version += 1;
            debug!(version = self.metrics_version, ?basis, "label metrics changed");
            self.label_basis = Some(basis);
        }
        self.metrics = Some(metrics);
        metrics
    }

    /// Metrics of the last recompute.
    pub fn metrics(&self) -> Option<CellMetrics> { self.metrics }

    /// Generation of the metrics labels were last measured with.
    pub fn metrics_version(&self) -> u64 { self.metrics_version }

    // Results

    /// Icons in listing order.
    pub fn icons(&self) -> impl Iterator<Item = &IconPlacement> + '_ {
        self.order.iter().filter_map(|id| self.icons.get(id))
    }

    pub fn icon(&self, id: &IconId) -> Option<&IconPlacement> { self.icons.get(id) }

    pub fn len(&self) -> usize { self.order.len() }

    pub fn is_empty(&self) -> bool { self.order.is_empty() }

    /// Placed icons in listing order. Icons that have not been through a
    /// layout pass yet are left out.
    pub fn placements(&self) -> Vec<PlacedIcon> {
        self.icons()
            .filter_map(|icon| {
                icon.footprint.map(|footprint| PlacedIcon {
                    id: icon.id.clone(),
                    origin: icon.origin,
                    fixed: icon.fixed,
                    icon_rect: footprint.icon_rect,
                    text_rect: footprint.text_rect,
                })
            })
            .collect()
    }

    /// The first icon in listing order whose glyph or label strictly
    /// contains `point`.
    pub fn hit_test(&self, point: Point) -> Option<&IconId> {
        self.icons()
            .find(|icon| icon.footprint.is_some_and(|fp| fp.contains_strict(point)))
            .map(|icon| &icon.id)
    }

    // User actions

    /// Pins placed free icons at their current coordinates. Returns how many
    /// changed.
    pub fn fix_icons(&mut self, ids: &[IconId]) -> Result<usize, StoreError> {
        let mut fixed = 0;
        for id in ids {
            let Some(icon) = self.icons.get_mut(id) else { continue };
            if icon.fixed || !icon.is_placed() {
                continue;
            }
            icon.fixed = true;
            fixed += 1;
        }
        debug!(fixed, "fixed icons");
        if fixed > 0 {
            self.changed = true;
            self.save_positions()?;
        }
        Ok(fixed)
    }

    /// Frees icons and lays them out again immediately.
    pub fn release_icons(
        &mut self,
        ids: &[IconId],
        settings: &LayoutSettings,
        obstacles: &dyn ObstacleSource,
    ) -> Result<usize, StoreError> {
        let mut released = 0;
        for id in ids {
            let Some(icon) = self.icons.get_mut(id) else { continue };
            if icon.fixed {
                icon.fixed = false;
                released += 1;
            }
        }
        debug!(released, "released icons");
        if released > 0 {
            self.triggers |= LayoutTrigger::POSITIONS;
            self.recompute(settings, obstacles);
            self.save_positions()?;
        }
        Ok(released)
    }

    /// Rounds fixed icons to the nearest grid cell.
    pub fn snap_to_grid(
        &mut self,
        ids: &[IconId],
        settings: &LayoutSettings,
    ) -> Result<usize, StoreError> {
        let metrics = self.refresh_metrics(settings);
        let grid = metrics.grid_area(self.working_area);
        let origin = Point::new(
            if settings.arrange_rtl {
                grid.right().saturating_sub(metrics.cell_w)
            } else {
                grid.x
            },
            grid.y,
        );
        let cell = Size::new(metrics.cell_w, metrics.cell_h);

        let mut snapped = 0;
        for id in ids {
            let Some(icon) = self.icons.get_mut(id) else { continue };
            if !icon.fixed {
                continue;
            }
            let target = snap_point(icon.origin, origin, cell);
            if target != icon.origin {
                trace!(icon = %id, from = ?icon.origin, to = ?target, "snapped");
                icon.move_to(target);
                snapped += 1;
            }
        }
        if snapped > 0 {
            self.request_recompute(LayoutTrigger::POSITIONS);
            self.save_positions()?;
        }
        Ok(snapped)
    }

    /// Moves an icon and pins it there.
    pub fn move_icon(&mut self, id: &IconId, to: Point) -> Result<bool, StoreError> {
        let Some(icon) = self.icons.get_mut(id) else { return Ok(false) };
        icon.move_to(to);
        icon.fixed = true;
        self.request_recompute(LayoutTrigger::POSITIONS);
        self.save_positions()?;
        Ok(true)
    }

    // Persistence

    /// Fixed icons in listing order, followed by loaded positions of icons
    /// not currently present.
    pub fn position_records(&self) -> Vec<PositionRecord> {
        self.icons()
            .filter(|icon| icon.fixed)
            .map(|icon| PositionRecord::new(icon.id.clone(), icon.origin))
            .chain(self.unmatched.iter().cloned())
            .collect()
    }

    /// Applies saved positions. Icons in the set become fixed right away;
    /// the rest are kept until their icon shows up. Returns how many icons
    /// were matched.
    pub fn apply_positions(&mut self, records: Vec<PositionRecord>) -> usize {
        let mut matched = 0;
        for record in records {
            match self.icons.get_mut(&record.id) {
                Some(icon) => {
                    icon.move_to(record.origin);
                    icon.fixed = true;
                    matched += 1;
                }
                None => {
                    self.unmatched.retain(|r| r.id != record.id);
                    self.unmatched.push(record);
                }
            }
        }
        if matched > 0 {
            self.request_recompute(LayoutTrigger::POSITIONS);
        }
        matched
    }

    pub fn load_positions(&mut self) -> Result<usize, StoreError> {
        let Some(store) = &self.store else { return Ok(0) };
        let records = store.load()?;
        Ok(self.apply_positions(records))
    }

    pub fn save_positions(&self) -> Result<(), StoreError> {
        match &self.store {
            Some(store) => store.save(&self.position_records()),
            None => Ok(()),
        }
    }
}

fn measure_label(
    icon: &mut IconPlacement,
    measure: &dyn TextMeasure,
    font: &str,
    metrics: &CellMetrics,
    version: u64,
) -> Rect {
    let IconPlacement { label, label_cache, .. } = icon;
    let text = label.as_str();
    label_cache.get_or_measure(text, version, || {
        measure.measure(font, text, metrics.text_max_w, metrics.text_max_h)
    })
}

/// Takes the generator's current cell and steps past it.
fn next_candidate(
    generator: &mut PlacementGenerator,
    glyph: Option<Size>,
    label: Rect,
    metrics: &CellMetrics,
) -> (Point, Footprint) {
    let origin = generator.position();
    generator.advance();
    (origin, Footprint::at(origin, glyph, label, metrics))
}

/// Which parts of the layout a settings change invalidates.
pub fn settings_triggers(old: &LayoutSettings, new: &LayoutSettings) -> LayoutTrigger {
    let mut triggers = LayoutTrigger::empty();
    if old.arrange_in_rows != new.arrange_in_rows
        || old.arrange_rtl != new.arrange_rtl
        || old.arrange_btt != new.arrange_btt
        || old.tier_offset != new.tier_offset
        || old.max_placement_attempts != new.max_placement_attempts
    {
        triggers |= LayoutTrigger::FLOW;
    }
    if old.icon_size != new.icon_size
        || old.font != new.font
        || old.spacing != new.spacing
        || old.padding != new.padding
        || old.margin != new.margin
    {
        triggers |= LayoutTrigger::CELL_SIZE;
    }
    triggers
}

/// Rounds `point` to the nearest cell of a grid anchored at `origin`.
/// Halfway offsets round away from the origin.
pub fn snap_point(point: Point, origin: Point, cell: Size) -> Point {
    let snap = |value: i32, origin: i32, cell: i32| {
        if cell <= 0 {
            return value;
        }
        let cells = (f64::from(value - origin) / f64::from(cell)).round() as i32;
        origin + cells * cell
    };
    Point::new(
        snap(point.x, origin.x, cell.width),
        snap(point.y, origin.y, cell.height),
    )
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use pretty_assertions::assert_eq;
    use test_log::test;

    use super::*;

    /// Every label measures 40x15; lines are 15px, so cells are 116x102.
    struct FixedMeasure(Rc<Cell<usize>>);

    impl TextMeasure for FixedMeasure {
        fn line_height(&self, _font: &str) -> i32 { 15 }

        fn measure(&self, _font: &str, _text: &str, _max_w: i32, _max_h: i32) -> Rect {
            self.0.set(self.0.get() + 1);
            Rect::new(0, 0, 40, 15)
        }
    }

    struct Reserved(Vec<Rect>);

    impl ObstacleSource for Reserved {
        fn test_overlap(&self, rect: &Rect) -> bool { self.0.iter().any(|r| r.intersects(rect)) }
    }

    const CELL_W: i32 = 116;
    const CELL_H: i32 = 102;

    fn settings() -> LayoutSettings {
        LayoutSettings {
            margin: 0,
            ..LayoutSettings::default()
        }
    }

    fn engine() -> (IconLayout, Rc<Cell<usize>>) {
        let measured = Rc::new(Cell::new(0));
        let mut engine = IconLayout::new(Box::new(FixedMeasure(measured.clone())));
        engine.set_working_area(Rect::new(0, 0, CELL_W * 4, CELL_H * 3));
        (engine, measured)
    }

    fn ids(names: &[&str]) -> Vec<IconId> { names.iter().map(|n| IconId::new(*n)).collect() }

    fn specs(names: &[&str]) -> Vec<IconSpec> { names.iter().map(|n| IconSpec::new(*n)).collect() }

    fn origins(engine: &IconLayout) -> Vec<(String, Point)> {
        engine.icons().map(|i| (i.id.to_string(), i.origin)).collect()
    }

    #[test]
    fn free_icons_fill_columns_in_listing_order() {
        let (mut engine, _) = engine();
        engine.set_icons(specs(&["a", "b", "c", "d"]));
        engine.recompute(&settings(), &NoObstacles);

        assert_eq!(origins(&engine), vec![
            ("a".to_string(), Point::new(0, 0)),
            ("b".to_string(), Point::new(0, CELL_H)),
            ("c".to_string(), Point::new(0, CELL_H * 2)),
            ("d".to_string(), Point::new(CELL_W, 0)),
        ]);
    }

    #[test]
    fn recompute_is_idempotent() {
        let (mut engine, _) = engine();
        engine.set_icons(specs(&["a", "b", "c", "d", "e"]));
        engine.apply_positions(vec![PositionRecord::new("c".into(), Point::new(5, 7))]);
        let obstacles = Reserved(vec![Rect::new(0, 0, 10, 10)]);

        engine.recompute(&settings(), &obstacles);
        let first = engine.placements();
        engine.recompute(&settings(), &obstacles);
        assert_eq!(engine.placements(), first);
    }

    #[test]
    fn free_icons_avoid_fixed_icons_and_reservations() {
        let (mut engine, _) = engine();
        engine.set_icons(specs(&["fixed", "a", "b"]));
        engine.apply_positions(vec![PositionRecord::new("fixed".into(), Point::new(0, 0))]);
        let obstacles = Reserved(vec![Rect::new(40, CELL_H + 10, 10, 10)]);

        engine.recompute(&settings(), &obstacles);

        assert_eq!(engine.icon(&"fixed".into()).unwrap().origin, Point::new(0, 0));
        assert_eq!(engine.icon(&"a".into()).unwrap().origin, Point::new(0, CELL_H * 2));
        assert_eq!(engine.icon(&"b".into()).unwrap().origin, Point::new(CELL_W, 0));

        let placed = engine.placements();
        let fixed = placed[0].icon_rect.union(&placed[0].text_rect);
        for icon in &placed[1..] {
            assert!(!fixed.intersects(&icon.icon_rect) && !fixed.intersects(&icon.text_rect));
            assert!(!obstacles.test_overlap(&icon.icon_rect));
            assert!(!obstacles.test_overlap(&icon.text_rect));
        }
    }

    #[test]
    fn fixed_icons_never_move() {
        let (mut engine, _) = engine();
        engine.set_icons(specs(&["a", "b"]));
        engine.apply_positions(vec![PositionRecord::new("a".into(), Point::new(333, 44))]);
        for area in [Rect::new(0, 0, 200, 200), Rect::new(50, 50, 900, 700)] {
            engine.set_working_area(area);
            engine.recompute(&settings(), &Reserved(vec![Rect::new(300, 0, 100, 100)]));
            assert_eq!(engine.icon(&"a".into()).unwrap().origin, Point::new(333, 44));
        }
    }

    #[test]
    fn mutations_coalesce_into_one_recompute() {
        let (mut engine, _) = engine();
        engine.recompute(&settings(), &NoObstacles);
        let woken = Rc::new(Cell::new(0));
        let counter = woken.clone();
        engine.set_waker(Box::new(move || counter.set(counter.get() + 1)));

        engine.set_icons(specs(&["a", "b"]));
        engine.push_icon(IconSpec::new("c"));
        engine.remove_icon(&"a".into());
        engine.set_working_area(Rect::new(0, 0, 800, 600));
        engine.update_icon(IconSpec::new("b").with_label("Bee"));
        assert_eq!(woken.get(), 1);
        assert_eq!(
            engine.pending_triggers(),
            LayoutTrigger::ICONS | LayoutTrigger::WORKING_AREA
        );

        assert!(engine.flush(&settings(), &NoObstacles));
        assert!(!engine.flush(&settings(), &NoObstacles));
        assert_eq!(engine.recompute_count(), 2);
        assert_eq!(engine.pending_triggers(), LayoutTrigger::empty());
    }

    #[test]
    fn unchanged_working_area_does_not_queue() {
        let (mut engine, _) = engine();
        engine.recompute(&settings(), &NoObstacles);
        assert!(!engine.set_working_area(Rect::new(0, 0, CELL_W * 4, CELL_H * 3)));
        assert!(!engine.is_pending());
    }

    #[test]
    fn exhausted_attempts_keep_later_icons_on_screen() {
        let (mut engine, _) = engine();
        engine.set_icons(specs(&["a", "b", "c"]));
        let everything = Reserved(vec![Rect::new(-10_000, -10_000, 20_000, 20_000)]);
        let settings = LayoutSettings {
            max_placement_attempts: 7,
            ..settings()
        };
        engine.recompute(&settings, &everything);

        assert_eq!(origins(&engine), vec![
            ("a".to_string(), Point::new(0, 0)),
            ("b".to_string(), Point::new(0, CELL_H)),
            ("c".to_string(), Point::new(0, CELL_H * 2)),
        ]);
        let area = engine.working_area();
        for icon in engine.icons() {
            assert!(icon.is_placed());
            assert!(
                area.x <= icon.origin.x
                    && icon.origin.x < area.right()
                    && area.y <= icon.origin.y
                    && icon.origin.y < area.bottom(),
                "{} off-screen at {:?}",
                icon.id,
                icon.origin
            );
        }
    }

    #[test]
    fn extreme_saved_coordinates_lay_out_without_overflow() {
        let (mut engine, _) = engine();
        engine.set_icons(specs(&["a", "b", "c"]));
        let mut records = crate::model::position_store::parse("[a]\nx=2147483647\ny=0\n");
        records.push(PositionRecord::new("b".into(), Point::new(i32::MAX, i32::MAX)));
        assert_eq!(engine.apply_positions(records), 2);

        engine.recompute(&settings(), &NoObstacles);
        assert_eq!(origins(&engine), vec![
            ("a".to_string(), Point::new(crate::model::position_store::MAX_COORDINATE, 0)),
            ("b".to_string(), Point::new(i32::MAX, i32::MAX)),
            ("c".to_string(), Point::new(0, 0)),
        ]);
        let c = engine.icon(&"c".into()).unwrap().footprint.unwrap().icon_rect;
        assert_eq!(engine.hit_test(Point::new(c.x + 1, c.y + 1)), Some(&IconId::new("c")));
    }

    #[test]
    fn snap_rounds_to_nearest_cell() {
        let cell = Size::new(80, 60);
        let origin = Point::new(0, 0);
        assert_eq!(snap_point(Point::new(83, 58), origin, cell), Point::new(80, 60));
        assert_eq!(snap_point(Point::new(40, 30), origin, cell), Point::new(80, 60));
        assert_eq!(snap_point(Point::new(-40, -30), origin, cell), Point::new(-80, -60));
        assert_eq!(snap_point(Point::new(39, 29), origin, cell), Point::new(0, 0));
        assert_eq!(
            snap_point(Point::new(30, 30), Point::new(10, 10), cell),
            Point::new(10, 10)
        );
    }

    #[test]
    fn snap_to_grid_moves_only_fixed_icons() {
        let (mut engine, _) = engine();
        engine.set_icons(specs(&["a", "b"]));
        engine.recompute(&settings(), &NoObstacles);
        engine.apply_positions(vec![PositionRecord::new("a".into(), Point::new(CELL_W + 3, 60))]);

        let b_before = engine.icon(&"b".into()).unwrap().origin;
        let snapped = engine.snap_to_grid(&ids(&["a", "b"]), &settings()).unwrap();
        assert_eq!(snapped, 1);
        assert_eq!(engine.icon(&"a".into()).unwrap().origin, Point::new(CELL_W, CELL_H));
        assert_eq!(engine.icon(&"b".into()).unwrap().origin, b_before);
        assert!(engine.is_pending());
    }

    #[test]
    fn snap_origin_follows_rtl() {
        let (mut engine, _) = engine();
        engine.set_working_area(Rect::new(0, 0, 1000, 600));
        engine.set_icons(specs(&["a"]));
        engine.apply_positions(vec![PositionRecord::new("a".into(), Point::new(1000 - CELL_W - 10, 5))]);
        let settings = LayoutSettings {
            arrange_rtl: true,
            ..settings()
        };
        engine.snap_to_grid(&ids(&["a"]), &settings).unwrap();
        assert_eq!(engine.icon(&"a".into()).unwrap().origin, Point::new(1000 - CELL_W, 0));
    }

    #[test]
    fn fix_and_release_round_trip_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("desktop-items-0-0.conf"));
        let (engine, _) = engine();
        let mut engine = engine.with_store(store.clone());
        engine.set_icons(specs(&["a", "b", "c"]));
        engine.recompute(&settings(), &NoObstacles);
        assert!(engine.take_changed());

        assert_eq!(engine.fix_icons(&ids(&["b", "missing"])).unwrap(), 1);
        assert!(engine.take_changed());
        assert_eq!(engine.fix_icons(&ids(&["b"])).unwrap(), 0);
        assert!(!engine.take_changed());
        assert_eq!(store.load().unwrap(), vec![PositionRecord::new(
            "b".into(),
            Point::new(0, CELL_H)
        )]);

        engine.move_icon(&"a".into(), Point::new(400, 200)).unwrap();
        engine.flush(&settings(), &NoObstacles);
        assert_eq!(engine.icon(&"c".into()).unwrap().origin, Point::new(0, 0));

        let released = engine.release_icons(&ids(&["a", "b"]), &settings(), &NoObstacles).unwrap();
        assert_eq!(released, 2);
        assert!(!engine.is_pending());
        assert!(engine.take_changed());
        assert!(store.load().unwrap().is_empty());
        assert_eq!(origins(&engine), vec![
            ("a".to_string(), Point::new(0, 0)),
            ("b".to_string(), Point::new(0, CELL_H)),
            ("c".to_string(), Point::new(0, CELL_H * 2)),
        ]);
    }

    #[test]
    fn reload_keeps_fixed_icons_by_identity() {
        let (mut engine, _) = engine();
        engine.set_icons(specs(&["a", "b"]));
        engine.recompute(&settings(), &NoObstacles);
        engine.move_icon(&"b".into(), Point::new(250, 150)).unwrap();

        engine.set_icons(specs(&["z", "b", "a"]));
        engine.recompute(&settings(), &NoObstacles);
        let b = engine.icon(&"b".into()).unwrap();
        assert!(b.fixed);
        assert_eq!(b.origin, Point::new(250, 150));
    }

    #[test]
    fn saved_positions_wait_for_their_icon() {
        let (mut engine, _) = engine();
        assert_eq!(
            engine.apply_positions(vec![PositionRecord::new("late".into(), Point::new(9, 9))]),
            0
        );
        assert_eq!(engine.position_records().len(), 1);

        engine.insert_icon(0, IconSpec::new("late"));
        engine.recompute(&settings(), &NoObstacles);
        let late = engine.icon(&"late".into()).unwrap();
        assert!(late.fixed);
        assert_eq!(late.origin, Point::new(9, 9));
        assert_eq!(engine.position_records(), vec![PositionRecord::new(
            "late".into(),
            Point::new(9, 9)
        )]);
    }

    #[test]
    fn removed_icons_drop_their_position() {
        let (mut engine, _) = engine();
        engine.set_icons(specs(&["a"]));
        engine.apply_positions(vec![PositionRecord::new("a".into(), Point::new(1, 1))]);
        assert!(engine.remove_icon(&"a".into()));
        assert!(engine.position_records().is_empty());
        assert!(!engine.remove_icon(&"a".into()));
    }

    #[test]
    fn hit_test_uses_strict_containment() {
        let (mut engine, _) = engine();
        engine.set_icons(specs(&["a"]));
        engine.recompute(&settings(), &NoObstacles);
        let a = engine.placements()[0].clone();
        let inside = Point::new(a.icon_rect.x + 1, a.icon_rect.y + 1);
        let edge = Point::new(a.icon_rect.x, a.icon_rect.y + 1);
        assert_eq!(engine.hit_test(inside), Some(&IconId::new("a")));
        assert_eq!(engine.hit_test(edge), None);
        assert_eq!(engine.hit_test(Point::new(CELL_W * 3, CELL_H * 2)), None);
    }

    #[test]
    fn labels_are_remeasured_only_when_text_or_font_change() {
        let (mut engine, measured) = engine();
        engine.set_icons(specs(&["a", "b"]));
        engine.recompute(&settings(), &NoObstacles);
        engine.recompute(&settings(), &NoObstacles);
        assert_eq!(measured.get(), 2);

        engine.update_icon(IconSpec::new("a").with_label("renamed"));
        engine.recompute(&settings(), &NoObstacles);
        assert_eq!(measured.get(), 3);

        let bigger = LayoutSettings {
            font: "Sans 20".to_string(),
            ..settings()
        };
        assert_eq!(engine.apply_settings(&settings(), &bigger), LayoutTrigger::CELL_SIZE);
        let version = engine.metrics_version();
        engine.recompute(&bigger, &NoObstacles);
        assert_eq!(engine.metrics_version(), version + 1);
        assert_eq!(measured.get(), 5);
    }

    #[test]
    fn settings_triggers_classify_changes() {
        let base = settings();
        assert_eq!(settings_triggers(&base, &base), LayoutTrigger::empty());
        let flow = LayoutSettings {
            arrange_in_rows: true,
            ..base.clone()
        };
        assert_eq!(settings_triggers(&base, &flow), LayoutTrigger::FLOW);
        let both = LayoutSettings {
            arrange_btt: true,
            icon_size: 64,
            ..base.clone()
        };
        assert_eq!(
            settings_triggers(&base, &both),
            LayoutTrigger::FLOW | LayoutTrigger::CELL_SIZE
        );
    }

    #[test]
    fn rows_rtl_flow_starts_top_right() {
        let (mut engine, _) = engine();
        engine.set_icons(specs(&["a", "b"]));
        let settings = LayoutSettings {
            arrange_in_rows: true,
            arrange_rtl: true,
            ..settings()
        };
        engine.recompute(&settings, &NoObstacles);
        assert_eq!(origins(&engine), vec![
            ("a".to_string(), Point::new(CELL_W * 3, 0)),
            ("b".to_string(), Point::new(CELL_W * 2, 0)),
        ]);
    }
}
