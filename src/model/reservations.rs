//! Tracks top-level windows that ask for part of the desktop to be kept
//! clear of icons.
//!
//! Windows are discovered through the root client list and remembered in an
//! arena. Each refresh marks every window still listed with the current
//! generation; records left on an older generation are evicted. A change to
//! the set of reserved areas schedules one coalesced notification, delivered
//! on [`ReservationTracker::flush`].

use slotmap::{SlotMap, new_key_type};
use tracing::{debug, trace, warn};

use crate::common::collections::HashMap;
use crate::common::deferred::{Deferred, Waker};
use crate::layout_engine::ObstacleSource;
use crate::sys::geometry::Rect;
use crate::sys::window_system::{
    RESERVATION_PROPERTY, WindowId, WindowSystem, WindowSystemEvent,
};

new_key_type! {
    struct TrackedKey;
}

#[derive(Debug, Clone)]
struct TrackedWindow {
    id: WindowId,
    reservation: Option<Rect>,
    generation: u64,
}

pub type OverlapHandler = Box<dyn FnMut()>;

pub struct ReservationTracker {
    window_system: Box<dyn WindowSystem>,
    windows: SlotMap<TrackedKey, TrackedWindow>,
    by_id: HashMap<WindowId, TrackedKey>,
    generation: u64,
    notification: Deferred,
    handlers: Vec<OverlapHandler>,
}

impl ReservationTracker {
    pub fn new(window_system: Box<dyn WindowSystem>) -> Self {
        Self {
            window_system,
            windows: SlotMap::with_key(),
            by_id: HashMap::default(),
            generation: 0,
            notification: Deferred::new(),
            handlers: Vec::new(),
        }
    }

    /// Registers a handler run once per coalesced change of the reserved set.
    pub fn on_overlap_state_changed(&mut self, handler: impl FnMut() + 'static) {
        self.handlers.push(Box::new(handler));
    }

    /// Called when a notification becomes pending, so the host can schedule
    /// a [`flush`](Self::flush).
    pub fn set_waker(&mut self, waker: Waker) { self.notification.set_waker(waker); }

    pub fn handle_event(&mut self, event: &WindowSystemEvent) {
        match event {
            WindowSystemEvent::ClientListChanged => self.refresh(),
            WindowSystemEvent::PropertyChanged { window, property } => {
                if property == RESERVATION_PROPERTY {
                    self.reread(*window);
                }
            }
        }
    }

    /// Reconciles the tracked set with the current client list.
    pub fn refresh(&mut self) {
        let clients = match self.window_system.client_list() {
            Ok(Some(clients)) => clients,
            Ok(None) => {
                debug!("client list is not set, keeping tracked windows");
                return;
            }
            Err(e) => {
                warn!("failed to read client list: {e}");
                return;
            }
        };

        self.generation += 1;
        let generation = self.generation;

        for id in clients {
            match self.by_id.get(&id) {
                Some(&key) => self.windows[key].generation = generation,
                None => self.track(id, generation),
            }
        }

        self.sweep(generation);
    }

    /// Re-reads the reservation of a tracked window after its property
    /// changed. Untracked windows are ignored.
    pub fn reread(&mut self, id: WindowId) {
        let Some(&key) = self.by_id.get(&id) else {
            trace!(?id, "property change on untracked window");
            return;
        };
        if self.update_reservation(key) {
            self.notification.request();
        }
    }

    /// True if `rect` intersects any active reservation.
    pub fn test_overlap(&self, rect: &Rect) -> bool {
        self.windows
            .values()
            .filter_map(|w| w.reservation.as_ref())
            .any(|reserved| reserved.intersects(rect))
    }

    pub fn reservations(&self) -> impl Iterator<Item = (WindowId, Rect)> + '_ {
        self.windows.values().filter_map(|w| w.reservation.map(|r| (w.id, r)))
    }

    pub fn is_tracked(&self, id: WindowId) -> bool { self.by_id.contains_key(&id) }

    pub fn len(&self) -> usize { self.windows.len() }

    pub fn is_empty(&self) -> bool { self.windows.is_empty() }

    pub fn has_pending_notification(&self) -> bool { self.notification.is_pending() }

    /// Delivers the pending notification, if any. Returns whether handlers
    /// ran.
    pub fn flush(&mut self) -> bool {
        if !self.notification.take() {
            return false;
        }
        debug!(handlers = self.handlers.len(), "overlap state changed");
        for handler in &mut self.handlers {
            handler();
        }
        true
    }

    fn track(&mut self, id: WindowId, generation: u64) {
        if let Err(e) = self.window_system.watch_properties(id) {
            debug!(?id, "cannot watch window properties: {e}");
        }
        let key = self.windows.insert(TrackedWindow {
            id,
            reservation: None,
            generation,
        });
        self.by_id.insert(id, key);
        trace!(?id, "tracking window");

        if self.update_reservation(key) {
            self.notification.request();
        }
    }

    fn sweep(&mut self, generation: u64) {
        let stale: Vec<TrackedKey> = self
            .windows
            .iter()
            .filter(|(_, w)| w.generation != generation)
            .map(|(key, _)| key)
            .collect();

        for key in stale {
            let Some(window) = self.windows.remove(key) else { continue };
            self.by_id.remove(&window.id);
            self.window_system.unwatch_properties(window.id);
            trace!(id = ?window.id, "window went away");
            if window.reservation.is_some() {
                self.notification.request();
            }
        }
    }

    /// Returns true if the stored reservation changed.
    fn update_reservation(&mut self, key: TrackedKey) -> bool {
        let Some(window) = self.windows.get(key) else { return false };
        let reservation = self.read_reservation(window.id);
        let window = &mut self.windows[key];
        if window.reservation == reservation {
            return false;
        }
        debug!(id = ?window.id, ?reservation, "reservation changed");
        window.reservation = reservation;
        true
    }

    fn read_reservation(&self, id: WindowId) -> Option<Rect> {
        match self.window_system.cardinal_property(id, RESERVATION_PROPERTY) {
            Ok(Some(values)) => match values.as_slice() {
                &[x, y, width, height] => {
                    let coord = |v: u32| i32::try_from(v).unwrap_or(i32::MAX);
                    Some(Rect::new(coord(x), coord(y), coord(width), coord(height)))
                }
                other => {
                    trace!(?id, count = other.len(), "malformed reservation");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                debug!(?id, "failed to read reservation: {e}");
                None
            }
        }
    }
}

impl ObstacleSource for ReservationTracker {
    fn test_overlap(&self, rect: &Rect) -> bool { ReservationTracker::test_overlap(self, rect) }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use pretty_assertions::assert_eq;
    use test_log::test;

    use super::*;
    use crate::sys::window_system::SnapshotWindowSystem;

    fn w(id: u32) -> WindowId { WindowId::new(id) }

    fn tracker(ws: &SnapshotWindowSystem) -> (ReservationTracker, Rc<Cell<usize>>) {
        let mut tracker = ReservationTracker::new(Box::new(ws.clone()));
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        tracker.on_overlap_state_changed(move || counter.set(counter.get() + 1));
        (tracker, count)
    }

    #[test]
    fn discovers_reserving_windows() {
        let ws = SnapshotWindowSystem::from_windows([
            (w(1), None),
            (w(2), Some(Rect::new(0, 0, 100, 50))),
        ]);
        let (mut tracker, notified) = tracker(&ws);

        tracker.refresh();
        assert_eq!(tracker.len(), 2);
        assert!(ws.is_watched(w(1)) && ws.is_watched(w(2)));
        assert!(tracker.test_overlap(&Rect::new(90, 40, 20, 20)));
        assert!(!tracker.test_overlap(&Rect::new(100, 0, 20, 20)));

        assert!(tracker.flush());
        assert!(!tracker.flush());
        assert_eq!(notified.get(), 1);
    }

    #[test]
    fn unrelated_refreshes_do_not_notify() {
        let ws = SnapshotWindowSystem::from_windows([(w(1), Some(Rect::new(0, 0, 10, 10)))]);
        let (mut tracker, notified) = tracker(&ws);
        tracker.refresh();
        tracker.flush();

        ws.add_client(w(2));
        tracker.refresh();
        tracker.refresh();
        assert!(!tracker.flush());
        assert_eq!(notified.get(), 1);
    }

    #[test]
    fn closed_windows_are_collected() {
        let ws = SnapshotWindowSystem::from_windows([
            (w(1), Some(Rect::new(0, 0, 10, 10))),
            (w(2), None),
        ]);
        let (mut tracker, notified) = tracker(&ws);
        tracker.refresh();
        tracker.flush();

        ws.remove_client(w(2));
        tracker.refresh();
        assert!(!tracker.is_tracked(w(2)));
        assert!(!ws.is_watched(w(2)));
        assert!(!tracker.flush(), "non-reserving window closed");

        ws.remove_client(w(1));
        tracker.refresh();
        assert!(tracker.is_empty());
        assert!(!tracker.test_overlap(&Rect::new(0, 0, 5, 5)));
        assert!(tracker.flush());
        assert_eq!(notified.get(), 2);
    }

    #[test]
    fn missing_client_list_keeps_tracked_windows() {
        let ws = SnapshotWindowSystem::from_windows([(w(1), Some(Rect::new(0, 0, 10, 10)))]);
        let (mut tracker, _) = tracker(&ws);
        tracker.refresh();

        ws.clear_client_list();
        tracker.refresh();
        assert!(tracker.is_tracked(w(1)));
    }

    #[test]
    fn property_changes_are_reread() {
        let ws = SnapshotWindowSystem::from_windows([(w(1), None)]);
        let (mut tracker, notified) = tracker(&ws);
        tracker.refresh();
        assert!(!tracker.flush());

        ws.set_reservation(w(1), Rect::new(5, 5, 10, 10));
        tracker.handle_event(&WindowSystemEvent::PropertyChanged {
            window: w(1),
            property: RESERVATION_PROPERTY.to_string(),
        });
        tracker.handle_event(&WindowSystemEvent::PropertyChanged {
            window: w(1),
            property: RESERVATION_PROPERTY.to_string(),
        });
        assert!(tracker.flush());
        assert_eq!(notified.get(), 1);

        let reads = ws.property_reads();
        tracker.handle_event(&WindowSystemEvent::PropertyChanged {
            window: w(1),
            property: "WM_NAME".to_string(),
        });
        assert_eq!(ws.property_reads(), reads);

        ws.clear_reservation(w(1));
        tracker.reread(w(1));
        assert!(tracker.flush());
        assert_eq!(tracker.reservations().count(), 0);
    }

    #[test]
    fn malformed_or_unreadable_properties_reserve_nothing() {
        let ws = SnapshotWindowSystem::from_windows([(w(1), None), (w(2), None)]);
        ws.set_property(w(1), RESERVATION_PROPERTY, vec![0, 0, 100]);
        ws.set_reservation(w(2), Rect::new(0, 0, 100, 100));
        ws.break_window(w(2));
        let (mut tracker, notified) = tracker(&ws);

        tracker.refresh();
        assert_eq!(tracker.len(), 2);
        assert!(!tracker.test_overlap(&Rect::new(0, 0, 50, 50)));
        assert!(!tracker.flush());
        assert_eq!(notified.get(), 0);
    }

    #[test]
    fn oversized_reservations_are_clamped() {
        let ws = SnapshotWindowSystem::from_windows([(w(1), None)]);
        ws.set_property(w(1), RESERVATION_PROPERTY, vec![u32::MAX, 0, u32::MAX, 10]);
        let (mut tracker, _) = tracker(&ws);

        tracker.refresh();
        assert_eq!(tracker.reservations().collect::<Vec<_>>(), vec![(
            w(1),
            Rect::new(i32::MAX, 0, i32::MAX, 10)
        )]);
        assert!(!tracker.test_overlap(&Rect::new(0, 0, 100, 100)));
    }

    #[test]
    fn client_list_event_refreshes() {
        let ws = SnapshotWindowSystem::new();
        let (mut tracker, _) = tracker(&ws);
        ws.add_client(w(7));
        ws.set_reservation(w(7), Rect::new(1, 2, 3, 4));
        tracker.handle_event(&WindowSystemEvent::ClientListChanged);
        assert_eq!(tracker.reservations().collect::<Vec<_>>(), vec![(
            w(7),
            Rect::new(1, 2, 3, 4)
        )]);
    }
}
