//! The seam between the reservation tracker and the windowing system.
//!
//! Only two pieces of the windowing system are consumed: the root-level list
//! of top-level client windows, and a per-window CARDINAL property in which a
//! window publishes the rectangle it wants kept free of desktop icons.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::collections::{HashMap, HashSet};
use crate::sys::geometry::Rect;

/// Per-window property holding `x, y, width, height` of a reserved area.
pub const RESERVATION_PROPERTY: &str = "_SDE_DONT_OVERLAP_DESKTOP_ICONS";

#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowId(pub u32);

impl WindowId {
    #[inline]
    pub fn new(id: u32) -> Self { Self(id) }

    #[inline]
    pub fn as_u32(self) -> u32 { self.0 }
}

/// Notifications delivered by the windowing system on the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowSystemEvent {
    /// The root client list property changed.
    ClientListChanged,
    /// A property changed on a watched window.
    PropertyChanged { window: WindowId, property: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WindowSystemError {
    #[error("window {0:?} does not exist")]
    BadWindow(WindowId),
}

pub trait WindowSystem {
    /// Current top-level windows (`_NET_CLIENT_LIST` on the root window), or
    /// `None` when that property is not set at all.
    fn client_list(&self) -> Result<Option<Vec<WindowId>>, WindowSystemError>;

    /// Starts delivering property change notifications for `window`.
    fn watch_properties(&mut self, window: WindowId) -> Result<(), WindowSystemError>;

    fn unwatch_properties(&mut self, window: WindowId);

    /// Reads a CARDINAL property. `None` means the property is absent.
    fn cardinal_property(
        &self,
        window: WindowId,
        property: &str,
    ) -> Result<Option<Vec<u32>>, WindowSystemError>;
}

#[derive(Debug, Default)]
struct SnapshotState {
    clients: Option<Vec<WindowId>>,
    properties: HashMap<(WindowId, String), Vec<u32>>,
    watched: HashSet<WindowId>,
    broken: HashSet<WindowId>,
    property_reads: usize,
}

/// An in-memory windowing system. Clones share state, so a host (or a test)
/// can keep a handle and mutate the snapshot after handing a clone to the
/// tracker.
#[derive(Debug, Clone, Default)]
pub struct SnapshotWindowSystem(Rc<RefCell<SnapshotState>>);

impl SnapshotWindowSystem {
    pub fn new() -> Self { Self::default() }

    /// Builds a snapshot from `(window, reservation)` pairs, in client list
    /// order.
    pub fn from_windows<I>(windows: I) -> Self
    where I: IntoIterator<Item = (WindowId, Option<Rect>)> {
        let this = Self::new();
        let mut clients = Vec::new();
        for (window, reservation) in windows {
            clients.push(window);
            if let Some(rect) = reservation {
                this.set_reservation(window, rect);
            }
        }
        this.set_clients(clients);
        this
    }

    pub fn set_clients(&self, clients: Vec<WindowId>) { self.0.borrow_mut().clients = Some(clients); }

    pub fn clear_client_list(&self) { self.0.borrow_mut().clients = None; }

    pub fn add_client(&self, window: WindowId) {
        let mut state = self.0.borrow_mut();
        let clients = state.clients.get_or_insert_with(Vec::new);
        if !clients.contains(&window) {
            clients.push(window);
        }
    }

    pub fn remove_client(&self, window: WindowId) {
        if let Some(clients) = self.0.borrow_mut().clients.as_mut() {
            clients.retain(|w| *w != window);
        }
    }

    pub fn set_property(&self, window: WindowId, property: &str, values: Vec<u32>) {
        self.0.borrow_mut().properties.insert((window, property.to_string()), values);
    }

    pub fn remove_property(&self, window: WindowId, property: &str) {
        self.0.borrow_mut().properties.remove(&(window, property.to_string()));
    }

    pub fn set_reservation(&self, window: WindowId, rect: Rect) {
        self.set_property(
            window,
            RESERVATION_PROPERTY,
            vec![rect.x as u32, rect.y as u32, rect.width as u32, rect.height as u32],
        );
    }

    pub fn clear_reservation(&self, window: WindowId) { self.remove_property(window, RESERVATION_PROPERTY); }

    /// Makes every property read on `window` fail.
    pub fn break_window(&self, window: WindowId) { self.0.borrow_mut().broken.insert(window); }

    pub fn is_watched(&self, window: WindowId) -> bool { self.0.borrow().watched.contains(&window) }

    pub fn property_reads(&self) -> usize { self.0.borrow().property_reads }
}

impl WindowSystem for SnapshotWindowSystem {
    fn client_list(&self) -> Result<Option<Vec<WindowId>>, WindowSystemError> {
        Ok(self.0.borrow().clients.clone())
    }

    fn watch_properties(&mut self, window: WindowId) -> Result<(), WindowSystemError> {
        let mut state = self.0.borrow_mut();
        if state.broken.contains(&window) {
            return Err(WindowSystemError::BadWindow(window));
        }
        state.watched.insert(window);
        Ok(())
    }

    fn unwatch_properties(&mut self, window: WindowId) { self.0.borrow_mut().watched.remove(&window); }

    fn cardinal_property(
        &self,
        window: WindowId,
        property: &str,
    ) -> Result<Option<Vec<u32>>, WindowSystemError> {
        let mut state = self.0.borrow_mut();
        state.property_reads += 1;
        if state.broken.contains(&window) {
            return Err(WindowSystemError::BadWindow(window));
        }
        Ok(state.properties.get(&(window, property.to_string())).cloned())
    }
}
