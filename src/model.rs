pub mod icon;
pub mod position_store;
pub mod reservations;

pub use icon::{Footprint, IconId, IconPlacement, IconSpec};
pub use position_store::{PositionRecord, PositionStore, StoreError};
pub use reservations::ReservationTracker;
