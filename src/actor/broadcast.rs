use serde::Serialize;

use crate::layout_engine::PlacedIcon;
use crate::sys::geometry::Rect;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum BroadcastEvent {
    LayoutChanged {
        working_area: Rect,
        icons: Vec<PlacedIcon>,
    },
}

pub type BroadcastSender = tokio::sync::broadcast::Sender<BroadcastEvent>;
pub type BroadcastReceiver = tokio::sync::broadcast::Receiver<BroadcastEvent>;
