pub mod engine;
pub mod metrics;
pub mod placement;

pub use engine::{
    IconLayout, LayoutTrigger, NoObstacles, ObstacleSource, PlacedIcon, settings_triggers,
    snap_point,
};
pub use metrics::{CellMetrics, EstimatedTextMeasure, TextMeasure};
pub use placement::{FlowRules, PlacementGenerator, TierOffset};
