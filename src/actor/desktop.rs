//! The desktop actor owns the layout engine and the reservation tracker of
//! one desktop surface and serializes every mutation through its event loop.
//!
//! Events are handled in bursts. Once the queue is empty the actor reaches its
//! idle point: pending reservation notifications go out first, then the
//! pending recompute runs, then queued queries are answered.

use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::actor::{self, broadcast::BroadcastEvent, broadcast::BroadcastSender};
use crate::common::config::Config;
use crate::layout_engine::{IconLayout, LayoutTrigger, PlacedIcon};
use crate::model::icon::{IconId, IconSpec};
use crate::model::reservations::ReservationTracker;
use crate::sys::geometry::{Point, Rect};
use crate::sys::window_system::WindowSystemEvent;

#[derive(Debug)]
pub enum Event {
    /// The listing was (re)loaded.
    IconsReplaced(Vec<IconSpec>),
    IconInserted {
        index: usize,
        spec: IconSpec,
    },
    IconRemoved(IconId),
    IconChanged(IconSpec),
    IconsReordered(Vec<IconId>),
    WorkingAreaChanged(Rect),
    WindowSystem(WindowSystemEvent),
    /// Emitted by the tracker when the set of reserved areas changed.
    OverlapStateChanged,
    ConfigUpdated(Config),

    Fix(Vec<IconId>),
    Release(Vec<IconId>),
    SnapToGrid(Vec<IconId>),
    Move {
        icon: IconId,
        to: Point,
    },

    /// Answered at the next idle point, after pending layout work.
    QueryLayout(oneshot::Sender<Vec<PlacedIcon>>),
    HitTest {
        point: Point,
        reply: oneshot::Sender<Option<IconId>>,
    },
}

pub type Sender = actor::Sender<Event>;
pub type Receiver = actor::Receiver<Event>;

enum Query {
    Layout(oneshot::Sender<Vec<PlacedIcon>>),
    HitTest {
        point: Point,
        reply: oneshot::Sender<Option<IconId>>,
    },
}

pub struct Desktop {
    config: Config,
    layout: IconLayout,
    tracker: ReservationTracker,
    broadcast_tx: Option<BroadcastSender>,
    queries: Vec<Query>,
}

impl Desktop {
    pub fn new(
        config: Config,
        layout: IconLayout,
        mut tracker: ReservationTracker,
        events_tx: Sender,
        broadcast_tx: Option<BroadcastSender>,
    ) -> Self {
        tracker.on_overlap_state_changed(move || events_tx.send(Event::OverlapStateChanged));
        Self {
            config,
            layout,
            tracker,
            broadcast_tx,
            queries: Vec::new(),
        }
    }

    pub fn layout(&self) -> &IconLayout { &self.layout }

    pub fn tracker(&self) -> &ReservationTracker { &self.tracker }

    pub fn config(&self) -> &Config { &self.config }

    /// Discovers foreign windows and restores saved positions.
    pub fn start(&mut self) {
        self.tracker.refresh();
        match self.layout.load_positions() {
            Ok(matched) => debug!(matched, "restored saved positions"),
            Err(e) => warn!("could not load saved positions: {e}"),
        }
    }

    pub async fn run(mut self, mut events: Receiver) {
        self.start();
        while let Some((span, event)) = events.recv().await {
            {
                let _guard = span.enter();
                self.handle_event(event);
            }
            self.run_until_idle(&mut events);
        }
    }

    /// Handles everything already queued, then does the idle work.
    pub fn run_until_idle(&mut self, events: &mut Receiver) {
        self.drain(events);
        if self.tracker.flush() {
            self.drain(events);
        }
        self.on_idle();
    }

    fn drain(&mut self, events: &mut Receiver) {
        while let Ok((span, event)) = events.try_recv() {
            let _guard = span.enter();
            self.handle_event(event);
        }
    }

    fn on_idle(&mut self) {
        let settings = &self.config.settings.layout;
        self.layout.flush(settings, &self.tracker);
        if self.layout.take_changed() {
            if let Some(tx) = &self.broadcast_tx {
                _ = tx.send(BroadcastEvent::LayoutChanged {
                    working_area: self.layout.working_area(),
                    icons: self.layout.placements(),
                });
            }
        }

        for query in self.queries.drain(..) {
            match query {
                Query::Layout(reply) => _ = reply.send(self.layout.placements()),
                Query::HitTest { point, reply } => {
                    _ = reply.send(self.layout.hit_test(point).cloned())
                }
            }
        }
    }

    fn log_event(&self, event: &Event) {
        match event {
            Event::WindowSystem(..) | Event::QueryLayout(..) | Event::HitTest { .. } => {
                trace!(?event, "Event")
            }
            _ => debug!(?event, "Event"),
        }
    }

    #[instrument(name = "desktop::handle_event", skip(self, event))]
    pub fn handle_event(&mut self, event: Event) {
        self.log_event(&event);
        match event {
            Event::IconsReplaced(specs) => self.layout.set_icons(specs),
            Event::IconInserted { index, spec } => self.layout.insert_icon(index, spec),
            Event::IconRemoved(id) => {
                self.layout.remove_icon(&id);
            }
            Event::IconChanged(spec) => {
                if !self.layout.update_icon(spec) {
                    trace!("change for unknown icon");
                }
            }
            Event::IconsReordered(order) => self.layout.reorder(&order),
            Event::WorkingAreaChanged(area) => {
                self.layout.set_working_area(area);
            }
            Event::WindowSystem(event) => self.tracker.handle_event(&event),
            Event::OverlapStateChanged => {
                self.layout.request_recompute(LayoutTrigger::OVERLAP);
            }
            Event::ConfigUpdated(config) => self.apply_config(config),
            Event::Fix(ids) => {
                if let Err(e) = self.layout.fix_icons(&ids) {
                    error!("failed to save icon positions: {e}");
                }
            }
            Event::Release(ids) => {
                let settings = &self.config.settings.layout;
                if let Err(e) = self.layout.release_icons(&ids, settings, &self.tracker) {
                    error!("failed to save icon positions: {e}");
                }
            }
            Event::SnapToGrid(ids) => {
                let settings = &self.config.settings.layout;
                if let Err(e) = self.layout.snap_to_grid(&ids, settings) {
                    error!("failed to save icon positions: {e}");
                }
            }
            Event::Move { icon, to } => {
                if let Err(e) = self.layout.move_icon(&icon, to) {
                    error!("failed to save icon positions: {e}");
                }
            }
            Event::QueryLayout(reply) => self.queries.push(Query::Layout(reply)),
            Event::HitTest { point, reply } => self.queries.push(Query::HitTest { point, reply }),
        }
    }

    fn apply_config(&mut self, mut config: Config) {
        let issues = config.validate();
        if !issues.is_empty() {
            for issue in &issues {
                warn!("config: {issue}");
            }
            let fixes = config.auto_fix_values();
            info!(fixes, "applied config fixes");
        }

        let old = std::mem::replace(&mut self.config, config);
        if old.settings.profile != self.config.settings.profile {
            info!(
                profile = %self.config.settings.profile,
                "profile changes take effect on restart"
            );
        }
        let triggers = self
            .layout
            .apply_settings(&old.settings.layout, &self.config.settings.layout);
        debug!(?triggers, "config applied");
    }
}
