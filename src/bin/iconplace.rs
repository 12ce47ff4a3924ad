use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::Parser;
use iconplace::actor::broadcast::{BroadcastEvent, BroadcastReceiver};
use iconplace::actor::config_watcher::ConfigWatcher;
use iconplace::actor;
use iconplace::actor::desktop::{self, Desktop, Event};
use iconplace::common::config::{Config, config_file, profile_dir};
use iconplace::common::log;
use iconplace::layout_engine::{EstimatedTextMeasure, IconLayout};
use iconplace::model::{IconId, IconSpec, PositionStore, ReservationTracker};
use iconplace::sys::geometry::{Rect, Size};
use iconplace::sys::window_system::{SnapshotWindowSystem, WindowId};
use serde::Deserialize;
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};

/// A desktop surface to lay out: its working area, its icons in listing
/// order and the foreign windows on screen.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct Scene {
    working_area: Rect,
    #[serde(default)]
    screen: u32,
    #[serde(default)]
    monitor: u32,
    #[serde(default)]
    icons: Vec<SceneIcon>,
    #[serde(default)]
    windows: Vec<SceneWindow>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct SceneIcon {
    id: String,
    label: Option<String>,
    glyph: Option<Size>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct SceneWindow {
    id: u32,
    /// Area the window asks to keep clear of icons.
    reserve: Option<Rect>,
}

impl Scene {
    fn read(path: &Path) -> anyhow::Result<Scene> {
        let buf = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scene {}", path.display()))?;
        toml::from_str(&buf).with_context(|| format!("invalid scene {}", path.display()))
    }

    fn icon_specs(&self) -> Vec<IconSpec> {
        self.icons
            .iter()
            .map(|icon| {
                let mut spec = IconSpec::new(icon.id.clone());
                if let Some(label) = &icon.label {
                    spec = spec.with_label(label.clone());
                }
                if let Some(glyph) = icon.glyph {
                    spec = spec.with_glyph(glyph);
                }
                spec
            })
            .collect()
    }
}

#[derive(Parser)]
struct Cli {
    /// Scene file (TOML) describing the working area, icons and windows.
    scene: PathBuf,

    /// Config file to use instead of the default location.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding saved positions. Defaults to the profile directory.
    #[arg(long)]
    positions_dir: Option<PathBuf>,

    /// Pin an icon at its current position.
    #[arg(long, value_name = "ICON")]
    fix: Vec<String>,

    /// Let a pinned icon be placed automatically again.
    #[arg(long, value_name = "ICON")]
    release: Vec<String>,

    /// Round a pinned icon to the nearest grid cell.
    #[arg(long, value_name = "ICON")]
    snap: Vec<String>,

    /// Check the config file and exit.
    #[arg(long)]
    validate: bool,

    /// Keep running and print a new layout whenever the config file changes.
    #[arg(long)]
    watch: bool,

    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
}

fn main() -> anyhow::Result<()> {
    let opt: Cli = Parser::parse();

    if std::env::var_os("RUST_BACKTRACE").is_none() {
        // SAFETY: We are single threaded at this point.
        unsafe { std::env::set_var("RUST_BACKTRACE", "1") };
    }
    log::init_logging();
    install_panic_hook();

    let config_path = opt.config.clone().unwrap_or_else(config_file);
    let mut config = Config::read_or_default(&config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;

    let issues = config.validate();
    if opt.validate {
        if issues.is_empty() {
            println!("{}: ok", config_path.display());
            return Ok(());
        }
        for issue in &issues {
            eprintln!("{}: {issue}", config_path.display());
        }
        bail!("{} config issue(s) found", issues.len());
    }
    if !issues.is_empty() {
        for issue in &issues {
            warn!("config: {issue}");
        }
        config.auto_fix_values();
    }

    let scene = Scene::read(&opt.scene)?;
    let positions_dir =
        opt.positions_dir.clone().unwrap_or_else(|| profile_dir(&config.settings.profile));
    let store = PositionStore::for_surface(&positions_dir, scene.screen, scene.monitor);
    info!(path = ?store.path(), "using position store");

    let layout = IconLayout::new(Box::new(EstimatedTextMeasure)).with_store(store);
    let window_system = SnapshotWindowSystem::from_windows(
        scene.windows.iter().map(|w| (WindowId::new(w.id), w.reserve)),
    );
    let tracker = ReservationTracker::new(Box::new(window_system));

    let (events_tx, events_rx) = actor::channel();
    let (broadcast_tx, _) = broadcast::channel(16);
    let desktop = Desktop::new(
        config,
        layout,
        tracker,
        events_tx.clone(),
        Some(broadcast_tx.clone()),
    );

    if opt.watch {
        ConfigWatcher::spawn(config_path, events_tx.clone())?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async move {
        tokio::task::spawn_local(desktop.run(events_rx));

        events_tx.send(Event::WorkingAreaChanged(scene.working_area));
        events_tx.send(Event::IconsReplaced(scene.icon_specs()));
        let mut placed = query_layout(&events_tx).await?;

        let ids = |names: &[String]| -> Vec<IconId> { names.iter().map(|n| IconId::new(n.as_str())).collect() };
        let actions = [
            (&opt.fix, Event::Fix(ids(&opt.fix[..]))),
            (&opt.release, Event::Release(ids(&opt.release[..]))),
            (&opt.snap, Event::SnapToGrid(ids(&opt.snap[..]))),
        ];
        let mut acted = false;
        for (names, event) in actions {
            if !names.is_empty() {
                events_tx.send(event);
                acted = true;
            }
        }
        if acted {
            placed = query_layout(&events_tx).await?;
        }

        print_json(
            &BroadcastEvent::LayoutChanged {
                working_area: scene.working_area,
                icons: placed,
            },
            opt.pretty,
        )?;

        if opt.watch {
            let mut updates: BroadcastReceiver = broadcast_tx.subscribe();
            loop {
                match updates.recv().await {
                    Ok(event) => print_json(&event, opt.pretty)?,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "dropped layout updates");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }

        Ok::<(), anyhow::Error>(())
    })
}

async fn query_layout(
    events_tx: &desktop::Sender,
) -> anyhow::Result<Vec<iconplace::layout_engine::PlacedIcon>> {
    let (reply, answer) = oneshot::channel();
    events_tx.send(Event::QueryLayout(reply));
    answer.await.context("desktop actor stopped")
}

fn print_json(event: &BroadcastEvent, pretty: bool) -> anyhow::Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(event)?
    } else {
        serde_json::to_string(event)?
    };
    println!("{json}");
    Ok(())
}

#[cfg(panic = "unwind")]
fn install_panic_hook() {
    // Abort on panic instead of propagating panics to the main thread.
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        original_hook(info);
        std::process::abort();
    }));
}

#[cfg(not(panic = "unwind"))]
fn install_panic_hook() {}
