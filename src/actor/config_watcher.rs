use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use notify::{Config as NotifyConfig, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::actor::desktop::{self, Event as DesktopEvent};
use crate::common::config::Config;

pub struct ConfigWatcher {
    file: PathBuf,
    events_tx: desktop::Sender,
}

impl ConfigWatcher {
    pub fn spawn(file: PathBuf, events_tx: desktop::Sender) -> std::io::Result<()> {
        thread::Builder::new().name("config-watcher".to_string()).spawn(move || {
            let actor = ConfigWatcher { file, events_tx };
            if let Err(e) = actor.run() {
                warn!("config-watcher: error: {e:?}");
            }
        })?;
        Ok(())
    }

    fn run(self) -> notify::Result<()> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<notify::Result<Event>>();

        let mut watcher = PollWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            NotifyConfig::default()
                .with_poll_interval(Duration::from_secs(1))
                .with_compare_contents(true),
        )?;

        watcher.watch(&self.file, RecursiveMode::NonRecursive)?;

        info!("watching {:?}", self.file);

        loop {
            match rx.blocking_recv() {
                Some(Ok(event)) => {
                    if self.is_relevant(&event) {
                        debug!("change detected: {:?}", event.kind);
                        self.reload();
                    } else {
                        debug!("ignoring unrelated event: {:?}", event.kind);
                    }
                }
                Some(Err(e)) => {
                    warn!("watch error: {e:?}");
                }
                None => {
                    warn!("channel closed, exiting");
                    break;
                }
            }
        }

        Ok(())
    }

    fn is_relevant(&self, event: &Event) -> bool {
        match event.kind {
            EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) => event
                .paths
                .iter()
                .any(|p| p == &self.file || p.file_name() == self.file.file_name()),
            _ => false,
        }
    }

    fn reload(&self) {
        match Config::read_or_default(&self.file) {
            Ok(config) => {
                info!("reloading config");
                self.events_tx.send(DesktopEvent::ConfigUpdated(config));
            }
            Err(e) => warn!("keeping previous config, {:?} is invalid: {e}", self.file),
        }
    }
}
