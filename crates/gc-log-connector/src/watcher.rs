// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Result as NotifyResult, Watcher};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::source::{is_rotated, WatchedSource};
use crate::sync::{SyncEngine, SyncReport};

type EventReceiver = UnboundedReceiver<NotifyResult<Event>>;

/// Triggers sync passes for one source.
///
/// Filesystem events may be dropped, duplicated or batched, so a periodic
/// rescan runs as well. If the OS watch cannot be set up the watcher keeps
/// running on rescans alone.
pub struct DirectoryWatcher {
    source: WatchedSource,
    engine: Arc<SyncEngine>,
    rescan_period: Duration,
}

impl DirectoryWatcher {
    pub fn new(source: WatchedSource, engine: Arc<SyncEngine>, rescan_period: Duration) -> Self {
        Self {
            source,
            engine,
            rescan_period,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        // The watcher stops delivering events once dropped.
        let (_watcher, mut events) = match self.subscribe() {
            Ok((watcher, events)) => (Some(watcher), Some(events)),
            Err(e) => {
                warn!(
                    jvm_id = %self.source.jvm_id,
                    "Failed to watch {}, relying on periodic rescans: {e}",
                    self.source.directory.display()
                );
                (None, None)
            }
        };
        info!(
            jvm_id = %self.source.jvm_id,
            "Watching {} for {} files",
            self.source.directory.display(),
            self.source.extension
        );

        let mut rescan = interval_at(Instant::now() + self.rescan_period, self.rescan_period);
        rescan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = next_event(&mut events) => match event {
                    Some(event) => {
                        let mut trigger = self.trigger_name(event);
                        // Coalesce whatever else is already queued into this pass.
                        if let Some(rx) = events.as_mut() {
                            while let Ok(event) = rx.try_recv() {
                                trigger = self.trigger_name(event).or(trigger);
                            }
                        }
                        if let Some(name) = trigger {
                            self.run_pass(Some(name)).await;
                        }
                    }
                    None => {
                        warn!(
                            jvm_id = %self.source.jvm_id,
                            "File watch stopped, relying on periodic rescans"
                        );
                        events = None;
                    }
                },
                _ = rescan.tick() => self.run_pass(None).await,
            }
        }
        debug!(jvm_id = %self.source.jvm_id, "Directory watcher stopped");
    }

    fn subscribe(&self) -> NotifyResult<(RecommendedWatcher, EventReceiver)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: NotifyResult<Event>| {
            let _ = tx.send(event);
        })?;
        watcher.watch(&self.source.directory, RecursiveMode::Recursive)?;
        Ok((watcher, rx))
    }

    /// File that triggered `event`, if it should start a pass.
    ///
    /// Only create/modify events qualify, on any name that is not itself a
    /// rotated log: the live file may not carry the extension (`gc.log.0.current`).
    /// Rotated files are picked up by the pass that the next write to the
    /// live log triggers.
    fn trigger_name(&self, event: NotifyResult<Event>) -> Option<String> {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                debug!(jvm_id = %self.source.jvm_id, "Watch error: {e}");
                return None;
            }
        };
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
        ) {
            return None;
        }
        event
            .paths
            .iter()
            .filter_map(|path| file_name(path))
            .filter(|name| !is_rotated(name))
            .last()
    }

    /// `exclude` is the triggering file; `None` means a backstop rescan.
    async fn run_pass(&self, exclude: Option<String>) {
        let engine = self.engine.clone();
        let source = self.source.clone();
        let result = tokio::task::spawn_blocking(move || match exclude {
            Some(name) => engine.sync(&source, Some(&name)),
            None => engine.rescan(&source),
        })
        .await;
        match result {
            Ok(Ok(report)) => log_report(&self.source, &report),
            Ok(Err(e)) => warn!(
                jvm_id = %self.source.jvm_id,
                "Sync of {} failed: {e}",
                self.source.directory.display()
            ),
            Err(e) => warn!(jvm_id = %self.source.jvm_id, "Sync task did not finish: {e}"),
        }
    }
}

async fn next_event(events: &mut Option<EventReceiver>) -> Option<NotifyResult<Event>> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

fn log_report(source: &WatchedSource, report: &SyncReport) {
    if report.staged > 0 {
        info!(jvm_id = %source.jvm_id, "Staged {} new GC log file(s)", report.staged);
    }
}
