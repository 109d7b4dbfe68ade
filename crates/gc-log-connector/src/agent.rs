// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Connector lifecycle.
//!
//! Startup is explicit and fail-fast: configuration is validated and the
//! staging directories are created before any task runs. Every long-lived
//! task gets a child of one cancellation token, and shutdown waits for all of
//! them plus the in-flight uploads within a single deadline.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use connector_control_plane::ControlPlaneClient;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::conductor::Conductor;
use crate::config::ConnectorConfig;
use crate::error::ConnectorError;
use crate::reaper::TtlReaper;
use crate::reloader::{ConfigReloader, ReloadOutcome};
use crate::schedule::{run_periodic, FirstRun};
use crate::staging;
use crate::store::{StoreFactory, PART_SIZE};
use crate::sync::SyncEngine;
use crate::target::ActiveTarget;
use crate::upload::UploadWorkerPool;
use crate::watcher::DirectoryWatcher;

pub struct ConnectorAgent {
    config: ConnectorConfig,
    client: ControlPlaneClient,
    factory: Arc<dyn StoreFactory>,
    part_size: usize,
}

impl ConnectorAgent {
    pub fn new(
        config: ConnectorConfig,
        client: ControlPlaneClient,
        factory: Arc<dyn StoreFactory>,
    ) -> Self {
        Self {
            config,
            client,
            factory,
            part_size: PART_SIZE,
        }
    }

    #[must_use]
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size;
        self
    }

    /// Validates, prepares the staging area, loads the first upload target
    /// and starts every task.
    pub async fn start(self) -> Result<AgentHandle, ConnectorError> {
        let Self {
            config,
            client,
            factory,
            part_size,
        } = self;
        config.validate()?;

        let upload_root = config.upload_root();
        for source in &config.sources {
            let dir = source.staging_dir(&upload_root);
            staging::ensure_dir(&dir).map_err(|e| ConnectorError::io(&dir, e))?;
        }

        let active = Arc::new(ActiveTarget::new());
        let reloader = Arc::new(ConfigReloader::new(
            client,
            config.analyze_id.clone(),
            active.clone(),
            factory,
        ));
        match reloader.reload().await {
            Ok(ReloadOutcome::Published) => info!("Upload target loaded"),
            Ok(outcome) => info!("No upload target at startup ({outcome:?})"),
            Err(e) => warn!("Initial configuration load failed: {e}"),
        }

        let pool = Arc::new(
            UploadWorkerPool::new(active.clone(), config.upload_workers).with_part_size(part_size),
        );
        let conductor = Arc::new(Conductor::new(
            config.sources.clone(),
            &upload_root,
            pool.clone(),
        ));
        conductor.clear_orphan_markers();
        let engine = Arc::new(SyncEngine::new(&upload_root));
        let reaper = Arc::new(TtlReaper::new(
            config.sources.clone(),
            &upload_root,
            config.ttl,
        ));

        let cancel = CancellationToken::new();
        let mut task_handles = Vec::new();

        task_handles.push(tokio::spawn(run_periodic(
            "config reload",
            config.reload_config_interval,
            FirstRun::AfterPeriod,
            cancel.child_token(),
            move || {
                let reloader = reloader.clone();
                async move {
                    if let Err(e) = reloader.reload().await {
                        warn!("Configuration reload failed: {e}");
                    }
                }
            },
        )));

        for source in &config.sources {
            let watcher =
                DirectoryWatcher::new(source.clone(), engine.clone(), config.sync_interval);
            task_handles.push(tokio::spawn(watcher.run(cancel.child_token())));
        }

        task_handles.push(tokio::spawn(run_periodic(
            "conductor",
            config.sync_interval,
            FirstRun::Immediately,
            cancel.child_token(),
            move || {
                let conductor = conductor.clone();
                async move {
                    let cycle = tokio::task::spawn_blocking(move || conductor.run_cycle());
                    if let Err(e) = cycle.await {
                        warn!("Conductor cycle did not finish: {e}");
                    }
                }
            },
        )));

        task_handles.push(tokio::spawn(run_periodic(
            "ttl sweep",
            config.ttl_sweep_interval,
            FirstRun::Immediately,
            cancel.child_token(),
            move || {
                let reaper = reaper.clone();
                async move {
                    let sweep = tokio::task::spawn_blocking(move || reaper.sweep(SystemTime::now()));
                    if let Err(e) = sweep.await {
                        warn!("TTL sweep did not finish: {e}");
                    }
                }
            },
        )));

        info!(
            sources = config.sources.len(),
            workers = config.upload_workers,
            "GC log connector started"
        );
        Ok(AgentHandle {
            cancel,
            task_handles,
            pool,
            active,
        })
    }
}

/// Running connector. Dropping it does not stop the tasks; call
/// [`AgentHandle::shutdown`].
pub struct AgentHandle {
    cancel: CancellationToken,
    task_handles: Vec<JoinHandle<()>>,
    pool: Arc<UploadWorkerPool>,
    active: Arc<ActiveTarget>,
}

impl AgentHandle {
    pub fn active_target(&self) -> &Arc<ActiveTarget> {
        &self.active
    }

    /// Stops all tasks and waits for in-flight uploads, up to `timeout`.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), ConnectorError> {
        info!("Initiating graceful shutdown");
        self.cancel.cancel();
        let deadline = Instant::now() + timeout;
        let mut timed_out = false;

        for (idx, handle) in self.task_handles.into_iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                handle.abort();
                timed_out = true;
                continue;
            }
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => debug!("Task {idx} completed"),
                Ok(Err(e)) => error!("Task {idx} failed: {e}"),
                Err(_) => {
                    warn!("Task {idx} timed out");
                    timed_out = true;
                }
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if !self.pool.shutdown(remaining).await {
            warn!("{} upload(s) still running at shutdown", self.pool.in_flight());
            timed_out = true;
        }

        if timed_out {
            return Err(ConnectorError::ShutdownTimeout);
        }
        info!("Connector shutdown complete");
        Ok(())
    }
}
