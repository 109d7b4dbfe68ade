// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::staging::{self, Claim};
use crate::store::{chunked_upload, PART_SIZE};
use crate::target::ActiveTarget;
use crate::timestamp::artifact_looks_timestamped;

/// A claimed artifact waiting for a worker.
#[derive(Debug)]
pub struct UploadJob {
    pub jvm_id: String,
    pub claim: Claim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No upload target is active.
    NoTarget,
    /// The log carries no leading timestamps and cannot be analyzed.
    NotTimestamped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Delivered { key: String, parts: usize },
    /// Artifact discarded without upload.
    Skipped(SkipReason),
    /// Artifact left intact for the next conductor cycle.
    Failed,
}

/// Bounded pool of upload tasks.
///
/// Submission never waits: every job gets its own task, which then queues on
/// the pool's semaphore.
pub struct UploadWorkerPool {
    active: Arc<ActiveTarget>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    part_size: usize,
}

impl UploadWorkerPool {
    pub fn new(active: Arc<ActiveTarget>, workers: usize) -> Self {
        Self {
            active,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tracker: TaskTracker::new(),
            part_size: PART_SIZE,
        }
    }

    #[must_use]
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    pub fn submit(&self, job: UploadJob) -> JoinHandle<UploadOutcome> {
        let active = self.active.clone();
        let permits = self.permits.clone();
        let part_size = self.part_size;
        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return UploadOutcome::Failed;
            };
            process(job, &active, part_size).await
        })
    }

    /// Tasks submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stops accepting work and waits for in-flight uploads.
    /// Returns false if `timeout` elapsed first.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tracker.close();
        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok()
    }
}

/// Uploads one claimed artifact against the target active right now.
pub async fn process(job: UploadJob, active: &ActiveTarget, part_size: usize) -> UploadOutcome {
    let UploadJob { jvm_id, claim } = job;
    let artifact = claim.artifact().to_path_buf();

    let Some(target) = active.snapshot() else {
        debug!(jvm_id = %jvm_id, "No upload target, discarding {}", artifact.display());
        discard(&artifact, claim);
        return UploadOutcome::Skipped(SkipReason::NoTarget);
    };

    let check_path = artifact.clone();
    match tokio::task::spawn_blocking(move || artifact_looks_timestamped(&check_path)).await {
        Ok(Ok(true)) => {}
        Ok(Ok(false)) => {
            error!(
                jvm_id = %jvm_id,
                "GC log {} has no timestamps and cannot be used, enable uptime decorations on the JVM",
                artifact.display()
            );
            discard(&artifact, claim);
            return UploadOutcome::Skipped(SkipReason::NotTimestamped);
        }
        Ok(Err(e)) => {
            warn!(jvm_id = %jvm_id, "Failed reading {}: {e}", artifact.display());
            claim.release();
            return UploadOutcome::Failed;
        }
        Err(e) => {
            warn!(jvm_id = %jvm_id, "Timestamp check for {} did not finish: {e}", artifact.display());
            claim.release();
            return UploadOutcome::Failed;
        }
    }

    let file_name = artifact
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let key = target.remote_key(&jvm_id, &file_name);

    match chunked_upload(target.store.as_ref(), &artifact, &key, part_size).await {
        Ok(parts) => {
            info!(jvm_id = %jvm_id, key = %key, parts, "Uploaded {}", artifact.display());
            if let Err(e) = staging::truncate(&artifact) {
                warn!("Failed to truncate delivered artifact {}: {e}", artifact.display());
            }
            claim.release();
            UploadOutcome::Delivered { key, parts }
        }
        Err(e) => {
            error!(jvm_id = %jvm_id, key = %key, "Upload of {} failed: {e}", artifact.display());
            claim.release();
            UploadOutcome::Failed
        }
    }
}

fn discard(artifact: &Path, claim: Claim) {
    if let Err(e) = staging::truncate(artifact) {
        warn!("Failed to truncate {}: {e}", artifact.display());
    }
    claim.release();
}
