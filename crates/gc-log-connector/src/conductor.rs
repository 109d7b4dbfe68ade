// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::source::WatchedSource;
use crate::staging::{self, Claim};
use crate::upload::{UploadJob, UploadWorkerPool};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub claimed: usize,
    pub already_claimed: usize,
    pub errors: usize,
}

/// Discovers unclaimed, non-empty artifacts and hands them to the pool.
///
/// The non-empty check and marker creation happen here, in one task, so a
/// cycle can never claim an artifact twice.
pub struct Conductor {
    sources: Vec<WatchedSource>,
    upload_root: PathBuf,
    pool: Arc<UploadWorkerPool>,
}

impl Conductor {
    pub fn new(
        sources: Vec<WatchedSource>,
        upload_root: impl Into<PathBuf>,
        pool: Arc<UploadWorkerPool>,
    ) -> Self {
        Self {
            sources,
            upload_root: upload_root.into(),
            pool,
        }
    }

    /// Removes markers left by a previous process. Call before the first cycle.
    pub fn clear_orphan_markers(&self) -> usize {
        let mut removed = 0;
        for source in &self.sources {
            let dir = source.staging_dir(&self.upload_root);
            match staging::clear_orphan_markers(&dir) {
                Ok(count) => removed += count,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    jvm_id = %source.jvm_id,
                    "Failed to clear markers in {}: {e}",
                    dir.display()
                ),
            }
        }
        if removed > 0 {
            info!("Removed {removed} orphaned claim marker(s)");
        }
        removed
    }

    pub fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        for source in &self.sources {
            self.scan_source(source, &mut report);
        }
        if report.claimed > 0 {
            debug!("Conductor cycle: {report:?}");
        }
        report
    }

    fn scan_source(&self, source: &WatchedSource, report: &mut CycleReport) {
        let dir = source.staging_dir(&self.upload_root);
        if let Err(e) = staging::ensure_dir(&dir) {
            warn!(jvm_id = %source.jvm_id, "Failed to create {}: {e}", dir.display());
            report.errors += 1;
            return;
        }
        let artifacts = match staging::list_artifacts(&dir) {
            Ok(artifacts) => artifacts,
            Err(e) => {
                warn!(jvm_id = %source.jvm_id, "Failed to list {}: {e}", dir.display());
                report.errors += 1;
                return;
            }
        };

        for artifact in artifacts {
            match fs::metadata(&artifact) {
                Ok(metadata) if metadata.len() > 0 => {}
                Ok(_) => continue,
                Err(e) => {
                    debug!("Skipping {}: {e}", artifact.display());
                    continue;
                }
            }
            match Claim::acquire(&artifact) {
                Ok(Some(claim)) => {
                    report.claimed += 1;
                    self.pool.submit(UploadJob {
                        jvm_id: source.jvm_id.clone(),
                        claim,
                    });
                }
                Ok(None) => report.already_claimed += 1,
                Err(e) => {
                    warn!("Failed to claim {}: {e}", artifact.display());
                    report.errors += 1;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::staging::marker_path;
    use crate::target::ActiveTarget;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, WatchedSource, PathBuf) {
        let data = TempDir::new().unwrap();
        let source = WatchedSource::new("jvm-1", data.path(), ".log");
        let upload_root = data.path().join("upload");
        fs::create_dir_all(source.staging_dir(&upload_root)).unwrap();
        (data, source, upload_root)
    }

    #[tokio::test]
    async fn test_claims_only_non_empty_unmarked_artifacts() {
        let (_data, source, upload_root) = setup();
        let dir = source.staging_dir(&upload_root);
        fs::write(dir.join("full.log.gz"), b"payload").unwrap();
        fs::write(dir.join("empty.log.gz"), b"").unwrap();
        fs::write(dir.join("busy.log.gz"), b"payload").unwrap();
        fs::write(marker_path(&dir.join("busy.log.gz")), b"").unwrap();

        // No target: claimed artifacts are discarded by the workers.
        let pool = Arc::new(UploadWorkerPool::new(Arc::new(ActiveTarget::new()), 1));
        let conductor = Conductor::new(vec![source], &upload_root, pool.clone());

        let report = conductor.run_cycle();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.already_claimed, 1);
        assert!(pool.shutdown(Duration::from_secs(5)).await);

        assert_eq!(fs::metadata(dir.join("full.log.gz")).unwrap().len(), 0);
        assert!(!marker_path(&dir.join("full.log.gz")).exists());
        assert!(marker_path(&dir.join("busy.log.gz")).exists());
    }

    #[tokio::test]
    async fn test_back_to_back_cycles_never_double_claim() {
        let (_data, source, upload_root) = setup();
        let dir = source.staging_dir(&upload_root);
        fs::write(dir.join("a.log.gz"), b"payload").unwrap();
        let pool = Arc::new(UploadWorkerPool::new(Arc::new(ActiveTarget::new()), 1));
        let conductor = Conductor::new(vec![source], &upload_root, pool.clone());

        // The current-thread runtime cannot run the upload task between cycles.
        let first = conductor.run_cycle();
        let second = conductor.run_cycle();
        assert_eq!(first.claimed, 1);
        assert_eq!(second.claimed, 0);
        assert_eq!(second.already_claimed, 1);
        assert!(pool.shutdown(Duration::from_secs(5)).await);
    }

    #[test]
    fn test_clear_orphan_markers() {
        let (_data, source, upload_root) = setup();
        let dir = source.staging_dir(&upload_root);
        fs::write(dir.join("a.log.gz"), b"payload").unwrap();
        fs::write(marker_path(&dir.join("a.log.gz")), b"").unwrap();
        let pool = Arc::new(UploadWorkerPool::new(Arc::new(ActiveTarget::new()), 1));
        let conductor = Conductor::new(vec![source], &upload_root, pool);

        assert_eq!(conductor.clear_orphan_markers(), 1);
        assert!(dir.join("a.log.gz").exists());
    }
}
