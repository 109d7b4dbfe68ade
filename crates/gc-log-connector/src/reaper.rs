// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fs::{self, Metadata};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::source::WatchedSource;
use crate::staging::{self, marker_path, TEMP_PREFIX};

/// Deletes delivered artifacts once they outlive the TTL.
///
/// Only zero-length, unmarked artifacts qualify. Leftover `.staging-*` files
/// from an interrupted write are removed under the same TTL.
#[derive(Debug, Clone)]
pub struct TtlReaper {
    sources: Vec<WatchedSource>,
    upload_root: PathBuf,
    ttl: Duration,
}

impl TtlReaper {
    pub fn new(sources: Vec<WatchedSource>, upload_root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            sources,
            upload_root: upload_root.into(),
            ttl,
        }
    }

    /// Runs one sweep at `now`. Returns the number of deleted files.
    pub fn sweep(&self, now: SystemTime) -> usize {
        let mut deleted = 0;
        for source in &self.sources {
            let dir = source.staging_dir(&self.upload_root);
            if let Err(e) = staging::ensure_dir(&dir) {
                warn!(jvm_id = %source.jvm_id, "Failed to create {}: {e}", dir.display());
                continue;
            }
            match self.sweep_dir(&dir, now) {
                Ok(count) => deleted += count,
                Err(e) => warn!(jvm_id = %source.jvm_id, "TTL sweep of {} failed: {e}", dir.display()),
            }
        }
        if deleted > 0 {
            info!("TTL sweep deleted {deleted} file(s)");
        }
        deleted
    }

    fn sweep_dir(&self, dir: &Path, now: SystemTime) -> io::Result<usize> {
        let mut deleted = 0;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let path = entry.path();
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let expired = if staging::is_artifact_name(&name) {
                metadata.len() == 0
                    && !marker_path(&path).exists()
                    && self.is_expired(&metadata, now)
            } else if name.starts_with(TEMP_PREFIX) {
                self.is_expired(&metadata, now)
            } else {
                false
            };
            if !expired {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Deleted expired {}", path.display());
                    deleted += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete {}: {e}", path.display()),
            }
        }
        Ok(deleted)
    }

    fn is_expired(&self, metadata: &Metadata, now: SystemTime) -> bool {
        metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > self.ttl)
    }
}
