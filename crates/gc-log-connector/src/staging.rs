// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! On-disk layout of the staging area.
//!
//! ```text
//! <data_dir>/upload/<jvm_id>/<sha256>.log.gz            staged artifact
//! <data_dir>/upload/<jvm_id>/<sha256>.log.gz.progress   claim marker
//! <data_dir>/upload/<jvm_id>/.staging-XXXXXX            in-flight write
//! ```

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

pub const ARTIFACT_SUFFIX: &str = ".log.gz";
pub const MARKER_SUFFIX: &str = ".progress";
pub const TEMP_PREFIX: &str = ".staging-";

pub fn artifact_name(content_hash: &str) -> String {
    format!("{content_hash}{ARTIFACT_SUFFIX}")
}

/// Staged artifacts only; markers and in-flight temp files are excluded.
pub fn is_artifact_name(file_name: &str) -> bool {
    file_name.ends_with(ARTIFACT_SUFFIX) && !file_name.starts_with('.')
}

pub fn marker_path(artifact: &Path) -> PathBuf {
    let mut name = OsString::from(artifact.as_os_str());
    name.push(MARKER_SUFFIX);
    PathBuf::from(name)
}

pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

/// Lists staged artifacts in `dir`, in directory order.
pub fn list_artifacts(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut artifacts = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let is_artifact = entry.file_name().to_str().is_some_and(is_artifact_name);
        if is_artifact && entry.file_type()?.is_file() {
            artifacts.push(entry.path());
        }
    }
    Ok(artifacts)
}

/// Truncates a delivered or abandoned artifact to zero bytes.
pub fn truncate(artifact: &Path) -> io::Result<()> {
    OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(artifact)
        .map(drop)
}

/// Removes every claim marker in `dir`. Returns how many were removed.
///
/// Only called before the first conductor cycle, when no task can own a marker.
pub fn clear_orphan_markers(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let is_marker = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(MARKER_SUFFIX));
        if !is_marker {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}

/// Exclusive claim on a staged artifact, held by its marker file.
///
/// The marker is deleted when the claim is released or dropped, so a crashed
/// upload task cannot leave its marker behind inside a live process.
#[derive(Debug)]
pub struct Claim {
    artifact: PathBuf,
    marker: PathBuf,
    released: bool,
}

impl Claim {
    /// Creates the marker if absent. `Ok(None)` means someone already holds it.
    pub fn acquire(artifact: &Path) -> io::Result<Option<Self>> {
        let marker = marker_path(artifact);
        match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(_) => Ok(Some(Self {
                artifact: artifact.to_path_buf(),
                marker,
                released: false,
            })),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    pub fn marker(&self) -> &Path {
        &self.marker
    }

    pub fn release(mut self) {
        self.remove_marker();
    }

    fn remove_marker(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_file(&self.marker) {
            Ok(()) => debug!("Released claim on {}", self.artifact.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove marker {}: {e}", self.marker.display()),
        }
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.remove_marker();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_names() {
        let hash = "ab".repeat(32);
        let name = artifact_name(&hash);
        assert!(is_artifact_name(&name));
        assert!(!is_artifact_name(&format!("{name}{MARKER_SUFFIX}")));
        assert!(!is_artifact_name(".staging-abc.log.gz"));
        assert_eq!(
            marker_path(Path::new("/up/jvm/x.log.gz")),
            PathBuf::from("/up/jvm/x.log.gz.progress")
        );
    }

    #[test]
    fn test_list_artifacts_skips_markers_and_temp_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.log.gz"), b"a").unwrap();
        fs::write(dir.path().join("a.log.gz.progress"), b"").unwrap();
        fs::write(dir.path().join(".staging-123"), b"tmp").unwrap();
        let artifacts = list_artifacts(dir.path()).unwrap();
        assert_eq!(artifacts, vec![dir.path().join("a.log.gz")]);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("a.log.gz");
        fs::write(&artifact, b"data").unwrap();

        let claim = Claim::acquire(&artifact).unwrap().unwrap();
        assert!(claim.marker().exists());
        assert!(Claim::acquire(&artifact).unwrap().is_none());

        claim.release();
        assert!(!marker_path(&artifact).exists());
        assert!(Claim::acquire(&artifact).unwrap().is_some());
    }

    #[test]
    fn test_dropped_claim_removes_marker() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("a.log.gz");
        {
            let _claim = Claim::acquire(&artifact).unwrap().unwrap();
            assert!(marker_path(&artifact).exists());
        }
        assert!(!marker_path(&artifact).exists());
    }

    #[test]
    fn test_clear_orphan_markers() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.log.gz"), b"a").unwrap();
        fs::write(dir.path().join("a.log.gz.progress"), b"").unwrap();
        fs::write(dir.path().join("b.log.gz.progress"), b"").unwrap();
        assert_eq!(clear_orphan_markers(dir.path()).unwrap(), 2);
        assert!(dir.path().join("a.log.gz").exists());
        assert!(!dir.path().join("a.log.gz.progress").exists());
    }

    #[test]
    fn test_truncate() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("a.log.gz");
        fs::write(&artifact, b"payload").unwrap();
        truncate(&artifact).unwrap();
        assert_eq!(fs::metadata(&artifact).unwrap().len(), 0);
    }
}
