// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Content-addressed staging of rotated log files.
//!
//! Every matching file is hashed (decompressed first when gzipped) and copied
//! into the JVM's staging directory as `<sha256>.log.gz`. Because the name is
//! a pure function of the content, staging the same bytes twice is a no-op.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use lru::LruCache;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::source::{is_gzip, WatchedSource};
use crate::staging::{self, artifact_name, TEMP_PREFIX};

pub const SEEN_FILES_CAPACITY: usize = 10_000;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Files matching the rotation convention, excluded file not counted.
    pub matched: usize,
    /// Skipped because their modification time was already seen.
    pub unchanged: usize,
    /// Newly written artifacts.
    pub staged: usize,
    /// Content already present in the staging directory.
    pub already_staged: usize,
    pub failed: usize,
}

#[derive(Debug, PartialEq, Eq)]
enum StageOutcome {
    Staged,
    AlreadyStaged,
}

struct Candidate {
    path: PathBuf,
    name: String,
    modified: SystemTime,
}

/// Stages rotated logs of every watched source.
///
/// Shared between all watcher tasks; the seen-file cache is the only state.
pub struct SyncEngine {
    upload_root: PathBuf,
    seen: Mutex<LruCache<PathBuf, SystemTime>>,
}

impl SyncEngine {
    pub fn new(upload_root: impl Into<PathBuf>) -> Self {
        Self::with_capacity(upload_root, SEEN_FILES_CAPACITY)
    }

    pub fn with_capacity(upload_root: impl Into<PathBuf>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            upload_root: upload_root.into(),
            seen: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn staging_dir(&self, source: &WatchedSource) -> PathBuf {
        source.staging_dir(&self.upload_root)
    }

    /// Stages every matching file of `source` except `exclude`, the file
    /// that triggered this pass.
    ///
    /// Only listing the directory can fail the pass; per-file failures are
    /// logged and counted.
    pub fn sync(&self, source: &WatchedSource, exclude: Option<&str>) -> io::Result<SyncReport> {
        let staging_dir = self.staging_dir(source);
        staging::ensure_dir(&staging_dir)?;

        let mut report = SyncReport::default();
        for candidate in list_matching(source)? {
            if exclude == Some(candidate.name.as_str()) {
                continue;
            }
            report.matched += 1;

            if self.is_unchanged(&candidate) {
                report.unchanged += 1;
                continue;
            }

            match stage_file(&candidate.path, &staging_dir) {
                Ok(outcome) => {
                    match outcome {
                        StageOutcome::Staged => report.staged += 1,
                        StageOutcome::AlreadyStaged => report.already_staged += 1,
                    }
                    self.remember(&candidate);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        jvm_id = %source.jvm_id,
                        "Failed to stage {}: {e}",
                        candidate.path.display()
                    );
                }
            }
        }

        if report.staged > 0 || report.failed > 0 {
            debug!(jvm_id = %source.jvm_id, "Sync pass finished: {report:?}");
        }
        Ok(report)
    }

    /// Backstop pass for dropped events. The newest file in the directory is
    /// the one the JVM is writing, so it is left out. It need not match the
    /// rotation pattern (`gc.log.0.current`), in which case every matching
    /// file is staged.
    pub fn rescan(&self, source: &WatchedSource) -> io::Result<SyncReport> {
        let newest = newest_file(&source.directory)?;
        self.sync(source, newest.as_deref())
    }

    fn is_unchanged(&self, candidate: &Candidate) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.get(&candidate.path) == Some(&candidate.modified)
    }

    fn remember(&self, candidate: &Candidate) {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.put(candidate.path.clone(), candidate.modified);
    }
}

fn list_matching(source: &WatchedSource) -> io::Result<Vec<Candidate>> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(&source.directory)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !source.matches(&name) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(e) => {
                debug!("Skipping {name}: {e}");
                continue;
            }
        };
        candidates.push(Candidate {
            path: entry.path(),
            name,
            modified: metadata.modified()?,
        });
    }
    Ok(candidates)
}

fn newest_file(dir: &Path) -> io::Result<Option<String>> {
    let mut newest: Option<(SystemTime, String)> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let modified = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata.modified()?,
            _ => continue,
        };
        if newest.as_ref().map_or(true, |(time, _)| modified > *time) {
            newest = Some((modified, name));
        }
    }
    Ok(newest.map(|(_, name)| name))
}

fn open_content(path: &Path) -> io::Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(path)?);
    if is_gzip(path) {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Lowercase hex SHA-256 of the uncompressed content of `path`.
pub fn content_hash(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut open_content(path)?, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn stage_file(path: &Path, staging_dir: &Path) -> io::Result<StageOutcome> {
    let target = staging_dir.join(artifact_name(&content_hash(path)?));
    if target.exists() {
        return Ok(StageOutcome::AlreadyStaged);
    }

    let temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(staging_dir)?;
    let mut encoder = GzEncoder::new(BufWriter::new(temp), Compression::default());
    io::copy(&mut open_content(path)?, &mut encoder)?;
    let temp = encoder.finish()?.into_inner().map_err(|e| e.into_error())?;
    temp.as_file().sync_all()?;

    match temp.persist_noclobber(&target) {
        Ok(_) => {
            debug!("Staged {} as {}", path.display(), target.display());
            Ok(StageOutcome::Staged)
        }
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(StageOutcome::AlreadyStaged),
        Err(e) => Err(e.error),
    }
}
