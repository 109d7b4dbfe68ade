// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Rotated log suffix: a trailing `.<number>`, optionally followed by `.gz`.
    static ref ROTATED_REGEX: Regex =
        Regex::new(r"^.*\.\d+(\.gz)?$").expect("failed creating regex");
}

/// A directory of GC logs written by one JVM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedSource {
    pub jvm_id: String,
    pub directory: PathBuf,
    /// Extension token, `.log` unless configured otherwise.
    pub extension: String,
}

impl WatchedSource {
    pub fn new(
        jvm_id: impl Into<String>,
        directory: impl Into<PathBuf>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            jvm_id: jvm_id.into(),
            directory: directory.into(),
            extension: extension.into(),
        }
    }

    /// Whether `file_name` follows the rotation convention for this source.
    ///
    /// The name must contain the extension token and then either end with it,
    /// end with the token plus `.gz`, or carry a rotated numeric suffix.
    pub fn matches(&self, file_name: &str) -> bool {
        if !file_name.contains(self.extension.as_str()) {
            return false;
        }
        file_name.ends_with(self.extension.as_str())
            || file_name.ends_with(&format!("{}.gz", self.extension))
            || is_rotated(file_name)
    }

    /// Staging directory for this source: `<upload_root>/<jvm_id>`.
    pub fn staging_dir(&self, upload_root: &Path) -> PathBuf {
        upload_root.join(&self.jvm_id)
    }
}

/// Whether the name ends in a rotation counter (`gc.log.3`, `gc.log.3.gz`).
pub fn is_rotated(file_name: &str) -> bool {
    ROTATED_REGEX.is_match(file_name)
}

pub fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> WatchedSource {
        WatchedSource::new("jvm-1", "/var/log/app", ".log")
    }

    #[test]
    fn test_rotation_convention() {
        let source = source();
        assert!(source.matches("app.log"));
        assert!(source.matches("app.log.gz"));
        assert!(source.matches("app.log.3"));
        assert!(source.matches("app.log.3.gz"));
    }

    #[test]
    fn test_non_matching_names() {
        let source = source();
        assert!(!source.matches("app.txt"));
        assert!(!source.matches("app.txt.1"));
        assert!(!source.matches("app.logx"));
        assert!(!source.matches("gc.log.0.current"));
    }

    #[test]
    fn test_is_rotated() {
        assert!(is_rotated("gc.log.12"));
        assert!(is_rotated("gc.log.1.gz"));
        assert!(!is_rotated("gc.log"));
        assert!(!is_rotated("gc.log.gz"));
    }

    #[test]
    fn test_staging_dir() {
        assert_eq!(
            source().staging_dir(Path::new("/data/upload")),
            PathBuf::from("/data/upload/jvm-1")
        );
    }

    #[test]
    fn test_is_gzip() {
        assert!(is_gzip(Path::new("/a/gc.log.1.gz")));
        assert!(!is_gzip(Path::new("/a/gc.log.1")));
    }
}
