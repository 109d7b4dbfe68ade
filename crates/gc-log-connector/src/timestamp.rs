// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use flate2::read::GzDecoder;
use lazy_static::lazy_static;
use regex::Regex;

/// Number of leading lines inspected before giving up.
pub const MAX_LINES: usize = 100;

lazy_static! {
    /// JVM uptime decoration, e.g. `  12.345: [GC ...`.
    static ref TIMESTAMP_REGEX: Regex =
        Regex::new(r"^[ \t]*\d+\.\d+:").expect("failed creating regex");
}

/// Returns true if any of the first [`MAX_LINES`] lines starts with a timestamp.
///
/// Logs without one cannot be placed on a timeline, so they are not uploaded.
pub fn looks_timestamped<R: BufRead>(mut reader: R) -> io::Result<bool> {
    let mut line = Vec::new();
    for _ in 0..MAX_LINES {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if TIMESTAMP_REGEX.is_match(&String::from_utf8_lossy(&line)) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Applies [`looks_timestamped`] to the decompressed content of a staged artifact.
pub fn artifact_looks_timestamped(artifact: &Path) -> io::Result<bool> {
    let file = File::open(artifact)?;
    looks_timestamped(BufReader::new(GzDecoder::new(file)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};

    #[test]
    fn test_leading_timestamp() {
        let log = "OpenJDK 64-Bit Server VM\n  0.512: [GC (Allocation Failure) 1024K->512K]\n";
        assert!(looks_timestamped(Cursor::new(log)).unwrap());
    }

    #[test]
    fn test_timestamp_must_lead() {
        let log = "[GC 0.512: (Allocation Failure)]\nno decoration\n";
        assert!(!looks_timestamped(Cursor::new(log)).unwrap());
    }

    #[test]
    fn test_only_first_lines_are_inspected() {
        let mut log = "header\n".repeat(MAX_LINES);
        log.push_str("1.000: [GC]\n");
        assert!(!looks_timestamped(Cursor::new(log.as_bytes())).unwrap());

        let mut log = "header\n".repeat(MAX_LINES - 1);
        log.push_str("1.000: [GC]\n");
        assert!(looks_timestamped(Cursor::new(log.as_bytes())).unwrap());
    }

    #[test]
    fn test_empty_input() {
        assert!(!looks_timestamped(Cursor::new("")).unwrap());
    }

    #[test]
    fn test_artifact_is_decompressed() {
        let dir = tempfile::TempDir::new().unwrap();
        let artifact = dir.path().join("a.log.gz");
        let mut encoder = GzEncoder::new(File::create(&artifact).unwrap(), Compression::default());
        encoder.write_all(b"3.141: [Full GC]\n").unwrap();
        encoder.finish().unwrap();
        assert!(artifact_looks_timestamped(&artifact).unwrap());
    }
}
