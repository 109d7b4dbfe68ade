// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::error::ConnectorError;
use crate::source::WatchedSource;

const DEFAULT_EXTENSION: &str = ".log";
const DEFAULT_RELOAD_CONFIG_MS: u64 = 30_000;
const DEFAULT_SYNC_FILES_MS: u64 = 5_000;
const DEFAULT_TTL_MS: u64 = 14 * 24 * 60 * 60 * 1_000;
const DEFAULT_TTL_SWEEP_MS: u64 = 30 * 60 * 1_000;
const UPLOAD_WORKERS_PER_CORE: usize = 4;
const UPLOAD_DIR: &str = "upload";

/// Runtime configuration of the connector.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// One entry per monitored JVM.
    pub sources: Vec<WatchedSource>,
    /// Control-plane host, optionally with `:port`.
    pub control_plane_host: String,
    /// Token authenticating every control-plane call.
    pub token: String,
    /// Local directory holding the staging area.
    pub data_dir: PathBuf,
    /// Job (analyze group) whose source configuration drives uploads.
    pub analyze_id: String,
    /// Whether the control plane is reached over https.
    pub https: bool,
    /// How often the upload destination is re-read from the control plane.
    pub reload_config_interval: Duration,
    /// Conductor period; also the watcher's backstop rescan period.
    pub sync_interval: Duration,
    /// Age after which delivered (zero-length) artifacts are deleted.
    pub ttl: Duration,
    /// How often the TTL sweep runs.
    pub ttl_sweep_interval: Duration,
    /// Maximum number of concurrent upload tasks.
    pub upload_workers: usize,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            control_plane_host: String::new(),
            token: String::new(),
            data_dir: PathBuf::new(),
            analyze_id: String::new(),
            https: true,
            reload_config_interval: Duration::from_millis(DEFAULT_RELOAD_CONFIG_MS),
            sync_interval: Duration::from_millis(DEFAULT_SYNC_FILES_MS),
            ttl: Duration::from_millis(DEFAULT_TTL_MS),
            ttl_sweep_interval: Duration::from_millis(DEFAULT_TTL_SWEEP_MS),
            upload_workers: default_upload_workers(),
            log_level: "info".to_string(),
        }
    }
}

impl ConnectorConfig {
    /// Create configuration from `CONNECTOR_*` environment variables.
    pub fn from_env() -> Result<Self, ConnectorError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source and validates it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConnectorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let logs_dirs = split_list(lookup("CONNECTOR_LOGS_DIRS").unwrap_or_default());
        let jvm_ids = split_list(lookup("CONNECTOR_JVM_IDS").unwrap_or_default());
        if logs_dirs.len() < jvm_ids.len() {
            return Err(ConnectorError::InvalidConfig(format!(
                "JVM ids [{}] and logs dirs [{}] mismatch",
                jvm_ids.join(","),
                logs_dirs.join(",")
            )));
        }
        if logs_dirs.len() > jvm_ids.len() {
            warn!(
                "Ignoring {} logs dir(s) without a matching JVM id",
                logs_dirs.len() - jvm_ids.len()
            );
        }
        let extension = lookup("CONNECTOR_EXTENSION")
            .filter(|ext| !ext.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        let sources = jvm_ids
            .into_iter()
            .zip(logs_dirs)
            .map(|(jvm_id, dir)| WatchedSource::new(jvm_id, dir, extension.clone()))
            .collect();

        let config = Self {
            sources,
            control_plane_host: lookup("CONNECTOR_HOST").unwrap_or_default().trim().to_string(),
            token: lookup("CONNECTOR_TOKEN").unwrap_or_default().trim().to_string(),
            data_dir: PathBuf::from(lookup("CONNECTOR_DATA_DIR").unwrap_or_default().trim()),
            analyze_id: lookup("CONNECTOR_ANALYZE_ID").unwrap_or_default().trim().to_string(),
            https: lookup("CONNECTOR_HTTPS")
                .map(|val| val.to_lowercase() != "false")
                .unwrap_or(true),
            reload_config_interval: millis(
                lookup("CONNECTOR_RELOAD_CONFIG_MS"),
                DEFAULT_RELOAD_CONFIG_MS,
            ),
            sync_interval: millis(lookup("CONNECTOR_SYNC_FILES_MS"), DEFAULT_SYNC_FILES_MS),
            ttl: millis(lookup("CONNECTOR_TTL_MS"), DEFAULT_TTL_MS),
            ttl_sweep_interval: millis(lookup("CONNECTOR_TTL_SWEEP_MS"), DEFAULT_TTL_SWEEP_MS),
            upload_workers: default_upload_workers(),
            log_level: lookup("CONNECTOR_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or_else(|| "info".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration. Runs before any task is started.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        require_non_empty("CONNECTOR_HOST", &self.control_plane_host)?;
        require_non_empty("CONNECTOR_TOKEN", &self.token)?;
        require_non_empty("CONNECTOR_ANALYZE_ID", &self.analyze_id)?;

        if !self.data_dir.is_dir() {
            return Err(ConnectorError::InvalidConfig(format!(
                "Data directory does not exist - {}",
                self.data_dir.display()
            )));
        }

        if self.sources.is_empty() {
            return Err(ConnectorError::InvalidConfig(
                "At least one JVM id and logs dir is required".to_string(),
            ));
        }
        for source in &self.sources {
            if source.jvm_id.is_empty() {
                return Err(ConnectorError::InvalidConfig(
                    "JVM id cannot be empty".to_string(),
                ));
            }
            if !source.directory.is_dir() {
                return Err(ConnectorError::InvalidConfig(format!(
                    "Logs directory does not exist - {}",
                    source.directory.display()
                )));
            }
        }

        let periods = [
            ("CONNECTOR_RELOAD_CONFIG_MS", self.reload_config_interval),
            ("CONNECTOR_SYNC_FILES_MS", self.sync_interval),
            ("CONNECTOR_TTL_SWEEP_MS", self.ttl_sweep_interval),
        ];
        for (name, period) in periods {
            if period.is_zero() {
                return Err(ConnectorError::InvalidConfig(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.upload_workers == 0 {
            return Err(ConnectorError::InvalidConfig(
                "Upload worker count must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConnectorError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// `<data_dir>/upload`, parent of every per-JVM staging directory.
    pub fn upload_root(&self) -> PathBuf {
        upload_root(&self.data_dir)
    }
}

pub fn upload_root(data_dir: &Path) -> PathBuf {
    data_dir.join(UPLOAD_DIR)
}

fn default_upload_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * UPLOAD_WORKERS_PER_CORE
}

fn split_list(raw: String) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn millis(raw: Option<String>, default: u64) -> Duration {
    let ms = raw
        .and_then(|val| val.trim().parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_millis(ms)
}

fn require_non_empty(name: &str, value: &str) -> Result<(), ConnectorError> {
    if value.trim().is_empty() {
        return Err(ConnectorError::InvalidConfig(format!(
            "{name} cannot be empty"
        )));
    }
    Ok(())
}
