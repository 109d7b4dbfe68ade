// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Control-plane data model: job records, source kinds and storage settings.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Destination kind declared by a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    /// Uploading is switched off.
    None,
    /// Storage managed by the control plane; credentials come from the internal settings endpoint.
    Internal,
    /// Customer-owned S3 bucket described in the job's own properties.
    S3,
    /// Google Cloud Storage. Recognised but not supported by this build.
    Gcs,
}

/// Why a job's declared source type could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceTypeError {
    #[error("source type is empty")]
    Empty,
    #[error("unknown source type `{0}`")]
    Unknown(String),
}

impl FromStr for SourceType {
    type Err = SourceTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(SourceTypeError::Empty);
        }
        match trimmed.to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "INTERNAL" => Ok(Self::Internal),
            "S3" => Ok(Self::S3),
            "GCS" => Ok(Self::Gcs),
            _ => Err(SourceTypeError::Unknown(trimmed.to_string())),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "NONE",
            Self::Internal => "INTERNAL",
            Self::S3 => "S3",
            Self::Gcs => "GCS",
        };
        f.write_str(name)
    }
}

/// Errors raised while interpreting a job record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobConfigError {
    #[error("job record is not an object: {0}")]
    NotAnObject(String),
    #[error("job record has no `id`: {0}")]
    MissingId(String),
}

/// Job configuration as returned by the analyze endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJobConfig {
    pub id: String,
    /// Raw declared kind; interpret with [`RemoteJobConfig::source_type`].
    pub raw_source_type: String,
    pub source_config: SourceProperties,
}

impl RemoteJobConfig {
    /// Parses the `result` member of an analyze response.
    pub fn from_value(value: &Value) -> Result<Self, JobConfigError> {
        let object = value
            .as_object()
            .ok_or_else(|| JobConfigError::NotAnObject(value.to_string()))?;
        let id = match object.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(JobConfigError::MissingId(value.to_string())),
        };
        let raw_source_type = object
            .get("source_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let source_config = SourceProperties::parse(
            object
                .get("source_config")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );
        Ok(Self {
            id,
            raw_source_type,
            source_config,
        })
    }

    pub fn source_type(&self) -> Result<SourceType, SourceTypeError> {
        self.raw_source_type.parse()
    }
}

/// `key=value` properties carried in a job's `source_config` text.
///
/// Accepts `=` or `:` as separator, ignores blank lines and lines starting
/// with `#` or `!`. Later duplicates win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceProperties {
    entries: HashMap<String, String>,
}

impl SourceProperties {
    pub fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = match line.find(['=', ':']) {
                Some(idx) => (&line[..idx], &line[idx + 1..]),
                None => (line, ""),
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            entries.insert(key.to_string(), value.trim().to_string());
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Storage settings served by the internal settings endpoint.
#[derive(Clone, Deserialize)]
pub struct InternalSettings {
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    #[serde(default)]
    pub s3_base_path: String,
}

impl fmt::Debug for InternalSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalSettings")
            .field("s3_bucket", &self.s3_bucket)
            .field("s3_region", &self.s3_region)
            .field("s3_access_key", &self.s3_access_key)
            .field("s3_secret_key", &"<redacted>")
            .field("s3_base_path", &self.s3_base_path)
            .finish()
    }
}
