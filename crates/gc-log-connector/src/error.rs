// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::PathBuf;

use connector_control_plane::ClientError;

/// Errors surfaced while configuring, starting or stopping the connector.
///
/// Per-file and per-upload failures never reach this type; they are logged
/// where they happen and retried by the next scheduled cycle.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Control plane error: {0}")]
    ControlPlane(#[from] ClientError),

    #[error("Shutdown timeout exceeded")]
    ShutdownTimeout,
}

impl ConnectorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
