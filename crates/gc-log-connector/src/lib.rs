// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # GC log connector
//!
//! Runs beside a JVM, watches its garbage-collection log directory and ships
//! rotated log files to object storage. A remote control plane decides where
//! uploads go and whether they happen at all.
//!
//! ## Pipeline
//!
//! ```text
//!   fs events ──> DirectoryWatcher ──> SyncEngine (hash + gzip stage)
//!                                           │
//!                                           v
//!                               <data_dir>/upload/<jvm_id>/<sha256>.log.gz
//!                                           │
//!                 Conductor (claim via .progress marker)
//!                                           │
//!                                           v
//!                 UploadWorkerPool (multipart upload, truncate, release)
//!                                           │
//!                                           v
//!                 TtlReaper (delete zero-length artifacts past TTL)
//!
//!   ConfigReloader ──> ActiveTarget (read by every upload task)
//! ```
//!
//! Staged artifacts are named after the SHA-256 of their uncompressed content,
//! so staging is idempotent and no separate "already uploaded" ledger exists:
//! a delivered artifact is simply truncated to zero bytes.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod agent;
pub mod conductor;
pub mod config;
pub mod error;
pub mod reaper;
pub mod reloader;
pub mod s3;
pub mod schedule;
pub mod source;
pub mod staging;
pub mod store;
pub mod sync;
pub mod target;
pub mod timestamp;
pub mod upload;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_support;

pub use agent::{AgentHandle, ConnectorAgent};
pub use config::ConnectorConfig;
pub use error::ConnectorError;
pub use source::WatchedSource;
pub use store::{MultipartStore, StoreError, StoreFactory, UploadError};
pub use target::{ActiveTarget, StorageSettings, UploadTarget};
