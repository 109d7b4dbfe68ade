// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Multipart object-store protocol and the driver that feeds a file through it.

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::target::StorageSettings;

/// Fixed part size of the multipart sequence (5 MiB).
pub const PART_SIZE: usize = 5 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{operation} failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },

    #[error("Store did not return an upload id")]
    MissingUploadId,

    #[error("Store did not return an entity tag for part {0}")]
    MissingETag(i32),

    #[error("Invalid storage settings: {0}")]
    InvalidSettings(String),
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Failed reading artifact: {0}")]
    Io(#[from] io::Error),

    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("{cause}; aborting the multipart upload also failed: {abort}")]
    AbortFailed {
        cause: Box<UploadError>,
        abort: StoreError,
    },
}

/// A part acknowledged by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub e_tag: String,
}

/// Three-step multipart upload against one bucket.
///
/// Production uses [`crate::s3::S3Store`]; tests substitute an in-memory
/// recorder.
#[async_trait]
pub trait MultipartStore: Send + Sync {
    /// Starts a multipart upload and returns its upload id.
    async fn initiate(&self, key: &str, content_type: Option<&str>) -> Result<String, StoreError>;

    /// Uploads one part (numbered from 1) and returns its entity tag.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String, StoreError>;

    /// Completes the upload from the ordered list of parts.
    async fn complete(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), StoreError>;

    /// Releases the remote state of an unfinished upload.
    async fn abort(&self, key: &str, upload_id: &str) -> Result<(), StoreError>;
}

/// Builds a store client for a freshly reloaded set of storage settings.
pub trait StoreFactory: Send + Sync {
    fn build(&self, settings: &StorageSettings) -> Result<Arc<dyn MultipartStore>, StoreError>;
}

/// Content type announced on initiation.
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    crate::source::is_gzip(path).then_some("application/gzip")
}

/// Uploads `path` under `key` in parts of `part_size` bytes.
///
/// Returns the number of parts sent. A zero-length file sends nothing. Any
/// failure after initiation aborts the remote upload before returning.
pub async fn chunked_upload(
    store: &dyn MultipartStore,
    path: &Path,
    key: &str,
    part_size: usize,
) -> Result<usize, UploadError> {
    let mut file = File::open(path).await?;
    let length = file.metadata().await?.len();
    if length == 0 {
        return Ok(0);
    }

    let upload_id = store.initiate(key, content_type_for(path)).await?;
    debug!("Initiated multipart upload {upload_id} for {key}");

    match send_parts(store, &mut file, key, &upload_id, part_size).await {
        Ok(parts) => {
            let count = parts.len();
            match store.complete(key, &upload_id, parts).await {
                Ok(()) => Ok(count),
                Err(e) => Err(abort(store, key, &upload_id, e.into()).await),
            }
        }
        Err(e) => Err(abort(store, key, &upload_id, e).await),
    }
}

async fn send_parts(
    store: &dyn MultipartStore,
    file: &mut File,
    key: &str,
    upload_id: &str,
    part_size: usize,
) -> Result<Vec<CompletedPart>, UploadError> {
    let mut parts = Vec::new();
    let mut part_number: i32 = 1;
    loop {
        let mut body = Vec::with_capacity(part_size);
        (&mut *file).take(part_size as u64).read_to_end(&mut body).await?;
        if body.is_empty() {
            break;
        }
        let full = body.len() == part_size;
        let e_tag = store.upload_part(key, upload_id, part_number, body).await?;
        parts.push(CompletedPart { part_number, e_tag });
        if !full {
            break;
        }
        part_number += 1;
    }
    Ok(parts)
}

async fn abort(
    store: &dyn MultipartStore,
    key: &str,
    upload_id: &str,
    cause: UploadError,
) -> UploadError {
    match store.abort(key, upload_id).await {
        Ok(()) => {
            debug!("Aborted multipart upload {upload_id} for {key}");
            cause
        }
        Err(abort) => {
            warn!("Failed to abort multipart upload {upload_id} for {key}: {abort}");
            UploadError::AbortFailed {
                cause: Box::new(cause),
                abort,
            }
        }
    }
}
