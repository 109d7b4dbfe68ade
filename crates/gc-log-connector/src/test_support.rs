// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::store::{CompletedPart, MultipartStore, StoreError, StoreFactory};
use crate::target::StorageSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Initiate {
        key: String,
        content_type: Option<String>,
    },
    UploadPart {
        key: String,
        part_number: i32,
        len: usize,
    },
    Complete {
        key: String,
        parts: usize,
    },
    Abort {
        key: String,
    },
}

/// In-memory multipart store recording every protocol call.
#[derive(Debug, Default)]
pub struct RecordingStore {
    calls: Mutex<Vec<StoreCall>>,
    fail_part: Option<i32>,
    fail_abort: bool,
}

impl RecordingStore {
    pub fn failing_part(part_number: i32) -> Self {
        Self {
            fail_part: Some(part_number),
            ..Self::default()
        }
    }

    pub fn with_failing_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn part_sizes(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::UploadPart { len, .. } => Some(len),
                _ => None,
            })
            .collect()
    }

    pub fn completes(&self) -> usize {
        self.count(|call| matches!(call, StoreCall::Complete { .. }))
    }

    pub fn aborts(&self) -> usize {
        self.count(|call| matches!(call, StoreCall::Abort { .. }))
    }

    fn count(&self, predicate: impl Fn(&StoreCall) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MultipartStore for RecordingStore {
    async fn initiate(&self, key: &str, content_type: Option<&str>) -> Result<String, StoreError> {
        self.record(StoreCall::Initiate {
            key: key.to_string(),
            content_type: content_type.map(str::to_string),
        });
        Ok(format!("upload-{key}"))
    }

    async fn upload_part(
        &self,
        key: &str,
        _upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String, StoreError> {
        self.record(StoreCall::UploadPart {
            key: key.to_string(),
            part_number,
            len: body.len(),
        });
        if self.fail_part == Some(part_number) {
            return Err(StoreError::Operation {
                operation: "UploadPart",
                message: "connection reset".to_string(),
            });
        }
        Ok(format!("etag-{part_number}"))
    }

    async fn complete(
        &self,
        key: &str,
        _upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), StoreError> {
        self.record(StoreCall::Complete {
            key: key.to_string(),
            parts: parts.len(),
        });
        Ok(())
    }

    async fn abort(&self, key: &str, _upload_id: &str) -> Result<(), StoreError> {
        self.record(StoreCall::Abort {
            key: key.to_string(),
        });
        if self.fail_abort {
            return Err(StoreError::Operation {
                operation: "AbortMultipartUpload",
                message: "access denied".to_string(),
            });
        }
        Ok(())
    }
}

/// Hands out one shared [`RecordingStore`] and remembers every settings it saw.
#[derive(Debug, Default)]
pub struct RecordingFactory {
    pub store: Arc<RecordingStore>,
    builds: AtomicUsize,
    pub last_settings: Mutex<Option<StorageSettings>>,
}

impl RecordingFactory {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl StoreFactory for RecordingFactory {
    fn build(&self, settings: &StorageSettings) -> Result<Arc<dyn MultipartStore>, StoreError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        *self.last_settings.lock().unwrap() = Some(settings.clone());
        Ok(self.store.clone())
    }
}
