// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::store::MultipartStore;

/// Where and with which credentials artifacts are uploaded.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Already normalized with [`normalize_prefix`].
    pub key_prefix: String,
}

impl fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageSettings")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

/// Immutable upload destination, published whole by the config reloader.
pub struct UploadTarget {
    pub settings: StorageSettings,
    pub tenant_id: String,
    pub job_id: String,
    pub store: Arc<dyn MultipartStore>,
}

impl UploadTarget {
    /// `prefix + base64(tenant) + "/" + job + "/" + jvm + "/" + file`
    pub fn remote_key(&self, jvm_id: &str, file_name: &str) -> String {
        format!(
            "{}{}/{}/{}/{}",
            self.settings.key_prefix,
            STANDARD.encode(self.tenant_id.as_bytes()),
            self.job_id,
            jvm_id,
            file_name
        )
    }
}

impl fmt::Debug for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTarget")
            .field("settings", &self.settings)
            .field("tenant_id", &self.tenant_id)
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

/// Strips leading and trailing `/` and re-adds exactly one trailing `/`
/// when anything is left.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// The single shared, atomically replaced upload destination.
///
/// Writers swap a whole `Arc`; readers clone it once per operation and keep
/// using that snapshot even if a reload happens meanwhile.
#[derive(Debug, Default)]
pub struct ActiveTarget {
    current: RwLock<Option<Arc<UploadTarget>>>,
}

impl ActiveTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<Arc<UploadTarget>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn publish(&self, target: UploadTarget) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(target));
    }

    /// Pauses uploads. Returns whether a target was set.
    pub fn clear(&self) -> bool {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn is_set(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
