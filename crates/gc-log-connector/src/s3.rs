// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Amazon S3 implementation of [`MultipartStore`].

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client;

use crate::store::{CompletedPart, MultipartStore, StoreError, StoreFactory};
use crate::target::StorageSettings;

const CREDENTIALS_PROVIDER: &str = "connector-control-plane";

pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub fn new(settings: &StorageSettings) -> Result<Self, StoreError> {
        if settings.bucket.trim().is_empty() {
            return Err(StoreError::InvalidSettings("bucket cannot be empty".to_string()));
        }
        if settings.region.trim().is_empty() {
            return Err(StoreError::InvalidSettings("region cannot be empty".to_string()));
        }

        let credentials = Credentials::new(
            settings.access_key.clone(),
            settings.secret_key.clone(),
            None,
            None,
            CREDENTIALS_PROVIDER,
        );
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .build();

        Ok(Self {
            client: Client::from_conf(config),
            bucket: settings.bucket.clone(),
        })
    }
}

fn operation_error<E>(operation: &'static str, err: E) -> StoreError
where
    E: std::error::Error,
{
    StoreError::Operation {
        operation,
        message: DisplayErrorContext(err).to_string(),
    }
}

#[async_trait]
impl MultipartStore for S3Store {
    async fn initiate(&self, key: &str, content_type: Option<&str>) -> Result<String, StoreError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| operation_error("CreateMultipartUpload", e))?;
        output
            .upload_id()
            .map(str::to_string)
            .ok_or(StoreError::MissingUploadId)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String, StoreError> {
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| operation_error("UploadPart", e))?;
        output
            .e_tag()
            .map(str::to_string)
            .ok_or(StoreError::MissingETag(part_number))
    }

    async fn complete(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), StoreError> {
        let parts = parts
            .into_iter()
            .map(|part| {
                S3CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.e_tag)
                    .build()
            })
            .collect();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| operation_error("CompleteMultipartUpload", e))?;
        Ok(())
    }

    async fn abort(&self, key: &str, upload_id: &str) -> Result<(), StoreError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| operation_error("AbortMultipartUpload", e))?;
        Ok(())
    }
}

/// Builds an [`S3Store`] per reloaded target.
#[derive(Debug, Default, Clone, Copy)]
pub struct S3StoreFactory;

impl StoreFactory for S3StoreFactory {
    fn build(&self, settings: &StorageSettings) -> Result<Arc<dyn MultipartStore>, StoreError> {
        Ok(Arc::new(S3Store::new(settings)?))
    }
}
