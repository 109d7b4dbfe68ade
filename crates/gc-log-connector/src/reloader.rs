// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use connector_control_plane::{
    ClientError, ControlPlaneClient, InternalSettings, SourceProperties, SourceType,
    SourceTypeError,
};
use tracing::{debug, error, info, warn};

use crate::store::{StoreError, StoreFactory};
use crate::target::{normalize_prefix, ActiveTarget, StorageSettings, UploadTarget};

pub const S3_BUCKET: &str = "s3.bucket";
pub const S3_REGION: &str = "s3.region.id";
pub const S3_ACCESS_KEY: &str = "s3.access_key";
pub const S3_SECRET_KEY: &str = "s3.secret_key";
pub const S3_PREFIX: &str = "s3.prefix";
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// What a reload did to the active target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Published,
    Cleared,
    /// The job record could not be used; the previous target stays.
    Kept,
}

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error(transparent)]
    ControlPlane(#[from] ClientError),

    #[error("Failed to build object store client: {0}")]
    Store(#[from] StoreError),
}

/// Polls the control plane and swaps the [`ActiveTarget`].
pub struct ConfigReloader {
    client: ControlPlaneClient,
    analyze_id: String,
    active: Arc<ActiveTarget>,
    factory: Arc<dyn StoreFactory>,
}

impl ConfigReloader {
    pub fn new(
        client: ControlPlaneClient,
        analyze_id: impl Into<String>,
        active: Arc<ActiveTarget>,
        factory: Arc<dyn StoreFactory>,
    ) -> Self {
        Self {
            client,
            analyze_id: analyze_id.into(),
            active,
            factory,
        }
    }

    /// Runs one reload. On error nothing is changed.
    pub async fn reload(&self) -> Result<ReloadOutcome, ReloadError> {
        let tenant_id = self.client.account_id().await?;
        let job = match self.client.job_config(&self.analyze_id).await {
            Ok(job) => job,
            Err(e @ (ClientError::InvalidJob(_) | ClientError::MissingResult)) => {
                warn!(
                    analyze_id = %self.analyze_id,
                    "Keeping previous upload target, job record unusable: {e}"
                );
                return Ok(ReloadOutcome::Kept);
            }
            Err(e) => return Err(e.into()),
        };

        let settings = match job.source_type() {
            Err(SourceTypeError::Empty) => {
                error!(job_id = %job.id, "Job has an empty source type");
                return Ok(ReloadOutcome::Kept);
            }
            Err(SourceTypeError::Unknown(kind)) => {
                warn!(job_id = %job.id, "Unsupported source type {kind}, pausing uploads");
                return Ok(self.clear());
            }
            Ok(SourceType::Gcs) => {
                warn!(job_id = %job.id, "GCS source type is not supported, pausing uploads");
                return Ok(self.clear());
            }
            Ok(SourceType::None) => {
                debug!(job_id = %job.id, "Source type is NONE, pausing uploads");
                return Ok(self.clear());
            }
            Ok(SourceType::Internal) => from_internal(self.client.internal_settings().await?),
            Ok(SourceType::S3) => from_properties(&job.source_config),
        };

        let store = self.factory.build(&settings)?;
        let target = UploadTarget {
            settings,
            tenant_id,
            job_id: job.id,
            store,
        };
        info!(
            bucket = %target.settings.bucket,
            region = %target.settings.region,
            prefix = %target.settings.key_prefix,
            "Publishing upload target"
        );
        self.active.publish(target);
        Ok(ReloadOutcome::Published)
    }

    fn clear(&self) -> ReloadOutcome {
        if self.active.clear() {
            info!("Upload target cleared");
        }
        ReloadOutcome::Cleared
    }
}

pub fn from_internal(internal: InternalSettings) -> StorageSettings {
    StorageSettings {
        bucket: internal.s3_bucket,
        region: internal.s3_region,
        access_key: internal.s3_access_key,
        secret_key: internal.s3_secret_key,
        key_prefix: normalize_prefix(&internal.s3_base_path),
    }
}

pub fn from_properties(properties: &SourceProperties) -> StorageSettings {
    StorageSettings {
        bucket: properties.get_or(S3_BUCKET, "").to_string(),
        region: properties
            .get(S3_REGION)
            .filter(|region| !region.is_empty())
            .unwrap_or(DEFAULT_S3_REGION)
            .to_string(),
        access_key: properties.get_or(S3_ACCESS_KEY, "").to_string(),
        secret_key: properties.get_or(S3_SECRET_KEY, "").to_string(),
        key_prefix: normalize_prefix(properties.get_or(S3_PREFIX, "")),
    }
}

/// Logs a warning when the control plane advertises a different version.
/// Failures are ignored.
pub async fn warn_on_version_skew(client: &ControlPlaneClient, running: &str) {
    match client.latest_version().await {
        Ok(latest) if latest.trim() != running => {
            warn!("Running connector version {running}, latest is {}", latest.trim());
        }
        Ok(_) => debug!("Connector version {running} is up to date"),
        Err(e) => debug!("Skipping version check: {e}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::RecordingFactory;
    use mockito::{Matcher, Mock, Server, ServerGuard};
    use tracing_test::traced_test;

    async fn mock_account(server: &mut ServerGuard) -> Mock {
        server
            .mock("GET", "/user/account/id")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"result": 42}"#)
            .create_async()
            .await
    }

    async fn mock_job(server: &mut ServerGuard, body: &str) -> Mock {
        server
            .mock("GET", "/analyse/get")
            .match_query(Matcher::UrlEncoded("id".into(), "group-1".into()))
            .with_status(200)
            .with_body(body)
            .create_async()
            .await
    }

    fn reloader(
        server: &ServerGuard,
        active: &Arc<ActiveTarget>,
        factory: &Arc<RecordingFactory>,
    ) -> ConfigReloader {
        let client = ControlPlaneClient::new(&server.host_with_port(), "tok", false).unwrap();
        ConfigReloader::new(client, "group-1", active.clone(), factory.clone())
    }

    #[tokio::test]
    async fn test_s3_source_is_published() {
        let mut server = Server::new_async().await;
        mock_account(&mut server).await;
        mock_job(
            &mut server,
            r#"{"result": {"id": "group-1", "source_type": "S3",
                "source_config": "s3.bucket=customer\ns3.access_key=AK\ns3.secret_key=SK\ns3.prefix=/gc/"}}"#,
        )
        .await;
        let active = Arc::new(ActiveTarget::new());
        let factory = Arc::new(RecordingFactory::default());

        let outcome = reloader(&server, &active, &factory).reload().await.unwrap();

        assert_eq!(outcome, ReloadOutcome::Published);
        let target = active.snapshot().unwrap();
        assert_eq!(target.settings.bucket, "customer");
        assert_eq!(target.settings.region, DEFAULT_S3_REGION);
        assert_eq!(target.settings.key_prefix, "gc/");
        assert_eq!(target.tenant_id, "42");
        assert_eq!(target.job_id, "group-1");
        assert_eq!(factory.builds(), 1);
    }

    #[tokio::test]
    async fn test_internal_source_reads_settings_endpoint() {
        let mut server = Server::new_async().await;
        mock_account(&mut server).await;
        mock_job(
            &mut server,
            r#"{"result": {"id": "group-1", "source_type": "INTERNAL", "source_config": ""}}"#,
        )
        .await;
        let settings = server
            .mock("GET", "/connector/internal/settings")
            .match_query(Matcher::UrlEncoded("token".into(), "tok".into()))
            .with_status(200)
            .with_body(
                r#"{"result": {"s3_bucket": "managed", "s3_region": "eu-west-1",
                    "s3_access_key": "AK", "s3_secret_key": "SK", "s3_base_path": "tenants"}}"#,
            )
            .create_async()
            .await;
        let active = Arc::new(ActiveTarget::new());
        let factory = Arc::new(RecordingFactory::default());

        reloader(&server, &active, &factory).reload().await.unwrap();

        settings.assert_async().await;
        let target = active.snapshot().unwrap();
        assert_eq!(target.settings.bucket, "managed");
        assert_eq!(target.settings.region, "eu-west-1");
        assert_eq!(target.settings.key_prefix, "tenants/");
        let built = factory.last_settings.lock().unwrap().clone().unwrap();
        assert_eq!(built.bucket, "managed");
        assert_eq!(built.access_key, "AK");
    }

    #[tokio::test]
    async fn test_none_clears_target() {
        let mut server = Server::new_async().await;
        mock_account(&mut server).await;
        mock_job(
            &mut server,
            r#"{"result": {"id": "group-1", "source_type": "NONE"}}"#,
        )
        .await;
        let active = Arc::new(ActiveTarget::new());
        let factory = Arc::new(RecordingFactory::default());
        active.publish(UploadTarget {
            settings: from_properties(&SourceProperties::parse("s3.bucket=old")),
            tenant_id: "42".to_string(),
            job_id: "group-1".to_string(),
            store: factory.store.clone(),
        });

        let outcome = reloader(&server, &active, &factory).reload().await.unwrap();

        assert_eq!(outcome, ReloadOutcome::Cleared);
        assert!(!active.is_set());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unsupported_kinds_clear_target() {
        for kind in ["GCS", "AZURE"] {
            let mut server = Server::new_async().await;
            mock_account(&mut server).await;
            mock_job(
                &mut server,
                &format!(r#"{{"result": {{"id": "group-1", "source_type": "{kind}"}}}}"#),
            )
            .await;
            let active = Arc::new(ActiveTarget::new());
            let factory = Arc::new(RecordingFactory::default());

            let outcome = reloader(&server, &active, &factory).reload().await.unwrap();
            assert_eq!(outcome, ReloadOutcome::Cleared);
            assert_eq!(factory.builds(), 0);
        }
        assert!(logs_contain("GCS source type is not supported"));
        assert!(logs_contain("Unsupported source type AZURE"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unusable_job_keeps_previous_target() {
        for body in [
            r#"{"result": {"id": "group-1", "source_type": ""}}"#,
            r#"{"result": "not an object"}"#,
            r#"{"status": "missing"}"#,
        ] {
            let mut server = Server::new_async().await;
            mock_account(&mut server).await;
            mock_job(&mut server, body).await;
            let active = Arc::new(ActiveTarget::new());
            let factory = Arc::new(RecordingFactory::default());
            active.publish(UploadTarget {
                settings: from_properties(&SourceProperties::parse("s3.bucket=old")),
                tenant_id: "42".to_string(),
                job_id: "group-1".to_string(),
                store: factory.store.clone(),
            });

            let outcome = reloader(&server, &active, &factory).reload().await.unwrap();

            assert_eq!(outcome, ReloadOutcome::Kept);
            assert_eq!(active.snapshot().unwrap().settings.bucket, "old");
        }
        assert!(logs_contain("Job has an empty source type"));
    }

    #[tokio::test]
    async fn test_control_plane_failure_changes_nothing() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/user/account/id")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;
        let active = Arc::new(ActiveTarget::new());
        let factory = Arc::new(RecordingFactory::default());

        let err = reloader(&server, &active, &factory)
            .reload()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReloadError::ControlPlane(ClientError::Retryable(503))
        ));
        assert!(!active.is_set());
    }

    #[test]
    fn test_properties_defaults() {
        let settings = from_properties(&SourceProperties::parse("s3.bucket = b\n"));
        assert_eq!(settings.bucket, "b");
        assert_eq!(settings.region, "us-east-1");
        assert_eq!(settings.key_prefix, "");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_version_skew_is_logged() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/connector/version/latest")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"result": "2.0.0"}"#)
            .create_async()
            .await;
        let client = ControlPlaneClient::new(&server.host_with_port(), "tok", false).unwrap();

        warn_on_version_skew(&client, "1.0.0").await;

        assert!(logs_contain("latest is 2.0.0"));
    }
}
