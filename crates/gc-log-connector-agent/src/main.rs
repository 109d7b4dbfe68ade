// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use connector_control_plane::ControlPlaneClient;
use gc_log_connector::reloader::warn_on_version_skew;
use gc_log_connector::s3::S3StoreFactory;
use gc_log_connector::{ConnectorAgent, ConnectorConfig};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
pub async fn main() {
    let log_level = env::var("CONNECTOR_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!(
        "h2=off,hyper=off,rustls=off,aws_smithy_runtime=off,aws_config=off,{}",
        log_level
    );

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match ConnectorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {e}. Shutting down GC log connector.");
            return;
        }
    };

    let client = match ControlPlaneClient::new(&config.control_plane_host, &config.token, config.https)
    {
        Ok(client) => client,
        Err(e) => {
            error!("Error creating control plane client: {e}. Shutting down GC log connector.");
            return;
        }
    };

    warn_on_version_skew(&client, VERSION).await;

    info!(
        "Starting GC log connector {VERSION} for {} JVM(s), control plane {}",
        config.sources.len(),
        client.base_url()
    );
    let handle = match ConnectorAgent::new(config, client, Arc::new(S3StoreFactory))
        .start()
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start GC log connector: {e}");
            return;
        }
    };

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating shutdown"),
        Err(e) => error!("Failed to listen for Ctrl+C: {e}"),
    }

    if let Err(e) = handle.shutdown(SHUTDOWN_TIMEOUT).await {
        error!("Shutdown did not complete cleanly: {e}");
    }
}
