// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client for the connector control plane.
//!
//! The control plane decides where (bucket, region, credentials, key prefix)
//! and whether the connector uploads. This crate only covers its HTTP
//! contract and the shape of the records it returns.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod http;
pub mod job;

pub use http::{ClientError, ControlPlaneClient};
pub use job::{
    InternalSettings, JobConfigError, RemoteJobConfig, SourceProperties, SourceType,
    SourceTypeError,
};
