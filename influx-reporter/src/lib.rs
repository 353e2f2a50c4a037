// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod backoff;
pub mod client;
mod config;
mod error;
pub mod metric;
pub mod point;
#[cfg_attr(not(feature = "http-client"), allow(unused))]
pub(crate) mod rate_limit;
mod registry;
mod reporter;
#[cfg(any(test, feature = "test-util"))]
pub mod test_util;
pub mod time;
mod transcribe;

pub use backoff::ReconnectPolicy;
#[cfg(feature = "http-client")]
pub use client::HttpClientFactory;
pub use client::{ConnectionParams, MakeClient, WriteApi, WriteOptions};
pub use config::{ReconnectConfig, ReporterConfig, WriteConfig};
pub use error::{ClientError, ConfigError, WriteError};
pub use metric::{
    Counter, Gauge, GaugeFloat, Histogram, Meter, Metric, StandardCounter, StandardGauge,
    StandardGaugeFloat, Timer,
};
pub use point::{FieldValue, Point, Precision, TagSet};
pub use registry::{MetricRegistry, Registry};
pub use reporter::{
    Destination, Reporter, ReporterBuilder, ReporterStats, YouMustConfigureADestination,
    YouMustConfigureARegistry,
};
pub use time::TimeSource;
pub use transcribe::{PERCENTILE_FIELDS, PERCENTILES, transcribe};
