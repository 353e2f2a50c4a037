// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod histogram;
mod recorder;

pub use recorder::{Counter, Gauge, MetricsRsRegistry, ReportableStorage, metric_name};
