// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Pushes a handful of metrics to a local InfluxDB until Ctrl-C.
//!
//! ```sh
//! INFLUX_TOKEN=... RUST_LOG=influx_reporter=debug cargo run --example push-to-influx
//! ```
//!
//! `INFLUX_URL`, `INFLUX_ORG` and `INFLUX_BUCKET` default to a stock local install.

use std::{sync::Arc, time::Duration};

use influx_reporter::{
    Metric, MetricRegistry, Reporter, StandardCounter, StandardGauge, StandardGaugeFloat, TagSet,
};
use tracing_subscriber::EnvFilter;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let registry = MetricRegistry::new();
    let ticks = Arc::new(StandardCounter::new());
    let queue_depth = Arc::new(StandardGauge::new());
    let load = Arc::new(StandardGaugeFloat::new());
    registry.register("demo.ticks", Metric::Counter(ticks.clone()));
    registry.register("demo.queue_depth", Metric::Gauge(queue_depth.clone()));
    registry.register("demo.load", Metric::GaugeFloat(load.clone()));

    let tags = TagSet::from([("app".to_string(), "push-to-influx".to_string())]);
    let reporter = Reporter::start_with_tags(
        registry,
        Duration::from_secs(5),
        env_or("INFLUX_URL", "http://localhost:8086"),
        env_or("INFLUX_TOKEN", ""),
        env_or("INFLUX_ORG", "my-org"),
        env_or("INFLUX_BUCKET", "my-bucket"),
        tags,
    );

    let mut interval = tokio::time::interval(Duration::from_millis(250));
    let mut n = 0i64;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                n += 1;
                ticks.inc(1);
                queue_depth.update(n % 17);
                load.update((n as f64 / 10.0).sin().abs());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    reporter.shutdown().await;
    let stats = reporter.stats();
    println!(
        "passes: {}, points: {}, write errors: {}",
        stats.passes(),
        stats.points_written(),
        stats.write_errors()
    );
}
