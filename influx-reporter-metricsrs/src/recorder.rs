// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use influx_reporter::{
    Metric, Registry,
    metric::{CounterSnapshot, GaugeFloatSnapshot},
};
use metrics_024::{
    CounterFn, GaugeFn, Key, KeyName, Metadata, Recorder, SetRecorderError, SharedString, Unit,
};
use metrics_util_020::registry::Storage;

use crate::histogram::Histogram;

/// Counter backing `metrics::counter!`.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl CounterFn for Counter {
    fn increment(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn absolute(&self, value: u64) {
        self.0.fetch_max(value, Ordering::Relaxed);
    }
}

impl influx_reporter::Counter for Counter {
    fn snapshot(&self) -> CounterSnapshot {
        let count = self.0.load(Ordering::Relaxed);
        CounterSnapshot {
            count: count.min(i64::MAX as u64) as i64,
        }
    }
}

/// Gauge backing `metrics::gauge!`. Holds the bit pattern of an `f64`.
#[derive(Debug)]
pub struct Gauge(AtomicU64);

impl Default for Gauge {
    fn default() -> Self {
        Self(AtomicU64::new(0f64.to_bits()))
    }
}

impl Gauge {
    fn update(&self, f: impl Fn(f64) -> f64) {
        let _ = self.0.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            Some(f(f64::from_bits(bits)).to_bits())
        });
    }
}

impl GaugeFn for Gauge {
    fn increment(&self, value: f64) {
        self.update(|current| current + value);
    }

    fn decrement(&self, value: f64) {
        self.update(|current| current - value);
    }

    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl influx_reporter::GaugeFloat for Gauge {
    fn snapshot(&self) -> GaugeFloatSnapshot {
        GaugeFloatSnapshot {
            value: f64::from_bits(self.0.load(Ordering::Relaxed)),
        }
    }
}

/// A [`metrics_util::registry::Storage`] whose metrics can be read by the reporter.
///
/// [`metrics_util::registry::Storage`]: metrics_util_020::registry::Storage
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportableStorage;

impl<K> Storage<K> for ReportableStorage {
    type Counter = Arc<Counter>;
    type Gauge = Arc<Gauge>;
    type Histogram = Arc<Histogram>;

    fn counter(&self, _: &K) -> Self::Counter {
        Arc::new(Counter::default())
    }

    fn gauge(&self, _: &K) -> Self::Gauge {
        Arc::new(Gauge::default())
    }

    fn histogram(&self, _: &K) -> Self::Histogram {
        Arc::new(Histogram::new())
    }
}

type KeyRegistry = metrics_util_020::registry::Registry<Key, ReportableStorage>;

/// A [`metrics::Recorder`] whose metrics are exported by an [`influx_reporter::Reporter`].
///
/// Clones share the same metrics, so one clone can be installed as the recorder and
/// another handed to the reporter.
///
/// [`metrics::Recorder`]: metrics_024::Recorder
#[derive(Clone)]
pub struct MetricsRsRegistry {
    registry: Arc<KeyRegistry>,
}

impl Default for MetricsRsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MetricsRsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsRsRegistry").finish_non_exhaustive()
    }
}

impl MetricsRsRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            registry: Arc::new(KeyRegistry::new(ReportableStorage)),
        }
    }

    /// Install this registry as the global `metrics` recorder.
    ///
    /// Fails if a global recorder is already installed.
    pub fn install(self) -> Result<(), SetRecorderError<Self>> {
        metrics_024::set_global_recorder(self)?;
        tracing::debug!("installed metrics recorder");
        Ok(())
    }
}

/// Name of the metric `key` is exported under: the key name followed by `.label_value` for
/// every label, in the order they were given.
pub fn metric_name(key: &Key) -> String {
    let mut name = key.name().to_string();
    for label in key.labels() {
        name.push('.');
        name.push_str(label.key());
        name.push('_');
        name.push_str(label.value());
    }
    name
}

impl Registry for MetricsRsRegistry {
    fn each(&self, f: &mut dyn FnMut(&str, &Metric)) {
        // collect first so no registry lock is held while `f` runs
        let mut metrics = Vec::new();
        self.registry.visit_counters(|key, counter| {
            metrics.push((metric_name(key), Metric::Counter(counter.clone())));
        });
        self.registry.visit_gauges(|key, gauge| {
            metrics.push((metric_name(key), Metric::GaugeFloat(gauge.clone())));
        });
        self.registry.visit_histograms(|key, histogram| {
            metrics.push((metric_name(key), Metric::Histogram(histogram.clone())));
        });
        metrics.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, metric) in &metrics {
            f(name, metric);
        }
    }
}

impl Recorder for MetricsRsRegistry {
    // line protocol has nowhere to put units or descriptions
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> metrics_024::Counter {
        metrics_024::Counter::from_arc(self.registry.get_or_create_counter(key, Clone::clone))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> metrics_024::Gauge {
        metrics_024::Gauge::from_arc(self.registry.get_or_create_gauge(key, Clone::clone))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> metrics_024::Histogram {
        metrics_024::Histogram::from_arc(self.registry.get_or_create_histogram(key, Clone::clone))
    }
}
