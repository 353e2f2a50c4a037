// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::metric::Metric;

/// A source of named metrics that the reporter walks on every tick.
///
/// The registry is shared with the rest of the process, which may register and update
/// metrics while the reporter reads them. Implementations are responsible for making
/// concurrent iteration safe. The iteration order is up to the implementation.
pub trait Registry: Send + Sync {
    /// Call `f` once for every registered metric.
    fn each(&self, f: &mut dyn FnMut(&str, &Metric));
}

impl<R: Registry + ?Sized> Registry for Arc<R> {
    fn each(&self, f: &mut dyn FnMut(&str, &Metric)) {
        (**self).each(f)
    }
}

/// A simple concurrent [`Registry`] keyed by name.
///
/// Metrics are visited in name order. Cloning is cheap and still refers to the same set of
/// metrics.
#[derive(Clone, Debug, Default)]
pub struct MetricRegistry {
    metrics: Arc<RwLock<HashMap<String, Metric>>>,
}

impl MetricRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `metric` under `name`, replacing any previous metric with that name.
    pub fn register(&self, name: impl Into<String>, metric: Metric) {
        let name = name.into();
        tracing::trace!(%name, kind = metric.kind(), "registering metric");
        self.metrics
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, metric);
    }

    /// Return the metric registered under `name`, or register the one built by `make`.
    pub fn get_or_register(&self, name: &str, make: impl FnOnce() -> Metric) -> Metric {
        if let Some(metric) = self.get(name) {
            return metric;
        }
        self.metrics
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_insert_with(make)
            .clone()
    }

    /// Look up a metric by name
    pub fn get(&self, name: &str) -> Option<Metric> {
        self.metrics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Remove the metric registered under `name`, returning it.
    pub fn unregister(&self, name: &str) -> Option<Metric> {
        self.metrics
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
    }

    /// Number of registered metrics
    pub fn len(&self) -> usize {
        self.metrics.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no metric is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Registry for MetricRegistry {
    fn each(&self, f: &mut dyn FnMut(&str, &Metric)) {
        // Clone the entries out so the callback never runs under the lock; metric handles
        // are `Arc`s so this is cheap.
        let mut metrics: Vec<(String, Metric)> = self
            .metrics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, metric)| (name.clone(), metric.clone()))
            .collect();
        metrics.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, metric) in &metrics {
            f(name, metric);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::metric::{StandardCounter, StandardGauge};

    use super::*;

    #[test]
    fn register_and_visit() {
        let registry = MetricRegistry::new();
        assert!(registry.is_empty());
        registry.register("b", Metric::Gauge(Arc::new(StandardGauge::new())));
        registry.register("a", Metric::Counter(Arc::new(StandardCounter::new())));
        registry.register("c", Metric::Counter(Arc::new(StandardCounter::new())));

        let mut seen = vec![];
        registry.each(&mut |name, metric| seen.push((name.to_string(), metric.kind())));
        assert_eq!(
            seen,
            vec![
                ("a".to_string(), "counter"),
                ("b".to_string(), "gauge"),
                ("c".to_string(), "counter"),
            ]
        );

        assert!(registry.unregister("a").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_or_register_keeps_the_first_metric() {
        let registry = MetricRegistry::new();
        let first = Arc::new(StandardCounter::new());
        first.inc(3);
        registry.get_or_register("hits", || Metric::Counter(first.clone()));
        let again = registry.get_or_register("hits", || {
            Metric::Counter(Arc::new(StandardCounter::new()))
        });
        match again {
            Metric::Counter(counter) => assert_eq!(counter.snapshot().count, 3),
            other => panic!("unexpected metric {other:?}"),
        }
    }

    #[test]
    fn callback_may_touch_the_registry() {
        let registry = MetricRegistry::new();
        registry.register("a", Metric::Counter(Arc::new(StandardCounter::new())));
        let other = registry.clone();
        registry.each(&mut |name, _| {
            other.unregister(name);
        });
        assert!(registry.is_empty());
    }
}
