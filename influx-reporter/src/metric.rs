// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The metric kinds a [`Registry`](crate::Registry) can hand to the reporter, and the
//! snapshots they produce.
//!
//! The reporter never computes statistics itself. Percentiles, rates and moments all come
//! from the metric implementation through these traits.

use std::{
    any::Any,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
};

/// Point-in-time value of a [`Counter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    /// Current count
    pub count: i64,
}

/// Point-in-time value of an integer [`Gauge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GaugeSnapshot {
    /// Current value
    pub value: i64,
}

/// Point-in-time value of a floating-point [`GaugeFloat`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GaugeFloatSnapshot {
    /// Current value
    pub value: f64,
}

/// Point-in-time rates of a [`Meter`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeterSnapshot {
    /// Number of events marked
    pub count: i64,
    /// One-minute moving average rate
    pub rate1: f64,
    /// Five-minute moving average rate
    pub rate5: f64,
    /// Fifteen-minute moving average rate
    pub rate15: f64,
    /// Mean rate since the meter was created
    pub rate_mean: f64,
}

/// Read-only view of a sampled distribution, as produced by a [`Histogram`] or [`Timer`].
pub trait SampleSnapshot: Send {
    /// Number of recorded samples
    fn count(&self) -> i64;
    /// Largest recorded sample
    fn max(&self) -> i64;
    /// Arithmetic mean of the samples
    fn mean(&self) -> f64;
    /// Smallest recorded sample
    fn min(&self) -> i64;
    /// Standard deviation of the samples
    fn std_dev(&self) -> f64;
    /// Variance of the samples
    fn variance(&self) -> f64;
    /// Values at the given quantiles (each in `[0, 1]`).
    ///
    /// The result must be in the same order as `quantiles`: the reporter maps results to
    /// field names by position.
    fn percentiles(&self, quantiles: &[f64]) -> Vec<f64>;
}

/// A [`SampleSnapshot`] that also carries throughput rates.
pub trait TimerSnapshot: SampleSnapshot {
    /// Event rates over the timer's lifetime
    fn rates(&self) -> MeterSnapshot;
}

/// Monotonic (or at least integer) count.
pub trait Counter: Send + Sync {
    /// Read the current count
    fn snapshot(&self) -> CounterSnapshot;
}

/// Integer gauge.
pub trait Gauge: Send + Sync {
    /// Read the current value
    fn snapshot(&self) -> GaugeSnapshot;
}

/// Floating point gauge.
pub trait GaugeFloat: Send + Sync {
    /// Read the current value
    fn snapshot(&self) -> GaugeFloatSnapshot;
}

/// Distribution of values.
pub trait Histogram: Send + Sync {
    /// Capture the current distribution
    fn snapshot(&self) -> Box<dyn SampleSnapshot>;
}

/// Event rate.
pub trait Meter: Send + Sync {
    /// Read the current rates
    fn snapshot(&self) -> MeterSnapshot;
}

/// Distribution of durations together with their rate.
pub trait Timer: Send + Sync {
    /// Capture the current distribution and rates
    fn snapshot(&self) -> Box<dyn TimerSnapshot>;
}

/// A registered metric, as seen by the reporter.
///
/// This is a closed set. Anything the reporter doesn't know how to transcribe is registered
/// as [`Metric::Unsupported`] and is skipped without producing a point.
#[derive(Clone)]
pub enum Metric {
    /// See [`Counter`]
    Counter(Arc<dyn Counter>),
    /// See [`Gauge`]
    Gauge(Arc<dyn Gauge>),
    /// See [`GaugeFloat`]
    GaugeFloat(Arc<dyn GaugeFloat>),
    /// See [`Histogram`]
    Histogram(Arc<dyn Histogram>),
    /// See [`Meter`]
    Meter(Arc<dyn Meter>),
    /// See [`Timer`]
    Timer(Arc<dyn Timer>),
    /// A metric of some other kind. Never exported.
    Unsupported(Arc<dyn Any + Send + Sync>),
}

impl Metric {
    /// Short name of the metric kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Metric::Counter(_) => "counter",
            Metric::Gauge(_) => "gauge",
            Metric::GaugeFloat(_) => "gauge_float",
            Metric::Histogram(_) => "histogram",
            Metric::Meter(_) => "meter",
            Metric::Timer(_) => "timer",
            Metric::Unsupported(_) => "unsupported",
        }
    }
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Metric").field(&self.kind()).finish()
    }
}

/// Integer counter backed by an atomic.
#[derive(Debug, Default)]
pub struct StandardCounter(AtomicI64);

impl StandardCounter {
    /// Create a counter starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to the count
    pub fn inc(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Subtract `delta` from the count
    pub fn dec(&self, delta: i64) {
        self.0.fetch_sub(delta, Ordering::Relaxed);
    }

    /// Reset the count to zero
    pub fn clear(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

impl Counter for StandardCounter {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            count: self.0.load(Ordering::Relaxed),
        }
    }
}

/// Integer gauge backed by an atomic.
#[derive(Debug, Default)]
pub struct StandardGauge(AtomicI64);

impl StandardGauge {
    /// Create a gauge with value zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gauge value
    pub fn update(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }
}

impl Gauge for StandardGauge {
    fn snapshot(&self) -> GaugeSnapshot {
        GaugeSnapshot {
            value: self.0.load(Ordering::Relaxed),
        }
    }
}

/// Floating point gauge, stored as the bits of an `f64` in an atomic.
#[derive(Debug)]
pub struct StandardGaugeFloat(AtomicU64);

impl Default for StandardGaugeFloat {
    fn default() -> Self {
        Self(AtomicU64::new(0f64.to_bits()))
    }
}

impl StandardGaugeFloat {
    /// Create a gauge with value zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gauge value
    pub fn update(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl GaugeFloat for StandardGaugeFloat {
    fn snapshot(&self) -> GaugeFloatSnapshot {
        GaugeFloatSnapshot {
            value: f64::from_bits(self.0.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn standard_metrics_read_back() {
        let counter = StandardCounter::new();
        counter.inc(5);
        counter.dec(2);
        assert_eq!(counter.snapshot().count, 3);
        counter.clear();
        assert_eq!(counter.snapshot().count, 0);

        let gauge = StandardGauge::new();
        gauge.update(-7);
        assert_eq!(gauge.snapshot().value, -7);

        let gauge = StandardGaugeFloat::new();
        assert_eq!(gauge.snapshot().value, 0.0);
        gauge.update(1.5);
        assert_eq!(gauge.snapshot().value, 1.5);
    }

    #[test]
    fn debug_names_the_kind() {
        let metric = Metric::Counter(Arc::new(StandardCounter::new()));
        assert_eq!(format!("{metric:?}"), r#"Metric("counter")"#);
        let metric = Metric::Unsupported(Arc::new(()));
        assert_eq!(metric.kind(), "unsupported");
    }
}
