// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Histogram backing `metrics::histogram!`.

use std::{
    ops::RangeInclusive,
    sync::atomic::{AtomicU64, Ordering},
};

use histogram::AtomicHistogram;
use influx_reporter::metric::SampleSnapshot;
use metrics_024::HistogramFn;

/// A histogram that keeps exact running statistics next to a bucketed distribution.
///
/// Count, sum, sum of squares, min and max are exact. Percentiles come from the buckets of a
/// `histogram::Config::new(4, 32)` histogram: a 32-bit range with 16 buckets per power of
/// two, so a percentile is off by at most 6.25%. Negative values land in the lowest bucket
/// and values beyond `u32::MAX` in the highest.
///
/// Reading a snapshot doesn't reset anything.
pub struct Histogram {
    buckets: AtomicHistogram,
    count: AtomicU64,
    // f64 bit patterns
    sum: AtomicU64,
    sum_of_squares: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    /// Creates an empty histogram
    pub fn new() -> Self {
        Self {
            buckets: AtomicHistogram::with_config(&Self::default_configuration()),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0f64.to_bits()),
            sum_of_squares: AtomicU64::new(0f64.to_bits()),
            min: AtomicU64::new(f64::INFINITY.to_bits()),
            max: AtomicU64::new(f64::NEG_INFINITY.to_bits()),
        }
    }

    fn default_configuration() -> histogram::Config {
        histogram::Config::new(4, 32).expect("known good configuration")
    }

    /// Records one value. NaN is ignored.
    pub fn record(&self, value: f64) {
        if value.is_nan() {
            return;
        }
        let bucket = value.clamp(0.0, u32::MAX as f64) as u64;
        // in range for a (4, 32) configuration
        let _ = self.buckets.add(bucket, 1);
        self.count.fetch_add(1, Ordering::Relaxed);
        update_f64(&self.sum, |sum| sum + value);
        update_f64(&self.sum_of_squares, |sum| sum + value * value);
        update_f64(&self.min, |min| min.min(value));
        update_f64(&self.max, |max| max.max(value));
    }

    /// A consistent-enough copy of the current state
    pub fn snapshot(&self) -> HistogramSnapshot {
        let buckets = self
            .buckets
            .load()
            .into_iter()
            .filter(|bucket| bucket.count() > 0)
            .map(|bucket| Bucket {
                value: midpoint(bucket.range()),
                count: bucket.count(),
            })
            .collect();
        HistogramSnapshot {
            count: self.count.load(Ordering::Relaxed),
            sum: load_f64(&self.sum),
            sum_of_squares: load_f64(&self.sum_of_squares),
            min: load_f64(&self.min),
            max: load_f64(&self.max),
            buckets,
        }
    }
}

impl HistogramFn for Histogram {
    fn record(&self, value: f64) {
        Histogram::record(self, value)
    }
}

impl influx_reporter::Histogram for Histogram {
    fn snapshot(&self) -> Box<dyn SampleSnapshot> {
        Box::new(Histogram::snapshot(self))
    }
}

fn load_f64(cell: &AtomicU64) -> f64 {
    f64::from_bits(cell.load(Ordering::Relaxed))
}

fn update_f64(cell: &AtomicU64, f: impl Fn(f64) -> f64) {
    let _ = cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
        Some(f(f64::from_bits(bits)).to_bits())
    });
}

fn midpoint(range: RangeInclusive<u64>) -> u64 {
    let size = range.end() - range.start();
    range.start() + size / 2
}

/// A histogram bucket
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Bucket {
    /// Value is the midpoint of the bucket
    pub value: u64,
    /// Counts of entries within the bucket
    pub count: u64,
}

/// State of a [`Histogram`] at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    count: u64,
    sum: f64,
    sum_of_squares: f64,
    min: f64,
    max: f64,
    buckets: Vec<Bucket>,
}

impl HistogramSnapshot {
    /// Non-empty buckets, lowest first
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Sum of all recorded values
    pub fn sum(&self) -> f64 {
        self.sum
    }

    fn mean_f64(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    // walk the buckets until `q` of the values are covered
    fn percentile(&self, q: f64, total: u64) -> f64 {
        let rank = ((q.clamp(0.0, 1.0) * total as f64).ceil() as u64).max(1);
        let mut seen = 0;
        for bucket in &self.buckets {
            seen += bucket.count;
            if seen >= rank {
                return self.clamp_to_range(bucket.value as f64);
            }
        }
        self.clamp_to_range(f64::MAX)
    }

    // the exact extremes beat a bucket midpoint; a concurrent `record` may have filled a
    // bucket before min and max, in which case they are skipped
    fn clamp_to_range(&self, value: f64) -> f64 {
        if self.min <= self.max {
            value.clamp(self.min, self.max)
        } else {
            value
        }
    }
}

impl SampleSnapshot for HistogramSnapshot {
    fn count(&self) -> i64 {
        self.count.min(i64::MAX as u64) as i64
    }

    fn max(&self) -> i64 {
        if self.count == 0 { 0 } else { self.max.round() as i64 }
    }

    fn mean(&self) -> f64 {
        self.mean_f64()
    }

    fn min(&self) -> i64 {
        if self.count == 0 { 0 } else { self.min.round() as i64 }
    }

    fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.mean_f64();
        (self.sum_of_squares / self.count as f64 - mean * mean).max(0.0)
    }

    fn percentiles(&self, quantiles: &[f64]) -> Vec<f64> {
        let total: u64 = self.buckets.iter().map(|bucket| bucket.count).sum();
        if total == 0 {
            return vec![0.0; quantiles.len()];
        }
        quantiles
            .iter()
            .map(|&q| self.percentile(q, total))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;
    use influx_reporter::{PERCENTILES, metric::SampleSnapshot};

    use super::*;

    #[test]
    fn empty() {
        let snapshot = Histogram::new().snapshot();
        check!(snapshot.count() == 0);
        check!(snapshot.min() == 0);
        check!(snapshot.max() == 0);
        check!(snapshot.mean() == 0.0);
        check!(snapshot.variance() == 0.0);
        check!(snapshot.percentiles(&PERCENTILES) == vec![0.0; 6]);
    }

    #[test]
    fn exact_statistics() {
        let histogram = Histogram::new();
        for value in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            histogram.record(value);
        }
        let snapshot = histogram.snapshot();
        check!(snapshot.count() == 8);
        check!(snapshot.sum() == 40.0);
        check!(snapshot.min() == 2);
        check!(snapshot.max() == 9);
        check!(snapshot.mean() == 5.0);
        check!(snapshot.variance() == 4.0);
        check!(snapshot.std_dev() == 2.0);
    }

    #[test]
    fn percentiles_walk_the_buckets() {
        let histogram = Histogram::new();
        // small values get a bucket each
        for value in 1..=100 {
            histogram.record(value as f64 % 20.0);
        }
        for _ in 0..900 {
            histogram.record(10.0);
        }
        let snapshot = histogram.snapshot();
        let percentiles = snapshot.percentiles(&[0.5, 0.95, 0.9999]);
        check!(percentiles == vec![10.0, 10.0, 19.0]);
    }

    #[test]
    fn percentiles_are_clamped_to_the_exact_range() {
        let histogram = Histogram::new();
        histogram.record(1001.0);
        let snapshot = histogram.snapshot();
        // the bucket midpoint is 1007, but 1001 is the only value
        check!(snapshot.percentiles(&[0.5, 0.99]) == vec![1001.0, 1001.0]);
    }

    #[test]
    fn snapshot_does_not_reset() {
        let histogram = Histogram::new();
        histogram.record(3.0);
        check!(histogram.snapshot().count() == 1);
        check!(histogram.snapshot().count() == 1);
        check!(histogram.snapshot().buckets() == &[Bucket { value: 3, count: 1 }]);
    }

    #[test]
    fn out_of_range_values() {
        let histogram = Histogram::new();
        histogram.record(-5.0);
        histogram.record(f64::NAN);
        histogram.record(1e12);
        let snapshot = histogram.snapshot();
        check!(snapshot.count() == 2);
        check!(snapshot.min() == -5);
        check!(snapshot.max() == 1_000_000_000_000);
        check!(snapshot.buckets().first().map(|b| b.value) == Some(0));
    }
}
