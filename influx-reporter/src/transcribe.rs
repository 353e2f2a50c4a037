// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Turns metric snapshots into points.

use std::{sync::Arc, time::SystemTime};

use crate::{
    metric::{MeterSnapshot, Metric, SampleSnapshot},
    point::{Point, TagSet},
};

/// Quantiles requested from every histogram and timer, in field order.
pub const PERCENTILES: [f64; 6] = [0.5, 0.75, 0.95, 0.99, 0.999, 0.9999];

/// Field names for [`PERCENTILES`], matched by position.
pub const PERCENTILE_FIELDS: [&str; 6] = ["p50", "p75", "p95", "p99", "p999", "p9999"];

/// Snapshot `metric` and turn it into one point named `<name>.<suffix>`.
///
/// Returns `None` for [`Metric::Unsupported`]. The function reads nothing but its inputs and
/// the metric's snapshot, so calling it twice on an unchanged metric yields equal points.
pub fn transcribe(
    name: &str,
    metric: &Metric,
    tags: &Arc<TagSet>,
    now: SystemTime,
) -> Option<Point> {
    let point = |suffix: &str| Point::new(format!("{name}.{suffix}"), Arc::clone(tags), now);
    let point = match metric {
        Metric::Counter(counter) => point("count").field("value", counter.snapshot().count),
        Metric::Gauge(gauge) => point("gauge").field("value", gauge.snapshot().value),
        Metric::GaugeFloat(gauge) => point("gauge").field("value", gauge.snapshot().value),
        Metric::Histogram(histogram) => {
            let snapshot = histogram.snapshot();
            sample_fields(point("histogram"), &*snapshot)
        }
        Metric::Meter(meter) => {
            let MeterSnapshot {
                count,
                rate1,
                rate5,
                rate15,
                rate_mean,
            } = meter.snapshot();
            point("meter")
                .field("count", count)
                .field("m1", rate1)
                .field("m5", rate5)
                .field("m15", rate15)
                .field("mean", rate_mean)
        }
        Metric::Timer(timer) => {
            let snapshot = timer.snapshot();
            let rates = snapshot.rates();
            sample_fields(point("timer"), &*snapshot)
                .field("m1", rates.rate1)
                .field("m5", rates.rate5)
                .field("m15", rates.rate15)
                .field("meanrate", rates.rate_mean)
        }
        // deliberately exported as nothing
        Metric::Unsupported(_) => return None,
    };
    Some(point)
}

fn sample_fields(point: Point, snapshot: &dyn SampleSnapshot) -> Point {
    let percentiles = snapshot.percentiles(&PERCENTILES);
    if percentiles.len() != PERCENTILES.len() {
        tracing::debug!(
            measurement = point.measurement(),
            returned = percentiles.len(),
            "metric returned an unexpected number of percentiles"
        );
    }
    let point = point
        .field("count", snapshot.count())
        .field("max", snapshot.max())
        .field("mean", snapshot.mean())
        .field("min", snapshot.min())
        .field("stddev", snapshot.std_dev())
        .field("variance", snapshot.variance());
    PERCENTILE_FIELDS
        .iter()
        .zip(percentiles)
        .fold(point, |point, (&key, value)| point.field(key, value))
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{Duration, UNIX_EPOCH},
    };

    use assert2::check;

    use super::*;
    use crate::{
        metric::{
            Histogram, Meter, StandardCounter, StandardGauge, StandardGaugeFloat, Timer,
            TimerSnapshot,
        },
        point::FieldValue,
    };

    /// Sample snapshot returning a distinct sentinel per requested quantile.
    #[derive(Clone)]
    struct Sentinel {
        truncate_to: usize,
    }

    impl SampleSnapshot for Sentinel {
        fn count(&self) -> i64 {
            10
        }
        fn max(&self) -> i64 {
            9
        }
        fn mean(&self) -> f64 {
            4.5
        }
        fn min(&self) -> i64 {
            0
        }
        fn std_dev(&self) -> f64 {
            2.0
        }
        fn variance(&self) -> f64 {
            4.0
        }
        fn percentiles(&self, quantiles: &[f64]) -> Vec<f64> {
            quantiles
                .iter()
                .enumerate()
                .map(|(i, _)| 1000.0 + i as f64)
                .take(self.truncate_to)
                .collect()
        }
    }

    impl TimerSnapshot for Sentinel {
        fn rates(&self) -> MeterSnapshot {
            MeterSnapshot {
                count: 10,
                rate1: 1.0,
                rate5: 5.0,
                rate15: 15.0,
                rate_mean: 0.5,
            }
        }
    }

    impl Histogram for Sentinel {
        fn snapshot(&self) -> Box<dyn SampleSnapshot> {
            Box::new(self.clone())
        }
    }

    impl Timer for Sentinel {
        fn snapshot(&self) -> Box<dyn TimerSnapshot> {
            Box::new(self.clone())
        }
    }

    struct FixedMeter;

    impl Meter for FixedMeter {
        fn snapshot(&self) -> MeterSnapshot {
            MeterSnapshot {
                count: 3,
                rate1: 0.1,
                rate5: 0.5,
                rate15: 1.5,
                rate_mean: 0.25,
            }
        }
    }

    fn tags() -> Arc<TagSet> {
        Arc::new([("env".to_string(), "prod".to_string())].into_iter().collect())
    }

    fn now() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn keys(point: &Point) -> Vec<&'static str> {
        point.fields().iter().map(|(k, _)| *k).collect()
    }

    #[test]
    fn counter_and_gauges() {
        let counter = Arc::new(StandardCounter::new());
        counter.inc(42);
        let point = transcribe("requests", &Metric::Counter(counter), &tags(), now()).unwrap();
        check!(point.measurement() == "requests.count");
        check!(point.fields() == [("value", FieldValue::Integer(42))]);

        let gauge = Arc::new(StandardGauge::new());
        gauge.update(7);
        let point = transcribe("queue_size", &Metric::Gauge(gauge), &tags(), now()).unwrap();
        check!(point.measurement() == "queue_size.gauge");
        check!(point.fields() == [("value", FieldValue::Integer(7))]);

        let gauge = Arc::new(StandardGaugeFloat::new());
        gauge.update(0.25);
        let point = transcribe("load", &Metric::GaugeFloat(gauge), &tags(), now()).unwrap();
        check!(point.measurement() == "load.gauge");
        check!(point.fields() == [("value", FieldValue::Float(0.25))]);
        check!(point.timestamp() == now());
        check!(point.tags() == &*tags());
    }

    #[test]
    fn histogram_fields_and_positional_percentiles() {
        let metric = Metric::Histogram(Arc::new(Sentinel { truncate_to: 6 }));
        let point = transcribe("latency", &metric, &tags(), now()).unwrap();
        check!(point.measurement() == "latency.histogram");
        check!(
            keys(&point)
                == [
                    "count", "max", "mean", "min", "stddev", "variance", "p50", "p75", "p95",
                    "p99", "p999", "p9999"
                ]
        );
        check!(point.field_value("count") == Some(FieldValue::Integer(10)));
        check!(point.field_value("max") == Some(FieldValue::Integer(9)));
        check!(point.field_value("variance") == Some(FieldValue::Float(4.0)));
        for (i, key) in PERCENTILE_FIELDS.iter().enumerate() {
            check!(point.field_value(key) == Some(FieldValue::Float(1000.0 + i as f64)));
        }
    }

    #[test]
    fn short_percentile_results_drop_trailing_fields() {
        let metric = Metric::Histogram(Arc::new(Sentinel { truncate_to: 2 }));
        let point = transcribe("latency", &metric, &tags(), now()).unwrap();
        check!(point.field_value("p75") == Some(FieldValue::Float(1001.0)));
        check!(point.field_value("p95") == None);
    }

    #[test]
    fn meter_fields() {
        let point = transcribe("events", &Metric::Meter(Arc::new(FixedMeter)), &tags(), now())
            .unwrap();
        check!(point.measurement() == "events.meter");
        check!(
            point.fields()
                == [
                    ("count", FieldValue::Integer(3)),
                    ("m1", FieldValue::Float(0.1)),
                    ("m5", FieldValue::Float(0.5)),
                    ("m15", FieldValue::Float(1.5)),
                    ("mean", FieldValue::Float(0.25)),
                ]
        );
    }

    #[test]
    fn timer_fields() {
        let metric = Metric::Timer(Arc::new(Sentinel { truncate_to: 6 }));
        let point = transcribe("db", &metric, &tags(), now()).unwrap();
        check!(point.measurement() == "db.timer");
        check!(
            keys(&point)
                == [
                    "count", "max", "mean", "min", "stddev", "variance", "p50", "p75", "p95",
                    "p99", "p999", "p9999", "m1", "m5", "m15", "meanrate"
                ]
        );
        check!(point.field_value("p9999") == Some(FieldValue::Float(1005.0)));
        check!(point.field_value("meanrate") == Some(FieldValue::Float(0.5)));
    }

    #[test]
    fn unsupported_metrics_produce_nothing() {
        let metric = Metric::Unsupported(Arc::new("something else"));
        check!(transcribe("x", &metric, &tags(), now()) == None);
    }

    #[test]
    fn transcription_is_idempotent() {
        let metric = Metric::Timer(Arc::new(Sentinel { truncate_to: 6 }));
        let first = transcribe("db", &metric, &tags(), now());
        let second = transcribe("db", &metric, &tags(), now());
        check!(first == second);
    }
}
