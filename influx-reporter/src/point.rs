// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Points and their InfluxDB line protocol encoding.

use std::{
    collections::BTreeMap,
    fmt::{self, Write as _},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Deserialize;

/// Tags attached to every point. Kept sorted, which is the order InfluxDB prefers.
pub type TagSet = BTreeMap<String, String>;

/// A single field value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    /// Signed integer, written with the `i` suffix
    Integer(i64),
    /// Floating point value
    Float(f64),
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl FieldValue {
    /// The value as an `f64`, whatever its representation.
    pub fn as_f64(&self) -> f64 {
        match *self {
            FieldValue::Integer(v) => v as f64,
            FieldValue::Float(v) => v,
        }
    }
}

/// Timestamp precision used when encoding points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// Nanoseconds
    #[default]
    Ns,
    /// Microseconds
    Us,
    /// Milliseconds
    Ms,
    /// Seconds
    S,
}

impl Precision {
    /// Value of the `precision` query parameter of the write API
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Ns => "ns",
            Precision::Us => "us",
            Precision::Ms => "ms",
            Precision::S => "s",
        }
    }

    fn convert(&self, timestamp: SystemTime) -> i128 {
        let (sign, since_epoch) = match timestamp.duration_since(UNIX_EPOCH) {
            Ok(d) => (1, d),
            Err(e) => (-1, e.duration()),
        };
        let magnitude = match self {
            Precision::Ns => since_epoch.as_nanos(),
            Precision::Us => since_epoch.as_micros(),
            Precision::Ms => since_epoch.as_millis(),
            Precision::S => since_epoch.as_secs() as u128,
        };
        sign * magnitude as i128
    }
}

/// One timestamped, tagged, multi-field record.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: Arc<TagSet>,
    fields: Vec<(&'static str, FieldValue)>,
    timestamp: SystemTime,
}

impl Point {
    /// Create a point with no fields
    pub fn new(measurement: impl Into<String>, tags: Arc<TagSet>, timestamp: SystemTime) -> Self {
        Self {
            measurement: measurement.into(),
            tags,
            fields: Vec::new(),
            timestamp,
        }
    }

    /// Add a field. Field order is kept as inserted.
    pub fn field(mut self, key: &'static str, value: impl Into<FieldValue>) -> Self {
        self.fields.push((key, value.into()));
        self
    }

    /// Measurement name
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Tags of this point
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Fields in insertion order
    pub fn fields(&self) -> &[(&'static str, FieldValue)] {
        &self.fields
    }

    /// Look up a field by key
    pub fn field_value(&self, key: &str) -> Option<FieldValue> {
        self.fields
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    /// Timestamp of this point
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Append this point as one line of line protocol, including the trailing newline.
    ///
    /// Non-finite floats can't be represented and are left out. If no field remains the
    /// point is not written at all and `false` is returned.
    pub fn write_line(&self, precision: Precision, out: &mut String) -> bool {
        let start = out.len();
        escape_into(out, &self.measurement, &[',', ' ']);
        for (key, value) in self.tags.iter() {
            if key.is_empty() || value.is_empty() {
                continue;
            }
            out.push(',');
            escape_into(out, key, &[',', '=', ' ']);
            out.push('=');
            escape_into(out, value, &[',', '=', ' ']);
        }
        let mut separator = ' ';
        for (key, value) in &self.fields {
            if let FieldValue::Float(v) = value {
                if !v.is_finite() {
                    continue;
                }
            }
            out.push(separator);
            separator = ',';
            escape_into(out, key, &[',', '=', ' ']);
            out.push('=');
            // writing to a String can't fail
            let _ = match value {
                FieldValue::Integer(v) => write!(out, "{v}i"),
                FieldValue::Float(v) => write!(out, "{v}"),
            };
        }
        if separator == ' ' {
            out.truncate(start);
            return false;
        }
        let _ = writeln!(out, " {}", precision.convert(self.timestamp));
        true
    }

    /// Encode this point as a line of line protocol, without the trailing newline.
    pub fn to_line(&self, precision: Precision) -> Option<String> {
        let mut out = String::new();
        if self.write_line(precision, &mut out) {
            out.pop();
            Some(out)
        } else {
            None
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_line(Precision::Ns) {
            Some(line) => f.write_str(&line),
            None => write!(f, "{} <no fields>", self.measurement),
        }
    }
}

fn escape_into(out: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        match c {
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Arc<TagSet> {
        Arc::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn integer_and_float_fields() {
        let point = Point::new("requests.count", tags(&[("env", "prod")]), at(1))
            .field("value", 42i64)
            .field("mean", 1.5);
        assert_eq!(
            point.to_line(Precision::Ns).unwrap(),
            "requests.count,env=prod value=42i,mean=1.5 1000000000"
        );
    }

    #[rstest]
    #[case(Precision::Ns, "1500000000")]
    #[case(Precision::Us, "1500000")]
    #[case(Precision::Ms, "1500")]
    #[case(Precision::S, "1")]
    fn timestamp_precision(#[case] precision: Precision, #[case] expected: &str) {
        let point = Point::new("m", tags(&[]), at(1) + Duration::from_millis(500)).field("v", 1i64);
        assert_eq!(
            point.to_line(precision).unwrap(),
            format!("m v=1i {expected}")
        );
    }

    #[test]
    fn escaping() {
        let point = Point::new(
            "my measurement,x",
            tags(&[("host name", "a=b,c"), ("empty", "")]),
            at(0),
        )
        .field("fi=eld", 2i64);
        assert_eq!(
            point.to_line(Precision::S).unwrap(),
            r"my\ measurement\,x,host\ name=a\=b\,c fi\=eld=2i 0"
        );
    }

    #[test]
    fn non_finite_fields_are_dropped() {
        let point = Point::new("m", tags(&[]), at(0))
            .field("a", f64::NAN)
            .field("b", 1.0);
        assert_eq!(point.to_line(Precision::S).unwrap(), "m b=1 0");

        let point = Point::new("m", tags(&[]), at(0)).field("a", f64::INFINITY);
        let mut out = "keep\n".to_string();
        assert!(!point.write_line(Precision::S, &mut out));
        assert_eq!(out, "keep\n");
    }

    #[test]
    fn timestamps_before_the_epoch() {
        let point =
            Point::new("m", tags(&[]), UNIX_EPOCH - Duration::from_secs(2)).field("v", 1i64);
        assert_eq!(point.to_line(Precision::S).unwrap(), "m v=1i -2");
    }

    #[test]
    fn field_lookup() {
        let point = Point::new("m", tags(&[]), at(0)).field("v", 7i64);
        assert_eq!(point.field_value("v"), Some(FieldValue::Integer(7)));
        assert_eq!(point.field_value("w"), None);
        assert_eq!(point.field_value("v").unwrap().as_f64(), 7.0);
    }
}
