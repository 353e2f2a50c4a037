// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! File-based reporter configuration.
//!
//! ```toml
//! url = "http://localhost:8086"
//! token = "my-token"
//! org = "my-org"
//! bucket = "app-metrics"
//! interval_secs = 10
//!
//! [tags]
//! host = "web-1"
//!
//! [write]
//! batch_size = 1000
//!
//! [reconnect]
//! max_attempts = 5
//! ```
//!
//! Everything except the connection parameters has a default.

use std::{fmt, path::Path, time::Duration};

use serde::Deserialize;

use crate::{
    backoff::ReconnectPolicy,
    client::{ConnectionParams, WriteOptions},
    error::ConfigError,
    point::{Precision, TagSet},
};

/// Configuration of a [`Reporter`](crate::Reporter), usually loaded from TOML.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReporterConfig {
    /// Base URL of the database
    pub url: String,
    /// API token
    pub token: String,
    /// Organization
    pub org: String,
    /// Bucket
    pub bucket: String,
    /// Seconds between two report passes
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Tags attached to every point
    #[serde(default)]
    pub tags: TagSet,
    /// Write client tuning
    #[serde(default)]
    pub write: WriteConfig,
    /// Reconnect pacing
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_interval_secs() -> u64 {
    60
}

/// The `[write]` table. See [`WriteOptions`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WriteConfig {
    /// Points per write request
    pub batch_size: usize,
    /// Milliseconds between background flushes
    pub flush_interval_ms: u64,
    /// Seconds before a write request times out
    pub timeout_secs: u64,
    /// Transient retries per request
    pub max_retries: u32,
    /// Points buffered before the oldest are dropped
    pub queue_capacity: usize,
    /// Timestamp precision: `ns`, `us`, `ms` or `s`
    pub precision: Precision,
}

impl Default for WriteConfig {
    fn default() -> Self {
        let options = WriteOptions::default();
        Self {
            batch_size: options.batch_size,
            flush_interval_ms: options.flush_interval.as_millis() as u64,
            timeout_secs: options.timeout.as_secs(),
            max_retries: options.max_retries,
            queue_capacity: options.queue_capacity,
            precision: options.precision,
        }
    }
}

/// The `[reconnect]` table. See [`ReconnectPolicy`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectConfig {
    /// Delay of the first reconnect, in milliseconds
    pub initial_delay_ms: u64,
    /// Largest reconnect delay, in milliseconds
    pub max_delay_ms: u64,
    /// Delay growth per consecutive failure
    pub multiplier: f64,
    /// Randomized fraction of the delay, in `[0, 1]`
    pub jitter: f64,
    /// Reconnects allowed per window
    pub max_attempts: usize,
    /// Window length in seconds
    pub window_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            jitter: policy.jitter,
            max_attempts: policy.max_attempts,
            window_secs: policy.window.as_secs(),
        }
    }
}

impl ReporterConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let toml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&toml)
    }

    /// Check the values serde can't
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.interval_secs == 0 {
            return invalid("interval_secs must be greater than zero");
        }
        for (name, value) in [("url", &self.url), ("org", &self.org), ("bucket", &self.bucket)] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} must not be empty")));
            }
        }
        if self.write.batch_size == 0 {
            return invalid("write.batch_size must be greater than zero");
        }
        if self.write.queue_capacity == 0 {
            return invalid("write.queue_capacity must be greater than zero");
        }
        if self.write.flush_interval_ms == 0 {
            return invalid("write.flush_interval_ms must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return invalid("reconnect.jitter must be between 0 and 1");
        }
        if self.reconnect.multiplier.is_nan() || self.reconnect.multiplier < 1.0 {
            return invalid("reconnect.multiplier must be at least 1");
        }
        if self.reconnect.window_secs == 0 {
            return invalid("reconnect.window_secs must be greater than zero");
        }
        Ok(())
    }

    /// Report interval
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Connection parameters of the write client
    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams::new(&self.url, &self.token, &self.org, &self.bucket)
    }

    /// Options of the bundled HTTP write client
    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            batch_size: self.write.batch_size,
            flush_interval: Duration::from_millis(self.write.flush_interval_ms),
            precision: self.write.precision,
            timeout: Duration::from_secs(self.write.timeout_secs),
            max_retries: self.write.max_retries,
            queue_capacity: self.write.queue_capacity,
        }
    }

    /// Reconnect pacing
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            multiplier: self.reconnect.multiplier,
            jitter: self.reconnect.jitter,
            max_attempts: self.reconnect.max_attempts,
            window: Duration::from_secs(self.reconnect.window_secs),
        }
    }
}

impl fmt::Debug for ReporterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReporterConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .field("interval_secs", &self.interval_secs)
            .field("tags", &self.tags)
            .field("write", &self.write)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use assert2::{check, let_assert};
    use rstest::rstest;

    use super::*;

    const MINIMAL: &str = r#"
        url = "http://localhost:8086"
        token = "s3cr3t"
        org = "acme"
        bucket = "metrics"
    "#;

    #[test]
    fn defaults() {
        let config = ReporterConfig::from_toml_str(MINIMAL).unwrap();
        check!(config.interval() == Duration::from_secs(60));
        check!(config.tags.is_empty());
        check!(config.write_options() == WriteOptions::default());
        check!(config.reconnect_policy() == ReconnectPolicy::default());
        check!(
            config.connection_params()
                == ConnectionParams::new("http://localhost:8086", "s3cr3t", "acme", "metrics")
        );
    }

    #[test]
    fn full() {
        let config = ReporterConfig::from_toml_str(
            r#"
            url = "https://influx.example"
            token = "t"
            org = "o"
            bucket = "b"
            interval_secs = 5

            [tags]
            host = "web-1"
            region = "eu"

            [write]
            batch_size = 10
            flush_interval_ms = 250
            timeout_secs = 3
            max_retries = 0
            queue_capacity = 100
            precision = "ms"

            [reconnect]
            initial_delay_ms = 100
            max_delay_ms = 1000
            multiplier = 3.0
            jitter = 0.0
            max_attempts = 2
            window_secs = 30
            "#,
        )
        .unwrap();
        check!(config.interval() == Duration::from_secs(5));
        check!(config.tags.get("region").map(String::as_str) == Some("eu"));
        let options = config.write_options();
        check!(options.batch_size == 10);
        check!(options.flush_interval == Duration::from_millis(250));
        check!(options.timeout == Duration::from_secs(3));
        check!(options.max_retries == 0);
        check!(options.queue_capacity == 100);
        check!(options.precision == Precision::Ms);
        let policy = config.reconnect_policy();
        check!(policy.initial_delay == Duration::from_millis(100));
        check!(policy.max_delay == Duration::from_secs(1));
        check!(policy.multiplier == 3.0);
        check!(policy.max_attempts == 2);
        check!(policy.window == Duration::from_secs(30));
    }

    #[rstest]
    #[case("interval_secs = 0", "interval_secs")]
    #[case("[write]\nbatch_size = 0", "batch_size")]
    #[case("[reconnect]\njitter = 1.5", "jitter")]
    #[case("[reconnect]\nmultiplier = 0.5", "multiplier")]
    fn rejects_invalid(#[case] extra: &str, #[case] mentions: &str) {
        let err = ReporterConfig::from_toml_str(&format!("{MINIMAL}\n{extra}")).unwrap_err();
        let_assert!(ConfigError::Invalid(msg) = err);
        check!(msg.contains(mentions));
    }

    #[test]
    fn rejects_empty_bucket() {
        let err = ReporterConfig::from_toml_str(
            r#"
            url = "http://localhost:8086"
            token = ""
            org = "acme"
            bucket = " "
            "#,
        )
        .unwrap_err();
        let_assert!(ConfigError::Invalid(msg) = err);
        check!(msg.contains("bucket"));
    }

    #[rstest]
    #[case(r#"url = "http://h""#)]
    #[case("this is not toml")]
    #[case("url = 1\ntoken = \"\"\norg = \"o\"\nbucket = \"b\"")]
    fn rejects_malformed(#[case] toml: &str) {
        let_assert!(Err(ConfigError::Parse(_)) = ReporterConfig::from_toml_str(toml));
    }

    #[test]
    fn rejects_unknown_fields() {
        let toml = format!("{MINIMAL}\nintervl_secs = 5");
        let_assert!(Err(ConfigError::Parse(_)) = ReporterConfig::from_toml_str(&toml));
    }

    #[test]
    fn from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = ReporterConfig::from_path(file.path()).unwrap();
        check!(config.bucket == "metrics");

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let_assert!(Err(ConfigError::Read { path, .. }) = ReporterConfig::from_path(&missing));
        check!(path == missing);
    }

    #[test]
    fn debug_redacts_the_token() {
        let config = ReporterConfig::from_toml_str(MINIMAL).unwrap();
        let debug = format!("{config:?}");
        check!(!debug.contains("s3cr3t"));
        check!(debug.contains("acme"));
    }
}
