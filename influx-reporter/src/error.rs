// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use thiserror::Error;

/// An error reported asynchronously by a write client on its error channel.
///
/// The reporter reacts to every one of these by replacing the client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteError {
    /// The configured endpoint is not a valid URL
    #[cfg(feature = "http-client")]
    #[error("invalid endpoint `{url}`: {source}")]
    InvalidEndpoint {
        /// The endpoint as configured
        url: String,
        /// Why it didn't parse
        #[source]
        source: url::ParseError,
    },
    /// The request could not be sent or its response could not be read
    #[cfg(feature = "http-client")]
    #[error("write request failed: {0}")]
    Transport(#[from] reqwest_middleware::Error),
    /// The server answered with a non-success status
    #[error("write rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body, usually a JSON error document
        body: String,
    },
    /// The client's background writer is gone
    #[error("write client closed")]
    Closed,
}

/// Failure to build a write client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The HTTP client could not be constructed (e.g. TLS backend initialization failed)
    #[cfg(feature = "http-client")]
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
    /// Any other reason a custom client factory may have
    #[error("{0}")]
    Other(String),
}

/// Failure to load a [`ReporterConfig`](crate::ReporterConfig).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path of the file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// The config is not valid TOML or doesn't match the expected shape
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// The config parsed but holds an unusable value
    #[error("invalid config: {0}")]
    Invalid(String),
}
