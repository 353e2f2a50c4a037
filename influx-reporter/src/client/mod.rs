// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The boundary between the reporter and the database write client.
//!
//! A [`MakeClient`] builds a [`ClientSession`]: a [`WriteApi`] handle plus the channel on
//! which that handle reports write failures. The reporter owns exactly one session at a time
//! and builds a fresh one whenever the current one reports an error.

use std::{fmt, pin::Pin, time::Duration};

use tokio::sync::mpsc;

use crate::{WriteError, error::ClientError, point::Point};

#[cfg(feature = "http-client")]
mod http;
#[cfg(feature = "http-client")]
pub use http::{HttpClientFactory, HttpWriteApi};

pub use crate::point::Precision;

/// Connection parameters of a write client.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Base URL of the database, e.g. `http://localhost:8086`
    pub url: String,
    /// API token
    pub token: String,
    /// Organization name or id
    pub org: String,
    /// Bucket the points are written to
    pub bucket: String,
}

impl ConnectionParams {
    /// Create connection parameters
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            org: org.into(),
            bucket: bucket.into(),
        }
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .finish()
    }
}

/// Tuning of the bundled HTTP write client.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOptions {
    /// Points per write request
    pub batch_size: usize,
    /// How often buffered points are written even if no batch is full
    pub flush_interval: Duration,
    /// Timestamp precision on the wire
    pub precision: Precision,
    /// Timeout of a single write request
    pub timeout: Duration,
    /// Retries of transient failures (connection errors, 5xx, 429) per request
    pub max_retries: u32,
    /// Points held in memory before the oldest are dropped
    pub queue_capacity: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            flush_interval: Duration::from_secs(1),
            precision: Precision::Ns,
            timeout: Duration::from_secs(20),
            max_retries: 3,
            queue_capacity: 64 * 1024,
        }
    }
}

/// How to treat buffered points when a client is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Try to write everything still buffered before stopping
    Flush,
    /// Drop whatever is buffered
    Discard,
}

/// This struct contains a future that can be used to wait for a flush or close to complete
#[must_use = "future does nothing unless polled"]
pub struct FlushWait(Pin<Box<dyn Future<Output = ()> + Send + 'static>>);

impl Future for FlushWait {
    type Output = ();

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        self.0.as_mut().poll(cx)
    }
}

impl FlushWait {
    /// Return a FlushWait that is ready immediately
    pub fn ready() -> Self {
        Self(Box::pin(std::future::ready(())))
    }

    /// Create a FlushWait that returns when a future is ready
    pub fn from_future(f: impl Future<Output = ()> + Send + 'static) -> Self {
        Self(Box::pin(f))
    }
}

impl fmt::Debug for FlushWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FlushWait").finish()
    }
}

/// A handle for writing points into a database.
///
/// `write_point` must never block: implementations buffer and write in the background.
pub trait WriteApi: Send + Sync {
    /// Queue a point for writing
    fn write_point(&self, point: Point);

    /// Write everything buffered so far. The returned future resolves once the write has
    /// been attempted; any failure must have been sent on the session's error channel by then.
    fn flush(&self) -> FlushWait;

    /// Stop the client and release its resources. Further writes are dropped.
    fn close(&self, mode: CloseMode) -> FlushWait;
}

/// A live write client: the write handle and its asynchronous error channel.
pub struct ClientSession {
    writer: Box<dyn WriteApi>,
    errors: mpsc::Receiver<WriteError>,
}

impl ClientSession {
    /// Bundle a writer with the receiving end of its error channel
    pub fn new(writer: impl WriteApi + 'static, errors: mpsc::Receiver<WriteError>) -> Self {
        Self {
            writer: Box::new(writer),
            errors,
        }
    }

    /// The write handle
    pub fn writer(&self) -> &dyn WriteApi {
        &*self.writer
    }

    /// Wait for the next error. A closed channel is reported as [`WriteError::Closed`].
    pub async fn next_error(&mut self) -> WriteError {
        self.errors.recv().await.unwrap_or(WriteError::Closed)
    }

    /// Take an error if one is already waiting.
    pub fn try_next_error(&mut self) -> Option<WriteError> {
        match self.errors.try_recv() {
            Ok(err) => Some(err),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => Some(WriteError::Closed),
        }
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession").finish_non_exhaustive()
    }
}

/// Builds write clients. Called once when the reporter starts and again after every error.
pub trait MakeClient: Send + Sync + 'static {
    /// Build a client for `params`. Must not block on network I/O.
    fn make_client(&self, params: &ConnectionParams) -> Result<ClientSession, ClientError>;
}

impl<F> MakeClient for F
where
    F: Fn(&ConnectionParams) -> Result<ClientSession, ClientError> + Send + Sync + 'static,
{
    fn make_client(&self, params: &ConnectionParams) -> Result<ClientSession, ClientError> {
        self(params)
    }
}
