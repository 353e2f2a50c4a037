// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! An in-memory write client for tests.
//!
//! [`test_client`] returns a [`MakeClient`] to hand to
//! [`ReporterBuilder::client_factory`](crate::ReporterBuilder::client_factory) and an
//! [`Inspector`] that sees every client it builds, every point written, every flush and every
//! close. The inspector can also make the current client report an error, or make the next
//! builds fail, to drive the reporter's reconnect path.
//!
//! This requires that the `test-util` feature be enabled.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::{
    WriteError,
    client::{ClientSession, CloseMode, ConnectionParams, FlushWait, MakeClient, WriteApi},
    error::ClientError,
    point::Point,
};

/// A test client factory and its inspector.
///
/// This requires that the `test-util` feature be enabled.
pub struct TestClient {
    /// Inspects what the reporter did with the clients
    pub inspector: Inspector,
    /// Pass this to the reporter
    pub factory: TestClientFactory,
}

/// Create a connected [`Inspector`] and [`TestClientFactory`].
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use influx_reporter::{
///     ConnectionParams, MetricRegistry, Metric, Reporter, StandardCounter,
///     test_util::{TestClient, test_client},
/// };
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// let TestClient { inspector, factory } = test_client();
/// let registry = MetricRegistry::new();
/// let requests = Arc::new(StandardCounter::new());
/// registry.register("requests", Metric::Counter(requests.clone()));
/// requests.inc(3);
///
/// let reporter = Reporter::builder()
///     .registry(registry)
///     .client_factory(
///         ConnectionParams::new("http://localhost:8086", "", "org", "bucket"),
///         factory,
///     )
///     .interval(Duration::from_secs(10))
///     .spawn();
/// tokio::time::sleep(Duration::from_secs(11)).await;
///
/// let points = inspector.points();
/// assert_eq!(points[0].measurement(), "requests.count");
/// reporter.shutdown().await;
/// # }
/// ```
pub fn test_client() -> TestClient {
    let inspector = Inspector::default();
    TestClient {
        factory: TestClientFactory {
            inspector: inspector.clone(),
        },
        inspector,
    }
}

/// Something the reporter did with a test client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A client was built
    Built {
        /// Index of the client, in build order
        client: usize,
    },
    /// A point was written
    Write {
        /// Index of the client
        client: usize,
        /// The point
        point: Point,
    },
    /// A client was flushed
    Flush {
        /// Index of the client
        client: usize,
    },
    /// A client was closed
    Close {
        /// Index of the client
        client: usize,
        /// How
        mode: CloseMode,
    },
}

#[derive(Debug, Default)]
struct State {
    events: Vec<ClientEvent>,
    params: Vec<ConnectionParams>,
    error_senders: Vec<mpsc::Sender<WriteError>>,
    closed: Vec<bool>,
    build_attempts: usize,
    failing_builds: usize,
}

/// Records everything that happens to the clients of a [`TestClientFactory`].
///
/// Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct Inspector {
    state: Arc<Mutex<State>>,
}

impl Inspector {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every recorded event, in order
    pub fn events(&self) -> Vec<ClientEvent> {
        self.lock().events.clone()
    }

    /// Every point written to any client, in order
    pub fn points(&self) -> Vec<Point> {
        self.lock()
            .events
            .iter()
            .filter_map(|event| match event {
                ClientEvent::Write { point, .. } => Some(point.clone()),
                _ => None,
            })
            .collect()
    }

    /// Points written to the client with index `client`
    pub fn client_points(&self, client: usize) -> Vec<Point> {
        self.lock()
            .events
            .iter()
            .filter_map(|event| match event {
                ClientEvent::Write { client: c, point } if *c == client => Some(point.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of clients successfully built
    pub fn clients_made(&self) -> usize {
        self.lock().params.len()
    }

    /// Number of builds attempted, including the ones made to fail
    pub fn build_attempts(&self) -> usize {
        self.lock().build_attempts
    }

    /// Connection parameters of every client built
    pub fn params(&self) -> Vec<ConnectionParams> {
        self.lock().params.clone()
    }

    /// Number of flushes across all clients
    pub fn flushes(&self) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|event| matches!(event, ClientEvent::Flush { .. }))
            .count()
    }

    /// Every close, as `(client index, mode)`
    pub fn closes(&self) -> Vec<(usize, CloseMode)> {
        self.lock()
            .events
            .iter()
            .filter_map(|event| match event {
                ClientEvent::Close { client, mode } => Some((*client, *mode)),
                _ => None,
            })
            .collect()
    }

    /// Make the most recently built client report `error`.
    ///
    /// Returns false if there is no open client to report it.
    pub fn inject_error(&self, error: WriteError) -> bool {
        let state = self.lock();
        let Some(client) = state.error_senders.len().checked_sub(1) else {
            return false;
        };
        !state.closed[client] && state.error_senders[client].try_send(error).is_ok()
    }

    /// Make the next `count` builds fail with [`ClientError::Other`]
    pub fn fail_next_builds(&self, count: usize) {
        self.lock().failing_builds = count;
    }

    /// Forget all recorded events. Clients and injected failures are kept.
    pub fn clear_events(&self) {
        self.lock().events.clear();
    }
}

/// A [`MakeClient`] that builds in-memory clients reporting to an [`Inspector`].
///
/// This requires that the `test-util` feature be enabled.
#[derive(Debug, Clone)]
pub struct TestClientFactory {
    inspector: Inspector,
}

impl MakeClient for TestClientFactory {
    fn make_client(&self, params: &ConnectionParams) -> Result<ClientSession, ClientError> {
        let mut state = self.inspector.lock();
        state.build_attempts += 1;
        if state.failing_builds > 0 {
            state.failing_builds -= 1;
            return Err(ClientError::Other("injected build failure".to_string()));
        }
        let client = state.params.len();
        let (errors_tx, errors_rx) = mpsc::channel(16);
        state.params.push(params.clone());
        state.error_senders.push(errors_tx);
        state.closed.push(false);
        state.events.push(ClientEvent::Built { client });
        drop(state);
        Ok(ClientSession::new(
            TestWriteApi {
                inspector: self.inspector.clone(),
                client,
            },
            errors_rx,
        ))
    }
}

struct TestWriteApi {
    inspector: Inspector,
    client: usize,
}

impl WriteApi for TestWriteApi {
    fn write_point(&self, point: Point) {
        let mut state = self.inspector.lock();
        if state.closed[self.client] {
            return;
        }
        state.events.push(ClientEvent::Write {
            client: self.client,
            point,
        });
    }

    fn flush(&self) -> FlushWait {
        self.inspector.lock().events.push(ClientEvent::Flush {
            client: self.client,
        });
        FlushWait::ready()
    }

    fn close(&self, mode: CloseMode) -> FlushWait {
        let mut state = self.inspector.lock();
        state.closed[self.client] = true;
        state.events.push(ClientEvent::Close {
            client: self.client,
            mode,
        });
        FlushWait::ready()
    }
}
