// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crossbeam_queue::ArrayQueue;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use tokio::{
    sync::{Notify, mpsc, oneshot},
    time::MissedTickBehavior,
};
use url::Url;

use super::{
    ClientSession, CloseMode, ConnectionParams, FlushWait, MakeClient, Precision, WriteApi,
    WriteOptions,
};
use crate::{WriteError, error::ClientError, point::Point, rate_limit::rate_limited};

// Only the first error matters to the reporter, which replaces the client on it.
const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Builds [`HttpWriteApi`] clients for the InfluxDB v2 write API.
///
/// This is the factory used by [`Reporter::start`](crate::Reporter::start).
#[derive(Debug, Clone, Default)]
pub struct HttpClientFactory {
    options: WriteOptions,
}

impl HttpClientFactory {
    /// Create a factory that builds clients with `options`
    pub fn new(options: WriteOptions) -> Self {
        Self { options }
    }

    /// The options clients are built with
    pub fn options(&self) -> &WriteOptions {
        &self.options
    }
}

impl MakeClient for HttpClientFactory {
    fn make_client(&self, params: &ConnectionParams) -> Result<ClientSession, ClientError> {
        let (writer, errors) = HttpWriteApi::spawn(params, self.options.clone())?;
        Ok(ClientSession::new(writer, errors))
    }
}

/// Non-blocking line-protocol writer.
///
/// Points are pushed into a bounded ring buffer (the oldest points are dropped when it is
/// full) and written by a background task, either when a batch fills up, every
/// [`WriteOptions::flush_interval`], or on [`flush`](WriteApi::flush). Transient failures are
/// retried with exponential backoff; anything still failing is reported on the error channel.
///
/// Dropping the handle stops the background task after it writes what is left.
#[derive(Debug)]
pub struct HttpWriteApi {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

#[derive(Debug)]
struct Shared {
    // ring buffer semantics: on overflow we'd rather lose the oldest points than the newest
    queue: ArrayQueue<Point>,
    batch_size: usize,
    // wakes the writer when a batch is full
    batch_ready: Notify,
    closed: AtomicBool,
}

#[derive(Debug)]
enum Command {
    Flush(oneshot::Sender<()>),
    Close(CloseMode, oneshot::Sender<()>),
}

impl HttpWriteApi {
    /// Start a writer for `params`, returning it with the receiving end of its error channel.
    ///
    /// The endpoint is not checked here: an unusable URL is reported as
    /// [`WriteError::InvalidEndpoint`] on the first write. Must be called from within a tokio
    /// runtime.
    ///
    /// Fails with [`ClientError::Other`] when `batch_size`, `queue_capacity` or
    /// `flush_interval` is zero.
    pub fn spawn(
        params: &ConnectionParams,
        options: WriteOptions,
    ) -> Result<(Self, mpsc::Receiver<WriteError>), ClientError> {
        if options.batch_size == 0 {
            return Err(ClientError::Other("batch_size must not be zero".into()));
        }
        if options.queue_capacity == 0 {
            return Err(ClientError::Other("queue_capacity must not be zero".into()));
        }
        if options.flush_interval.is_zero() {
            return Err(ClientError::Other("flush_interval must not be zero".into()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ClientError::Other(format!("write client needs a tokio runtime: {e}")))?;

        let http = reqwest::Client::builder().timeout(options.timeout).build()?;
        let retry_policy =
            ExponentialBackoff::builder().build_with_max_retries(options.max_retries);
        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        let shared = Arc::new(Shared {
            queue: ArrayQueue::new(options.queue_capacity),
            batch_size: options.batch_size,
            batch_ready: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let (error_sender, errors) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let (commands, command_receiver) = mpsc::unbounded_channel();

        let writer = Writer {
            client,
            endpoint: write_endpoint(params, options.precision),
            raw_url: params.url.clone(),
            authorization: format!("Token {}", params.token),
            precision: options.precision,
            shared: Arc::clone(&shared),
            errors: error_sender,
        };
        tracing::debug!(
            url = %params.url,
            org = %params.org,
            bucket = %params.bucket,
            "starting write client"
        );
        runtime.spawn(writer.run(command_receiver, options.flush_interval));

        Ok((Self { shared, commands }, errors))
    }

    fn request(&self, command: impl FnOnce(oneshot::Sender<()>) -> Command) -> FlushWait {
        let (done, wait) = oneshot::channel();
        if self.commands.send(command(done)).is_err() {
            // writer is already gone, nothing left to wait for
            return FlushWait::ready();
        }
        FlushWait::from_future(async move {
            let _ = wait.await;
        })
    }
}

impl WriteApi for HttpWriteApi {
    fn write_point(&self, point: Point) {
        if self.shared.closed.load(Ordering::Relaxed) {
            return;
        }
        if self.shared.queue.force_push(point).is_some() {
            rate_limited!(
                Duration::from_secs(10),
                tracing::warn!("write client has fallen behind, dropping the oldest points")
            );
        }
        if self.shared.queue.len() >= self.shared.batch_size {
            self.shared.batch_ready.notify_one();
        }
    }

    fn flush(&self) -> FlushWait {
        self.request(Command::Flush)
    }

    fn close(&self, mode: CloseMode) -> FlushWait {
        self.shared.closed.store(true, Ordering::Relaxed);
        self.request(|done| Command::Close(mode, done))
    }
}

/// Background half of [`HttpWriteApi`].
struct Writer {
    client: ClientWithMiddleware,
    endpoint: Result<Url, url::ParseError>,
    raw_url: String,
    authorization: String,
    precision: Precision,
    shared: Arc<Shared>,
    errors: mpsc::Sender<WriteError>,
}

impl Writer {
    async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>, flush_interval: Duration) {
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + flush_interval, flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Flush(done)) => {
                        self.write_all().await;
                        let _ = done.send(());
                    }
                    Some(Command::Close(mode, done)) => {
                        match mode {
                            CloseMode::Flush => self.write_all().await,
                            CloseMode::Discard => self.discard(),
                        }
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        // every handle was dropped
                        self.write_all().await;
                        break;
                    }
                },
                _ = self.shared.batch_ready.notified() => {
                    while self.shared.queue.len() >= self.shared.batch_size {
                        self.write_batch().await;
                    }
                }
                _ = ticker.tick() => self.write_all().await,
            }
        }
        tracing::debug!(url = %self.raw_url, "write client stopped");
    }

    async fn write_all(&self) {
        while !self.shared.queue.is_empty() {
            self.write_batch().await;
        }
    }

    fn discard(&self) {
        let mut dropped = 0usize;
        while self.shared.queue.pop().is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(dropped, "discarded buffered points");
        }
    }

    async fn write_batch(&self) {
        let mut body = String::new();
        let mut lines = 0usize;
        for _ in 0..self.shared.batch_size {
            let Some(point) = self.shared.queue.pop() else {
                break;
            };
            if point.write_line(self.precision, &mut body) {
                lines += 1;
            }
        }
        if lines == 0 {
            return;
        }
        match self.post(body).await {
            Ok(()) => tracing::trace!(lines, "wrote batch"),
            Err(err) => {
                rate_limited!(
                    Duration::from_secs(10),
                    tracing::warn!(%err, lines, "failed to write batch")
                );
                // a full channel already holds an error the reporter has yet to see
                let _ = self.errors.try_send(err);
            }
        }
    }

    async fn post(&self, body: String) -> Result<(), WriteError> {
        let url = match &self.endpoint {
            Ok(url) => url.clone(),
            Err(source) => {
                return Err(WriteError::InvalidEndpoint {
                    url: self.raw_url.clone(),
                    source: *source,
                });
            }
        };
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.authorization.as_str())
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(WriteError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

fn write_endpoint(
    params: &ConnectionParams,
    precision: Precision,
) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&params.url)?;
    url.path_segments_mut()
        .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend(["api", "v2", "write"]);
    url.query_pairs_mut()
        .append_pair("org", &params.org)
        .append_pair("bucket", &params.bucket)
        .append_pair("precision", precision.as_str());
    Ok(url)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(
        "http://localhost:8086",
        "http://localhost:8086/api/v2/write?org=o&bucket=b&precision=ns"
    )]
    #[case(
        "http://localhost:8086/",
        "http://localhost:8086/api/v2/write?org=o&bucket=b&precision=ns"
    )]
    #[case(
        "https://db.example/influx/",
        "https://db.example/influx/api/v2/write?org=o&bucket=b&precision=ns"
    )]
    fn endpoint(#[case] base: &str, #[case] expected: &str) {
        let params = ConnectionParams::new(base, "t", "o", "b");
        assert_eq!(
            write_endpoint(&params, Precision::Ns).unwrap().as_str(),
            expected
        );
    }

    #[test]
    fn query_values_are_encoded() {
        let params = ConnectionParams::new("http://h", "t", "my org", "a&b");
        assert_eq!(
            write_endpoint(&params, Precision::S).unwrap().as_str(),
            "http://h/api/v2/write?org=my+org&bucket=a%26b&precision=s"
        );
    }

    #[test]
    fn unparseable_endpoint() {
        let params = ConnectionParams::new("not a url", "t", "o", "b");
        assert!(write_endpoint(&params, Precision::Ns).is_err());
        let params = ConnectionParams::new("mailto:someone@example.com", "t", "o", "b");
        assert!(write_endpoint(&params, Precision::Ns).is_err());
    }

    #[test]
    fn needs_a_runtime() {
        let params = ConnectionParams::new("http://localhost:8086", "t", "o", "b");
        let err = HttpClientFactory::default().make_client(&params).unwrap_err();
        assert!(matches!(err, ClientError::Other(_)));
    }

    #[tokio::test]
    async fn zero_options_are_an_error() {
        let params = ConnectionParams::new("http://localhost:8086", "t", "o", "b");
        let unusable = [
            WriteOptions {
                batch_size: 0,
                ..WriteOptions::default()
            },
            WriteOptions {
                queue_capacity: 0,
                ..WriteOptions::default()
            },
            WriteOptions {
                flush_interval: Duration::ZERO,
                ..WriteOptions::default()
            },
        ];
        for options in unusable {
            let err = HttpClientFactory::new(options).make_client(&params).unwrap_err();
            assert!(matches!(err, ClientError::Other(ref msg) if msg.contains("must not be zero")));
        }
    }
}
