// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    WriteError,
    backoff::{Backoff, ReconnectPolicy},
    client::{ClientSession, CloseMode, ConnectionParams, MakeClient},
    metric::Metric,
    point::TagSet,
    registry::Registry,
    time::TimeSource,
    transcribe::transcribe,
};
#[cfg(feature = "http-client")]
use crate::{
    client::{HttpClientFactory, WriteOptions},
    config::ReporterConfig,
};

const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// A handle to a running reporter.
///
/// The reporter wakes up every interval, snapshots every metric of its registry, writes one
/// point per metric and flushes. Whenever the write client reports an error, the client is
/// closed and rebuilt after a backoff delay.
///
/// Shutdown only occurs when called explicitly (via the [`shutdown`] function). Dropping the
/// `Reporter` leaves the reporter running.
///
/// This may be freely cloned.
///
/// # Examples
///
/// ```no_run
/// use std::{sync::Arc, time::Duration};
/// use influx_reporter::{Metric, MetricRegistry, Reporter, StandardGauge};
///
/// # #[tokio::main]
/// # async fn main() {
/// let registry = MetricRegistry::new();
/// let connections = Arc::new(StandardGauge::new());
/// registry.register("connections", Metric::Gauge(connections.clone()));
///
/// let reporter = Reporter::start(
///     registry,
///     Duration::from_secs(10),
///     "http://localhost:8086",
///     "my-token",
///     "my-org",
///     "my-bucket",
/// );
/// connections.update(12);
/// // ...
/// reporter.shutdown().await;
/// # }
/// ```
///
/// **Note: It is impossible to spawn a `Reporter` without a registry and a destination:**
/// ```compile_fail
/// use influx_reporter::Reporter;
/// let reporter = Reporter::builder().spawn();
/// ```
///
/// [`shutdown`]: Reporter::shutdown
#[derive(Debug, Clone)]
pub struct Reporter {
    tasks: TaskTracker,
    cancellation_token: CancellationToken,
    stats: Arc<ReporterStats>,
}

impl Reporter {
    /// Start reporting the metrics of `registry` every `interval` to the InfluxDB at `url`.
    ///
    /// Nothing is validated: a bad URL or token shows up as write errors, which the reporter
    /// handles by reconnecting. Must be called within a tokio runtime.
    ///
    /// # Panics
    /// If `interval` is zero.
    #[cfg(feature = "http-client")]
    pub fn start(
        registry: impl Registry + 'static,
        interval: Duration,
        url: impl Into<String>,
        token: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self::start_with_tags(registry, interval, url, token, org, bucket, TagSet::new())
    }

    /// Like [`start`](Self::start), attaching `tags` to every point.
    #[cfg(feature = "http-client")]
    pub fn start_with_tags(
        registry: impl Registry + 'static,
        interval: Duration,
        url: impl Into<String>,
        token: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
        tags: TagSet,
    ) -> Self {
        Self::builder()
            .registry(registry)
            .connection(ConnectionParams::new(url, token, org, bucket))
            .interval(interval)
            .tags(tags)
            .spawn()
    }

    /// Start a reporter for `registry` as described by `config`.
    #[cfg(feature = "http-client")]
    pub fn from_config(registry: impl Registry + 'static, config: &ReporterConfig) -> Self {
        Self::builder()
            .registry(registry)
            .connection_with_options(config.connection_params(), config.write_options())
            .interval(config.interval())
            .tags(config.tags.clone())
            .reconnect_policy(config.reconnect_policy())
            .spawn()
    }

    /// Creates a [builder](ReporterBuilder) for [`Reporter`]
    pub fn builder() -> ReporterBuilder {
        ReporterBuilder::new()
    }

    /// Stops the reporter, flushing and closing its write client, and waits for that to complete.
    ///
    /// No report pass runs after shutdown starts.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        self.tasks.wait().await
    }

    /// Counters describing what the reporter has done so far
    pub fn stats(&self) -> &ReporterStats {
        &self.stats
    }
}

/// What a reporter has done since it started. All counters only go up.
#[derive(Debug, Default)]
pub struct ReporterStats {
    passes: AtomicU64,
    points_written: AtomicU64,
    unsupported_metrics: AtomicU64,
    write_errors: AtomicU64,
    reconnects: AtomicU64,
    failed_reconnects: AtomicU64,
    throttled_reconnects: AtomicU64,
}

impl ReporterStats {
    /// Report passes run. Ticks without a write client don't count.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Points handed to write clients
    pub fn points_written(&self) -> u64 {
        self.points_written.load(Ordering::Relaxed)
    }

    /// Times a metric was skipped because its kind can't be exported
    pub fn unsupported_metrics(&self) -> u64 {
        self.unsupported_metrics.load(Ordering::Relaxed)
    }

    /// Errors reported by write clients
    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    /// Client rebuilds attempted
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Client rebuilds that failed
    pub fn failed_reconnects(&self) -> u64 {
        self.failed_reconnects.load(Ordering::Relaxed)
    }

    /// Client rebuilds pushed back by the reconnect window
    pub fn throttled_reconnects(&self) -> u64 {
        self.throttled_reconnects.load(Ordering::Relaxed)
    }

    fn incr(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

type UnsupportedMetricHook = Arc<dyn Fn(&str, &Metric) + Send + Sync>;

/// Marker type to ensure that a registry is always set.
///
/// You cannot spawn a [`Reporter`] without providing a registry.
#[derive(Default, Debug)]
#[non_exhaustive]
pub struct YouMustConfigureARegistry;

/// Marker type to ensure that a destination is always set.
///
/// You cannot spawn a [`Reporter`] without providing connection parameters.
#[derive(Default, Debug)]
#[non_exhaustive]
pub struct YouMustConfigureADestination;

/// A configured destination: where to write, and how to build clients that write there.
pub struct Destination {
    params: ConnectionParams,
    factory: Arc<dyn MakeClient>,
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Reporter`]
///
/// [`Reporter`] must be spawned within the context of a Tokio runtime.
pub struct ReporterBuilder<R = YouMustConfigureARegistry, D = YouMustConfigureADestination> {
    // `spawn` only exists once both of these are configured
    registry: R,
    destination: D,
    interval: Duration,
    tags: TagSet,
    reconnect_policy: ReconnectPolicy,
    time_source: TimeSource,
    on_unsupported_metric: Option<UnsupportedMetricHook>,
}

impl<R, D: fmt::Debug> fmt::Debug for ReporterBuilder<R, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReporterBuilder")
            .field("destination", &self.destination)
            .field("interval", &self.interval)
            .field("tags", &self.tags)
            .field("reconnect_policy", &self.reconnect_policy)
            .finish_non_exhaustive()
    }
}

impl Default for ReporterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReporterBuilder {
    /// Initialize the builder.
    ///
    /// You must call [Self::registry] and one of the functions that configures a destination
    /// to actually use it.
    pub fn new() -> Self {
        Self {
            registry: YouMustConfigureARegistry,
            destination: YouMustConfigureADestination,
            interval: DEFAULT_REPORT_INTERVAL,
            tags: TagSet::new(),
            reconnect_policy: ReconnectPolicy::default(),
            time_source: TimeSource::default(),
            on_unsupported_metric: None,
        }
    }
}

impl<R, D> ReporterBuilder<R, D> {
    fn map<R2, D2>(self, f: impl FnOnce(R, D) -> (R2, D2)) -> ReporterBuilder<R2, D2> {
        let (registry, destination) = f(self.registry, self.destination);
        ReporterBuilder {
            registry,
            destination,
            interval: self.interval,
            tags: self.tags,
            reconnect_policy: self.reconnect_policy,
            time_source: self.time_source,
            on_unsupported_metric: self.on_unsupported_metric,
        }
    }

    /// Change the report interval
    ///
    /// This value defaults to 60 seconds.
    ///
    /// # Panics
    /// If `interval` is zero.
    #[track_caller]
    pub fn interval(mut self, interval: Duration) -> Self {
        assert!(!interval.is_zero(), "report interval must not be zero");
        self.interval = interval;
        self
    }

    /// Replace the tags attached to every point
    pub fn tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    /// Add one tag attached to every point
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Change how fast the reporter reconnects after write errors
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    /// Read point timestamps from `time_source` instead of the system clock
    pub fn time_source(mut self, time_source: TimeSource) -> Self {
        self.time_source = time_source;
        self
    }

    /// Call `hook` with every metric skipped because its kind can't be exported.
    ///
    /// The hook runs on the reporter task in the middle of a pass, so it should be quick.
    pub fn on_unsupported_metric(
        mut self,
        hook: impl Fn(&str, &Metric) + Send + Sync + 'static,
    ) -> Self {
        self.on_unsupported_metric = Some(Arc::new(hook));
        self
    }
}

impl<D> ReporterBuilder<YouMustConfigureARegistry, D> {
    /// Report the metrics of `registry`
    pub fn registry(
        self,
        registry: impl Registry + 'static,
    ) -> ReporterBuilder<Arc<dyn Registry>, D> {
        self.map(|_, destination| (Arc::new(registry) as Arc<dyn Registry>, destination))
    }
}

impl<R> ReporterBuilder<R, YouMustConfigureADestination> {
    /// Write to the InfluxDB described by `params` with the bundled HTTP client
    #[cfg(feature = "http-client")]
    pub fn connection(self, params: ConnectionParams) -> ReporterBuilder<R, Destination> {
        self.connection_with_options(params, WriteOptions::default())
    }

    /// Like [`connection`](Self::connection), with tuned client options
    #[cfg(feature = "http-client")]
    pub fn connection_with_options(
        self,
        params: ConnectionParams,
        options: WriteOptions,
    ) -> ReporterBuilder<R, Destination> {
        self.client_factory(params, HttpClientFactory::new(options))
    }

    /// Write to `params` with clients built by `factory`.
    ///
    /// For testing, use [`test_client`](crate::test_util::test_client).
    pub fn client_factory(
        self,
        params: ConnectionParams,
        factory: impl MakeClient,
    ) -> ReporterBuilder<R, Destination> {
        self.map(|registry, _| {
            (
                registry,
                Destination {
                    params,
                    factory: Arc::new(factory),
                },
            )
        })
    }
}

impl ReporterBuilder<Arc<dyn Registry>, Destination> {
    /// Build the first write client and start reporting.
    ///
    /// A failure to build the client is logged and retried like any reconnect.
    pub fn spawn(self) -> Reporter {
        let tracker = TaskTracker::new();
        let cancellation = CancellationToken::new();
        let stats = Arc::new(ReporterStats::default());

        let Destination { params, factory } = self.destination;
        tracing::info!(
            url = %params.url,
            org = %params.org,
            bucket = %params.bucket,
            interval = ?self.interval,
            "starting metrics reporter"
        );
        let mut task = ReporterTask {
            registry: self.registry,
            interval: self.interval,
            params,
            factory,
            tags: Arc::new(self.tags),
            session: None,
            backoff: Backoff::new(self.reconnect_policy),
            reconnect_at: None,
            time_source: self.time_source,
            on_unsupported_metric: self.on_unsupported_metric,
            stats: Arc::clone(&stats),
        };
        match task.factory.make_client(&task.params) {
            Ok(session) => task.session = Some(session),
            Err(err) => {
                tracing::error!(%err, "failed to build write client");
                task.schedule_reconnect();
            }
        }
        tracker.spawn(task.run(cancellation.clone()));
        tracker.close();

        Reporter {
            tasks: tracker,
            cancellation_token: cancellation,
            stats,
        }
    }
}

enum Event {
    Shutdown,
    WriteError(WriteError),
    Reconnect,
    Tick,
}

/// State of the control loop. Only ever touched from the reporter task.
struct ReporterTask {
    registry: Arc<dyn Registry>,
    interval: Duration,
    params: ConnectionParams,
    factory: Arc<dyn MakeClient>,
    tags: Arc<TagSet>,
    // at most one live client; replaced wholesale on reconnect
    session: Option<ClientSession>,
    backoff: Backoff,
    reconnect_at: Option<Instant>,
    time_source: TimeSource,
    on_unsupported_metric: Option<UnsupportedMetricHook>,
    stats: Arc<ReporterStats>,
}

impl ReporterTask {
    async fn run(mut self, shutdown: CancellationToken) {
        // the first pass runs one interval after start
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => Event::Shutdown,
                err = next_error(&mut self.session) => Event::WriteError(err),
                _ = sleep_until(self.reconnect_at) => Event::Reconnect,
                _ = ticker.tick() => Event::Tick,
            };
            match event {
                Event::Shutdown => break,
                Event::WriteError(err) => self.handle_error(err).await,
                Event::Reconnect => self.reconnect(),
                Event::Tick => self.send().await,
            }
        }

        tracing::info!("shutting down metrics reporter");
        if let Some(session) = self.session.take() {
            session.writer().close(CloseMode::Flush).await;
        }
        tracing::debug!("metrics reporter shutdown complete");
    }

    /// One report pass: a point per metric, all stamped with the same time, then a flush.
    async fn send(&mut self) {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!("no write client, skipping report pass");
            return;
        };
        let now = self.time_source.system_time();
        let writer = session.writer();
        let tags = &self.tags;
        let stats = &self.stats;
        let hook = self.on_unsupported_metric.as_deref();
        let mut written = 0u64;
        self.registry.each(&mut |name, metric| {
            match transcribe(name, metric, tags, now) {
                Some(point) => {
                    writer.write_point(point);
                    written += 1;
                }
                None => {
                    tracing::debug!(name, kind = metric.kind(), "skipping unsupported metric");
                    ReporterStats::incr(&stats.unsupported_metrics, 1);
                    if let Some(hook) = hook {
                        hook(name, metric);
                    }
                }
            }
        });
        writer.flush().await;
        ReporterStats::incr(&self.stats.passes, 1);
        ReporterStats::incr(&self.stats.points_written, written);
        tracing::trace!(points = written, "report pass complete");

        match session.try_next_error() {
            Some(err) => self.handle_error(err).await,
            None => self.backoff.reset(),
        }
    }

    async fn handle_error(&mut self, err: WriteError) {
        ReporterStats::incr(&self.stats.write_errors, 1);
        tracing::warn!(%err, "write client reported an error, reconnecting");
        if let Some(session) = self.session.take() {
            session.writer().close(CloseMode::Discard).await;
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let next = self.backoff.next_attempt(Instant::now());
        if next.throttled {
            ReporterStats::incr(&self.stats.throttled_reconnects, 1);
            let policy = self.backoff.policy();
            tracing::error!(
                max_attempts = policy.max_attempts,
                window = ?policy.window,
                delay = ?next.delay,
                "reconnect limit reached, the database looks persistently unavailable"
            );
        } else {
            tracing::warn!(delay = ?next.delay, "scheduling write client rebuild");
        }
        self.reconnect_at = Some(Instant::now() + next.delay);
    }

    fn reconnect(&mut self) {
        self.reconnect_at = None;
        ReporterStats::incr(&self.stats.reconnects, 1);
        match self.factory.make_client(&self.params) {
            Ok(session) => {
                tracing::info!(url = %self.params.url, "write client rebuilt");
                self.session = Some(session);
            }
            Err(err) => {
                ReporterStats::incr(&self.stats.failed_reconnects, 1);
                tracing::error!(%err, "failed to build write client");
                self.schedule_reconnect();
            }
        }
    }
}

async fn next_error(session: &mut Option<ClientSession>) -> WriteError {
    match session {
        Some(session) => session.next_error().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use assert2::check;

    use super::*;
    use crate::{
        MetricRegistry,
        metric::StandardCounter,
        test_util::{TestClient, test_client},
    };

    fn params() -> ConnectionParams {
        ConnectionParams::new("http://localhost:8086", "token", "org", "bucket")
    }

    #[tokio::test(start_paused = true)]
    async fn first_pass_after_one_interval() {
        let TestClient { inspector, factory } = test_client();
        let registry = MetricRegistry::new();
        registry.register("c", Metric::Counter(Arc::new(StandardCounter::new())));
        let reporter = Reporter::builder()
            .registry(registry)
            .client_factory(params(), factory)
            .interval(Duration::from_secs(30))
            .spawn();
        check!(inspector.clients_made() == 1);

        tokio::time::sleep(Duration::from_secs(29)).await;
        check!(inspector.points().is_empty());
        check!(reporter.stats().passes() == 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        check!(inspector.points().len() == 1);
        check!(inspector.flushes() == 1);
        check!(reporter.stats().passes() == 1);
        reporter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn hook_sees_unsupported_metrics() {
        let TestClient { inspector, factory } = test_client();
        let registry = MetricRegistry::new();
        registry.register("odd", Metric::Unsupported(Arc::new(42u8)));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_ = seen.clone();
        let reporter = Reporter::builder()
            .registry(registry)
            .client_factory(params(), factory)
            .interval(Duration::from_secs(1))
            .on_unsupported_metric(move |name, metric| {
                assert_eq!(name, "odd");
                assert_eq!(metric.kind(), "unsupported");
                seen_.fetch_add(1, Ordering::Relaxed);
            })
            .spawn();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        check!(seen.load(Ordering::Relaxed) == 2);
        check!(reporter.stats().unsupported_metrics() == 2);
        check!(inspector.points().is_empty());
        // a pass without points still flushes
        check!(inspector.flushes() == 2);
        reporter.shutdown().await;
    }

    #[test]
    #[should_panic(expected = "report interval must not be zero")]
    fn zero_interval_panics() {
        let _ = Reporter::builder().interval(Duration::ZERO);
    }
}
