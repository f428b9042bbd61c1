//! Prometheus metrics for fetches and archive writes.
//!
//! Every collector lives in the archiver's own [`Registry`], so several
//! archivers (or tests) in one process never share counts. The registry is
//! rendered in the text exposition format at `/metrics`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Router};
use chrono::{DateTime, Utc};
use prometheus::{
    exponential_buckets, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tokio::net::TcpListener;

use crate::error::Result;
use crate::models::FetchStatus;

const FEED_LABELS: &[&str] = &["producer", "feed"];
const STATUS_LABELS: &[&str] = &["producer", "feed", "fetch_status"];

/// What one execution of a feed task observed.
#[derive(Debug, Clone, Copy)]
pub struct FetchObservation<'a> {
    pub producer: &'a str,
    pub feed: &'a str,
    pub status: FetchStatus,
    pub fetch_time: DateTime<Utc>,
    /// Wall time of the whole execution: request, decode and hand-off.
    pub elapsed: Duration,
    pub response_time: Option<Duration>,
    pub response_size: Option<usize>,
}

pub struct ArchiverMetrics {
    registry: Registry,
    fetch_events: IntCounterVec,
    uncaught_errors: IntCounterVec,
    fallback_archives: IntCounterVec,
    dropped_rows: IntCounterVec,
    last_fetch_time: GaugeVec,
    fetch_duration: HistogramVec,
    server_response_duration: HistogramVec,
    response_size: HistogramVec,
}

impl ArchiverMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let info = IntGaugeVec::new(
            Opts::new("transit_feed_archiver_info", "build information"),
            &["version"],
        )?;
        info.with_label_values(&[env!("CARGO_PKG_VERSION")]).set(1);
        registry.register(Box::new(info))?;

        let fetch_events = IntCounterVec::new(
            Opts::new("fetch_event_total", "number of fetch events"),
            STATUS_LABELS,
        )?;
        let uncaught_errors = IntCounterVec::new(
            Opts::new(
                "uncaught_exception_total",
                "number of feed task executions that panicked",
            ),
            FEED_LABELS,
        )?;
        let fallback_archives = IntCounterVec::new(
            Opts::new(
                "fallback_archive_count",
                "number of rows written to the fallback store",
            ),
            FEED_LABELS,
        )?;
        let dropped_rows = IntCounterVec::new(
            Opts::new(
                "dropped_row_total",
                "number of rows neither the store nor the fallback accepted",
            ),
            FEED_LABELS,
        )?;
        let last_fetch_time = GaugeVec::new(
            Opts::new("last_fetch_time", "time of the most recent fetch, in epoch seconds"),
            STATUS_LABELS,
        )?;
        let fetch_duration = HistogramVec::new(
            HistogramOpts::new(
                "overall_fetch_duration",
                "duration of the whole fetch and archive step, in seconds",
            ),
            STATUS_LABELS,
        )?;
        let server_response_duration = HistogramVec::new(
            HistogramOpts::new(
                "server_response_duration",
                "time until the server's response headers arrived, in seconds",
            ),
            STATUS_LABELS,
        )?;
        let response_size = HistogramVec::new(
            HistogramOpts::new("response_size_bytes", "size of the response body, in bytes")
                .buckets(exponential_buckets(256.0, 4.0, 10)?),
            STATUS_LABELS,
        )?;

        registry.register(Box::new(fetch_events.clone()))?;
        registry.register(Box::new(uncaught_errors.clone()))?;
        registry.register(Box::new(fallback_archives.clone()))?;
        registry.register(Box::new(dropped_rows.clone()))?;
        registry.register(Box::new(last_fetch_time.clone()))?;
        registry.register(Box::new(fetch_duration.clone()))?;
        registry.register(Box::new(server_response_duration.clone()))?;
        registry.register(Box::new(response_size.clone()))?;

        Ok(Self {
            registry,
            fetch_events,
            uncaught_errors,
            fallback_archives,
            dropped_rows,
            last_fetch_time,
            fetch_duration,
            server_response_duration,
            response_size,
        })
    }

    pub fn observe_fetch(&self, observation: &FetchObservation<'_>) {
        let status = observation.status.to_string();
        let labels = [observation.producer, observation.feed, status.as_str()];

        self.fetch_events.with_label_values(&labels).inc();
        self.last_fetch_time
            .with_label_values(&labels)
            .set(observation.fetch_time.timestamp() as f64);
        self.fetch_duration
            .with_label_values(&labels)
            .observe(observation.elapsed.as_secs_f64());

        if let Some(response_time) = observation.response_time {
            self.server_response_duration
                .with_label_values(&labels)
                .observe(response_time.as_secs_f64());
        }
        if let Some(size) = observation.response_size {
            self.response_size
                .with_label_values(&labels)
                .observe(size as f64);
        }
    }

    pub fn uncaught_error(&self, producer: &str, feed: &str) {
        self.uncaught_errors.with_label_values(&[producer, feed]).inc();
    }

    pub fn fallback_archived(&self, producer: &str, feed: &str) {
        self.fallback_archives.with_label_values(&[producer, feed]).inc();
    }

    pub fn row_dropped(&self, producer: &str, feed: &str) {
        self.dropped_rows.with_label_values(&[producer, feed]).inc();
    }

    /// Renders every collector in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }
}

async fn render_metrics(State(metrics): State<Arc<ArchiverMetrics>>) -> String {
    match metrics.render() {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("Unable to render metrics: {}", e);
            String::new()
        }
    }
}

/// Binds the metrics listener and serves `/metrics` in the background.
/// Returns the bound address, which matters when `port` is 0.
pub async fn start_metrics_server(
    metrics: Arc<ArchiverMetrics>,
    hostname: &str,
    port: u16,
) -> Result<SocketAddr> {
    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics);

    let listener = TcpListener::bind((hostname, port)).await?;
    let addr = listener.local_addr()?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(addr)
}
