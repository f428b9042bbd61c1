use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::config::{Config, FeedConfig};
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::{classify, BodyPolicy, CacheValidators, FeedFetcher};
use crate::models::{FeedContentsRow, FetchAttempt, FetchStatus};
use crate::services::{
    start_metrics_server, ArchiveWriter, ArchiverMetrics, Backoff, FallbackWriter,
    FetchObservation, WriterStats,
};

/// Feeds fetched at the same time in one-shot mode.
const ONE_SHOT_CONCURRENCY: usize = 8;

/// Schedules every configured feed and routes the resulting rows to the writer.
pub struct Archiver {
    config: Arc<Config>,
    fetcher: Arc<FeedFetcher>,
    metrics: Arc<ArchiverMetrics>,
}

impl Archiver {
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = FeedFetcher::new(config.call_timeout(), config.operator_contact.as_deref())?;
        Ok(Self {
            config: Arc::new(config),
            fetcher: Arc::new(fetcher),
            metrics: Arc::new(ArchiverMetrics::new()?),
        })
    }

    /// Fetches every feed once, flushes the rows and returns.
    pub async fn run_one_shot(&self) -> Result<WriterStats> {
        let (rows, writer) = self.start_writer().await?;
        tracing::info!("Fetching {} feeds once", self.config.feeds.len());

        let statuses: Vec<FetchStatus> = stream::iter(self.config.feeds.iter())
            .map(|feed| {
                let mut task = self.feed_task(feed, rows.clone());
                let span = feed_span(feed);
                async move { task.execute().await.status }.instrument(span)
            })
            .buffer_unordered(ONE_SHOT_CONCURRENCY)
            .collect()
            .await;

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for status in statuses {
            *counts.entry(status.to_string()).or_default() += 1;
        }
        tracing::info!("Fetch results: {:?}", counts);

        drop(rows);
        join_writer(writer).await
    }

    /// Runs every feed on its schedule until `shutdown` flips to true, then
    /// drains the writer.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<WriterStats> {
        let metrics = &self.config.metrics;
        if metrics.enabled {
            start_metrics_server(Arc::clone(&self.metrics), &metrics.hostname, metrics.port).await?;
        }

        let (rows, writer) = self.start_writer().await?;
        tracing::info!("Archiving {} feeds", self.config.feeds.len());

        let mut tasks = JoinSet::new();
        for feed in &self.config.feeds {
            let task = self.feed_task(feed, rows.clone());
            let interval = self.config.fetch_interval_for(feed);
            tasks.spawn(
                task.run_scheduled(interval, shutdown.clone())
                    .instrument(feed_span(feed)),
            );
        }
        drop(rows);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Feed task ended abnormally: {}", e);
            }
        }

        tracing::info!("All feed tasks stopped, draining writer");
        join_writer(writer).await
    }

    async fn start_writer(&self) -> Result<(mpsc::Sender<FeedContentsRow>, JoinHandle<WriterStats>)> {
        let db_path = &self.config.database.path;
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let repository = Repository::new(db_path).await?;
        let fallback = FallbackWriter::from_config(&self.config.fallback)?;
        tracing::info!(
            "Archiving to {} ({} rows so far)",
            db_path,
            repository.count_rows().await?
        );

        let writer = ArchiveWriter::new(
            repository,
            fallback,
            Arc::clone(&self.metrics),
            self.config.writer.batch_size,
            self.config.flush_interval(),
        );
        Ok(writer.spawn(self.config.writer.channel_capacity))
    }

    fn feed_task(&self, feed: &FeedConfig, rows: mpsc::Sender<FeedContentsRow>) -> FeedTask {
        FeedTask {
            feed: feed.clone(),
            policy: BodyPolicy {
                store_on_error: self.config.store_body_on_error_for(feed),
            },
            extensions: feed.extension_names(),
            validators: CacheValidators::default(),
            backoff: Backoff::new(&self.config.failure_response),
            fetcher: Arc::clone(&self.fetcher),
            metrics: Arc::clone(&self.metrics),
            rows,
        }
    }
}

fn feed_span(feed: &FeedConfig) -> tracing::Span {
    tracing::info_span!("feed", producer = %feed.producer, feed = %feed.feed)
}

async fn join_writer(writer: JoinHandle<WriterStats>) -> Result<WriterStats> {
    writer
        .await
        .map_err(|e| AppError::Other(anyhow::anyhow!("writer task failed: {}", e)))
}

/// Resolves once shutdown was requested or its sender went away.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// A uniformly random delay in `[0, interval / 2)`, so feeds do not all
/// fire at start-up.
fn initial_delay<R: Rng + ?Sized>(interval: Duration, rng: &mut R) -> Duration {
    let half = interval / 2;
    if half.is_zero() {
        Duration::ZERO
    } else {
        rng.gen_range(Duration::ZERO..half)
    }
}

struct Execution {
    status: FetchStatus,
    pause: Option<Duration>,
}

/// Per-feed state. Owned by exactly one task, never shared.
struct FeedTask {
    feed: FeedConfig,
    policy: BodyPolicy,
    extensions: BTreeSet<String>,
    validators: CacheValidators,
    backoff: Backoff,
    fetcher: Arc<FeedFetcher>,
    metrics: Arc<ArchiverMetrics>,
    rows: mpsc::Sender<FeedContentsRow>,
}

impl FeedTask {
    async fn run_scheduled(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let delay = initial_delay(interval, &mut rand::thread_rng());
        tracing::debug!("First fetch in {:?}, then every {:?}", delay, interval);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stopped(&mut shutdown) => return,
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stopped(&mut shutdown) => break,
            }

            let execution = match AssertUnwindSafe(self.execute()).catch_unwind().await {
                Ok(execution) => execution,
                Err(_) => self.uncaught(),
            };
            if let Some(pause) = execution.pause {
                tracing::warn!(
                    "Pausing for {:?} after {} failures",
                    pause,
                    self.backoff.failures_in_window()
                );
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = stopped(&mut shutdown) => break,
                }
                ticker.reset();
            }
        }
        tracing::debug!("Feed task stopped");
    }

    /// A panicking execution counts as a failure and the task carries on.
    fn uncaught(&mut self) -> Execution {
        tracing::error!("Uncaught panic during feed fetch");
        self.metrics.uncaught_error(&self.feed.producer, &self.feed.feed);
        let pause = self.backoff.observe_execution(Utc::now(), true);
        Execution {
            status: FetchStatus::Error,
            pause,
        }
    }

    async fn execute(&mut self) -> Execution {
        let started = Instant::now();
        let attempt = FetchAttempt::new(
            self.feed.producer.as_str(),
            self.feed.feed.as_str(),
            Utc::now(),
            self.extensions.clone(),
        );
        let fetch_time = attempt.fetch_time;

        let outcome = self.fetcher.fetch(&self.feed, &self.validators, fetch_time).await;
        let response_time = outcome.response_time();
        let response_size = outcome.body_len();
        let classification = classify(&self.feed, self.policy, attempt, &self.validators, outcome);
        let status = classification.status;

        match &classification.row {
            Some(row) if row.is_error() => tracing::warn!(
                status = %status,
                "Fetch failed: {}",
                row.error_message().unwrap_or_default()
            ),
            Some(row) => tracing::info!(
                status = %status,
                bytes = row.response_body_length().unwrap_or_default(),
                millis = row.response_time_millis().unwrap_or_default(),
                "Fetched"
            ),
            None => tracing::info!(status = %status, "Nothing new"),
        }

        if let Some(validators) = classification.validators {
            self.validators = validators;
        }
        if let Some(row) = classification.row {
            if self.rows.send(row).await.is_err() {
                tracing::error!("Writer is gone, row lost");
            }
        }

        self.metrics.observe_fetch(&FetchObservation {
            producer: &self.feed.producer,
            feed: &self.feed.feed,
            status,
            fetch_time,
            elapsed: started.elapsed(),
            response_time,
            response_size,
        });

        let pause = self
            .backoff
            .observe_execution(fetch_time, status == FetchStatus::Error);
        Execution { status, pause }
    }
}
