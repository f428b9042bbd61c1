use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::db::Repository;
use crate::models::FeedContentsRow;

use super::fallback::FallbackWriter;
use super::metrics::ArchiverMetrics;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub batches: usize,
    pub rows_written: usize,
    pub rows_fallback: usize,
    pub rows_dropped: usize,
}

/// Owns the store. Rows arrive over a channel and are appended in batches.
pub struct ArchiveWriter {
    repository: Repository,
    fallback: FallbackWriter,
    metrics: Arc<ArchiverMetrics>,
    batch_size: usize,
    flush_interval: Duration,
    stats: WriterStats,
}

impl ArchiveWriter {
    pub fn new(
        repository: Repository,
        fallback: FallbackWriter,
        metrics: Arc<ArchiverMetrics>,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            repository,
            fallback,
            metrics,
            batch_size: batch_size.max(1),
            flush_interval,
            stats: WriterStats::default(),
        }
    }

    /// Starts the writer task. It drains and flushes once every sender is dropped.
    pub fn spawn(self, capacity: usize) -> (mpsc::Sender<FeedContentsRow>, JoinHandle<WriterStats>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(self.run(rx));
        (tx, handle)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<FeedContentsRow>) -> WriterStats {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        let mut batch = Vec::with_capacity(self.batch_size);
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(row) => {
                        batch.push(row);
                        if batch.len() >= self.batch_size {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                    }
                }
            }
        }

        if !batch.is_empty() {
            self.flush(&mut batch).await;
        }
        tracing::info!(
            batches = self.stats.batches,
            written = self.stats.rows_written,
            fallback = self.stats.rows_fallback,
            dropped = self.stats.rows_dropped,
            "Writer stopped"
        );
        self.stats
    }

    async fn flush(&mut self, batch: &mut Vec<FeedContentsRow>) {
        let rows = Arc::new(std::mem::replace(batch, Vec::with_capacity(self.batch_size)));
        self.stats.batches += 1;

        match self.repository.insert_rows(Arc::clone(&rows)).await {
            Ok(written) => {
                tracing::debug!("Appended {} rows", written);
                self.stats.rows_written += written;
            }
            Err(e) => {
                tracing::error!("Store rejected batch of {} rows: {}", rows.len(), e);
                let count = rows.len();
                let fallback = self.fallback.clone();
                let metrics = Arc::clone(&self.metrics);
                match tokio::task::spawn_blocking(move || spill(&fallback, &rows, &metrics)).await {
                    Ok(spilled) => {
                        self.stats.rows_fallback += spilled.archived;
                        self.stats.rows_dropped += spilled.dropped;
                    }
                    Err(e) => {
                        tracing::error!("Fallback task failed, {} rows lost: {}", count, e);
                        self.stats.rows_dropped += count;
                    }
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct Spilled {
    archived: usize,
    dropped: usize,
}

/// Writes each row to the fallback store. Blocking file I/O.
fn spill(fallback: &FallbackWriter, rows: &[FeedContentsRow], metrics: &ArchiverMetrics) -> Spilled {
    let mut spilled = Spilled::default();
    for row in rows {
        match fallback.write(row) {
            Ok(Some(_)) => {
                metrics.fallback_archived(row.producer(), row.feed());
                spilled.archived += 1;
            }
            Ok(None) => {
                metrics.row_dropped(row.producer(), row.feed());
                spilled.dropped += 1;
            }
            Err(e) => {
                tracing::error!(
                    producer = row.producer(),
                    feed = row.feed(),
                    "Fallback write failed: {}",
                    e
                );
                metrics.row_dropped(row.producer(), row.feed());
                spilled.dropped += 1;
            }
        }
    }
    spilled
}
