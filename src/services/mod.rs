mod backoff;
mod fallback;
mod metrics;
mod writer;

pub use backoff::Backoff;
pub use fallback::FallbackWriter;
pub use metrics::{start_metrics_server, ArchiverMetrics, FetchObservation};
pub use writer::{ArchiveWriter, WriterStats};
