use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Extension, FeedFormat};

/// Feeds may not be polled more often than this.
pub const MIN_FETCH_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub fallback: FallbackConfig,

    #[serde(default)]
    pub writer: WriterConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_secs: u64,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub store_response_body_on_error: bool,

    /// Appended to the user agent so feed operators can reach us.
    pub operator_contact: Option<String>,

    #[serde(default)]
    pub failure_response: FailureResponse,

    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FallbackConfig {
    #[serde(default)]
    pub enabled: bool,
    pub base_path: Option<PathBuf>,
    #[serde(default)]
    pub compression: Compression,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriterConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Prometheus endpoint. Metrics are always collected; this only controls
/// whether `/metrics` is served.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_hostname")]
    pub hostname: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// How a feed reacts to repeated failures. See [`crate::services::Backoff`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailureResponse {
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: usize,
    #[serde(default = "default_pause_period")]
    pub pause_period_secs: u64,
    #[serde(default = "default_pause_escalation")]
    pub pause_escalation: f64,
    #[serde(default = "default_max_pause")]
    pub max_pause_secs: u64,
    #[serde(default = "default_pause_reset")]
    pub pause_reset_secs: u64,
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    #[serde(default = "default_quantum")]
    pub quantum_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedConfig {
    pub producer: String,
    pub feed: String,
    pub feed_url: String,

    #[serde(default)]
    pub format: FeedFormat,

    pub fetch_interval_secs: Option<u64>,
    pub store_response_body_on_error: Option<bool>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub query_parameters: BTreeMap<String, String>,

    pub basic_auth: Option<BasicAuth>,

    #[serde(default)]
    pub ignore_tls_errors: bool,

    #[serde(default)]
    pub extensions: BTreeSet<Extension>,

    /// Accept GTFS-rt messages that lack required fields.
    #[serde(default)]
    pub parse_partial: bool,

    /// Send If-None-Match / If-Modified-Since from the previous success.
    #[serde(default = "default_true")]
    pub conditional_requests: bool,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("transit-feed-archiver");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("archive.db").to_string_lossy().to_string()
}

fn default_fetch_interval() -> u64 {
    MIN_FETCH_INTERVAL_SECS
}

fn default_call_timeout() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval() -> u64 {
    5
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_metrics_hostname() -> String {
    "0.0.0.0".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

fn default_max_consecutive_failures() -> usize {
    5
}

fn default_pause_period() -> u64 {
    30
}

fn default_pause_escalation() -> f64 {
    1.2
}

fn default_max_pause() -> u64 {
    15 * 60
}

fn default_pause_reset() -> u64 {
    60 * 60
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_quantum() -> u64 {
    15
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hostname: default_metrics_hostname(),
            port: default_metrics_port(),
        }
    }
}

impl Default for FailureResponse {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_consecutive_failures(),
            pause_period_secs: default_pause_period(),
            pause_escalation: default_pause_escalation(),
            max_pause_secs: default_max_pause(),
            pause_reset_secs: default_pause_reset(),
            jitter_factor: default_jitter_factor(),
            quantum_secs: default_quantum(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AppError::Config(format!(
                "configuration file {} does not exist",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("transit-feed-archiver")
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.feeds.is_empty() {
            return Err(AppError::Config("no feeds are configured".into()));
        }
        check_interval("fetch_interval_secs", self.fetch_interval_secs)?;
        if self.call_timeout_secs == 0 {
            return Err(AppError::Config("call_timeout_secs must be positive".into()));
        }
        if self.writer.batch_size == 0 || self.writer.channel_capacity == 0 {
            return Err(AppError::Config(
                "writer batch_size and channel_capacity must be positive".into(),
            ));
        }
        if self.writer.flush_interval_secs == 0 {
            return Err(AppError::Config("writer flush_interval_secs must be positive".into()));
        }
        if self.fallback.enabled && self.fallback.base_path.is_none() {
            return Err(AppError::Config(
                "fallback is enabled but fallback.base_path is not set".into(),
            ));
        }
        if self.metrics.enabled && self.metrics.hostname.trim().is_empty() {
            return Err(AppError::Config("metrics.hostname must not be empty".into()));
        }
        self.failure_response.validate()?;

        let mut seen: HashMap<(&str, &str), usize> = HashMap::new();
        for feed in &self.feeds {
            feed.validate()?;
            *seen.entry((feed.producer.as_str(), feed.feed.as_str())).or_default() += 1;
        }
        let mut duplicates: Vec<String> = seen
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|((producer, feed), _)| format!("{} {}", producer, feed))
            .collect();
        if !duplicates.is_empty() {
            duplicates.sort();
            return Err(AppError::Config(format!(
                "feeds defined more than once; feed names must be unique: {}",
                duplicates.join(", ")
            )));
        }

        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.writer.flush_interval_secs)
    }

    pub fn fetch_interval_for(&self, feed: &FeedConfig) -> Duration {
        Duration::from_secs(feed.fetch_interval_secs.unwrap_or(self.fetch_interval_secs))
    }

    pub fn store_body_on_error_for(&self, feed: &FeedConfig) -> bool {
        feed.store_response_body_on_error
            .unwrap_or(self.store_response_body_on_error)
    }
}

impl FailureResponse {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(AppError::Config(format!(
                "failure_response.jitter_factor must be within [0, 1], got {}",
                self.jitter_factor
            )));
        }
        if self.pause_escalation < 1.0 {
            return Err(AppError::Config(
                "failure_response.pause_escalation must be at least 1".into(),
            ));
        }
        if self.quantum_secs == 0 {
            return Err(AppError::Config("failure_response.quantum_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn pause_period(&self) -> Duration {
        Duration::from_secs(self.pause_period_secs)
    }

    pub fn max_pause(&self) -> Duration {
        Duration::from_secs(self.max_pause_secs)
    }

    pub fn pause_reset(&self) -> Duration {
        Duration::from_secs(self.pause_reset_secs)
    }

    pub fn quantum(&self) -> Duration {
        Duration::from_secs(self.quantum_secs)
    }
}

impl FeedConfig {
    fn validate(&self) -> Result<()> {
        let key = format!("{} {}", self.producer, self.feed);
        if self.producer.trim().is_empty() || self.feed.trim().is_empty() {
            return Err(AppError::Config("feed producer and name must not be empty".into()));
        }
        let url = Url::parse(&self.feed_url)
            .map_err(|e| AppError::Config(format!("feed {}: invalid feed_url: {}", key, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Config(format!(
                "feed {}: feed_url must use http or https",
                key
            )));
        }
        if let Some(interval) = self.fetch_interval_secs {
            check_interval(&format!("feed {}: fetch_interval_secs", key), interval)?;
        }
        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| AppError::Config(format!("feed {}: invalid header name '{}'", key, name)))?;
            HeaderValue::from_str(value)
                .map_err(|_| AppError::Config(format!("feed {}: invalid value for header '{}'", key, name)))?;
        }
        Ok(())
    }

    pub fn extension_names(&self) -> BTreeSet<String> {
        self.extensions.iter().map(|e| e.name().to_string()).collect()
    }
}

fn check_interval(what: &str, secs: u64) -> Result<()> {
    if secs < MIN_FETCH_INTERVAL_SECS {
        return Err(AppError::Config(format!(
            "{} must be at least {} seconds, got {}",
            what, MIN_FETCH_INTERVAL_SECS, secs
        )));
    }
    Ok(())
}
