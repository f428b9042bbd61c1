use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The payload could not be decoded in the feed's format.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A row violated one of the row invariants while being restored.
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Fallback write failed: {0}")]
    Fallback(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<prost::DecodeError> for AppError {
    fn from(e: prost::DecodeError) -> Self {
        AppError::Decode(e.to_string())
    }
}

impl From<feed_rs::parser::ParseFeedError> for AppError {
    fn from(e: feed_rs::parser::ParseFeedError) -> Self {
        AppError::Decode(e.to_string())
    }
}

impl AppError {
    pub fn is_config(&self) -> bool {
        matches!(self, AppError::Config(_) | AppError::Toml(_))
    }
}
