use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;

use crate::config::{Compression, FallbackConfig};
use crate::error::{AppError, Result};
use crate::models::FeedContentsRow;

const WRITE_CHECK_FILE: &str = ".fallback-write-check";

/// Where rows go when the store rejects a batch.
#[derive(Debug, Clone)]
pub enum FallbackWriter {
    /// Rows are logged and discarded.
    Disabled,
    /// One JSON file per row, partitioned by producer and feed.
    LocalPath {
        base_path: PathBuf,
        compression: Compression,
    },
}

impl FallbackWriter {
    pub fn from_config(config: &FallbackConfig) -> Result<Self> {
        if !config.enabled {
            return Ok(Self::Disabled);
        }
        let base_path = config
            .base_path
            .clone()
            .ok_or_else(|| AppError::Config("fallback.base_path is not set".into()))?;
        check_writable(&base_path)?;
        Ok(Self::LocalPath {
            base_path,
            compression: config.compression,
        })
    }

    /// Writes one row. Returns the file written, or `None` when disabled.
    pub fn write(&self, row: &FeedContentsRow) -> Result<Option<PathBuf>> {
        match self {
            Self::Disabled => {
                tracing::warn!(
                    producer = row.producer(),
                    feed = row.feed(),
                    fetch_time = %row.fetch_time(),
                    "No fallback configured, discarding row"
                );
                Ok(None)
            }
            Self::LocalPath {
                base_path,
                compression,
            } => {
                let dir = partition_dir(base_path, row);
                fs::create_dir_all(&dir)?;
                let (file, path) = create_unique(&dir, row.fetch_time().timestamp(), *compression)?;
                write_row(file, row, *compression)?;
                tracing::debug!("Wrote fallback row to {}", path.display());
                Ok(Some(path))
            }
        }
    }
}

fn check_writable(base_path: &Path) -> Result<()> {
    if !base_path.is_dir() {
        return Err(AppError::Config(format!(
            "fallback directory {} does not exist",
            base_path.display()
        )));
    }
    let check_file = base_path.join(WRITE_CHECK_FILE);
    File::create(&check_file)
        .and_then(|_| fs::remove_file(&check_file))
        .map_err(|e| {
            AppError::Config(format!(
                "fallback directory {} is not writable: {}",
                base_path.display(),
                e
            ))
        })
}

fn partition_dir(base_path: &Path, row: &FeedContentsRow) -> PathBuf {
    base_path
        .join(format!("producer={}", urlencoding::encode(row.producer())))
        .join(format!("feed={}", urlencoding::encode(row.feed())))
}

fn extension(compression: Compression) -> &'static str {
    match compression {
        Compression::None => "json",
        Compression::Gzip => "json.gz",
    }
}

/// Opens `<epoch>.json`, or `<epoch>-<n>.json` when an earlier row of the
/// same second already claimed the name.
fn create_unique(dir: &Path, epoch: i64, compression: Compression) -> Result<(File, PathBuf)> {
    let ext = extension(compression);
    for n in 0..10_000u32 {
        let name = if n == 0 {
            format!("{}.{}", epoch, ext)
        } else {
            format!("{}-{}.{}", epoch, n, ext)
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(AppError::Fallback(format!(
        "no free file name for epoch {} in {}",
        epoch,
        dir.display()
    )))
}

fn write_row(file: File, row: &FeedContentsRow, compression: Compression) -> Result<()> {
    let writer = BufWriter::new(file);
    match compression {
        Compression::None => {
            let mut writer = writer;
            serde_json::to_writer(&mut writer, row)?;
            writer.flush()?;
        }
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(writer, flate2::Compression::default());
            serde_json::to_writer(&mut encoder, row)?;
            encoder.finish()?.flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FetchAttempt, ResponseMeta};
    use chrono::{TimeZone, Utc};
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn row(producer: &str) -> FeedContentsRow {
        FeedContentsRow::success(
            FetchAttempt::new(
                producer,
                "bus/alerts",
                Utc.timestamp_opt(1_741_964_966, 0).unwrap(),
                ["OBA".to_string()].into_iter().collect(),
            ),
            ResponseMeta {
                status_code: 200,
                status_message: Some("OK".into()),
                protocol: "HTTP/1.1".into(),
                response_headers: "{}".into(),
                response_time_millis: 42,
            },
            vec![1, 2, 3],
            "{}".into(),
        )
    }

    fn local(dir: &Path, compression: Compression) -> FallbackWriter {
        FallbackWriter::from_config(&FallbackConfig {
            enabled: true,
            base_path: Some(dir.to_path_buf()),
            compression,
        })
        .unwrap()
    }

    #[test]
    fn test_disabled_discards() {
        let writer = FallbackWriter::from_config(&FallbackConfig::default()).unwrap();
        assert!(matches!(writer, FallbackWriter::Disabled));
        assert_eq!(writer.write(&row("mta")).unwrap(), None);
    }

    #[test]
    fn test_missing_directory_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FallbackWriter::from_config(&FallbackConfig {
            enabled: true,
            base_path: Some(dir.path().join("absent")),
            compression: Compression::None,
        })
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_writes_partitioned_json() {
        let dir = tempfile::tempdir().unwrap();
        let writer = local(dir.path(), Compression::None);
        let original = row("mta nyct");

        let path = writer.write(&original).unwrap().unwrap();
        assert_eq!(
            path,
            dir.path()
                .join("producer=mta%20nyct")
                .join("feed=bus%2Falerts")
                .join("1741964966.json")
        );

        let back: FeedContentsRow =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_same_second_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let writer = local(dir.path(), Compression::None);

        let first = writer.write(&row("mta")).unwrap().unwrap();
        let second = writer.write(&row("mta")).unwrap().unwrap();
        assert_ne!(first, second);
        assert!(second.ends_with("1741964966-1.json"));
    }

    #[test]
    fn test_gzip_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let writer = local(dir.path(), Compression::Gzip);
        let original = row("mta");

        let path = writer.write(&original).unwrap().unwrap();
        assert!(path.to_string_lossy().ends_with("1741964966.json.gz"));

        let mut json = String::new();
        GzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut json)
            .unwrap();
        let back: FeedContentsRow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }
}
