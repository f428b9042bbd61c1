use std::collections::BTreeSet;
use std::sync::Arc;

use rusqlite::params;
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::FeedContentsRow;

use super::schema::SCHEMA;

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Appends a batch in a single transaction. Either every row lands or none.
    pub async fn insert_rows(&self, rows: Arc<Vec<FeedContentsRow>>) -> Result<usize> {
        let written = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        r#"INSERT INTO feed_contents (
                               producer, feed, fetch_time, is_error, error_message,
                               response_time_millis, status_code, status_message, protocol,
                               response_headers, response_body, response_body_length,
                               response_contents, enabled_extensions)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"#,
                    )?;
                    for row in rows.iter() {
                        stmt.execute(params![
                            row.producer(),
                            row.feed(),
                            row.fetch_time().timestamp(),
                            row.is_error(),
                            row.error_message(),
                            row.response_time_millis(),
                            row.status_code(),
                            row.status_message(),
                            row.protocol(),
                            row.response_headers(),
                            row.response_body(),
                            row.response_body_length(),
                            row.response_contents(),
                            extensions_to_sql(row.enabled_extensions()),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(rows.len())
            })
            .await?;
        Ok(written)
    }

    pub async fn count_rows(&self) -> Result<i64> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM feed_contents", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }
}

fn extensions_to_sql(extensions: &BTreeSet<String>) -> Option<String> {
    if extensions.is_empty() {
        None
    } else {
        serde_json::to_string(extensions).ok()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FetchAttempt, ResponseMeta};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    async fn repository() -> (TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.db");
        let repo = Repository::new(path.to_str().unwrap()).await.unwrap();
        (dir, repo)
    }

    fn attempt(secs: i64, extensions: &[&str]) -> FetchAttempt {
        FetchAttempt::new(
            "mta",
            "subway-ace",
            Utc.timestamp_opt(secs, 0).unwrap(),
            extensions.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn meta() -> ResponseMeta {
        ResponseMeta {
            status_code: 200,
            status_message: Some("OK".into()),
            protocol: "HTTP/2.0".into(),
            response_headers: r#"{"etag":["\"x\""]}"#.into(),
            response_time_millis: 120,
        }
    }

    #[tokio::test]
    async fn test_rows_round_trip_field_for_field() {
        let (_dir, repo) = repository().await;
        let rows = vec![
            FeedContentsRow::success(
                attempt(1_700_000_000, &["NYCT", "OBA"]),
                meta(),
                vec![0x0a, 0x00, 0xff],
                r#"{"entity":[]}"#.into(),
            ),
            FeedContentsRow::error(attempt(1_700_000_030, &[]), "connection reset", None, None),
            FeedContentsRow::error(
                attempt(1_700_000_060, &["NYCT"]),
                "HTTP 500 Internal Server Error",
                Some(ResponseMeta {
                    status_code: 500,
                    status_message: Some("Internal Server Error".into()),
                    ..meta()
                }),
                Some(Vec::new()),
            ),
        ];

        let written = repo.insert_rows(Arc::new(rows.clone())).await.unwrap();
        assert_eq!(written, 3);

        let back = repo.rows_for_feed("mta", "subway-ace").await.unwrap();
        assert_eq!(back, rows);
        assert_eq!(repo.count_rows().await.unwrap(), 3);
        assert_eq!(repo.count_errors("mta", "subway-ace").await.unwrap(), 2);
        assert!(repo.rows_for_feed("mta", "other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_table_is_append_only() {
        let (_dir, repo) = repository().await;
        let row = FeedContentsRow::error(attempt(1_700_000_000, &[]), "timeout", None, None);
        repo.insert_rows(Arc::new(vec![row])).await.unwrap();

        assert!(repo
            .execute_raw("UPDATE feed_contents SET is_error = 0")
            .await
            .is_err());
        assert!(repo.execute_raw("DELETE FROM feed_contents").await.is_err());
        assert_eq!(repo.count_rows().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reopening_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.db");
        let path = path.to_str().unwrap();
        {
            let repo = Repository::new(path).await.unwrap();
            let row = FeedContentsRow::error(attempt(1_700_000_000, &[]), "timeout", None, None);
            repo.insert_rows(Arc::new(vec![row])).await.unwrap();
        }
        let repo = Repository::new(path).await.unwrap();
        assert_eq!(repo.count_rows().await.unwrap(), 1);
    }
}
