pub const SCHEMA: &str = r#"
-- one row per archived fetch attempt
CREATE TABLE IF NOT EXISTS feed_contents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    producer TEXT NOT NULL,
    feed TEXT NOT NULL,
    fetch_time INTEGER NOT NULL,
    is_error INTEGER NOT NULL,
    error_message TEXT,
    response_time_millis INTEGER,
    status_code INTEGER,
    status_message TEXT,
    protocol TEXT,
    response_headers TEXT,
    response_body BLOB,
    response_body_length INTEGER,
    response_contents TEXT,
    enabled_extensions TEXT,
    archived_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_feed_contents_feed_time
    ON feed_contents(producer, feed, fetch_time);
CREATE INDEX IF NOT EXISTS idx_feed_contents_is_error ON feed_contents(is_error);

-- rows are append-only
CREATE TRIGGER IF NOT EXISTS feed_contents_no_update
BEFORE UPDATE ON feed_contents
BEGIN
    SELECT RAISE(ABORT, 'feed_contents is append-only');
END;

CREATE TRIGGER IF NOT EXISTS feed_contents_no_delete
BEFORE DELETE ON feed_contents
BEGIN
    SELECT RAISE(ABORT, 'feed_contents is append-only');
END;
"#;
