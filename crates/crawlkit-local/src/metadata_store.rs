//! Keyed metadata rows for cached crawl results.
//!
//! One SQLite table, `crawled_data`, keyed by normalized URL. Content columns
//! hold hash pointers into the [`crate::content_store::ContentStore`], never
//! the content itself. Writes are last-writer-wins upserts; readers see
//! either the old row or the new one, never a torn row.

use crawlkit_core::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// One row of `crawled_data`. Mirrors the on-disk schema exactly.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub url: String,
    pub html_hash: String,
    pub cleaned_html_hash: String,
    pub markdown_hash: String,
    pub extracted_content_hash: String,
    pub screenshot_hash: String,
    pub success: bool,
    /// JSON-encoded media inventory.
    pub media: String,
    /// JSON-encoded link inventory.
    pub links: String,
    /// JSON-encoded head metadata.
    pub metadata: String,
    /// JSON-encoded response header map.
    pub response_headers: String,
    /// JSON-encoded list of downloaded file paths.
    pub downloaded_files: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub head_fingerprint: Option<String>,
    /// Unix seconds at write time.
    pub cached_at: i64,
}

impl CacheEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            media: "{}".to_string(),
            links: "{}".to_string(),
            metadata: "{}".to_string(),
            response_headers: "{}".to_string(),
            downloaded_files: "{}".to_string(),
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct MetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl MetadataStore {
    /// Open (and create) the metadata database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::CacheIo(e.to_string()))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::CacheIo(format!("open {}: {e}", path.display())))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::CacheIo(e.to_string()))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| Error::CacheIo(e.to_string()))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS crawled_data (
                url TEXT PRIMARY KEY,
                html TEXT,
                cleaned_html TEXT,
                markdown TEXT,
                extracted_content TEXT,
                success BOOLEAN,
                media TEXT DEFAULT '{}',
                links TEXT DEFAULT '{}',
                metadata TEXT DEFAULT '{}',
                screenshot TEXT DEFAULT '',
                response_headers TEXT DEFAULT '{}',
                downloaded_files TEXT DEFAULT '{}',
                etag TEXT,
                last_modified TEXT,
                head_fingerprint TEXT,
                cached_at INTEGER
            )",
        )
        .map_err(|e| Error::CacheIo(e.to_string()))
    }

    /// Run `op` on the blocking pool, retrying with exponential backoff when
    /// the database is contended.
    async fn with_retry<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&Connection) -> rusqlite::Result<T> + Send + Sync + Clone + 'static,
    {
        let mut attempt = 0u32;
        loop {
            let conn = Arc::clone(&self.conn);
            let op = op.clone();
            let out = tokio::task::spawn_blocking(move || {
                let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
                op(&conn)
            })
            .await
            .map_err(|e| Error::CacheIo(format!("metadata task join: {e}")))?;

            match out {
                Ok(v) => return Ok(v),
                Err(e) if attempt + 1 < MAX_RETRIES && is_contention(&e) => {
                    attempt += 1;
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    tracing::warn!(attempt, ?delay, error = %e, "metadata store contended, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(Error::CacheIo(e.to_string())),
            }
        }
    }

    /// Fetch the row for a normalized URL.
    pub async fn get(&self, url: &str) -> Result<Option<CacheEntry>> {
        let url = url.to_string();
        self.with_retry(move |conn| {
            conn.query_row(
                "SELECT url, html, cleaned_html, markdown, extracted_content, success,
                        media, links, metadata, screenshot, response_headers,
                        downloaded_files, etag, last_modified, head_fingerprint, cached_at
                 FROM crawled_data WHERE url = ?1",
                params![url],
                |row| {
                    Ok(CacheEntry {
                        url: row.get(0)?,
                        html_hash: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        cleaned_html_hash: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        markdown_hash: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        extracted_content_hash: row
                            .get::<_, Option<String>>(4)?
                            .unwrap_or_default(),
                        success: row.get(5)?,
                        media: row.get::<_, Option<String>>(6)?.unwrap_or_else(|| "{}".into()),
                        links: row.get::<_, Option<String>>(7)?.unwrap_or_else(|| "{}".into()),
                        metadata: row
                            .get::<_, Option<String>>(8)?
                            .unwrap_or_else(|| "{}".into()),
                        screenshot_hash: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
                        response_headers: row
                            .get::<_, Option<String>>(10)?
                            .unwrap_or_else(|| "{}".into()),
                        downloaded_files: row
                            .get::<_, Option<String>>(11)?
                            .unwrap_or_else(|| "{}".into()),
                        etag: row.get(12)?,
                        last_modified: row.get(13)?,
                        head_fingerprint: row.get(14)?,
                        cached_at: row.get::<_, Option<i64>>(15)?.unwrap_or(0),
                    })
                },
            )
            .optional()
        })
        .await
    }

    /// Insert or replace the row for `entry.url` (last-writer-wins).
    pub async fn put(&self, entry: CacheEntry) -> Result<()> {
        self.with_retry(move |conn| {
            conn.execute(
                "INSERT INTO crawled_data (
                    url, html, cleaned_html, markdown, extracted_content, success,
                    media, links, metadata, screenshot, response_headers,
                    downloaded_files, etag, last_modified, head_fingerprint, cached_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                 ON CONFLICT(url) DO UPDATE SET
                    html = excluded.html,
                    cleaned_html = excluded.cleaned_html,
                    markdown = excluded.markdown,
                    extracted_content = excluded.extracted_content,
                    success = excluded.success,
                    media = excluded.media,
                    links = excluded.links,
                    metadata = excluded.metadata,
                    screenshot = excluded.screenshot,
                    response_headers = excluded.response_headers,
                    downloaded_files = excluded.downloaded_files,
                    etag = excluded.etag,
                    last_modified = excluded.last_modified,
                    head_fingerprint = excluded.head_fingerprint,
                    cached_at = excluded.cached_at",
                params![
                    entry.url,
                    entry.html_hash,
                    entry.cleaned_html_hash,
                    entry.markdown_hash,
                    entry.extracted_content_hash,
                    entry.success,
                    entry.media,
                    entry.links,
                    entry.metadata,
                    entry.screenshot_hash,
                    entry.response_headers,
                    entry.downloaded_files,
                    entry.etag,
                    entry.last_modified,
                    entry.head_fingerprint,
                    entry.cached_at,
                ],
            )
            .map(|_| ())
        })
        .await
    }

    pub async fn count(&self) -> Result<u64> {
        self.with_retry(|conn| {
            conn.query_row("SELECT COUNT(*) FROM crawled_data", [], |row| {
                row.get::<_, i64>(0)
            })
        })
        .await
        .map(|n| n.max(0) as u64)
    }

    /// Delete every row, keeping the table.
    pub async fn clear(&self) -> Result<()> {
        self.with_retry(|conn| conn.execute("DELETE FROM crawled_data", []).map(|_| ()))
            .await
    }

    /// Drop and recreate the table.
    pub async fn drop_store(&self) -> Result<()> {
        self.with_retry(|conn| {
            conn.execute("DROP TABLE IF EXISTS crawled_data", []).map(|_| ())
        })
        .await?;
        self.init_schema()
    }
}

fn is_contention(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::DatabaseBusy
                || err.code == rusqlite::ErrorCode::DatabaseLocked
    )
}
