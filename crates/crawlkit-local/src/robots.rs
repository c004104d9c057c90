//! robots.txt gate with a SQLite-backed per-host cache.
//!
//! Policy follows the crawler-friendly default: any failure to fetch or
//! parse robots.txt allows the crawl. Rules are cached per host with a TTL
//! (default 7 days); rewrites are skipped when the fetched content hash is
//! unchanged.

use crate::content_store::content_hash;
use crawlkit_core::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use texting_robots::Robot;
use url::Url;

const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const FETCH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct RobotsChecker {
    conn: Arc<Mutex<Connection>>,
    client: reqwest::Client,
    ttl: Duration,
}

impl RobotsChecker {
    /// Open (and create) the robots cache under `cache_dir`.
    pub fn open(cache_dir: &Path, ttl: Option<Duration>) -> Result<Self> {
        std::fs::create_dir_all(cache_dir).map_err(|e| Error::CacheIo(e.to_string()))?;
        let conn = Connection::open(cache_dir.join("robots_cache.db"))
            .map_err(|e| Error::CacheIo(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::CacheIo(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS robots_cache (
                domain TEXT PRIMARY KEY,
                rules TEXT NOT NULL,
                fetch_time INTEGER NOT NULL,
                hash TEXT NOT NULL
            )",
        )
        .map_err(|e| Error::CacheIo(e.to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::FetchNetwork(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            client,
            ttl: ttl.unwrap_or(DEFAULT_TTL),
        })
    }

    /// True when `user_agent` may fetch `url` according to robots.txt.
    ///
    /// Allows on every failure path: unparseable URL, missing robots.txt,
    /// network error, fetch timeout, or unparseable rules.
    pub async fn can_fetch(&self, url: &str, user_agent: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return true;
        };
        let Some(host) = parsed.host_str() else {
            return true;
        };
        let domain = match parsed.port() {
            Some(p) => format!("{host}:{p}"),
            None => host.to_string(),
        };

        let cached = self.cached_rules(&domain).await;
        let rules = match cached {
            Some((rules, true)) => rules,
            stale => {
                let robots_url = format!("{}://{}/robots.txt", parsed.scheme(), domain);
                match self.fetch_rules(&robots_url).await {
                    Some(rules) => {
                        self.store_rules(&domain, &rules).await;
                        rules
                    }
                    // Unreachable or non-200 robots.txt: allow, but fall back
                    // to stale cached rules if we have them.
                    None => match stale {
                        Some((rules, _)) => rules,
                        None => return true,
                    },
                }
            }
        };

        if rules.trim().is_empty() {
            return true;
        }
        match Robot::new(user_agent, rules.as_bytes()) {
            Ok(robot) => robot.allowed(url),
            Err(_) => true,
        }
    }

    async fn fetch_rules(&self, robots_url: &str) -> Option<String> {
        let resp = self.client.get(robots_url).send().await.ok()?;
        if resp.status() != reqwest::StatusCode::OK {
            return None;
        }
        resp.text().await.ok()
    }

    /// `(rules, is_fresh)` for the cached row, if any.
    async fn cached_rules(&self, domain: &str) -> Option<(String, bool)> {
        let conn = Arc::clone(&self.conn);
        let domain = domain.to_string();
        let ttl = self.ttl;
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.query_row(
                "SELECT rules, fetch_time FROM robots_cache WHERE domain = ?1",
                params![domain],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .ok()
            .flatten()
            .map(|(rules, fetch_time)| {
                let age = now_secs().saturating_sub(fetch_time.max(0) as u64);
                (rules, age < ttl.as_secs())
            })
        })
        .await
        .ok()
        .flatten()
    }

    /// Upsert rules for a host, skipping the write when the hash is unchanged.
    async fn store_rules(&self, domain: &str, rules: &str) {
        let conn = Arc::clone(&self.conn);
        let domain = domain.to_string();
        let rules = rules.to_string();
        let hash = content_hash(&rules);
        let _ = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let existing: Option<String> = conn
                .query_row(
                    "SELECT hash FROM robots_cache WHERE domain = ?1",
                    params![domain],
                    |row| row.get(0),
                )
                .optional()
                .ok()
                .flatten();
            if existing.as_deref() == Some(hash.as_str()) {
                // Content unchanged: bump only the freshness timestamp.
                let _ = conn.execute(
                    "UPDATE robots_cache SET fetch_time = ?2 WHERE domain = ?1",
                    params![domain, now_secs() as i64],
                );
                return;
            }
            let _ = conn.execute(
                "INSERT OR REPLACE INTO robots_cache (domain, rules, fetch_time, hash)
                 VALUES (?1, ?2, ?3, ?4)",
                params![domain, rules, now_secs() as i64, hash],
            );
        })
        .await;
    }

    /// Delete every cached robots.txt row.
    pub async fn clear_cache(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.execute("DELETE FROM robots_cache", [])
                .map(|_| ())
                .map_err(|e| Error::CacheIo(e.to_string()))
        })
        .await
        .map_err(|e| Error::CacheIo(e.to_string()))?
    }

    /// Purge rows older than the TTL.
    pub async fn clear_expired(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let cutoff = now_secs().saturating_sub(self.ttl.as_secs()) as i64;
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.execute(
                "DELETE FROM robots_cache WHERE fetch_time < ?1",
                params![cutoff],
            )
            .map(|_| ())
            .map_err(|e| Error::CacheIo(e.to_string()))
        })
        .await
        .map_err(|e| Error::CacheIo(e.to_string()))?
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
