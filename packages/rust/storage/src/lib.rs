//! Embedded libSQL storage layer for crawl state.
//!
//! The [`Storage`] struct wraps a libSQL database holding page records,
//! sitemap-discovered URLs, and crawl session history. It lives under
//! `<outputDir>/.site2rag/site2rag.db`.
//!
//! **Access rules:** a single process owns the database (guarded by the
//! process lock); writes are serialized through the one connection, readers
//! may proceed concurrently.

mod migrations;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use libsql::{Connection, Database, params, params_from_iter};
use uuid::Uuid;

use site2rag_shared::{ContentStatus, PageRecord, PageUpdate, Result, Site2RagError, SitemapUrl};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    closed: AtomicBool,
}

impl Storage {
    /// Open or create a database at `path`, applying pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Site2RagError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| Site2RagError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| Site2RagError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            closed: AtomicBool::new(false),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    Site2RagError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Mark the store closed. Safe to call more than once.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("storage closed");
        }
    }

    /// Reject operations after [`Storage::close`].
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Site2RagError::Storage("store is closed".into()));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Page operations
    // -----------------------------------------------------------------------

    /// Get a page by its normalized URL.
    pub async fn get_page(&self, url: &str) -> Result<Option<PageRecord>> {
        self.check_open()?;
        let mut rows = self
            .conn
            .query(
                "SELECT url, etag, last_modified, content_hash, status, last_crawled,
                        last_updated, title, file_path, content_status
                 FROM pages WHERE url = ?1",
                params![url],
            )
            .await
            .map_err(|e| Site2RagError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_page(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(Site2RagError::Storage(e.to_string())),
        }
    }

    /// Insert or update a page with merge semantics: fields left `None` in
    /// the patch keep their stored values.
    pub async fn upsert_page(&self, url: &str, patch: &PageUpdate) -> Result<()> {
        self.check_open()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO pages (url, etag, last_modified, content_hash, status,
                                    last_crawled, last_updated, title, file_path, content_status)
                 VALUES (?1, ?2, ?3, ?4, COALESCE(?5, 0), COALESCE(?6, ?11), ?7, ?8, ?9, ?10)
                 ON CONFLICT(url) DO UPDATE SET
                   etag           = COALESCE(excluded.etag, pages.etag),
                   last_modified  = COALESCE(excluded.last_modified, pages.last_modified),
                   content_hash   = COALESCE(excluded.content_hash, pages.content_hash),
                   status         = CASE WHEN ?5 IS NULL THEN pages.status ELSE excluded.status END,
                   last_crawled   = CASE WHEN ?6 IS NULL THEN pages.last_crawled ELSE excluded.last_crawled END,
                   last_updated   = COALESCE(excluded.last_updated, pages.last_updated),
                   title          = COALESCE(excluded.title, pages.title),
                   file_path      = COALESCE(excluded.file_path, pages.file_path),
                   content_status = COALESCE(excluded.content_status, pages.content_status)",
                params![
                    url,
                    patch.etag.as_deref(),
                    patch.last_modified.as_deref(),
                    patch.content_hash.map(i64::from),
                    patch.status.map(i64::from),
                    patch.last_crawled.map(|t| t.to_rfc3339()),
                    patch.last_updated.map(|t| t.to_rfc3339()),
                    patch.title.as_deref(),
                    patch.file_path.as_deref(),
                    patch.content_status.map(|s| s.as_str()),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| Site2RagError::Storage(e.to_string()))?;
        Ok(())
    }

    /// List pages with the given content status.
    pub async fn pages_by_status(&self, status: ContentStatus) -> Result<Vec<PageRecord>> {
        self.check_open()?;
        let mut rows = self
            .conn
            .query(
                "SELECT url, etag, last_modified, content_hash, status, last_crawled,
                        last_updated, title, file_path, content_status
                 FROM pages WHERE content_status = ?1 ORDER BY url",
                params![status.as_str()],
            )
            .await
            .map_err(|e| Site2RagError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_page(&row)?);
        }
        Ok(results)
    }

    /// Count pages with the given content status.
    pub async fn count_pages_by_status(&self, status: ContentStatus) -> Result<u64> {
        self.check_open()?;
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM pages WHERE content_status = ?1",
                params![status.as_str()],
            )
            .await
            .map_err(|e| Site2RagError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
            _ => Ok(0),
        }
    }

    /// List pages whose URL is in `urls` and whose status is in `statuses`.
    ///
    /// Used to scope enrichment to the URLs crawled in the current session.
    pub async fn pages_matching(
        &self,
        urls: &[String],
        statuses: &[ContentStatus],
    ) -> Result<Vec<PageRecord>> {
        self.check_open()?;
        if urls.is_empty() || statuses.is_empty() {
            return Ok(Vec::new());
        }

        let url_marks = placeholders(1, urls.len());
        let status_marks = placeholders(urls.len() + 1, statuses.len());
        let sql = format!(
            "SELECT url, etag, last_modified, content_hash, status, last_crawled,
                    last_updated, title, file_path, content_status
             FROM pages WHERE url IN ({url_marks}) AND content_status IN ({status_marks})
             ORDER BY url"
        );

        let values: Vec<libsql::Value> = urls
            .iter()
            .map(|u| libsql::Value::from(u.as_str()))
            .chain(statuses.iter().map(|s| libsql::Value::from(s.as_str())))
            .collect();

        let mut rows = self
            .conn
            .query(&sql, params_from_iter(values))
            .await
            .map_err(|e| Site2RagError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_page(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Sitemap URL operations
    // -----------------------------------------------------------------------

    /// Insert sitemap-discovered URLs in a single transaction.
    ///
    /// Re-discovered URLs keep their `processed` flag.
    pub async fn insert_sitemap_urls(&self, records: &[SitemapUrl]) -> Result<usize> {
        self.check_open()?;
        if records.is_empty() {
            return Ok(0);
        }

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| Site2RagError::Storage(e.to_string()))?;

        let mut inserted = 0;
        for record in records {
            let affected = tx
                .execute(
                    "INSERT INTO sitemap_urls (url, sitemap_url, language, priority, lastmod, changefreq, processed)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
                     ON CONFLICT(url) DO UPDATE SET
                       sitemap_url = excluded.sitemap_url,
                       language    = excluded.language,
                       priority    = excluded.priority,
                       lastmod     = excluded.lastmod,
                       changefreq  = excluded.changefreq",
                    params![
                        record.url.as_str(),
                        record.sitemap_url.as_str(),
                        record.language.as_str(),
                        record.priority,
                        record.lastmod.as_deref(),
                        record.changefreq.as_deref(),
                    ],
                )
                .await
                .map_err(|e| Site2RagError::Storage(e.to_string()))?;
            inserted += affected as usize;
        }

        tx.commit()
            .await
            .map_err(|e| Site2RagError::Storage(e.to_string()))?;
        Ok(inserted)
    }

    /// List sitemap URLs the crawler has not visited yet.
    pub async fn unprocessed_sitemap_urls(&self) -> Result<Vec<SitemapUrl>> {
        self.check_open()?;
        let mut rows = self
            .conn
            .query(
                "SELECT url, sitemap_url, language, priority, lastmod, changefreq, processed
                 FROM sitemap_urls WHERE processed = 0 ORDER BY url",
                params![],
            )
            .await
            .map_err(|e| Site2RagError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_sitemap_url(&row)?);
        }
        Ok(results)
    }

    /// Mark a sitemap URL as visited by the crawler.
    pub async fn mark_sitemap_url_processed(&self, url: &str) -> Result<()> {
        self.check_open()?;
        self.conn
            .execute(
                "UPDATE sitemap_urls SET processed = 1 WHERE url = ?1",
                params![url],
            )
            .await
            .map_err(|e| Site2RagError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Crawl session operations
    // -----------------------------------------------------------------------

    /// Insert a new crawl session. Returns the generated session ID.
    pub async fn start_session(&self, seed_url: &str) -> Result<String> {
        self.check_open()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO crawl_sessions (id, seed_url, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), seed_url, now.as_str()],
            )
            .await
            .map_err(|e| Site2RagError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Record a crawl session's completion stats.
    pub async fn finish_session(&self, session_id: &str, stats_json: &str) -> Result<()> {
        self.check_open()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE crawl_sessions SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, session_id],
            )
            .await
            .map_err(|e| Site2RagError::Storage(e.to_string()))?;
        Ok(())
    }
}

/// Build `?n, ?n+1, …` placeholder lists for dynamic IN clauses.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convert a database row to a [`PageRecord`].
fn row_to_page(row: &libsql::Row) -> Result<PageRecord> {
    let parse_time = |s: String| {
        chrono::DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| Site2RagError::Storage(format!("invalid date: {e}")))
    };

    Ok(PageRecord {
        url: row
            .get::<String>(0)
            .map_err(|e| Site2RagError::Storage(e.to_string()))?,
        etag: row.get::<String>(1).ok(),
        last_modified: row.get::<String>(2).ok(),
        content_hash: row.get::<i64>(3).ok().map(|v| v as u32),
        status: row.get::<i64>(4).unwrap_or(0) as u16,
        last_crawled: {
            let s: String = row
                .get(5)
                .map_err(|e| Site2RagError::Storage(e.to_string()))?;
            parse_time(s)?
        },
        last_updated: match row.get::<String>(6).ok() {
            Some(s) => Some(parse_time(s)?),
            None => None,
        },
        title: row.get::<String>(7).ok(),
        file_path: row.get::<String>(8).ok(),
        content_status: row
            .get::<String>(9)
            .ok()
            .and_then(|s| s.parse::<ContentStatus>().ok()),
    })
}

/// Convert a database row to a [`SitemapUrl`].
fn row_to_sitemap_url(row: &libsql::Row) -> Result<SitemapUrl> {
    Ok(SitemapUrl {
        url: row
            .get::<String>(0)
            .map_err(|e| Site2RagError::Storage(e.to_string()))?,
        sitemap_url: row
            .get::<String>(1)
            .map_err(|e| Site2RagError::Storage(e.to_string()))?,
        language: row
            .get::<String>(2)
            .map_err(|e| Site2RagError::Storage(e.to_string()))?,
        priority: row.get::<f64>(3).ok(),
        lastmod: row.get::<String>(4).ok(),
        changefreq: row.get::<String>(5).ok(),
        processed: row.get::<i64>(6).unwrap_or(0) != 0,
    })
}
