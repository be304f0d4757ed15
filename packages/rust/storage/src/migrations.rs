//! SQL migration definitions for the site2rag database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: pages, sitemap_urls, crawl_sessions",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per crawled URL, keyed by normalized URL
CREATE TABLE IF NOT EXISTS pages (
    url            TEXT PRIMARY KEY,
    etag           TEXT,
    last_modified  TEXT,
    content_hash   INTEGER,
    status         INTEGER NOT NULL DEFAULT 0,
    last_crawled   TEXT NOT NULL,
    last_updated   TEXT,
    title          TEXT,
    file_path      TEXT,
    content_status TEXT
);

CREATE INDEX IF NOT EXISTS idx_pages_content_status ON pages(content_status);

-- URLs discovered via sitemaps, consumed by the crawl orchestrator
CREATE TABLE IF NOT EXISTS sitemap_urls (
    url         TEXT PRIMARY KEY,
    sitemap_url TEXT NOT NULL,
    language    TEXT NOT NULL,
    priority    REAL,
    lastmod     TEXT,
    changefreq  TEXT,
    processed   INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_sitemap_urls_processed ON sitemap_urls(processed);

-- Crawl run history
CREATE TABLE IF NOT EXISTS crawl_sessions (
    id          TEXT PRIMARY KEY,
    seed_url    TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
