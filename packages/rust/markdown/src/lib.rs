//! HTML-to-Markdown conversion and YAML front-matter emission.
//!
//! Converts extracted content HTML to clean Markdown using the `htmd` crate,
//! then applies a series of cleanup passes (link resolution, code-fence
//! languages, whitespace). The [`frontmatter`] module serializes document
//! metadata into the YAML block prepended to every page file.

mod cleanup;
pub mod frontmatter;

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;
use tracing::{debug, instrument};
use url::Url;

use site2rag_shared::{Result, Site2RagError};

pub use frontmatter::FrontmatterValue;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of converting content HTML to Markdown.
#[derive(Debug, Clone)]
pub struct ConvertResult {
    /// The final Markdown body (no front-matter).
    pub markdown: String,
    /// Title from the first H1, if any.
    pub title: Option<String>,
    /// Approximate word count of the body (excluding code blocks).
    pub word_count: usize,
}

/// Options for the HTML-to-Markdown conversion.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Source URL used for resolving relative links.
    pub base_url: String,
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert extracted content HTML to clean Markdown.
///
/// 1. Pre-processes HTML tables into Markdown tables
/// 2. Converts HTML → Markdown via `htmd` (ATX headings, fenced code)
/// 3. Runs the cleanup pipeline (links, code fences, whitespace)
#[instrument(skip(content_html), fields(url = %opts.base_url))]
pub fn convert(content_html: &str, opts: &ConvertOptions) -> Result<ConvertResult> {
    let content_html = preprocess_tables(content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "noscript", "iframe", "svg"])
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| Site2RagError::Conversion(format!("htmd conversion failed: {e}")))?;

    debug!(raw_len = raw_markdown.len(), "htmd conversion complete");

    let base_url = Url::parse(&opts.base_url).ok();
    let markdown = cleanup::run_pipeline(&raw_markdown, base_url.as_ref());

    let title = extract_title_from_markdown(&markdown);
    let word_count = count_words(&markdown);

    Ok(ConvertResult {
        markdown,
        title,
        word_count,
    })
}

// ---------------------------------------------------------------------------
// Table pre-processing
// ---------------------------------------------------------------------------

/// Convert HTML `<table>` elements to Markdown table syntax before htmd
/// conversion. `htmd` 0.1 doesn't support tables, so we handle it manually.
fn preprocess_tables(html: &str) -> String {
    let doc = Html::parse_fragment(html);

    let table_sel = scraper::Selector::parse("table").unwrap();

    if doc.select(&table_sel).next().is_none() {
        return html.to_string();
    }

    let mut result = html.to_string();

    for table_el in doc.select(&table_sel) {
        let table_html = table_el.html();
        let md_table = html_table_to_markdown(&table_el);
        result = result.replacen(&table_html, &md_table, 1);
    }

    result
}

/// Convert a single HTML table element to a Markdown table string.
fn html_table_to_markdown(table: &scraper::ElementRef) -> String {
    let tr_sel = scraper::Selector::parse("tr").unwrap();
    let th_sel = scraper::Selector::parse("th").unwrap();
    let td_sel = scraper::Selector::parse("td").unwrap();

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut has_header = false;

    for tr in table.select(&tr_sel) {
        let ths: Vec<String> = tr
            .select(&th_sel)
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .collect();

        if !ths.is_empty() {
            has_header = true;
            rows.push(ths);
            continue;
        }

        let tds: Vec<String> = tr
            .select(&td_sel)
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .collect();

        if !tds.is_empty() {
            rows.push(tds);
        }
    }

    if rows.is_empty() {
        return String::new();
    }

    let col_count = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }

    for row in &mut rows {
        while row.len() < col_count {
            row.push(String::new());
        }
    }

    let mut md = String::from("\n\n");

    let header = &rows[0];
    md.push_str("| ");
    md.push_str(&header.join(" | "));
    md.push_str(" |\n");

    md.push_str("| ");
    md.push_str(
        &(0..col_count)
            .map(|_| "---")
            .collect::<Vec<_>>()
            .join(" | "),
    );
    md.push_str(" |\n");

    let data_start = if has_header { 1 } else { 0 };
    for row in &rows[data_start..] {
        md.push_str("| ");
        md.push_str(&row.join(" | "));
        md.push_str(" |\n");
    }

    md.push('\n');
    md
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract title from the first H1 in the Markdown text.
fn extract_title_from_markdown(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));

    H1_RE.captures(md).map(|c| c[1].trim().to_string())
}

/// Count words in the Markdown body, excluding code blocks.
fn count_words(md: &str) -> usize {
    static CODE_BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid regex"));

    let without_code = CODE_BLOCK_RE.replace_all(md, "");
    without_code.split_whitespace().count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
