//! XML sitemap parsing.
//!
//! Handles both `<sitemapindex>` (child sitemap lists) and `<urlset>`
//! documents, preserving per-URL `lastmod`/`priority`/`changefreq` and
//! deriving a language for each entry.

use quick_xml::Reader;
use quick_xml::events::Event;

use site2rag_shared::{Result, Site2RagError, SitemapUrl};

/// Hard cap on URLs taken from a single sitemap tree.
pub(crate) const MAX_URLS: usize = 50_000;

/// Parsed sitemap document: either an index or a URL set (or both, for
/// tolerant handling of malformed feeds).
#[derive(Debug, Default)]
pub struct ParsedSitemap {
    /// Child sitemap locations from a `<sitemapindex>`.
    pub child_sitemaps: Vec<String>,
    /// Page entries from a `<urlset>`.
    pub urls: Vec<SitemapUrl>,
}

/// Per-`<url>` accumulator while walking the XML events.
#[derive(Debug, Default)]
struct UrlEntry {
    loc: Option<String>,
    lastmod: Option<String>,
    priority: Option<f64>,
    changefreq: Option<String>,
    /// `(hreflang, href)` pairs from `xhtml:link rel="alternate"`.
    alternates: Vec<(String, String)>,
}

/// Parse a sitemap XML document.
pub fn parse_sitemap(xml: &str, sitemap_url: &str) -> Result<ParsedSitemap> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parsed = ParsedSitemap::default();

    // Element context
    let mut in_sitemap_entry = false;
    let mut current_url: Option<UrlEntry> = None;
    let mut text_target: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"sitemap" => in_sitemap_entry = true,
                    b"url" => current_url = Some(UrlEntry::default()),
                    b"loc" => text_target = Some("loc"),
                    b"lastmod" => text_target = Some("lastmod"),
                    b"priority" => text_target = Some("priority"),
                    b"changefreq" => text_target = Some("changefreq"),
                    b"link" => {
                        if let Some(entry) = current_url.as_mut() {
                            record_alternate(&e, entry);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"link" {
                    if let Some(entry) = current_url.as_mut() {
                        record_alternate(&e, entry);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let Some(target) = text_target else { continue };
                let text = t
                    .unescape()
                    .map_err(|e| Site2RagError::parse(format!("sitemap text: {e}")))?
                    .trim()
                    .to_string();
                if text.is_empty() {
                    continue;
                }

                if let Some(entry) = current_url.as_mut() {
                    match target {
                        "loc" => entry.loc = Some(text),
                        "lastmod" => entry.lastmod = Some(text),
                        "priority" => entry.priority = text.parse().ok(),
                        "changefreq" => entry.changefreq = Some(text),
                        _ => {}
                    }
                } else if in_sitemap_entry && target == "loc" {
                    parsed.child_sitemaps.push(text);
                }
            }
            Ok(Event::End(e)) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"sitemap" => in_sitemap_entry = false,
                    b"url" => {
                        if let Some(entry) = current_url.take() {
                            if let Some(record) = finish_entry(entry, sitemap_url) {
                                parsed.urls.push(record);
                                if parsed.urls.len() >= MAX_URLS {
                                    break;
                                }
                            }
                        }
                    }
                    b"loc" | b"lastmod" | b"priority" | b"changefreq" => text_target = None,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Site2RagError::parse(format!(
                    "sitemap XML at {sitemap_url}: {e}"
                )));
            }
            _ => {}
        }
    }

    Ok(parsed)
}

/// Capture an `xhtml:link rel="alternate" hreflang="…" href="…"` element.
fn record_alternate(e: &quick_xml::events::BytesStart<'_>, entry: &mut UrlEntry) {
    let mut rel = None;
    let mut hreflang = None;
    let mut href = None;

    for attr in e.attributes().flatten() {
        let Ok(value) = attr.unescape_value() else {
            continue;
        };
        match attr.key.local_name().as_ref() {
            b"rel" => rel = Some(value.to_string()),
            b"hreflang" => hreflang = Some(value.to_string()),
            b"href" => href = Some(value.to_string()),
            _ => {}
        }
    }

    if rel.as_deref() == Some("alternate") {
        if let (Some(lang), Some(target)) = (hreflang, href) {
            entry.alternates.push((lang, target));
        }
    }
}

/// Turn an accumulated `<url>` block into a record with a resolved language.
fn finish_entry(entry: UrlEntry, sitemap_url: &str) -> Option<SitemapUrl> {
    let loc = entry.loc?;

    // Self-referencing hreflang wins, then the URL heuristic, then "en".
    let language = entry
        .alternates
        .iter()
        .find(|(_, href)| href == &loc)
        .map(|(lang, _)| lang.clone())
        .or_else(|| language_from_url(&loc))
        .unwrap_or_else(|| "en".to_string());

    Some(SitemapUrl {
        url: loc,
        sitemap_url: sitemap_url.to_string(),
        language,
        priority: entry.priority,
        lastmod: entry.lastmod,
        changefreq: entry.changefreq,
        processed: false,
    })
}

/// Guess a language from a URL path segment like `/fr/` or `/pt-br/`.
pub(crate) fn language_from_url(url: &str) -> Option<String> {
    let path = url::Url::parse(url).ok()?.path().to_string();

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let lower = segment.to_ascii_lowercase();
        let is_lang = match lower.len() {
            2 => lower.chars().all(|c| c.is_ascii_lowercase()),
            5 => {
                let bytes = lower.as_bytes();
                bytes[2] == b'-'
                    && lower[..2].chars().all(|c| c.is_ascii_lowercase())
                    && lower[3..].chars().all(|c| c.is_ascii_alphanumeric())
            }
            _ => false,
        };
        if is_lang {
            return Some(lower);
        }
        // Only the first segment is a plausible language prefix
        break;
    }
    None
}
