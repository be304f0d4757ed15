//! Document metadata fusion.
//!
//! Merges JSON-LD, standard meta tags, Open Graph properties, Dublin Core,
//! and byline heuristics into a single [`DocumentMetadata`], with a fixed
//! precedence per field (first non-empty source wins). Empty strings and
//! empty lists are dropped before returning.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

/// Byline pattern applied to the first 500 chars of body text.
static BYLINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[Bb]y\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)").expect("byline regex")
});

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Extra author attributes pulled from a matching JSON-LD `Person`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct AuthorDetails {
    pub description: Option<String>,
    pub job_title: Option<String>,
    pub image: Option<String>,
    pub url: Option<String>,
    pub organization: Option<String>,
}

impl AuthorDetails {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.job_title.is_none()
            && self.image.is_none()
            && self.url.is_none()
            && self.organization.is_none()
    }
}

/// Fused document metadata, emitted into Markdown front-matter.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub author_details: AuthorDetails,
    pub publisher: Option<String>,
    pub publisher_logo: Option<String>,
    pub date_published: Option<String>,
    pub date_modified: Option<String>,
    pub keywords: Vec<String>,
    pub canonical: Option<String>,
    pub language: Option<String>,
    pub image: Option<String>,
    pub section: Option<String>,
    pub license: Option<String>,
    pub audio_duration: Option<String>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Extract metadata from a full HTML document.
pub fn extract_metadata(html: &str, _url: &str) -> DocumentMetadata {
    let doc = Html::parse_document(html);

    let ld_objects = collect_json_ld(&doc);
    let article = ld_objects.iter().find(|obj| is_article_like(obj));
    let meta = collect_meta_tags(&doc);

    let title = first_non_empty([
        article.and_then(|a| str_field(a, "headline")),
        article.and_then(|a| str_field(a, "name")),
        title_tag(&doc),
        meta.first("og:title"),
    ]);

    let author = first_non_empty([
        article.and_then(author_from_ld),
        meta.first("author"),
        meta.first("article:author"),
        meta.first("DC.creator"),
        link_attr(&doc, "link[rel=\"author\"]", "title"),
        byline_from_body(&doc),
    ]);

    let description = first_non_empty([
        article.and_then(|a| str_field(a, "description")),
        meta.first("description"),
        meta.first("og:description"),
    ]);

    let date_published = first_non_empty([
        article.and_then(|a| str_field(a, "datePublished")),
        meta.first("article:published_time"),
        meta.first("date"),
    ]);

    let date_modified = first_non_empty([
        article.and_then(|a| str_field(a, "dateModified")),
        meta.first("article:modified_time"),
    ]);

    let publisher = first_non_empty([
        article.and_then(|a| nested_name(a, "publisher")),
        meta.first("og:site_name"),
        meta.first("publisher"),
    ]);

    let publisher_logo = article
        .and_then(|a| a.get("publisher"))
        .and_then(|p| p.get("logo"))
        .and_then(image_url)
        .filter(|s| !s.is_empty());

    let image = first_non_empty([
        meta.first("og:image"),
        article.and_then(|a| a.get("image")).and_then(image_url),
        meta.first("twitter:image"),
    ]);

    let language = first_non_empty([
        html_lang(&doc),
        meta.first("og:locale"),
        article.and_then(|a| str_field(a, "inLanguage")),
    ]);

    let section = first_non_empty([
        meta.first("article:section"),
        article.and_then(|a| str_field(a, "articleSection")),
    ]);

    let license = first_non_empty([
        link_attr(&doc, "link[rel=\"license\"]", "href"),
        article.and_then(|a| str_field(a, "license")),
    ]);

    let audio_duration = first_non_empty([
        article
            .and_then(|a| a.get("audio"))
            .and_then(|audio| str_field(audio, "duration")),
        meta.first("og:audio:duration"),
    ]);

    let canonical = first_non_empty([
        link_attr(&doc, "link[rel=\"canonical\"]", "href"),
        meta.first("og:url"),
    ]);

    let keywords = merge_keywords(article, &meta);

    // Attach Person details when a JSON-LD Person matches the resolved author.
    let author_details = match &author {
        Some(name) => ld_objects
            .iter()
            .find(|obj| is_person(obj) && str_field(obj, "name").as_deref() == Some(name))
            .map(person_details)
            .unwrap_or_default(),
        None => AuthorDetails::default(),
    };

    DocumentMetadata {
        title,
        description,
        author,
        author_details,
        publisher,
        publisher_logo,
        date_published,
        date_modified,
        keywords,
        canonical,
        language,
        image,
        section,
        license,
        audio_duration,
    }
}

// ---------------------------------------------------------------------------
// JSON-LD
// ---------------------------------------------------------------------------

/// Collect every JSON-LD object, flattening arrays and `@graph` containers.
fn collect_json_ld(doc: &Html) -> Vec<Value> {
    let Ok(sel) = Selector::parse("script[type=\"application/ld+json\"]") else {
        return Vec::new();
    };

    let mut objects = Vec::new();
    for script in doc.select(&sel) {
        let raw = script.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        flatten_ld(value, &mut objects);
    }
    objects
}

fn flatten_ld(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_ld(item, out);
            }
        }
        Value::Object(ref map) => {
            if let Some(graph) = map.get("@graph").cloned() {
                flatten_ld(graph, out);
            }
            out.push(value);
        }
        _ => {}
    }
}

fn type_matches(obj: &Value, wanted: &[&str]) -> bool {
    match obj.get("@type") {
        Some(Value::String(t)) => wanted.contains(&t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| wanted.contains(&t)),
        _ => false,
    }
}

fn is_article_like(obj: &Value) -> bool {
    obj.get("headline").is_some()
        || type_matches(
            obj,
            &["Article", "NewsArticle", "BlogPosting", "TechArticle", "Report", "WebPage"],
        )
}

fn is_person(obj: &Value) -> bool {
    type_matches(obj, &["Person"])
}

fn str_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// JSON-LD `author` may be a string, a Person object, or an array of either.
fn author_from_ld(article: &Value) -> Option<String> {
    let author = article.get("author")?;
    match author {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Object(_) => str_field(author, "name"),
        Value::Array(items) => items.iter().find_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Value::Object(_) => str_field(item, "name"),
            _ => None,
        }),
        _ => None,
    }
}

/// `publisher.name` style nested lookups.
fn nested_name(obj: &Value, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        nested => str_field(nested, "name"),
    }
}

/// An image value may be a URL string, an `ImageObject`, or an array.
fn image_url(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Object(_) => str_field(value, "url"),
        Value::Array(items) => items.first().and_then(image_url),
        _ => None,
    }
}

fn person_details(person: &Value) -> AuthorDetails {
    AuthorDetails {
        description: str_field(person, "description"),
        job_title: str_field(person, "jobTitle"),
        image: person.get("image").and_then(image_url),
        url: str_field(person, "url"),
        organization: nested_name(person, "worksFor")
            .or_else(|| nested_name(person, "affiliation")),
    }
}

// ---------------------------------------------------------------------------
// Meta tags
// ---------------------------------------------------------------------------

/// All `<meta>` name/property → content pairs, in document order.
struct MetaTags(Vec<(String, String)>);

impl MetaTags {
    /// First non-empty content for a name (case-insensitive).
    fn first(&self, name: &str) -> Option<String> {
        self.0
            .iter()
            .find(|(key, value)| key.eq_ignore_ascii_case(name) && !value.is_empty())
            .map(|(_, value)| value.clone())
    }

    /// Every content value for a repeatable name like `article:tag`.
    fn all(&self, name: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|(key, value)| key.eq_ignore_ascii_case(name) && !value.is_empty())
            .map(|(_, value)| value.clone())
            .collect()
    }
}

fn collect_meta_tags(doc: &Html) -> MetaTags {
    let Ok(sel) = Selector::parse("meta") else {
        return MetaTags(Vec::new());
    };

    let mut tags = Vec::new();
    for meta in doc.select(&sel) {
        let key = meta
            .value()
            .attr("name")
            .or_else(|| meta.value().attr("property"));
        let content = meta.value().attr("content");
        if let (Some(key), Some(content)) = (key, content) {
            tags.push((key.trim().to_string(), content.trim().to_string()));
        }
    }
    MetaTags(tags)
}

// ---------------------------------------------------------------------------
// Document helpers
// ---------------------------------------------------------------------------

fn title_tag(doc: &Html) -> Option<String> {
    let sel = Selector::parse("title").ok()?;
    doc.select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn html_lang(doc: &Html) -> Option<String> {
    let sel = Selector::parse("html").ok()?;
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr("lang"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn link_attr(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Byline regex over the first 500 chars of body text.
fn byline_from_body(doc: &Html) -> Option<String> {
    let sel = Selector::parse("body").ok()?;
    let body: ElementRef<'_> = doc.select(&sel).next()?;
    let text = body.text().collect::<String>();
    let head: String = text.chars().take(500).collect();

    BYLINE_RE
        .captures(&head)
        .map(|caps| caps[1].trim().to_string())
}

/// Merge keyword sources into a deduped, order-preserving list.
fn merge_keywords(article: Option<&Value>, meta: &MetaTags) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();

    let mut push = |value: &str| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return;
        }
        if !keywords.iter().any(|k| k.eq_ignore_ascii_case(trimmed)) {
            keywords.push(trimmed.to_string());
        }
    };

    if let Some(kw) = meta.first("keywords") {
        for part in kw.split(',') {
            push(part);
        }
    }

    if let Some(article) = article {
        match article.get("keywords") {
            Some(Value::String(s)) => {
                for part in s.split(',') {
                    push(part);
                }
            }
            Some(Value::Array(items)) => {
                for item in items.iter().filter_map(Value::as_str) {
                    push(item);
                }
            }
            _ => {}
        }
    }

    for tag in meta.all("article:tag") {
        push(&tag);
    }
    for subject in meta.all("DC.subject") {
        push(&subject);
    }

    keywords
}

fn first_non_empty<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_ld_beats_title_tag_and_og() {
        let html = r#"<html><head>
            <title>Tag Title</title>
            <meta property="og:title" content="OG Title">
            <script type="application/ld+json">
            {"@type": "Article", "headline": "LD Title", "description": "LD description"}
            </script>
        </head><body></body></html>"#;

        let md = extract_metadata(html, "https://example.com/a");
        assert_eq!(md.title.as_deref(), Some("LD Title"));
        assert_eq!(md.description.as_deref(), Some("LD description"));
    }

    #[test]
    fn title_falls_back_through_chain() {
        let html = r#"<html><head><meta property="og:title" content="OG Only"></head><body></body></html>"#;
        let md = extract_metadata(html, "https://example.com/a");
        assert_eq!(md.title.as_deref(), Some("OG Only"));
    }

    #[test]
    fn author_from_ld_person_object() {
        let html = r#"<html><head>
            <meta name="author" content="Meta Author">
            <script type="application/ld+json">
            {"@type": "Article", "headline": "T", "author": {"@type": "Person", "name": "Jane Smith"}}
            </script>
        </head><body></body></html>"#;

        let md = extract_metadata(html, "https://example.com/a");
        assert_eq!(md.author.as_deref(), Some("Jane Smith"));
    }

    #[test]
    fn byline_regex_is_last_resort() {
        let html = r#"<html><body><article>
            <p>By Arthur Conan Doyle</p>
            <p>the night was dark and stormy in the city.</p>
        </article></body></html>"#;

        let md = extract_metadata(html, "https://example.com/a");
        assert_eq!(md.author.as_deref(), Some("Arthur Conan Doyle"));
    }

    #[test]
    fn person_details_attach_on_name_match() {
        let html = r#"<html><head>
            <script type="application/ld+json">
            {"@graph": [
              {"@type": "Article", "headline": "T", "author": {"@type": "Person", "name": "Jane Smith"}},
              {"@type": "Person", "name": "Jane Smith", "jobTitle": "Staff Writer",
               "description": "Covers infrastructure.", "url": "https://example.com/jane",
               "worksFor": {"@type": "Organization", "name": "Example News"}}
            ]}
            </script>
        </head><body></body></html>"#;

        let md = extract_metadata(html, "https://example.com/a");
        assert_eq!(md.author.as_deref(), Some("Jane Smith"));
        assert_eq!(md.author_details.job_title.as_deref(), Some("Staff Writer"));
        assert_eq!(md.author_details.organization.as_deref(), Some("Example News"));
        assert_eq!(md.author_details.url.as_deref(), Some("https://example.com/jane"));
    }

    #[test]
    fn keywords_merge_and_dedupe() {
        let html = r#"<html><head>
            <meta name="keywords" content="rust, crawler, Rust">
            <meta property="article:tag" content="web">
            <meta property="article:tag" content="crawler">
            <script type="application/ld+json">
            {"@type": "Article", "headline": "T", "keywords": ["markdown", "web"]}
            </script>
        </head><body></body></html>"#;

        let md = extract_metadata(html, "https://example.com/a");
        assert_eq!(md.keywords, vec!["rust", "crawler", "markdown", "web"]);
    }

    #[test]
    fn publisher_and_logo_from_ld() {
        let html = r#"<html><head>
            <script type="application/ld+json">
            {"@type": "NewsArticle", "headline": "T",
             "publisher": {"@type": "Organization", "name": "Example News",
                           "logo": {"@type": "ImageObject", "url": "https://example.com/logo.png"}}}
            </script>
        </head><body></body></html>"#;

        let md = extract_metadata(html, "https://example.com/a");
        assert_eq!(md.publisher.as_deref(), Some("Example News"));
        assert_eq!(
            md.publisher_logo.as_deref(),
            Some("https://example.com/logo.png")
        );
    }

    #[test]
    fn dates_language_canonical_section() {
        let html = r#"<html lang="en-US"><head>
            <link rel="canonical" href="https://example.com/canonical">
            <meta property="article:published_time" content="2024-03-01T08:00:00Z">
            <meta property="article:modified_time" content="2024-03-02T09:00:00Z">
            <meta property="article:section" content="Technology">
        </head><body></body></html>"#;

        let md = extract_metadata(html, "https://example.com/a");
        assert_eq!(md.date_published.as_deref(), Some("2024-03-01T08:00:00Z"));
        assert_eq!(md.date_modified.as_deref(), Some("2024-03-02T09:00:00Z"));
        assert_eq!(md.language.as_deref(), Some("en-US"));
        assert_eq!(md.canonical.as_deref(), Some("https://example.com/canonical"));
        assert_eq!(md.section.as_deref(), Some("Technology"));
    }

    #[test]
    fn empty_values_are_dropped() {
        let html = r#"<html><head>
            <meta name="author" content="   ">
            <meta name="keywords" content=" , ,">
            <title></title>
        </head><body></body></html>"#;

        let md = extract_metadata(html, "https://example.com/a");
        assert!(md.title.is_none());
        assert!(md.author.is_none());
        assert!(md.keywords.is_empty());
        assert!(md.author_details.is_empty());
    }

    #[test]
    fn malformed_json_ld_is_ignored() {
        let html = r#"<html><head>
            <script type="application/ld+json">{not json</script>
            <title>Fallback</title>
        </head><body></body></html>"#;

        let md = extract_metadata(html, "https://example.com/a");
        assert_eq!(md.title.as_deref(), Some("Fallback"));
    }
}
