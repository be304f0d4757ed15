//! URL normalization, classification, and pattern matching.
//!
//! These helpers are deliberately forgiving: an unparseable URL falls back to
//! the raw string for [`normalize`], to `"page"` for [`safe_filename`], and to
//! `false` for the domain check, so a single bad link never aborts a crawl.

use percent_encoding::percent_decode_str;
use url::Url;

/// Extensions treated as directly-downloadable document/media resources.
const BINARY_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "zip", "epub", "mobi", "png", "jpg",
    "jpeg", "gif", "webp", "svg", "mp3", "mp4", "ogg", "wav", "avi", "mov",
];

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize a URL for identity and deduplication.
///
/// Lowercases the host, collapses repeated slashes, drops the fragment and
/// query, and removes the trailing slash except at the root. Idempotent.
pub fn normalize(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };

    url.set_fragment(None);
    url.set_query(None);

    let mut path = url.path().to_string();
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    url.set_path(&path);

    url.to_string()
}

/// Generate a filesystem path stem for a URL, preserving the path hierarchy.
///
/// The path is percent-decoded, control characters are stripped, Unicode
/// letters are preserved, and the last segment's extension is removed.
/// Returns `"index"` for the root and `"page"` for unparseable input.
pub fn safe_filename(raw: &str) -> String {
    let Ok(url) = Url::parse(raw) else {
        return "page".to_string();
    };

    let decoded = percent_decode_str(url.path()).decode_utf8_lossy();
    let trimmed = decoded.trim_matches('/');
    if trimmed.is_empty() {
        return "index".to_string();
    }

    let mut segments: Vec<String> = trimmed
        .split('/')
        .map(|seg| seg.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|seg| !seg.is_empty())
        .collect();

    if let Some(last) = segments.last_mut() {
        *last = strip_extension(last);
    }

    segments.retain(|seg| !seg.is_empty());
    if segments.is_empty() {
        return "index".to_string();
    }

    segments.join("/")
}

/// Drop a short alphanumeric extension from a path segment.
fn strip_extension(segment: &str) -> String {
    if let Some(dot) = segment.rfind('.') {
        let ext = &segment[dot + 1..];
        if !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return segment[..dot].to_string();
        }
    }
    segment.to_string()
}

// ---------------------------------------------------------------------------
// Domain confinement
// ---------------------------------------------------------------------------

/// Whether `raw` lives on `base_host` or one of its subdomains.
pub fn is_same_domain(raw: &str, base_host: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    let base = base_host.to_ascii_lowercase();
    host == base || host.ends_with(&format!(".{base}"))
}

// ---------------------------------------------------------------------------
// Glob patterns
// ---------------------------------------------------------------------------

/// Match a URL path against include/exclude glob patterns.
///
/// `*` matches within a segment, `**` matches across segments, a leading `!`
/// marks an exclude. Excludes beat includes; an empty list allows everything;
/// a list with only excludes allows anything not excluded.
pub fn matches_patterns(path: &str, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return true;
    }

    let mut includes = Vec::new();
    let mut excludes = Vec::new();

    for pattern in patterns {
        if let Some(stripped) = pattern.strip_prefix('!') {
            if let Some(re) = glob_to_regex(stripped) {
                excludes.push(re);
            }
        } else if let Some(re) = glob_to_regex(pattern) {
            includes.push(re);
        }
    }

    if excludes.iter().any(|re| re.is_match(path)) {
        return false;
    }

    if includes.is_empty() {
        return true;
    }

    includes.iter().any(|re| re.is_match(path))
}

/// Convert a glob-like pattern to a regex.
fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");
    regex::Regex::new(&format!("^{escaped}$")).ok()
}

// ---------------------------------------------------------------------------
// Binary / resource detection
// ---------------------------------------------------------------------------

/// Whether a URL or path ends in a known binary extension.
pub fn has_binary_extension(raw: &str) -> bool {
    let path = Url::parse(raw)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| raw.to_string());
    let lower = path.to_ascii_lowercase();
    BINARY_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}

/// Extract the value of a `?resource=…` query parameter, if present.
///
/// Pages that gate document downloads behind a resource parameter are queued
/// both as the page and as the direct resource.
pub fn resource_parameter(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "resource")
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_full_cleanup() {
        assert_eq!(
            normalize("HTTPS://Example.com:443/a//b/?x=1#f"),
            "https://example.com/a/b"
        );
    }

    #[test]
    fn normalize_keeps_root_slash() {
        assert_eq!(normalize("https://example.com/"), "https://example.com/");
        assert_eq!(normalize("https://example.com"), "https://example.com/");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in [
            "HTTPS://Example.com:443/a//b/?x=1#f",
            "https://example.com/",
            "https://example.com/a/b/c",
            "not a url at all",
        ] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "not idempotent for {raw}");
        }
    }

    #[test]
    fn normalize_invalid_falls_back_to_raw() {
        assert_eq!(normalize("::nope::"), "::nope::");
    }

    #[test]
    fn safe_filename_preserves_hierarchy() {
        assert_eq!(
            safe_filename("https://example.com/docs/guide/intro.html"),
            "docs/guide/intro"
        );
    }

    #[test]
    fn safe_filename_decodes_and_keeps_unicode() {
        assert_eq!(
            safe_filename("https://example.com/caf%C3%A9/men%C3%BC.html"),
            "café/menü"
        );
    }

    #[test]
    fn safe_filename_root_and_invalid() {
        assert_eq!(safe_filename("https://example.com/"), "index");
        assert_eq!(safe_filename("%%%"), "page");
    }

    #[test]
    fn safe_filename_keeps_long_suffix() {
        // Not a real extension, just a dotted segment
        assert_eq!(
            safe_filename("https://example.com/v1.0.0-release-notes"),
            "v1.0.0-release-notes"
        );
    }

    #[test]
    fn same_domain_exact_and_subdomain() {
        assert!(is_same_domain("https://example.com/a", "example.com"));
        assert!(is_same_domain("https://docs.example.com/a", "example.com"));
        assert!(!is_same_domain("https://example.org/a", "example.com"));
        assert!(!is_same_domain("https://notexample.com/a", "example.com"));
        assert!(!is_same_domain("garbage", "example.com"));
    }

    #[test]
    fn glob_double_star_spans_segments() {
        assert!(matches_patterns("/blog/2024/post", &["/blog/**".into()]));
    }

    #[test]
    fn glob_single_star_stays_in_segment() {
        assert!(!matches_patterns("/a/b.html", &["/*.html".into()]));
        assert!(matches_patterns("/b.html", &["/*.html".into()]));
    }

    #[test]
    fn glob_excludes_beat_includes() {
        let patterns = vec!["/docs/**".to_string(), "!/docs/internal/**".to_string()];
        assert!(matches_patterns("/docs/guide", &patterns));
        assert!(!matches_patterns("/docs/internal/secrets", &patterns));
    }

    #[test]
    fn glob_empty_allows_all() {
        assert!(matches_patterns("/anything", &[]));
    }

    #[test]
    fn glob_only_excludes_allows_rest() {
        let patterns = vec!["!/private/**".to_string()];
        assert!(matches_patterns("/public/page", &patterns));
        assert!(!matches_patterns("/private/page", &patterns));
    }

    #[test]
    fn binary_extension_detection() {
        assert!(has_binary_extension("https://example.com/report.pdf"));
        assert!(has_binary_extension("https://example.com/deck.PPTX"));
        assert!(!has_binary_extension("https://example.com/page.html"));
        assert!(has_binary_extension("files/archive.zip"));
    }

    #[test]
    fn resource_parameter_extraction() {
        assert_eq!(
            resource_parameter("https://example.com/download?resource=files/report.pdf"),
            Some("files/report.pdf".into())
        );
        assert_eq!(resource_parameter("https://example.com/download"), None);
    }
}
