//! Main-content extraction from raw HTML.
//!
//! The extractor peels framework wrappers, prefers semantic containers,
//! falls back to a scored tree walk, and cleans the chosen subtree of
//! scripts, navigation, boilerplate, and duplicate blocks. Every removal is
//! recorded in a trace for debug reporting.
//!
//! All functions here are synchronous: a parsed [`Html`] document never
//! crosses an await point.

use std::collections::{HashMap, HashSet};

use ego_tree::NodeId;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use site2rag_shared::{Result, Site2RagError};

/// Known SPA mount-point selectors peeled before content detection.
const FRAMEWORK_WRAPPERS: &[&str] = &["#__nuxt", "#__next", "#root", "#app", "app-root"];

/// Class/id substrings that mark navigation or boilerplate.
const NAV_TOKENS: &[&str] = &[
    "nav", "menu", "sidebar", "widget", "foot", "share", "social", "meta", "breadcrumb",
    "pagination",
];

/// Class/id substrings that mark author/byline content, always preserved.
const AUTHOR_TOKENS: &[&str] = &["author", "byline", "bio"];

/// Fallback content selectors, tried in order.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role=\"main\"]",
    ".content",
    "#content",
    ".main-content",
    ".post-content",
    ".entry-content",
    ".article-content",
];

/// Maximum wrapper-peeling depth.
const MAX_PEEL_DEPTH: usize = 10;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One removed block in the extraction trace.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RemovedBlock {
    /// CSS-like path of the removed element.
    pub selector: String,
    /// What happened (always "removed" today; kept for report compatibility).
    pub decision: String,
    /// Why it was removed.
    pub reason: String,
}

/// Result of content extraction: the cleaned content HTML plus the trace.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    /// Cleaned HTML of the chosen content subtree.
    pub html: String,
    /// Which strategy chose the subtree (for logs and debug reports).
    pub strategy: &'static str,
    /// Every block removed during selection and cleanup.
    pub trace: Vec<RemovedBlock>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Extract the main content from a full HTML document.
pub fn extract_content(html: &str, url: &str) -> Result<ExtractedContent> {
    let doc = Html::parse_document(html);

    let body = select_first(&doc, "body")
        .ok_or_else(|| Site2RagError::parse(format!("{url}: document has no <body>")))?;

    let root = peel_framework_wrapper(&doc, body);

    let (chosen, strategy) = choose_content(&doc, root);

    let mut trace: Vec<RemovedBlock> = Vec::new();

    // Navigation chrome outside the chosen subtree is gone by construction;
    // record it so the trace explains the whole document.
    trace_excluded_chrome(root, chosen, &mut trace);

    let removed = plan_cleanup(chosen, &mut trace);
    let cleaned = serialize_cleaned(chosen, &removed);

    debug!(url, strategy, removed = trace.len(), "content extracted");

    Ok(ExtractedContent {
        html: cleaned,
        strategy,
        trace,
    })
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Step 0: start from a detected SPA wrapper instead of `<body>` when present.
fn peel_framework_wrapper<'a>(doc: &'a Html, body: ElementRef<'a>) -> ElementRef<'a> {
    for wrapper in FRAMEWORK_WRAPPERS {
        if let Some(el) = select_first(doc, wrapper) {
            return el;
        }
    }
    body
}

/// Steps 1–5: semantic peel, scored walk, selector list, paragraph density,
/// then the root itself.
fn choose_content<'a>(doc: &'a Html, root: ElementRef<'a>) -> (ElementRef<'a>, &'static str) {
    if let Some(el) = find_semantic_container(root) {
        return (el, "semantic");
    }

    if let Some(el) = find_scored_container(root) {
        return (el, "scored");
    }

    for selector in CONTENT_SELECTORS {
        if let Some(el) = select_first(doc, selector) {
            return (el, "selector");
        }
    }

    if let Some(el) = find_paragraph_dense_container(root) {
        return (el, "paragraph-density");
    }

    (root, "body")
}

/// Walk down from the root (depth ≤ 10) looking for `<main>`/`<article>` or a
/// "content"-named container with real text that is not navigation.
fn find_semantic_container(root: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let mut frontier: Vec<(ElementRef<'_>, usize)> = vec![(root, 0)];

    while let Some((el, depth)) = frontier.pop() {
        if depth > MAX_PEEL_DEPTH {
            continue;
        }

        let tag = el.value().name();
        if tag == "main" || tag == "article" {
            return Some(el);
        }

        if depth > 0 && class_id(el).contains("content") && !is_navigation(el) {
            let text_len = element_text(el).trim().len();
            if text_len > 200 || has_block_children(el) {
                return Some(el);
            }
        }

        // Depth-first in document order
        for child in el.children().rev() {
            if let Some(child_el) = ElementRef::wrap(child) {
                frontier.push((child_el, depth + 1));
            }
        }
    }

    None
}

/// Recursive scoring walk over the root's children (the root itself is not a
/// candidate). Returns the best-scoring element with score > 5 and
/// text > 100 chars, if any.
fn find_scored_container(root: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let mut best: Option<(f64, ElementRef<'_>)> = None;
    for child in root.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            walk_scores(child_el, 1, &mut best);
        }
    }

    match best {
        Some((score, el)) if score > 5.0 && element_text(el).trim().len() > 100 => Some(el),
        _ => None,
    }
}

fn walk_scores<'a>(el: ElementRef<'a>, depth: usize, best: &mut Option<(f64, ElementRef<'a>)>) {
    if !is_framework_wrapper(el) {
        let score = content_score(el, depth);
        if best.as_ref().is_none_or(|(b, _)| score > *b) {
            *best = Some((score, el));
        }
    }

    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            walk_scores(child_el, depth + 1, best);
        }
    }
}

/// Per-element content score.
///
/// text-length component + 2·paragraphs + 3·headings + 2·(code/quote/table)
/// + path content signals − 10·link-ratio − 2·nav signals − 0.5·depth
fn content_score(el: ElementRef<'_>, depth: usize) -> f64 {
    let text = element_text(el);
    let text_len = text.trim().len() as f64;
    if text_len == 0.0 {
        return f64::MIN;
    }

    let paragraphs = count_descendants(el, "p") as f64;
    let headings = count_descendants(el, "h1, h2, h3, h4, h5, h6") as f64;
    let rich = count_descendants(el, "pre, code, blockquote, table") as f64;

    let link_text = link_text_len(el) as f64;
    let link_ratio = if text_len > 0.0 { link_text / text_len } else { 0.0 };

    let class_id = class_id(el);
    let mut path_signal = 0.0;
    for token in ["content", "article", "post", "main", "story", "text"] {
        if class_id.contains(token) {
            path_signal += 2.0;
        }
    }
    let mut nav_signal = 0.0;
    for token in NAV_TOKENS {
        if class_id.contains(token) {
            nav_signal += 1.0;
        }
    }

    (text_len / 100.0).min(20.0) + 2.0 * paragraphs + 3.0 * headings + 2.0 * rich + path_signal
        - 10.0 * link_ratio
        - 2.0 * nav_signal
        - 0.5 * depth as f64
}

/// Step 4 fallback: the `<div>`/`<section>` with the most `<p>` children and
/// at least 200 chars of text.
fn find_paragraph_dense_container(root: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let mut best: Option<(usize, ElementRef<'_>)> = None;

    let mut stack = vec![root];
    while let Some(el) = stack.pop() {
        let tag = el.value().name();
        if tag == "div" || tag == "section" {
            let p_children = el
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|c| c.value().name() == "p")
                .count();
            if p_children > 0 && element_text(el).trim().len() >= 200 {
                if best.as_ref().is_none_or(|(n, _)| p_children > *n) {
                    best = Some((p_children, el));
                }
            }
        }
        for child in el.children() {
            if let Some(child_el) = ElementRef::wrap(child) {
                stack.push(child_el);
            }
        }
    }

    best.map(|(_, el)| el)
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

/// Record navigation chrome that sits outside the chosen subtree.
fn trace_excluded_chrome(root: ElementRef<'_>, chosen: ElementRef<'_>, trace: &mut Vec<RemovedBlock>) {
    if root.id() == chosen.id() {
        return;
    }

    // Ancestors of the chosen element are containers, not removable chrome;
    // descend through them without classifying.
    let chosen_id = chosen.id();
    let mut ancestors: HashSet<NodeId> = HashSet::new();
    let mut current = chosen.parent().and_then(ElementRef::wrap);
    while let Some(el) = current {
        ancestors.insert(el.id());
        current = el.parent().and_then(ElementRef::wrap);
    }

    let mut stack = vec![root];
    while let Some(el) = stack.pop() {
        if el.id() == chosen_id {
            continue; // chosen subtree survives
        }
        if !ancestors.contains(&el.id()) && is_navigation(el) && !is_author_content(el) {
            trace.push(RemovedBlock {
                selector: selector_path(el),
                decision: "removed".into(),
                reason: "navigation or boilerplate".into(),
            });
            continue; // whole block is gone, don't descend
        }
        for child in el.children() {
            if let Some(child_el) = ElementRef::wrap(child) {
                stack.push(child_el);
            }
        }
    }
}

/// Single breadth-first cleanup pass over the chosen subtree.
///
/// Returns the set of node ids to drop during serialization.
fn plan_cleanup(chosen: ElementRef<'_>, trace: &mut Vec<RemovedBlock>) -> HashSet<NodeId> {
    let mut removed: HashSet<NodeId> = HashSet::new();
    let mut seen_blocks: HashMap<String, NodeId> = HashMap::new();

    let mut queue: Vec<ElementRef<'_>> = chosen
        .children()
        .filter_map(ElementRef::wrap)
        .collect();
    let mut index = 0;

    while index < queue.len() {
        let el = queue[index];
        index += 1;

        if removed.contains(&el.id()) {
            continue;
        }

        let tag = el.value().name();

        // Script-ish and embedded content
        if matches!(tag, "script" | "style" | "noscript" | "iframe") {
            remove(el, "script or style", &mut removed, trace);
            continue;
        }

        // SVG without any text content
        if tag == "svg" && element_text(el).trim().is_empty() {
            remove(el, "svg without text", &mut removed, trace);
            continue;
        }

        // Empty elements: no text and no image with a src
        if element_text(el).trim().is_empty() && !has_image_with_src(el) {
            remove(el, "empty element", &mut removed, trace);
            continue;
        }

        // Navigation/boilerplate, unless it is author content
        if is_navigation(el) && !is_author_content(el) {
            remove(el, "navigation or boilerplate", &mut removed, trace);
            continue;
        }

        // Duplicate blocks: identical normalized text, later occurrence loses
        if matches!(tag, "nav" | "header" | "footer" | "aside" | "div" | "ul" | "ol") {
            let normalized = normalize_block_text(&element_text(el));
            if normalized.len() >= 50 {
                if seen_blocks.contains_key(&normalized) {
                    remove(el, "duplicate block", &mut removed, trace);
                    continue;
                }
                seen_blocks.insert(normalized, el.id());
            }
        }

        for child in el.children() {
            if let Some(child_el) = ElementRef::wrap(child) {
                queue.push(child_el);
            }
        }
    }

    removed
}

fn remove(el: ElementRef<'_>, reason: &str, removed: &mut HashSet<NodeId>, trace: &mut Vec<RemovedBlock>) {
    removed.insert(el.id());
    trace.push(RemovedBlock {
        selector: selector_path(el),
        decision: "removed".into(),
        reason: reason.into(),
    });
}

// ---------------------------------------------------------------------------
// Classification helpers
// ---------------------------------------------------------------------------

/// Navigation-or-boilerplate test per the cleanup rules.
fn is_navigation(el: ElementRef<'_>) -> bool {
    let tag = el.value().name();
    if matches!(tag, "nav" | "header" | "footer" | "aside") {
        return true;
    }

    if let Some(role) = el.value().attr("role") {
        if matches!(role, "navigation" | "banner" | "contentinfo") {
            return true;
        }
    }

    let class_id = class_id(el);
    if NAV_TOKENS.iter().any(|token| class_id.contains(token)) {
        return true;
    }

    let text = element_text(el);
    let text_len = text.trim().len();
    if text_len > 20 {
        let ratio = link_text_len(el) as f64 / text_len as f64;
        if ratio > 0.5 {
            return true;
        }
    }

    false
}

/// Author/byline exception: these blocks are always preserved.
fn is_author_content(el: ElementRef<'_>) -> bool {
    let class_id = class_id(el);
    if AUTHOR_TOKENS.iter().any(|token| class_id.contains(token)) {
        return true;
    }

    let text = element_text(el);
    let lower = text.to_lowercase();
    if lower.contains("about the author") {
        return true;
    }

    // "By Jane Doe" style bylines
    static BYLINE: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        regex::Regex::new(r"(?m)^\s*[Bb]y\s+[A-Z][a-z]+").expect("byline regex")
    });
    BYLINE.is_match(text.trim())
}

fn is_framework_wrapper(el: ElementRef<'_>) -> bool {
    let id = el.value().attr("id").unwrap_or("");
    matches!(id, "__nuxt" | "__next" | "root" | "app") || el.value().name() == "app-root"
}

// ---------------------------------------------------------------------------
// DOM helpers
// ---------------------------------------------------------------------------

fn select_first<'a>(doc: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel).next()
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

fn class_id(el: ElementRef<'_>) -> String {
    let class = el.value().attr("class").unwrap_or("");
    let id = el.value().attr("id").unwrap_or("");
    format!("{class} {id}").to_lowercase()
}

fn count_descendants(el: ElementRef<'_>, selector: &str) -> usize {
    let Ok(sel) = Selector::parse(selector) else {
        return 0;
    };
    el.select(&sel).count()
}

fn link_text_len(el: ElementRef<'_>) -> usize {
    let Ok(sel) = Selector::parse("a") else {
        return 0;
    };
    el.select(&sel)
        .map(|a| a.text().collect::<String>().trim().len())
        .sum()
}

fn has_block_children(el: ElementRef<'_>) -> bool {
    el.children().filter_map(ElementRef::wrap).any(|c| {
        matches!(
            c.value().name(),
            "p" | "div" | "section" | "article" | "ul" | "ol" | "table" | "pre" | "blockquote"
                | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
        )
    })
}

fn has_image_with_src(el: ElementRef<'_>) -> bool {
    if el.value().name() == "img" && el.value().attr("src").is_some() {
        return true;
    }
    let Ok(sel) = Selector::parse("img[src]") else {
        return false;
    };
    el.select(&sel).next().is_some()
}

/// Build a CSS-like path for the trace, e.g. `body > div.page > nav#topnav`.
fn selector_path(el: ElementRef<'_>) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = Some(el);

    while let Some(node) = current {
        let value = node.value();
        let mut part = value.name().to_string();
        if let Some(id) = value.attr("id") {
            if !id.is_empty() {
                part.push('#');
                part.push_str(id);
            }
        } else if let Some(class) = value.attr("class") {
            if let Some(first) = class.split_whitespace().next() {
                part.push('.');
                part.push_str(first);
            }
        }
        parts.push(part);

        if value.name() == "body" || value.name() == "html" {
            break;
        }
        current = node.parent().and_then(ElementRef::wrap);
    }

    parts.reverse();
    parts.join(" > ")
}

/// Whitespace-collapsed, lowercased block text for the dedup key.
fn normalize_block_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// HTML void elements that take no closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Serialize the chosen element's subtree, skipping removed nodes.
fn serialize_cleaned(el: ElementRef<'_>, removed: &HashSet<NodeId>) -> String {
    let mut out = String::new();
    write_node(el, removed, &mut out);
    out
}

fn write_node(el: ElementRef<'_>, removed: &HashSet<NodeId>, out: &mut String) {
    if removed.contains(&el.id()) {
        return;
    }

    let value = el.value();
    let name = value.name();

    out.push('<');
    out.push_str(name);
    for (attr, attr_value) in value.attrs() {
        out.push(' ');
        out.push_str(attr);
        out.push_str("=\"");
        out.push_str(&escape_attr(attr_value));
        out.push('"');
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&name) {
        return;
    }

    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            write_node(child_el, removed, out);
        } else if let Some(text) = child.value().as_text() {
            out.push_str(&escape_text(text));
        }
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}
