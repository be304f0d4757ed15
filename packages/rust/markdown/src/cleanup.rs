//! Post-conversion cleanup pipeline for Markdown output.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence:
//! blank-line collapsing, code-fence language repair, link rewriting, and
//! whitespace normalization.

use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use url::Url;

/// Link targets whose relative paths are preserved for local mirroring.
const KEEP_RELATIVE_EXTENSIONS: &[&str] = &[".pdf", ".docx"];

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut result = md.to_string();

    result = clean_blank_lines(&result);
    result = fix_code_block_languages(&result);
    result = rewrite_links(&result, base_url);
    result = normalize_whitespace(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Clean up excessive blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of 3+ blank lines into exactly 2.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{4,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Pass 2: Fix code block language hints
// ---------------------------------------------------------------------------

/// Strip class-style prefixes from fence languages (`language-js` → `js`).
fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^```(?:language-|lang-|highlight-)(\w+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "```$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Rewrite links
// ---------------------------------------------------------------------------

/// Apply the link rules to every `[text](url)`:
/// - whitespace in the link text is collapsed
/// - relative targets are resolved against the base URL, except `.pdf` and
///   `.docx` targets, which keep their relative paths
/// - URLs are percent-decoded where the decoded form is valid UTF-8
///
/// Image links (`![alt](url)`) are left untouched.
fn rewrite_links(md: &str, base_url: Option<&Url>) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)]+)\)").expect("valid regex"));

    LINK_RE
        .replace_all(md, |caps: &regex::Captures| {
            let full_match = caps.get(0).unwrap();
            let text = &caps[1];
            let href = &caps[2];

            // Image ![alt](url): alt text and target are untouchable
            let start = full_match.start();
            if start > 0 && md.as_bytes()[start - 1] == b'!' {
                return caps[0].to_string();
            }

            let text = collapse_whitespace(text);

            // Anchors and mail links pass through
            if href.starts_with('#') || href.starts_with("mailto:") {
                return format!("[{text}]({href})");
            }

            // Document targets keep their relative form
            let href_lower = href.to_ascii_lowercase();
            if KEEP_RELATIVE_EXTENSIONS
                .iter()
                .any(|ext| href_lower.ends_with(ext))
                && !href_lower.starts_with("http")
            {
                return format!("[{text}]({})", decode_url(href));
            }

            let resolved = if href.starts_with("http://") || href.starts_with("https://") {
                href.to_string()
            } else {
                match base_url {
                    Some(base) => match base.join(href) {
                        Ok(resolved) => resolved.to_string(),
                        Err(_) => href.to_string(),
                    },
                    None => href.to_string(),
                }
            };

            format!("[{text}]({})", decode_url(&resolved))
        })
        .to_string()
}

/// Percent-decode a URL when the decoded form is valid UTF-8 and contains no
/// characters that would break the Markdown link syntax.
fn decode_url(url: &str) -> String {
    match percent_decode_str(url).decode_utf8() {
        Ok(decoded) => {
            let decoded = decoded.into_owned();
            if decoded.contains(['(', ')', ' ']) {
                url.to_string()
            } else {
                decoded
            }
        }
        Err(_) => url.to_string(),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Pass 4: Normalize whitespace
// ---------------------------------------------------------------------------

/// Trim trailing whitespace on every line.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 5: Ensure trailing newline
// ---------------------------------------------------------------------------

/// Ensure the file ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://docs.example.com/guide/intro").unwrap()
    }

    #[test]
    fn clean_blank_lines_collapses_excess() {
        let input = "Line 1\n\n\n\n\nLine 2";
        assert_eq!(clean_blank_lines(input), "Line 1\n\n\nLine 2");
    }

    #[test]
    fn fix_code_block_languages_strips_prefix() {
        let input = "```language-javascript\nconsole.log('hi');\n```";
        assert!(fix_code_block_languages(input).starts_with("```javascript"));
    }

    #[test]
    fn fix_code_block_languages_keeps_plain() {
        let input = "```rust\nfn main() {}\n```";
        assert_eq!(fix_code_block_languages(input), input);
    }

    #[test]
    fn links_absolute_untouched() {
        let input = "[Link](https://other.com/page)";
        assert_eq!(
            rewrite_links(input, Some(&base())),
            "[Link](https://other.com/page)"
        );
    }

    #[test]
    fn links_relative_resolved() {
        let input = "[Next](/api/reference)";
        assert_eq!(
            rewrite_links(input, Some(&base())),
            "[Next](https://docs.example.com/api/reference)"
        );
    }

    #[test]
    fn links_anchor_untouched() {
        let input = "[Section](#section-1)";
        assert_eq!(rewrite_links(input, Some(&base())), "[Section](#section-1)");
    }

    #[test]
    fn link_text_whitespace_is_collapsed() {
        let input = "[Read\n   the   guide](/guide)";
        assert_eq!(
            rewrite_links(input, Some(&base())),
            "[Read the guide](https://docs.example.com/guide)"
        );
    }

    #[test]
    fn pdf_and_docx_targets_stay_relative() {
        let input = "[Report](files/annual-report.pdf) and [Form](forms/intake.docx)";
        let result = rewrite_links(input, Some(&base()));
        assert!(result.contains("(files/annual-report.pdf)"));
        assert!(result.contains("(forms/intake.docx)"));
    }

    #[test]
    fn absolute_pdf_targets_are_kept_absolute() {
        let input = "[Report](https://example.com/annual-report.pdf)";
        let result = rewrite_links(input, Some(&base()));
        assert!(result.contains("(https://example.com/annual-report.pdf)"));
    }

    #[test]
    fn urls_are_percent_decoded_when_safe() {
        let input = "[Caf\u{e9}](https://example.com/caf%C3%A9)";
        assert_eq!(
            rewrite_links(input, Some(&base())),
            "[Caf\u{e9}](https://example.com/caf\u{e9})"
        );
    }

    #[test]
    fn urls_with_encoded_spaces_stay_encoded() {
        let input = "[Doc](https://example.com/my%20file)";
        assert_eq!(
            rewrite_links(input, Some(&base())),
            "[Doc](https://example.com/my%20file)"
        );
    }

    #[test]
    fn image_links_are_untouched() {
        let input = "![alt   text](/images/pic%20name.png)";
        assert_eq!(rewrite_links(input, Some(&base())), input);
    }

    #[test]
    fn normalize_whitespace_trims_trailing() {
        let input = "Line 1   \nLine 2\t\nLine 3";
        assert_eq!(normalize_whitespace(input), "Line 1\nLine 2\nLine 3");
    }

    #[test]
    fn ensure_trailing_newline_normalizes() {
        assert_eq!(ensure_trailing_newline("Content"), "Content\n");
        assert_eq!(ensure_trailing_newline("Content\n\n\n"), "Content\n");
    }

    #[test]
    fn full_pipeline() {
        let input = "# Title\n\n\n\n\n\n```language-python\nprint('hi')\n```\n\n[a   link](/x)\n\n\n";
        let result = run_pipeline(input, Some(&base()));

        assert!(!result.contains("\n\n\n\n"));
        assert!(result.contains("```python"));
        assert!(result.contains("[a link](https://docs.example.com/x)"));
        assert!(result.ends_with('\n'));
    }
}
