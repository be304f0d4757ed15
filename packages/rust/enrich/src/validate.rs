//! The enrichment preservation invariant.
//!
//! An enhanced paragraph is valid iff removing its `[[…]]` annotations (and
//! their leading whitespace) yields the original paragraph under a fixed
//! normalization: whitespace collapse, lowercasing, a terminology table for
//! Bahá'í-family terms, accent folding, and apostrophe unification.

use std::sync::LazyLock;

use regex::Regex;

/// `[[…]]` spans plus the whitespace that introduced them.
static ANNOTATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\[\[[^\]]*\]\]").expect("annotation regex"));

/// Terminology normalization applied after accent/apostrophe folding.
/// Maps every variant spelling to one canonical token.
const TERMINOLOGY: &[(&str, &str)] = &[
    ("baha'u'llah", "bahaullah"),
    ("'abdu'l-baha", "abdulbaha"),
    ("abdu'l-baha", "abdulbaha"),
    ("abdul-baha", "abdulbaha"),
    ("baha'i", "bahai"),
];

/// Remove all annotations and the whitespace that precedes them.
pub fn strip_annotations(text: &str) -> String {
    ANNOTATION_RE.replace_all(text, "").to_string()
}

/// Whether an enhanced paragraph preserves the original text exactly, up to
/// annotations and the normalization rules.
pub fn is_preserved(original: &str, enhanced: &str) -> bool {
    normalize(&strip_annotations(enhanced)) == normalize(original)
}

/// Normalization pipeline shared by both sides of the comparison.
pub fn normalize(text: &str) -> String {
    let folded: String = text.chars().map(fold_char).collect();
    let lowered = folded.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    apply_terminology(&collapsed)
}

/// Map accented vowels and all apostrophe variants onto ASCII.
fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'Á' | 'À' | 'Â' | 'Ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'Ó' | 'Ò' | 'Ô' | 'Ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
        '\u{2019}' | '\u{2018}' | '`' | '\u{02BC}' | '\u{02BB}' => '\'',
        other => other,
    }
}

fn apply_terminology(text: &str) -> String {
    let mut result = text.to_string();
    for (variant, canonical) in TERMINOLOGY {
        result = result.replace(variant, canonical);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_annotations_and_leading_whitespace() {
        assert_eq!(
            strip_annotations("He [[John Smith]] visited the capital [[Paris]]."),
            "He visited the capital."
        );
        assert_eq!(strip_annotations("No annotations here."), "No annotations here.");
    }

    #[test]
    fn valid_enhancement_is_accepted() {
        let original = "He visited the capital.";
        let enhanced = "He [[John Smith]] visited the capital [[Paris]].";
        assert!(is_preserved(original, enhanced));
    }

    #[test]
    fn rewritten_text_is_rejected() {
        let original = "He visited the capital.";
        let enhanced = "He visited the city.";
        assert!(!is_preserved(original, enhanced));
    }

    #[test]
    fn changed_punctuation_is_rejected() {
        let original = "He visited the capital.";
        let enhanced = "He [[John Smith]] visited the capital!";
        assert!(!is_preserved(original, enhanced));
    }

    #[test]
    fn unicode_apostrophes_are_equivalent() {
        let original = "It\u{2019}s the community\u{2019}s view.";
        let enhanced = "It's the community's [[the Bah\u{e1}'\u{ed} community's]] view.";
        assert!(is_preserved(original, enhanced));
    }

    #[test]
    fn accented_letters_fold() {
        let original = "Caf\u{e9} R\u{ed}o is open.";
        let enhanced = "Cafe [[in Lima]] Rio is open.";
        assert!(is_preserved(original, enhanced));
    }

    #[test]
    fn bahai_terms_unify_across_spellings() {
        let original = "Bah\u{e1}\u{2019}u\u{2019}ll\u{e1}h addressed the Bah\u{e1}\u{2019}\u{ed} community.";
        let enhanced = "Baha'u'llah [[the founder]] addressed the Baha'i community.";
        assert!(is_preserved(original, enhanced));

        let original2 = "\u{2018}Abdu\u{2019}l-Bah\u{e1} traveled west.";
        let enhanced2 = "'Abdu'l-Baha [[His son]] traveled west.";
        assert!(is_preserved(original2, enhanced2));
    }

    #[test]
    fn markdown_links_and_images_survive_comparison() {
        let original = "See [the letter](https://example.com/letter.pdf) and ![seal](/img/seal.png).";
        let enhanced =
            "See [the letter](https://example.com/letter.pdf) [[from 1912]] and ![seal](/img/seal.png).";
        assert!(is_preserved(original, enhanced));
    }

    #[test]
    fn altered_link_target_is_rejected() {
        let original = "See [the letter](https://example.com/letter.pdf).";
        let enhanced = "See [the letter](https://example.com/other.pdf) [[from 1912]].";
        assert!(!is_preserved(original, enhanced));
    }

    #[test]
    fn whitespace_differences_inside_text_are_tolerated() {
        let original = "One  two\nthree.";
        let enhanced = "One two three. [[context]]";
        assert!(is_preserved(original, enhanced));
    }

    #[test]
    fn normalize_is_idempotent() {
        for text in [
            "Plain text.",
            "Bah\u{e1}\u{2019}\u{ed} terms and caf\u{e9}s.",
            "  spaced   out  ",
        ] {
            let once = normalize(text);
            assert_eq!(normalize(&once), once);
        }
    }
}
