//! YAML front-matter emission.
//!
//! Serializes an ordered list of key/value entries into the `---`-fenced
//! block prepended to every page file. Values are quoted when they contain
//! YAML-significant characters, arrays become sequences, and nested objects
//! become one level of indented mappings.

/// A front-matter value.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontmatterValue {
    /// A scalar string.
    Text(String),
    /// A YAML sequence.
    List(Vec<String>),
    /// One level of nested mapping.
    Map(Vec<(String, String)>),
}

impl From<String> for FrontmatterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for FrontmatterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<String>> for FrontmatterValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// Render entries as a `---`-fenced YAML block, preserving entry order.
///
/// Empty strings, empty lists, and empty maps are skipped.
pub fn render(entries: &[(&str, FrontmatterValue)]) -> String {
    let mut out = String::from("---\n");

    for (key, value) in entries {
        match value {
            FrontmatterValue::Text(text) => {
                if text.is_empty() {
                    continue;
                }
                out.push_str(key);
                out.push_str(": ");
                out.push_str(&render_scalar(text));
                out.push('\n');
            }
            FrontmatterValue::List(items) => {
                let items: Vec<&String> = items.iter().filter(|i| !i.is_empty()).collect();
                if items.is_empty() {
                    continue;
                }
                out.push_str(key);
                out.push_str(":\n");
                for item in items {
                    out.push_str("  - ");
                    out.push_str(&render_scalar(item));
                    out.push('\n');
                }
            }
            FrontmatterValue::Map(pairs) => {
                let pairs: Vec<&(String, String)> =
                    pairs.iter().filter(|(_, v)| !v.is_empty()).collect();
                if pairs.is_empty() {
                    continue;
                }
                out.push_str(key);
                out.push_str(":\n");
                for (nested_key, nested_value) in pairs {
                    out.push_str("  ");
                    out.push_str(nested_key);
                    out.push_str(": ");
                    out.push_str(&render_scalar(nested_value));
                    out.push('\n');
                }
            }
        }
    }

    out.push_str("---\n");
    out
}

/// Quote a scalar when it contains YAML-significant characters, a leading
/// dash, or leading/trailing whitespace.
fn render_scalar(value: &str) -> String {
    if needs_quoting(value) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn needs_quoting(value: &str) -> bool {
    value.chars().any(|c| ":#'\"@[]{}|>".contains(c))
        || value.starts_with('-')
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace)
}
