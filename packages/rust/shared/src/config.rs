//! Application configuration for site2rag.
//!
//! User config lives at `~/.site2rag/site2rag.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, Site2RagError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "site2rag.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".site2rag";

/// User-Agent string sent with every outbound request.
pub const USER_AGENT: &str = "site2rag-crawler";

// ---------------------------------------------------------------------------
// Config structs (matching site2rag.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Ollama provider settings.
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Crawl policies.
    #[serde(default)]
    pub crawl_policies: CrawlPoliciesConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default output directory for Markdown files.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Default page limit per crawl.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Default maximum crawl depth (-1 = unlimited).
    #[serde(default = "default_max_depth")]
    pub max_depth: i32,

    /// Default concurrent fetches.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Write `<path-with-underscores>.md` instead of a directory hierarchy.
    #[serde(default)]
    pub flat_output: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            concurrency: default_concurrency(),
            flat_output: false,
        }
    }
}

fn default_output_dir() -> String {
    "./site".into()
}
fn default_max_pages() -> usize {
    100
}
fn default_max_depth() -> i32 {
    -1
}
fn default_concurrency() -> usize {
    5
}

/// `[ollama]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Ollama host base URL.
    #[serde(default = "default_ollama_host")]
    pub host: String,

    /// Default model for enrichment.
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            model: default_model(),
        }
    }
}

fn default_ollama_host() -> String {
    "http://localhost:11434".into()
}
fn default_model() -> String {
    "llama3.2:3b".into()
}

/// `[crawl_policies]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlPoliciesConfig {
    /// URL include glob patterns (leading `!` marks an exclude).
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Minimum ms between requests, measured from the previous request start.
    #[serde(default = "default_politeness_ms")]
    pub politeness_ms: u64,

    /// Restrict the crawl to the seed's registered domain.
    #[serde(default = "default_true")]
    pub same_domain: bool,

    /// Age-filter floor: skip pages fetched more recently than this.
    #[serde(default)]
    pub min_age_hours: Option<u64>,

    /// Age-filter override: re-check pages that also changed this recently.
    #[serde(default)]
    pub fast_recheck_hours: Option<u64>,
}

impl Default for CrawlPoliciesConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            politeness_ms: default_politeness_ms(),
            same_domain: true,
            min_age_hours: None,
            fast_recheck_hours: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_politeness_ms() -> u64 {
    500
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config file + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Page limit for this run.
    pub max_pages: usize,
    /// Maximum link depth from the seed (-1 = unlimited).
    pub max_depth: i32,
    /// Maximum concurrent fetches.
    pub concurrency: usize,
    /// Combined include/exclude glob patterns.
    pub patterns: Vec<String>,
    /// Minimum ms between request starts.
    pub politeness_ms: u64,
    /// Restrict to the seed's registered domain.
    pub same_domain: bool,
    /// Age-filter floor in hours.
    pub min_age_hours: Option<u64>,
    /// Fast-recheck window in hours.
    pub fast_recheck_hours: Option<u64>,
    /// Flat output layout.
    pub flat_output: bool,
    /// Maximum document size in bytes (binaries and HTML alike).
    pub max_body_bytes: u64,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_pages: config.defaults.max_pages,
            max_depth: config.defaults.max_depth,
            concurrency: config.defaults.concurrency,
            patterns: config.crawl_policies.patterns.clone(),
            politeness_ms: config.crawl_policies.politeness_ms,
            same_domain: config.crawl_policies.same_domain,
            min_age_hours: config.crawl_policies.min_age_hours,
            fast_recheck_hours: config.crawl_policies.fast_recheck_hours,
            flat_output: config.defaults.flat_output,
            max_body_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Runtime enrichment configuration.
#[derive(Debug, Clone)]
pub struct EnrichConfig {
    /// Ollama host base URL.
    pub host: String,
    /// Model name.
    pub model: String,
    /// Skip enrichment entirely.
    pub enabled: bool,
}

impl From<&AppConfig> for EnrichConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            host: config.ollama.host.clone(),
            model: config.ollama.model.clone(),
            enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.site2rag/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Site2RagError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.site2rag/site2rag.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| Site2RagError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        Site2RagError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| Site2RagError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| Site2RagError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| Site2RagError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("localhost:11434"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.concurrency, 5);
        assert_eq!(parsed.crawl_policies.politeness_ms, 500);
    }

    #[test]
    fn crawl_config_from_app_config() {
        let app = AppConfig::default();
        let crawl = CrawlConfig::from(&app);
        assert_eq!(crawl.concurrency, 5);
        assert_eq!(crawl.max_pages, 100);
        assert_eq!(crawl.max_depth, -1);
        assert!(crawl.same_domain);
        assert_eq!(crawl.max_body_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn patterns_parse_from_toml() {
        let toml_str = r#"
[crawl_policies]
patterns = ["/docs/**", "!/docs/internal/**"]
politeness_ms = 250
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.crawl_policies.patterns.len(), 2);
        assert_eq!(config.crawl_policies.politeness_ms, 250);
        // Unspecified sections fall back to defaults
        assert_eq!(config.defaults.max_pages, 100);
    }
}
