//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;

use site2rag_core::{ProcessorConfig, ProgressReporter, RunSummary, SiteProcessor};
use site2rag_shared::{CrawlConfig, EnrichConfig, init_config, load_config};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// site2rag — turn a website into a RAG-ready Markdown corpus.
#[derive(Parser)]
#[command(
    name = "site2rag",
    version,
    about = "Crawl a website into context-enriched Markdown for retrieval.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl a site and build its Markdown corpus.
    Crawl {
        /// Seed URL to crawl from.
        url: String,

        /// Output directory (defaults to ./<hostname>).
        #[arg(short, long)]
        output: Option<String>,

        /// Maximum pages to write this run.
        #[arg(long)]
        max_pages: Option<usize>,

        /// Maximum link depth from the seed (-1 = unlimited).
        #[arg(long)]
        max_depth: Option<i32>,

        /// Concurrent fetches.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Write flat `path_with_underscores.md` files instead of directories.
        #[arg(long)]
        flat: bool,

        /// Follow links beyond the seed's domain.
        #[arg(long)]
        allow_external: bool,

        /// URL patterns (`*`/`**` globs, leading `!` excludes). Repeatable.
        #[arg(long = "pattern")]
        patterns: Vec<String>,

        /// Skip LLM enrichment.
        #[arg(long)]
        no_enrich: bool,

        /// Override the enrichment model.
        #[arg(long)]
        model: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "site2rag=info",
        1 => "site2rag=debug",
        _ => "site2rag=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Crawl {
            url,
            output,
            max_pages,
            max_depth,
            concurrency,
            flat,
            allow_external,
            patterns,
            no_enrich,
            model,
        } => {
            cmd_crawl(
                &url,
                output.as_deref(),
                max_pages,
                max_depth,
                concurrency,
                flat,
                allow_external,
                patterns,
                no_enrich,
                model.as_deref(),
            )
            .await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_crawl(
    url: &str,
    output: Option<&str>,
    max_pages: Option<usize>,
    max_depth: Option<i32>,
    concurrency: Option<usize>,
    flat: bool,
    allow_external: bool,
    patterns: Vec<String>,
    no_enrich: bool,
    model: Option<&str>,
) -> Result<()> {
    let config = load_config()?;

    // Invalid seed aborts the run (exit code 1)
    let seed = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;
    if seed.host_str().is_none() {
        return Err(eyre!("invalid URL '{url}': no host"));
    }

    let output_dir = match output {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(seed.host_str().unwrap_or("site")),
    };

    // CLI flags override config file values
    let mut crawl = CrawlConfig::from(&config);
    if let Some(value) = max_pages {
        crawl.max_pages = value;
    }
    if let Some(value) = max_depth {
        crawl.max_depth = value;
    }
    if let Some(value) = concurrency {
        crawl.concurrency = value;
    }
    if flat {
        crawl.flat_output = true;
    }
    if allow_external {
        crawl.same_domain = false;
    }
    if !patterns.is_empty() {
        crawl.patterns = patterns;
    }

    let mut enrich = EnrichConfig::from(&config);
    if no_enrich {
        enrich.enabled = false;
    }
    if let Some(value) = model {
        enrich.model = value.to_string();
    }

    info!(url, output = %output_dir.display(), "starting site2rag");

    let processor = SiteProcessor::new(ProcessorConfig {
        seed,
        output_dir: output_dir.clone(),
        crawl,
        enrich,
    });

    let reporter = CliProgress::new();
    let summary = processor.run(&reporter).await?;

    println!();
    println!("  Crawl complete!");
    println!("  Pages:     {}", summary.crawl.pages_crawled);
    println!("  Unchanged: {}", summary.crawl.pages_unchanged);
    println!("  Binaries:  {}", summary.crawl.binaries_saved);
    if summary.limit_reached {
        println!("  (stopped at the page limit)");
    }
    println!("  Enriched:  {}", summary.enriched);
    if summary.enrich_failed > 0 {
        println!("  Failed:    {}", summary.enrich_failed);
    }
    println!(
        "  Tokens:    {} (${:.4})",
        summary.tokens.total_tokens(),
        summary.tokens.estimated_cost
    );
    println!("  Output:    {}", output_dir.display());
    println!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn detail(&self, current: usize, total: usize, detail: &str) {
        self.spinner
            .set_message(format!("[{current}/{total}] {detail}"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    let rendered = toml::to_string_pretty(&config)?;
    println!("{rendered}");
    Ok(())
}
