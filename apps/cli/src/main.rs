//! site2rag CLI — crawl a website into RAG-ready Markdown.
//!
//! Fetches a site politely and incrementally, extracts article content,
//! converts it to Markdown with YAML front-matter, and enriches paragraphs
//! with LLM-generated `[[…]]` context annotations.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
