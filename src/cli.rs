use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::DEFAULT_RAW_HOST;
use crate::fetch::HttpFetcher;
use crate::generate::generate;
use crate::github::RemoteResolver;
use crate::load_config::load_config_with_context;

/// CLI for docmirror: publish a markdown tree as a static site.
#[derive(Parser)]
#[clap(
    name = "docmirror",
    version,
    about = "Mirror a tree of interlinked markdown documents into a rendered site, fetching remote references on demand"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mirror, relink and render the document tree described by the config file
    Generate {
        /// Path to the YAML config file
        #[clap(long, env = "DOCMIRROR_CONFIG")]
        config: PathBuf,
        /// Also write the full run report as JSON to this path
        #[clap(long)]
        report: Option<PathBuf>,
    },
    /// Resolve a repository browse URL to its raw-content URL
    Resolve {
        /// Browse URL, e.g. https://github.com/org/repo/blob/main/README.md
        url: String,
        /// Optional config file supplying the raw-content host
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Generate { config, report } => {
            let config = load_config_with_context(config)?;
            println!("Generate starting...");
            let outcome = generate(&config, Arc::new(HttpFetcher::new()))
                .await
                .context("Generation failed")?;

            println!(
                "Generate complete: {} documents, {} rendered, {} copied, {} rounds, {} fetches.",
                outcome.documents,
                outcome.rendered.len(),
                outcome.copied.len(),
                outcome.rounds,
                outcome.fetches
            );
            let diagnostics = &outcome.diagnostics;
            if !diagnostics.is_clean() {
                println!("Unresolved links:");
                println!("{}", serde_json::to_string_pretty(diagnostics)?);
            }

            if let Some(path) = report {
                let json = serde_json::to_vec_pretty(&outcome)?;
                std::fs::write(&path, json)
                    .with_context(|| format!("Failed to write report {}", path.display()))?;
                println!("Report written to {}", path.display());
            }
            Ok(())
        }
        Commands::Resolve { url, config } => {
            let raw_host = match config {
                Some(path) => load_config_with_context(path)?.raw_host,
                None => std::env::var("DOCMIRROR_RAW_HOST")
                    .ok()
                    .filter(|h| !h.is_empty())
                    .unwrap_or_else(|| DEFAULT_RAW_HOST.to_string()),
            };
            let resolver = RemoteResolver::new(Arc::new(HttpFetcher::new()), raw_host);
            let resolution = resolver
                .resolve(&url, None)
                .await
                .with_context(|| format!("Could not resolve {url}"))?;
            println!("raw: {}", resolution.raw);
            println!("resolved: {}", resolution.resolved);
            Ok(())
        }
    }
}
