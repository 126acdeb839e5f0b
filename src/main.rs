//! # Ragline CLI (`ragline`)
//!
//! ## Usage
//!
//! ```bash
//! ragline --config ./config/ragline.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragline serve` | Start the HTTP API |
//! | `ragline search <file> "<query>"` | Index a file and print matching passages |
//! | `ragline ask <file> "<question>"` | Index a file and stream an answer |
//! | `ragline check-config` | Validate the config file and print the effective settings |
//!
//! Without a config file, `serve`, `search`, and `ask` run on built-in
//! defaults; `check-config` fails.
//!
//! ## Examples
//!
//! ```bash
//! # Start the server (clients send their key in X-API-Key)
//! ragline serve
//!
//! # One-off retrieval with a lower threshold
//! OPENAI_API_KEY=sk-... ragline search ./q3-report.pdf "operating margin" --threshold 0.4
//!
//! # Ask a question about a document
//! ragline --api-key sk-... ask ./q3-report.pdf "How did revenue change?"
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ragline::config;
use ragline::SessionKey;

/// Ragline: upload documents, then query and chat over them.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "ragline",
    about = "Upload documents, then query and chat over them with retrieval-augmented generation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragline.toml")]
    config: PathBuf,

    /// Provider API key for the one-shot commands.
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Index a file, then print the passages that best match a query.
    Search {
        /// A .pdf, .txt, or .md file.
        file: PathBuf,

        /// Search query.
        query: String,

        /// Maximum number of results (defaults to `[retrieval].query_limit`).
        #[arg(long)]
        limit: Option<i64>,

        /// Minimum similarity score (defaults to `[retrieval].query_score_threshold`).
        #[arg(long, allow_negative_numbers = true)]
        threshold: Option<f32>,
    },

    /// Index a file, then stream an answer grounded in it.
    Ask {
        /// A .pdf, .txt, or .md file.
        file: PathBuf,

        /// The question to answer.
        question: String,

        /// Completion model (defaults to `[generation].model`).
        #[arg(long)]
        model: Option<String>,
    },

    /// Validate the config file and print the effective settings.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    ragline::telemetry::init_tracing()?;

    // check-config must not fall back to defaults.
    let cfg = match cli.command {
        Commands::CheckConfig => config::load_config(&cli.config)?,
        _ => config::load_or_default(&cli.config)?,
    };

    match cli.command {
        Commands::Serve => {
            ragline::server::run_server(&cfg).await?;
        }
        Commands::Search {
            file,
            query,
            limit,
            threshold,
        } => {
            let key = require_key(cli.api_key)?;
            ragline::search::run_search(&cfg, key, &file, &query, limit, threshold).await?;
        }
        Commands::Ask {
            file,
            question,
            model,
        } => {
            let key = require_key(cli.api_key)?;
            ragline::ask::run_ask(&cfg, key, &file, &question, model.as_deref()).await?;
        }
        Commands::CheckConfig => {
            println!("Config OK: {}", cli.config.display());
            println!("  bind:          {}", cfg.server.bind);
            println!(
                "  embedding:     {} ({})",
                cfg.embedding.provider, cfg.embedding.model
            );
            println!("  generation:    {}", cfg.generation.model);
            println!(
                "  chunking:      {} tokens, {:.0}% overlap",
                cfg.chunking.chunk_size,
                cfg.chunking.chunk_overlap * 100.0
            );
            println!(
                "  query:         limit {}, threshold {}",
                cfg.retrieval.query_limit, cfg.retrieval.query_score_threshold
            );
            println!(
                "  chat:          limit {}, threshold {}",
                cfg.retrieval.chat_limit, cfg.retrieval.chat_score_threshold
            );
        }
    }

    Ok(())
}

fn require_key(api_key: Option<String>) -> anyhow::Result<SessionKey> {
    match api_key.filter(|k| !k.trim().is_empty()) {
        Some(key) => Ok(SessionKey::new(key.trim())),
        None => anyhow::bail!("An API key is required: pass --api-key or set OPENAI_API_KEY"),
    }
}
