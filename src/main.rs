//! # eurisk CLI
//!
//! The `eurisk` binary initialises the database, builds the document index,
//! answers and classifies from the command line, and starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! eurisk --config ./config/eurisk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `eurisk init` | Create the SQLite database and run schema migrations |
//! | `eurisk index` | Build the vector index and report counts |
//! | `eurisk ask "<question>"` | Answer a question from the document corpus |
//! | `eurisk classify "<description>"` | Classify an AI system description |
//! | `eurisk files` | List files in the document directory |
//! | `eurisk serve` | Index the documents and start the HTTP server |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use eurisk::context::AppContext;
use eurisk::{config, files, logging, migrate, rag, server};

/// eurisk: EU AI Act risk registry with retrieval-augmented answers.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Missing files fall back to defaults; `.env` and environment
/// variables override either.
#[derive(Parser)]
#[command(name = "eurisk", version, about = "EU AI Act risk registry with retrieval-augmented answers")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/eurisk.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Load, chunk and embed the document directory.
    ///
    /// Unchanged chunks are served from the embedding cache, so a second
    /// run performs no embedding calls.
    Index,

    /// Answer a question from the indexed documents.
    Ask {
        /// The question.
        question: String,
    },

    /// Classify an AI system description against the EU AI Act risk levels.
    Classify {
        /// Free-text description of the system.
        description: String,
    },

    /// List files in the document directory.
    Files,

    /// Build the index and start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
        }
        Commands::Index => {
            let ctx = AppContext::from_config(cfg).await?;
            let stats = ctx.rebuild_index().await?;
            println!("index built");
            println!("  documents: {}", stats.documents);
            println!("  chunks:    {}", stats.chunks);
            println!("  embedded:  {}", stats.embedded);
            println!("  cached:    {}", stats.cached);
        }
        Commands::Ask { question } => {
            let ctx = AppContext::from_config(cfg).await?;
            ctx.rebuild_index().await?;
            let answer = rag::answer(&ctx, &question).await?;
            println!("{}", answer.answer);
            if !answer.context.is_empty() {
                println!();
                println!("Sources:");
                for source in &answer.context {
                    println!("  {}", source);
                }
            }
        }
        Commands::Classify { description } => {
            let ctx = AppContext::from_config(cfg).await?;
            ctx.rebuild_index().await?;
            let assessment = rag::classify(&ctx, &description).await?;
            println!("risk:   {}", assessment.risk);
            println!("reason: {}", assessment.reason);
        }
        Commands::Files => {
            let listing = files::list_files(&cfg.documents.dir)?;
            if listing.is_empty() {
                println!("No files in {}", cfg.documents.dir.display());
            }
            for f in listing {
                println!("{:>10}  {}  {}", f.size, f.last_modified_date, f.filename);
            }
        }
        Commands::Serve => {
            let ctx = Arc::new(AppContext::from_config(cfg).await?);
            // A failed build leaves the server up with an empty index.
            match ctx.rebuild_index().await {
                Ok(stats) => tracing::info!(chunks = stats.chunks, "initial index ready"),
                Err(e) => tracing::error!(error = %format!("{:#}", e), "initial index build failed"),
            }
            server::run_server(ctx).await?;
        }
    }

    Ok(())
}
