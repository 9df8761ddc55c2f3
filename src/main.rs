//! # askbase CLI
//!
//! The `askbase` binary drives the knowledge base: initialization, sync
//! cycles for each intake channel, one-off questions, stats, and the HTTP
//! server.
//!
//! ## Usage
//!
//! ```bash
//! askbase --config ./askbase.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askbase init` | Create the SQLite database and run schema migrations |
//! | `askbase crawl` | Crawl the site and sync changes into the store |
//! | `askbase sync-docs` | Sync the uploaded-document directory |
//! | `askbase sync-meetings` | Sync the meeting transcript directory |
//! | `askbase ask "<question>"` | Answer one question from the terminal |
//! | `askbase stats` | Print corpus and cache statistics |
//! | `askbase purge` | Delete tombstoned pages for good |
//! | `askbase serve` | Start the JSON HTTP API |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use askbase::{config, db, engine::Engine, migrate, server, stats};

/// askbase — a self-synchronizing question answering engine for websites.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/askbase.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "askbase",
    about = "askbase — a self-synchronizing retrieval-augmented QA engine for websites",
    version,
    long_about = "askbase crawls a website (plus uploaded documents and meeting transcripts), \
    keeps an embedded copy of it in SQLite via incremental diffing, and answers questions \
    over that copy with source citations, confidence scoring, and human handoff."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./askbase.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the pages and chunks tables.
    /// Idempotent: running it again is safe.
    Init,

    /// Crawl the configured site and sync changes into the store.
    ///
    /// Incremental by default: only pages whose content hash changed are
    /// re-chunked and re-embedded; vanished pages are tombstoned; failed
    /// fetches are skipped and retried next cycle.
    Crawl {
        /// Bypass diffing and rebuild every crawled page from scratch.
        #[arg(long)]
        full: bool,
    },

    /// Sync the uploaded-document directory ([documents] in config).
    SyncDocs,

    /// Sync the meeting transcript directory ([meetings] in config).
    SyncMeetings,

    /// Answer a single question from the terminal.
    Ask {
        /// The question text.
        question: String,

        /// Answer language: `en` or `fr`.
        #[arg(long)]
        language: Option<String>,
    },

    /// Print corpus and cache statistics.
    Stats,

    /// Permanently delete tombstoned pages.
    Purge,

    /// Start the JSON HTTP API.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// chat, status, and ingest endpoints.
    Serve,
}

fn print_report(report: &askbase::ingest::SyncReport) {
    println!(
        "Sync complete: {} new, {} changed, {} removed, {} unchanged, {} failed ({} chunks written)",
        report.new,
        report.changed,
        report.removed,
        report.unchanged,
        report.failed,
        report.chunks_written
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "askbase=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    // Init doesn't need gateways, so it skips engine assembly
    if matches!(cli.command, Commands::Init) {
        let pool = db::connect(&cfg.db.path).await?;
        migrate::run_migrations(&pool).await?;
        pool.close().await;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let engine = Engine::build(cfg).await?;

    match cli.command {
        Commands::Init => unreachable!(),
        Commands::Crawl { full } => {
            let report = engine.run_crawl(full).await?;
            print_report(&report);
        }
        Commands::SyncDocs => {
            let report = engine.sync_documents().await?;
            print_report(&report);
        }
        Commands::SyncMeetings => {
            let report = engine.sync_meetings().await?;
            print_report(&report);
        }
        Commands::Ask { question, language } => {
            let answer = engine.pipeline.answer(&question, language.as_deref()).await?;
            println!("{}", answer.text);
            println!();
            println!(
                "  topic: {} | confidence: {:.2}{}",
                answer.topic_label,
                answer.confidence,
                if answer.handoff { " | handoff" } else { "" }
            );
            for source in &answer.sources {
                println!("  source: {} ({})", source.title, source.url);
            }
        }
        Commands::Stats => {
            stats::run_stats(&engine).await?;
        }
        Commands::Purge => {
            let deleted = engine.store.purge_removed().await?;
            println!("Purged {} tombstoned page(s).", deleted);
        }
        Commands::Serve => {
            server::run_server(engine).await?;
        }
    }

    Ok(())
}
