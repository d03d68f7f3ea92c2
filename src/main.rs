//! # Muse DJ - Conversational Music Assistant
//!
//! Muse DJ answers questions about your own listening, recommends songs from a
//! local catalog and looks up music facts, routing every turn through a fixed
//! set of capabilities so that answers are grounded in data.
//!
//! ## Architecture
//!
//! - `classifier`: routes each utterance (personal data, similarity, open domain, ...)
//! - `orchestrator`: the per-turn state machine around the language model
//! - `capabilities`: the operations the model may call
//! - `recommend` / `index`: embedding-based song recommendations
//! - `db`: SQLite listening library
//! - `services`: builds and injects everything above
//!
//! ## Usage
//!
//! ```bash
//! # Create the listening library and record some plays
//! muse-dj init-db
//! muse-dj record "So What" "Miles Davis" --genre jazz
//!
//! # Talk to it
//! muse-dj ask "what are my top tracks"
//! muse-dj chat
//!
//! # Use the recommendation engine directly
//! muse-dj recommend "songs like Imagine by John Lennon" -n 5
//! ```

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use log::{debug, info};
use muse_dj::classifier::classify_detailed;
use muse_dj::cli::{self, Args, Command};
use muse_dj::completion;
use muse_dj::config::RuntimeConfig;
use muse_dj::db::{self, Library, PlayEvent};
use muse_dj::index::EmbeddingIndex;
use muse_dj::recommend::{render_report, RecommendationEngine};
use muse_dj::services::Services;
use muse_dj::session::SessionStore;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

/// Load the config file and apply command-line overrides.
fn load_config(args: &Args) -> Result<RuntimeConfig> {
    let mut config = RuntimeConfig::load(args.config.as_deref())?;
    if let Some(catalog) = &args.catalog {
        config = config.with_catalog_path(catalog.clone());
    }
    if let Some(db) = &args.db {
        config = config.with_db_path(db.clone());
    }
    debug!("Catalog {}, library {}", config.catalog_path.display(), config.db_path.display());
    Ok(config)
}

fn chat(services: &Services, session: &str) -> Result<()> {
    let orchestrator = services.orchestrator();
    let store = SessionStore::new();
    println!("🎧 Muse DJ ({}). Type 'exit' to leave.", services.model.name());

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        stdout.flush().context("Failed to flush stdout")?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).context("Failed to read from stdin")? == 0 {
            break;
        }
        let line = line.trim();
        if matches!(line, "exit" | "quit") {
            break;
        }
        if line.is_empty() {
            continue;
        }

        let outcome = orchestrator.handle(&store, session, line);
        println!("{}\n", outcome.reply);
    }
    Ok(())
}

/// Main entry point for Muse DJ.
///
/// Initializes logging, parses command-line arguments and routes commands.
///
/// # Logging
///
/// Initializes environment logger which can be controlled via `RUST_LOG`:
/// - `RUST_LOG=debug muse-dj ask "..."` - Enable debug logging
/// - `RUST_LOG=muse_dj::orchestrator=debug muse-dj chat` - Watch the state machine
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();
    let config = load_config(&args)?;

    match args.command {
        Command::Chat { session } => {
            let services = Services::from_config(config)?;
            chat(&services, &session)?;
        }
        Command::Ask { utterance, verbose } => {
            let services = Services::from_config(config)?;
            let orchestrator = services.orchestrator();
            let mut session = muse_dj::session::Session::new("cli");
            let outcome = orchestrator.process_turn(&mut session, &Args::join_words(&utterance));

            if verbose {
                println!("route: {}", outcome.route);
                for call in &outcome.calls {
                    println!("call: {} {}", call.name, serde_json::Value::Object(call.args.clone()));
                }
                println!();
            }
            println!("{}", outcome.reply);
        }
        Command::Recommend { query, count, genre, json } => {
            let index = EmbeddingIndex::load(&config.catalog_path, &config.index)?;
            let engine = RecommendationEngine::new(Arc::new(index));
            let candidates = engine.recommend(&query, count, genre.as_deref())?;

            if json {
                println!("{}", render_report(&query, &candidates));
            } else if candidates.is_empty() {
                println!("No recommendations for '{query}'.");
            } else {
                for (i, c) in candidates.iter().enumerate() {
                    let anchor = if c.is_anchor { "  (your pick)" } else { "" };
                    println!("{:>2}. {}  [{:.3}]{anchor}", i + 1, c.label(), c.similarity);
                }
            }
        }
        Command::Classify { utterance } => {
            let classification = classify_detailed(&Args::join_words(&utterance), &[]);
            println!("route:  {}", classification.route);
            println!("reason: {}", classification.reason);
            if let Some(entity) = &classification.entity {
                println!("entity: {entity}");
            }
            if let Some(action) = classification.action {
                println!("action: {action:?}");
            }
        }
        Command::IndexInfo => {
            let index = EmbeddingIndex::load(&config.catalog_path, &config.index)?;
            println!("Catalog:     {}", config.catalog_path.display());
            println!("Entities:    {}", index.len());
            println!("Vocabulary:  {}", index.vocab_size());
            println!(
                "Dimensions:  {} ({} text + {} numeric)",
                index.dim(),
                index.text_dim(),
                index.numeric_dim()
            );
            println!("Attributes:  {}", index.catalog().attribute_names().join(", "));
            println!("Genres:      {}", index.catalog().genres().len());
        }
        Command::Record { title, artist, album, genre, skipped, loved } => {
            let library = Library::open(&config.db_path)?;
            library.record_play(&PlayEvent {
                title: title.clone(),
                artist: artist.clone(),
                album,
                genre,
                skipped,
            })?;
            if loved {
                library.set_loved(&title, &artist, true)?;
            }
            info!("Recorded play of {title} by {artist}");
            println!("Recorded {title} by {artist}{}", if skipped { " (skipped)" } else { "" });
        }
        Command::InitDb { force } => {
            info!("Initializing listening library at {}", config.db_path.display());
            db::init_database(&config.db_path, force)?;
            println!("Listening library ready at {}", config.db_path.display());
        }
        Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(shell), &mut cmd);
        }
        Command::CompletionEnhanced { shell } => match shell {
            cli::Shell::Bash => completion::generate_enhanced_bash_completion(),
            cli::Shell::Fish => completion::generate_enhanced_fish_completion(),
            _ => return Err(anyhow::anyhow!("Enhanced completions only supported for bash and fish")),
        },
        Command::CompleteGenres => {
            completion::print_genre_completions(&config);
        }
    }

    Ok(())
}
