//! # Command-Line Interface Module
//!
//! This module defines the command-line interface for Muse DJ using Clap derive
//! macros. It provides a type-safe way to parse command-line arguments and
//! route them to the conversation core.
//!
//! ## Commands
//!
//! - `chat`: Interactive conversation on stdin/stdout
//! - `ask`: Process a single utterance and print the reply
//! - `recommend`: Query the recommendation engine directly
//! - `classify`: Show which route an utterance takes
//! - `index-info`: Build the embedding index and print its shape
//! - `record`: Add a play to the listening library
//! - `init-db`: Create the listening library
//!
//! ## Examples
//!
//! ```bash
//! muse-dj chat
//! muse-dj ask "what are my top tracks this month"
//! muse-dj recommend "songs like Imagine by John Lennon" --count 5
//! muse-dj record "So What" "Miles Davis" --genre jazz --loved
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
///
/// Global options locate the config file and catalog; everything else is
/// accessed through a subcommand.
#[derive(Parser)]
#[command(name = "muse-dj")]
#[command(about = "Muse DJ: a conversational music assistant over your own listening data")]
#[command(version)]
pub struct Args {
    /// Path to config.json (defaults to the data directory)
    #[arg(long, global = true, env = "MUSE_DJ_CONFIG", value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Catalog CSV the embedding index is built from
    #[arg(long, global = true, env = "MUSE_DJ_CATALOG", value_hint = clap::ValueHint::FilePath)]
    pub catalog: Option<PathBuf>,

    /// Listening library database
    #[arg(long, global = true, env = "MUSE_DJ_DB", value_hint = clap::ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Start an interactive conversation
    ///
    /// Reads one utterance per line from stdin and prints each reply.
    /// Type `exit` or `quit` (or send EOF) to leave.
    Chat {
        /// Session key; conversations with the same key share history
        #[arg(long, default_value = "local")]
        session: String,
    },

    /// Process a single utterance and print the reply
    Ask {
        /// What to ask, e.g. "what are my top tracks"
        #[arg(required = true, value_hint = clap::ValueHint::Other)]
        utterance: Vec<String>,

        /// Print the route and executed capability calls as well
        #[arg(short, long)]
        verbose: bool,
    },

    /// Recommend songs from the catalog without the language model
    ///
    /// Accepts free descriptions ("chill acoustic songs") as well as
    /// song-anchored queries ("songs like Imagine by John Lennon").
    Recommend {
        /// Description or "songs like <title> by <artist>"
        #[arg(value_hint = clap::ValueHint::Other)]
        query: String,

        /// Number of songs to return
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,

        /// Restrict results to a genre
        #[arg(short, long)]
        genre: Option<String>,

        /// Print the JSON report instead of a list
        #[arg(long)]
        json: bool,
    },

    /// Show the route an utterance is classified to
    Classify {
        /// Utterance to classify
        #[arg(required = true)]
        utterance: Vec<String>,
    },

    /// Build the embedding index and print its dimensions
    IndexInfo,

    /// Record a play in the listening library
    Record {
        /// Song title
        title: String,

        /// Artist name
        artist: String,

        /// Album name
        #[arg(long)]
        album: Option<String>,

        /// Genre, used for the listening summary
        #[arg(long)]
        genre: Option<String>,

        /// The song was skipped rather than listened to
        #[arg(long)]
        skipped: bool,

        /// Mark the song as loved
        #[arg(long)]
        loved: bool,
    },

    /// Initialize the listening library
    ///
    /// Creates the SQLite database in the data directory (or at `--db`).
    InitDb {
        /// Force overwrite existing database
        ///
        /// Without this flag, init-db will fail if the database exists.
        #[arg(long)]
        force: bool,
    },

    /// Generate shell completions
    ///
    /// Usage: muse-dj completion bash > ~/.local/share/bash-completion/completions/muse-dj
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// Generate enhanced completion with genre name completion
    ///
    /// Currently bash and fish are supported.
    CompletionEnhanced {
        /// Shell to generate enhanced completions for
        shell: Shell,
    },

    /// List catalog genres for completion (hidden command)
    #[command(hide = true)]
    CompleteGenres,
}

impl Args {
    /// Joined utterance words of `ask`/`classify`.
    #[must_use]
    pub fn join_words(words: &[String]) -> String {
        words.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_recommend() {
        let args = Args::parse_from(["muse-dj", "recommend", "chill jazz", "-n", "3", "--genre", "jazz"]);
        match args.command {
            Command::Recommend { query, count, genre, json } => {
                assert_eq!(query, "chill jazz");
                assert_eq!(count, 3);
                assert_eq!(genre.as_deref(), Some("jazz"));
                assert!(!json);
            }
            _ => panic!("expected recommend"),
        }
    }

    #[test]
    fn test_ask_joins_words() {
        let args = Args::parse_from(["muse-dj", "ask", "what", "are", "my", "top", "tracks"]);
        match args.command {
            Command::Ask { utterance, verbose } => {
                assert_eq!(Args::join_words(&utterance), "what are my top tracks");
                assert!(!verbose);
            }
            _ => panic!("expected ask"),
        }
    }
}
