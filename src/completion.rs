//! # Shell Completion Module
//!
//! This module provides shell completion functionality for Muse DJ, including:
//! - Generation of completion scripts for various shells
//! - Custom completion of `recommend --genre` from the catalog
//!
//! ## Usage
//!
//! ```bash
//! # Generate bash completions
//! muse-dj completion bash > ~/.local/share/bash-completion/completions/muse-dj
//!
//! # Genre-aware completions
//! muse-dj completion-enhanced fish > ~/.config/fish/completions/muse-dj.fish
//! ```

use crate::catalog::Catalog;
use crate::config::RuntimeConfig;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io;

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

/// Enhanced fish completion script with genre completion
pub fn generate_enhanced_fish_completion() {
    println!(r#"# Enhanced Muse DJ completion script for Fish shell with genre completion
# Install with: muse-dj completion-enhanced fish > ~/.config/fish/completions/muse-dj.fish

function __muse_dj_complete_genres
    if command -sq muse-dj
        muse-dj complete-genres 2>/dev/null
    end
end

complete -c muse-dj -e

complete -c muse-dj -s h -l help -d 'Print help information'
complete -c muse-dj -s V -l version -d 'Print version information'
complete -c muse-dj -l config -r -d 'Path to config.json'
complete -c muse-dj -l catalog -r -d 'Catalog CSV'
complete -c muse-dj -l db -r -d 'Listening library database'

complete -c muse-dj -f -n '__fish_is_first_token' -a 'chat' -d 'Start an interactive conversation'
complete -c muse-dj -f -n '__fish_is_first_token' -a 'ask' -d 'Process a single utterance'
complete -c muse-dj -f -n '__fish_is_first_token' -a 'recommend' -d 'Recommend songs from the catalog'
complete -c muse-dj -f -n '__fish_is_first_token' -a 'classify' -d 'Show the route of an utterance'
complete -c muse-dj -f -n '__fish_is_first_token' -a 'index-info' -d 'Print embedding index dimensions'
complete -c muse-dj -f -n '__fish_is_first_token' -a 'record' -d 'Record a play'
complete -c muse-dj -f -n '__fish_is_first_token' -a 'init-db' -d 'Initialize the listening library'
complete -c muse-dj -f -n '__fish_is_first_token' -a 'completion' -d 'Generate shell completions'
complete -c muse-dj -f -n '__fish_is_first_token' -a 'completion-enhanced' -d 'Generate enhanced shell completions'

complete -c muse-dj -f -n '__fish_seen_subcommand_from chat' -l session -r -d 'Session key'
complete -c muse-dj -f -n '__fish_seen_subcommand_from ask' -s v -l verbose -d 'Print route and calls'
complete -c muse-dj -f -n '__fish_seen_subcommand_from recommend' -s n -l count -r -d 'Number of songs'
complete -c muse-dj -f -n '__fish_seen_subcommand_from recommend' -s g -l genre -r -a '(__muse_dj_complete_genres)' -d 'Genre'
complete -c muse-dj -f -n '__fish_seen_subcommand_from recommend' -l json -d 'Print the JSON report'
complete -c muse-dj -f -n '__fish_seen_subcommand_from record' -l genre -r -a '(__muse_dj_complete_genres)' -d 'Genre'
complete -c muse-dj -f -n '__fish_seen_subcommand_from record' -l skipped -d 'The song was skipped'
complete -c muse-dj -f -n '__fish_seen_subcommand_from record' -l loved -d 'Mark as loved'
complete -c muse-dj -f -n '__fish_seen_subcommand_from init-db' -l force -d 'Force overwrite existing database'
complete -c muse-dj -f -n '__fish_seen_subcommand_from completion completion-enhanced' -a 'bash zsh fish power-shell elvish'
"#);
}

/// Enhanced bash completion script with genre completion
pub fn generate_enhanced_bash_completion() {
    println!(r#"#!/bin/bash
# Enhanced Muse DJ completion script with genre completion
# Install with: muse-dj completion-enhanced bash > ~/.local/share/bash-completion/completions/muse-dj

_muse_dj() {{
    local cur prev words cword
    _init_completion || return

    case "${{prev}}" in
        --genre|-g)
            mapfile -t COMPREPLY < <(muse-dj complete-genres 2>/dev/null | grep -i "^${{cur}}")
            return 0
            ;;
        completion|completion-enhanced)
            COMPREPLY=($(compgen -W "bash zsh fish power-shell elvish" -- "${{cur}}"))
            return 0
            ;;
        --config|--catalog|--db)
            _filedir
            return 0
            ;;
    esac

    local subcommands="chat ask recommend classify index-info record init-db completion completion-enhanced help"

    if [[ $cword -eq 1 ]]; then
        COMPREPLY=($(compgen -W "$subcommands --config --catalog --db --help --version" -- "${{cur}}"))
    else
        case "${{words[1]}}" in
            chat)
                COMPREPLY=($(compgen -W "--session --help" -- "${{cur}}"))
                ;;
            ask)
                COMPREPLY=($(compgen -W "--verbose -v --help" -- "${{cur}}"))
                ;;
            recommend)
                COMPREPLY=($(compgen -W "--count -n --genre -g --json --help" -- "${{cur}}"))
                ;;
            record)
                COMPREPLY=($(compgen -W "--album --genre --skipped --loved --help" -- "${{cur}}"))
                ;;
            init-db)
                COMPREPLY=($(compgen -W "--force --help" -- "${{cur}}"))
                ;;
            *)
                COMPREPLY=($(compgen -W "$subcommands" -- "${{cur}}"))
                ;;
        esac
    fi
}} &&
complete -F _muse_dj muse-dj

# ex: filetype=sh
"#);
}

/// Convert our Shell enum to clap_complete's Shell enum
#[must_use]
pub fn shell_to_completion_shell(shell: crate::cli::Shell) -> CompletionShell {
    match shell {
        crate::cli::Shell::Bash => CompletionShell::Bash,
        crate::cli::Shell::Zsh => CompletionShell::Zsh,
        crate::cli::Shell::Fish => CompletionShell::Fish,
        crate::cli::Shell::PowerShell => CompletionShell::PowerShell,
        crate::cli::Shell::Elvish => CompletionShell::Elvish,
    }
}

/// Genres present in the configured catalog, sorted.
///
/// Missing or unreadable catalogs yield no completions.
#[must_use]
pub fn get_genre_completions(config: &RuntimeConfig) -> Vec<String> {
    if !config.catalog_path.exists() {
        return Vec::new();
    }
    match Catalog::load(&config.catalog_path, config.index.max_text_len) {
        Ok(catalog) => catalog.genres(),
        Err(_) => Vec::new(),
    }
}

/// Print genre completions, one per line.
pub fn print_genre_completions(config: &RuntimeConfig) {
    for genre in get_genre_completions(config) {
        println!("{genre}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_shell_conversion() {
        assert_eq!(shell_to_completion_shell(crate::cli::Shell::Bash), CompletionShell::Bash);
        assert_eq!(shell_to_completion_shell(crate::cli::Shell::Zsh), CompletionShell::Zsh);
    }

    #[test]
    fn test_genre_completions_missing_catalog() {
        let temp = TempDir::new().unwrap();
        let config = RuntimeConfig::default().with_catalog_path(temp.path().join("missing.csv"));
        assert!(get_genre_completions(&config).is_empty());
    }

    #[test]
    fn test_genre_completions_from_catalog() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalog.csv");
        fs::write(
            &path,
            "track_id,track_name,artists,track_genre\nt1,So What,Miles Davis,jazz\nt2,Creep,Radiohead,rock\n",
        )
        .unwrap();
        let config = RuntimeConfig::default().with_catalog_path(path);
        assert_eq!(get_genre_completions(&config), vec!["jazz", "rock"]);
    }
}
