//! # Configuration Module
//!
//! This module handles configuration management and data directory setup for
//! Muse DJ. It provides platform-appropriate data storage locations and an
//! optional `config.json` whose every field has a default.
//!
//! ## Data Storage
//!
//! Muse DJ keeps its files in the platform-standard data directory:
//! - Linux: `~/.local/share/muse-dj/`
//! - macOS: `~/Library/Application Support/muse-dj/`
//! - Windows: `%APPDATA%\muse-dj\`
//!
//! | File | Purpose |
//! |------|---------|
//! | `library.db` | SQLite listening library (plays, loved tracks, follows) |
//! | `catalog.csv` | Song catalog the embedding index is built from |
//! | `config.json` | Optional overrides for everything below |
//!
//! ## Secrets
//!
//! API keys are never stored in the config file. The config names the
//! environment variables they are read from (`OPENAI_API_KEY`,
//! `TAVILY_API_KEY`, `SPOTIFY_ACCESS_TOKEN` by default).

use crate::embedding::TrainingParams;
use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "muse-dj";

/// Returns the platform-appropriate data directory for Muse DJ, creating it
/// if needed.
///
/// # Errors
///
/// This function will return an error if:
/// - The system data directory cannot be determined
/// - The subdirectory cannot be created due to permissions
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })?;

    let app_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&app_dir).with_context(|| {
        format!(
            "Failed to create Muse DJ data directory at {}. Please check file permissions.",
            app_dir.display()
        )
    })?;

    Ok(app_dir)
}

/// Returns the path of the SQLite listening library.
///
/// # Examples
///
/// ```no_run
/// use muse_dj::config::get_db_path;
///
/// let db_path = get_db_path()?;
/// println!("Library location: {}", db_path.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("library.db"))
}

pub fn get_catalog_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("catalog.csv"))
}

pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("config.json"))
}

/// Embedding index parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub embedding_dim: usize,
    pub window: usize,
    pub epochs: usize,
    pub negative: usize,
    pub learning_rate: f32,
    pub min_learning_rate: f32,
    pub seed: u64,
    /// Rows whose name or artists reach this many characters are dropped.
    pub max_text_len: usize,
    /// Where a trained token model is cached; retrained when absent.
    pub model_cache: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        let params = TrainingParams::default();
        Self {
            embedding_dim: params.dim,
            window: params.window,
            epochs: params.epochs,
            negative: params.negative,
            learning_rate: params.learning_rate,
            min_learning_rate: params.min_learning_rate,
            seed: params.seed,
            max_text_len: 200,
            model_cache: None,
        }
    }
}

impl IndexConfig {
    #[must_use]
    pub fn training_params(&self) -> TrainingParams {
        TrainingParams {
            dim: self.embedding_dim,
            window: self.window,
            epochs: self.epochs,
            negative: self.negative,
            learning_rate: self.learning_rate,
            min_learning_rate: self.min_learning_rate,
            seed: self.seed,
        }
    }
}

/// Conversation orchestration limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on a single capability invocation.
    pub tool_timeout_secs: u64,
    /// How many rounds of capability calls one turn may run.
    pub max_tool_rounds: usize,
    /// Preceding user/assistant texts the classifier may inspect.
    pub context_turns: usize,
    /// Recommendation count used when a call does not specify one.
    pub default_count: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 20,
            max_tool_rounds: 3,
            context_turns: 6,
            default_count: 10,
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs.max(1))
    }
}

/// OpenAI-compatible chat completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.7,
            timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    /// Key from the configured environment variable, if set and non-empty.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        read_secret(&self.api_key_env)
    }
}

/// Open-domain search and external catalog clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub tavily_endpoint: String,
    pub tavily_api_key_env: String,
    pub max_results: usize,
    pub spotify_endpoint: String,
    pub spotify_token_env: String,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tavily_endpoint: "https://api.tavily.com/search".to_string(),
            tavily_api_key_env: "TAVILY_API_KEY".to_string(),
            max_results: 8,
            spotify_endpoint: "https://api.spotify.com/v1/search".to_string(),
            spotify_token_env: "SPOTIFY_ACCESS_TOKEN".to_string(),
            timeout_secs: 10,
        }
    }
}

impl SearchConfig {
    #[must_use]
    pub fn tavily_api_key(&self) -> Option<String> {
        read_secret(&self.tavily_api_key_env)
    }

    #[must_use]
    pub fn spotify_token(&self) -> Option<String> {
        read_secret(&self.spotify_token_env)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

fn read_secret(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// Configuration for runtime behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Path to the listening library database
    pub db_path: PathBuf,
    /// Path to the catalog CSV
    pub catalog_path: PathBuf,
    pub index: IndexConfig,
    pub orchestrator: OrchestratorConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            db_path: get_db_path().unwrap_or_else(|_| PathBuf::from("library.db")),
            catalog_path: get_catalog_path().unwrap_or_else(|_| PathBuf::from("catalog.csv")),
            index: IndexConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Create a new runtime configuration rooted in the data directory
    ///
    /// # Errors
    ///
    /// Fails when the data directory cannot be created.
    pub fn new() -> Result<Self> {
        Ok(Self {
            db_path: get_db_path()?,
            catalog_path: get_catalog_path()?,
            ..Self::default()
        })
    }

    /// Load `path` (or the default `config.json`) if it exists, else defaults.
    ///
    /// # Errors
    ///
    /// Fails when an existing file cannot be read or is not valid JSON.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => get_config_path()?,
        };

        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Self::new();
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid JSON in config file {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Create configuration with explicit database path
    #[must_use]
    pub fn with_db_path(mut self, db_path: PathBuf) -> Self {
        self.db_path = db_path;
        self
    }

    #[must_use]
    pub fn with_catalog_path(mut self, catalog_path: PathBuf) -> Self {
        self.catalog_path = catalog_path;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_db_path_structure() {
        let path = get_db_path().expect("Should get valid path");

        assert_eq!(path.file_name().unwrap(), "library.db");
        let parent = path.parent().expect("Should have parent directory");
        assert_eq!(parent.file_name().unwrap(), APP_DIR);
        assert!(parent.is_dir(), "Data directory should be created");
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = RuntimeConfig::default();

        assert_eq!(config.index.embedding_dim, 15);
        assert_eq!(config.index.max_text_len, 200);
        assert_eq!(config.orchestrator.max_tool_rounds, 3);
        assert_eq!(config.orchestrator.context_turns, 6);
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.search.max_results, 8);
    }

    #[test]
    fn test_partial_config_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(
            &path,
            r#"{ "catalog_path": "/tmp/songs.csv", "orchestrator": { "max_tool_rounds": 5 } }"#,
        )
        .unwrap();

        let config = RuntimeConfig::load(Some(&path)).expect("config loads");

        assert_eq!(config.catalog_path, PathBuf::from("/tmp/songs.csv"));
        assert_eq!(config.orchestrator.max_tool_rounds, 5);
        assert_eq!(config.orchestrator.tool_timeout_secs, 20);
        assert_eq!(config.index.window, 5);
    }

    #[test]
    fn test_invalid_config_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(RuntimeConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_with_paths_override() {
        let config = RuntimeConfig::default()
            .with_db_path(PathBuf::from("a.db"))
            .with_catalog_path(PathBuf::from("b.csv"));

        assert_eq!(config.db_path, PathBuf::from("a.db"));
        assert_eq!(config.catalog_path, PathBuf::from("b.csv"));
    }
}
