//! # Error Taxonomy
//!
//! Application plumbing (config, SQLite, CSV, HTTP) reports failures through
//! `anyhow::Error` with context. The variants here are the ones the
//! conversation core has to *match on*: a capability that could not run, a
//! recommendation that referenced an unknown song, a language model that
//! failed, or a catalog that could not be indexed.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A song (and optionally its artist) named inside a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityReference {
    pub title: String,
    pub artist: Option<String>,
}

impl EntityReference {
    pub fn new(title: impl Into<String>, artist: Option<String>) -> Self {
        Self {
            title: title.into(),
            artist,
        }
    }

    /// Search string handed to an external catalog: `"title artist"`.
    #[must_use]
    pub fn search_query(&self) -> String {
        match &self.artist {
            Some(artist) => format!("{} {}", self.title, artist),
            None => self.title.clone(),
        }
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.artist {
            Some(artist) => write!(f, "{} by {}", self.title, artist),
            None => write!(f, "{}", self.title),
        }
    }
}

/// Typed failure returned by a capability body.
#[derive(Debug, Error)]
pub enum CapabilityFailure {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Structured signal consumed by the orchestrator's fallback chain.
    #[error("'{0}' was not found in the local catalog")]
    EntityNotFoundLocally(EntityReference),

    #[error("{0}")]
    Execution(String),
}

impl From<anyhow::Error> for CapabilityFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::Execution(format!("{err:#}"))
    }
}

/// Outcome of a recommendation request that could not be served locally.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecommendError {
    #[error("'{0}' was not found in the local catalog")]
    EntityNotFoundLocally(EntityReference),
}

impl From<RecommendError> for CapabilityFailure {
    fn from(err: RecommendError) -> Self {
        match err {
            RecommendError::EntityNotFoundLocally(reference) => {
                Self::EntityNotFoundLocally(reference)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("language model is not configured: {0}")]
    NotConfigured(String),

    #[error("language model request failed: {0}")]
    Transport(String),

    #[error("language model returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("language model returned a malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("catalog {path} could not be loaded")]
    CatalogUnreadable {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("catalog {0} contains no usable rows")]
    EmptyCatalog(PathBuf),
}
