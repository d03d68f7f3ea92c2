//! Conversational music assistant grounded in your own listening data.
//!
//! Core modules:
//! - [`classifier`] - Routes each utterance to a capability subset
//! - [`orchestrator`] - Per-turn state machine around the language model
//! - [`capability`] / [`capabilities`] - Registry, invocation contract and the concrete operations
//! - [`recommend`] - Embedding-based song recommendations
//! - [`db`] - SQLite listening library
//!
//! ### Supporting Modules
//!
//! - [`catalog`] / [`embedding`] / [`index`] - Catalog cleaning and the embedding index
//! - [`algorithm`] - Listening affinity scoring and column statistics
//! - [`clients`] - Web search and external catalog HTTP clients
//! - [`llm`] - Language-model trait, hosted client and offline model
//! - [`session`] - Conversation history and per-key session store
//! - [`services`] - Dependency construction
//! - [`config`] - Configuration and data directory management
//! - [`cli`] / [`completion`] - Command-line interface and shell completions
//! - [`error`] - Typed failures the orchestrator matches on
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use muse_dj::config::RuntimeConfig;
//! use muse_dj::services::Services;
//! use muse_dj::session::Session;
//!
//! let services = Services::from_config(RuntimeConfig::new()?)?;
//! let orchestrator = services.orchestrator();
//!
//! let mut session = Session::new("demo");
//! let outcome = orchestrator.process_turn(&mut session, "what are my top tracks");
//! println!("[{}] {}", outcome.route, outcome.reply);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Turn Lifecycle
//!
//! 1. The [`classifier`] picks a route from the utterance and the last few turns.
//! 2. `memory` and `conversational` turns are answered without a model call.
//! 3. Otherwise the model sees the route's capabilities. If it proposes no
//!    call where data is required, the orchestrator forces one.
//! 4. Calls run on worker threads with a timeout. A song missing from the
//!    local catalog is retried once against the external catalog.
//! 5. The model composes the reply from the capability output. The listening
//!    summary is returned verbatim.
//!
//! ## Recommendation Details
//!
//! Every catalog row becomes a *combined vector*: the mean of skip-gram token
//! embeddings over its descriptive text, concatenated with its z-scored numeric
//! attributes. Queries naming a song ("songs like Imagine by John Lennon") are
//! anchored on that row's vector, so the song itself ranks first with
//! similarity 1.0. Free-text queries are embedded the same way.
//!
//! ## Listening Affinity
//!
//! Top tracks and artists are ranked with the affinity score:
//! - Early exploration bonus while a song has fewer than 30 touches
//! - Logarithmic dampening afterwards
//! - Loved songs multiplied by 2.0
//!
//! ## Error Handling
//!
//! Application plumbing returns `anyhow::Result` with context. The conversation
//! core matches on typed errors from [`error`]; capability failures are folded
//! into the conversation as tool output and never end a session.

pub mod algorithm;
pub mod capabilities;
pub mod capability;
pub mod catalog;
pub mod classifier;
pub mod cli;
pub mod clients;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod llm;
pub mod orchestrator;
pub mod recommend;
pub mod services;
pub mod session;
