//! # Conversation Orchestrator
//!
//! Drives one user turn through a small state machine:
//!
//! ```text
//! Routing ──► Dispatch ──► ToolExecuting ──► Composing ──► Done
//!    │            │              │  ▲             │
//!    │            │              │  └─────────────┘ (more calls, bounded rounds)
//!    │            │              └─ fallback (single hop) on EntityNotFoundLocally
//!    └────────────┴─────────────────────────────────────► Done
//! ```
//!
//! - **Routing** classifies the utterance. `memory` and `conversational`
//!   turns are answered here without a model call.
//! - **Dispatch** exposes the route's capability subset to the model. When the
//!   model proposes nothing for a route that needs data, a call is forced.
//! - **ToolExecuting** runs each call through the registry and appends the
//!   results to the session.
//! - **Composing** asks the model for the reply, looping back while it keeps
//!   asking for more data, up to `max_tool_rounds`.

use crate::capabilities::{
    PersonalKind, ADD_TO_PLAYLIST, CHECK_FOLLOWING, CREATE_PLAYLIST, FOLLOW_ENTITY, LOOKUP_AGGREGATE_SUMMARY,
    LOOKUP_PERSONAL_DATA, LOOKUP_PLAYLIST_TRACKS, RECOMMEND_BY_DESCRIPTION, REMOVE_FROM_PLAYLIST,
    SEARCH_CATALOG_EXTERNAL, SEARCH_OPEN_DOMAIN, UNFOLLOW_ENTITY,
};
use crate::capability::{CapabilityCall, CapabilityRegistry, CapabilityResult, ErrorKind};
use crate::classifier::{
    classify_detailed, has_factual_markers, is_summary_request, Classification, EntityAction, PlaylistRequest,
    Route,
};
use crate::config::OrchestratorConfig;
use crate::db::TimeWindow;
use crate::error::LlmError;
use crate::llm::{ChatMessage, LanguageModel, ModelReply, ModelRequest, Phase};
use crate::session::{lock_session, Session, SessionStore};
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::Arc;

const PERSONA: &str = "You are Muse, an upbeat music DJ assistant. You help the user explore \
their own listening, discover new songs and learn about artists. Keep replies short, warm and \
music-focused, with the occasional emoji. Never invent facts, listening data or songs: use the \
available tools and base every answer on their output.";

const PERSONAL_INSTRUCTION: &str = "This is a question about the user's own music data. You must \
call one of the provided tools before answering: lookup_personal_data and lookup_aggregate_summary \
for listening data, follow_entity, unfollow_entity and check_following for artists, and \
lookup_playlist_tracks, create_playlist, add_to_playlist and remove_from_playlist for playlists. \
Do not answer from memory.";

const SIMILARITY_INSTRUCTION: &str = "The user wants song recommendations. Call \
recommend_by_description with their request in their own words. Use search_catalog_external only \
for a specific song that is not in the local catalog.";

const OPEN_DOMAIN_INSTRUCTION: &str = "This is a factual music question. You must call \
search_open_domain before answering and base the answer only on its results.";

const COMPOSE_INSTRUCTION: &str = "Answer the user using the tool results above. Keep the numbers, \
titles and names exactly as given. If a tool reported an error, say so briefly and suggest what to \
try next.";

const MEMORY_ACK: &str = "Got it! I'll remember that {item}. 🎵 That's a solid preference to keep \
in mind for our music chats! Anything else you want to explore or discover? 🎧";

const DECLINED_REPLY: &str = "No worries, I'll leave it as it is! 🎵 Anything else you'd like to \
explore?";

const HEDGE_REDIRECT: &str = "Let me search for that information for you! 🔍";

const RETRY_REPLY: &str = "Hmm, I'm having some trouble generating a response. Mind trying that again?";

const DIRECT_NAME_HINT: &str = "That looks like an internal tool name! 🎛️ Just ask me naturally, \
like \"what are my top tracks this month?\" or \"songs like Imagine by John Lennon\", and I'll \
take it from there.";

/// Phrases that mean the model answered without committing to data.
const HEDGES: &[&str] = &[
    "i don't have access",
    "i do not have access",
    "i can't browse",
    "i cannot browse",
    "i'm not able to look",
    "as an ai",
    "i don't have real-time",
    "i don't have information",
    "i'm not sure",
    "i am not sure",
    "i would need to check",
    "i would need to search",
];

/// Tool names users sometimes type verbatim.
const LEGACY_TOOL_NAMES: &[&str] = &[
    "get_top_tracks",
    "get_top_artists",
    "get_recently_played",
    "get_saved_tracks",
    "get_followed_artists",
    "get_wrapped",
];

lazy_static! {
    static ref LIMIT: Regex =
        Regex::new(r"\btop (\d{1,3})\b|\b(\d{1,3}) (?:songs|tracks|artists)\b").expect("limit regex is valid");
}

/// Capabilities exposed to the model for a route.
#[must_use]
pub fn route_capabilities(route: Route) -> &'static [&'static str] {
    match route {
        Route::PersonalData => &[
            LOOKUP_PERSONAL_DATA,
            LOOKUP_AGGREGATE_SUMMARY,
            FOLLOW_ENTITY,
            UNFOLLOW_ENTITY,
            CHECK_FOLLOWING,
            LOOKUP_PLAYLIST_TRACKS,
            CREATE_PLAYLIST,
            ADD_TO_PLAYLIST,
            REMOVE_FROM_PLAYLIST,
        ],
        Route::Similarity => &[RECOMMEND_BY_DESCRIPTION, SEARCH_CATALOG_EXTERNAL],
        Route::OpenDomain => &[SEARCH_OPEN_DOMAIN],
        Route::Conversational | Route::Memory => &[],
    }
}

const fn route_instruction(route: Route) -> &'static str {
    match route {
        Route::PersonalData => PERSONAL_INSTRUCTION,
        Route::Similarity => SIMILARITY_INSTRUCTION,
        Route::OpenDomain | Route::Conversational | Route::Memory => OPEN_DOMAIN_INSTRUCTION,
    }
}

/// Result of one processed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    pub route: Route,
    /// Every call executed this turn, fallbacks included, in order.
    pub calls: Vec<CapabilityCall>,
}

enum Stage {
    Routing,
    Dispatch,
    ToolExecuting { calls: Vec<CapabilityCall>, round: usize },
    Composing { round: usize },
    Done(String),
}

/// Per-turn working state.
struct Turn {
    text: String,
    ordinal: usize,
    recent: Vec<String>,
    classification: Classification,
    executed: Vec<CapabilityCall>,
    next_call: usize,
}

impl Turn {
    fn call_id(&mut self) -> String {
        self.next_call += 1;
        format!("call_{}_{}", self.ordinal, self.next_call)
    }
}

pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    model: Arc<dyn LanguageModel>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(registry: Arc<CapabilityRegistry>, model: Arc<dyn LanguageModel>, config: OrchestratorConfig) -> Self {
        Self { registry, model, config }
    }

    #[must_use]
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Process `utterance` against the session stored under `key`.
    pub fn handle(&self, store: &SessionStore, key: &str, utterance: &str) -> TurnOutcome {
        let session = store.get(key);
        let mut session = lock_session(&session);
        self.process_turn(&mut session, utterance)
    }

    /// Run one turn to completion. Always produces a reply.
    pub fn process_turn(&self, session: &mut Session, utterance: &str) -> TurnOutcome {
        let recent = session.recent_texts(self.config.context_turns);
        let ordinal = session.push_user(utterance).ordinal;
        let mut turn = Turn {
            text: utterance.trim().to_string(),
            ordinal,
            classification: classify_detailed(utterance, &recent),
            recent,
            executed: Vec::new(),
            next_call: 0,
        };

        let mut stage = Stage::Routing;
        let reply = loop {
            stage = match stage {
                Stage::Routing => self.route(session, &turn),
                Stage::Dispatch => self.dispatch(session, &mut turn),
                Stage::ToolExecuting { calls, round } => self.execute(session, &mut turn, &calls, round),
                Stage::Composing { round } => self.compose(session, &mut turn, round),
                Stage::Done(reply) => break reply,
            };
        };

        debug!("Turn {} done after {} calls", turn.ordinal, turn.executed.len());
        session.push_assistant(reply.clone(), Vec::new());
        TurnOutcome {
            reply,
            route: turn.classification.route,
            calls: turn.executed,
        }
    }

    fn route(&self, session: &mut Session, turn: &Turn) -> Stage {
        let classification = &turn.classification;
        debug!("Routing turn {} to {}", turn.ordinal, classification.route);

        if is_direct_tool_name(&turn.text, &self.registry) {
            return Stage::Done(DIRECT_NAME_HINT.to_string());
        }

        match classification.route {
            Route::Memory => {
                let item = memory_item(&turn.text);
                let note = session.push_memory_note(item);
                info!("Stored memory note {note}");
                Stage::Done(MEMORY_ACK.replace("{item}", item))
            }
            Route::Conversational => Stage::Done(canned_reply(&turn.text).to_string()),
            _ if classification.declined => Stage::Done(DECLINED_REPLY.to_string()),
            _ => Stage::Dispatch,
        }
    }

    fn dispatch(&self, session: &mut Session, turn: &mut Turn) -> Stage {
        let route = turn.classification.route;
        session.record_directive(PERSONA);

        let tools = self.registry.descriptors_for(route_capabilities(route));
        let mut messages = session.to_messages();
        messages.push(ChatMessage::system(route_instruction(route)));
        let reply = self
            .model
            .respond(&ModelRequest {
                messages: &messages,
                tools: &tools,
                phase: Phase::Dispatch,
            })
            .unwrap_or_else(|e| {
                warn!("Dispatch with {} failed: {e}", self.model.name());
                ModelReply::default()
            });

        let mut calls = self.with_ids(turn, reply.calls);
        if calls.is_empty() {
            let forced = matches!(route, Route::OpenDomain | Route::PersonalData)
                || has_factual_markers(&reply.text)
                || reply.text.trim().is_empty();
            if !forced {
                return Stage::Done(reply.text);
            }
            let call = self.forced_call(turn);
            info!("No capability proposed for a {route} turn, forcing {}", call.name);
            calls.push(call);
        }

        session.push_assistant(reply.text, calls.clone());
        Stage::ToolExecuting { calls, round: 1 }
    }

    fn execute(&self, session: &mut Session, turn: &mut Turn, calls: &[CapabilityCall], round: usize) -> Stage {
        let mut verbatim = None;
        for call in calls {
            let result = self.execute_with_fallback(call, &mut turn.executed);
            let is_verbatim = self.registry.descriptor(&result.name).is_some_and(|d| d.verbatim);
            if result.ok && is_verbatim && verbatim.is_none() {
                verbatim = Some(result.text.clone());
            }
            session.push_result(result);
        }

        match verbatim {
            Some(text) => Stage::Done(text),
            None => Stage::Composing { round },
        }
    }

    /// Execute `call`, re-dispatching once to its fallback when the referenced
    /// song is missing locally. Mutating capabilities are never retried.
    fn execute_with_fallback(&self, call: &CapabilityCall, executed: &mut Vec<CapabilityCall>) -> CapabilityResult {
        executed.push(call.clone());
        let result = self.registry.execute(call);
        if result.error_kind != Some(ErrorKind::EntityNotFoundLocally) {
            return result;
        }

        let Some(descriptor) = self.registry.descriptor(&call.name) else {
            return result;
        };
        let (Some(fallback), Some(reference)) = (descriptor.fallback, result.reference.as_ref()) else {
            return result;
        };
        if descriptor.mutating {
            return result;
        }

        let mut args = Map::new();
        args.insert("query".to_string(), Value::String(reference.search_query()));
        if let Some(count) = call.args.get("count") {
            args.insert("count".to_string(), count.clone());
        }
        let fallback_call = CapabilityCall::new(format!("{}_fallback", call.id), fallback, args);
        warn!("'{reference}' is not in the local catalog, falling back to {fallback}");

        executed.push(fallback_call.clone());
        let mut replacement = self.registry.execute(&fallback_call);
        replacement.call_id.clone_from(&call.id);
        replacement
    }

    fn compose(&self, session: &mut Session, turn: &mut Turn, round: usize) -> Stage {
        let more_allowed = round < self.config.max_tool_rounds;
        let tools = match more_allowed {
            true => self.registry.descriptors_for(route_capabilities(turn.classification.route)),
            false => Vec::new(),
        };
        let mut messages = session.to_messages();
        messages.push(ChatMessage::system(COMPOSE_INSTRUCTION));

        let reply = match self.model.respond(&ModelRequest {
            messages: &messages,
            tools: &tools,
            phase: Phase::Compose,
        }) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Compose with {} failed: {e}", self.model.name());
                return Stage::Done(llm_failure_reply(&e));
            }
        };

        if more_allowed && !reply.calls.is_empty() {
            let calls = self.with_ids(turn, reply.calls);
            debug!("Round {round} asked for {} more calls", calls.len());
            session.push_assistant(reply.text, calls.clone());
            return Stage::ToolExecuting { calls, round: round + 1 };
        }
        Stage::Done(finalize(reply.text))
    }

    fn with_ids(&self, turn: &mut Turn, calls: Vec<CapabilityCall>) -> Vec<CapabilityCall> {
        calls
            .into_iter()
            .map(|mut call| {
                if call.id.trim().is_empty() {
                    call.id = turn.call_id();
                }
                call
            })
            .collect()
    }

    /// The call the route implies when the model proposed none.
    fn forced_call(&self, turn: &mut Turn) -> CapabilityCall {
        let (name, args) = match turn.classification.route {
            Route::PersonalData => personal_call(&turn.classification, &turn.text, &turn.recent),
            Route::Similarity => {
                let count = requested_limit(&turn.text).unwrap_or(self.config.default_count);
                (
                    RECOMMEND_BY_DESCRIPTION,
                    json!({ "query": turn.text, "count": count }),
                )
            }
            Route::OpenDomain | Route::Conversational | Route::Memory => {
                (SEARCH_OPEN_DOMAIN, json!({ "query": turn.text }))
            }
        };
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        CapabilityCall::new(turn.call_id(), name, args)
    }
}

fn personal_call(classification: &Classification, text: &str, recent: &[String]) -> (&'static str, Value) {
    if let (Some(action), Some(entity)) = (classification.action, classification.entity.as_deref()) {
        let name = match action {
            EntityAction::Follow => FOLLOW_ENTITY,
            EntityAction::Unfollow => UNFOLLOW_ENTITY,
            EntityAction::Check => CHECK_FOLLOWING,
        };
        return (name, json!({ "name": entity }));
    }

    if let Some(request) = &classification.playlist {
        return playlist_call(request);
    }

    if is_summary_request(text) {
        let window = TimeWindow::parse(text).unwrap_or(TimeWindow::LongTerm);
        return (LOOKUP_AGGREGATE_SUMMARY, json!({ "time_window": window.as_str() }));
    }

    let kind = infer_kind(text)
        .or_else(|| recent.iter().rev().find_map(|t| infer_kind(t)))
        .unwrap_or(PersonalKind::TopTracks);
    let window = TimeWindow::parse(text).unwrap_or_default();
    let limit = requested_limit(text).unwrap_or(10);
    (
        LOOKUP_PERSONAL_DATA,
        json!({ "kind": kind.as_str(), "time_window": window.as_str(), "limit": limit }),
    )
}

fn playlist_call(request: &PlaylistRequest) -> (&'static str, Value) {
    let song = |playlist: &str, title: &str, artist: Option<&str>| {
        let mut args = json!({ "playlist": playlist, "title": title });
        if let (Some(artist), Value::Object(map)) = (artist, &mut args) {
            map.insert("artist".to_string(), json!(artist));
        }
        args
    };
    match request {
        PlaylistRequest::List => (
            LOOKUP_PERSONAL_DATA,
            json!({ "kind": PersonalKind::Playlists.as_str(), "limit": 20 }),
        ),
        PlaylistRequest::Show { playlist } => (LOOKUP_PLAYLIST_TRACKS, json!({ "playlist": playlist })),
        PlaylistRequest::Create { name } => (CREATE_PLAYLIST, json!({ "name": name })),
        PlaylistRequest::Add { playlist, title, artist } => (ADD_TO_PLAYLIST, song(playlist, title, artist.as_deref())),
        PlaylistRequest::Remove { playlist, title, artist } => {
            (REMOVE_FROM_PLAYLIST, song(playlist, title, artist.as_deref()))
        }
    }
}

fn infer_kind(text: &str) -> Option<PersonalKind> {
    let text = text.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| text.contains(w));

    if has(&["playlist"]) {
        Some(PersonalKind::Playlists)
    } else if has(&["follow"]) {
        Some(PersonalKind::FollowedArtists)
    } else if has(&["artist", "band"]) {
        Some(PersonalKind::TopArtists)
    } else if has(&["recent", "history", "last played", "lately", "just played"]) {
        Some(PersonalKind::RecentlyPlayed)
    } else if has(&["saved", "liked", "loved", "library"]) {
        Some(PersonalKind::SavedTracks)
    } else if has(&["track", "song"]) {
        Some(PersonalKind::TopTracks)
    } else {
        None
    }
}

fn requested_limit(text: &str) -> Option<usize> {
    let text = text.to_lowercase();
    let caps = LIMIT.captures(&text)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .map(|n| n.clamp(1, 50))
}

fn is_direct_tool_name(text: &str, registry: &CapabilityRegistry) -> bool {
    let normalized = text.trim().to_lowercase().replace(' ', "_");
    LEGACY_TOOL_NAMES.contains(&normalized.as_str()) || registry.descriptor(&normalized).is_some()
}

fn memory_item(text: &str) -> &str {
    text.get("remember ".len()..).map_or(text, str::trim)
}

fn canned_reply(text: &str) -> &'static str {
    let first = text
        .split_whitespace()
        .next()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .unwrap_or_default();
    match first.as_str() {
        "yeah" | "yes" | "yep" | "yup" => "Awesome! 🎶 What should we dig into next?",
        "cool" | "sweet" => "Right? 😎 Want some recommendations or a look at your listening stats?",
        "nice" | "great" => "Glad you like it! 🎵 Anything else you want to explore?",
        "thanks" | "thank" | "thx" | "ty" => "Anytime! 🎧 Just holler if you want more music.",
        "ok" | "okay" | "alright" | "sure" => "Cool cool. 🎵 Let me know what you want to hear about next!",
        "good" => "Good vibes only! ✨ What's next?",
        "awesome" | "amazing" => "Love the energy! 🔥 Want to keep the discoveries coming?",
        _ => "I'm all ears! 🎧 Ask me about your top tracks, an artist, or songs like one you love.",
    }
}

fn finalize(text: String) -> String {
    let lower = text.to_lowercase();
    if text.trim().is_empty() {
        RETRY_REPLY.to_string()
    } else if HEDGES.iter().any(|h| lower.contains(h)) {
        HEDGE_REDIRECT.to_string()
    } else {
        text
    }
}

fn llm_failure_reply(err: &LlmError) -> String {
    match err {
        LlmError::NotConfigured(what) => {
            format!("🎧 My music brain isn't set up yet ({what}). Set the API key and try again!")
        }
        LlmError::Status { status: 401 | 403, .. } => {
            "🔑 The language model rejected my credentials. Check the API key and try again!".to_string()
        }
        LlmError::Status { status: 429, .. } => {
            "🎚️ I'm getting rate limited right now. Give me a few seconds and ask again!".to_string()
        }
        LlmError::Transport(_) | LlmError::Status { .. } | LlmError::Malformed(_) => {
            "📡 I couldn't reach my music brain just now. Give it another try in a moment!".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capability, CapabilityArgs, CapabilityDescriptor, ParamKind, ParamSpec};
    use crate::error::{CapabilityFailure, EntityReference};
    use crate::llm::OfflineModel;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Returns its name and arguments, or a configured failure.
    struct Stub {
        descriptor: CapabilityDescriptor,
        missing: bool,
    }

    impl Stub {
        fn new(name: &'static str) -> Self {
            Self {
                descriptor: CapabilityDescriptor::new(
                    name,
                    "stub",
                    vec![
                        ParamSpec::optional("query", ParamKind::String, None, "q"),
                        ParamSpec::optional("count", ParamKind::Integer, None, "n"),
                        ParamSpec::optional("kind", ParamKind::String, None, "k"),
                        ParamSpec::optional("name", ParamKind::String, None, "n"),
                        ParamSpec::optional("time_window", ParamKind::String, None, "w"),
                        ParamSpec::optional("limit", ParamKind::Integer, None, "l"),
                        ParamSpec::optional("playlist", ParamKind::String, None, "p"),
                        ParamSpec::optional("title", ParamKind::String, None, "t"),
                        ParamSpec::optional("artist", ParamKind::String, None, "a"),
                    ],
                ),
                missing: false,
            }
        }
    }

    impl Capability for Stub {
        fn descriptor(&self) -> &CapabilityDescriptor {
            &self.descriptor
        }

        fn invoke(&self, args: &CapabilityArgs) -> Result<String, CapabilityFailure> {
            if self.missing {
                return Err(CapabilityFailure::EntityNotFoundLocally(EntityReference::new(
                    "Hotel California",
                    Some("Eagles".to_string()),
                )));
            }
            Ok(format!(
                "{} ran with {}",
                self.descriptor.name,
                args.str("query")
                    .or_else(|| args.str("kind"))
                    .or_else(|| args.str("name"))
                    .or_else(|| args.str("playlist"))
                    .unwrap_or("-")
            ))
        }
    }

    /// Replays scripted replies, then falls back to the offline model.
    struct Scripted(Mutex<Vec<ModelReply>>);

    impl LanguageModel for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn respond(&self, request: &ModelRequest<'_>) -> Result<ModelReply, LlmError> {
            let mut replies = self.0.lock().unwrap();
            if replies.is_empty() {
                return OfflineModel.respond(request);
            }
            Ok(replies.remove(0))
        }
    }

    fn orchestrator(model: Arc<dyn LanguageModel>) -> Orchestrator {
        let mut registry = CapabilityRegistry::new(Duration::from_secs(5));
        for name in route_capabilities(Route::PersonalData)
            .iter()
            .chain(route_capabilities(Route::OpenDomain))
            .chain([SEARCH_CATALOG_EXTERNAL].iter())
        {
            registry.register(Arc::new(Stub::new(*name)));
        }
        let mut recommend = Stub::new(RECOMMEND_BY_DESCRIPTION);
        recommend.descriptor = recommend.descriptor.with_fallback(SEARCH_CATALOG_EXTERNAL);
        recommend.missing = true;
        registry.register(Arc::new(recommend));
        Orchestrator::new(Arc::new(registry), model, OrchestratorConfig::default())
    }

    #[test]
    fn test_memory_and_conversational_skip_the_model() {
        let orchestrator = orchestrator(Arc::new(OfflineModel));
        let mut session = Session::new("s");

        let outcome = orchestrator.process_turn(&mut session, "remember I love jazz");
        assert_eq!(outcome.route, Route::Memory);
        assert!(outcome.reply.starts_with("Got it! I'll remember that I love jazz."));
        assert_eq!(session.memory_notes(), vec!["[USER PREFERENCE: I love jazz]"]);

        let outcome = orchestrator.process_turn(&mut session, "thanks!");
        assert!(outcome.calls.is_empty());
        assert!(outcome.reply.starts_with("Anytime!"));
        assert!(!session.has_directive());
    }

    #[test]
    fn test_personal_question_forces_a_call() {
        let orchestrator = orchestrator(Arc::new(OfflineModel));
        let mut session = Session::new("s");

        let outcome = orchestrator.process_turn(&mut session, "what are my top 5 artists this month");
        assert_eq!(outcome.calls.len(), 1);
        let call = &outcome.calls[0];
        assert_eq!(call.name, LOOKUP_PERSONAL_DATA);
        assert_eq!(call.id, "call_1_1");
        assert_eq!(call.arg_str("kind"), Some("top_artists"));
        assert_eq!(call.arg_str("time_window"), Some("short_term"));
        assert_eq!(call.args["limit"], 5);
        assert!(outcome.reply.contains("lookup_personal_data ran with top_artists"));
        assert!(session.has_directive());
    }

    #[test]
    fn test_fallback_is_single_hop_with_original_count() {
        let orchestrator = orchestrator(Arc::new(OfflineModel));
        let mut session = Session::new("s");

        let outcome = orchestrator.process_turn(&mut session, "songs like Hotel California by Eagles");
        let names: Vec<&str> = outcome.calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec![RECOMMEND_BY_DESCRIPTION, SEARCH_CATALOG_EXTERNAL]);
        assert_eq!(outcome.calls[1].arg_str("query"), Some("Hotel California Eagles"));
        assert_eq!(outcome.calls[1].args["count"], 10);
        assert!(!outcome.reply.contains("EntityNotFoundLocally"));

        let correlated = session.turns().iter().any(|t| {
            matches!(t, crate::session::TurnEntry::CapabilityResult(r) if r.call_id == outcome.calls[0].id && r.ok)
        });
        assert!(correlated);
    }

    #[test]
    fn test_model_calls_loop_until_round_limit() {
        let looping = ModelReply {
            text: String::new(),
            calls: vec![CapabilityCall::new("", SEARCH_OPEN_DOMAIN, Map::new())],
        };
        let model = Scripted(Mutex::new(vec![looping.clone(), looping.clone(), looping.clone(), looping]));
        let orchestrator = orchestrator(Arc::new(model));
        let mut session = Session::new("s");

        let outcome = orchestrator.process_turn(&mut session, "who founded Motown");
        assert_eq!(outcome.calls.len(), OrchestratorConfig::default().max_tool_rounds);
        assert_eq!(outcome.reply, RETRY_REPLY);
    }

    #[test]
    fn test_hedging_reply_is_redirected() {
        let model = Scripted(Mutex::new(vec![
            ModelReply::default(),
            ModelReply {
                text: "As an AI, I don't have access to that.".into(),
                calls: Vec::new(),
            },
        ]));
        let orchestrator = orchestrator(Arc::new(model));
        let outcome = orchestrator.process_turn(&mut Session::new("s"), "who is the drummer of Radiohead");
        assert_eq!(outcome.reply, HEDGE_REDIRECT);
    }

    #[test]
    fn test_direct_tool_name_gets_hint() {
        let orchestrator = orchestrator(Arc::new(OfflineModel));
        for text in ["get_top_tracks", "get top tracks", "lookup_personal_data"] {
            let outcome = orchestrator.process_turn(&mut Session::new("s"), text);
            assert_eq!(outcome.reply, DIRECT_NAME_HINT, "{text}");
            assert!(outcome.calls.is_empty());
        }
    }

    #[test]
    fn test_underscored_words_are_not_tool_names() {
        let orchestrator = orchestrator(Arc::new(OfflineModel));
        assert!(!is_direct_tool_name("lo_fi", orchestrator.registry()));
        assert!(!is_direct_tool_name("drum_and_bass", orchestrator.registry()));

        let outcome = orchestrator.process_turn(&mut Session::new("s"), "lo_fi");
        assert_ne!(outcome.reply, DIRECT_NAME_HINT);
    }

    #[test]
    fn test_playlist_questions_force_playlist_calls() {
        let orchestrator = orchestrator(Arc::new(OfflineModel));

        let outcome = orchestrator.process_turn(&mut Session::new("s"), "show me my playlists");
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].name, LOOKUP_PERSONAL_DATA);
        assert_eq!(outcome.calls[0].arg_str("kind"), Some("playlists"));
        assert!(outcome.reply.contains("lookup_personal_data ran with playlists"));

        let outcome = orchestrator.process_turn(&mut Session::new("s"), "what's in my Road Trip playlist?");
        assert_eq!(outcome.calls[0].name, LOOKUP_PLAYLIST_TRACKS);
        assert_eq!(outcome.calls[0].arg_str("playlist"), Some("Road Trip"));

        let outcome = orchestrator.process_turn(
            &mut Session::new("s"),
            "add Imagine by John Lennon to my Road Trip playlist",
        );
        let call = &outcome.calls[0];
        assert_eq!(call.name, ADD_TO_PLAYLIST);
        assert_eq!(call.arg_str("title"), Some("Imagine"));
        assert_eq!(call.arg_str("artist"), Some("John Lennon"));

        let outcome = orchestrator.process_turn(&mut Session::new("s"), "remove Creep from playlist Focus");
        assert_eq!(outcome.calls[0].name, REMOVE_FROM_PLAYLIST);
        assert_eq!(outcome.calls[0].args.get("artist"), None);

        let mut session = Session::new("s");
        session.push_assistant("Want me to add Imagine to your Road Trip playlist?", Vec::new());
        let outcome = orchestrator.process_turn(&mut session, "yes");
        assert_eq!(outcome.calls[0].name, ADD_TO_PLAYLIST);
        assert_eq!(outcome.calls[0].arg_str("playlist"), Some("Road Trip"));
    }

    #[test]
    fn test_confirmation_turns_into_follow() {
        let orchestrator = orchestrator(Arc::new(OfflineModel));
        let mut session = Session::new("s");
        session.push_assistant("You're not following Radiohead yet. Want me to follow Radiohead?", Vec::new());

        let outcome = orchestrator.process_turn(&mut session, "yes please");
        assert_eq!(outcome.calls[0].name, FOLLOW_ENTITY);
        assert_eq!(outcome.calls[0].arg_str("name"), Some("Radiohead"));

        session.push_assistant("Want me to follow Coldplay?", Vec::new());
        let declined = orchestrator.process_turn(&mut session, "no thanks");
        assert!(declined.calls.is_empty());
        assert_eq!(declined.reply, DECLINED_REPLY);
    }

    #[test]
    fn test_kind_and_limit_inference() {
        assert_eq!(infer_kind("who do I follow"), Some(PersonalKind::FollowedArtists));
        assert_eq!(infer_kind("what did I listen to lately"), Some(PersonalKind::RecentlyPlayed));
        assert_eq!(infer_kind("show my liked songs"), Some(PersonalKind::SavedTracks));
        assert_eq!(infer_kind("how about jazz"), None);
        assert_eq!(infer_kind("which playlists do I follow"), Some(PersonalKind::Playlists));
        assert_eq!(requested_limit("top 3 please"), Some(3));
        assert_eq!(requested_limit("give me 200 tracks"), Some(50));
        assert_eq!(requested_limit("my favourites"), None);
    }

    #[test]
    fn test_llm_failure_is_on_brand() {
        let reply = llm_failure_reply(&LlmError::Status {
            status: 401,
            body: String::new(),
        });
        assert!(reply.contains("API key"));
        assert!(llm_failure_reply(&LlmError::Transport("refused".into())).contains("try"));
    }
}
