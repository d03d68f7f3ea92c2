//! # Integration Tests for Muse DJ
//!
//! End-to-end tests through the public API: the listening library, the
//! embedding index, the capability registry and the orchestrator, wired
//! together the way the binary wires them, with the offline model and fake
//! HTTP clients.

use anyhow::Result;
use muse_dj::clients::{ExternalCatalog, ExternalTrack, OpenDomainSearch};
use muse_dj::config::{IndexConfig, RuntimeConfig};
use muse_dj::db::{init_database, Library, PersonalData, PlayEvent};
use muse_dj::index::EmbeddingIndex;
use muse_dj::llm::{LanguageModel, OfflineModel};
use muse_dj::services::Services;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn fixture_catalog() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/catalog.csv")
}

struct FakeSearch;

impl OpenDomainSearch for FakeSearch {
    fn search(&self, query: &str) -> Result<String> {
        Ok(format!("🎵 Search result for: {query}"))
    }
}

/// External catalog that only knows Hotel California.
struct FakeCatalog;

impl ExternalCatalog for FakeCatalog {
    fn search_tracks(&self, query: &str, _limit: usize) -> Result<Vec<ExternalTrack>> {
        if !query.to_lowercase().contains("hotel california") {
            return Ok(Vec::new());
        }
        Ok(vec![ExternalTrack {
            id: Some("4u7EnebtmKWzUH433cf5Qv".to_string()),
            title: "Hotel California".to_string(),
            artists: "Eagles".to_string(),
            album: Some("Hotel California".to_string()),
            popularity: Some(84),
        }])
    }
}

/// Services over the fixture catalog and a fresh library in `temp`.
fn services(temp: &TempDir, model: Arc<dyn LanguageModel>) -> Result<Services> {
    let config = RuntimeConfig::default()
        .with_db_path(temp.path().join("library.db"))
        .with_catalog_path(fixture_catalog());
    let index = Arc::new(EmbeddingIndex::load(&config.catalog_path, &config.index)?);
    let library: Arc<dyn PersonalData> = Arc::new(init_database(&config.db_path, false)?);

    Ok(Services::new(
        config,
        index,
        library,
        Some(Arc::new(FakeSearch)),
        Some(Arc::new(FakeCatalog)),
        model,
    ))
}

fn play(library: &Library, title: &str, artist: &str, genre: &str, times: usize) -> Result<()> {
    for _ in 0..times {
        library.record_play(&PlayEvent {
            title: title.to_string(),
            artist: artist.to_string(),
            genre: Some(genre.to_string()),
            ..PlayEvent::default()
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod classifier_tests {
    use muse_dj::classifier::{classify, Route};

    #[test]
    fn test_classifier_is_pure() {
        let recent = vec!["what are my top tracks".to_string()];
        for text in ["how about last month", "who is Burna Boy", "songs like Creep", "ok"] {
            assert_eq!(classify(text, &recent), classify(text, &recent), "{text}");
        }
    }

    #[test]
    fn test_remember_is_memory() {
        assert_eq!(classify("remember I love jazz", &[]), Route::Memory);
        assert_eq!(classify("Remember that I hate country", &[]), Route::Memory);
    }

    #[test]
    fn test_similarity_takes_precedence() {
        assert_eq!(classify("songs like Hotel California", &[]), Route::Similarity);
        assert_eq!(classify("songs similar to Imagine by John Lennon", &[]), Route::Similarity);
    }

    #[test]
    fn test_main_routes() {
        assert_eq!(classify("what are my top tracks", &[]), Route::PersonalData);
        assert_eq!(classify("who is the lead singer of Radiohead", &[]), Route::OpenDomain);
        assert_eq!(classify("thanks!", &[]), Route::Conversational);
    }
}

#[cfg(test)]
mod recommendation_tests {
    use super::*;
    use muse_dj::recommend::RecommendationEngine;

    fn engine() -> Result<RecommendationEngine> {
        let index = EmbeddingIndex::load(&fixture_catalog(), &IndexConfig::default())?;
        Ok(RecommendationEngine::new(Arc::new(index)))
    }

    #[test]
    fn test_fixture_catalog_is_cleaned() -> Result<()> {
        let engine = engine()?;
        // The duplicate Imagine row is dropped.
        assert_eq!(engine.index().len(), 14);
        let levitating = engine
            .index()
            .catalog()
            .entities()
            .iter()
            .find(|e| e.name == "Levitating")
            .map(|e| e.artists.clone());
        assert_eq!(levitating.as_deref(), Some("Dua Lipa, DaBaby"));
        Ok(())
    }

    #[test]
    fn test_anchored_query_starts_with_anchor() -> Result<()> {
        let results = engine()?.recommend("songs similar to Imagine by John Lennon", 5, None)?;
        assert_eq!(results[0].title, "Imagine");
        assert!(results[0].is_anchor);
        assert!((results[0].similarity - 1.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_ranking_is_deterministic_and_non_increasing() -> Result<()> {
        let engine = engine()?;
        let first = engine.recommend_free_text("mellow acoustic jazz trumpet", 8, None);
        let second = engine.recommend_free_text("mellow acoustic jazz trumpet", 8, None);

        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        Ok(())
    }

    #[test]
    fn test_empty_catalog_is_safe() -> Result<()> {
        let temp = TempDir::new()?;
        let empty = temp.path().join("empty.csv");
        std::fs::write(&empty, "track_id,track_name,artists\n")?;

        let index = EmbeddingIndex::load_or_empty(&empty, &IndexConfig::default());
        let engine = RecommendationEngine::new(Arc::new(index));
        assert!(engine.recommend("songs like Imagine", 5, None)?.is_empty());
        assert!(engine.recommend_free_text("anything", 5, None).is_empty());
        Ok(())
    }
}

#[cfg(test)]
mod orchestrator_tests {
    use super::*;
    use muse_dj::capabilities::{
        LOOKUP_AGGREGATE_SUMMARY, LOOKUP_PERSONAL_DATA, RECOMMEND_BY_DESCRIPTION,
        SEARCH_CATALOG_EXTERNAL, SUMMARY_DATA_MARKER,
    };
    use muse_dj::classifier::Route;
    use muse_dj::session::{lock_session, Session, SessionStore, TurnEntry};
    use serde_json::Value;
    use std::collections::HashMap;

    /// JSON report following the offline model's preamble.
    fn report(reply: &str) -> Value {
        let json = reply.split_once("\n\n").map_or(reply, |(_, rest)| rest);
        serde_json::from_str(json).unwrap_or(Value::Null)
    }

    #[test]
    fn test_remember_stores_tagged_note() -> Result<()> {
        let temp = TempDir::new()?;
        let orchestrator = services(&temp, Arc::new(OfflineModel))?.orchestrator();
        let mut session = Session::new("alice");

        let outcome = orchestrator.process_turn(&mut session, "remember I love jazz");
        assert_eq!(outcome.route, Route::Memory);
        assert!(outcome.reply.contains("I'll remember that I love jazz"));
        assert!(outcome.calls.is_empty());
        assert_eq!(session.memory_notes(), vec!["[USER PREFERENCE: I love jazz]"]);
        Ok(())
    }

    #[test]
    fn test_top_tracks_runs_exactly_one_lookup() -> Result<()> {
        let temp = TempDir::new()?;
        let services = services(&temp, Arc::new(OfflineModel))?;
        let library = Library::open(&services.config.db_path)?;
        play(&library, "So What", "Miles Davis", "jazz", 3)?;
        play(&library, "Creep", "Radiohead", "alternative", 1)?;

        let outcome = services.orchestrator().process_turn(&mut Session::new("bob"), "what are my top tracks");
        assert_eq!(outcome.route, Route::PersonalData);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].name, LOOKUP_PERSONAL_DATA);
        assert_eq!(outcome.calls[0].arg_str("kind"), Some("top_tracks"));
        assert!(outcome.reply.contains("1. So What by Miles Davis (3 plays)"));
        Ok(())
    }

    #[test]
    fn test_similar_to_imagine_anchors_on_imagine() -> Result<()> {
        let temp = TempDir::new()?;
        let orchestrator = services(&temp, Arc::new(OfflineModel))?.orchestrator();

        let outcome =
            orchestrator.process_turn(&mut Session::new("carol"), "songs similar to Imagine by John Lennon");
        assert_eq!(outcome.route, Route::Similarity);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].name, RECOMMEND_BY_DESCRIPTION);

        let report = report(&outcome.reply);
        let top = &report["recommendations"][0];
        assert_eq!(top["track"], "Imagine by John Lennon");
        assert_eq!(top["similarity_score"], 1.0);
        assert_eq!(top["anchor"], true);
        Ok(())
    }

    #[test]
    fn test_missing_song_falls_back_once_to_external_catalog() -> Result<()> {
        let temp = TempDir::new()?;
        let orchestrator = services(&temp, Arc::new(OfflineModel))?.orchestrator();

        let outcome =
            orchestrator.process_turn(&mut Session::new("dave"), "songs like Hotel California by Eagles");
        let external: Vec<_> = outcome
            .calls
            .iter()
            .filter(|c| c.name == SEARCH_CATALOG_EXTERNAL)
            .collect();
        assert_eq!(external.len(), 1);
        assert_eq!(external[0].arg_str("query"), Some("Hotel California Eagles"));
        assert!(!outcome.reply.contains("EntityNotFoundLocally"));
        assert!(!outcome.reply.contains("not found"));
        assert_eq!(report(&outcome.reply)["recommendations"][0]["track"], "Hotel California by Eagles");
        Ok(())
    }

    #[test]
    fn test_data_routes_never_answer_without_a_call() -> Result<()> {
        let temp = TempDir::new()?;
        let orchestrator = services(&temp, Arc::new(OfflineModel))?.orchestrator();

        for text in [
            "who is Burna Boy",
            "tell me about the history of jazz",
            "show me my recently played songs",
            "who do I follow",
            "my top 3 artists this month",
        ] {
            let outcome = orchestrator.process_turn(&mut Session::new("erin"), text);
            assert!(
                matches!(outcome.route, Route::OpenDomain | Route::PersonalData),
                "{text} routed to {}",
                outcome.route
            );
            assert!(!outcome.calls.is_empty(), "{text} produced no capability call");
        }
        Ok(())
    }

    #[test]
    fn test_summary_is_returned_verbatim() -> Result<()> {
        let temp = TempDir::new()?;
        let services = services(&temp, Arc::new(OfflineModel))?;
        let library = Library::open(&services.config.db_path)?;
        play(&library, "Ye", "Burna Boy", "afrobeats", 4)?;
        play(&library, "Dynamite", "BTS", "k-pop", 2)?;

        let outcome = services
            .orchestrator()
            .process_turn(&mut Session::new("frank"), "show me my wrapped");
        assert_eq!(outcome.calls[0].name, LOOKUP_AGGREGATE_SUMMARY);
        assert!(outcome.reply.starts_with("🎧 **Your Music Summary"));

        let (_, data) = outcome.reply.split_once(SUMMARY_DATA_MARKER).unwrap_or_default();
        let data: Value = serde_json::from_str(data)?;
        assert_eq!(data["top_artists"][0], "Burna Boy");
        assert_eq!(data["top_genre"], "afrobeats");
        Ok(())
    }

    #[test]
    fn test_follow_then_check_across_turns() -> Result<()> {
        let temp = TempDir::new()?;
        let services = services(&temp, Arc::new(OfflineModel))?;
        let orchestrator = services.orchestrator();
        let store = SessionStore::new();

        let check = orchestrator.handle(&store, "gina", "am I following Radiohead?");
        assert!(check.reply.contains("You're not following Radiohead yet"));

        let confirm = orchestrator.handle(&store, "gina", "yes");
        assert!(confirm.reply.contains("now following Radiohead"));
        assert!(services.library.is_following("radiohead")?);

        let session = store.get("gina");
        assert!(lock_session(&session).has_directive());
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn test_concurrent_turns_on_one_session_do_not_interleave() -> Result<()> {
        let temp = TempDir::new()?;
        let services = services(&temp, Arc::new(OfflineModel))?;
        let orchestrator = services.orchestrator();
        let store = SessionStore::new();
        let utterances = [
            "what are my top tracks",
            "who is Burna Boy",
            "songs similar to Imagine by John Lennon",
            "show me my playlists",
        ];

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let (orchestrator, store) = (&orchestrator, &store);
                scope.spawn(move || {
                    for round in 0..3 {
                        let text = utterances[(worker + round) % utterances.len()];
                        let outcome = orchestrator.handle(store, "shared", text);
                        assert!(!outcome.calls.is_empty(), "{text} made no call");
                    }
                });
            }
        });

        let session = store.get("shared");
        let session = lock_session(&session);
        let mut results_per_call: HashMap<String, usize> = HashMap::new();
        let mut ordinal = 0;
        let mut announced: Vec<String> = Vec::new();
        let mut replied = true;

        for entry in session.turns() {
            match entry {
                TurnEntry::User(utterance) => {
                    assert!(replied, "turn {ordinal} was interrupted by turn {}", utterance.ordinal);
                    assert_eq!(utterance.ordinal, ordinal + 1);
                    ordinal = utterance.ordinal;
                    announced.clear();
                    replied = false;
                }
                TurnEntry::Assistant { calls, .. } if !calls.is_empty() => {
                    assert!(!replied, "calls after turn {ordinal} already replied");
                    for call in calls {
                        assert!(call.id.starts_with(&format!("call_{ordinal}_")), "{} in turn {ordinal}", call.id);
                        announced.push(call.id.clone());
                    }
                }
                TurnEntry::Assistant { .. } => replied = true,
                TurnEntry::CapabilityResult(result) => {
                    assert!(!replied, "result after turn {ordinal} already replied");
                    assert!(announced.contains(&result.call_id), "{} not announced in turn {ordinal}", result.call_id);
                    *results_per_call.entry(result.call_id.clone()).or_default() += 1;
                }
                TurnEntry::Directive(_) | TurnEntry::MemoryNote(_) => {}
            }
        }

        assert_eq!(ordinal, 12);
        assert!(replied);
        assert!(results_per_call.len() >= 12);
        assert!(results_per_call.values().all(|&n| n == 1), "{results_per_call:?}");
        Ok(())
    }

    #[test]
    fn test_playlist_lifecycle_through_conversation() -> Result<()> {
        let temp = TempDir::new()?;
        let orchestrator = services(&temp, Arc::new(OfflineModel))?.orchestrator();
        let mut session = Session::new("ivy");

        let created = orchestrator.process_turn(&mut session, "create a playlist called Road Trip");
        assert!(created.reply.contains("Successfully created playlist **Road Trip**"));

        let added = orchestrator.process_turn(&mut session, "add Imagine by John Lennon to my Road Trip playlist");
        assert!(added.reply.contains("Successfully added **Imagine** by **John Lennon**"));

        let listed = orchestrator.process_turn(&mut session, "show me my playlists");
        assert_eq!(listed.calls[0].name, LOOKUP_PERSONAL_DATA);
        assert_eq!(listed.calls[0].arg_str("kind"), Some("playlists"));
        assert!(listed.reply.contains("Road Trip"));

        let tracks = orchestrator.process_turn(&mut session, "what's in my road trip playlist?");
        assert!(tracks.reply.contains("1. Imagine by John Lennon"));
        Ok(())
    }

    #[test]
    fn test_conversational_turn_makes_no_calls() -> Result<()> {
        let temp = TempDir::new()?;
        let orchestrator = services(&temp, Arc::new(OfflineModel))?.orchestrator();
        let outcome = orchestrator.process_turn(&mut Session::new("hal"), "cool");
        assert_eq!(outcome.route, Route::Conversational);
        assert!(outcome.calls.is_empty());
        assert!(!outcome.reply.is_empty());
        Ok(())
    }
}

#[cfg(test)]
mod database_tests {
    use super::*;
    use muse_dj::db::TimeWindow;

    #[test]
    fn test_library_round_trip_through_trait() -> Result<()> {
        let temp = TempDir::new()?;
        let library = init_database(&temp.path().join("library.db"), false)?;
        play(&library, "Karma Police", "Radiohead", "alternative", 2)?;
        play(&library, "Creep", "Radiohead", "alternative", 1)?;
        library.set_loved("Creep", "Radiohead", true)?;

        let data: Arc<dyn PersonalData> = Arc::new(library);
        let artists = data.top_artists(TimeWindow::LongTerm, 5)?;
        assert_eq!(artists.len(), 1);
        assert_eq!(artists[0].plays, 3);
        assert_eq!(data.saved_tracks(5)?[0].title, "Creep");
        assert_eq!(data.top_genre(TimeWindow::ShortTerm)?.as_deref(), Some("alternative"));
        Ok(())
    }

    #[test]
    fn test_init_refuses_to_overwrite() -> Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("library.db");
        init_database(&path, false)?;
        assert!(init_database(&path, false).is_err());
        assert!(init_database(&path, true).is_ok());
        Ok(())
    }
}

#[cfg(test)]
mod cli_tests {
    use std::process::Command;

    #[test]
    fn test_cli_help_lists_commands() {
        let output = Command::new(env!("CARGO_BIN_EXE_muse-dj"))
            .arg("--help")
            .output()
            .expect("Failed to run help command");

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(output.status.success());
        for command in ["chat", "ask", "recommend", "classify", "index-info", "record", "init-db"] {
            assert!(stdout.contains(command), "help is missing {command}");
        }
        assert!(!stdout.contains("complete-genres"));
    }

    #[test]
    fn test_cli_version_flag() {
        let output = Command::new(env!("CARGO_BIN_EXE_muse-dj"))
            .arg("--version")
            .output()
            .expect("Failed to run version command");

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("muse-dj"));
        assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
    }
}
