//! # Intent Classifier
//!
//! Maps an utterance, plus the recent conversation, to a [`Route`]. The
//! cascade is evaluated top to bottom and the first match wins:
//!
//! 1. `remember ...` → [`Route::Memory`]
//! 2. short acknowledgement or emoji → [`Route::Conversational`], unless the
//!    assistant just asked a follow/unfollow/add confirmation, in which case
//!    the answer belongs to [`Route::PersonalData`]
//! 3. personal-data markers ("my", wrapped/summary, top N, recently played,
//!    follow actions, playlists, pronouns resolved against recent turns, time
//!    periods continuing a summary) → [`Route::PersonalData`]
//! 4. song-similarity phrasing → [`Route::Similarity`]
//! 5. mood vocabulary with a recommendation verb, or explicit recommendation
//!    phrasing → [`Route::Similarity`]
//! 6. general-knowledge markers and genre names → [`Route::OpenDomain`]
//! 7. short continuation ("how about", "also", ...) inherits the route of the
//!    preceding turns
//! 8. otherwise [`Route::OpenDomain`]
//!
//! Classification is a pure function of its inputs.

use crate::recommend::detect_genre;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

const CONVERSATIONAL_WORDS: &[&str] = &[
    "yeah", "yep", "ok", "okay", "cool", "nice", "damn", "wow", "hmm", "sure", "alright", "no",
    "nah", "yes", "bye", "hello", "hi", "hey", "thanks", "thx", "thank you", "lol", "i see",
    "got it", "makes sense", "interesting", "good", "bad", "awesome", "great", "please",
];

const EMOJI: &[&str] = &["👍", "👎", "🎵", "🎧", "😊", "😄", "😎", "🔥", "❤️", "🙌"];

const NEGATIVE_WORDS: &[&str] = &["no", "nah", "nope", "bad", "👎", "don't", "dont", "not"];

const FOLLOW_INDICATORS: &[&str] = &[
    "follow",
    "would you like to follow",
    "want to follow",
    "follow them",
    "follow on spotify",
    "start following",
    "unfollow",
    "following",
    "stop following",
];

/// Sentence openers that look like names to the "X is a" pattern.
const NOT_ENTITIES: &[&str] = &[
    "here", "there", "this", "that", "it", "they", "these", "those", "what", "which", "you", "i", "we",
];

const PLAYLIST_INDICATORS: &[&str] = &["playlist", "add to playlist", "create playlist", "would you like to add"];

const SUMMARY_KEYWORDS: &[&str] = &[
    "wrapped",
    "wrap",
    "year in review",
    "music summary",
    "listening summary",
    "recap",
    "annual summary",
    "yearly recap",
    "my year",
];

const TIME_PERIODS: &[&str] = &[
    "month", "week", "year", "days", "6 months", "4 weeks", "all time", "short term", "long term",
];

const MOOD_WORDS: &[&str] = &[
    "chill", "danceable", "upbeat", "energetic", "mellow", "relaxing", "happy", "sad",
    "melancholic", "aggressive", "peaceful", "intense", "high energy", "low energy", "acoustic",
    "electronic", "instrumental", "with vocals", "no vocals", "fast tempo", "slow tempo", "dreamy",
    "atmospheric", "ambient", "lo-fi", "lofi", "vibe", "mood", "feels like", "music for",
    "songs for", "tracks that",
];

const RECOMMEND_VERBS: &[&str] = &[
    "recommend", "suggest", "find", "give me", "i want", "looking for", "need", "play me",
];

const KNOWLEDGE_MARKERS: &[&str] = &[
    "what is", "what's", "what are", "who is", "who's", "whos", "who was", "who are",
    "tell me about", "genre", "style", "history", "facts about", "information about", "explain",
    "describe", "biography", "discography", "albums", "songs by", "music theory", "instruments",
    "band members", "career", "influences", "awards", "when did", "where is", "where did",
];

/// Phrases that make an assistant answer a factual claim.
pub const FACTUAL_MARKERS: &[&str] = &[
    "is a singer",
    "is a rapper",
    "is a band",
    "is an artist",
    "was born in",
    "formed in",
    "their genre is",
    "they are known for",
    "is known for",
    "their career began",
    "their discography",
    "albums include",
    "hit songs include",
    "originated in",
    "characterized by",
    "released in",
];

const PERSONAL_NOUNS: &str = r"top|favou?rite|saved|liked|loved|playlists?|library|follow(?:ed|ing)?|recent(?:ly)?|history|listening|stats|statistics|music|songs?|tracks?|artists?|genres?|taste|year|month|week";

lazy_static! {
    static ref PERSONAL_PATTERNS: Vec<Regex> = [
        r"\btop \d+ (?:songs?|tracks?|artists?)\b",
        r"\btop (?:songs?|tracks?|artists?|genres?)\b",
        r"\brecent(?:ly)? (?:played|listened)\b",
        r"\bwhat (?:did i|have i) (?:been )?(?:listen|play)",
        r"\bshow me my\b",
        r"\bget my\b",
        r"\bsaved (?:songs?|tracks?)\b",
        r"\bliked songs\b",
        r"\bwho (?:am i|do i) follow",
        r"\bam i following\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("personal regex is valid"))
    .collect();

    static ref POSSESSIVE: Regex = Regex::new(&format!(r"\bmy\s+(?:\w+\s+){{0,2}}(?:{})\b", PERSONAL_NOUNS))
        .expect("possessive regex is valid");

    static ref SIMILARITY_PATTERNS: Vec<Regex> = [
        r"\bsimilar to .+",
        r"\blike .+ by .+",
        r"\bsongs? like .+",
        r"\bmusic like .+",
        r"\btracks? like .+",
        r"\bsounds? like .+",
        r"\breminds? me of .+",
        r"\bfind .+ similar to .+",
        r"\bmore like .+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("similarity regex is valid"))
    .collect();

    static ref RECOMMEND_PATTERNS: Vec<Regex> = [
        r"\brecommend (?:me )?(?:some|a few|something)\b",
        r"\bsuggest (?:me )?(?:some|a few|something)\b",
        r"\bfind me (?:some )?(?:music|songs|tracks)\b",
        r"\bgive me (?:some )?(?:songs|music|tracks)\b",
        r"\bi want (?:some )?(?:music|songs)\b",
        r"\bmusic for .+",
        r"\bsongs for .+",
        r"\bwhat should i listen to\b",
        r"\blooking for .+ music\b",
        r"\bneed .+ songs\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("recommendation regex is valid"))
    .collect();

    static ref CONTINUATION: Regex = Regex::new(
        r"^(?:how about|how abt|what about|what abt|and|also|same for|for|now|next)\b|\b(?:too|as well|also)\b"
    )
    .expect("continuation regex is valid");

    static ref ANAPHOR_ACTION: Regex = Regex::new(
        r"\b(follow|unfollow|add|save)\b.*\b(them|him|her|it|this|that|they|this artist|that artist)\b"
    )
    .expect("anaphor regex is valid");

    static ref ANAPHOR_ONLY: Regex = Regex::new(r"^(?:them|him|her|it|this|that|they|this artist|that artist|the artist)$")
        .expect("anaphor-only regex is valid");

    static ref CONFIRMATION_PROMPT: Regex = Regex::new(
        r"(?i)(?:want me to|would you like (?:me )?to|shall i|should i) (follow|unfollow|add) (.+?)\?"
    )
    .expect("confirmation regex is valid");

    static ref ENTITY_PATTERNS: Vec<Regex> = [
        r"(?i)\bwho(?:'s| is| was| are)\s+([^?.!,]+)",
        r"(?i)\bwhos\s+([^?.!,]+)",
        r"(?i)\btell me about\s+([^?.!,]+)",
        r"(?i)\b(?:un)?follow(?:ing)?\s+([^?.!,]+)",
        r"([A-Z][\w&'.\- ]{0,60}?)\s+(?:is|are|was|were)\s+(?:a|an|the)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("entity regex is valid"))
    .collect();

    static ref FOLLOW_TARGET: Regex = Regex::new(
        r"(?i)\b(?:un)?follow(?:ing)?\s+(?:the\s+(?:artist|band)\s+)?([^?.!,]+)"
    )
    .expect("follow target regex is valid");

    static ref CHECK_FOLLOW: Regex = Regex::new(r"\b(?:am i|do i|are we)\s+(?:still\s+)?(?:following|follow)\b")
        .expect("check-follow regex is valid");

    static ref PLAYLIST_ADD: Regex = Regex::new(
        r#"(?i)\badd\s+(.+?)\s+to\s+(?:my\s+|your\s+|the\s+)?(?:playlist\s+["']?([^"'?!.]+?)["']?|["']?([^"'?!.]+?)["']?\s+playlist)\s*[?!.]*$"#
    )
    .expect("playlist add regex is valid");

    static ref PLAYLIST_REMOVE: Regex = Regex::new(
        r#"(?i)\b(?:remove|delete|take)\s+(.+?)\s+(?:out\s+)?(?:from|of)\s+(?:my\s+|your\s+|the\s+)?(?:playlist\s+["']?([^"'?!.]+?)["']?|["']?([^"'?!.]+?)["']?\s+playlist)\s*[?!.]*$"#
    )
    .expect("playlist remove regex is valid");

    static ref PLAYLIST_CREATE: Vec<Regex> = [
        r#"(?i)\b(?:create|make|start)\b.*?\bplaylist(?:\s+(?:called|named|titled))?\s+["']?([^"'?!.]+?)["']?\s*[?!.]*$"#,
        r#"(?i)\b(?:create|make|start)\s+(?:me\s+)?(?:a\s+)?(?:new\s+)?["']?([^"'?!.]+?)["']?\s+playlist\b"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("playlist create regex is valid"))
    .collect();

    static ref PLAYLIST_SHOW: Vec<Regex> = [
        r#"(?i)\b(?:in|on|from)\s+(?:my\s+|the\s+)?["']?([^"'?!.]+?)["']?\s+playlist\b"#,
        r#"(?i)\b(?:tracks|songs)\s+(?:in|on|from)\s+(?:the\s+)?playlist\s+["']?([^"'?!.]+?)["']?\s*[?!.]*$"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("playlist show regex is valid"))
    .collect();

    static ref FOLLOW_LIST: Regex = Regex::new(
        r"\b(?:who|which artists?|what artists?) (?:am i|do i|i'm|i am) (?:still )?(?:follow|following)\b|\bartists i follow\b|\bmy follow(?:ed|ing)\b"
    )
    .expect("follow-list regex is valid");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    PersonalData,
    OpenDomain,
    Similarity,
    Conversational,
    Memory,
}

impl Route {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PersonalData => "personal-data",
            Self::OpenDomain => "open-domain",
            Self::Similarity => "similarity",
            Self::Conversational => "conversational",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Follow-related action implied by the utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityAction {
    Follow,
    Unfollow,
    Check,
}

/// Playlist operation named in an utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistRequest {
    List,
    Show {
        playlist: String,
    },
    Create {
        name: String,
    },
    Add {
        playlist: String,
        title: String,
        artist: Option<String>,
    },
    Remove {
        playlist: String,
        title: String,
        artist: Option<String>,
    },
}

impl PlaylistRequest {
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        matches!(self, Self::Create { .. } | Self::Add { .. } | Self::Remove { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub route: Route,
    /// Artist the utterance acts on, explicit or resolved from context.
    pub entity: Option<String>,
    pub action: Option<EntityAction>,
    pub playlist: Option<PlaylistRequest>,
    /// The user turned down a pending confirmation.
    pub declined: bool,
    pub reason: &'static str,
}

impl Classification {
    fn new(route: Route, reason: &'static str) -> Self {
        Self {
            route,
            entity: None,
            action: None,
            playlist: None,
            declined: false,
            reason,
        }
    }
}

/// Route for `utterance` given `recent` user/assistant texts (oldest first).
#[must_use]
pub fn classify(utterance: &str, recent: &[String]) -> Route {
    classify_detailed(utterance, recent).route
}

/// Route plus the entity and action the orchestrator needs.
#[must_use]
pub fn classify_detailed(utterance: &str, recent: &[String]) -> Classification {
    let classification = cascade(utterance, recent);
    debug!(
        "Classified {:?} as {} ({})",
        utterance, classification.route, classification.reason
    );
    classification
}

fn cascade(utterance: &str, recent: &[String]) -> Classification {
    let text = utterance.trim().to_lowercase();
    if text.is_empty() {
        return Classification::new(Route::Conversational, "empty");
    }

    if text.starts_with("remember ") {
        return Classification::new(Route::Memory, "memory directive");
    }

    if is_filler(&text) {
        return match pending_confirmation(recent) {
            Some(pending) => {
                let declined = is_negative(&text);
                Classification {
                    route: Route::PersonalData,
                    entity: pending.entity,
                    action: pending.action.filter(|_| !declined),
                    playlist: pending.playlist.filter(|_| !declined),
                    declined,
                    reason: "answer to confirmation",
                }
            }
            None => Classification::new(Route::Conversational, "filler"),
        };
    }

    if let Some(classification) = personal_data(utterance, &text, recent) {
        return classification;
    }

    if SIMILARITY_PATTERNS.iter().any(|re| re.is_match(&text)) {
        return Classification::new(Route::Similarity, "similarity phrasing");
    }

    let mood = contains_any(&text, MOOD_WORDS) && contains_any(&text, RECOMMEND_VERBS);
    if mood || RECOMMEND_PATTERNS.iter().any(|re| re.is_match(&text)) {
        return Classification::new(Route::Similarity, "recommendation request");
    }

    if contains_any(&text, KNOWLEDGE_MARKERS) || detect_genre(&text).is_some() {
        return Classification::new(Route::OpenDomain, "knowledge marker");
    }

    if text.split_whitespace().count() <= 4 && CONTINUATION.is_match(&text) {
        if let Some(route) = inherited_route(recent) {
            return Classification::new(route, "continuation");
        }
    }

    Classification::new(Route::OpenDomain, "default")
}

fn personal_data(utterance: &str, text: &str, recent: &[String]) -> Option<Classification> {
    if FOLLOW_LIST.is_match(text) {
        return Some(Classification::new(Route::PersonalData, "followed artists"));
    }

    if let Some(request) = playlist_request(utterance) {
        return Some(Classification {
            playlist: Some(request),
            ..Classification::new(Route::PersonalData, "playlist")
        });
    }

    // Pronoun resolution first: "follow them" needs the entity from context.
    if let Some(caps) = ANAPHOR_ACTION.captures(text) {
        let verb = caps.get(1).map_or("", |m| m.as_str());
        let entity = resolve_entity(recent);
        if entity.is_some() || matches!(verb, "follow" | "unfollow") {
            return Some(Classification {
                action: follow_action(text),
                entity,
                ..Classification::new(Route::PersonalData, "anaphor with action")
            });
        }
    }

    if contains_any(text, FOLLOW_INDICATORS) {
        let entity = follow_target(utterance).or_else(|| resolve_entity(recent));
        return Some(Classification {
            action: follow_action(text),
            entity,
            ..Classification::new(Route::PersonalData, "follow action")
        });
    }

    if contains_any(text, SUMMARY_KEYWORDS) {
        return Some(Classification::new(Route::PersonalData, "listening summary"));
    }

    if PERSONAL_PATTERNS.iter().any(|re| re.is_match(text)) || POSSESSIVE.is_match(text) {
        return Some(Classification::new(Route::PersonalData, "personal marker"));
    }

    let summary_context = recent.iter().rev().take(6).any(|t| {
        let t = t.to_lowercase();
        contains_any(&t, SUMMARY_KEYWORDS) || is_personal_text(&t)
    });
    if contains_any(text, TIME_PERIODS) && summary_context {
        return Some(Classification::new(Route::PersonalData, "time period continuation"));
    }

    None
}

fn follow_action(text: &str) -> Option<EntityAction> {
    if text.contains("unfollow") || text.contains("stop following") {
        Some(EntityAction::Unfollow)
    } else if CHECK_FOLLOW.is_match(text) {
        Some(EntityAction::Check)
    } else if text.contains("follow") {
        Some(EntityAction::Follow)
    } else {
        None
    }
}

/// Artist named after a follow verb, unless it is just a pronoun.
fn follow_target(utterance: &str) -> Option<String> {
    let caps = FOLLOW_TARGET.captures(utterance)?;
    let mut target = caps.get(1)?.as_str().trim();
    for suffix in [" on spotify", " for me", " please", " now"] {
        let Some(start) = target.len().checked_sub(suffix.len()) else {
            continue;
        };
        if target.get(start..).is_some_and(|tail| tail.eq_ignore_ascii_case(suffix)) {
            target = target[..start].trim();
        }
    }
    let target = target.trim_matches(&['"', '\''][..]).trim();
    let lower = target.to_lowercase();
    (!target.is_empty() && !ANAPHOR_ONLY.is_match(&lower)).then(|| target.to_string())
}

/// Most recent entity mentioned in the conversation.
fn resolve_entity(recent: &[String]) -> Option<String> {
    recent.iter().rev().find_map(|t| {
        ENTITY_PATTERNS.iter().find_map(|re| {
            let candidate = re.captures(t)?.get(1)?.as_str().trim();
            let candidate = candidate.trim_matches(&['"', '\''][..]).trim();
            let lower = candidate.to_lowercase();
            let first_word = lower.split_whitespace().next().unwrap_or_default();
            let usable = !candidate.is_empty()
                && !ANAPHOR_ONLY.is_match(&lower)
                && !NOT_ENTITIES.contains(&first_word)
                && candidate.chars().count() <= 60;
            usable.then(|| candidate.to_string())
        })
    })
}

/// Playlist operation in `utterance`, if it mentions a playlist at all.
///
/// ```
/// use muse_dj::classifier::{playlist_request, PlaylistRequest};
///
/// assert_eq!(
///     playlist_request("what's in my Road Trip playlist?"),
///     Some(PlaylistRequest::Show { playlist: "Road Trip".to_string() })
/// );
/// assert_eq!(playlist_request("show me my playlists"), Some(PlaylistRequest::List));
/// assert_eq!(playlist_request("songs like Imagine"), None);
/// ```
#[must_use]
pub fn playlist_request(utterance: &str) -> Option<PlaylistRequest> {
    let lower = utterance.to_lowercase();
    if !contains_any(&lower, &["playlist", "playlists"]) {
        return None;
    }

    if let Some(caps) = PLAYLIST_ADD.captures(utterance) {
        if let Some((playlist, title, artist)) = song_and_playlist(&caps) {
            return Some(PlaylistRequest::Add { playlist, title, artist });
        }
    }
    if let Some(caps) = PLAYLIST_REMOVE.captures(utterance) {
        if let Some((playlist, title, artist)) = song_and_playlist(&caps) {
            return Some(PlaylistRequest::Remove { playlist, title, artist });
        }
    }
    if let Some(name) = first_usable_capture(&PLAYLIST_CREATE, utterance) {
        return Some(PlaylistRequest::Create { name });
    }
    if let Some(playlist) = first_usable_capture(&PLAYLIST_SHOW, utterance) {
        return Some(PlaylistRequest::Show { playlist });
    }
    Some(PlaylistRequest::List)
}

/// Song (group 1, "title by artist") and playlist (group 2 or 3).
fn song_and_playlist(caps: &regex::Captures<'_>) -> Option<(String, String, Option<String>)> {
    let song = caps.get(1)?.as_str().trim();
    let playlist = caps.get(2).or_else(|| caps.get(3))?.as_str();
    let playlist = usable_playlist_name(playlist)?;

    let (title, artist) = match song.rfind(" by ").or_else(|| song.rfind(" By ")) {
        Some(at) => (song[..at].trim(), Some(song[at + 4..].trim().to_string())),
        None => (song, None),
    };
    let title = title.trim_matches(&['"', '\''][..]).trim();
    (!title.is_empty()).then(|| (playlist, title.to_string(), artist.filter(|a| !a.is_empty())))
}

fn first_usable_capture(patterns: &[Regex], utterance: &str) -> Option<String> {
    patterns
        .iter()
        .filter_map(|re| re.captures(utterance)?.get(1))
        .find_map(|m| usable_playlist_name(m.as_str()))
}

/// Trimmed name, unless it is a filler word rather than a name.
fn usable_playlist_name(name: &str) -> Option<String> {
    const NOT_NAMES: &[&str] = &["a", "an", "the", "my", "your", "new", "me", "this", "that", "it", "one"];
    let name = name.trim().trim_matches(&['"', '\''][..]).trim();
    let lower = name.to_lowercase();
    (!name.is_empty() && !NOT_NAMES.contains(&lower.as_str())).then(|| name.to_string())
}

/// Question the assistant is still waiting on.
struct PendingConfirmation {
    action: Option<EntityAction>,
    entity: Option<String>,
    playlist: Option<PlaylistRequest>,
}

/// Open follow/unfollow/add prompt in the last two texts.
fn pending_confirmation(recent: &[String]) -> Option<PendingConfirmation> {
    recent.iter().rev().take(2).find_map(|t| {
        if let Some(caps) = CONFIRMATION_PROMPT.captures(t) {
            let action = match caps.get(1)?.as_str().to_lowercase().as_str() {
                "follow" => Some(EntityAction::Follow),
                "unfollow" => Some(EntityAction::Unfollow),
                _ => None,
            };
            let entity = caps.get(2).map(|m| m.as_str().trim().to_string());
            let playlist = playlist_request(t).filter(PlaylistRequest::is_mutating);
            return Some(PendingConfirmation { action, entity, playlist });
        }
        let lower = t.to_lowercase();
        (lower.contains('?') && contains_any(&lower, PLAYLIST_INDICATORS)).then(|| PendingConfirmation {
            action: None,
            entity: None,
            playlist: playlist_request(t).filter(PlaylistRequest::is_mutating),
        })
    })
}

fn inherited_route(recent: &[String]) -> Option<Route> {
    recent.iter().rev().take(6).find_map(|t| {
        let lower = t.to_lowercase();
        if is_personal_text(&lower) {
            Some(Route::PersonalData)
        } else if SIMILARITY_PATTERNS.iter().any(|re| re.is_match(&lower))
            || RECOMMEND_PATTERNS.iter().any(|re| re.is_match(&lower))
        {
            Some(Route::Similarity)
        } else {
            None
        }
    })
}

fn is_personal_text(lower: &str) -> bool {
    PERSONAL_PATTERNS.iter().any(|re| re.is_match(lower)) || POSSESSIVE.is_match(lower)
}

fn is_filler(text: &str) -> bool {
    let tokens: Vec<&str> = text
        .split_whitespace()
        .map(|t| t.trim_matches(&['!', '.', ',', '?', '~'][..]))
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() || tokens.len() > 3 {
        return false;
    }

    let phrase = tokens.join(" ");
    CONVERSATIONAL_WORDS.contains(&phrase.as_str())
        || tokens
            .iter()
            .all(|t| CONVERSATIONAL_WORDS.contains(t) || EMOJI.contains(t))
}

fn is_negative(text: &str) -> bool {
    text.split_whitespace()
        .map(|t| t.trim_matches(&['!', '.', ',', '?'][..]))
        .any(|t| NEGATIVE_WORDS.contains(&t))
}

/// Whole-phrase containment with word boundaries.
fn contains_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| {
        text.match_indices(phrase).any(|(start, _)| {
            let end = start + phrase.len();
            let before = text[..start].chars().next_back();
            let after = text[end..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
    })
}

/// Whether assistant text states facts that must come from a capability.
#[must_use]
pub fn has_factual_markers(text: &str) -> bool {
    contains_any(&text.to_lowercase(), FACTUAL_MARKERS)
}

/// Summary ("wrapped") request.
#[must_use]
pub fn is_summary_request(text: &str) -> bool {
    contains_any(&text.to_lowercase(), SUMMARY_KEYWORDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_memory_directive() {
        assert_eq!(classify("remember I love jazz", &[]), Route::Memory);
        assert_eq!(classify("Remember that I hate country", &[]), Route::Memory);
        assert_ne!(classify("do you remember me", &[]), Route::Memory);
    }

    #[test]
    fn test_filler_is_conversational() {
        for text in ["ok", "cool!", "thank you", "👍", "wow nice", "got it"] {
            assert_eq!(classify(text, &[]), Route::Conversational, "{text}");
        }
        assert_eq!(classify("   ", &[]), Route::Conversational);
        assert_ne!(classify("ok what are my top tracks", &[]), Route::Conversational);
    }

    #[test]
    fn test_filler_answering_follow_prompt() {
        let recent = ctx(&["do I follow Radiohead?", "You're not following Radiohead yet. Want me to follow Radiohead?"]);

        let yes = classify_detailed("yes", &recent);
        assert_eq!(yes.route, Route::PersonalData);
        assert_eq!(yes.action, Some(EntityAction::Follow));
        assert_eq!(yes.entity.as_deref(), Some("Radiohead"));

        let no = classify_detailed("no thanks", &recent);
        assert_eq!(no.route, Route::PersonalData);
        assert!(no.declined);
        assert_eq!(no.action, None);
    }

    #[test]
    fn test_personal_data_markers() {
        for text in [
            "what are my top tracks",
            "show me my top 5 artists",
            "what did I listen to recently",
            "recently played songs",
            "give me my wrapped",
            "top 10 songs",
        ] {
            assert_eq!(classify(text, &[]), Route::PersonalData, "{text}");
        }
    }

    #[test]
    fn test_follow_actions_and_entities() {
        let follow = classify_detailed("follow Radiohead on Spotify", &[]);
        assert_eq!(follow.route, Route::PersonalData);
        assert_eq!(follow.action, Some(EntityAction::Follow));
        assert_eq!(follow.entity.as_deref(), Some("Radiohead"));

        let unfollow = classify_detailed("please unfollow Coldplay", &[]);
        assert_eq!(unfollow.action, Some(EntityAction::Unfollow));
        assert_eq!(unfollow.entity.as_deref(), Some("Coldplay"));

        let check = classify_detailed("am I following Bjork?", &[]);
        assert_eq!(check.action, Some(EntityAction::Check));
        assert_eq!(check.entity.as_deref(), Some("Bjork"));
    }

    #[test]
    fn test_anaphor_resolves_from_context() {
        let recent = ctx(&["who is Burna Boy?", "🎵 Burna Boy is a Nigerian singer."]);
        let result = classify_detailed("follow him", &recent);

        assert_eq!(result.route, Route::PersonalData);
        assert_eq!(result.action, Some(EntityAction::Follow));
        assert_eq!(result.entity.as_deref(), Some("Burna Boy"));
    }

    #[test]
    fn test_similarity_precedence() {
        assert_eq!(classify("songs like Hotel California", &[]), Route::Similarity);
        assert_eq!(classify("songs similar to Imagine by John Lennon", &[]), Route::Similarity);
        assert_eq!(classify("recommend some chill music for studying", &[]), Route::Similarity);
        assert_eq!(classify("what should I listen to", &[]), Route::Similarity);
    }

    #[test]
    fn test_open_domain_markers_and_default() {
        assert_eq!(classify("who is Burna Boy", &[]), Route::OpenDomain);
        assert_eq!(classify("tell me about the history of jazz", &[]), Route::OpenDomain);
        assert_eq!(classify("is Thriller the best selling album ever", &[]), Route::OpenDomain);
    }

    #[test]
    fn test_continuation_inherits_route() {
        let personal = ctx(&["what are my top tracks", "Your top tracks: ..."]);
        assert_eq!(classify("what about last month", &personal), Route::PersonalData);
        assert_eq!(classify("and artists?", &personal), Route::PersonalData);

        let similar = ctx(&["songs like Imagine", "Here are some songs"]);
        assert_eq!(classify("how about Queen", &similar), Route::Similarity);

        assert_eq!(classify("how about Queen", &[]), Route::OpenDomain);
    }

    #[test]
    fn test_classification_is_pure() {
        let recent = ctx(&["what are my top tracks"]);
        let first = classify_detailed("and artists?", &recent);
        let second = classify_detailed("and artists?", &recent);
        assert_eq!(first, second);
    }

    #[test]
    fn test_playlist_requests() {
        let list = classify_detailed("show me my playlists", &[]);
        assert_eq!(list.route, Route::PersonalData);
        assert_eq!(list.playlist, Some(PlaylistRequest::List));

        assert_eq!(
            playlist_request("add Imagine by John Lennon to my Road Trip playlist"),
            Some(PlaylistRequest::Add {
                playlist: "Road Trip".to_string(),
                title: "Imagine".to_string(),
                artist: Some("John Lennon".to_string()),
            })
        );
        assert_eq!(
            playlist_request("remove Creep from playlist Focus"),
            Some(PlaylistRequest::Remove {
                playlist: "Focus".to_string(),
                title: "Creep".to_string(),
                artist: None,
            })
        );
        assert_eq!(
            playlist_request("create a playlist called Late Night Drive"),
            Some(PlaylistRequest::Create { name: "Late Night Drive".to_string() })
        );
        assert_eq!(
            playlist_request("make me a workout playlist"),
            Some(PlaylistRequest::Create { name: "workout".to_string() })
        );
        assert_eq!(
            playlist_request("what songs are on my playlist"),
            Some(PlaylistRequest::List)
        );
        assert_eq!(classify("add Hey Jude to Sunday playlist", &[]), Route::PersonalData);
    }

    #[test]
    fn test_yes_to_add_prompt_carries_playlist_request() {
        let recent = ctx(&["Want me to add Imagine to your Road Trip playlist?"]);

        let yes = classify_detailed("sure", &recent);
        assert_eq!(yes.route, Route::PersonalData);
        assert_eq!(
            yes.playlist,
            Some(PlaylistRequest::Add {
                playlist: "Road Trip".to_string(),
                title: "Imagine".to_string(),
                artist: None,
            })
        );

        let no = classify_detailed("nah", &recent);
        assert!(no.declined);
        assert_eq!(no.playlist, None);
    }

    #[test]
    fn test_factual_markers() {
        assert!(has_factual_markers("Radiohead is a band formed in 1985."));
        assert!(!has_factual_markers("Let me look that up."));
        assert!(is_summary_request("show me my Wrapped"));
    }
}
