//! # Recommendation Engine
//!
//! Nearest-neighbour search over the [`EmbeddingIndex`].
//!
//! ## Query resolution
//!
//! 1. **Entity reference**: "similar to X", "songs like X by Y", "sounds like X",
//!    "reminds me of X". A matched song's own combined vector becomes the query
//!    (an *anchored* query). An unmatched reference is reported as
//!    [`RecommendError::EntityNotFoundLocally`] so the caller can fall back to
//!    an external catalog.
//! 2. **Free text**: the query is embedded with the same token model. Mood
//!    words ("chill", "sad", "energetic", ...) set target audio attributes
//!    that fill the numeric segment; without them it stays zero.
//! 3. **Genre filter**: an explicit genre or a genre keyword in the query
//!    narrows the pool (the full catalog is used if nothing matches).
//! 4. **Popularity mode**: "popular/top/hit/..." inside a genre returns the
//!    most popular rows instead of similarity neighbours.
//!
//! ## Self-similarity
//!
//! For an anchored query the anchor song itself is kept as the first candidate,
//! flagged with `is_anchor` and similarity 1.0. It counts toward `count`.

use crate::clients::ExternalTrack;
use crate::error::{EntityReference, RecommendError};
use crate::index::{cosine_similarity, EmbeddingIndex};
use lazy_static::lazy_static;
use log::{debug, info};
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;

/// (genre key, pattern, catalog aliases). `k-pop` is listed before `pop` so it wins.
const GENRE_TABLE: &[(&str, &str, &[&str])] = &[
    ("k-pop", r"(?i)\bk-?pop\b", &["k-pop", "kpop"]),
    ("pop", r"(?i)\bpop\b", &["pop"]),
    ("rock", r"(?i)\brock\b", &["rock"]),
    ("jazz", r"(?i)\bjazz\b", &["jazz"]),
    ("hip-hop", r"(?i)\b(?:hip-?hop|hip hop|rap)\b", &["hip-hop", "hip hop", "rap"]),
    ("country", r"(?i)\bcountry\b", &["country"]),
    ("classical", r"(?i)\bclassical\b", &["classical"]),
    ("electronic", r"(?i)\b(?:electronic|edm)\b", &["electronic", "edm"]),
    ("r-n-b", r"(?i)(?:\br&b\b|\brnb\b|\br-n-b\b)", &["r-n-b", "r&b", "rnb"]),
    ("reggae", r"(?i)\breggae\b", &["reggae"]),
    ("folk", r"(?i)\bfolk\b", &["folk"]),
    ("indie", r"(?i)\bindie\b", &["indie"]),
    ("metal", r"(?i)\bmetal\b", &["metal"]),
    ("blues", r"(?i)\bblues\b", &["blues"]),
];

/// Mood phrase pattern and the audio attributes it aims for (0-1 scale).
/// Moods that target the same attribute are averaged.
const MOOD_TABLE: &[(&str, &[(&str, f64)])] = &[
    (r"(?i)\b(?:chill|chilled|mellow|relaxing|relaxed)\b", &[("energy", 0.2)]),
    (r"(?i)\b(?:calm|peaceful)\b", &[("energy", 0.15), ("acousticness", 0.7)]),
    (r"(?i)\b(?:low energy|tired|sleepy)\b", &[("energy", 0.1)]),
    (r"(?i)\b(?:happy|upbeat|cheerful)\b", &[("valence", 0.9), ("energy", 0.7)]),
    (r"(?i)\b(?:sad|melancholic|melancholy)\b", &[("valence", 0.2), ("energy", 0.3)]),
    (r"(?i)\bmoody\b", &[("valence", 0.3)]),
    (r"(?i)\b(?:energetic|high energy|intense|hype)\b", &[("energy", 0.95)]),
    (r"(?i)\b(?:aggressive|angry)\b", &[("energy", 0.95), ("valence", 0.3)]),
    (r"(?i)\b(?:danceable|dance|party)\b", &[("danceability", 0.85), ("energy", 0.8)]),
    (r"(?i)\bacoustic\b", &[("acousticness", 0.9)]),
    (r"(?i)\belectronic\b", &[("acousticness", 0.1)]),
    (r"(?i)\b(?:instrumental|no vocals)\b", &[("instrumentalness", 0.9)]),
    (r"(?i)\bwith vocals\b", &[("instrumentalness", 0.05)]),
    (r"(?i)\b(?:dreamy|atmospheric|ambient)\b", &[("energy", 0.3), ("instrumentalness", 0.6)]),
];

lazy_static! {
    static ref MOODS: Vec<(Regex, &'static [(&'static str, f64)])> = MOOD_TABLE
        .iter()
        .map(|&(pattern, targets)| (Regex::new(pattern).expect("mood regex is valid"), targets))
        .collect();

    static ref REFERENCE_PATTERNS: Vec<Regex> = [
        r"(?i)\bsimilar\s+to\s+(.+)",
        r"(?i)\b(?:songs?|music|tracks?|something|stuff|anything)\s+like\s+(.+)",
        r"(?i)\bsounds?\s+like\s+(.+)",
        r"(?i)\breminds?\s+me\s+of\s+(.+)",
        r"(?i)^\s*(?:more\s+)?like\s+(.+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("reference regex is valid"))
    .collect();

    static ref BY_SPLIT: Regex = Regex::new(r"(?i)^(.+)\s+by\s+(.+)$").expect("by-split regex is valid");

    static ref POPULARITY_WORDS: Regex =
        Regex::new(r"(?i)\b(?:popular|top|hits?|charts?|trending|famous|best)\b")
            .expect("popularity regex is valid");

    static ref GENRES: Vec<(&'static str, Regex, &'static [&'static str])> = GENRE_TABLE
        .iter()
        .map(|&(key, pattern, aliases)| (key, Regex::new(pattern).expect("genre regex is valid"), aliases))
        .collect();
}

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    LocalDatabase,
    ExternalSearch,
}

/// Target audio attributes implied by the mood words in `text`.
///
/// ```
/// use muse_dj::recommend::mood_targets;
///
/// assert_eq!(mood_targets("some sad chill songs"), vec![("energy", 0.25), ("valence", 0.2)]);
/// assert!(mood_targets("songs by Queen").is_empty());
/// ```
#[must_use]
pub fn mood_targets(text: &str) -> Vec<(&'static str, f64)> {
    let mut sums: Vec<(&'static str, f64, u32)> = Vec::new();
    for (_, targets) in MOODS.iter().filter(|(re, _)| re.is_match(text)) {
        for &(attribute, value) in *targets {
            match sums.iter_mut().find(|(name, _, _)| *name == attribute) {
                Some((_, sum, n)) => {
                    *sum += value;
                    *n += 1;
                }
                None => sums.push((attribute, value, 1)),
            }
        }
    }
    let mut targets: Vec<(&'static str, f64)> = sums
        .into_iter()
        .map(|(name, sum, n)| (name, sum / f64::from(n)))
        .collect();
    targets.sort_by(|a, b| a.0.cmp(b.0));
    targets
}

/// Coarse description of how a track feels, from its raw attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VibeProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub danceability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocals: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub title: String,
    pub artists: String,
    pub entity_id: Option<String>,
    pub similarity: f64,
    pub source: CandidateSource,
    pub is_anchor: bool,
    pub popularity: Option<f64>,
    pub vibe: Option<VibeProfile>,
}

impl Candidate {
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} by {}", self.title, self.artists)
    }
}

pub struct RecommendationEngine {
    index: Arc<EmbeddingIndex>,
}

impl RecommendationEngine {
    #[must_use]
    pub fn new(index: Arc<EmbeddingIndex>) -> Self {
        Self { index }
    }

    #[must_use]
    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    /// Recommend up to `count` songs for `query`.
    ///
    /// # Errors
    ///
    /// [`RecommendError::EntityNotFoundLocally`] when the query names a song
    /// that is not in the catalog.
    pub fn recommend(
        &self,
        query: &str,
        count: usize,
        genre: Option<&str>,
    ) -> Result<Vec<Candidate>, RecommendError> {
        if self.index.is_empty() || count == 0 {
            return Ok(Vec::new());
        }

        let Some(reference) = extract_reference(query) else {
            return Ok(self.recommend_free_text(query, count, genre));
        };

        let Some(anchor) = self.resolve_reference(&reference) else {
            info!("Referenced song '{reference}' is not in the local catalog");
            return Err(RecommendError::EntityNotFoundLocally(reference));
        };

        debug!("Anchored query '{query}' to catalog row {anchor}");
        let genre_key = genre.map(normalize_genre);
        let (pool, _) = self.genre_pool(genre_key.as_deref());
        let query_vector = self.index.vector(anchor).unwrap_or(&[]).to_vec();

        Ok(self.rank(&query_vector, &pool, count, Some(anchor)))
    }

    /// Recommend from the query text alone, ignoring any song reference.
    #[must_use]
    pub fn recommend_free_text(&self, query: &str, count: usize, genre: Option<&str>) -> Vec<Candidate> {
        if self.index.is_empty() || count == 0 {
            return Vec::new();
        }

        let genre_key = genre
            .map(normalize_genre)
            .or_else(|| detect_genre(query).map(str::to_string));
        let (pool, filtered) = self.genre_pool(genre_key.as_deref());

        if filtered && wants_popular(query) {
            debug!("Popularity mode for genre {genre_key:?}");
            return self.most_popular(&pool, count);
        }

        let targets = mood_targets(query);
        if !targets.is_empty() {
            debug!("Mood targets for '{query}': {targets:?}");
        }
        let query_vector = self.index.query_vector_with_targets(query, &targets);
        self.rank(&query_vector, &pool, count, None)
    }

    /// Catalog row for a reference: song+artist, then the whole phrase as a
    /// title (for titles containing "by"), then the title alone.
    #[must_use]
    pub fn resolve_reference(&self, reference: &EntityReference) -> Option<usize> {
        if let Some(idx) = self.find_entity(reference) {
            return Some(idx);
        }
        reference.artist.as_ref()?;

        let whole = EntityReference::new(reference.to_string(), None);
        self.find_entity(&whole)
            .or_else(|| self.find_entity(&EntityReference::new(reference.title.clone(), None)))
    }

    /// Exact title match preferred over containment; artist must be contained
    /// in the artists field when given. First catalog row wins.
    #[must_use]
    pub fn find_entity(&self, reference: &EntityReference) -> Option<usize> {
        let title = reference.title.trim().to_lowercase();
        if title.is_empty() {
            return None;
        }
        let artist = reference.artist.as_ref().map(|a| a.trim().to_lowercase());

        let entities = self.index.catalog().entities();
        let artist_ok = |idx: usize| {
            artist
                .as_ref()
                .map_or(true, |a| entities[idx].artists.to_lowercase().contains(a.as_str()))
        };

        let exact = (0..entities.len())
            .find(|&i| entities[i].name.to_lowercase() == title && artist_ok(i));
        if exact.is_some() || title.chars().count() < 2 {
            return exact;
        }

        (0..entities.len()).find(|&i| entities[i].name.to_lowercase().contains(&title) && artist_ok(i))
    }

    fn genre_pool(&self, genre_key: Option<&str>) -> (Vec<usize>, bool) {
        let all = || (0..self.index.len()).collect::<Vec<_>>();
        let Some(key) = genre_key else {
            return (all(), false);
        };

        let pool: Vec<usize> = self
            .index
            .catalog()
            .entities()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.genre.as_deref().is_some_and(|g| genre_matches(g, key)))
            .map(|(i, _)| i)
            .collect();

        if pool.is_empty() {
            debug!("No rows for genre '{key}', using the full catalog");
            (all(), false)
        } else {
            (pool, true)
        }
    }

    fn rank(&self, query: &[f32], pool: &[usize], count: usize, anchor: Option<usize>) -> Vec<Candidate> {
        let mut scored: Vec<(usize, f64)> = pool
            .par_iter()
            .filter(|&&i| Some(i) != anchor)
            .map(|&i| (i, cosine_similarity(query, self.index.vector(i).unwrap_or(&[]))))
            .collect();

        // Stable: equal similarities keep catalog order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut candidates = Vec::with_capacity(count);
        if let Some(anchor) = anchor {
            candidates.push(self.candidate(anchor, 1.0, true));
        }
        let remaining = count.saturating_sub(candidates.len());
        candidates.extend(
            scored
                .into_iter()
                .take(remaining)
                .map(|(i, similarity)| self.candidate(i, similarity, false)),
        );
        candidates
    }

    fn most_popular(&self, pool: &[usize], count: usize) -> Vec<Candidate> {
        let entities = self.index.catalog().entities();
        let mut ranked = pool.to_vec();
        ranked.sort_by(|&a, &b| {
            let pa = entities[a].popularity.unwrap_or(f64::NEG_INFINITY);
            let pb = entities[b].popularity.unwrap_or(f64::NEG_INFINITY);
            pb.total_cmp(&pa)
        });

        ranked
            .into_iter()
            .take(count)
            .map(|i| self.candidate(i, 1.0, false))
            .collect()
    }

    fn candidate(&self, idx: usize, similarity: f64, is_anchor: bool) -> Candidate {
        let catalog = self.index.catalog();
        let entity = &catalog.entities()[idx];
        Candidate {
            title: entity.name.clone(),
            artists: entity.artists.clone(),
            entity_id: Some(entity.id.clone()),
            similarity,
            source: CandidateSource::LocalDatabase,
            is_anchor,
            popularity: entity.popularity,
            vibe: vibe_profile(
                catalog.attribute(idx, "danceability"),
                catalog.attribute(idx, "energy"),
                catalog.attribute(idx, "valence"),
                catalog.attribute(idx, "acousticness"),
                catalog.attribute(idx, "instrumentalness"),
            ),
        }
    }
}

fn vibe_profile(
    danceability: Option<f64>,
    energy: Option<f64>,
    valence: Option<f64>,
    acousticness: Option<f64>,
    instrumentalness: Option<f64>,
) -> Option<VibeProfile> {
    let profile = VibeProfile {
        danceability,
        energy,
        mood: valence.map(|v| if v > 0.5 { "positive" } else { "mellow" }),
        style: acousticness.map(|a| if a > 0.5 { "acoustic" } else { "electronic" }),
        vocals: instrumentalness.map(|i| if i > 0.5 { "minimal" } else { "prominent" }),
    };

    let empty = profile.danceability.is_none()
        && profile.energy.is_none()
        && profile.mood.is_none()
        && profile.style.is_none()
        && profile.vocals.is_none();
    (!empty).then_some(profile)
}

/// Wrap external catalog hits; they are direct matches, not ranked neighbours.
#[must_use]
pub fn external_candidates(tracks: &[ExternalTrack]) -> Vec<Candidate> {
    tracks
        .iter()
        .map(|t| Candidate {
            title: t.title.clone(),
            artists: t.artists.clone(),
            entity_id: t.id.clone(),
            similarity: 1.0,
            source: CandidateSource::ExternalSearch,
            is_anchor: false,
            popularity: t.popularity.map(f64::from),
            vibe: None,
        })
        .collect()
}

/// Song (and optional artist) named by a similarity phrase.
#[must_use]
pub fn extract_reference(query: &str) -> Option<EntityReference> {
    let captured = REFERENCE_PATTERNS
        .iter()
        .find_map(|re| re.captures(query))
        .and_then(|caps| caps.get(1))
        .map(|m| clean_reference(m.as_str()))
        .filter(|r| !r.is_empty())?;

    match BY_SPLIT.captures(&captured) {
        Some(caps) => {
            let title = clean_reference(&caps[1]);
            let artist = clean_reference(&caps[2]);
            if title.is_empty() || artist.is_empty() {
                Some(EntityReference::new(captured, None))
            } else {
                Some(EntityReference::new(title, Some(artist)))
            }
        }
        None => Some(EntityReference::new(captured, None)),
    }
}

fn clean_reference(raw: &str) -> String {
    let mut text = raw.trim().trim_end_matches(&['?', '!', '.', ','][..]).trim();
    for suffix in [" please", " pls", " thanks"] {
        let Some(start) = text.len().checked_sub(suffix.len()) else {
            continue;
        };
        if text.get(start..).is_some_and(|tail| tail.eq_ignore_ascii_case(suffix)) {
            text = text[..start].trim();
        }
    }
    text.trim_matches(&['"', '\'', '“', '”'][..]).trim().to_string()
}

/// Genre keyword mentioned in free text.
#[must_use]
pub fn detect_genre(text: &str) -> Option<&'static str> {
    GENRES
        .iter()
        .find(|(_, re, _)| re.is_match(text))
        .map(|(key, _, _)| *key)
}

/// Canonical key for a user-supplied genre, or the lowercased input.
#[must_use]
pub fn normalize_genre(genre: &str) -> String {
    detect_genre(genre).map_or_else(|| genre.trim().to_lowercase(), str::to_string)
}

fn genre_matches(entity_genre: &str, key: &str) -> bool {
    let genre = entity_genre.trim().to_lowercase();
    if genre == key {
        return true;
    }
    GENRES
        .iter()
        .find(|(k, _, _)| *k == key)
        .is_some_and(|(_, _, aliases)| aliases.contains(&genre.as_str()))
}

#[must_use]
pub fn wants_popular(text: &str) -> bool {
    POPULARITY_WORDS.is_match(text)
}

#[derive(Serialize)]
struct Report<'a> {
    query: &'a str,
    recommendations: Vec<ReportEntry<'a>>,
}

#[derive(Serialize)]
struct ReportEntry<'a> {
    rank: usize,
    track: String,
    similarity_score: f64,
    source: CandidateSource,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    anchor: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    vibe_profile: Option<&'a VibeProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    popularity: Option<f64>,
}

/// JSON report handed back to the language model.
#[must_use]
pub fn render_report(query: &str, candidates: &[Candidate]) -> String {
    let report = Report {
        query,
        recommendations: candidates
            .iter()
            .enumerate()
            .map(|(i, c)| ReportEntry {
                rank: i + 1,
                track: c.label(),
                similarity_score: (c.similarity * 1000.0).round() / 1000.0,
                source: c.source,
                anchor: c.is_anchor,
                vibe_profile: c.vibe.as_ref(),
                popularity: c.popularity,
            })
            .collect(),
    };

    serde_json::to_string_pretty(&report)
        .unwrap_or_else(|e| format!("{{\"query\": {query:?}, \"error\": \"{e}\"}}"))
}
