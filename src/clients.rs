//! HTTP clients for the two external services the capabilities call:
//! open-domain music search (Tavily) and the external song catalog
//! (Spotify Web API search).
//!
//! Both are blocking (`reqwest::blocking`), since every capability already
//! runs on its own worker thread under the registry's timeout. Each client is
//! optional: when its key is not in the environment the service is simply
//! absent and the capability reports that it is not configured.

use crate::config::SearchConfig;
use anyhow::{bail, Context, Result};
use log::{debug, info};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;

/// Music-focused domains searched for open-domain questions.
const MUSIC_DOMAINS: &[&str] = &[
    "spotify.com",
    "genius.com",
    "allmusic.com",
    "musicbrainz.org",
    "last.fm",
    "bandcamp.com",
    "soundcloud.com",
];

/// Answers open-domain music questions.
pub trait OpenDomainSearch: Send + Sync {
    /// Text answer for `query`; an empty string means nothing was found.
    ///
    /// # Errors
    ///
    /// Transport or service failures.
    fn search(&self, query: &str) -> Result<String>;
}

/// A song found in an external catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalTrack {
    pub id: Option<String>,
    pub title: String,
    pub artists: String,
    pub album: Option<String>,
    pub popularity: Option<u32>,
}

/// Looks up songs that may be missing from the local catalog.
pub trait ExternalCatalog: Send + Sync {
    /// # Errors
    ///
    /// Transport or service failures.
    fn search_tracks(&self, query: &str, limit: usize) -> Result<Vec<ExternalTrack>>;
}

pub struct TavilySearch {
    client: Client,
    endpoint: String,
    api_key: String,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    content: String,
}

impl TavilySearch {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(endpoint: &str, api_key: String, config: &SearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build HTTP client for open-domain search")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
            max_results: config.max_results,
        })
    }

    /// Client for the configured endpoint, or `None` without an API key.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn from_config(config: &SearchConfig) -> Result<Option<Self>> {
        match config.tavily_api_key() {
            Some(key) => Ok(Some(Self::new(&config.tavily_endpoint, key, config)?)),
            None => {
                info!("{} not set, open-domain search disabled", config.tavily_api_key_env);
                Ok(None)
            }
        }
    }
}

/// Add music context to bare "who is X" questions.
#[must_use]
pub fn enrich_query(query: &str) -> String {
    let lower = query.to_lowercase();
    let asks_about_someone = ["who is", "whos", "who's", "tell me about"]
        .iter()
        .any(|p| lower.contains(p));
    let already_musical = ["artist", "musician", "singer", "rapper", "band", "music"]
        .iter()
        .any(|w| lower.contains(w));

    if asks_about_someone && !already_musical {
        format!("{query} artist musician music")
    } else {
        query.to_string()
    }
}

/// Prefer the service's direct answer; otherwise stitch the top three snippets.
fn format_answer(response: TavilyResponse) -> String {
    if let Some(answer) = response.answer.filter(|a| !a.trim().is_empty()) {
        return format!("🎵 {}", answer.trim());
    }

    let snippets: Vec<String> = response
        .results
        .iter()
        .filter(|r| !r.content.trim().is_empty())
        .take(3)
        .map(|r| {
            let snippet: String = r.content.chars().take(200).collect();
            format!("{snippet}...")
        })
        .collect();

    if snippets.is_empty() {
        String::new()
    } else {
        format!("Based on my search: {}", snippets.join(" "))
    }
}

impl OpenDomainSearch for TavilySearch {
    fn search(&self, query: &str) -> Result<String> {
        let enriched = enrich_query(query);
        debug!("Open-domain search: {enriched}");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "query": enriched,
                "search_depth": "advanced",
                "include_answer": true,
                "max_results": self.max_results,
                "include_domains": MUSIC_DOMAINS,
            }))
            .send()
            .context("Search request failed")?;

        let status = response.status();
        if status.as_u16() == 401 {
            bail!("search service rejected the API key");
        }
        if !status.is_success() {
            bail!("search service returned error {}", status.as_u16());
        }

        let body: TavilyResponse = response.json().context("Search service sent malformed JSON")?;
        Ok(format_answer(body))
    }
}

pub struct SpotifyCatalog {
    client: Client,
    endpoint: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct SpotifySearchResponse {
    tracks: Option<SpotifyPage>,
}

#[derive(Debug, Deserialize)]
struct SpotifyPage {
    #[serde(default)]
    items: Vec<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    album: Option<SpotifyAlbum>,
    popularity: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbum {
    name: String,
}

impl From<SpotifyTrack> for ExternalTrack {
    fn from(track: SpotifyTrack) -> Self {
        Self {
            id: track.id,
            title: track.name,
            artists: track
                .artists
                .into_iter()
                .map(|a| a.name)
                .collect::<Vec<_>>()
                .join(", "),
            album: track.album.map(|a| a.name),
            popularity: track.popularity,
        }
    }
}

impl SpotifyCatalog {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(endpoint: &str, token: String, config: &SearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build HTTP client for catalog search")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            token,
        })
    }

    /// Client using a pre-issued access token, or `None` when no token is set.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn from_config(config: &SearchConfig) -> Result<Option<Self>> {
        match config.spotify_token() {
            Some(token) => Ok(Some(Self::new(&config.spotify_endpoint, token, config)?)),
            None => {
                info!("{} not set, external catalog search disabled", config.spotify_token_env);
                Ok(None)
            }
        }
    }
}

impl ExternalCatalog for SpotifyCatalog {
    fn search_tracks(&self, query: &str, limit: usize) -> Result<Vec<ExternalTrack>> {
        let limit = limit.clamp(1, 50).to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .bearer_auth(&self.token)
            .query(&[("q", query), ("type", "track"), ("limit", limit.as_str())])
            .send()
            .context("Catalog search request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("catalog search returned error {}", status.as_u16());
        }

        let body: SpotifySearchResponse = response
            .json()
            .context("Catalog search sent malformed JSON")?;
        Ok(body
            .tracks
            .map(|page| page.items.into_iter().map(ExternalTrack::from).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enrich_query_adds_music_context() {
        assert_eq!(enrich_query("who is Burna Boy"), "who is Burna Boy artist musician music");
        assert_eq!(enrich_query("who is the singer of Muse"), "who is the singer of Muse");
        assert_eq!(enrich_query("history of jazz"), "history of jazz");
    }

    #[test]
    fn test_format_answer_prefers_direct_answer() {
        let response: TavilyResponse = serde_json::from_str(
            r#"{"answer": "Radiohead are an English rock band.", "results": [{"content": "ignored"}]}"#,
        )
        .unwrap();
        assert_eq!(format_answer(response), "🎵 Radiohead are an English rock band.");
    }

    #[test]
    fn test_format_answer_uses_top_three_snippets() {
        let response: TavilyResponse = serde_json::from_str(
            r#"{"results": [{"content": "one"}, {"content": ""}, {"content": "two"}, {"content": "three"}, {"content": "four"}]}"#,
        )
        .unwrap();
        assert_eq!(format_answer(response), "Based on my search: one... two... three...");
    }

    #[test]
    fn test_format_answer_empty() {
        let response: TavilyResponse = serde_json::from_str(r#"{"answer": null, "results": []}"#).unwrap();
        assert_eq!(format_answer(response), "");
    }

    #[test]
    fn test_spotify_track_conversion() {
        let body: SpotifySearchResponse = serde_json::from_str(
            r#"{"tracks": {"items": [{"id": "x1", "name": "Hotel California",
                "artists": [{"name": "Eagles"}], "album": {"name": "Hotel California"}, "popularity": 84}]}}"#,
        )
        .unwrap();
        let tracks: Vec<ExternalTrack> = body.tracks.unwrap().items.into_iter().map(Into::into).collect();

        assert_eq!(tracks[0].title, "Hotel California");
        assert_eq!(tracks[0].artists, "Eagles");
        assert_eq!(tracks[0].popularity, Some(84));
    }
}
