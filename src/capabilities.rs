//! The capabilities exposed to the language model.
//!
//! | Name | Backing | Flags |
//! |------|---------|-------|
//! | `lookup_personal_data` | [`PersonalData`] | |
//! | `lookup_aggregate_summary` | [`PersonalData`] | verbatim |
//! | `follow_entity` / `unfollow_entity` | [`PersonalData`] | mutating |
//! | `check_following` | [`PersonalData`] | |
//! | `lookup_playlist_tracks` | [`PersonalData`] | |
//! | `create_playlist` | [`PersonalData`] | mutating |
//! | `add_to_playlist` / `remove_from_playlist` | [`PersonalData`], songs resolved in the catalog | mutating |
//! | `search_open_domain` | [`OpenDomainSearch`] | |
//! | `recommend_by_description` | [`RecommendationEngine`] | fallback: `search_catalog_external` |
//! | `search_catalog_external` | [`ExternalCatalog`], then local free text | |

use crate::capability::{
    Capability, CapabilityArgs, CapabilityDescriptor, CapabilityRegistry, ParamKind, ParamSpec,
};
use crate::clients::{ExternalCatalog, OpenDomainSearch};
use crate::db::{PersonalData, PlaylistChange, TimeWindow};
use crate::error::{CapabilityFailure, EntityReference};
use crate::recommend::{external_candidates, render_report, RecommendationEngine};
use log::{info, warn};
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

pub const LOOKUP_PERSONAL_DATA: &str = "lookup_personal_data";
pub const LOOKUP_AGGREGATE_SUMMARY: &str = "lookup_aggregate_summary";
pub const FOLLOW_ENTITY: &str = "follow_entity";
pub const UNFOLLOW_ENTITY: &str = "unfollow_entity";
pub const CHECK_FOLLOWING: &str = "check_following";
pub const SEARCH_OPEN_DOMAIN: &str = "search_open_domain";
pub const RECOMMEND_BY_DESCRIPTION: &str = "recommend_by_description";
pub const SEARCH_CATALOG_EXTERNAL: &str = "search_catalog_external";
pub const LOOKUP_PLAYLIST_TRACKS: &str = "lookup_playlist_tracks";
pub const CREATE_PLAYLIST: &str = "create_playlist";
pub const ADD_TO_PLAYLIST: &str = "add_to_playlist";
pub const REMOVE_FROM_PLAYLIST: &str = "remove_from_playlist";

/// Marker the summary text ends with, followed by its JSON payload.
pub const SUMMARY_DATA_MARKER: &str = "LISTENING_SUMMARY_DATA:";

const MAX_LIMIT: usize = 50;
const SUMMARY_SIZE: usize = 5;
const FALLBACK_GENRE: &str = "Alternative";

/// What `lookup_personal_data` can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonalKind {
    TopTracks,
    TopArtists,
    RecentlyPlayed,
    SavedTracks,
    FollowedArtists,
    Playlists,
}

impl PersonalKind {
    pub const ALL: [Self; 6] = [
        Self::TopTracks,
        Self::TopArtists,
        Self::RecentlyPlayed,
        Self::SavedTracks,
        Self::FollowedArtists,
        Self::Playlists,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TopTracks => "top_tracks",
            Self::TopArtists => "top_artists",
            Self::RecentlyPlayed => "recently_played",
            Self::SavedTracks => "saved_tracks",
            Self::FollowedArtists => "followed_artists",
            Self::Playlists => "playlists",
        }
    }

    #[must_use]
    pub fn parse(kind: &str) -> Option<Self> {
        let kind = kind.trim().to_lowercase().replace([' ', '-'], "_");
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }
}

fn time_window_arg(args: &CapabilityArgs, default: TimeWindow) -> TimeWindow {
    args.str("time_window").and_then(TimeWindow::parse).unwrap_or(default)
}

fn time_window_param(default: TimeWindow) -> ParamSpec {
    ParamSpec::optional(
        "time_window",
        ParamKind::String,
        Some(json!(default.as_str())),
        "short_term (4 weeks), medium_term (6 months) or long_term (all time)",
    )
}

fn name_param() -> ParamSpec {
    ParamSpec::required("name", ParamKind::String, "Artist name")
}

pub struct LookupPersonalData {
    data: Arc<dyn PersonalData>,
    descriptor: CapabilityDescriptor,
}

impl LookupPersonalData {
    pub fn new(data: Arc<dyn PersonalData>) -> Self {
        let descriptor = CapabilityDescriptor::new(
            LOOKUP_PERSONAL_DATA,
            "Look up the user's own listening data: top tracks, top artists, recently played, saved tracks, followed artists or playlists.",
            vec![
                ParamSpec::required(
                    "kind",
                    ParamKind::String,
                    "top_tracks, top_artists, recently_played, saved_tracks, followed_artists or playlists",
                ),
                time_window_param(TimeWindow::MediumTerm),
                ParamSpec::optional("limit", ParamKind::Integer, Some(json!(10)), "How many items (1-50)"),
            ],
        );
        Self { data, descriptor }
    }
}

impl Capability for LookupPersonalData {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &CapabilityArgs) -> Result<String, CapabilityFailure> {
        let raw_kind = args.required_str("kind")?;
        let kind = PersonalKind::parse(raw_kind)
            .ok_or_else(|| CapabilityFailure::InvalidArguments(format!("unknown kind '{raw_kind}'")))?;
        let window = time_window_arg(args, TimeWindow::MediumTerm);
        let limit = args.count("limit", 10, 1, MAX_LIMIT);

        let mut out = String::new();
        match kind {
            PersonalKind::TopTracks => {
                let tracks = self.data.top_tracks(window, limit)?;
                if tracks.is_empty() {
                    return Ok(format!("No listening history recorded for the {} yet.", window.label()));
                }
                let _ = writeln!(out, "Your top tracks ({}):", window.label());
                for (i, t) in tracks.iter().enumerate() {
                    let heart = if t.loved { " ❤️" } else { "" };
                    let _ = writeln!(out, "{}. {} ({} plays){heart}", i + 1, t.label(), t.plays);
                }
            }
            PersonalKind::TopArtists => {
                let artists = self.data.top_artists(window, limit)?;
                if artists.is_empty() {
                    return Ok(format!("No listening history recorded for the {} yet.", window.label()));
                }
                let _ = writeln!(out, "Your top artists ({}):", window.label());
                for (i, a) in artists.iter().enumerate() {
                    let _ = writeln!(out, "{}. {} ({} plays)", i + 1, a.name, a.plays);
                }
            }
            PersonalKind::RecentlyPlayed => {
                let plays = self.data.recently_played(limit)?;
                if plays.is_empty() {
                    return Ok("Nothing has been played yet.".to_string());
                }
                out.push_str("Recently played:\n");
                for (i, p) in plays.iter().enumerate() {
                    let skipped = if p.skipped { " (skipped)" } else { "" };
                    let _ = writeln!(out, "{}. {} by {}{skipped}", i + 1, p.title, p.artist);
                }
            }
            PersonalKind::SavedTracks => {
                let tracks = self.data.saved_tracks(limit)?;
                if tracks.is_empty() {
                    return Ok("You haven't saved any tracks yet.".to_string());
                }
                out.push_str("Your saved tracks:\n");
                for (i, t) in tracks.iter().enumerate() {
                    let _ = writeln!(out, "{}. {}", i + 1, t.label());
                }
            }
            PersonalKind::FollowedArtists => {
                let names = self.data.followed_artists(limit)?;
                if names.is_empty() {
                    return Ok("You aren't following any artists yet.".to_string());
                }
                out.push_str("Artists you follow:\n");
                for (i, name) in names.iter().enumerate() {
                    let _ = writeln!(out, "{}. {name}", i + 1);
                }
            }
            PersonalKind::Playlists => {
                let playlists = self.data.playlists(limit)?;
                if playlists.is_empty() {
                    return Ok("No playlists found. Want me to create one?".to_string());
                }
                out.push_str("Your playlists:\n");
                for p in &playlists {
                    let _ = writeln!(out, "• {} ({} tracks)", p.name, p.tracks);
                }
            }
        }
        Ok(out.trim_end().to_string())
    }
}

pub struct LookupAggregateSummary {
    data: Arc<dyn PersonalData>,
    descriptor: CapabilityDescriptor,
}

impl LookupAggregateSummary {
    pub fn new(data: Arc<dyn PersonalData>) -> Self {
        let descriptor = CapabilityDescriptor::new(
            LOOKUP_AGGREGATE_SUMMARY,
            "Build the user's listening summary (\"wrapped\"): top artists, top songs and top genre for a period.",
            vec![time_window_param(TimeWindow::LongTerm)],
        )
        .verbatim();
        Self { data, descriptor }
    }
}

impl Capability for LookupAggregateSummary {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &CapabilityArgs) -> Result<String, CapabilityFailure> {
        let window = time_window_arg(args, TimeWindow::LongTerm);
        let artists = self.data.top_artists(window, SUMMARY_SIZE)?;
        let songs = self.data.top_tracks(window, SUMMARY_SIZE)?;
        if artists.is_empty() && songs.is_empty() {
            return Ok(format!(
                "🎧 No listening history recorded for the {} yet. Play some music and ask again!",
                window.label()
            ));
        }
        let genre = self
            .data
            .top_genre(window)?
            .unwrap_or_else(|| FALLBACK_GENRE.to_string());

        let mut out = format!("🎧 **Your Music Summary: {}**\n\n**Top Artists**\n", window.label());
        for (i, a) in artists.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, a.name);
        }
        out.push_str("\n**Top Songs**\n");
        for (i, t) in songs.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, t.label());
        }
        let _ = writeln!(out, "\n**Top Genre:** {genre}\n");

        let data = json!({
            "timeframe": window.label(),
            "time_window": window.as_str(),
            "top_artists": artists.iter().map(|a| &a.name).collect::<Vec<_>>(),
            "top_songs": songs.iter().map(|t| json!({"title": t.title, "artist": t.artist})).collect::<Vec<_>>(),
            "top_genre": genre,
        });
        out.push_str(SUMMARY_DATA_MARKER);
        out.push_str(&data.to_string());
        Ok(out)
    }
}

pub struct FollowEntity {
    data: Arc<dyn PersonalData>,
    descriptor: CapabilityDescriptor,
}

impl FollowEntity {
    pub fn new(data: Arc<dyn PersonalData>) -> Self {
        let descriptor =
            CapabilityDescriptor::new(FOLLOW_ENTITY, "Follow an artist for the user.", vec![name_param()]).mutating();
        Self { data, descriptor }
    }
}

impl Capability for FollowEntity {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &CapabilityArgs) -> Result<String, CapabilityFailure> {
        let name = args.required_str("name")?;
        Ok(match self.data.follow(name)? {
            true => format!("✅ You're now following {name}! 🎵"),
            false => format!("You're already following {name}."),
        })
    }
}

pub struct UnfollowEntity {
    data: Arc<dyn PersonalData>,
    descriptor: CapabilityDescriptor,
}

impl UnfollowEntity {
    pub fn new(data: Arc<dyn PersonalData>) -> Self {
        let descriptor =
            CapabilityDescriptor::new(UNFOLLOW_ENTITY, "Stop following an artist.", vec![name_param()]).mutating();
        Self { data, descriptor }
    }
}

impl Capability for UnfollowEntity {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &CapabilityArgs) -> Result<String, CapabilityFailure> {
        let name = args.required_str("name")?;
        Ok(match self.data.unfollow(name)? {
            true => format!("Done, you've unfollowed {name}."),
            false => format!("You weren't following {name}."),
        })
    }
}

pub struct CheckFollowing {
    data: Arc<dyn PersonalData>,
    descriptor: CapabilityDescriptor,
}

impl CheckFollowing {
    pub fn new(data: Arc<dyn PersonalData>) -> Self {
        let descriptor = CapabilityDescriptor::new(
            CHECK_FOLLOWING,
            "Check whether the user follows an artist.",
            vec![name_param()],
        );
        Self { data, descriptor }
    }
}

impl Capability for CheckFollowing {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &CapabilityArgs) -> Result<String, CapabilityFailure> {
        let name = args.required_str("name")?;
        Ok(match self.data.is_following(name)? {
            true => format!("Yes, you're following {name}. 🎵"),
            false => format!("You're not following {name} yet. Want me to follow {name}?"),
        })
    }
}

fn playlist_param() -> ParamSpec {
    ParamSpec::required("playlist", ParamKind::String, "Playlist name (partial names match)")
}

fn song_params() -> [ParamSpec; 2] {
    [
        ParamSpec::required("title", ParamKind::String, "Song title"),
        ParamSpec::optional("artist", ParamKind::String, None, "Song artist, when known"),
    ]
}

/// "No playlist found" text, listing a few playlists to pick from.
fn missing_playlist(data: &dyn PersonalData, name: &str) -> Result<String, CapabilityFailure> {
    let known = data.playlists(10)?;
    if known.is_empty() {
        return Ok(format!("No playlist found matching '{name}', and you don't have any playlists yet."));
    }
    let mut out = format!("No playlist found matching '{name}'. Here are some of your playlists:\n");
    for p in &known {
        let _ = writeln!(out, "• {}", p.name);
    }
    Ok(out.trim_end().to_string())
}

pub struct LookupPlaylistTracks {
    data: Arc<dyn PersonalData>,
    descriptor: CapabilityDescriptor,
}

impl LookupPlaylistTracks {
    pub fn new(data: Arc<dyn PersonalData>) -> Self {
        let descriptor = CapabilityDescriptor::new(
            LOOKUP_PLAYLIST_TRACKS,
            "List the songs in one of the user's playlists.",
            vec![
                playlist_param(),
                ParamSpec::optional("limit", ParamKind::Integer, Some(json!(MAX_LIMIT)), "How many songs (1-50)"),
            ],
        );
        Self { data, descriptor }
    }
}

impl Capability for LookupPlaylistTracks {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &CapabilityArgs) -> Result<String, CapabilityFailure> {
        let name = args.required_str("playlist")?;
        let limit = args.count("limit", MAX_LIMIT, 1, MAX_LIMIT);
        let Some(playlist) = self.data.playlist(name, limit)? else {
            return missing_playlist(self.data.as_ref(), name);
        };

        let mut out = format!("**{}**\nTotal tracks: {}\n", playlist.name, playlist.total_tracks);
        if let Some(description) = &playlist.description {
            let _ = writeln!(out, "Description: {description}");
        }
        if playlist.entries.is_empty() {
            let _ = write!(out, "\nThe playlist '{}' exists but contains no tracks.", playlist.name);
            return Ok(out);
        }
        let _ = writeln!(out, "\n**Tracks (showing {}):**", playlist.entries.len());
        for (i, entry) in playlist.entries.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, entry.label());
        }
        Ok(out.trim_end().to_string())
    }
}

pub struct CreatePlaylist {
    data: Arc<dyn PersonalData>,
    descriptor: CapabilityDescriptor,
}

impl CreatePlaylist {
    pub fn new(data: Arc<dyn PersonalData>) -> Self {
        let descriptor = CapabilityDescriptor::new(
            CREATE_PLAYLIST,
            "Create a new, empty playlist for the user.",
            vec![
                ParamSpec::required("name", ParamKind::String, "Playlist name"),
                ParamSpec::optional("description", ParamKind::String, None, "Short description"),
            ],
        )
        .mutating();
        Self { data, descriptor }
    }
}

impl Capability for CreatePlaylist {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &CapabilityArgs) -> Result<String, CapabilityFailure> {
        let name = args.required_str("name")?;
        Ok(match self.data.create_playlist(name, args.str("description"))? {
            true => format!("✅ Successfully created playlist **{name}**! Tell me which songs to add. 🎶"),
            false => format!("You already have a playlist called **{name}**."),
        })
    }
}

/// Canonical title and artist for a requested song: the catalog row when
/// the song is known, otherwise the request itself when it names an artist.
fn resolve_song(
    engine: &RecommendationEngine,
    title: &str,
    artist: Option<&str>,
) -> Result<(String, String), CapabilityFailure> {
    let reference = EntityReference::new(title.trim(), artist.map(|a| a.trim().to_string()));
    if let Some(entity) = engine.resolve_reference(&reference).and_then(|idx| engine.index().entity(idx)) {
        return Ok((entity.name.clone(), entity.artists.clone()));
    }
    match artist.map(str::trim).filter(|a| !a.is_empty()) {
        Some(artist) => Ok((title.trim().to_string(), artist.to_string())),
        None => Err(CapabilityFailure::InvalidArguments(format!(
            "couldn't find '{}' in the catalog; please say who it's by",
            title.trim()
        ))),
    }
}

pub struct AddToPlaylist {
    data: Arc<dyn PersonalData>,
    engine: Arc<RecommendationEngine>,
    descriptor: CapabilityDescriptor,
}

impl AddToPlaylist {
    pub fn new(data: Arc<dyn PersonalData>, engine: Arc<RecommendationEngine>) -> Self {
        let mut params = vec![playlist_param()];
        params.extend(song_params());
        let descriptor = CapabilityDescriptor::new(
            ADD_TO_PLAYLIST,
            "Add a song to one of the user's playlists.",
            params,
        )
        .mutating();
        Self { data, engine, descriptor }
    }
}

impl Capability for AddToPlaylist {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &CapabilityArgs) -> Result<String, CapabilityFailure> {
        let playlist = args.required_str("playlist")?;
        let (title, artist) = resolve_song(&self.engine, args.required_str("title")?, args.str("artist"))?;
        Ok(match self.data.add_to_playlist(playlist, &title, &artist)? {
            PlaylistChange::Applied(name) => {
                format!("✅ Successfully added **{title}** by **{artist}** to playlist **{name}**!")
            }
            PlaylistChange::Unchanged(name) => format!("**{title}** by {artist} is already in **{name}**."),
            PlaylistChange::MissingPlaylist => missing_playlist(self.data.as_ref(), playlist)?,
        })
    }
}

pub struct RemoveFromPlaylist {
    data: Arc<dyn PersonalData>,
    descriptor: CapabilityDescriptor,
}

impl RemoveFromPlaylist {
    pub fn new(data: Arc<dyn PersonalData>) -> Self {
        let mut params = vec![playlist_param()];
        params.extend(song_params());
        let descriptor = CapabilityDescriptor::new(
            REMOVE_FROM_PLAYLIST,
            "Remove a song from one of the user's playlists.",
            params,
        )
        .mutating();
        Self { data, descriptor }
    }
}

impl Capability for RemoveFromPlaylist {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &CapabilityArgs) -> Result<String, CapabilityFailure> {
        let playlist = args.required_str("playlist")?;
        let title = args.required_str("title")?;
        let artist = args.str("artist");
        let song = match artist {
            Some(artist) => format!("'{title}' by {artist}"),
            None => format!("'{title}'"),
        };
        Ok(match self.data.remove_from_playlist(playlist, title, artist)? {
            PlaylistChange::Applied(name) => format!("✅ Removed {song} from playlist **{name}**."),
            PlaylistChange::Unchanged(name) => format!("Could not find {song} in the playlist **{name}**."),
            PlaylistChange::MissingPlaylist => missing_playlist(self.data.as_ref(), playlist)?,
        })
    }
}

pub struct SearchOpenDomain {
    search: Option<Arc<dyn OpenDomainSearch>>,
    descriptor: CapabilityDescriptor,
}

impl SearchOpenDomain {
    pub fn new(search: Option<Arc<dyn OpenDomainSearch>>) -> Self {
        let descriptor = CapabilityDescriptor::new(
            SEARCH_OPEN_DOMAIN,
            "Search the web for music facts: artists, genres, history, albums, band members.",
            vec![ParamSpec::required("query", ParamKind::String, "The question to research")],
        );
        Self { search, descriptor }
    }
}

impl Capability for SearchOpenDomain {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &CapabilityArgs) -> Result<String, CapabilityFailure> {
        let query = args.required_str("query")?;
        let search = self
            .search
            .as_ref()
            .ok_or_else(|| CapabilityFailure::Execution("open-domain search is not configured".to_string()))?;
        Ok(search.search(query)?)
    }
}

pub struct RecommendByDescription {
    engine: Arc<RecommendationEngine>,
    default_count: usize,
    descriptor: CapabilityDescriptor,
}

impl RecommendByDescription {
    pub fn new(engine: Arc<RecommendationEngine>, default_count: usize) -> Self {
        let descriptor = CapabilityDescriptor::new(
            RECOMMEND_BY_DESCRIPTION,
            "Recommend songs from the local catalog for a description, mood, genre or a song the user names (\"songs like X by Y\").",
            vec![
                ParamSpec::required("query", ParamKind::String, "What the user is looking for, in their words"),
                ParamSpec::optional("count", ParamKind::Integer, Some(json!(default_count)), "How many songs (1-50)"),
                ParamSpec::optional("genre", ParamKind::String, None, "Restrict to a genre"),
            ],
        )
        .with_fallback(SEARCH_CATALOG_EXTERNAL);
        Self {
            engine,
            default_count,
            descriptor,
        }
    }
}

impl Capability for RecommendByDescription {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &CapabilityArgs) -> Result<String, CapabilityFailure> {
        let query = args.required_str("query")?;
        let count = args.count("count", self.default_count, 1, MAX_LIMIT);
        let candidates = self.engine.recommend(query, count, args.str("genre"))?;
        info!("{} candidates for '{query}'", candidates.len());

        if candidates.is_empty() {
            return Ok(String::new());
        }
        Ok(render_report(query, &candidates))
    }
}

pub struct SearchCatalogExternal {
    engine: Arc<RecommendationEngine>,
    catalog: Option<Arc<dyn ExternalCatalog>>,
    default_count: usize,
    descriptor: CapabilityDescriptor,
}

impl SearchCatalogExternal {
    pub fn new(
        engine: Arc<RecommendationEngine>,
        catalog: Option<Arc<dyn ExternalCatalog>>,
        default_count: usize,
    ) -> Self {
        let descriptor = CapabilityDescriptor::new(
            SEARCH_CATALOG_EXTERNAL,
            "Search the external streaming catalog for a specific song that is not in the local catalog.",
            vec![
                ParamSpec::required("query", ParamKind::String, "Song title and artist"),
                ParamSpec::optional("count", ParamKind::Integer, Some(json!(default_count)), "How many songs (1-50)"),
            ],
        );
        Self {
            engine,
            catalog,
            default_count,
            descriptor,
        }
    }
}

impl Capability for SearchCatalogExternal {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &CapabilityArgs) -> Result<String, CapabilityFailure> {
        let query = args.required_str("query")?;
        let count = args.count("count", self.default_count, 1, MAX_LIMIT);

        if let Some(catalog) = &self.catalog {
            match catalog.search_tracks(query, count) {
                Ok(tracks) if !tracks.is_empty() => {
                    return Ok(render_report(query, &external_candidates(&tracks)));
                }
                Ok(_) => info!("External catalog has nothing for '{query}'"),
                Err(e) => warn!("External catalog search failed: {e:#}"),
            }
        }

        info!("Searching '{query}' as free text in the local catalog");
        let candidates = self.engine.recommend_free_text(query, count, None);
        if candidates.is_empty() {
            return Ok(String::new());
        }
        Ok(render_report(query, &candidates))
    }
}

/// Registry with every capability wired to its backing service.
#[must_use]
pub fn standard_registry(
    engine: Arc<RecommendationEngine>,
    data: Arc<dyn PersonalData>,
    search: Option<Arc<dyn OpenDomainSearch>>,
    catalog: Option<Arc<dyn ExternalCatalog>>,
    default_count: usize,
    timeout: Duration,
) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new(timeout);
    registry.register(Arc::new(LookupPersonalData::new(Arc::clone(&data))));
    registry.register(Arc::new(LookupAggregateSummary::new(Arc::clone(&data))));
    registry.register(Arc::new(FollowEntity::new(Arc::clone(&data))));
    registry.register(Arc::new(UnfollowEntity::new(Arc::clone(&data))));
    registry.register(Arc::new(CheckFollowing::new(Arc::clone(&data))));
    registry.register(Arc::new(LookupPlaylistTracks::new(Arc::clone(&data))));
    registry.register(Arc::new(CreatePlaylist::new(Arc::clone(&data))));
    registry.register(Arc::new(AddToPlaylist::new(Arc::clone(&data), Arc::clone(&engine))));
    registry.register(Arc::new(RemoveFromPlaylist::new(data)));
    registry.register(Arc::new(SearchOpenDomain::new(search)));
    registry.register(Arc::new(RecommendByDescription::new(Arc::clone(&engine), default_count)));
    registry.register(Arc::new(SearchCatalogExternal::new(engine, catalog, default_count)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ErrorKind;
    use crate::catalog::Catalog;
    use crate::clients::ExternalTrack;
    use crate::config::IndexConfig;
    use crate::db::{init_database, Library, PlayEvent};
    use crate::index::EmbeddingIndex;
    use serde_json::{Map, Value};
    use tempfile::TempDir;

    const CSV: &str = "\
track_id,track_name,artists,popularity,energy,valence,track_genre
t1,Imagine,John Lennon,80,0.25,0.17,rock
t2,Jealous Guy,John Lennon,60,0.30,0.35,rock
t3,So What,Miles Davis,70,0.20,0.60,jazz
";

    struct FixedSearch(&'static str);

    impl OpenDomainSearch for FixedSearch {
        fn search(&self, _query: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FixedCatalog(Vec<ExternalTrack>);

    impl ExternalCatalog for FixedCatalog {
        fn search_tracks(&self, _query: &str, limit: usize) -> anyhow::Result<Vec<ExternalTrack>> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    fn engine() -> Arc<RecommendationEngine> {
        let catalog = Catalog::from_reader(CSV.as_bytes(), 200).unwrap();
        Arc::new(RecommendationEngine::new(Arc::new(EmbeddingIndex::build(
            catalog,
            &IndexConfig::default(),
        ))))
    }

    fn registry(library: Library, catalog: Option<Arc<dyn ExternalCatalog>>) -> CapabilityRegistry {
        standard_registry(
            engine(),
            Arc::new(library),
            Some(Arc::new(FixedSearch("🎵 Jazz originated in New Orleans."))),
            catalog,
            10,
            Duration::from_secs(5),
        )
    }

    fn library() -> (TempDir, Library) {
        let temp = TempDir::new().unwrap();
        let library = init_database(&temp.path().join("library.db"), false).unwrap();
        (temp, library)
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn eagles() -> ExternalTrack {
        ExternalTrack {
            id: Some("sp1".into()),
            title: "Hotel California".into(),
            artists: "Eagles".into(),
            album: Some("Hotel California".into()),
            popularity: Some(84),
        }
    }

    #[test]
    fn test_all_capabilities_registered_with_flags() {
        let (_temp, library) = library();
        let registry = registry(library, None);

        assert_eq!(registry.names().len(), 12);
        for name in [CREATE_PLAYLIST, ADD_TO_PLAYLIST, REMOVE_FROM_PLAYLIST] {
            assert!(registry.descriptor(name).unwrap().mutating, "{name}");
        }
        assert!(registry.descriptor(LOOKUP_AGGREGATE_SUMMARY).unwrap().verbatim);
        assert!(registry.descriptor(FOLLOW_ENTITY).unwrap().mutating);
        assert!(registry.descriptor(UNFOLLOW_ENTITY).unwrap().mutating);
        assert_eq!(
            registry.descriptor(RECOMMEND_BY_DESCRIPTION).unwrap().fallback,
            Some(SEARCH_CATALOG_EXTERNAL)
        );
    }

    #[test]
    fn test_lookup_personal_data_top_tracks() {
        let (_temp, library) = library();
        for title in ["So What", "So What", "Imagine"] {
            library
                .record_play(&PlayEvent {
                    title: title.into(),
                    artist: if title == "Imagine" { "John Lennon" } else { "Miles Davis" }.into(),
                    ..PlayEvent::default()
                })
                .unwrap();
        }
        let registry = registry(library, None);

        let result = registry.invoke(LOOKUP_PERSONAL_DATA, args(json!({"kind": "top_tracks", "limit": "1"})));
        assert!(result.ok);
        assert!(result.text.contains("1. So What by Miles Davis (2 plays)"));
        assert!(!result.text.contains("Imagine"));

        let bad = registry.invoke(LOOKUP_PERSONAL_DATA, args(json!({"kind": "podcasts"})));
        assert_eq!(bad.error_kind, Some(ErrorKind::ExecutionError));
    }

    #[test]
    fn test_summary_ends_with_data_marker() {
        let (_temp, library) = library();
        library
            .record_play(&PlayEvent {
                title: "So What".into(),
                artist: "Miles Davis".into(),
                genre: Some("jazz".into()),
                ..PlayEvent::default()
            })
            .unwrap();
        let registry = registry(library, None);

        let result = registry.invoke(LOOKUP_AGGREGATE_SUMMARY, Map::new());
        assert!(result.ok);
        let (markdown, data) = result.text.split_once(SUMMARY_DATA_MARKER).unwrap();
        assert!(markdown.contains("All Time"));
        let data: Value = serde_json::from_str(data).unwrap();
        assert_eq!(data["top_genre"], "jazz");
        assert_eq!(data["top_artists"][0], "Miles Davis");
    }

    #[test]
    fn test_follow_check_and_unfollow() {
        let (_temp, library) = library();
        let registry = registry(library, None);
        let name = |n: &str| args(json!({ "name": n }));

        let check = registry.invoke(CHECK_FOLLOWING, name("Radiohead"));
        assert!(check.text.contains("Want me to follow Radiohead?"));

        assert!(registry.invoke(FOLLOW_ENTITY, name("Radiohead")).text.contains("now following"));
        assert!(registry.invoke(CHECK_FOLLOWING, name("radiohead")).text.starts_with("Yes"));
        assert!(registry.invoke(UNFOLLOW_ENTITY, name("Radiohead")).text.contains("unfollowed"));
    }

    #[test]
    fn test_open_domain_search_unconfigured_is_error() {
        let (_temp, library) = library();
        let registry = standard_registry(engine(), Arc::new(library), None, None, 10, Duration::from_secs(5));

        let result = registry.invoke(SEARCH_OPEN_DOMAIN, args(json!({"query": "history of jazz"})));
        assert_eq!(result.error_kind, Some(ErrorKind::ExecutionError));
        assert!(result.text.contains("not configured"));
    }

    #[test]
    fn test_recommend_reports_missing_reference() {
        let (_temp, library) = library();
        let registry = registry(library, None);

        let result = registry.invoke(
            RECOMMEND_BY_DESCRIPTION,
            args(json!({"query": "songs like Hotel California by Eagles"})),
        );
        assert_eq!(result.error_kind, Some(ErrorKind::EntityNotFoundLocally));

        let found = registry.invoke(RECOMMEND_BY_DESCRIPTION, args(json!({"query": "songs like Imagine", "count": 2})));
        let report: Value = serde_json::from_str(&found.text).unwrap();
        assert_eq!(report["recommendations"][0]["track"], "Imagine by John Lennon");
        assert_eq!(report["recommendations"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_external_search_prefers_catalog_then_local() {
        let (_temp, library) = library();
        let registry = registry(library, Some(Arc::new(FixedCatalog(vec![eagles()]))));
        let result = registry.invoke(SEARCH_CATALOG_EXTERNAL, args(json!({"query": "Hotel California Eagles"})));
        let report: Value = serde_json::from_str(&result.text).unwrap();
        assert_eq!(report["recommendations"][0]["source"], "external_search");
        assert_eq!(report["recommendations"][0]["similarity_score"], 1.0);

        let (_second_temp, second) = self::library();
        let empty = registry_with_empty_catalog(second);
        let local = empty.invoke(SEARCH_CATALOG_EXTERNAL, args(json!({"query": "miles davis", "count": 1})));
        let report: Value = serde_json::from_str(&local.text).unwrap();
        assert_eq!(report["recommendations"][0]["source"], "local_database");
    }

    fn registry_with_empty_catalog(library: Library) -> CapabilityRegistry {
        registry(library, Some(Arc::new(FixedCatalog(Vec::new()))))
    }

    #[test]
    fn test_personal_kind_parsing() {
        assert_eq!(PersonalKind::parse("Top Tracks"), Some(PersonalKind::TopTracks));
        assert_eq!(PersonalKind::parse("recently-played"), Some(PersonalKind::RecentlyPlayed));
        assert_eq!(PersonalKind::parse("playlists"), Some(PersonalKind::Playlists));
        assert_eq!(PersonalKind::parse("albums"), None);
    }

    #[test]
    fn test_playlist_lifecycle() {
        let (_temp, library) = library();
        let registry = registry(library, None);

        let empty = registry.invoke(LOOKUP_PERSONAL_DATA, args(json!({"kind": "playlists"})));
        assert!(empty.text.contains("No playlists found"));

        let created = registry.invoke(CREATE_PLAYLIST, args(json!({"name": "Road Trip"})));
        assert!(created.text.contains("created playlist **Road Trip**"));
        let again = registry.invoke(CREATE_PLAYLIST, args(json!({"name": "road trip"})));
        assert!(again.text.contains("already have"));

        // Known songs take the catalog's spelling; unknown ones need an artist.
        let added = registry.invoke(ADD_TO_PLAYLIST, args(json!({"playlist": "road", "title": "imagine"})));
        assert!(added.ok);
        assert!(added.text.contains("**Imagine** by **John Lennon** to playlist **Road Trip**"));
        let unknown = registry.invoke(ADD_TO_PLAYLIST, args(json!({"playlist": "Road Trip", "title": "Purple Rain"})));
        assert_eq!(unknown.error_kind, Some(ErrorKind::ExecutionError));
        let with_artist = registry.invoke(
            ADD_TO_PLAYLIST,
            args(json!({"playlist": "Road Trip", "title": "Purple Rain", "artist": "Prince"})),
        );
        assert!(with_artist.text.contains("**Purple Rain** by **Prince**"));

        let listed = registry.invoke(LOOKUP_PERSONAL_DATA, args(json!({"kind": "playlists"})));
        assert_eq!(listed.text, "Your playlists:\n• Road Trip (2 tracks)");

        let tracks = registry.invoke(LOOKUP_PLAYLIST_TRACKS, args(json!({"playlist": "Road Trip"})));
        assert!(tracks.text.contains("1. Imagine by John Lennon\n2. Purple Rain by Prince"));

        let removed = registry.invoke(REMOVE_FROM_PLAYLIST, args(json!({"playlist": "Road Trip", "title": "purple"})));
        assert!(removed.text.starts_with("✅ Removed 'purple'"));

        let missing = registry.invoke(LOOKUP_PLAYLIST_TRACKS, args(json!({"playlist": "Gym"})));
        assert!(missing.ok);
        assert!(missing.text.contains("No playlist found matching 'Gym'"));
        assert!(missing.text.contains("• Road Trip"));
    }
}
