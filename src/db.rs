//! # Listening Library
//!
//! The SQLite store behind every personal-data capability: which tracks the
//! user played, finished or skipped, which ones they love, and which artists
//! they follow.
//!
//! ## Schema
//!
//! | Table | Contents |
//! |-------|----------|
//! | `tracks` | one row per (title, artist) with lifetime counters and the loved flag |
//! | `plays` | one row per play with a unix timestamp and a skip flag |
//! | `following` | followed artist names (case-insensitive) |
//! | `playlists` | user playlists, unique by name (case-insensitive) |
//! | `playlist_tracks` | songs in each playlist, in insertion order |
//!
//! Rankings are computed per time window from `plays` and ordered with
//! [`algorithm::affinity_score`](crate::algorithm::affinity_score).
//!
//! A fresh connection is opened for each operation, so a [`Library`] can be
//! shared between threads without further locking.

use crate::algorithm::{rank_by_affinity, ListeningStats, ScoringContext};
use anyhow::{bail, Context, Result};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tracks (
        id       INTEGER PRIMARY KEY,
        title    TEXT    NOT NULL,
        artist   TEXT    NOT NULL,
        album    TEXT,
        genre    TEXT,
        touches  INTEGER NOT NULL DEFAULT 0,
        listens  INTEGER NOT NULL DEFAULT 0,
        skips    INTEGER NOT NULL DEFAULT 0,
        loved    INTEGER NOT NULL DEFAULT 0,
        UNIQUE(title, artist)
    );
    CREATE TABLE IF NOT EXISTS plays (
        id        INTEGER PRIMARY KEY,
        track_id  INTEGER NOT NULL REFERENCES tracks(id),
        played_at INTEGER NOT NULL,
        skipped   INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS following (
        name        TEXT PRIMARY KEY COLLATE NOCASE,
        followed_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS playlists (
        id          INTEGER PRIMARY KEY,
        name        TEXT    NOT NULL UNIQUE COLLATE NOCASE,
        description TEXT,
        created_at  INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS playlist_tracks (
        id          INTEGER PRIMARY KEY,
        playlist_id INTEGER NOT NULL REFERENCES playlists(id),
        title       TEXT    NOT NULL,
        artist      TEXT    NOT NULL,
        added_at    INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_plays_played_at ON plays(played_at);
    CREATE INDEX IF NOT EXISTS idx_playlist_tracks ON playlist_tracks(playlist_id);
    CREATE INDEX IF NOT EXISTS idx_plays_track ON plays(track_id);
";

const DAY: i64 = 24 * 60 * 60;

/// Period a personal ranking covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeWindow {
    /// Last 4 weeks
    ShortTerm,
    /// Last 6 months
    #[default]
    MediumTerm,
    /// All recorded history
    LongTerm,
}

impl TimeWindow {
    pub const ALL: [Self; 3] = [Self::ShortTerm, Self::MediumTerm, Self::LongTerm];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::MediumTerm => "medium_term",
            Self::LongTerm => "long_term",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ShortTerm => "Last 4 Weeks",
            Self::MediumTerm => "Last 6 Months",
            Self::LongTerm => "All Time",
        }
    }

    /// Length of the window in seconds; `None` means unbounded.
    #[must_use]
    pub const fn seconds(self) -> Option<i64> {
        match self {
            Self::ShortTerm => Some(28 * DAY),
            Self::MediumTerm => Some(182 * DAY),
            Self::LongTerm => None,
        }
    }

    /// Canonical names, or a period mentioned in free text.
    ///
    /// ```
    /// use muse_dj::db::TimeWindow;
    ///
    /// assert_eq!(TimeWindow::parse("short_term"), Some(TimeWindow::ShortTerm));
    /// assert_eq!(TimeWindow::parse("my last 6 months"), Some(TimeWindow::MediumTerm));
    /// assert_eq!(TimeWindow::parse("this year"), Some(TimeWindow::LongTerm));
    /// assert_eq!(TimeWindow::parse("jazz"), None);
    /// ```
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let lower = text.trim().to_lowercase();
        if let Some(window) = Self::ALL.into_iter().find(|w| w.as_str() == lower) {
            return Some(window);
        }

        let padded: String = lower
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();
        let padded = format!(" {padded} ");
        let has = |words: &[&str]| words.iter().any(|w| padded.contains(&format!(" {w} ")));

        // "6 months" must be checked before "month".
        if has(&["6 months", "six months", "medium", "medium term", "half year"]) {
            Some(Self::MediumTerm)
        } else if has(&["4 weeks", "four weeks", "month", "week", "weeks", "short", "recent", "recently"]) {
            Some(Self::ShortTerm)
        } else if has(&["all time", "year", "years", "long", "ever", "forever"]) {
            Some(Self::LongTerm)
        } else {
            None
        }
    }

    fn cutoff(self, now: i64) -> i64 {
        self.seconds().map_or(i64::MIN, |secs| now - secs)
    }
}

/// A play to be recorded.
#[derive(Debug, Clone, Default)]
pub struct PlayEvent {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackSummary {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub plays: u32,
    pub loved: bool,
    pub score: f64,
}

impl TrackSummary {
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} by {}", self.title, self.artist)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtistSummary {
    pub name: String,
    pub plays: u32,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayRecord {
    pub title: String,
    pub artist: String,
    pub played_at: i64,
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistSummary {
    pub name: String,
    pub description: Option<String>,
    pub tracks: u32,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistEntry {
    pub title: String,
    pub artist: String,
    pub added_at: i64,
}

impl PlaylistEntry {
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} by {}", self.title, self.artist)
    }
}

/// A playlist with (up to a limit of) its tracks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Playlist {
    pub name: String,
    pub description: Option<String>,
    pub total_tracks: u32,
    pub entries: Vec<PlaylistEntry>,
}

/// Outcome of adding or removing a playlist track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistChange {
    /// The playlist (by its stored name) was changed.
    Applied(String),
    /// Nothing to do: the track was already there, or was not there to remove.
    Unchanged(String),
    /// No playlist matches the requested name.
    MissingPlaylist,
}

/// Read and write access to the user's own listening data.
pub trait PersonalData: Send + Sync {
    /// # Errors
    /// Storage failures.
    fn top_tracks(&self, window: TimeWindow, limit: usize) -> Result<Vec<TrackSummary>>;

    /// # Errors
    /// Storage failures.
    fn top_artists(&self, window: TimeWindow, limit: usize) -> Result<Vec<ArtistSummary>>;

    /// # Errors
    /// Storage failures.
    fn recently_played(&self, limit: usize) -> Result<Vec<PlayRecord>>;

    /// Loved tracks, most affine first.
    ///
    /// # Errors
    /// Storage failures.
    fn saved_tracks(&self, limit: usize) -> Result<Vec<TrackSummary>>;

    /// # Errors
    /// Storage failures.
    fn followed_artists(&self, limit: usize) -> Result<Vec<String>>;

    /// Returns `false` when the artist was already followed.
    ///
    /// # Errors
    /// Storage failures.
    fn follow(&self, name: &str) -> Result<bool>;

    /// Returns `false` when the artist was not followed.
    ///
    /// # Errors
    /// Storage failures.
    fn unfollow(&self, name: &str) -> Result<bool>;

    /// # Errors
    /// Storage failures.
    fn is_following(&self, name: &str) -> Result<bool>;

    /// Genre with the highest summed affinity in the window.
    ///
    /// # Errors
    /// Storage failures.
    fn top_genre(&self, window: TimeWindow) -> Result<Option<String>>;

    /// Playlists, newest first.
    ///
    /// # Errors
    /// Storage failures.
    fn playlists(&self, limit: usize) -> Result<Vec<PlaylistSummary>>;

    /// Playlist matching `name`: exact (case-insensitive) first, then the
    /// oldest playlist whose name contains it.
    ///
    /// # Errors
    /// Storage failures.
    fn playlist(&self, name: &str, limit: usize) -> Result<Option<Playlist>>;

    /// Returns `false` when a playlist with that name already exists.
    ///
    /// # Errors
    /// Storage failures or an empty name.
    fn create_playlist(&self, name: &str, description: Option<&str>) -> Result<bool>;

    /// # Errors
    /// Storage failures or an empty title/artist.
    fn add_to_playlist(&self, playlist: &str, title: &str, artist: &str) -> Result<PlaylistChange>;

    /// Remove every entry whose title contains `title` (and whose artist
    /// contains `artist`, when given).
    ///
    /// # Errors
    /// Storage failures.
    fn remove_from_playlist(&self, playlist: &str, title: &str, artist: Option<&str>) -> Result<PlaylistChange>;
}

/// Create the library schema at `path`.
///
/// # Errors
///
/// Fails if the database already exists and `force` is not set, or on any
/// filesystem or SQLite error.
pub fn init_database(path: &Path, force: bool) -> Result<Library> {
    if path.exists() {
        if !force {
            bail!(
                "Library already exists at {}. Use --force to recreate it.",
                path.display()
            );
        }
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove existing library {}", path.display()))?;
        info!("Removed existing library at {}", path.display());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let library = Library::open(path)?;
    info!("Initialized listening library at {}", path.display());
    Ok(library)
}

#[derive(Debug, Clone)]
struct WindowRow {
    title: String,
    artist: String,
    album: Option<String>,
    genre: Option<String>,
    stats: ListeningStats,
}

#[derive(Debug, Clone)]
pub struct Library {
    path: PathBuf,
    scoring: ScoringContext,
}

impl Library {
    /// Open (and if needed create) the library at `path`.
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be opened or the schema cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        let library = Self {
            path: path.to_path_buf(),
            scoring: ScoringContext::default(),
        };
        library
            .connect()?
            .execute_batch(SCHEMA)
            .with_context(|| format!("Failed to create library schema in {}", path.display()))?;
        Ok(library)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.path).with_context(|| {
            format!("Failed to open listening library at {}", self.path.display())
        })
    }

    /// Record a play that happened now.
    ///
    /// # Errors
    ///
    /// SQLite failures.
    pub fn record_play(&self, event: &PlayEvent) -> Result<()> {
        self.record_play_at(event, now())
    }

    /// Record a play at `played_at` (unix seconds), creating the track row on
    /// first sight.
    ///
    /// # Errors
    ///
    /// SQLite failures, or an empty title/artist.
    pub fn record_play_at(&self, event: &PlayEvent, played_at: i64) -> Result<()> {
        let title = event.title.trim();
        let artist = event.artist.trim();
        if title.is_empty() || artist.is_empty() {
            bail!("A play needs both a title and an artist");
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO tracks (title, artist, album, genre) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(title, artist) DO UPDATE SET
                album = COALESCE(excluded.album, album),
                genre = COALESCE(excluded.genre, genre)",
            params![title, artist, event.album, event.genre],
        )
        .with_context(|| format!("Failed to upsert track '{title}' by {artist}"))?;

        let track_id: i64 = tx.query_row(
            "SELECT id FROM tracks WHERE title = ?1 AND artist = ?2",
            params![title, artist],
            |row| row.get(0),
        )?;

        tx.execute(
            "UPDATE tracks SET touches = touches + 1,
                listens = listens + ?2,
                skips = skips + ?3
             WHERE id = ?1",
            params![track_id, i64::from(!event.skipped), i64::from(event.skipped)],
        )?;
        tx.execute(
            "INSERT INTO plays (track_id, played_at, skipped) VALUES (?1, ?2, ?3)",
            params![track_id, played_at, event.skipped],
        )?;
        tx.commit().context("Committing play failed")?;

        debug!("Recorded play of '{title}' by {artist} (skipped: {})", event.skipped);
        Ok(())
    }

    /// Set the loved flag. Returns `false` when the track is unknown.
    ///
    /// # Errors
    ///
    /// SQLite failures.
    pub fn set_loved(&self, title: &str, artist: &str, loved: bool) -> Result<bool> {
        let changed = self.connect()?.execute(
            "UPDATE tracks SET loved = ?3 WHERE title = ?1 COLLATE NOCASE AND artist = ?2 COLLATE NOCASE",
            params![title.trim(), artist.trim(), loved],
        )?;
        Ok(changed > 0)
    }

    /// Distinct genres of recorded tracks.
    ///
    /// # Errors
    ///
    /// SQLite failures.
    pub fn genres(&self) -> Result<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT genre FROM tracks WHERE genre IS NOT NULL AND genre != '' ORDER BY genre",
        )?;
        let genres = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("Cannot query genres")?;
        Ok(genres)
    }

    fn window_rows(&self, window: TimeWindow) -> Result<Vec<WindowRow>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT t.title, t.artist, t.album, t.genre, t.loved,
                    COUNT(p.id),
                    SUM(CASE WHEN p.skipped = 0 THEN 1 ELSE 0 END),
                    SUM(p.skipped)
             FROM tracks t JOIN plays p ON p.track_id = t.id
             WHERE p.played_at >= ?1
             GROUP BY t.id
             ORDER BY t.id",
        )?;

        let rows = stmt
            .query_map([window.cutoff(now())], |row| {
                Ok(WindowRow {
                    title: row.get(0)?,
                    artist: row.get(1)?,
                    album: row.get(2)?,
                    genre: row.get(3)?,
                    stats: ListeningStats {
                        loved: row.get(4)?,
                        touches: row.get(5)?,
                        listens: row.get(6)?,
                        skips: row.get(7)?,
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Cannot query {} listening history", window.as_str()))?;

        Ok(rows)
    }

    /// Id and stored name of the playlist matching `name`.
    fn find_playlist(conn: &Connection, name: &str) -> Result<Option<(i64, String)>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let exact = conn
            .query_row(
                "SELECT id, name FROM playlists WHERE name = ?1",
                [name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if exact.is_some() {
            return Ok(exact);
        }
        let partial = conn
            .query_row(
                "SELECT id, name FROM playlists WHERE instr(lower(name), lower(?1)) > 0 ORDER BY id LIMIT 1",
                [name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(partial)
    }
}

impl PersonalData for Library {
    fn top_tracks(&self, window: TimeWindow, limit: usize) -> Result<Vec<TrackSummary>> {
        let rows = self.window_rows(window)?;
        Ok(rank_by_affinity(rows, |r| r.stats, &self.scoring)
            .into_iter()
            .take(limit)
            .map(|(row, score)| TrackSummary {
                title: row.title,
                artist: row.artist,
                album: row.album,
                genre: row.genre,
                plays: row.stats.touches,
                loved: row.stats.loved,
                score,
            })
            .collect())
    }

    fn top_artists(&self, window: TimeWindow, limit: usize) -> Result<Vec<ArtistSummary>> {
        // Aggregate per artist, keeping first-seen order for stable ties.
        let mut order: Vec<String> = Vec::new();
        let mut totals: HashMap<String, ListeningStats> = HashMap::new();
        for row in self.window_rows(window)? {
            let entry = totals.entry(row.artist.clone()).or_insert_with(|| {
                order.push(row.artist.clone());
                ListeningStats::default()
            });
            entry.touches += row.stats.touches;
            entry.listens += row.stats.listens;
            entry.skips += row.stats.skips;
            entry.loved |= row.stats.loved;
        }

        Ok(rank_by_affinity(order, |name| totals[name], &self.scoring)
            .into_iter()
            .take(limit)
            .map(|(name, score)| ArtistSummary {
                plays: totals[&name].touches,
                name,
                score,
            })
            .collect())
    }

    fn recently_played(&self, limit: usize) -> Result<Vec<PlayRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT t.title, t.artist, p.played_at, p.skipped
             FROM plays p JOIN tracks t ON t.id = p.track_id
             ORDER BY p.played_at DESC, p.id DESC
             LIMIT ?1",
        )?;
        let plays = stmt
            .query_map([limit_param(limit)], |row| {
                Ok(PlayRecord {
                    title: row.get(0)?,
                    artist: row.get(1)?,
                    played_at: row.get(2)?,
                    skipped: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Cannot query recent plays")?;
        Ok(plays)
    }

    fn saved_tracks(&self, limit: usize) -> Result<Vec<TrackSummary>> {
        Ok(self
            .top_tracks(TimeWindow::LongTerm, usize::MAX)?
            .into_iter()
            .filter(|t| t.loved)
            .take(limit)
            .collect())
    }

    fn followed_artists(&self, limit: usize) -> Result<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT name FROM following ORDER BY followed_at DESC, rowid DESC LIMIT ?1")?;
        let names = stmt
            .query_map([limit_param(limit)], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("Cannot query followed artists")?;
        Ok(names)
    }

    fn follow(&self, name: &str) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() {
            bail!("Artist name is empty");
        }
        let inserted = self.connect()?.execute(
            "INSERT OR IGNORE INTO following (name, followed_at) VALUES (?1, ?2)",
            params![name, now()],
        )?;
        info!("Follow '{name}': {}", if inserted > 0 { "added" } else { "already following" });
        Ok(inserted > 0)
    }

    fn unfollow(&self, name: &str) -> Result<bool> {
        let removed = self
            .connect()?
            .execute("DELETE FROM following WHERE name = ?1", [name.trim()])?;
        info!("Unfollow '{}': {}", name.trim(), if removed > 0 { "removed" } else { "was not followed" });
        Ok(removed > 0)
    }

    fn is_following(&self, name: &str) -> Result<bool> {
        let found: Option<i64> = self
            .connect()?
            .query_row("SELECT 1 FROM following WHERE name = ?1", [name.trim()], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn top_genre(&self, window: TimeWindow) -> Result<Option<String>> {
        let mut order: Vec<String> = Vec::new();
        let mut scores: HashMap<String, f64> = HashMap::new();
        for (row, score) in rank_by_affinity(self.window_rows(window)?, |r| r.stats, &self.scoring) {
            let Some(genre) = row.genre.filter(|g| !g.trim().is_empty()) else {
                continue;
            };
            if !scores.contains_key(&genre) {
                order.push(genre.clone());
            }
            *scores.entry(genre).or_insert(0.0) += score;
        }

        // max_by keeps the last maximum, so walk in reverse to favour the first.
        Ok(order
            .into_iter()
            .rev()
            .max_by(|a, b| scores[a].total_cmp(&scores[b])))
    }

    fn playlists(&self, limit: usize) -> Result<Vec<PlaylistSummary>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT p.name, p.description, p.created_at, COUNT(t.id)
             FROM playlists p LEFT JOIN playlist_tracks t ON t.playlist_id = p.id
             GROUP BY p.id
             ORDER BY p.created_at DESC, p.id DESC
             LIMIT ?1",
        )?;
        let playlists = stmt
            .query_map([limit_param(limit)], |row| {
                Ok(PlaylistSummary {
                    name: row.get(0)?,
                    description: row.get(1)?,
                    created_at: row.get(2)?,
                    tracks: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Cannot query playlists")?;
        Ok(playlists)
    }

    fn playlist(&self, name: &str, limit: usize) -> Result<Option<Playlist>> {
        let conn = self.connect()?;
        let Some((id, stored)) = Self::find_playlist(&conn, name)? else {
            return Ok(None);
        };

        let (description, total_tracks): (Option<String>, u32) = conn.query_row(
            "SELECT p.description, (SELECT COUNT(*) FROM playlist_tracks WHERE playlist_id = p.id)
             FROM playlists p WHERE p.id = ?1",
            [id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let mut stmt = conn.prepare(
            "SELECT title, artist, added_at FROM playlist_tracks
             WHERE playlist_id = ?1 ORDER BY id LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![id, limit_param(limit)], |row| {
                Ok(PlaylistEntry {
                    title: row.get(0)?,
                    artist: row.get(1)?,
                    added_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Cannot query tracks of playlist '{stored}'"))?;

        Ok(Some(Playlist {
            name: stored,
            description,
            total_tracks,
            entries,
        }))
    }

    fn create_playlist(&self, name: &str, description: Option<&str>) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() {
            bail!("Playlist name is empty");
        }
        let description = description.map(str::trim).filter(|d| !d.is_empty());
        let inserted = self.connect()?.execute(
            "INSERT OR IGNORE INTO playlists (name, description, created_at) VALUES (?1, ?2, ?3)",
            params![name, description, now()],
        )?;
        info!("Create playlist '{name}': {}", if inserted > 0 { "created" } else { "already exists" });
        Ok(inserted > 0)
    }

    fn add_to_playlist(&self, playlist: &str, title: &str, artist: &str) -> Result<PlaylistChange> {
        let (title, artist) = (title.trim(), artist.trim());
        if title.is_empty() || artist.is_empty() {
            bail!("A playlist track needs both a title and an artist");
        }

        let conn = self.connect()?;
        let Some((id, stored)) = Self::find_playlist(&conn, playlist)? else {
            return Ok(PlaylistChange::MissingPlaylist);
        };
        let present: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM playlist_tracks
                 WHERE playlist_id = ?1 AND title = ?2 COLLATE NOCASE AND artist = ?3 COLLATE NOCASE",
                params![id, title, artist],
                |row| row.get(0),
            )
            .optional()?;
        if present.is_some() {
            return Ok(PlaylistChange::Unchanged(stored));
        }

        conn.execute(
            "INSERT INTO playlist_tracks (playlist_id, title, artist, added_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, title, artist, now()],
        )
        .with_context(|| format!("Failed to add '{title}' to playlist '{stored}'"))?;
        info!("Added '{title}' by {artist} to playlist '{stored}'");
        Ok(PlaylistChange::Applied(stored))
    }

    fn remove_from_playlist(&self, playlist: &str, title: &str, artist: Option<&str>) -> Result<PlaylistChange> {
        let conn = self.connect()?;
        let Some((id, stored)) = Self::find_playlist(&conn, playlist)? else {
            return Ok(PlaylistChange::MissingPlaylist);
        };
        let removed = conn.execute(
            "DELETE FROM playlist_tracks
             WHERE playlist_id = ?1
               AND instr(lower(title), lower(?2)) > 0
               AND (?3 IS NULL OR instr(lower(artist), lower(?3)) > 0)",
            params![id, title.trim(), artist.map(str::trim)],
        )?;
        info!("Removed {removed} entries matching '{}' from playlist '{stored}'", title.trim());
        Ok(match removed {
            0 => PlaylistChange::Unchanged(stored),
            _ => PlaylistChange::Applied(stored),
        })
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
