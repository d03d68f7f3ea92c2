//! # Catalog Module
//!
//! Loads the tabular song catalog (CSV) that the embedding index is built from.
//!
//! ## Cleaning rules
//!
//! - Missing names become `Unknown Song`, missing artists `Unknown Artist`
//! - List-style artist cells (`['A', 'B']`) and `;`-separated cells are
//!   flattened to `A, B`
//! - Rows whose name or artists reach the corruption bound are dropped
//! - Rows are deduplicated by descriptor (`name - artists`, case-insensitive),
//!   first occurrence wins
//! - Every remaining non-text column that mostly parses as a number becomes a
//!   numeric attribute; unparseable or empty cells are imputed with the column mean
//!
//! Unreadable records are skipped one by one so a single broken line never
//! discards the whole catalog.

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const UNKNOWN_SONG: &str = "Unknown Song";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

const NAME_COLUMNS: &[&str] = &["track_name", "song_name", "name", "title"];
const ARTIST_COLUMNS: &[&str] = &["artists", "artist"];
const ALBUM_COLUMNS: &[&str] = &["album_name", "album"];
const GENRE_COLUMNS: &[&str] = &["track_genre", "genre"];
const ID_COLUMNS: &[&str] = &["track_id", "song_id", "id"];
const POPULARITY_COLUMN: &str = "popularity";

/// Columns that are never treated as numeric attributes.
const METADATA_COLUMNS: &[&str] = &["", "unnamed: 0", "explicit", "description"];

/// One song row after cleaning.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntity {
    pub id: String,
    pub name: String,
    pub artists: String,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub popularity: Option<f64>,
    /// Raw (imputed, unnormalized) values, aligned with [`Catalog::attribute_names`].
    pub attributes: Vec<f64>,
}

impl CatalogEntity {
    /// Text the token model sees: `"{name} - {artists}"`.
    #[must_use]
    pub fn descriptor(&self) -> String {
        format!("{} - {}", self.name, self.artists)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    attribute_names: Vec<String>,
    entities: Vec<CatalogEntity>,
}

/// Intermediate row before numeric columns are decided.
struct RawRow {
    id: String,
    name: String,
    artists: String,
    album: Option<String>,
    genre: Option<String>,
    numbers: Vec<Option<f64>>,
}

impl Catalog {
    /// Load and clean a catalog file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or has no usable header.
    pub fn load(path: &Path, max_text_len: usize) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open catalog file {}", path.display()))?;
        let catalog = Self::from_reader(file, max_text_len)
            .with_context(|| format!("Failed to parse catalog file {}", path.display()))?;

        info!(
            "Loaded catalog {} with {} songs and {} numeric attributes",
            path.display(),
            catalog.len(),
            catalog.attribute_names.len()
        );
        Ok(catalog)
    }

    /// Parse CSV from any reader, applying the cleaning rules.
    ///
    /// # Errors
    ///
    /// Fails when the header cannot be read or names neither a track nor an
    /// artist column.
    pub fn from_reader<R: Read>(reader: R, max_text_len: usize) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = rdr
            .headers()
            .context("Catalog has no readable header row")?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        let find = |candidates: &[&str]| {
            candidates
                .iter()
                .find_map(|c| headers.iter().position(|h| h == c))
        };

        let name_idx = find(NAME_COLUMNS);
        let artist_idx = find(ARTIST_COLUMNS);
        if name_idx.is_none() && artist_idx.is_none() {
            bail!("Catalog header has neither a track name nor an artists column: {headers:?}");
        }
        let album_idx = find(ALBUM_COLUMNS);
        let genre_idx = find(GENRE_COLUMNS);
        let id_idx = find(ID_COLUMNS);

        let text_columns: HashSet<usize> = [name_idx, artist_idx, album_idx, genre_idx, id_idx]
            .into_iter()
            .flatten()
            .collect();
        let numeric_candidates: Vec<usize> = (0..headers.len())
            .filter(|i| !text_columns.contains(i))
            .filter(|&i| !METADATA_COLUMNS.contains(&headers[i].as_str()))
            .collect();

        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        let (mut broken, mut corrupt, mut duplicates) = (0usize, 0usize, 0usize);

        for (line, record) in rdr.records().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    debug!("Skipping unreadable catalog record {line}: {e}");
                    broken += 1;
                    continue;
                }
            };

            let cell = |idx: Option<usize>| {
                idx.and_then(|i| record.get(i))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
            };

            let raw_name = cell(name_idx).unwrap_or(UNKNOWN_SONG);
            let raw_artists = cell(artist_idx).unwrap_or(UNKNOWN_ARTIST);
            if raw_name.chars().count() >= max_text_len || raw_artists.chars().count() >= max_text_len {
                corrupt += 1;
                continue;
            }

            let name = raw_name.to_string();
            let artists = normalize_artists(raw_artists);
            if !seen.insert(format!("{name} - {artists}").to_lowercase()) {
                duplicates += 1;
                continue;
            }

            rows.push(RawRow {
                id: cell(id_idx).map_or_else(|| format!("row-{line}"), str::to_string),
                name,
                artists,
                album: cell(album_idx).map(str::to_string),
                genre: cell(genre_idx).map(str::to_string),
                numbers: numeric_candidates
                    .iter()
                    .map(|&i| {
                        record
                            .get(i)
                            .and_then(|v| v.trim().parse::<f64>().ok())
                            .filter(|v| v.is_finite())
                    })
                    .collect(),
            });
        }

        if broken + corrupt + duplicates > 0 {
            warn!("Catalog cleaning dropped {broken} unreadable, {corrupt} corrupt and {duplicates} duplicate rows");
        }

        Ok(Self::finish(&headers, &numeric_candidates, rows))
    }

    /// Decide numeric columns and impute missing values with column means.
    fn finish(headers: &[String], candidates: &[usize], rows: Vec<RawRow>) -> Self {
        let kept: Vec<(usize, f64)> = (0..candidates.len())
            .filter_map(|col| {
                let parsed: Vec<f64> = rows.iter().filter_map(|r| r.numbers[col]).collect();
                // Mostly-text columns are metadata, not attributes.
                if parsed.is_empty() || parsed.len() * 2 < rows.len() {
                    return None;
                }
                #[allow(clippy::cast_precision_loss)]
                let mean = parsed.iter().sum::<f64>() / parsed.len() as f64;
                Some((col, mean))
            })
            .collect();

        let attribute_names: Vec<String> = kept
            .iter()
            .map(|&(col, _)| headers[candidates[col]].clone())
            .collect();
        let popularity_slot = attribute_names.iter().position(|n| n == POPULARITY_COLUMN);

        let entities = rows
            .into_iter()
            .map(|row| {
                let attributes: Vec<f64> = kept
                    .iter()
                    .map(|&(col, mean)| row.numbers[col].unwrap_or(mean))
                    .collect();
                CatalogEntity {
                    id: row.id,
                    name: row.name,
                    artists: row.artists,
                    album: row.album,
                    genre: row.genre,
                    popularity: popularity_slot.map(|slot| attributes[slot]),
                    attributes,
                }
            })
            .collect();

        Self {
            attribute_names,
            entities,
        }
    }

    /// Build a catalog from already-clean entities.
    #[must_use]
    pub fn from_entities(attribute_names: Vec<String>, entities: Vec<CatalogEntity>) -> Self {
        Self {
            attribute_names,
            entities,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[must_use]
    pub fn entities(&self) -> &[CatalogEntity] {
        &self.entities
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&CatalogEntity> {
        self.entities.get(idx)
    }

    #[must_use]
    pub fn attribute_names(&self) -> &[String] {
        &self.attribute_names
    }

    /// Raw value of a named attribute for one entity.
    #[must_use]
    pub fn attribute(&self, idx: usize, name: &str) -> Option<f64> {
        let slot = self.attribute_names.iter().position(|n| n == name)?;
        self.entities.get(idx)?.attributes.get(slot).copied()
    }

    /// Distinct genres, sorted.
    #[must_use]
    pub fn genres(&self) -> Vec<String> {
        let mut genres: Vec<String> = self
            .entities
            .iter()
            .filter_map(|e| e.genre.clone())
            .collect();
        genres.sort();
        genres.dedup();
        genres
    }
}

/// Flatten `['A', 'B']` or `A;B` artist cells into `A, B`.
#[must_use]
pub fn normalize_artists(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);

    let parts: Vec<&str> = inner
        .split(';')
        .flat_map(|chunk| chunk.split("', '"))
        .flat_map(|chunk| chunk.split("\", \""))
        .map(|p| p.trim().trim_matches(&['\'', '"'][..]).trim())
        .filter(|p| !p.is_empty())
        .collect();

    if parts.is_empty() {
        UNKNOWN_ARTIST.to_string()
    } else {
        parts.join(", ")
    }
}
