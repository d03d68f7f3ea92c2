//! # Embedding Index
//!
//! Turns a [`Catalog`] into one combined vector per song:
//!
//! ```text
//! combined = mean_token_vector(descriptor) ++ zscore(numeric attributes)
//! ```
//!
//! The index is built once at startup and never mutated; it is shared between
//! sessions behind an `Arc`. If the catalog cannot be loaded the index is
//! simply empty and every recommendation returns no results.

use crate::algorithm::statistics::Distribution;
use crate::catalog::{Catalog, CatalogEntity};
use crate::config::IndexConfig;
use crate::embedding::{corpus_fingerprint, tokenize, TokenModel};
use crate::error::IndexError;
use log::{info, warn};
use rayon::prelude::*;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct EmbeddingIndex {
    catalog: Catalog,
    model: TokenModel,
    columns: Vec<Distribution>,
    vectors: Vec<Vec<f32>>,
}

impl EmbeddingIndex {
    /// Index with no entries.
    #[must_use]
    pub fn empty(config: &IndexConfig) -> Self {
        Self {
            catalog: Catalog::default(),
            model: TokenModel::empty(config.embedding_dim),
            columns: Vec::new(),
            vectors: Vec::new(),
        }
    }

    /// Build combined vectors for every entity of `catalog`.
    #[must_use]
    pub fn build(catalog: Catalog, config: &IndexConfig) -> Self {
        let sentences: Vec<Vec<String>> = catalog
            .entities()
            .par_iter()
            .map(|e| tokenize(&e.descriptor()))
            .collect();

        let model = cached_or_trained(&sentences, config);
        Self::with_model(catalog, model, &sentences)
    }

    fn with_model(catalog: Catalog, model: TokenModel, sentences: &[Vec<String>]) -> Self {
        let width = catalog.attribute_names().len();
        let columns: Vec<Distribution> = (0..width)
            .map(|col| {
                let values: Vec<f64> = catalog
                    .entities()
                    .iter()
                    .map(|e| e.attributes[col])
                    .collect();
                Distribution::of(&values)
            })
            .collect();

        let vectors: Vec<Vec<f32>> = catalog
            .entities()
            .par_iter()
            .zip(sentences.par_iter())
            .map(|(entity, tokens)| {
                let mut combined = model.text_vector(tokens);
                combined.extend(
                    entity
                        .attributes
                        .iter()
                        .zip(&columns)
                        .map(|(&v, dist)| dist.z_score(v) as f32),
                );
                combined
            })
            .collect();

        info!(
            "Built embedding index: {} songs, {} dims ({} text + {} numeric)",
            vectors.len(),
            model.dim() + width,
            model.dim(),
            width
        );

        Self {
            catalog,
            model,
            columns,
            vectors,
        }
    }

    /// Load the catalog at `path` and build its index.
    ///
    /// # Errors
    ///
    /// [`IndexError::CatalogUnreadable`] when the file cannot be parsed,
    /// [`IndexError::EmptyCatalog`] when no usable rows survive cleaning.
    pub fn load(path: &Path, config: &IndexConfig) -> Result<Self, IndexError> {
        let catalog = Catalog::load(path, config.max_text_len).map_err(|source| {
            IndexError::CatalogUnreadable {
                path: path.to_path_buf(),
                source: source.into(),
            }
        })?;

        if catalog.is_empty() {
            return Err(IndexError::EmptyCatalog(path.to_path_buf()));
        }
        Ok(Self::build(catalog, config))
    }

    /// Like [`EmbeddingIndex::load`], but degrades to an empty index.
    #[must_use]
    pub fn load_or_empty(path: &Path, config: &IndexConfig) -> Self {
        match Self::load(path, config) {
            Ok(index) => index,
            Err(e) => {
                warn!("Embedding index unavailable, recommendations will be empty: {e}");
                Self::empty(config)
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn entity(&self, idx: usize) -> Option<&CatalogEntity> {
        self.catalog.get(idx)
    }

    #[must_use]
    pub fn vector(&self, idx: usize) -> Option<&[f32]> {
        self.vectors.get(idx).map(Vec::as_slice)
    }

    #[must_use]
    pub fn text_dim(&self) -> usize {
        self.model.dim()
    }

    #[must_use]
    pub fn numeric_dim(&self) -> usize {
        self.columns.len()
    }

    /// Total combined-vector width.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.text_dim() + self.numeric_dim()
    }

    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.model.vocab_size()
    }

    /// Free-text query vector: token mean padded with a neutral (zero)
    /// numeric segment.
    #[must_use]
    pub fn query_vector(&self, text: &str) -> Vec<f32> {
        self.query_vector_with_targets(text, &[])
    }

    /// Like [`EmbeddingIndex::query_vector`], but each named attribute in
    /// `targets` sets its numeric slot to the z-score of the target value.
    /// Names the catalog lacks are ignored.
    #[must_use]
    pub fn query_vector_with_targets(&self, text: &str, targets: &[(&str, f64)]) -> Vec<f32> {
        let mut vector = self.model.text_vector(&tokenize(text));
        vector.extend(
            self.catalog
                .attribute_names()
                .iter()
                .zip(&self.columns)
                .map(|(name, dist)| {
                    targets
                        .iter()
                        .find(|(target, _)| name.eq_ignore_ascii_case(target))
                        .map_or(0.0, |&(_, value)| dist.z_score(value) as f32)
                }),
        );
        vector.resize(self.dim(), 0.0);
        vector
    }
}

/// Reuse the cached model only if it was trained on this exact corpus with
/// these parameters.
fn cached_or_trained(sentences: &[Vec<String>], config: &IndexConfig) -> TokenModel {
    let params = config.training_params();
    if let Some(cache) = &config.model_cache {
        if cache.exists() {
            let expected = corpus_fingerprint(sentences, &params);
            match TokenModel::load(cache) {
                Ok(model) if model.fingerprint() == expected && model.dim() == params.dim => return model,
                Ok(_) => info!(
                    "Cached token model {} was trained on a different catalog or settings, retraining",
                    cache.display()
                ),
                Err(e) => warn!("Ignoring cached token model: {e:#}"),
            }
        }
    }

    let model = TokenModel::train(sentences, &params);
    if let Some(cache) = &config.model_cache {
        if let Err(e) = model.save(cache) {
            warn!("Could not cache token model: {e:#}");
        }
    }
    model
}

/// Cosine similarity in f64. Mismatched or zero-norm vectors score 0.0.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}
