//! # Token Embedding Module
//!
//! A small skip-gram model with negative sampling, trained over the song
//! descriptors of the catalog. It gives every token a dense vector so a
//! descriptor (or a free-text query) can be embedded as the mean of its
//! token vectors.
//!
//! ## Determinism
//!
//! Training is single-threaded and driven by a seeded `StdRng`: the same
//! corpus and [`TrainingParams`] always produce bit-identical vectors. This is
//! what makes recommendation rankings reproducible across process restarts.
//!
//! ## Persistence
//!
//! A trained model can be written to and read back from JSON so a large
//! catalog does not have to be retrained on every start. Each model carries
//! the [`corpus_fingerprint`] it was trained from; a cache whose fingerprint
//! does not match the current corpus is stale. Loading rejects files whose
//! vocabulary points past the stored vectors or whose vectors have the wrong
//! width.

use anyhow::{bail, Context, Result};
use log::{debug, info, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Split text into lowercase word tokens; anything that is not a letter,
/// digit or underscore separates tokens.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    pub dim: usize,
    pub window: usize,
    pub epochs: usize,
    pub negative: usize,
    pub learning_rate: f32,
    pub min_learning_rate: f32,
    pub seed: u64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            dim: 15,
            window: 5,
            epochs: 5,
            negative: 5,
            learning_rate: 0.025,
            min_learning_rate: 0.0001,
            seed: 42,
        }
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Stable FNV-1a digest of a tokenized corpus and its training parameters.
///
/// Unlike `DefaultHasher` this is identical across builds and platforms, so
/// it can be persisted next to the model.
#[must_use]
pub fn corpus_fingerprint(sentences: &[Vec<String>], params: &TrainingParams) -> u64 {
    let mut hash = FNV_OFFSET;
    for sentence in sentences {
        for token in sentence {
            hash = fnv1a(hash, token.as_bytes());
            hash = fnv1a(hash, &[0x1f]);
        }
        hash = fnv1a(hash, &[0x1e]);
    }
    for n in [params.dim, params.window, params.epochs, params.negative] {
        hash = fnv1a(hash, &(n as u64).to_le_bytes());
    }
    hash = fnv1a(hash, &params.learning_rate.to_bits().to_le_bytes());
    hash = fnv1a(hash, &params.min_learning_rate.to_bits().to_le_bytes());
    fnv1a(hash, &params.seed.to_le_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenModel {
    dim: usize,
    #[serde(default)]
    fingerprint: u64,
    vocab: HashMap<String, usize>,
    vectors: Vec<Vec<f32>>,
}

impl TokenModel {
    /// Model with no vocabulary; every text maps to the zero vector.
    #[must_use]
    pub fn empty(dim: usize) -> Self {
        Self {
            dim,
            fingerprint: 0,
            vocab: HashMap::new(),
            vectors: Vec::new(),
        }
    }

    /// Train skip-gram vectors over tokenized sentences.
    ///
    /// Every token that appears at least once gets a vector (min count 1).
    /// The learning rate decays linearly from `learning_rate` to
    /// `min_learning_rate` across all epochs.
    #[must_use]
    pub fn train(sentences: &[Vec<String>], params: &TrainingParams) -> Self {
        let dim = params.dim.max(1);
        let fingerprint = corpus_fingerprint(sentences, params);
        let mut rng = StdRng::seed_from_u64(params.seed);

        // Vocabulary in first-seen order keeps ids stable for a given corpus.
        let mut vocab: HashMap<String, usize> = HashMap::new();
        let mut counts: Vec<u64> = Vec::new();
        let corpus: Vec<Vec<usize>> = sentences
            .iter()
            .map(|sentence| {
                sentence
                    .iter()
                    .map(|token| {
                        let next_id = counts.len();
                        let id = *vocab.entry(token.clone()).or_insert(next_id);
                        if id == counts.len() {
                            counts.push(0);
                        }
                        counts[id] += 1;
                        id
                    })
                    .collect()
            })
            .collect();

        if counts.is_empty() {
            return Self {
                fingerprint,
                ..Self::empty(dim)
            };
        }

        #[allow(clippy::cast_precision_loss)]
        let mut input: Vec<Vec<f32>> = (0..counts.len())
            .map(|_| {
                (0..dim)
                    .map(|_| (rng.gen::<f32>() - 0.5) / dim as f32)
                    .collect()
            })
            .collect();
        let mut output: Vec<Vec<f32>> = vec![vec![0.0; dim]; counts.len()];
        let table = NegativeTable::new(&counts);

        let total_tokens: usize = corpus.iter().map(Vec::len).sum();
        let total_steps = (total_tokens * params.epochs.max(1)).max(1);
        let mut step = 0usize;
        let mut gradient = vec![0.0f32; dim];

        for epoch in 0..params.epochs.max(1) {
            for sentence in &corpus {
                for (pos, &center) in sentence.iter().enumerate() {
                    #[allow(clippy::cast_precision_loss)]
                    let progress = step as f32 / total_steps as f32;
                    let lr = (params.learning_rate * (1.0 - progress)).max(params.min_learning_rate);
                    step += 1;

                    // Random window shrink, as in the reference word2vec trainer.
                    let reach = params.window.max(1) - rng.gen_range(0..params.window.max(1));
                    let start = pos.saturating_sub(reach);
                    let end = (pos + reach + 1).min(sentence.len());

                    for (ctx_pos, &context) in sentence.iter().enumerate().take(end).skip(start) {
                        if ctx_pos == pos {
                            continue;
                        }
                        gradient.iter_mut().for_each(|g| *g = 0.0);

                        update_pair(&input[center], &mut output[context], &mut gradient, 1.0, lr);
                        for _ in 0..params.negative {
                            let sample = table.sample(&mut rng);
                            if sample == context {
                                continue;
                            }
                            update_pair(&input[center], &mut output[sample], &mut gradient, 0.0, lr);
                        }

                        input[center]
                            .iter_mut()
                            .zip(&gradient)
                            .for_each(|(w, g)| *w += g);
                    }
                }
            }
            trace!("Finished embedding epoch {}", epoch + 1);
        }

        info!(
            "Trained {}-dim token vectors for {} tokens over {} sentences",
            dim,
            counts.len(),
            corpus.len()
        );

        Self {
            dim,
            fingerprint,
            vocab,
            vectors: input,
        }
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// [`corpus_fingerprint`] of the training input; 0 for untrained models.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    #[must_use]
    pub fn token_vector(&self, token: &str) -> Option<&[f32]> {
        self.vocab
            .get(token)
            .and_then(|&id| self.vectors.get(id))
            .map(Vec::as_slice)
    }

    /// Mean vector of the known tokens, or zeros when none are known.
    #[must_use]
    pub fn text_vector(&self, tokens: &[String]) -> Vec<f32> {
        let mut sum = vec![0.0f32; self.dim];
        let mut known = 0usize;

        for vector in tokens.iter().filter_map(|t| self.token_vector(t)) {
            sum.iter_mut().zip(vector).for_each(|(s, v)| *s += v);
            known += 1;
        }

        if known > 0 {
            #[allow(clippy::cast_precision_loss)]
            let n = known as f32;
            sum.iter_mut().for_each(|s| *s /= n);
        }
        sum
    }

    /// Write the model as JSON.
    ///
    /// # Errors
    ///
    /// Fails on serialization or filesystem errors.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self).context("Failed to serialize token model")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write token model to {}", path.display()))?;
        debug!("Saved token model to {}", path.display());
        Ok(())
    }

    /// Read a model previously written by [`TokenModel::save`].
    ///
    /// # Errors
    ///
    /// Fails when the file is missing, not a valid model, or internally
    /// inconsistent.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read token model from {}", path.display()))?;
        let model: Self = serde_json::from_str(&json)
            .with_context(|| format!("Invalid token model in {}", path.display()))?;
        model
            .validate()
            .with_context(|| format!("Inconsistent token model in {}", path.display()))?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            bail!("dimension is zero");
        }
        if let Some((token, id)) = self.vocab.iter().find(|(_, &id)| id >= self.vectors.len()) {
            bail!("token '{token}' has id {id} but only {} vectors are stored", self.vectors.len());
        }
        if let Some(bad) = self.vectors.iter().position(|v| v.len() != self.dim) {
            bail!(
                "vector {bad} has {} components, expected {}",
                self.vectors[bad].len(),
                self.dim
            );
        }
        Ok(())
    }
}

/// One logistic-regression step between a center word and a target word.
#[inline]
fn update_pair(center: &[f32], target: &mut [f32], gradient: &mut [f32], label: f32, lr: f32) {
    let dot: f32 = center.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    let g = (label - sigmoid(dot)) * lr;

    gradient.iter_mut().zip(target.iter()).for_each(|(acc, t)| *acc += g * t);
    target.iter_mut().zip(center).for_each(|(t, c)| *t += g * c);
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x.clamp(-6.0, 6.0)).exp())
}

/// Unigram^0.75 distribution used to draw negative samples.
struct NegativeTable {
    cumulative: Vec<f64>,
}

impl NegativeTable {
    fn new(counts: &[u64]) -> Self {
        let mut total = 0.0;
        let cumulative = counts
            .iter()
            .map(|&c| {
                #[allow(clippy::cast_precision_loss)]
                let weight = (c as f64).powf(0.75);
                total += weight;
                total
            })
            .collect();
        Self { cumulative }
    }

    fn sample(&self, rng: &mut StdRng) -> usize {
        let total = self.cumulative.last().copied().unwrap_or(0.0);
        let target = rng.gen::<f64>() * total;
        self.cumulative
            .partition_point(|&c| c <= target)
            .min(self.cumulative.len().saturating_sub(1))
    }
}
