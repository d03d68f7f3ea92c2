//! Listening-affinity scoring and column statistics.
//!
//! Personal rankings (top tracks, top artists, the listening summary) are
//! ordered by an affinity score computed from how often a track was started,
//! finished and skipped. The [`statistics`] module provides the population
//! statistics used for z-score normalization when the embedding index is built.

/// Type-safe scoring context with immutable parameters
#[derive(Debug, Clone)]
pub struct ScoringContext {
    pub touch_threshold: u32,
    pub dampening_base: f64,
    pub love_multiplier: f64,
    pub weights: WeightConfig,
}

/// Listen/skip weights for each maturity phase of a track
#[derive(Debug, Clone, Copy)]
pub struct WeightConfig {
    pub early_exploration: (u8, u8), // (listen_weight, skip_weight)
    pub learning_phase: (u8, u8),
    pub stable_preferences: (u8, u8),
    pub small_threshold: u32,
    pub big_threshold: u32,
}

impl Default for ScoringContext {
    fn default() -> Self {
        Self {
            touch_threshold: 30,
            dampening_base: 1.2,
            love_multiplier: 2.0,
            weights: WeightConfig {
                early_exploration: (4, 1),
                learning_phase: (2, 2),
                stable_preferences: (1, 4),
                small_threshold: 5,
                big_threshold: 15,
            },
        }
    }
}

/// Play counters for one track (or an aggregate over a time window).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ListeningStats {
    pub touches: u32,
    pub listens: u32,
    pub skips: u32,
    pub loved: bool,
}

/// Affinity score for a track's listening history.
///
/// ```text
/// score(stats) = match stats.touches {
///     t if t < THRESHOLD => weighted_score(stats),
///     _ => dampened_score(stats)
/// } * love_modifier(stats.loved)
/// ```
///
/// Fresh tracks reward listens heavily; established tracks are scored on the
/// listen/skip balance scaled by `log_base(touches + 1)`. Scores never go
/// below zero.
///
/// # Examples
///
/// ```
/// use muse_dj::algorithm::{affinity_score, ListeningStats, ScoringContext};
///
/// let stats = ListeningStats { touches: 5, listens: 4, skips: 1, loved: false };
/// assert!(affinity_score(&stats, &ScoringContext::default()) > 0.0);
/// ```
#[must_use]
pub fn affinity_score(stats: &ListeningStats, context: &ScoringContext) -> f64 {
    let base_score = match stats.touches < context.touch_threshold {
        true => weighted_score(stats, &context.weights),
        false => dampened_score(stats, context.dampening_base),
    };

    apply_love_multiplier(base_score.max(0.0), stats.loved, context.love_multiplier)
}

#[inline]
fn weighted_score(stats: &ListeningStats, weights: &WeightConfig) -> f64 {
    let (listen_weight, skip_weight) = determine_weights(stats.touches, weights);

    f64::from(listen_weight) * f64::from(stats.listens)
        - f64::from(skip_weight) * f64::from(stats.skips)
}

#[inline]
fn dampened_score(stats: &ListeningStats, dampening_base: f64) -> f64 {
    let dampening_factor = f64::from(stats.touches + 1).log(dampening_base);
    dampening_factor * (f64::from(stats.listens) - f64::from(stats.skips))
}

#[must_use]
const fn determine_weights(touches: u32, config: &WeightConfig) -> (u8, u8) {
    match touches {
        t if t < config.small_threshold => config.early_exploration,
        t if t <= config.big_threshold => config.learning_phase,
        _ => config.stable_preferences,
    }
}

#[inline]
const fn apply_love_multiplier(score: f64, loved: bool, multiplier: f64) -> f64 {
    match loved {
        true => score * multiplier,
        false => score,
    }
}

/// Rank items by affinity, highest first. Equal scores keep input order.
#[must_use]
pub fn rank_by_affinity<T>(
    items: Vec<T>,
    stats_of: impl Fn(&T) -> ListeningStats,
    context: &ScoringContext,
) -> Vec<(T, f64)> {
    let mut ranked: Vec<(T, f64)> = items
        .into_iter()
        .map(|item| {
            let score = affinity_score(&stats_of(&item), context);
            (item, score)
        })
        .collect();

    ranked.sort_by(|(_, a), (_, b)| b.total_cmp(a));
    ranked
}

/// Population statistics over numeric columns
pub mod statistics {
    /// Summary of one column of values
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Distribution {
        pub mean: f64,
        pub variance: f64,
        pub std_deviation: f64,
        pub min: f64,
        pub max: f64,
        pub count: usize,
    }

    impl Distribution {
        /// Population (not sample) statistics. An empty slice yields all zeros.
        #[must_use]
        pub fn of(values: &[f64]) -> Self {
            if values.is_empty() {
                return Self {
                    mean: 0.0,
                    variance: 0.0,
                    std_deviation: 0.0,
                    min: 0.0,
                    max: 0.0,
                    count: 0,
                };
            }

            #[allow(clippy::cast_precision_loss)]
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let variance = values.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / n;

            Self {
                mean,
                variance,
                std_deviation: variance.sqrt(),
                min: values.iter().fold(f64::INFINITY, |a, &b| a.min(b)),
                max: values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b)),
                count: values.len(),
            }
        }

        /// Standard score of `value`; a constant column maps everything to 0.
        #[must_use]
        pub fn z_score(&self, value: f64) -> f64 {
            if self.std_deviation > f64::EPSILON {
                (value - self.mean) / self.std_deviation
            } else {
                0.0
            }
        }
    }
}
