//! Similarity scoring and ranking of comps against a target property
//! Pure functions - no side effects

use crate::cma::types::{Comp, PropertyDetails};
use rust_decimal::prelude::ToPrimitive;
use std::cmp::Ordering;
use tracing::debug;

/// Score given when nothing can be compared
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Scores closer than this count as a tie and fall back to recency
pub const TIE_WINDOW: f64 = 0.1;

const BEDS_WEIGHT: f64 = 0.30;
const BATHS_WEIGHT: f64 = 0.25;
const SQFT_WEIGHT: f64 = 0.30;
const YEAR_BUILT_WEIGHT: f64 = 0.15;

const BEDS_SPAN: f64 = 3.0;
const BATHS_SPAN: f64 = 2.0;
const YEAR_BUILT_SPAN: f64 = 20.0;

/// Similarity of one comp to the target, in [0, 1].
///
/// Each known factor contributes `closeness * weight`; the sum is divided by
/// the weights actually applied, so missing attributes neither help nor hurt.
pub fn similarity_score(comp: &PropertyDetails, target: &PropertyDetails) -> f64 {
    let mut score = 0.0;
    let mut weights = 0.0;

    if let (Some(c), Some(t)) = (comp.beds, target.beds) {
        score += closeness((c - t).abs() as f64, BEDS_SPAN) * BEDS_WEIGHT;
        weights += BEDS_WEIGHT;
    }

    if let (Some(c), Some(t)) = (
        comp.baths.and_then(|b| b.to_f64()),
        target.baths.and_then(|b| b.to_f64()),
    ) {
        score += closeness((c - t).abs(), BATHS_SPAN) * BATHS_WEIGHT;
        weights += BATHS_WEIGHT;
    }

    // Deviation is a share of the target size; undefined for a zero target
    if let (Some(c), Some(t)) = (comp.sqft, target.sqft) {
        if t > 0 {
            score += closeness((c - t).abs() as f64, t as f64) * SQFT_WEIGHT;
            weights += SQFT_WEIGHT;
        }
    }

    if let (Some(c), Some(t)) = (comp.year_built, target.year_built) {
        score += closeness((c - t).abs() as f64, YEAR_BUILT_SPAN) * YEAR_BUILT_WEIGHT;
        weights += YEAR_BUILT_WEIGHT;
    }

    if weights > 0.0 {
        (score / weights).clamp(0.0, 1.0)
    } else {
        NEUTRAL_SCORE
    }
}

/// `max(0, 1 - diff / span)`
fn closeness(diff: f64, span: f64) -> f64 {
    (1.0 - diff / span).max(0.0)
}

/// Ranking order: clearly better score first, otherwise most recent first
pub fn compare_ranked(a: &Comp, b: &Comp) -> Ordering {
    let a_score = a.similarity_score.unwrap_or(0.0);
    let b_score = b.similarity_score.unwrap_or(0.0);

    if (b_score - a_score).abs() > TIE_WINDOW {
        return b_score.partial_cmp(&a_score).unwrap_or(Ordering::Equal);
    }

    b.recency_date().cmp(&a.recency_date())
}

/// Annotate every comp with a similarity score and sort best first.
///
/// Without target details every comp gets `NEUTRAL_SCORE` and the order is
/// purely by recency.
pub fn rank_comps(comps: Vec<Comp>, target: Option<&PropertyDetails>) -> Vec<Comp> {
    let mut scored: Vec<Comp> = comps
        .into_iter()
        .map(|mut comp| {
            let score = match target {
                Some(t) => similarity_score(&comp.details, t),
                None => NEUTRAL_SCORE,
            };
            comp.similarity_score = Some(score);
            comp
        })
        .collect();

    // The tie window makes compare_ranked non-transitive, which slice::sort_by
    // does not allow; insertion sort only needs pairwise answers.
    insertion_sort_by(&mut scored, compare_ranked);

    debug!(
        "Ranked {} comps ({})",
        scored.len(),
        if target.is_some() { "by similarity" } else { "by recency" }
    );

    scored
}

/// Stable insertion sort; equal elements keep their input order
fn insertion_sort_by<T, F>(items: &mut [T], mut compare: F)
where
    F: FnMut(&T, &T) -> Ordering,
{
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 && compare(&items[j - 1], &items[j]) == Ordering::Greater {
            items.swap(j - 1, j);
            j -= 1;
        }
    }
}
