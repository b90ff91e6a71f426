//! Result merging and reranking
//!
//! Everything here is pure and deterministic: the same inputs always produce
//! the same order.
//!
//! Ordering rule used throughout:
//! 1. higher score first
//! 2. on an exact tie, higher collection priority first
//! 3. then earlier insertion first

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::types::SearchResult;

/// Min-max normalize scores into [0, 1]
///
/// A list whose scores are all equal maps to 1.0 (or 0.0 when every score
/// is non-positive).
pub fn normalize_scores(results: &mut [SearchResult]) {
    let Some(first) = results.first() else {
        return;
    };
    let (min, max) = results.iter().fold((first.score, first.score), |(lo, hi), r| {
        (lo.min(r.score), hi.max(r.score))
    });

    let span = max - min;
    for r in results.iter_mut() {
        r.score = if span > f32::EPSILON {
            (r.score - min) / span
        } else if max > 0.0 {
            1.0
        } else {
            0.0
        };
    }
}

fn compare(
    a: &(usize, SearchResult),
    b: &(usize, SearchResult),
    priority: &impl Fn(&str) -> u8,
) -> Ordering {
    b.1.score
        .total_cmp(&a.1.score)
        .then_with(|| priority(&b.1.collection).cmp(&priority(&a.1.collection)))
        .then_with(|| a.0.cmp(&b.0))
}

/// Sort in place by the deterministic ordering rule
///
/// The current order of `results` is the insertion order.
pub fn sort_results(results: &mut Vec<SearchResult>, priority: impl Fn(&str) -> u8) {
    let mut indexed: Vec<(usize, SearchResult)> = results.drain(..).enumerate().collect();
    indexed.sort_by(|a, b| compare(a, b, &priority));
    results.extend(indexed.into_iter().map(|(_, r)| r));
}

/// Merge several ranked lists into one
///
/// Each list is normalized on its own first. A hit found by more than one
/// list keeps its best score and its first insertion position.
pub fn merge_hybrid(
    lists: Vec<Vec<SearchResult>>,
    priority: impl Fn(&str) -> u8,
) -> Vec<SearchResult> {
    let mut merged: Vec<SearchResult> = Vec::new();
    let mut positions: HashMap<(String, String), usize> = HashMap::new();

    for mut list in lists {
        normalize_scores(&mut list);
        for result in list {
            match positions.get(&result.merge_key()) {
                Some(&pos) => {
                    if result.score > merged[pos].score {
                        merged[pos].score = result.score;
                    }
                }
                None => {
                    positions.insert(result.merge_key(), merged.len());
                    merged.push(result);
                }
            }
        }
    }

    sort_results(&mut merged, priority);
    merged
}

/// Lowercased alphanumeric terms of at least two characters
fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of query terms that appear in `content`
#[must_use]
pub fn lexical_overlap(query: &str, content: &str) -> f32 {
    let query_terms = terms(query);
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_terms = terms(content);
    let shared = query_terms.intersection(&content_terms).count();
    shared as f32 / query_terms.len() as f32
}

/// Blend each score with query-term overlap and re-sort
///
/// `score = (1 - weight) * score + weight * overlap`
pub fn rerank_lexical(
    query: &str,
    results: &mut Vec<SearchResult>,
    weight: f32,
    priority: impl Fn(&str) -> u8,
) {
    let weight = weight.clamp(0.0, 1.0);
    if weight > 0.0 {
        for r in results.iter_mut() {
            let overlap = lexical_overlap(query, &r.content);
            r.score = (1.0 - weight) * r.score + weight * overlap;
        }
    }
    sort_results(results, priority);
}

/// Tree grouping key: parent, then owning document, then the hit itself
fn group_key(result: &SearchResult) -> String {
    result
        .payload
        .parent_id
        .clone()
        .or_else(|| result.payload.document_id.clone())
        .unwrap_or_else(|| result.id.clone())
}

/// Group hits by their tree node and expand the best `max_groups` groups
///
/// Input must already be sorted. Groups are ranked by their best hit; hits
/// inside a group keep their relative order.
#[must_use]
pub fn group_tree(results: Vec<SearchResult>, max_groups: usize) -> Vec<SearchResult> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<SearchResult>> = HashMap::new();

    for result in results {
        let key = group_key(&result);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(result);
    }

    // Sorted input means first appearance order is best-score order
    order
        .into_iter()
        .take(max_groups)
        .filter_map(|key| groups.remove(&key))
        .flatten()
        .collect()
}
