use std::collections::HashMap;

use crate::{
    models::{MovieId, ScoredCandidate},
    services::vector_math::cosine_similarity,
};

/// Tunables of the greedy diversification
#[derive(Debug, Clone, Copy)]
pub struct MmrParams {
    /// Weight of relevance against redundancy, in [0, 1]
    pub lambda: f32,
    /// Redundancy assumed for a candidate without a vector
    pub missing_redundancy: f32,
}

impl Default for MmrParams {
    fn default() -> Self {
        Self {
            lambda: 0.75,
            missing_redundancy: 0.2,
        }
    }
}

/// Greedy Maximal Marginal Relevance selection of up to `k` candidates.
///
/// Candidates are ranked by score (stable, so equal scores keep input order)
/// and the best one is always taken first. Each following pick maximizes
/// `lambda * score - (1 - lambda) * redundancy`, where redundancy is the
/// highest non-negative cosine similarity to an already selected vector.
/// Ties go to the candidate ranked earlier.
pub fn mmr_select(
    candidates: &[ScoredCandidate],
    vectors: &HashMap<MovieId, Vec<f32>>,
    k: usize,
    params: MmrParams,
) -> Vec<ScoredCandidate> {
    let mut remaining: Vec<&ScoredCandidate> = candidates.iter().collect();
    remaining.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut selected: Vec<&ScoredCandidate> = Vec::with_capacity(k.min(remaining.len()));
    if k == 0 || remaining.is_empty() {
        return Vec::new();
    }
    selected.push(remaining.remove(0));

    while selected.len() < k && !remaining.is_empty() {
        let mut best: Option<(usize, f32)> = None;
        for (idx, candidate) in remaining.iter().enumerate() {
            let redundancy = redundancy(candidate.movie_id, &selected, vectors, params);
            let value = params.lambda * candidate.score - (1.0 - params.lambda) * redundancy;
            if best.map_or(true, |(_, best_value)| value > best_value) {
                best = Some((idx, value));
            }
        }

        match best {
            Some((idx, _)) => selected.push(remaining.remove(idx)),
            None => break,
        }
    }

    selected.into_iter().cloned().collect()
}

fn redundancy(
    movie_id: MovieId,
    selected: &[&ScoredCandidate],
    vectors: &HashMap<MovieId, Vec<f32>>,
    params: MmrParams,
) -> f32 {
    let Some(vector) = vectors.get(&movie_id).filter(|v| !v.is_empty()) else {
        return params.missing_redundancy;
    };

    selected
        .iter()
        .filter_map(|s| vectors.get(&s.movie_id))
        .map(|other| cosine_similarity(vector, other).max(0.0))
        .fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(movie_id: MovieId, score: f32) -> ScoredCandidate {
        ScoredCandidate {
            movie_id,
            sim_like: score,
            sim_dislike: 0.0,
            novelty: 0.0,
            repeat_penalty: 0.0,
            avoid_penalty: 0.0,
            score,
            triggered_avoid_ids: vec![],
        }
    }

    fn ids(selected: &[ScoredCandidate]) -> Vec<MovieId> {
        selected.iter().map(|s| s.movie_id).collect()
    }

    #[test]
    fn test_returns_k_distinct_with_top_first() {
        let candidates: Vec<ScoredCandidate> =
            (1..=10).map(|i| scored(i, i as f32 / 10.0)).collect();
        let vectors: HashMap<MovieId, Vec<f32>> = (1..=10)
            .map(|i| (i, vec![1.0, i as f32 * 0.1]))
            .collect();

        let selected = mmr_select(&candidates, &vectors, 4, MmrParams::default());

        let picked = ids(&selected);
        assert_eq!(picked.len(), 4);
        assert_eq!(picked[0], 10);
        let unique: std::collections::HashSet<_> = picked.iter().collect();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn test_fewer_candidates_than_k() {
        let candidates = vec![scored(1, 0.2), scored(2, 0.9)];
        let selected = mmr_select(&candidates, &HashMap::new(), 5, MmrParams::default());
        assert_eq!(ids(&selected), vec![2, 1]);
        assert!(mmr_select(&candidates, &HashMap::new(), 0, MmrParams::default()).is_empty());
    }

    #[test]
    fn test_prefers_diverse_candidate_over_near_duplicate() {
        let candidates = vec![scored(1, 0.9), scored(2, 0.85), scored(3, 0.8)];
        let vectors = HashMap::from([
            (1, vec![1.0, 0.0]),
            (2, vec![0.99, 0.01]),
            (3, vec![0.0, 1.0]),
        ]);

        let selected = mmr_select(&candidates, &vectors, 2, MmrParams::default());
        assert_eq!(ids(&selected), vec![1, 3]);
    }

    #[test]
    fn test_equal_scores_keep_input_order() {
        let candidates = vec![scored(7, 0.5), scored(3, 0.5), scored(9, 0.5)];
        let vectors = HashMap::from([
            (7, vec![1.0, 0.0]),
            (3, vec![0.0, 1.0]),
            (9, vec![0.0, 1.0]),
        ]);

        let first = mmr_select(&candidates, &vectors, 3, MmrParams::default());
        let second = mmr_select(&candidates, &vectors, 3, MmrParams::default());
        assert_eq!(ids(&first), vec![7, 3, 9]);
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_missing_vector_uses_fixed_redundancy() {
        // 2 has no vector: 0.75*0.6 - 0.25*0.2 = 0.40
        // 3 duplicates 1:   0.75*0.7 - 0.25*1.0 = 0.275
        let candidates = vec![scored(1, 0.9), scored(2, 0.6), scored(3, 0.7)];
        let vectors = HashMap::from([(1, vec![1.0, 0.0]), (3, vec![1.0, 0.0])]);

        let selected = mmr_select(&candidates, &vectors, 2, MmrParams::default());
        assert_eq!(ids(&selected), vec![1, 2]);
    }
}
