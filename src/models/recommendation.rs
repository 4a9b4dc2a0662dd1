use serde::{Deserialize, Serialize};

use super::MovieId;

/// Why a pick was chosen, relative to the user's taste
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    CloseMatch,
    Adjacent,
    Experimental,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::CloseMatch => "close-match",
            Strategy::Adjacent => "adjacent",
            Strategy::Experimental => "experimental",
        }
    }

    /// Labels a pick of the embedding tier from its similarity and novelty
    pub fn from_similarity(sim_like: f32, novelty: f32) -> Self {
        if sim_like >= 0.32 {
            Strategy::CloseMatch
        } else if sim_like >= 0.22 || novelty >= 0.65 {
            Strategy::Adjacent
        } else {
            Strategy::Experimental
        }
    }
}

/// Which scoring tier produced a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Vector,
    Heuristic,
}

/// One candidate as scored by the embedding tier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub movie_id: MovieId,
    pub sim_like: f32,
    pub sim_dislike: f32,
    pub novelty: f32,
    pub repeat_penalty: f32,
    pub avoid_penalty: f32,
    pub score: f32,
    pub triggered_avoid_ids: Vec<String>,
}

impl ScoredCandidate {
    pub fn new(
        movie_id: MovieId,
        sim_like: f32,
        sim_dislike: f32,
        novelty: f32,
        repeat_penalty: f32,
        avoid_penalty: f32,
        triggered_avoid_ids: Vec<String>,
    ) -> Self {
        let score = sim_like - 0.7 * sim_dislike + 0.2 * novelty - repeat_penalty - avoid_penalty;
        Self {
            movie_id,
            sim_like,
            sim_dislike,
            novelty,
            repeat_penalty,
            avoid_penalty,
            score,
            triggered_avoid_ids,
        }
    }

    pub fn debug_line(&self) -> String {
        format!(
            "like={:.3} dislike={:.3} nov={:.2} rep={:.2} avoid={:.2}",
            self.sim_like, self.sim_dislike, self.novelty, self.repeat_penalty, self.avoid_penalty
        )
    }
}

/// A final recommendation handed to the front-end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecPick {
    pub movie_id: MovieId,
    pub strategy: Strategy,
    pub score: f32,
    pub reason: String,
    #[serde(default)]
    pub triggered_avoid_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub tier: Tier,
    pub picks: Vec<RecPick>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_score() {
        let scored = ScoredCandidate::new(1, 0.5, 0.2, 0.8, 0.1, 0.35, vec![]);
        let expected = 0.5 - 0.14 + 0.16 - 0.1 - 0.35;
        assert!((scored.score - expected).abs() < 1e-6);
    }

    #[test]
    fn test_strategy_thresholds() {
        assert_eq!(Strategy::from_similarity(0.32, 0.0), Strategy::CloseMatch);
        assert_eq!(Strategy::from_similarity(0.25, 0.1), Strategy::Adjacent);
        assert_eq!(Strategy::from_similarity(0.05, 0.65), Strategy::Adjacent);
        assert_eq!(Strategy::from_similarity(0.1, 0.3), Strategy::Experimental);
    }

    #[test]
    fn test_strategy_serialization() {
        assert_eq!(
            serde_json::to_string(&Strategy::CloseMatch).unwrap(),
            "\"close-match\""
        );
        assert_eq!(serde_json::to_string(&Tier::Heuristic).unwrap(), "\"heuristic\"");
    }
}
