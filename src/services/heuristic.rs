//! Metadata-only recommendations for users without enough embeddings.
//!
//! Picks come from genre overlap with the user's taste plus a popularity and
//! vote based quality signal: one close match, one adjacent pick that still
//! overlaps but differs in language, era or genre mix, and one experimental
//! pick of high quality outside the usual genres.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::{
    config::RecommenderConfig,
    db::TasteProfileStore,
    error::AppResult,
    models::{MovieCandidate, MovieDetails, MovieId, RecPick, Strategy, TasteWeights, UserId},
    services::{candidate_pool::CandidatePool, fanout::fan_out, providers::MetadataProvider},
};

/// Genre id to preference weight
pub type GenreWeights = HashMap<i64, f32>;

const ADJACENT_MIN_OVERLAP: f32 = 0.12;
const EXPERIMENTAL_MAX_OVERLAP: f32 = 0.18;

pub fn genre_weights_from_profile(weights: &TasteWeights) -> GenreWeights {
    weights
        .likes
        .genres
        .iter()
        .map(|g| (g.id, g.score))
        .collect()
}

/// Genre frequencies across the given films, normalized to sum 1
pub fn genre_weights_from_details<'a>(
    details: impl IntoIterator<Item = &'a MovieDetails>,
) -> GenreWeights {
    let mut counts: HashMap<i64, u32> = HashMap::new();
    for film in details {
        for id in film.genre_ids() {
            *counts.entry(id).or_default() += 1;
        }
    }

    let total: u32 = counts.values().sum();
    if total == 0 {
        return GenreWeights::new();
    }
    counts
        .into_iter()
        .map(|(id, n)| (id, n as f32 / total as f32))
        .collect()
}

/// Roughly 0..1, from the vote average and popularity
pub fn quality_score(candidate: &MovieCandidate) -> f32 {
    let vote = candidate.vote_average.unwrap_or(0.0) / 10.0;
    let popularity = (candidate.popularity.unwrap_or(0.0) / 80.0).min(1.0);
    0.6 * vote + 0.4 * popularity
}

pub fn genre_overlap(candidate: &MovieCandidate, weights: &GenreWeights) -> f32 {
    candidate
        .genre_ids
        .iter()
        .map(|g| weights.get(g).copied().unwrap_or(0.0))
        .sum()
}

fn genre_set(candidate: &MovieCandidate) -> HashSet<i64> {
    candidate.genre_ids.iter().copied().collect()
}

fn close_match_score(candidate: &MovieCandidate, weights: &GenreWeights) -> f32 {
    0.75 * genre_overlap(candidate, weights) + 0.25 * quality_score(candidate)
}

struct Scored<'a> {
    candidate: &'a MovieCandidate,
    score: f32,
    reason: String,
}

impl Scored<'_> {
    fn into_pick(self, strategy: Strategy) -> RecPick {
        RecPick {
            movie_id: self.candidate.id,
            strategy,
            score: self.score,
            reason: self.reason,
            triggered_avoid_ids: Vec::new(),
        }
    }
}

/// First maximum wins, so ties resolve to pool order
fn argmax<'a, I>(scored: I) -> Option<Scored<'a>>
where
    I: Iterator<Item = Scored<'a>>,
{
    scored.fold(None, |best, next| match best {
        Some(b) if b.score >= next.score => Some(b),
        _ => Some(next),
    })
}

fn pick_close_match<'a>(candidates: &'a [MovieCandidate], weights: &GenreWeights) -> Option<Scored<'a>> {
    argmax(candidates.iter().map(|c| {
        let overlap = genre_overlap(c, weights);
        let quality = quality_score(c);
        Scored {
            candidate: c,
            score: 0.75 * overlap + 0.25 * quality,
            reason: format!("genre_match={:.3}, quality={:.3}", overlap, quality),
        }
    }))
}

fn pick_adjacent<'a>(
    candidates: &'a [MovieCandidate],
    weights: &GenreWeights,
    anchor: &MovieCandidate,
) -> Option<Scored<'a>> {
    let anchor_genres = genre_set(anchor);

    argmax(
        candidates
            .iter()
            .filter(|c| c.id != anchor.id)
            .filter_map(|c| {
                let overlap = genre_overlap(c, weights);
                if overlap < ADJACENT_MIN_OVERLAP {
                    return None;
                }
                let quality = quality_score(c);

                let mut bonus = 0.0;
                if let (Some(lang), Some(anchor_lang)) =
                    (&c.original_language, &anchor.original_language)
                {
                    if lang != anchor_lang {
                        bonus += 0.15;
                    }
                }
                if let (Some(year), Some(anchor_year)) = (c.year, anchor.year) {
                    if (year - anchor_year).abs() >= 10 {
                        bonus += 0.12;
                    }
                }
                let genres = genre_set(c);
                if !genres.is_empty() && !anchor_genres.is_empty() && genres != anchor_genres {
                    bonus += 0.10;
                }

                Some(Scored {
                    candidate: c,
                    score: 0.60 * overlap + 0.30 * quality + bonus,
                    reason: format!(
                        "genre_match={:.3}, quality={:.3}, bonus={:.2}",
                        overlap, quality, bonus
                    ),
                })
            }),
    )
}

fn pick_experimental<'a>(
    candidates: &'a [MovieCandidate],
    weights: &GenreWeights,
    chosen: &[&MovieCandidate],
) -> Option<Scored<'a>> {
    let chosen_ids: HashSet<MovieId> = chosen.iter().map(|c| c.id).collect();
    let chosen_genres: Vec<HashSet<i64>> = chosen.iter().map(|c| genre_set(c)).collect();

    argmax(
        candidates
            .iter()
            .filter(|c| !chosen_ids.contains(&c.id))
            .filter_map(|c| {
                let overlap = genre_overlap(c, weights);
                if overlap > EXPERIMENTAL_MAX_OVERLAP {
                    return None;
                }
                let quality = quality_score(c);
                let genres = genre_set(c);
                let bonus = if chosen_genres.iter().all(|g| g.is_disjoint(&genres)) {
                    0.12
                } else {
                    0.0
                };

                Some(Scored {
                    candidate: c,
                    score: 0.20 * overlap + 0.70 * quality + bonus,
                    reason: format!(
                        "genre_match={:.3}, quality={:.3}, bonus={:.2}",
                        overlap, quality, bonus
                    ),
                })
            }),
    )
}

/// Chooses up to `count` picks from an already filtered pool.
///
/// Beyond the three labeled picks, extras follow close-match rank but skip
/// films whose genre set equals one already chosen. An empty pool gives no
/// picks.
pub fn select_picks(
    candidates: &[MovieCandidate],
    weights: &GenreWeights,
    count: usize,
) -> Vec<RecPick> {
    if count == 0 {
        return Vec::new();
    }
    let Some(close) = pick_close_match(candidates, weights) else {
        return Vec::new();
    };

    let mut chosen: Vec<&MovieCandidate> = vec![close.candidate];
    let adjacent = pick_adjacent(candidates, weights, close.candidate);
    let mut picks = vec![close.into_pick(Strategy::CloseMatch)];

    if let Some(adjacent) = adjacent {
        chosen.push(adjacent.candidate);
        picks.push(adjacent.into_pick(Strategy::Adjacent));
    }
    if let Some(experimental) = pick_experimental(candidates, weights, &chosen) {
        chosen.push(experimental.candidate);
        picks.push(experimental.into_pick(Strategy::Experimental));
    }

    if count > picks.len() {
        let mut ranked: Vec<&MovieCandidate> = candidates.iter().collect();
        ranked.sort_by(|a, b| close_match_score(b, weights).total_cmp(&close_match_score(a, weights)));

        for candidate in ranked {
            if picks.len() >= count {
                break;
            }
            if chosen.iter().any(|c| c.id == candidate.id) {
                continue;
            }
            let genres = genre_set(candidate);
            let repeats_genre_mix = !genres.is_empty()
                && chosen
                    .iter()
                    .map(|c| genre_set(c))
                    .any(|g| !g.is_empty() && g == genres);
            if repeats_genre_mix {
                continue;
            }

            let score = close_match_score(candidate, weights);
            picks.push(RecPick {
                movie_id: candidate.id,
                strategy: Strategy::CloseMatch,
                score,
                reason: format!("extra_diverse, score={:.3}", score),
                triggered_avoid_ids: Vec::new(),
            });
            chosen.push(candidate);
        }
    }

    picks.truncate(count);
    picks
}

/// Baseline tier: genre preferences plus [`select_picks`]
pub struct HeuristicTier {
    metadata: Arc<dyn MetadataProvider>,
    profiles: Arc<dyn TasteProfileStore>,
    fanout_limit: usize,
    genre_seeds: usize,
}

impl HeuristicTier {
    pub fn new(
        metadata: Arc<dyn MetadataProvider>,
        profiles: Arc<dyn TasteProfileStore>,
        config: &RecommenderConfig,
    ) -> Self {
        Self {
            metadata,
            profiles,
            fanout_limit: config.fanout_limit,
            genre_seeds: config.genre_seeds,
        }
    }

    /// Stored taste weights, else genre frequency over the seeds' details
    pub async fn genre_weights(&self, user_id: UserId, seeds: &[MovieId]) -> AppResult<GenreWeights> {
        if let Some(weights) = self.profiles.get_weights(user_id).await? {
            let from_profile = genre_weights_from_profile(&weights);
            if !from_profile.is_empty() {
                return Ok(from_profile);
            }
        }

        let seeds = &seeds[..seeds.len().min(self.genre_seeds)];
        let metadata = self.metadata.clone();
        let details = fan_out(seeds, self.fanout_limit, move |id| {
            let metadata = metadata.clone();
            async move { metadata.details(id).await }
        })
        .await;

        let weights = genre_weights_from_details(details.iter().filter_map(|(_, d)| d.as_ref()));
        tracing::debug!(user_id, genres = weights.len(), "Derived genre weights from seeds");
        Ok(weights)
    }

    pub async fn recommend(
        &self,
        user_id: UserId,
        pool: &CandidatePool,
        count: usize,
    ) -> AppResult<Vec<RecPick>> {
        if pool.seeds.is_empty() || pool.candidates.is_empty() {
            return Ok(Vec::new());
        }

        let weights = self.genre_weights(user_id, &pool.seeds).await?;
        let picks = select_picks(&pool.candidates, &weights, count);

        tracing::info!(
            user_id,
            candidates = pool.candidates.len(),
            picks = picks.len(),
            "Heuristic tier selected"
        );
        Ok(picks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MockTasteProfileStore;
    use crate::models::{Genre, GenreWeight, TasteSide};
    use crate::services::providers::MockMetadataProvider;

    const DRAMA: i64 = 18;
    const COMEDY: i64 = 35;
    const HORROR: i64 = 27;

    fn movie(id: MovieId, genres: &[i64], vote: f32, popularity: f32) -> MovieCandidate {
        MovieCandidate {
            id,
            title: format!("Movie {}", id),
            year: Some(2005),
            popularity: Some(popularity),
            vote_average: Some(vote),
            genre_ids: genres.to_vec(),
            original_language: Some("en".to_string()),
        }
    }

    fn details(id: MovieId, genres: &[i64]) -> MovieDetails {
        MovieDetails {
            id,
            title: format!("Seed {}", id),
            year: Some(1999),
            runtime: Some(120),
            genres: genres
                .iter()
                .map(|g| Genre {
                    id: *g,
                    name: format!("Genre {}", g),
                })
                .collect(),
            overview: None,
        }
    }

    #[test]
    fn test_quality_score() {
        let c = movie(1, &[], 8.0, 160.0);
        assert!((quality_score(&c) - (0.6 * 0.8 + 0.4)).abs() < 1e-6);
        let unknown = MovieCandidate {
            vote_average: None,
            popularity: None,
            ..c
        };
        assert_eq!(quality_score(&unknown), 0.0);
    }

    #[test]
    fn test_genre_weights_from_details_sum_to_one() {
        let films = [details(1, &[DRAMA, COMEDY]), details(2, &[DRAMA])];
        let weights = genre_weights_from_details(films.iter());
        assert!((weights[&DRAMA] - 2.0 / 3.0).abs() < 1e-6);
        assert!((weights[&COMEDY] - 1.0 / 3.0).abs() < 1e-6);
        assert!(genre_weights_from_details(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_same_genre_close_match_and_other_genre_experimental() {
        // seed A is a drama; B shares it, C does not
        let weights = genre_weights_from_details([details(1, &[DRAMA])].iter());
        let pool = vec![movie(2, &[DRAMA], 8.0, 90.0), movie(3, &[HORROR], 8.0, 90.0)];

        let picks = select_picks(&pool, &weights, 3);

        assert_eq!(picks.len(), 2);
        assert_eq!((picks[0].movie_id, picks[0].strategy), (2, Strategy::CloseMatch));
        assert_eq!((picks[1].movie_id, picks[1].strategy), (3, Strategy::Experimental));
    }

    #[test]
    fn test_adjacent_rewards_difference() {
        let weights = GenreWeights::from([(DRAMA, 0.7), (COMEDY, 0.3)]);
        let close = movie(1, &[DRAMA], 9.0, 100.0);
        let mut foreign_old = movie(2, &[COMEDY], 6.0, 10.0);
        foreign_old.original_language = Some("fr".to_string());
        foreign_old.year = Some(1960);
        let similar = movie(3, &[DRAMA], 7.0, 20.0);

        let picks = select_picks(&[close, foreign_old, similar], &weights, 2);

        assert_eq!(picks[0].movie_id, 1);
        assert_eq!((picks[1].movie_id, picks[1].strategy), (2, Strategy::Adjacent));
    }

    #[test]
    fn test_extras_skip_repeated_genre_mix() {
        let weights = GenreWeights::from([(DRAMA, 1.0)]);
        let pool = vec![
            movie(1, &[DRAMA], 9.0, 100.0),
            movie(2, &[DRAMA], 8.5, 100.0),
            movie(3, &[DRAMA, COMEDY], 8.0, 100.0),
            movie(4, &[HORROR], 8.0, 100.0),
            movie(5, &[COMEDY], 7.0, 50.0),
        ];

        let picks = select_picks(&pool, &weights, 5);
        let ids: Vec<MovieId> = picks.iter().map(|p| p.movie_id).collect();

        // 1 close match, 3 adjacent, 4 experimental; 2 repeats 1's genres
        assert_eq!(ids, vec![1, 3, 4, 5]);
        assert!(picks.len() <= 5);
    }

    #[test]
    fn test_empty_pool_or_zero_count() {
        let weights = GenreWeights::from([(DRAMA, 1.0)]);
        assert!(select_picks(&[], &weights, 3).is_empty());
        assert!(select_picks(&[movie(1, &[DRAMA], 7.0, 10.0)], &weights, 0).is_empty());
    }

    #[tokio::test]
    async fn test_profile_weights_take_precedence() {
        let mut profiles = MockTasteProfileStore::new();
        profiles.expect_get_weights().returning(|_| {
            Ok(Some(TasteWeights {
                likes: TasteSide {
                    genres: vec![GenreWeight {
                        id: HORROR,
                        name: Some("Horror".to_string()),
                        count: 9,
                        score: 0.9,
                    }],
                    decades: vec![],
                },
                ..TasteWeights::default()
            }))
        });
        let tier = HeuristicTier::new(
            Arc::new(MockMetadataProvider::new()),
            Arc::new(profiles),
            &RecommenderConfig::default(),
        );

        let weights = tier.genre_weights(1, &[10, 11]).await.unwrap();
        assert_eq!(weights, GenreWeights::from([(HORROR, 0.9)]));
    }

    #[tokio::test]
    async fn test_seed_details_failures_are_skipped() {
        let mut profiles = MockTasteProfileStore::new();
        profiles.expect_get_weights().returning(|_| Ok(None));
        let mut metadata = MockMetadataProvider::new();
        metadata.expect_details().returning(|id| {
            if id == 11 {
                Err(crate::error::AppError::ExternalApi("404".to_string()))
            } else {
                Ok(details(id, &[COMEDY]))
            }
        });
        let tier = HeuristicTier::new(
            Arc::new(metadata),
            Arc::new(profiles),
            &RecommenderConfig::default(),
        );

        let weights = tier.genre_weights(1, &[10, 11, 12]).await.unwrap();
        assert_eq!(weights, GenreWeights::from([(COMEDY, 1.0)]));
    }
}
