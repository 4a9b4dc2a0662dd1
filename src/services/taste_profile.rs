//! Genre and decade preferences distilled from the user's ratings.
//!
//! Liked and disliked films are split by the rating thresholds, their details
//! are fetched concurrently, and genre and decade frequencies become the
//! stored weights the heuristic tier reads. A short summary of the same data
//! is stored next to them and later embedded as the user's profile text.

use std::{
    collections::{HashMap, HashSet},
    hash::Hash,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    config::RecommenderConfig,
    db::{TasteProfileStore, WatchedHistory},
    error::AppResult,
    models::{
        DecadeWeight, GenreWeight, MovieDetails, MovieId, ProfileVersion, TasteSide,
        TasteWeights, UserId,
    },
    services::{fanout::fan_out, providers::MetadataProvider},
};

/// Most recent rated films considered per rebuild
pub const MAX_RATED_FILMS: i64 = 250;

const TOP_GENRES: usize = 10;
const TOP_DECADES: usize = 8;
const SUMMARY_GENRES: usize = 5;
const SUMMARY_DECADES: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TasteProfile {
    pub weights: TasteWeights,
    /// Empty when there is nothing to say yet
    pub summary: String,
}

fn round4(value: f32) -> f32 {
    (value * 10_000.0).round() / 10_000.0
}

/// Most frequent keys first, ties by ascending key, with their share of all occurrences
fn top_counts<K: Copy + Ord + Hash>(counts: &HashMap<K, u32>, top_n: usize) -> Vec<(K, u32, f32)> {
    let total: u32 = counts.values().sum();
    let mut items: Vec<(K, u32)> = counts.iter().map(|(k, n)| (*k, *n)).collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    items.truncate(top_n);
    items
        .into_iter()
        .map(|(key, n)| (key, n, round4(n as f32 / total.max(1) as f32)))
        .collect()
}

fn genre_weights(films: &[&MovieDetails]) -> Vec<GenreWeight> {
    let mut counts: HashMap<i64, u32> = HashMap::new();
    let mut names: HashMap<i64, String> = HashMap::new();
    for film in films {
        for genre in &film.genres {
            *counts.entry(genre.id).or_default() += 1;
            if !genre.name.is_empty() {
                names.insert(genre.id, genre.name.clone());
            }
        }
    }

    top_counts(&counts, TOP_GENRES)
        .into_iter()
        .map(|(id, count, score)| GenreWeight {
            id,
            name: names.get(&id).cloned(),
            count,
            score,
        })
        .collect()
}

fn decade_weights(films: &[&MovieDetails]) -> Vec<DecadeWeight> {
    let mut counts: HashMap<i32, u32> = HashMap::new();
    for decade in films.iter().filter_map(|f| f.decade()) {
        *counts.entry(decade).or_default() += 1;
    }

    top_counts(&counts, TOP_DECADES)
        .into_iter()
        .map(|(decade, count, score)| DecadeWeight {
            decade,
            count,
            score,
        })
        .collect()
}

pub fn compute_weights(
    liked: &[&MovieDetails],
    disliked: &[&MovieDetails],
    computed_at: DateTime<Utc>,
) -> TasteWeights {
    TasteWeights {
        version: ProfileVersion::default(),
        computed_at: Some(computed_at),
        likes: TasteSide {
            genres: genre_weights(liked),
            decades: decade_weights(liked),
        },
        dislikes: TasteSide {
            genres: genre_weights(disliked),
            decades: Vec::new(),
        },
    }
}

fn genre_names(side: &TasteSide) -> Vec<&str> {
    side.genres
        .iter()
        .filter_map(|g| g.name.as_deref())
        .take(SUMMARY_GENRES)
        .collect()
}

pub fn build_summary(weights: &TasteWeights) -> String {
    let mut lines = Vec::new();

    let liked = genre_names(&weights.likes);
    if !liked.is_empty() {
        lines.push(format!("Usually enjoys: {}", liked.join(", ")));
    }

    let decades: Vec<String> = weights
        .likes
        .decades
        .iter()
        .take(SUMMARY_DECADES)
        .map(|d| format!("{}s", d.decade))
        .collect();
    if !decades.is_empty() {
        lines.push(format!("Favorite decades: {}", decades.join(", ")));
    }

    let disliked = genre_names(&weights.dislikes);
    if !disliked.is_empty() {
        lines.push(format!("Rarely enjoys: {}", disliked.join(", ")));
    }

    lines.join("\n")
}

pub struct TasteProfileBuilder {
    watched: Arc<dyn WatchedHistory>,
    profiles: Arc<dyn TasteProfileStore>,
    metadata: Arc<dyn MetadataProvider>,
    like_threshold: f32,
    dislike_threshold: f32,
    fanout_limit: usize,
}

impl TasteProfileBuilder {
    pub fn new(
        watched: Arc<dyn WatchedHistory>,
        profiles: Arc<dyn TasteProfileStore>,
        metadata: Arc<dyn MetadataProvider>,
        config: &RecommenderConfig,
    ) -> Self {
        Self {
            watched,
            profiles,
            metadata,
            like_threshold: config.like_threshold,
            dislike_threshold: config.dislike_threshold,
            fanout_limit: config.fanout_limit,
        }
    }

    pub async fn rebuild(&self, user_id: UserId) -> AppResult<TasteProfile> {
        self.rebuild_at(user_id, Utc::now()).await
    }

    /// Recomputes the profile from the latest rated films and stores it
    pub async fn rebuild_at(&self, user_id: UserId, now: DateTime<Utc>) -> AppResult<TasteProfile> {
        let rated = self.watched.recent_rated(user_id, MAX_RATED_FILMS).await?;

        let liked: Vec<MovieId> = rated
            .iter()
            .filter(|r| r.rating >= self.like_threshold)
            .map(|r| r.movie_id)
            .collect();
        let disliked: Vec<MovieId> = rated
            .iter()
            .filter(|r| r.rating <= self.dislike_threshold)
            .map(|r| r.movie_id)
            .collect();

        let mut seen = HashSet::new();
        let wanted: Vec<MovieId> = liked
            .iter()
            .chain(&disliked)
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        let metadata = self.metadata.clone();
        let details: HashMap<MovieId, MovieDetails> =
            fan_out(&wanted, self.fanout_limit, move |id| {
                let metadata = metadata.clone();
                async move { metadata.details(id).await }
            })
            .await
            .into_iter()
            .filter_map(|(id, d)| d.map(|d| (id, d)))
            .collect();

        // Rewatches count once per rating
        let liked_details: Vec<&MovieDetails> =
            liked.iter().filter_map(|id| details.get(id)).collect();
        let disliked_details: Vec<&MovieDetails> =
            disliked.iter().filter_map(|id| details.get(id)).collect();
        let weights = compute_weights(&liked_details, &disliked_details, now);
        let summary = build_summary(&weights);

        self.profiles.set_profile(user_id, &weights, &summary).await?;

        tracing::info!(
            user_id,
            rated = rated.len(),
            liked = liked.len(),
            disliked = disliked.len(),
            hydrated = details.len(),
            "Taste profile rebuilt"
        );
        Ok(TasteProfile { weights, summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;
    use crate::error::AppError;
    use crate::models::{Genre, WatchedFilm};
    use crate::services::providers::MockMetadataProvider;

    const USER: UserId = 3;
    const DRAMA: i64 = 18;
    const HORROR: i64 = 27;
    const COMEDY: i64 = 35;
    const CRIME: i64 = 80;

    fn genre(id: i64) -> Genre {
        let name = match id {
            DRAMA => "Drama",
            HORROR => "Horror",
            COMEDY => "Comedy",
            CRIME => "Crime",
            _ => "",
        };
        Genre {
            id,
            name: name.to_string(),
        }
    }

    fn details(id: MovieId, year: i32, genres: &[i64]) -> MovieDetails {
        MovieDetails {
            id,
            title: format!("Movie {}", id),
            year: Some(year),
            runtime: None,
            genres: genres.iter().copied().map(genre).collect(),
            overview: None,
        }
    }

    fn film(id: i64, rating: f32) -> WatchedFilm {
        WatchedFilm {
            id,
            movie_id: id,
            title: format!("Movie {}", id),
            year: None,
            rating: Some(rating),
            review: None,
            watched_date: None,
        }
    }

    fn builder(store: Arc<InMemoryStore>, metadata: MockMetadataProvider) -> TasteProfileBuilder {
        TasteProfileBuilder::new(
            store.clone(),
            store,
            Arc::new(metadata),
            &RecommenderConfig::default(),
        )
    }

    #[test]
    fn test_top_counts_orders_and_normalizes() {
        let counts = HashMap::from([(80, 1), (18, 2), (35, 1)]);
        let top = top_counts(&counts, 2);
        assert_eq!(top, vec![(18, 2, 0.5), (35, 1, 0.25)]);

        let thirds = top_counts(&HashMap::from([(1990, 2), (2000, 1)]), 8);
        assert_eq!(thirds, vec![(1990, 2, 0.6667), (2000, 1, 0.3333)]);
    }

    #[test]
    fn test_summary_limits_and_empty_profile() {
        assert_eq!(build_summary(&TasteWeights::default()), "");

        let ids = [DRAMA, HORROR, COMEDY, CRIME, 10, 12];
        let films: Vec<MovieDetails> = (0..6).map(|i| details(i, 1990 + 10 * i as i32, &ids)).collect();
        let refs: Vec<&MovieDetails> = films.iter().collect();
        let summary = build_summary(&compute_weights(&refs, &[], Utc::now()));

        // unnamed genres never reach the summary
        assert!(summary.starts_with("Usually enjoys: Drama, Horror, Comedy, Crime\n"));
        assert!(summary.ends_with("Favorite decades: 1990s, 2000s, 2010s, 2020s"));
    }

    #[tokio::test]
    async fn test_rebuild_stores_weights_and_summary() {
        let store = Arc::new(InMemoryStore::new());
        for (id, rating) in [(1, 5.0), (2, 4.0), (3, 4.5), (4, 1.0), (5, 3.0), (6, 4.5)] {
            store.add_watched(USER, film(id, rating)).await;
        }

        let mut metadata = MockMetadataProvider::new();
        metadata
            .expect_details()
            .withf(|id| *id != 5)
            .times(5)
            .returning(|id| match id {
                1 => Ok(details(1, 1994, &[DRAMA])),
                2 => Ok(details(2, 1999, &[DRAMA, CRIME])),
                3 => Ok(details(3, 2005, &[COMEDY])),
                4 => Ok(details(4, 2010, &[HORROR])),
                _ => Err(AppError::ExternalApi("TMDB 404 Not Found".to_string())),
            });

        let now = Utc::now();
        let profile = tokio_test::assert_ok!(builder(store.clone(), metadata).rebuild_at(USER, now).await);

        let liked: Vec<(i64, u32, f32)> = profile
            .weights
            .likes
            .genres
            .iter()
            .map(|g| (g.id, g.count, g.score))
            .collect();
        assert_eq!(liked, vec![(DRAMA, 2, 0.5), (COMEDY, 1, 0.25), (CRIME, 1, 0.25)]);
        assert_eq!(profile.weights.likes.decades[0].decade, 1990);
        assert_eq!(profile.weights.dislikes.genres[0].id, HORROR);
        assert_eq!(profile.weights.computed_at, Some(now));
        assert_eq!(
            profile.summary,
            "Usually enjoys: Drama, Comedy, Crime\nFavorite decades: 1990s, 2000s\nRarely enjoys: Horror"
        );

        assert_eq!(store.get_weights(USER).await.unwrap(), Some(profile.weights));
        assert_eq!(store.get_summary(USER).await.unwrap(), Some(profile.summary));
    }

    #[tokio::test]
    async fn test_rebuild_without_ratings_stores_nothing_usable() {
        let store = Arc::new(InMemoryStore::new());
        store
            .add_watched(
                USER,
                WatchedFilm {
                    rating: None,
                    ..film(1, 0.0)
                },
            )
            .await;

        let profile = builder(store.clone(), MockMetadataProvider::new())
            .rebuild(USER)
            .await
            .unwrap();

        assert!(profile.weights.likes.genres.is_empty());
        assert_eq!(profile.summary, "");
        assert_eq!(store.get_weights(USER).await.unwrap(), None);
        assert_eq!(store.get_summary(USER).await.unwrap(), None);
    }
}
