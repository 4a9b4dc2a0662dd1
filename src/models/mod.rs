use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

mod embedding;
mod recommendation;
mod taste_profile;

pub use embedding::{EmbeddingJob, JobStatus, NewEmbeddingJob, SourceType, TextEmbedding};
pub use recommendation::{RecPick, Recommendation, ScoredCandidate, Strategy, Tier};
pub use taste_profile::{
    AvoidancePattern, AvoidanceProfile, DecadeWeight, GenreWeight, ProfileVersion, TasteSide,
    TasteWeights, MAX_COOLDOWN_DAYS,
};

/// TMDB movie identifier
pub type MovieId = i64;

/// Internal user identifier
pub type UserId = i64;

/// An unseen movie eligible for recommendation, as returned by list endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MovieCandidate {
    pub id: MovieId,
    pub title: String,
    pub year: Option<i32>,
    pub popularity: Option<f32>,
    pub vote_average: Option<f32>,
    #[serde(default)]
    pub genre_ids: Vec<i64>,
    pub original_language: Option<String>,
}

impl MovieCandidate {
    /// Ranking signal used to pick between duplicate list entries
    pub fn dedupe_quality(&self) -> f32 {
        self.vote_average.unwrap_or(0.0) + self.popularity.unwrap_or(0.0) / 100.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

/// Full details of a single movie
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MovieDetails {
    pub id: MovieId,
    pub title: String,
    pub year: Option<i32>,
    pub runtime: Option<i32>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    pub overview: Option<String>,
}

impl MovieDetails {
    pub fn genre_ids(&self) -> Vec<i64> {
        self.genres.iter().map(|g| g.id).collect()
    }

    pub fn decade(&self) -> Option<i32> {
        self.year.map(decade_of)
    }
}

pub fn decade_of(year: i32) -> i32 {
    (year / 10) * 10
}

/// A film in the user's watched history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct WatchedFilm {
    /// Watched-item identifier, the key of review embeddings
    pub id: i64,
    pub movie_id: MovieId,
    pub title: String,
    pub year: Option<i32>,
    /// 0..5 scale
    pub rating: Option<f32>,
    pub review: Option<String>,
    pub watched_date: Option<NaiveDate>,
}

/// A rated entry used to build taste vectors
#[derive(Debug, Clone, Copy, PartialEq, sqlx::FromRow)]
pub struct RatedWatch {
    pub watched_id: i64,
    pub movie_id: MovieId,
    pub rating: f32,
}

// ============================================================================
// TMDB API Types
// ============================================================================

/// List entry returned by /search, /similar and /recommendations
#[derive(Debug, Clone, Deserialize)]
pub struct TmdbMovie {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub popularity: Option<f32>,
    #[serde(default)]
    pub vote_average: Option<f32>,
    #[serde(default)]
    pub genre_ids: Vec<i64>,
    #[serde(default)]
    pub original_language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbPage {
    #[serde(default)]
    pub results: Vec<TmdbMovie>,
}

/// Response of /movie/{id}
#[derive(Debug, Clone, Deserialize)]
pub struct TmdbMovieDetails {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub runtime: Option<i32>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    #[serde(default)]
    pub overview: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbKeyword {
    pub name: String,
}

/// Response of /movie/{id}/keywords
#[derive(Debug, Clone, Deserialize)]
pub struct TmdbKeywords {
    #[serde(default)]
    pub keywords: Vec<TmdbKeyword>,
}

/// TMDB sends release dates as "YYYY-MM-DD", sometimes empty
pub fn year_from_release_date(release_date: Option<&str>) -> Option<i32> {
    let date = release_date?;
    let prefix = date.get(..4)?;
    if prefix.chars().all(|c| c.is_ascii_digit()) {
        prefix.parse().ok()
    } else {
        None
    }
}

impl TmdbMovie {
    /// Entries without any title are unusable and dropped
    pub fn into_candidate(self) -> Option<MovieCandidate> {
        if self.id <= 0 {
            return None;
        }
        let title = self.title.or(self.original_title)?;
        Some(MovieCandidate {
            id: self.id,
            year: year_from_release_date(self.release_date.as_deref()),
            title,
            popularity: self.popularity,
            vote_average: self.vote_average,
            genre_ids: self.genre_ids,
            original_language: self.original_language.filter(|l| !l.is_empty()),
        })
    }
}

impl From<TmdbMovieDetails> for MovieDetails {
    fn from(details: TmdbMovieDetails) -> Self {
        MovieDetails {
            id: details.id,
            title: details.title.or(details.original_title).unwrap_or_default(),
            year: year_from_release_date(details.release_date.as_deref()),
            runtime: details.runtime,
            genres: details.genres,
            overview: details.overview.filter(|o| !o.trim().is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_from_release_date() {
        assert_eq!(year_from_release_date(Some("2010-07-16")), Some(2010));
        assert_eq!(year_from_release_date(Some("")), None);
        assert_eq!(year_from_release_date(Some("n/a-01-01")), None);
        assert_eq!(year_from_release_date(None), None);
    }

    #[test]
    fn test_decade_of() {
        assert_eq!(decade_of(1999), 1990);
        assert_eq!(decade_of(2000), 2000);
    }

    #[test]
    fn test_tmdb_movie_to_candidate() {
        let json = r#"{
            "id": 27205,
            "title": "Inception",
            "release_date": "2010-07-15",
            "popularity": 83.9,
            "vote_average": 8.4,
            "genre_ids": [28, 878, 12],
            "original_language": "en"
        }"#;

        let movie: TmdbMovie = serde_json::from_str(json).unwrap();
        let candidate = movie.into_candidate().unwrap();
        assert_eq!(candidate.id, 27205);
        assert_eq!(candidate.title, "Inception");
        assert_eq!(candidate.year, Some(2010));
        assert_eq!(candidate.genre_ids, vec![28, 878, 12]);
        assert_eq!(candidate.original_language.as_deref(), Some("en"));
    }

    #[test]
    fn test_tmdb_movie_without_title_is_dropped() {
        let movie: TmdbMovie = serde_json::from_str(r#"{"id": 5}"#).unwrap();
        assert!(movie.into_candidate().is_none());
    }

    #[test]
    fn test_tmdb_movie_falls_back_to_original_title() {
        let movie: TmdbMovie =
            serde_json::from_str(r#"{"id": 5, "original_title": "Stalker", "release_date": ""}"#)
                .unwrap();
        let candidate = movie.into_candidate().unwrap();
        assert_eq!(candidate.title, "Stalker");
        assert_eq!(candidate.year, None);
        assert!(candidate.genre_ids.is_empty());
    }

    #[test]
    fn test_details_conversion() {
        let json = r#"{
            "id": 603,
            "title": "The Matrix",
            "release_date": "1999-03-30",
            "runtime": 136,
            "genres": [{"id": 28, "name": "Action"}, {"id": 878, "name": "Science Fiction"}],
            "overview": "A hacker learns the truth."
        }"#;

        let details: MovieDetails = serde_json::from_str::<TmdbMovieDetails>(json).unwrap().into();
        assert_eq!(details.year, Some(1999));
        assert_eq!(details.decade(), Some(1990));
        assert_eq!(details.genre_ids(), vec![28, 878]);
        assert_eq!(details.runtime, Some(136));
    }

    #[test]
    fn test_dedupe_quality() {
        let candidate = MovieCandidate {
            id: 1,
            title: "A".into(),
            year: None,
            popularity: Some(50.0),
            vote_average: Some(7.0),
            genre_ids: vec![],
            original_language: None,
        };
        assert!((candidate.dedupe_quality() - 7.5).abs() < 1e-6);
    }
}
