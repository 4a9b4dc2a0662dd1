use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

use super::UserId;

/// What a piece of embedded text describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// A user's rating and review of a watched film, keyed by watched-item id
    Review,
    /// TMDB metadata of a film, keyed by movie id
    FilmMeta,
    /// The user's taste-profile summary, keyed by user id
    Profile,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Review => "review",
            SourceType::FilmMeta => "film_meta",
            SourceType::Profile => "profile",
        }
    }
}

impl Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "review" => Ok(SourceType::Review),
            "film_meta" => Ok(SourceType::FilmMeta),
            "profile" => Ok(SourceType::Profile),
            other => Err(format!("unknown source type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Producer-side request to embed a piece of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEmbeddingJob {
    pub user_id: UserId,
    pub source_type: SourceType,
    pub source_id: i64,
    pub content_text: String,
    pub model: String,
    pub dimensions: i32,
}

/// A queued embedding job as stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingJob {
    pub id: i64,
    pub user_id: UserId,
    pub source_type: SourceType,
    pub source_id: i64,
    pub content_text: String,
    pub model: String,
    pub dimensions: i32,
    pub status: JobStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
}

/// Persisted vector for one (user, source type, source id)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextEmbedding {
    pub id: i64,
    pub user_id: UserId,
    pub source_type: SourceType,
    pub source_id: i64,
    pub content_text: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}
