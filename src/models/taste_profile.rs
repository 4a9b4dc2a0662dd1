use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

pub const PROFILE_VERSION: u32 = 1;

/// Minimum confidence for a pattern to take part in scoring
pub const MIN_ACTIVE_CONFIDENCE: f32 = 0.6;

/// Longest accepted cooldown, about a century
pub const MAX_COOLDOWN_DAYS: i64 = 36_500;

fn default_version() -> u32 {
    PROFILE_VERSION
}

fn default_cooldown_days() -> i64 {
    14
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenreWeight {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    /// Rated films that carried this genre
    #[serde(default)]
    pub count: u32,
    /// Share of all genre occurrences on this side, 0..1
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecadeWeight {
    pub decade: i32,
    #[serde(default)]
    pub count: u32,
    pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TasteSide {
    #[serde(default)]
    pub genres: Vec<GenreWeight>,
    #[serde(default)]
    pub decades: Vec<DecadeWeight>,
}

/// Version tag of a stored profile; older rows carry a string such as `"v0"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProfileVersion {
    Number(u32),
    Tag(String),
}

impl Default for ProfileVersion {
    fn default() -> Self {
        ProfileVersion::Number(PROFILE_VERSION)
    }
}

/// Precomputed genre/decade preferences, stored as versioned JSON
///
/// Readers ignore fields they do not know, so later versions can add data
/// without breaking older deployments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TasteWeights {
    #[serde(default)]
    pub version: ProfileVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub likes: TasteSide,
    #[serde(default)]
    pub dislikes: TasteSide,
}

/// A user-declared topic to steer away from, without hard-excluding it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvoidancePattern {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Negative for an avoidance; the penalty applied is `-weight`
    pub weight: f32,
    pub confidence: f32,
    #[serde(default = "default_cooldown_days")]
    pub cooldown_days: i64,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
}

impl AvoidancePattern {
    /// Whether this pattern may contribute a penalty at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.id.trim().is_empty() {
            return false;
        }
        if self.confidence < MIN_ACTIVE_CONFIDENCE || self.weight >= 0.0 {
            return false;
        }
        match self.last_triggered {
            // A cooldown too long to represent never ends
            Some(last) => Duration::try_days(self.cooldown_days)
                .is_some_and(|cooldown| now - last >= cooldown),
            None => true,
        }
    }

    /// Case-insensitive substring match of any keyword; `text` must already be lowercase
    pub fn matches(&self, lowercase_text: &str) -> bool {
        self.keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .any(|k| !k.is_empty() && lowercase_text.contains(&k))
    }

    fn validate(&self) -> AppResult<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Avoidance pattern id cannot be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(AppError::InvalidInput(format!(
                "Avoidance pattern '{}' confidence must be within [0, 1]",
                self.id
            )));
        }
        if !(0..=MAX_COOLDOWN_DAYS).contains(&self.cooldown_days) {
            return Err(AppError::InvalidInput(format!(
                "Avoidance pattern '{}' cooldown must be within [0, {}] days",
                self.id, MAX_COOLDOWN_DAYS
            )));
        }
        if self.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(AppError::InvalidInput(format!(
                "Avoidance pattern '{}' needs at least one keyword",
                self.id
            )));
        }
        Ok(())
    }
}

/// The user's avoidance patterns, stored as versioned JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvoidanceProfile {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub patterns: Vec<AvoidancePattern>,
}

impl Default for AvoidanceProfile {
    fn default() -> Self {
        Self {
            version: PROFILE_VERSION,
            patterns: Vec::new(),
        }
    }
}

impl AvoidanceProfile {
    pub fn validate(&self) -> AppResult<()> {
        let mut seen = std::collections::HashSet::new();
        for pattern in &self.patterns {
            pattern.validate()?;
            if !seen.insert(pattern.id.as_str()) {
                return Err(AppError::InvalidInput(format!(
                    "Duplicate avoidance pattern id '{}'",
                    pattern.id
                )));
            }
        }
        Ok(())
    }

    /// Stamps `last_triggered` on every pattern whose id is in `ids`; returns how many changed
    pub fn mark_triggered<'a>(
        &mut self,
        ids: impl IntoIterator<Item = &'a str>,
        now: DateTime<Utc>,
    ) -> usize {
        let ids: std::collections::HashSet<&str> = ids.into_iter().collect();
        let mut changed = 0;
        for pattern in self.patterns.iter_mut() {
            if ids.contains(pattern.id.as_str()) {
                pattern.last_triggered = Some(now);
                changed += 1;
            }
        }
        changed
    }
}
