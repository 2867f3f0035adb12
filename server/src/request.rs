//! Request bodies, validated before anything reaches the engine.

use bookrec_core::engine::{DEFAULT_POPULAR_LIMIT, DEFAULT_SIMILAR_K};
use bookrec_core::{BookId, BookRecord, Preferences, RecommendError};
use serde::Deserialize;

pub const MAX_SIMILAR_K: usize = 50;
pub const MAX_POPULAR_LIMIT: usize = 100;

/// A rating sent either as a JSON number or as a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RatingInput {
    Number(f64),
    Text(String),
}

impl RatingInput {
    fn value(&self) -> Result<f64, RecommendError> {
        let value = match self {
            RatingInput::Number(n) => *n,
            RatingInput::Text(s) if s.trim().is_empty() => 0.0,
            RatingInput::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| RecommendError::validation(format!("min_rating must be numeric, got '{s}'")))?,
        };
        if !value.is_finite() || value < 0.0 {
            return Err(RecommendError::validation(format!("min_rating must be a number >= 0, got {value}")));
        }
        Ok(value)
    }
}

#[derive(Debug, Deserialize)]
pub struct PersonalizedRequest {
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub min_rating: Option<RatingInput>,
}

impl PersonalizedRequest {
    pub fn into_preferences(self) -> Result<Preferences, RecommendError> {
        let genre = self
            .genre
            .filter(|g| !g.trim().is_empty())
            .ok_or_else(|| RecommendError::validation("genre is required"))?;
        let min_rating = self.min_rating.as_ref().map(RatingInput::value).transpose()?;
        Ok(Preferences { genre, author: self.author, min_rating })
    }
}

#[derive(Debug, Deserialize)]
pub struct SimilarRequest {
    pub book_title: String,
    #[serde(default)]
    pub k: Option<usize>,
}

impl SimilarRequest {
    pub fn validate(self) -> Result<(String, usize), RecommendError> {
        if self.book_title.trim().is_empty() {
            return Err(RecommendError::validation("book_title is required"));
        }
        let k = self.k.unwrap_or(DEFAULT_SIMILAR_K).clamp(1, MAX_SIMILAR_K);
        Ok((self.book_title, k))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PopularityParams {
    pub limit: Option<usize>,
}

impl PopularityParams {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_POPULAR_LIMIT).clamp(1, MAX_POPULAR_LIMIT)
    }
}

/// A complete book for `/admin/add_book`. Presentation fields may be omitted
/// and fall back to their sentinels; everything else is required.
#[derive(Debug, Deserialize)]
pub struct AddBookRequest {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub genre: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(alias = "averageRating")]
    pub average_rating: f64,
    #[serde(alias = "raterCount")]
    pub rater_count: u64,
    #[serde(default, alias = "coverImagePath")]
    pub cover_image_path: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

impl AddBookRequest {
    pub fn into_record(self) -> Result<BookRecord, RecommendError> {
        for (field, value) in [("title", &self.title), ("author", &self.author), ("genre", &self.genre)] {
            if value.trim().is_empty() {
                return Err(RecommendError::validation(format!("{field} must not be empty")));
            }
        }
        if !self.average_rating.is_finite() || !(0.0..=5.0).contains(&self.average_rating) {
            return Err(RecommendError::validation(format!(
                "average_rating must be between 0 and 5, got {}",
                self.average_rating
            )));
        }
        // Stored as submitted apart from trimming; matching folds on read.
        Ok(BookRecord {
            id: self.id,
            title: self.title.trim().to_string(),
            author: self.author.trim().to_string(),
            genre: self.genre.trim().to_string(),
            language: self.language.unwrap_or_default().trim().to_string(),
            average_rating: self.average_rating,
            rater_count: self.rater_count,
            cover_image_path: self.cover_image_path.unwrap_or_default().trim().to_string(),
            link: self.link.unwrap_or_default().trim().to_string(),
        }
        .sanitized())
    }
}
