//! The recommendation engine: preference filtering, popularity lookup and
//! similar-book lookup over an injected catalog and precomputed artifacts.
//!
//! Reads work on snapshots. A request holds the catalog rows and the artifact
//! pair it started with even if a book is appended or the artifacts are
//! reloaded while it runs.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::artifacts::{PopularityIndex, SimilarityMatrix};
use crate::book::{or_sentinel, BookRecord, UNKNOWN};
use crate::error::{RecommendError, StoreError};
use crate::normalize::{clean_text, normalize};
use crate::store::CatalogStore;

pub const DEFAULT_POPULAR_LIMIT: usize = 10;
pub const DEFAULT_SIMILAR_K: usize = 5;
pub const NO_PREFERENCE_MATCH: &str = "No books found matching your preferences";

/// Filter criteria for [`Recommender::filter_by_preferences`].
#[derive(Debug, Clone, Default)]
pub struct Preferences {
    /// Matched exactly after normalization.
    pub genre: String,
    /// Matched as a substring after normalization; blank means no filter.
    pub author: Option<String>,
    /// Inclusive lower bound on average rating; zero or absent means no filter.
    pub min_rating: Option<f64>,
}

impl Preferences {
    pub fn genre(genre: impl Into<String>) -> Self {
        Self { genre: genre.into(), ..Self::default() }
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn min_rating(mut self, min_rating: f64) -> Self {
        self.min_rating = Some(min_rating);
        self
    }

    fn validate(&self) -> Result<(), RecommendError> {
        if self.genre.trim().is_empty() {
            return Err(RecommendError::validation("genre must not be empty"));
        }
        if let Some(r) = self.min_rating {
            if !r.is_finite() || r < 0.0 {
                return Err(RecommendError::validation(format!("min_rating must be a number >= 0, got {r}")));
            }
        }
        Ok(())
    }
}

/// Rows of `books` matching `prefs`, in catalog order, sentinels applied.
/// Blank stored fields compare as their sentinel.
pub fn filter_books(books: &[BookRecord], prefs: &Preferences) -> Vec<BookRecord> {
    let genre = normalize(&prefs.genre);
    let author = prefs.author.as_deref().map(normalize).filter(|a| !a.is_empty());
    let min_rating = prefs.min_rating.filter(|r| *r > 0.0);

    books
        .iter()
        .filter(|b| normalize(or_sentinel(&b.genre, UNKNOWN)) == genre)
        .filter(|b| author.as_deref().map_or(true, |a| normalize(or_sentinel(&b.author, UNKNOWN)).contains(a)))
        // NaN ratings fail every bound, like their 0.0 sentinel
        .filter(|b| min_rating.map_or(true, |r| b.average_rating >= r))
        .cloned()
        .map(BookRecord::sanitized)
        .collect()
}

/// Row of the first book titled `title`. Exact match wins; otherwise titles
/// are compared after compatibility folding, which keeps case.
fn find_title(books: &[BookRecord], title: &str) -> Option<usize> {
    books.iter().position(|b| b.title == title).or_else(|| {
        let folded = clean_text(title);
        books.iter().position(|b| clean_text(&b.title) == folded)
    })
}

/// Derived artifacts served together; swapped as a unit on reload.
#[derive(Debug, Default)]
pub struct Artifacts {
    pub popularity: PopularityIndex,
    pub similarity: SimilarityMatrix,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub num_books: usize,
    pub popularity_entries: usize,
    pub matrix_dim: usize,
    pub artifacts_stale: bool,
}

pub struct Recommender {
    catalog: Arc<dyn CatalogStore>,
    artifacts: RwLock<Arc<Artifacts>>,
    stale: AtomicBool,
}

impl Recommender {
    pub fn new(catalog: Arc<dyn CatalogStore>, popularity: PopularityIndex, similarity: SimilarityMatrix) -> Self {
        let recommender = Self {
            catalog,
            artifacts: RwLock::new(Arc::new(Artifacts { popularity, similarity })),
            stale: AtomicBool::new(false),
        };
        recommender.check_consistency();
        recommender
    }

    fn artifacts(&self) -> Arc<Artifacts> {
        self.artifacts.read().clone()
    }

    /// Flags the artifacts stale when the matrix cannot cover the catalog.
    fn check_consistency(&self) {
        match self.catalog.len() {
            Ok(num_books) => {
                let dim = self.artifacts().similarity.dim();
                if dim != num_books {
                    tracing::warn!(num_books, matrix_dim = dim, "similarity matrix does not match catalog size");
                    self.stale.store(true, Ordering::SeqCst);
                }
            }
            Err(err) => tracing::warn!(error = %err, "could not size catalog"),
        }
    }

    /// Whether the catalog changed since the artifacts were built.
    pub fn artifacts_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    pub fn all_books(&self) -> Result<Vec<BookRecord>, RecommendError> {
        let books = self.catalog.scan()?;
        Ok(books.iter().cloned().map(BookRecord::sanitized).collect())
    }

    pub fn filter_by_preferences(&self, prefs: &Preferences) -> Result<Vec<BookRecord>, RecommendError> {
        prefs.validate()?;
        let books = self.catalog.scan()?;
        let matched = filter_books(&books, prefs);
        tracing::debug!(genre = %prefs.genre, scanned = books.len(), matched = matched.len(), "filtered catalog");
        if matched.is_empty() {
            return Err(RecommendError::EmptyResult(NO_PREFERENCE_MATCH.to_string()));
        }
        Ok(matched)
    }

    /// The first `limit` entries of the popularity index, as ranked.
    pub fn top_popular(&self, limit: usize) -> Vec<BookRecord> {
        self.artifacts()
            .popularity
            .top(limit)
            .iter()
            .map(|entry| entry.book.clone().sanitized())
            .collect()
    }

    /// Up to `k` books most similar to the first catalog row titled `title`
    /// (case-sensitive, compatibility forms folded), best first, never the
    /// book itself.
    pub fn similar_to(&self, title: &str, k: usize) -> Result<Vec<BookRecord>, RecommendError> {
        let books = self.catalog.scan()?;
        let index = find_title(&books, title)
            .ok_or_else(|| RecommendError::NotFound { title: title.to_string() })?;

        let artifacts = self.artifacts();
        let ranked = artifacts
            .similarity
            .ranked_neighbors(index)
            .ok_or(StoreError::MissingSimilarityRow { row: index, dim: artifacts.similarity.dim() })?;

        let similar: Vec<BookRecord> = ranked
            .into_iter()
            .filter_map(|(column, _)| books.get(column))
            .take(k)
            .cloned()
            .map(BookRecord::sanitized)
            .collect();
        tracing::debug!(title, index, returned = similar.len(), "resolved similar books");

        if similar.is_empty() && k > 0 {
            return Err(RecommendError::EmptyResult(format!("No similar books found for '{title}'")));
        }
        Ok(similar)
    }

    /// Appends to the catalog. Popularity and similarity are not rebuilt; the
    /// engine reports them stale until [`Recommender::replace_artifacts`].
    pub fn add_book(&self, book: BookRecord) -> Result<BookRecord, RecommendError> {
        let stored = self.catalog.append(book)?;
        self.stale.store(true, Ordering::SeqCst);
        tracing::warn!(id = stored.id, title = %stored.title, "catalog changed; popularity and similarity artifacts are stale until reloaded");
        Ok(stored)
    }

    /// Installs freshly built artifacts. Requests already running keep the
    /// previous pair.
    pub fn replace_artifacts(
        &self,
        popularity: PopularityIndex,
        similarity: SimilarityMatrix,
    ) -> Result<EngineStatus, RecommendError> {
        *self.artifacts.write() = Arc::new(Artifacts { popularity, similarity });
        self.stale.store(false, Ordering::SeqCst);
        self.check_consistency();
        let status = self.status()?;
        tracing::info!(
            popularity_entries = status.popularity_entries,
            matrix_dim = status.matrix_dim,
            stale = status.artifacts_stale,
            "artifacts replaced"
        );
        Ok(status)
    }

    pub fn status(&self) -> Result<EngineStatus, RecommendError> {
        let artifacts = self.artifacts();
        Ok(EngineStatus {
            num_books: self.catalog.len()?,
            popularity_entries: artifacts.popularity.len(),
            matrix_dim: artifacts.similarity.dim(),
            artifacts_stale: self.artifacts_stale(),
        })
    }
}
