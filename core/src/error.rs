use std::time::Duration;

use thiserror::Error;

/// Failures of a catalog collaborator or of the artifacts derived from it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("catalog database error: {0}")]
    Backend(#[from] sled::Error),

    #[error("catalog row could not be encoded: {0}")]
    Codec(#[from] bincode::Error),

    #[error("catalog store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("catalog store unavailable: {0}")]
    Unavailable(String),

    #[error("could not load artifacts: {0}")]
    Artifact(String),

    /// A catalog row has no counterpart in the similarity matrix, typically
    /// because books were added after the matrix was built.
    #[error("similarity matrix has no row {row} (dimension {dim}); artifacts need a rebuild")]
    MissingSimilarityRow { row: usize, dim: usize },
}

/// Outcome kinds surfaced by the recommendation engine.
#[derive(Debug, Error)]
pub enum RecommendError {
    /// Nothing matched. A normal outcome, rendered to callers as a message.
    #[error("{0}")]
    EmptyResult(String),

    #[error("Book '{title}' not found")]
    NotFound { title: String },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("invalid request: {0}")]
    Validation(String),
}

impl RecommendError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
