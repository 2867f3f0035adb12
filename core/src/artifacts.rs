use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::book::BookRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopularityEntry {
    /// 1-based position in the ranking.
    pub rank: u32,
    /// Externally supplied composite score, when the ranking came with one.
    pub score: Option<f64>,
    pub book: BookRecord,
}

/// A precomputed ranking of books, best first. Order is whatever the
/// producer supplied; nothing here re-ranks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopularityIndex {
    entries: Vec<PopularityEntry>,
}

impl PopularityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the supplied order and numbers it from 1.
    pub fn from_ranked<I>(ranked: I) -> Self
    where
        I: IntoIterator<Item = (BookRecord, Option<f64>)>,
    {
        let entries = ranked
            .into_iter()
            .enumerate()
            .map(|(i, (book, score))| PopularityEntry { rank: i as u32 + 1, score, book })
            .collect();
        Self { entries }
    }

    /// Ranks a catalog by rater count, descending. Equal counts keep catalog order.
    pub fn by_rater_count(catalog: &[BookRecord]) -> Self {
        let mut books = catalog.to_vec();
        books.sort_by(|a, b| b.rater_count.cmp(&a.rater_count));
        Self::from_ranked(books.into_iter().map(|b| (b, None)))
    }

    pub fn entries(&self) -> &[PopularityEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn top(&self, limit: usize) -> &[PopularityEntry] {
        &self.entries[..limit.min(self.entries.len())]
    }
}

/// Dense N×N similarity scores over catalog rows, stored row-major.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatrix {
    dim: usize,
    scores: Vec<f32>,
}

impl SimilarityMatrix {
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dim = rows.len();
        let mut scores = Vec::with_capacity(dim * dim);
        for (i, row) in rows.into_iter().enumerate() {
            ensure!(row.len() == dim, "similarity matrix is not square: row {i} has {} columns, expected {dim}", row.len());
            scores.extend(row);
        }
        Ok(Self { dim, scores })
    }

    /// Checks the shape invariant; used after deserializing.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.scores.len() == self.dim * self.dim,
            "similarity matrix holds {} scores, expected {} for dimension {}",
            self.scores.len(),
            self.dim * self.dim,
            self.dim
        );
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.dim {
            return None;
        }
        let start = index * self.dim;
        self.scores.get(start..start + self.dim)
    }

    pub fn score(&self, row: usize, column: usize) -> Option<f32> {
        self.row(row).and_then(|r| r.get(column).copied())
    }

    /// Columns of row `index` paired with their scores, best first, without
    /// column `index` itself. Ties keep column order; NaN ranks last.
    /// `None` when the row does not exist.
    pub fn ranked_neighbors(&self, index: usize) -> Option<Vec<(usize, f32)>> {
        let row = self.row(index)?;
        let mut pairs: Vec<(usize, f32)> = row
            .iter()
            .enumerate()
            .map(|(j, &s)| (j, if s.is_nan() { f32::NEG_INFINITY } else { s }))
            .collect();
        pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        pairs.retain(|&(j, _)| j != index);
        Some(pairs)
    }
}
