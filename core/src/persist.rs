use crate::artifacts::{PopularityIndex, SimilarityMatrix};
use crate::book::BookRecord;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_books: usize,
    pub popularity_entries: usize,
    pub matrix_dim: usize,
    pub created_at: String,
    pub version: u32,
}

/// Layout of an artifact directory as written by the importer.
pub struct ArtifactPaths {
    pub root: PathBuf,
}

impl ArtifactPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn books(&self) -> PathBuf { self.root.join("books.bin") }
    pub fn popularity(&self) -> PathBuf { self.root.join("popular.bin") }
    pub fn similarity(&self) -> PathBuf { self.root.join("similarity.bin") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
    pub fn catalog_db(&self) -> PathBuf { self.root.join("catalog.sled") }
}

fn write_bincode<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let bytes = bincode::serialize(value)?;
    f.write_all(&bytes)?;
    Ok(())
}

fn read_bincode<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let mut f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    let value = bincode::deserialize(&buf).with_context(|| format!("decoding {}", path.display()))?;
    Ok(value)
}

pub fn save_books(paths: &ArtifactPaths, books: &[BookRecord]) -> Result<()> {
    create_dir_all(&paths.root)?;
    write_bincode(&paths.books(), books)
}

pub fn load_books(paths: &ArtifactPaths) -> Result<Vec<BookRecord>> {
    read_bincode(&paths.books())
}

pub fn save_popularity(paths: &ArtifactPaths, index: &PopularityIndex) -> Result<()> {
    create_dir_all(&paths.root)?;
    write_bincode(&paths.popularity(), index)
}

pub fn load_popularity(paths: &ArtifactPaths) -> Result<PopularityIndex> {
    read_bincode(&paths.popularity())
}

pub fn save_similarity(paths: &ArtifactPaths, matrix: &SimilarityMatrix) -> Result<()> {
    create_dir_all(&paths.root)?;
    write_bincode(&paths.similarity(), matrix)
}

pub fn load_similarity(paths: &ArtifactPaths) -> Result<SimilarityMatrix> {
    let matrix: SimilarityMatrix = read_bincode(&paths.similarity())?;
    matrix.validate()?;
    Ok(matrix)
}

pub fn save_meta(paths: &ArtifactPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.meta())?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(paths: &ArtifactPaths) -> Result<MetaFile> {
    let mut f = File::open(paths.meta())?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: MetaFile = serde_json::from_str(&buf)?;
    Ok(meta)
}

/// Load the derived artifacts the engine serves from: popularity and similarity.
pub fn load_artifacts(paths: &ArtifactPaths) -> Result<(PopularityIndex, SimilarityMatrix)> {
    let popularity = load_popularity(paths)?;
    let similarity = load_similarity(paths)?;
    Ok((popularity, similarity))
}

/// Current time as RFC 3339, for `MetaFile::created_at`.
pub fn timestamp_now() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
