use anyhow::{bail, Context, Result};
use bookrec_core::persist::{
    load_artifacts, load_books, load_meta, save_books, save_meta, save_popularity, save_similarity, timestamp_now,
    ArtifactPaths, MetaFile, ARTIFACT_VERSION,
};
use bookrec_core::{BookRecord, CatalogStore, PopularityIndex, RawBook, SimilarityMatrix, SledCatalog};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// A popularity table row: a book plus an optional producer-assigned score.
#[derive(Debug, Deserialize)]
struct RankedRow {
    #[serde(flatten)]
    book: RawBook,
    #[serde(default)]
    score: Option<f64>,
}

#[derive(Parser)]
#[command(name = "importer")]
#[command(about = "Package catalog, popularity and similarity data for the recommendation server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an artifact directory from exported catalog, popularity and similarity data
    Build {
        /// Catalog rows: a JSON/JSONL file or a directory of them
        #[arg(long)]
        catalog: String,
        /// Ranked popularity rows (JSON/JSONL), best first. Ranks the catalog by rater count when omitted
        #[arg(long)]
        popularity: Option<String>,
        /// Similarity matrix as a JSON array of rows, in catalog order
        #[arg(long)]
        similarity: String,
        /// Output artifact directory
        #[arg(long)]
        output: String,
        /// Also seed the sled catalog database in the output directory
        #[arg(long, default_value_t = false)]
        sled: bool,
        /// Accept a matrix whose dimension differs from the catalog size
        #[arg(long, default_value_t = false)]
        allow_mismatch: bool,
    },
    /// Summarize an artifact directory
    Inspect {
        #[arg(long)]
        data: String,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { catalog, popularity, similarity, output, sled, allow_mismatch } => build_artifacts(
            Path::new(&catalog),
            popularity.as_deref().map(Path::new),
            Path::new(&similarity),
            Path::new(&output),
            sled,
            allow_mismatch,
        ),
        Commands::Inspect { data } => inspect(Path::new(&data)),
    }
}

fn build_artifacts(
    catalog: &Path,
    popularity: Option<&Path>,
    similarity: &Path,
    output: &Path,
    seed_sled: bool,
    allow_mismatch: bool,
) -> Result<()> {
    let paths = ArtifactPaths::new(output);
    fs::create_dir_all(&paths.root)?;

    let mut books: Vec<BookRecord> = Vec::new();
    for file in input_files(catalog)? {
        for value in read_rows(&file)? {
            let raw: RawBook = serde_json::from_value(value).with_context(|| format!("catalog row in {}", file.display()))?;
            books.push(raw.into());
        }
    }
    tracing::info!(num_books = books.len(), "read catalog");

    let popularity = match popularity {
        Some(path) => {
            let mut ranked = Vec::new();
            for value in read_rows(path)? {
                let row: RankedRow = serde_json::from_value(value).with_context(|| format!("popularity row in {}", path.display()))?;
                ranked.push((BookRecord::from(row.book), row.score));
            }
            PopularityIndex::from_ranked(ranked)
        }
        None => {
            tracing::info!("no popularity table supplied; ranking catalog by rater count");
            PopularityIndex::by_rater_count(&books)
        }
    };

    let matrix = read_similarity(similarity)?;
    if matrix.dim() != books.len() {
        if !allow_mismatch {
            bail!(
                "similarity matrix dimension {} does not match catalog size {} (pass --allow-mismatch to keep it)",
                matrix.dim(),
                books.len()
            );
        }
        tracing::warn!(matrix_dim = matrix.dim(), num_books = books.len(), "keeping mismatched similarity matrix");
    }

    save_books(&paths, &books)?;
    save_popularity(&paths, &popularity)?;
    save_similarity(&paths, &matrix)?;
    let meta = MetaFile {
        num_books: books.len(),
        popularity_entries: popularity.len(),
        matrix_dim: matrix.dim(),
        created_at: timestamp_now(),
        version: ARTIFACT_VERSION,
    };
    save_meta(&paths, &meta)?;

    if seed_sled {
        let store = SledCatalog::open(paths.catalog_db())?;
        if !store.is_empty()? {
            bail!("{} already holds books; remove it to re-seed", paths.catalog_db().display());
        }
        let written = store.extend(books)?;
        tracing::info!(written, db = %paths.catalog_db().display(), "seeded sled catalog");
    }

    tracing::info!(output = %output.display(), "artifact build complete");
    Ok(())
}

fn input_files(input: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
        files.sort();
    } else if input.is_file() {
        files.push(input.to_path_buf());
    } else {
        bail!("input {} does not exist", input.display());
    }
    Ok(files)
}

/// Rows of a JSONL file, a JSON array, or a single JSON object.
fn read_rows(file: &Path) -> Result<Vec<serde_json::Value>> {
    let f = File::open(file).with_context(|| format!("opening {}", file.display()))?;
    let reader = BufReader::new(f);
    if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
        let mut rows = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() { continue; }
            rows.push(serde_json::from_str(&line)?);
        }
        return Ok(rows);
    }
    let json: serde_json::Value = serde_json::from_reader(reader)?;
    Ok(match json {
        serde_json::Value::Array(arr) => arr,
        obj @ serde_json::Value::Object(_) => vec![obj],
        _ => Vec::new(),
    })
}

/// JSON rows of scores; `null` cells (NaN in the exporter) become NaN.
fn read_similarity(file: &Path) -> Result<SimilarityMatrix> {
    let f = File::open(file).with_context(|| format!("opening {}", file.display()))?;
    let rows: Vec<Vec<Option<f32>>> = serde_json::from_reader(BufReader::new(f))?;
    let rows = rows
        .into_iter()
        .map(|row| row.into_iter().map(|s| s.unwrap_or(f32::NAN)).collect())
        .collect();
    SimilarityMatrix::from_rows(rows)
}

fn inspect(data: &Path) -> Result<()> {
    let paths = ArtifactPaths::new(data);
    let meta = load_meta(&paths)?;
    let books = load_books(&paths)?;
    let (popularity, similarity) = load_artifacts(&paths)?;
    println!("created_at:         {}", meta.created_at);
    println!("version:            {}", meta.version);
    println!("books:              {}", books.len());
    println!("popularity entries: {}", popularity.len());
    println!("matrix dimension:   {}", similarity.dim());
    if similarity.dim() != books.len() {
        println!("warning: similarity matrix does not cover the catalog");
    }
    for entry in popularity.top(3) {
        println!("  #{} {} ({} raters)", entry.rank, entry.book.title, entry.book.rater_count);
    }
    Ok(())
}
