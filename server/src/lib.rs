pub mod request;

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bookrec_core::persist::{load_artifacts, load_books, ArtifactPaths};
use bookrec_core::{BookRecord, CatalogStore, EngineStatus, MemoryCatalog, RecommendError, Recommender, SledCatalog, StoreError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::request::{AddBookRequest, PersonalizedRequest, PopularityParams, SimilarRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StoreKind {
    /// Catalog held in process memory, seeded from `books.bin`
    Memory,
    /// Catalog in `catalog.sled` under the data directory
    Sled,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub store: StoreKind,
    pub store_timeout: Duration,
    /// Map error kinds to HTTP statuses instead of always answering 200.
    pub strict_status: bool,
}

impl ServerConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            store: StoreKind::Memory,
            store_timeout: Duration::from_millis(2000),
            strict_status: false,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Recommender>,
    pub data_dir: PathBuf,
    pub store_timeout: Duration,
    pub strict_status: bool,
}

impl AppState {
    /// Runs an engine call off the async runtime, bounded by the store timeout.
    async fn run<T, F>(&self, op: F) -> Result<T, RecommendError>
    where
        F: FnOnce(&Recommender) -> Result<T, RecommendError> + Send + 'static,
        T: Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        let task = tokio::task::spawn_blocking(move || op(&engine));
        match tokio::time::timeout(self.store_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(StoreError::Unavailable(join_err.to_string()).into()),
            Err(_) => Err(StoreError::Timeout(self.store_timeout).into()),
        }
    }

    fn fail(&self, err: RecommendError) -> Response {
        ApiError { err, strict: self.strict_status }.into_response()
    }
}

fn open_catalog(config: &ServerConfig, paths: &ArtifactPaths) -> Result<Arc<dyn CatalogStore>> {
    match config.store {
        StoreKind::Memory => Ok(Arc::new(MemoryCatalog::from_books(load_books(paths)?))),
        StoreKind::Sled => {
            let store = SledCatalog::open(paths.catalog_db())?;
            if store.is_empty()? && paths.books().exists() {
                let seeded = store.extend(load_books(paths)?)?;
                tracing::info!(seeded, "seeded empty sled catalog from books.bin");
            }
            Ok(Arc::new(store))
        }
    }
}

pub fn build_app(config: ServerConfig) -> Result<Router> {
    // Load catalog and artifacts at startup
    let paths = ArtifactPaths::new(&config.data_dir);
    let catalog = open_catalog(&config, &paths)?;
    let (popularity, similarity) = load_artifacts(&paths)?;
    let engine = Recommender::new(catalog, popularity, similarity);
    let status = engine.status()?;
    tracing::info!(
        num_books = status.num_books,
        popularity_entries = status.popularity_entries,
        matrix_dim = status.matrix_dim,
        store = ?config.store,
        "recommendation engine ready"
    );

    let state = AppState {
        engine: Arc::new(engine),
        data_dir: config.data_dir,
        store_timeout: config.store_timeout,
        strict_status: config.strict_status,
    };
    Ok(router(state))
}

/// Cross-origin policy for the browser frontend. `allowed_origins` is a
/// comma-separated list; absent, blank or wholly unparseable means any origin.
pub fn cors_layer(allowed_origins: Option<&str>) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(origin) => Some(origin),
            Err(_) => {
                tracing::warn!(origin = s, "ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    let allow_origin = if origins.is_empty() { AllowOrigin::any() } else { AllowOrigin::list(origins) };
    CorsLayer::new().allow_origin(allow_origin).allow_methods(Any).allow_headers(Any)
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(std::env::var("CORS_ALLOW_ORIGIN").ok().as_deref());

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/recommend/all_books", get(all_books_handler))
        .route("/recommend/popularity", get(popularity_handler))
        .route("/recommend/personalized", post(personalized_handler))
        .route("/recommend/similar", post(similar_handler))
        .route("/admin/add_book", post(add_book_handler))
        .route("/admin/status", get(status_handler))
        .route("/admin/reload_artifacts", post(reload_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
pub struct AllBooksResponse {
    pub all_books: Vec<BookRecord>,
}

#[derive(Serialize)]
pub struct PopularResponse {
    pub popular_books: Vec<BookRecord>,
}

#[derive(Serialize)]
pub struct RecommendedResponse {
    pub recommended_books: Vec<BookRecord>,
}

#[derive(Serialize)]
pub struct AddBookResponse {
    pub message: String,
    pub book: BookRecord,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Every failure is answered with `{"error": message}`. By default the status
/// is always 200; strict mode maps each kind to its own status.
struct ApiError {
    err: RecommendError,
    strict: bool,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        if !self.strict {
            return StatusCode::OK;
        }
        match self.err {
            RecommendError::EmptyResult(_) => StatusCode::OK,
            RecommendError::NotFound { .. } => StatusCode::NOT_FOUND,
            RecommendError::Validation(_) => StatusCode::BAD_REQUEST,
            RecommendError::Storage(StoreError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            RecommendError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self.err {
            RecommendError::Storage(e) => tracing::error!(error = %e, "storage failure"),
            other => tracing::debug!(error = %other, "request answered with error payload"),
        }
        let status = self.status();
        (status, Json(ErrorBody { error: self.err.to_string() })).into_response()
    }
}

pub async fn all_books_handler(State(state): State<AppState>) -> Response {
    match state.run(|engine| engine.all_books()).await {
        Ok(all_books) => Json(AllBooksResponse { all_books }).into_response(),
        Err(err) => state.fail(err),
    }
}

pub async fn popularity_handler(
    State(state): State<AppState>,
    params: Result<Query<PopularityParams>, QueryRejection>,
) -> Response {
    let limit = match params {
        Ok(Query(p)) => p.limit(),
        Err(rejection) => return state.fail(RecommendError::validation(rejection.body_text())),
    };
    match state.run(move |engine| Ok(engine.top_popular(limit))).await {
        Ok(popular_books) => Json(PopularResponse { popular_books }).into_response(),
        Err(err) => state.fail(err),
    }
}

pub async fn personalized_handler(
    State(state): State<AppState>,
    body: Result<Json<PersonalizedRequest>, JsonRejection>,
) -> Response {
    let prefs = match body.map_err(rejected).and_then(|Json(req)| req.into_preferences()) {
        Ok(prefs) => prefs,
        Err(err) => return state.fail(err),
    };
    match state.run(move |engine| engine.filter_by_preferences(&prefs)).await {
        Ok(recommended_books) => Json(RecommendedResponse { recommended_books }).into_response(),
        Err(err) => state.fail(err),
    }
}

pub async fn similar_handler(
    State(state): State<AppState>,
    body: Result<Json<SimilarRequest>, JsonRejection>,
) -> Response {
    let (title, k) = match body.map_err(rejected).and_then(|Json(req)| req.validate()) {
        Ok(v) => v,
        Err(err) => return state.fail(err),
    };
    match state.run(move |engine| engine.similar_to(&title, k)).await {
        Ok(recommended_books) => Json(RecommendedResponse { recommended_books }).into_response(),
        Err(err) => state.fail(err),
    }
}

pub async fn add_book_handler(
    State(state): State<AppState>,
    body: Result<Json<AddBookRequest>, JsonRejection>,
) -> Response {
    let record = match body.map_err(rejected).and_then(|Json(req)| req.into_record()) {
        Ok(record) => record,
        Err(err) => return state.fail(err),
    };
    match state.run(move |engine| engine.add_book(record)).await {
        Ok(book) => Json(AddBookResponse {
            message: "Book added successfully; popularity and similarity artifacts are stale until reloaded".into(),
            book,
        })
        .into_response(),
        Err(err) => state.fail(err),
    }
}

pub async fn status_handler(State(state): State<AppState>) -> Response {
    match state.run(|engine| engine.status()).await {
        Ok(status) => Json::<EngineStatus>(status).into_response(),
        Err(err) => state.fail(err),
    }
}

/// Reloads popularity and similarity from the data directory after they were
/// rebuilt externally.
pub async fn reload_handler(State(state): State<AppState>) -> Response {
    let data_dir = state.data_dir.clone();
    let result = state
        .run(move |engine| {
            let (popularity, similarity) = load_artifacts(&ArtifactPaths::new(&data_dir))
                .map_err(|e| StoreError::Artifact(format!("{e:#}")))?;
            engine.replace_artifacts(popularity, similarity)
        })
        .await;
    match result {
        Ok(status) => Json(status).into_response(),
        Err(err) => state.fail(err),
    }
}

fn rejected(rejection: JsonRejection) -> RecommendError {
    RecommendError::validation(rejection.body_text())
}
