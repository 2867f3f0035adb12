use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bookrec_core::persist::{save_books, save_popularity, save_similarity, ArtifactPaths};
use bookrec_core::{
    BookRecord, CatalogSnapshot, CatalogStore, PopularityIndex, Recommender, SimilarityMatrix, StoreError,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use server::{build_app, router, AppState, ServerConfig, StoreKind};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tower::ServiceExt;

fn book(id: i64, title: &str, author: &str, genre: &str, rating: f64, raters: u64) -> BookRecord {
    BookRecord {
        id,
        title: title.into(),
        author: author.into(),
        genre: genre.into(),
        language: "English".into(),
        average_rating: rating,
        rater_count: raters,
        cover_image_path: "placeholder.svg".into(),
        link: "#".into(),
    }
}

fn write_artifacts(dir: &Path) {
    let paths = ArtifactPaths::new(dir);
    let books = vec![
        book(1, "A", "Ann Writer", "fiction", 4.5, 10),
        book(2, "B", "Bob Writer", "fiction", 3.0, 30),
        book(3, "C", "Ann Writer", "History", 4.0, 20),
    ];
    save_books(&paths, &books).unwrap();
    save_popularity(&paths, &PopularityIndex::by_rater_count(&books)).unwrap();
    let matrix = SimilarityMatrix::from_rows(vec![
        vec![1.0, 0.3, 0.6],
        vec![0.3, 1.0, 0.1],
        vec![0.6, 0.1, 1.0],
    ])
    .unwrap();
    save_similarity(&paths, &matrix).unwrap();
}

fn app(dir: &Path, store: StoreKind, strict_status: bool) -> Router {
    let mut config = ServerConfig::new(dir);
    config.store = store;
    config.strict_status = strict_status;
    build_app(config).unwrap()
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::get(uri).body(Body::empty()).unwrap();
    send(app, req).await
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

fn titles(value: &Value) -> Vec<String> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["title"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn lists_all_books_with_camel_case_fields() {
    let dir = tempdir().unwrap();
    write_artifacts(dir.path());
    let app = app(dir.path(), StoreKind::Memory, false);

    let (status, json) = get(&app, "/recommend/all_books").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(titles(&json["all_books"]), vec!["A", "B", "C"]);
    assert_eq!(json["all_books"][0]["averageRating"], json!(4.5));
    assert_eq!(json["all_books"][0]["coverImagePath"], json!("placeholder.svg"));
}

#[tokio::test]
async fn popularity_is_ranked_and_limited() {
    let dir = tempdir().unwrap();
    write_artifacts(dir.path());
    let app = app(dir.path(), StoreKind::Memory, false);

    let (_, json) = get(&app, "/recommend/popularity").await;
    assert_eq!(titles(&json["popular_books"]), vec!["B", "C", "A"]);
    let (_, json) = get(&app, "/recommend/popularity?limit=1").await;
    assert_eq!(titles(&json["popular_books"]), vec!["B"]);
}

#[tokio::test]
async fn personalized_filters_and_reports_empty_results_as_payload() {
    let dir = tempdir().unwrap();
    write_artifacts(dir.path());
    let app = app(dir.path(), StoreKind::Memory, false);

    let (status, json) = post(&app, "/recommend/personalized", json!({"genre": "Fiction", "min_rating": "4"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(titles(&json["recommended_books"]), vec!["A"]);

    let (status, json) = post(&app, "/recommend/personalized", json!({"genre": "poetry"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["error"], json!("No books found matching your preferences"));

    let (status, json) = post(&app, "/recommend/personalized", json!({"genre": "fiction", "min_rating": "lots"})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["error"].as_str().unwrap().contains("min_rating"));
}

#[tokio::test]
async fn similar_returns_neighbors_or_not_found() {
    let dir = tempdir().unwrap();
    write_artifacts(dir.path());
    let app = app(dir.path(), StoreKind::Memory, false);

    let (_, json) = post(&app, "/recommend/similar", json!({"book_title": "A"})).await;
    assert_eq!(titles(&json["recommended_books"]), vec!["C", "B"]);

    let (status, json) = post(&app, "/recommend/similar", json!({"book_title": "Missing"})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["error"].as_str().unwrap().contains("Missing"));
}

#[tokio::test]
async fn strict_mode_maps_error_kinds_to_statuses() {
    let dir = tempdir().unwrap();
    write_artifacts(dir.path());
    let app = app(dir.path(), StoreKind::Memory, true);

    let (status, _) = post(&app, "/recommend/similar", json!({"book_title": "Missing"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, json) = post(&app, "/recommend/personalized", json!({"author": "Ann"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("genre"));
    let (status, _) = post(&app, "/recommend/personalized", json!({"genre": "poetry"})).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn malformed_body_is_a_validation_error_payload() {
    let dir = tempdir().unwrap();
    write_artifacts(dir.path());
    let app = app(dir.path(), StoreKind::Memory, false);

    let req = Request::post("/recommend/similar")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, json) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["error"].as_str().unwrap().starts_with("invalid request"));
}

#[tokio::test]
async fn add_book_then_reload_artifacts() {
    let dir = tempdir().unwrap();
    write_artifacts(dir.path());
    let app = app(dir.path(), StoreKind::Sled, false);

    let new_book = json!({
        "id": 4, "title": "D", "author": "Dee Writer", "genre": "fiction",
        "average_rating": 4.8, "rater_count": 5
    });
    let (status, json) = post(&app, "/admin/add_book", new_book).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["book"]["title"], json!("D"));
    assert_eq!(json["book"]["link"], json!("#"));
    assert!(json["message"].as_str().unwrap().contains("stale"));

    let (_, json) = post(&app, "/recommend/personalized", json!({"genre": "fiction", "author": "dee"})).await;
    assert_eq!(titles(&json["recommended_books"]), vec!["D"]);

    let (_, status) = get(&app, "/admin/status").await;
    assert_eq!(status["num_books"], json!(4));
    assert_eq!(status["artifacts_stale"], json!(true));

    // The externally rebuilt artifacts now cover the new book.
    let paths = ArtifactPaths::new(dir.path());
    let mut rows = vec![vec![0.0f32; 4]; 4];
    for (i, row) in rows.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    rows[3][1] = 0.9;
    save_similarity(&paths, &SimilarityMatrix::from_rows(rows).unwrap()).unwrap();

    let (_, status) = post(&app, "/admin/reload_artifacts", json!({})).await;
    assert_eq!(status["matrix_dim"], json!(4));
    assert_eq!(status["artifacts_stale"], json!(false));

    let (_, json) = post(&app, "/recommend/similar", json!({"book_title": "D", "k": 1})).await;
    assert_eq!(titles(&json["recommended_books"]), vec!["B"]);
}

#[tokio::test]
async fn added_book_with_compatibility_forms_is_found_by_folded_queries() {
    let dir = tempdir().unwrap();
    write_artifacts(dir.path());
    let app = app(dir.path(), StoreKind::Memory, false);

    let new_book = json!({
        "id": 4, "title": "Ｄune", "author": "ﬁnn", "genre": "ﬁction",
        "average_rating": 4.0, "rater_count": 1
    });
    let (_, json) = post(&app, "/admin/add_book", new_book).await;
    assert_eq!(json["book"]["title"], json!("Ｄune"));

    let (_, json) = post(&app, "/recommend/personalized", json!({"genre": "ﬁction", "author": "ﬁnn"})).await;
    assert_eq!(titles(&json["recommended_books"]), vec!["Ｄune"]);
    let (_, json) = post(&app, "/recommend/personalized", json!({"genre": "fiction", "author": "finn"})).await;
    assert_eq!(titles(&json["recommended_books"]), vec!["Ｄune"]);

    // Found, but the loaded matrix has no row for it until artifacts are rebuilt.
    let (_, json) = post(&app, "/recommend/similar", json!({"book_title": "Ｄune"})).await;
    let error = json["error"].as_str().unwrap();
    assert!(!error.contains("not found"), "{error}");
    assert!(error.contains("no row 3"), "{error}");
}

/// Answers `len` at once but takes far longer than any store timeout to scan.
struct SlowCatalog;

impl CatalogStore for SlowCatalog {
    fn scan(&self) -> Result<CatalogSnapshot, StoreError> {
        std::thread::sleep(Duration::from_millis(200));
        Ok(Arc::new(Vec::new()))
    }

    fn append(&self, book: BookRecord) -> Result<BookRecord, StoreError> {
        Ok(book)
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}

struct UnavailableCatalog;

impl CatalogStore for UnavailableCatalog {
    fn scan(&self) -> Result<CatalogSnapshot, StoreError> {
        Err(StoreError::Unavailable("disk detached".into()))
    }

    fn append(&self, _book: BookRecord) -> Result<BookRecord, StoreError> {
        Err(StoreError::Unavailable("disk detached".into()))
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}

fn app_over(catalog: Arc<dyn CatalogStore>, store_timeout: Duration, strict_status: bool) -> Router {
    let engine = Recommender::new(catalog, PopularityIndex::default(), SimilarityMatrix::default());
    router(AppState {
        engine: Arc::new(engine),
        data_dir: std::env::temp_dir(),
        store_timeout,
        strict_status,
    })
}

#[tokio::test]
async fn slow_store_times_out_with_error_payload() {
    let app = app_over(Arc::new(SlowCatalog), Duration::from_millis(1), false);
    let (status, json) = get(&app, "/recommend/all_books").await;
    assert_eq!(status, StatusCode::OK);
    let error = json["error"].as_str().unwrap();
    assert!(error.starts_with("storage error"), "{error}");
    assert!(error.contains("did not answer within 1ms"), "{error}");

    let (status, json) = post(&app, "/recommend/personalized", json!({"genre": "fiction"})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["error"].as_str().unwrap().contains("did not answer"));
}

#[tokio::test]
async fn strict_mode_reports_timeouts_and_store_failures() {
    let app = app_over(Arc::new(SlowCatalog), Duration::from_millis(1), true);
    let (status, json) = post(&app, "/recommend/similar", json!({"book_title": "A"})).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert!(json["error"].as_str().unwrap().contains("did not answer"));

    let app = app_over(Arc::new(UnavailableCatalog), Duration::from_secs(2), true);
    let (status, json) = get(&app, "/recommend/all_books").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("disk detached"));
    let (status, _) = post(
        &app,
        "/admin/add_book",
        json!({"id": 1, "title": "T", "author": "A", "genre": "g", "average_rating": 1.0, "rater_count": 0}),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let app = app_over(Arc::new(UnavailableCatalog), Duration::from_secs(2), false);
    let (status, json) = get(&app, "/recommend/all_books").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["error"].as_str().unwrap().contains("disk detached"));
}
