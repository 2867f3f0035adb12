pub mod artifacts;
pub mod book;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod persist;
pub mod store;

pub use artifacts::{PopularityEntry, PopularityIndex, SimilarityMatrix};
pub use book::{BookId, BookRecord, RawBook};
pub use engine::{EngineStatus, Preferences, Recommender};
pub use error::{RecommendError, StoreError};
pub use store::{CatalogSnapshot, CatalogStore, MemoryCatalog, SledCatalog};
