//! Catalog collaborators. The engine only ever sees [`CatalogStore`]; the
//! storage format belongs to the implementations here.

use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;

use crate::book::BookRecord;
use crate::error::StoreError;

/// Rows of the catalog in scan order. Row positions index the similarity matrix.
pub type CatalogSnapshot = Arc<Vec<BookRecord>>;

pub trait CatalogStore: Send + Sync {
    /// Every row, in insertion order.
    fn scan(&self) -> Result<CatalogSnapshot, StoreError>;

    /// Appends one row and returns it as stored. No uniqueness check on `id`.
    fn append(&self, book: BookRecord) -> Result<BookRecord, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Appends many rows; returns how many were written.
    fn extend(&self, books: Vec<BookRecord>) -> Result<usize, StoreError> {
        let count = books.len();
        for book in books {
            self.append(book)?;
        }
        Ok(count)
    }
}

/// In-process catalog. Readers take a cheap snapshot under the read lock;
/// appends are serialized by the write lock and copy the row vector only
/// while an older snapshot is still alive.
#[derive(Default)]
pub struct MemoryCatalog {
    rows: RwLock<CatalogSnapshot>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_books(books: Vec<BookRecord>) -> Self {
        Self { rows: RwLock::new(Arc::new(books)) }
    }
}

impl CatalogStore for MemoryCatalog {
    fn scan(&self) -> Result<CatalogSnapshot, StoreError> {
        Ok(self.rows.read().clone())
    }

    fn append(&self, book: BookRecord) -> Result<BookRecord, StoreError> {
        let mut rows = self.rows.write();
        Arc::make_mut(&mut *rows).push(book.clone());
        Ok(book)
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.rows.read().len())
    }

    fn extend(&self, books: Vec<BookRecord>) -> Result<usize, StoreError> {
        let count = books.len();
        let mut rows = self.rows.write();
        Arc::make_mut(&mut *rows).extend(books);
        Ok(count)
    }
}

const BOOKS_TREE: &str = "books";

/// Durable catalog on sled. Keys are big-endian ids from
/// [`sled::Db::generate_id`], so key order is insertion order.
pub struct SledCatalog {
    db: sled::Db,
    books: sled::Tree,
}

impl SledCatalog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A catalog that is removed when dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let books = db.open_tree(BOOKS_TREE)?;
        Ok(Self { db, books })
    }

    fn next_key(&self) -> Result<Vec<u8>, StoreError> {
        Ok(self.db.generate_id()?.to_be_bytes().to_vec())
    }
}

impl CatalogStore for SledCatalog {
    fn scan(&self) -> Result<CatalogSnapshot, StoreError> {
        let mut rows = Vec::with_capacity(self.books.len());
        for value in self.books.iter().values() {
            let value = value?;
            rows.push(bincode::deserialize::<BookRecord>(&value)?);
        }
        Ok(Arc::new(rows))
    }

    fn append(&self, book: BookRecord) -> Result<BookRecord, StoreError> {
        let bytes = bincode::serialize(&book)?;
        self.books.insert(self.next_key()?, bytes)?;
        self.books.flush()?;
        tracing::debug!(id = book.id, "appended book to sled catalog");
        Ok(book)
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.books.len())
    }

    fn extend(&self, books: Vec<BookRecord>) -> Result<usize, StoreError> {
        let count = books.len();
        let mut batch = sled::Batch::default();
        for book in &books {
            batch.insert(self.next_key()?, bincode::serialize(book)?);
        }
        self.books.apply_batch(batch)?;
        self.books.flush()?;
        Ok(count)
    }
}
