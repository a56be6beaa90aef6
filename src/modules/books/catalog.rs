//! Catalog Store: typed book operations over the `books` collection.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use bookstore_db::{Collection, Document, Filter, FindOptions};

use super::error::CatalogError;
use super::models::{timestamp, Book, ValidatedBook, ValidatedChanges};

/// Source of creation and edit timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Durable storage of books with index-backed listing.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Persist a new book and return it with its assigned id.
    async fn insert(&self, book: ValidatedBook) -> Result<Book, CatalogError>;

    async fn fetch_by_id(&self, id: &str) -> Result<Book, CatalogError>;

    async fn update_by_id(&self, id: &str, changes: ValidatedChanges)
        -> Result<Book, CatalogError>;

    async fn delete_by_id(&self, id: &str) -> Result<(), CatalogError>;

    /// Raw (possibly projected) documents matching `filter`.
    async fn list(
        &self,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, CatalogError>;

    async fn count(&self, filter: &Filter) -> Result<usize, CatalogError>;
}

/// Run `operation`, failing with `Timeout` once `limit` elapses.
pub async fn within<T, F>(limit: Duration, operation: F) -> Result<T, CatalogError>
where
    F: Future<Output = Result<T, CatalogError>>,
{
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| CatalogError::Timeout(limit))?
}

/// [`CatalogStore`] backed by a document collection.
///
/// Single-document operations are bounded by `timeout`. `list` and `count`
/// are bounded by the query service instead.
pub struct DocumentCatalog {
    collection: Arc<Collection>,
    timeout: Duration,
    clock: Clock,
}

impl DocumentCatalog {
    pub fn new(collection: Arc<Collection>, timeout: Duration) -> Self {
        Self {
            collection,
            timeout,
            clock: Arc::new(timestamp::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl CatalogStore for DocumentCatalog {
    async fn insert(&self, book: ValidatedBook) -> Result<Book, CatalogError> {
        let doc = book.into_document((self.clock)());
        within(self.timeout, async {
            let id = self.collection.insert(doc).await?;
            let stored = self
                .collection
                .get(&id)
                .await?
                .ok_or_else(|| CatalogError::Store(format!("book '{id}' vanished after insert")))?;
            tracing::info!(book_id = %id, "book created");
            Book::from_document(stored)
        })
        .await
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Book, CatalogError> {
        within(self.timeout, async {
            match self.collection.get(id).await? {
                Some(doc) => Book::from_document(doc),
                None => Err(CatalogError::NotFound(id.to_string())),
            }
        })
        .await
    }

    async fn update_by_id(
        &self,
        id: &str,
        changes: ValidatedChanges,
    ) -> Result<Book, CatalogError> {
        let doc = changes.into_document((self.clock)());
        within(self.timeout, async {
            match self.collection.update(id, doc).await? {
                Some(updated) => {
                    tracing::info!(book_id = %id, "book updated");
                    Book::from_document(updated)
                }
                None => Err(CatalogError::NotFound(id.to_string())),
            }
        })
        .await
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), CatalogError> {
        within(self.timeout, async {
            if self.collection.delete(id).await? {
                tracing::info!(book_id = %id, "book deleted");
                Ok(())
            } else {
                Err(CatalogError::NotFound(id.to_string()))
            }
        })
        .await
    }

    async fn list(
        &self,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, CatalogError> {
        Ok(self.collection.find(filter, options).await?)
    }

    async fn count(&self, filter: &Filter) -> Result<usize, CatalogError> {
        Ok(self.collection.count(filter).await?)
    }
}
