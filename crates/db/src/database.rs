//! Connection factory and migration runner.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::collection::Collection;
use crate::engine::Engine;
use crate::error::StoreError;
use crate::query::IndexSpec;

const MEMORY_SCHEME: &str = "mem://";
const FILE_SCHEME: &str = "file://";
const DATABASE_FILE: &str = "bookstore.sqlite3";
const MIGRATIONS_COLLECTION: &str = "_migrations";

/// Migration definition contributed by a module.
#[derive(Debug, Clone)]
pub struct Migration {
    pub id: &'static str,
    pub collection: &'static str,
    pub indexes: Vec<IndexSpec>,
}

/// A connection to the document store.
#[derive(Debug)]
pub struct Database {
    uri: String,
    engine: Arc<Engine>,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl Database {
    /// Connect to `mem://<name>` or `file://<directory>`.
    pub async fn connect(uri: &str) -> Result<Self, StoreError> {
        let location = if uri.starts_with(MEMORY_SCHEME) {
            None
        } else if let Some(path) = uri.strip_prefix(FILE_SCHEME) {
            if path.is_empty() {
                return Err(StoreError::unavailable("file:// uri has no directory"));
            }
            let dir = PathBuf::from(path);
            tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                StoreError::unavailable(format!("cannot open '{}': {e}", dir.display()))
            })?;
            Some(dir.join(DATABASE_FILE))
        } else {
            return Err(StoreError::unavailable(format!(
                "unsupported database uri '{uri}'; expected mem:// or file://"
            )));
        };

        let engine = tokio::task::spawn_blocking(move || match location {
            None => Engine::in_memory(),
            Some(path) => Engine::open_file(&path),
        })
        .await
        .map_err(|e| StoreError::unavailable(format!("store task failed: {e}")))??;

        tracing::info!(target: "bookstore-db", %uri, "database connected");

        Ok(Self {
            uri: uri.to_string(),
            engine: Arc::new(engine),
            collections: RwLock::new(HashMap::new()),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Open a collection, creating it on first use.
    pub async fn collection(&self, name: &str) -> Result<Arc<Collection>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::unavailable("database connection is closed"));
        }
        if let Some(existing) = self.collections.read().await.get(name) {
            return Ok(existing.clone());
        }

        let mut collections = self.collections.write().await;
        if let Some(existing) = collections.get(name) {
            return Ok(existing.clone());
        }
        let collection = Arc::new(Collection::open(name, self.engine.clone()).await?);
        collections.insert(name.to_string(), collection.clone());
        Ok(collection)
    }

    /// Apply migrations not yet recorded, returning the keys of those applied now.
    ///
    /// Each migration is keyed as `<module>.<id>`.
    pub async fn apply_migrations(
        &self,
        migrations: &[(String, Migration)],
    ) -> Result<Vec<String>, StoreError> {
        let ledger = self.collection(MIGRATIONS_COLLECTION).await?;
        let mut applied = Vec::new();

        for (module, migration) in migrations {
            let key = format!("{module}.{}", migration.id);
            if ledger.get(&key).await?.is_some() {
                tracing::debug!(target: "bookstore-db", migration = %key, "migration already applied");
                continue;
            }

            let collection = self.collection(migration.collection).await?;
            for index in &migration.indexes {
                collection.create_index(index.clone()).await?;
            }

            let record = json!({
                "id": key,
                "collection": migration.collection,
                "appliedAt": Utc::now().to_rfc3339(),
            });
            if let Value::Object(record) = record {
                ledger.insert(record).await?;
            }
            tracing::info!(target: "bookstore-db", migration = %key, "migration applied");
            applied.push(key);
        }

        Ok(applied)
    }

    /// Mark the connection as lost. Every later operation fails with `Unavailable`.
    pub fn close(&self) {
        self.engine.close();
        tracing::info!(target: "bookstore-db", uri = %self.uri, "database closed");
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Direction, Filter};

    fn book_migration() -> (String, Migration) {
        (
            "books".to_string(),
            Migration {
                id: "001_init",
                collection: "books",
                indexes: vec![IndexSpec::new("title_1").key("title", Direction::Ascending)],
            },
        )
    }

    #[tokio::test]
    async fn unsupported_scheme_is_unavailable() {
        let err = Database::connect("postgres://localhost/books").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn collections_are_shared_per_name() {
        let db = Database::connect("mem://test").await.unwrap();
        let first = db.collection("books").await.unwrap();
        let second = db.collection("books").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn migrations_apply_once() {
        let db = Database::connect("mem://test").await.unwrap();
        let migrations = vec![book_migration()];

        let applied = db.apply_migrations(&migrations).await.unwrap();
        assert_eq!(applied, vec!["books.001_init".to_string()]);
        assert!(db.apply_migrations(&migrations).await.unwrap().is_empty());

        let books = db.collection("books").await.unwrap();
        assert_eq!(books.indexes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_database_remembers_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("file://{}", dir.path().display());
        let migrations = vec![book_migration()];

        let db = Database::connect(&uri).await.unwrap();
        db.apply_migrations(&migrations).await.unwrap();
        drop(db);

        let reopened = Database::connect(&uri).await.unwrap();
        assert!(reopened.apply_migrations(&migrations).await.unwrap().is_empty());
        let books = reopened.collection("books").await.unwrap();
        assert_eq!(books.count(&Filter::All).await.unwrap(), 0);
        assert_eq!(books.indexes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_database_keeps_documents() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("file://{}", dir.path().display());

        let db = Database::connect(&uri).await.unwrap();
        let books = db.collection("books").await.unwrap();
        let Value::Object(book) = json!({"id": "b1", "title": "Kindred"}) else {
            unreachable!()
        };
        books.insert(book).await.unwrap();
        drop(books);
        drop(db);

        let reopened = Database::connect(&uri).await.unwrap();
        let books = reopened.collection("books").await.unwrap();
        let stored = books.get("b1").await.unwrap().unwrap();
        assert_eq!(stored["title"], json!("Kindred"));
        assert!(dir.path().join(DATABASE_FILE).exists());
    }

    #[tokio::test]
    async fn closed_database_rejects_operations() {
        let db = Database::connect("mem://test").await.unwrap();
        let books = db.collection("books").await.unwrap();
        db.close();
        assert!(db.collection("books").await.is_err());
        assert!(books.count(&Filter::All).await.unwrap_err().is_unavailable());
    }
}
