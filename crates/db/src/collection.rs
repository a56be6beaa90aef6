//! A named collection of JSON documents stored in one SQLite table.

use std::sync::Arc;

use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use crate::engine::{Engine, INDEX_TABLE};
use crate::error::StoreError;
use crate::query::{Filter, FindOptions, IndexSpec, SortKey, ID_FIELD};
use crate::Document;

/// Collection handle shared by every caller of the same [`crate::Database`].
///
/// Each single-document write is one SQLite statement or transaction.
#[derive(Debug)]
pub struct Collection {
    name: String,
    table: String,
    engine: Arc<Engine>,
}

impl Collection {
    /// Open the collection's table, creating it on first use.
    pub(crate) async fn open(name: &str, engine: Arc<Engine>) -> Result<Self, StoreError> {
        let table = table_name(name)?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (id TEXT PRIMARY KEY NOT NULL, doc TEXT NOT NULL)"
        );
        engine.run(move |conn| Ok(conn.execute_batch(&ddl)?)).await?;
        tracing::debug!(target: "bookstore-db", collection = name, "collection opened");

        Ok(Self {
            name: name.to_string(),
            table,
            engine,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a document, assigning a UUIDv7 `id` when none is present.
    pub async fn insert(&self, mut doc: Document) -> Result<String, StoreError> {
        let id = match document_id(&doc) {
            Some(id) => id,
            None => {
                let id = Uuid::now_v7().to_string();
                doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                id
            }
        };
        let body = serde_json::to_string(&doc)?;
        let sql = format!("INSERT INTO {} (id, doc) VALUES (?1, ?2)", self.table);

        let key = id.clone();
        self.engine
            .run(move |conn| {
                let outcome = conn.execute(&sql, params![key, body]);
                match outcome {
                    Ok(_) => Ok(()),
                    Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                        Err(StoreError::Duplicate(key))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?;
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let sql = format!("SELECT doc FROM {} WHERE id = ?1", self.table);
        let key = id.to_string();
        let body: Option<String> = self
            .engine
            .run(move |conn| Ok(conn.query_row(&sql, params![key], |row| row.get(0)).optional()?))
            .await?;
        body.as_deref().map(parse_document).transpose()
    }

    /// Merge `changes` into the document. The `id` field is never rewritten.
    pub async fn update(
        &self,
        id: &str,
        changes: Document,
    ) -> Result<Option<Document>, StoreError> {
        let select = format!("SELECT doc FROM {} WHERE id = ?1", self.table);
        let write = format!("UPDATE {} SET doc = ?1 WHERE id = ?2", self.table);
        let key = id.to_string();

        self.engine
            .run(move |conn| {
                let tx = conn.transaction()?;
                let current: Option<String> = tx
                    .query_row(&select, params![key], |row| row.get(0))
                    .optional()?;
                let Some(current) = current else {
                    return Ok(None);
                };

                let mut updated = parse_document(&current)?;
                for (name, value) in changes {
                    if name != ID_FIELD {
                        updated.insert(name, value);
                    }
                }
                tx.execute(&write, params![serde_json::to_string(&updated)?, key])?;
                tx.commit()?;
                Ok(Some(updated))
            })
            .await
    }

    /// Returns whether a document was removed.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.table);
        let key = id.to_string();
        self.engine
            .run(move |conn| Ok(conn.execute(&sql, params![key])? > 0))
            .await
    }

    pub async fn find(
        &self,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, StoreError> {
        let mut bound = Vec::new();
        let clause = filter.to_sql(&mut bound)?;
        let tail = options.to_sql(&mut bound)?;
        let sql = format!("SELECT doc FROM {} WHERE {clause}{tail}", self.table);
        let name = self.name.clone();
        let sort = options.sort.clone();

        let bodies: Vec<String> = self
            .engine
            .run(move |conn| {
                check_sort_supported(&name, &load_indexes(conn, &name)?, &sort)?;
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(params_from_iter(bound.iter()), |row| row.get(0))?;
                let bodies = rows.collect::<Result<Vec<String>, _>>()?;
                Ok(bodies)
            })
            .await?;

        bodies
            .iter()
            .map(|body| Ok(options.apply_projection(parse_document(body)?)))
            .collect()
    }

    pub async fn count(&self, filter: &Filter) -> Result<usize, StoreError> {
        let mut bound = Vec::new();
        let clause = filter.to_sql(&mut bound)?;
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {clause}", self.table);

        let count: i64 = self
            .engine
            .run(move |conn| {
                Ok(conn.query_row(&sql, params_from_iter(bound.iter()), |row| row.get(0))?)
            })
            .await?;
        usize::try_from(count).map_err(|_| StoreError::invalid_query("negative count"))
    }

    /// Declare an index. Re-declaring an index with the same name replaces it.
    pub async fn create_index(&self, spec: IndexSpec) -> Result<(), StoreError> {
        if spec.keys.is_empty() {
            return Err(StoreError::invalid_query(format!(
                "index '{}' has no keys",
                spec.name
            )));
        }
        let index = quote(&format!("{}__{}", self.name, spec.name));
        let ddl = format!(
            "DROP INDEX IF EXISTS {index}; CREATE INDEX {index} ON {} ({});",
            self.table,
            spec.columns_sql()?
        );
        let record = format!(
            "INSERT OR REPLACE INTO {INDEX_TABLE} (collection, name, keys) VALUES (?1, ?2, ?3)"
        );
        let keys = serde_json::to_string(&spec.keys)?;
        let name = self.name.clone();

        self.engine
            .run(move |conn| {
                let tx = conn.transaction()?;
                tx.execute_batch(&ddl)?;
                tx.execute(&record, params![name, spec.name, keys])?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        tracing::debug!(target: "bookstore-db", collection = %self.name, "index created");
        Ok(())
    }

    pub async fn indexes(&self) -> Result<Vec<IndexSpec>, StoreError> {
        let name = self.name.clone();
        self.engine.run(move |conn| load_indexes(conn, &name)).await
    }
}

fn load_indexes(conn: &Connection, collection: &str) -> Result<Vec<IndexSpec>, StoreError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT name, keys FROM {INDEX_TABLE} WHERE collection = ?1 ORDER BY rowid"
    ))?;
    let rows = stmt.query_map(params![collection], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut indexes = Vec::new();
    for row in rows {
        let (name, keys) = row?;
        let keys: Vec<SortKey> = serde_json::from_str(&keys)?;
        indexes.push(IndexSpec { name, keys });
    }
    Ok(indexes)
}

fn document_id(doc: &Document) -> Option<String> {
    doc.get(ID_FIELD).and_then(Value::as_str).map(str::to_string)
}

fn parse_document(body: &str) -> Result<Document, StoreError> {
    Ok(serde_json::from_str(body)?)
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn table_name(collection: &str) -> Result<String, StoreError> {
    let valid = !collection.is_empty()
        && collection
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::invalid_query(format!(
            "collection name '{collection}' is not allowed"
        )));
    }
    Ok(quote(collection))
}

/// A sort must be led by the primary key or by the leading key of a declared index.
fn check_sort_supported(
    collection: &str,
    indexes: &[IndexSpec],
    sort: &[SortKey],
) -> Result<(), StoreError> {
    let Some(first) = sort.first() else {
        return Ok(());
    };
    if first.field == ID_FIELD || indexes.iter().any(|index| index.leads_with(&first.field)) {
        return Ok(());
    }
    Err(StoreError::invalid_query(format!(
        "no index on '{collection}' supports sorting by '{}'",
        first.field
    )))
}
