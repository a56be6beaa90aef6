//! Document store for the bookstore, backed by SQLite.
//!
//! Each collection is a table of JSON documents keyed by `id`. Declared
//! indexes become SQLite expression indexes over `json_extract`, and every
//! [`Filter`] and sort is translated to SQL so the planner can use them.
//!
//! `mem://<name>` opens a private in-memory database. `file://<dir>` keeps
//! one database file in `<dir>`.

mod collection;
mod database;
mod engine;
mod error;
pub mod query;

pub use collection::Collection;
pub use database::{Database, Migration};
pub use error::StoreError;
pub use query::{Direction, Filter, FindOptions, IndexSpec, SortKey, ID_FIELD};

/// A stored document: a JSON object keyed by field name.
pub type Document = serde_json::Map<String, serde_json::Value>;
