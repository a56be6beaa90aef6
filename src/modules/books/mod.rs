pub mod catalog;
pub mod error;
pub mod models;
pub mod query;
pub mod routes;

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use axum::Router;
use bookstore_authz::TokenAuthorizer;
use bookstore_db::{Direction, IndexSpec};
use bookstore_kernel::{InitCtx, Migration, Module};
use once_cell::sync::OnceCell;
use serde_json::json;

use catalog::{CatalogStore, DocumentCatalog};
use query::{QueryDefaults, QueryService};
use routes::BooksState;

/// Book catalog: CRUD plus offset and cursor listings.
pub struct BooksModule {
    state: OnceCell<BooksState>,
}

impl BooksModule {
    pub const fn new() -> Self {
        Self {
            state: OnceCell::new(),
        }
    }
}

impl Default for BooksModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for BooksModule {
    fn name(&self) -> &'static str {
        "books"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        let collection = ctx
            .db
            .collection(models::COLLECTION)
            .await
            .with_context(|| format!("failed to open collection '{}'", models::COLLECTION))?;

        let defaults = QueryDefaults::from(&ctx.settings.database);
        let catalog: Arc<dyn CatalogStore> =
            Arc::new(DocumentCatalog::new(collection, defaults.timeout));
        let authorizer =
            TokenAuthorizer::with_admin_tokens(ctx.settings.auth.admin_tokens.iter().cloned());
        if ctx.settings.auth.admin_tokens.is_empty() {
            tracing::warn!(module = self.name(), "no admin tokens configured; catalog is read-only");
        }

        let state = BooksState {
            queries: QueryService::new(catalog.clone(), defaults),
            catalog,
            authorizer: Arc::new(authorizer),
        };
        if self.state.set(state).is_err() {
            anyhow::bail!("books module initialized twice");
        }

        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            default_limit = defaults.page_limit,
            max_limit = defaults.max_page_limit,
            query_timeout_ms = u64::try_from(defaults.timeout.as_millis()).unwrap_or(u64::MAX),
            "books module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        match self.state.get() {
            Some(state) => routes::router(state.clone()),
            None => {
                tracing::warn!(module = self.name(), "routes requested before init; none mounted");
                Router::new()
            }
        }
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        Some(openapi_fragment())
    }

    fn migrations(&self) -> Vec<Migration> {
        vec![Migration {
            id: "001_book_indexes",
            collection: models::COLLECTION,
            indexes: vec![
                IndexSpec::new("title_1").key("title", Direction::Ascending),
                IndexSpec::new("author_1").key("author", Direction::Ascending),
                IndexSpec::new("price_1").key("price", Direction::Ascending),
                IndexSpec::new("createdAt_-1").key("createdAt", Direction::Descending),
                IndexSpec::new("author_1_title_1")
                    .key("author", Direction::Ascending)
                    .key("title", Direction::Ascending),
                IndexSpec::new("createdAt_-1_id_-1")
                    .key("createdAt", Direction::Descending)
                    .key("id", Direction::Descending),
            ],
        }]
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "books module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "books module stopped");
        Ok(())
    }
}

/// Create a new instance of the books module
pub fn create_module() -> Arc<dyn Module> {
    Arc::new(BooksModule::new())
}

fn error_response(description: &str) -> serde_json::Value {
    json!({
        "description": description,
        "content": {
            "application/json": {
                "schema": { "$ref": "#/components/schemas/ErrorResponse" }
            }
        }
    })
}

fn ok_response(description: &str, schema: serde_json::Value) -> serde_json::Value {
    json!({
        "description": description,
        "content": {
            "application/json": {
                "schema": {
                    "type": "object",
                    "properties": {
                        "success": { "type": "boolean" },
                        "data": schema
                    },
                    "required": ["success", "data"]
                }
            }
        }
    })
}

fn query_param(name: &str, description: &str, schema: serde_json::Value) -> serde_json::Value {
    json!({
        "name": name,
        "in": "query",
        "required": false,
        "description": description,
        "schema": schema
    })
}

fn openapi_fragment() -> serde_json::Value {
    let book = json!({ "$ref": "#/components/schemas/Book" });
    let text = json!({ "type": "string" });
    let id_param = json!({
        "name": "id",
        "in": "path",
        "required": true,
        "schema": { "type": "string" }
    });
    let bearer = json!([{ "bearerAuth": [] }]);
    let filters = vec![
        query_param(
            "search",
            "Substring of title or author, case-insensitive",
            text.clone(),
        ),
        query_param("author", "Exact author", text.clone()),
        query_param("title", "Exact title", text.clone()),
    ];
    let mut list_params = vec![
        query_param(
            "strategy",
            "offset (default) or cursor",
            json!({ "type": "string", "enum": ["offset", "cursor"] }),
        ),
        query_param(
            "page",
            "1-based page, offset strategy only",
            json!({ "type": "integer", "minimum": 1 }),
        ),
        query_param("limit", "Page size", json!({ "type": "integer", "minimum": 1 })),
        query_param(
            "sort",
            "-createdAt or price:asc; comma-separated for offset",
            text.clone(),
        ),
        query_param("select", "Comma-separated fields to return", text.clone()),
        query_param("lastId", "Id of the last item seen", text.clone()),
        query_param("lastValue", "Sort value of the last item seen", text.clone()),
    ];
    list_params.extend(filters.iter().cloned());

    json!({
        "paths": {
            "/": {
                "get": {
                    "summary": "List books",
                    "tags": ["Books"],
                    "parameters": list_params,
                    "responses": {
                        "200": ok_response("Offset or cursor page", json!({
                            "oneOf": [
                                { "$ref": "#/components/schemas/OffsetListing" },
                                { "$ref": "#/components/schemas/CursorListing" }
                            ]
                        })),
                        "422": error_response("Invalid pagination parameters"),
                        "504": error_response("Query timed out")
                    }
                },
                "post": {
                    "summary": "Add a book",
                    "tags": ["Books"],
                    "security": bearer.clone(),
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": { "$ref": "#/components/schemas/NewBook" }
                            }
                        }
                    },
                    "responses": {
                        "201": ok_response("Created book", book.clone()),
                        "401": error_response("Missing or unknown token"),
                        "422": error_response("Invalid book")
                    }
                }
            },
            "/count": {
                "get": {
                    "summary": "Count books",
                    "tags": ["Books"],
                    "parameters": filters,
                    "responses": {
                        "200": ok_response("Matching records", json!({
                            "type": "object",
                            "properties": { "count": { "type": "integer" } }
                        }))
                    }
                }
            },
            "/{id}": {
                "get": {
                    "summary": "Fetch a book",
                    "tags": ["Books"],
                    "parameters": [id_param.clone()],
                    "responses": {
                        "200": ok_response("Book", book.clone()),
                        "404": error_response("No book with this id")
                    }
                },
                "put": {
                    "summary": "Edit a book",
                    "tags": ["Books"],
                    "security": bearer.clone(),
                    "parameters": [id_param.clone()],
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": { "$ref": "#/components/schemas/BookChanges" }
                            }
                        }
                    },
                    "responses": {
                        "200": ok_response("Updated book", book),
                        "404": error_response("No book with this id"),
                        "422": error_response("Invalid changes")
                    }
                },
                "delete": {
                    "summary": "Delete a book",
                    "tags": ["Books"],
                    "security": bearer,
                    "parameters": [id_param],
                    "responses": {
                        "200": ok_response("Deleted id", json!({
                            "type": "object",
                            "properties": { "id": { "type": "string" } }
                        })),
                        "404": error_response("No book with this id")
                    }
                }
            },
            "/health": {
                "get": {
                    "summary": "Books health check",
                    "tags": ["Books"],
                    "responses": {
                        "200": {
                            "description": "OK",
                            "content": {
                                "text/plain": { "schema": { "type": "string" } }
                            }
                        }
                    }
                }
            }
        },
        "components": {
            "schemas": {
                "Book": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "title": { "type": "string", "maxLength": 100 },
                        "author": { "type": "string" },
                        "price": { "type": "number", "exclusiveMinimum": 0 },
                        "description": { "type": "string" },
                        "createdAt": { "type": "string", "format": "date-time" },
                        "updatedAt": { "type": "string", "format": "date-time" }
                    },
                    "required": ["id", "title", "author", "price", "description", "createdAt", "updatedAt"]
                },
                "NewBook": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string", "maxLength": 100 },
                        "author": { "type": "string" },
                        "price": { "type": "number", "exclusiveMinimum": 0 },
                        "description": { "type": "string" }
                    },
                    "required": ["title", "author", "price", "description"]
                },
                "BookChanges": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string", "maxLength": 100 },
                        "author": { "type": "string" },
                        "price": { "type": "number", "exclusiveMinimum": 0 },
                        "description": { "type": "string" }
                    }
                },
                "OffsetListing": {
                    "type": "object",
                    "properties": {
                        "items": { "type": "array", "items": { "$ref": "#/components/schemas/Book" } },
                        "pagination": {
                            "type": "object",
                            "properties": {
                                "page": { "type": "integer" },
                                "limit": { "type": "integer" },
                                "total": { "type": "integer" },
                                "pages": { "type": "integer" }
                            }
                        }
                    }
                },
                "CursorListing": {
                    "type": "object",
                    "properties": {
                        "items": { "type": "array", "items": { "$ref": "#/components/schemas/Book" } },
                        "next": {
                            "type": ["object", "null"],
                            "properties": {
                                "lastId": { "type": "string" },
                                "lastValue": {}
                            }
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookstore_db::Database;
    use bookstore_kernel::settings::Settings;

    #[tokio::test]
    async fn init_wires_routes_from_settings() {
        let db = Database::connect("mem://books-module").await.unwrap();
        let mut settings = Settings::default();
        settings.auth.admin_tokens = vec!["t0ken".to_string()];
        let ctx = InitCtx {
            settings: &settings,
            db: &db,
        };

        let module = BooksModule::new();
        module.init(&ctx).await.unwrap();
        assert!(module.state.get().is_some());
        assert!(module.init(&ctx).await.is_err());
    }

    #[test]
    fn migrations_index_every_sortable_field() {
        let migrations = BooksModule::new().migrations();
        assert_eq!(migrations.len(), 1);
        let indexes = &migrations[0].indexes;
        for field in models::BookField::ALL.into_iter().filter(|f| f.is_sortable()) {
            if field == models::BookField::Id {
                continue;
            }
            assert!(
                indexes.iter().any(|index| index.leads_with(field.key())),
                "no index leads with {}",
                field.key()
            );
        }
    }

    #[test]
    fn openapi_describes_every_route() {
        let spec = openapi_fragment();
        for path in ["/", "/count", "/{id}", "/health"] {
            assert!(spec["paths"].get(path).is_some(), "missing {path}");
        }
        for schema in ["Book", "NewBook", "BookChanges"] {
            assert!(spec["components"]["schemas"].get(schema).is_some());
        }
    }
}
