//! Bookstore catalog service.
//!
//! Wires the registered modules to the document store and the HTTP server.

pub mod modules;

use anyhow::Context;
use bookstore_db::Database;
use bookstore_kernel::{settings::Settings, InitCtx, ModuleRegistry};

/// A connected database with every module initialized and migrated.
pub struct App {
    pub db: Database,
    pub registry: ModuleRegistry,
}

impl App {
    /// Connect to the configured store, then initialize and migrate all modules.
    pub async fn bootstrap(settings: &Settings) -> anyhow::Result<Self> {
        let db = connect(settings).await?;

        let mut registry = ModuleRegistry::new();
        modules::register_all(&mut registry);

        let ctx = InitCtx {
            settings,
            db: &db,
        };
        registry.init_modules(&ctx).await?;
        let applied = registry.run_migrations(&db).await?;
        tracing::info!(applied = applied.len(), "migrations complete");

        Ok(Self { db, registry })
    }

    pub async fn start(&self, settings: &Settings) -> anyhow::Result<()> {
        let ctx = InitCtx {
            settings,
            db: &self.db,
        };
        self.registry.start_modules(&ctx).await
    }

    /// Stop modules in reverse order and close the store.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let stopped = self.registry.stop_modules().await;
        self.db.close();
        stopped
    }
}

async fn connect(settings: &Settings) -> anyhow::Result<Database> {
    Database::connect(&settings.database.uri)
        .await
        .with_context(|| format!("failed to connect to '{}'", settings.database.uri))
}

/// Serve the catalog until a shutdown signal arrives.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    tracing::info!(
        env = ?settings.environment,
        db = %settings.database.uri,
        "bookstore bootstrap starting"
    );

    let app = App::bootstrap(&settings).await?;
    app.start(&settings).await?;
    tracing::info!(
        modules = app.registry.module_count(),
        "bookstore bootstrap complete"
    );

    let served = bookstore_http::start_server(&app.registry, &settings).await;
    let shutdown = app.shutdown().await;
    settle(served, shutdown)
}

/// A serve failure outranks a shutdown failure, which is then only logged.
fn settle(served: anyhow::Result<()>, shutdown: anyhow::Result<()>) -> anyhow::Result<()> {
    match (served, shutdown) {
        (Err(served), Err(shutdown)) => {
            tracing::error!(error = ?shutdown, "shutdown failed after server error");
            Err(served)
        }
        (served, shutdown) => served.and(shutdown),
    }
}

/// Apply pending migrations without serving, returning the keys applied.
pub async fn migrate(settings: &Settings) -> anyhow::Result<Vec<String>> {
    let db = connect(settings).await?;
    let mut registry = ModuleRegistry::new();
    modules::register_all(&mut registry);

    let applied = registry.run_migrations(&db).await;
    db.close();
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn settings(uri: &str) -> Settings {
        let mut settings = Settings::default();
        settings.database.uri = uri.to_string();
        settings.auth.admin_tokens = vec!["shelver".to_string()];
        settings
    }

    async fn json_of(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn serves_books_through_the_full_stack() {
        let settings = settings("mem://app-test");
        let app = App::bootstrap(&settings).await.unwrap();
        app.start(&settings).await.unwrap();
        let router = bookstore_http::build_router(&app.registry, &settings);

        let create = Request::post("/api/books")
            .header("authorization", "Bearer shelver")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "title": "Parable of the Sower",
                    "author": "Octavia E. Butler",
                    "price": 15.0,
                    "description": "Earthseed"
                })
                .to_string(),
            ))
            .unwrap();
        let response = router.clone().oneshot(create).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().contains_key("x-request-id"));

        let response = router
            .clone()
            .oneshot(Request::get("/api/books").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_of(response).await;
        assert_eq!(body["data"]["pagination"]["total"], 1);

        let response = router
            .oneshot(Request::get("/docs/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let spec = json_of(response).await;
        assert!(spec["paths"]["/api/books/{id}"]["delete"].is_object());

        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn migrations_apply_once_per_store() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&format!("file://{}", dir.path().display()));

        let first = migrate(&settings).await.unwrap();
        assert_eq!(first, vec!["books.001_book_indexes".to_string()]);
        assert!(migrate(&settings).await.unwrap().is_empty());
    }

    #[test]
    fn serve_errors_are_not_masked_by_shutdown_errors() {
        let served = settle(
            Err(anyhow::anyhow!("address in use")),
            Err(anyhow::anyhow!("stop failed")),
        );
        assert_eq!(served.unwrap_err().to_string(), "address in use");

        let stopped = settle(Ok(()), Err(anyhow::anyhow!("stop failed")));
        assert_eq!(stopped.unwrap_err().to_string(), "stop failed");

        assert!(settle(Ok(()), Ok(())).is_ok());
    }

    #[tokio::test]
    async fn unsupported_store_uri_fails_bootstrap() {
        let result = App::bootstrap(&settings("postgres://localhost/books")).await;
        assert!(result.is_err());
    }
}
