//! The contract between the application and a feature module such as `books`.
//!
//! Lifecycle, driven by [`crate::ModuleRegistry`] in registration order:
//! `init` once the store is connected, then the registry applies every
//! module's [`Migration`]s, then `start`. On shutdown `stop` runs in reverse
//! order before the store is closed.

use async_trait::async_trait;
use axum::Router;
use bookstore_db::{Database, Migration};

use crate::settings::Settings;

/// What a module sees while it wires itself up.
///
/// `settings` carries the layered configuration (store uri, page limits,
/// query timeout, admin tokens). `db` is the connected store; modules open
/// their collections from it during `init`.
pub struct InitCtx<'a> {
    pub settings: &'a Settings,
    pub db: &'a Database,
}

#[async_trait]
pub trait Module: Sync + Send {
    /// Mount point under `/api/` and the prefix of the module's migration keys.
    fn name(&self) -> &'static str;

    /// Build handler state. Runs before this module's migrations are applied,
    /// so it must not depend on indexes existing yet.
    async fn init(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handlers, mounted at `/api/{name}`. Asked for after `init`.
    fn routes(&self) -> Router {
        Router::new()
    }

    /// OpenAPI fragment with module-relative `paths` and `components.schemas`.
    fn openapi(&self) -> Option<serde_json::Value> {
        None
    }

    /// Index migrations, keyed `{name}.{id}` in the ledger and applied once.
    fn migrations(&self) -> Vec<Migration> {
        vec![]
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release resources; modules stop in reverse registration order.
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
