use anyhow::Context;
use std::sync::Arc;

use bookstore_db::{Database, Migration};

use crate::module::{InitCtx, Module};

/// Module registry for managing module lifecycle in registration order
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn Module>>,
}

impl ModuleRegistry {
    /// Create a new module registry
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Register a module with the registry
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.push(module);
    }

    /// Get all registered modules in registration order
    pub fn modules(&self) -> impl Iterator<Item = &Arc<dyn Module>> {
        self.modules.iter()
    }

    /// Get a module by name
    pub fn get_module(&self, name: &str) -> Option<&Arc<dyn Module>> {
        self.modules.iter().find(|module| module.name() == name)
    }

    /// Get the number of registered modules
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Initialize modules in registration order
    pub async fn init_modules(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!("initializing {} modules", self.modules.len());

        for module in &self.modules {
            tracing::info!(module = module.name(), "initializing module");

            module
                .init(ctx)
                .await
                .with_context(|| format!("failed to initialize module '{}'", module.name()))?;
        }

        Ok(())
    }

    /// Start modules in registration order
    pub async fn start_modules(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!("starting {} modules", self.modules.len());

        for module in &self.modules {
            tracing::info!(module = module.name(), "starting module");

            module
                .start(ctx)
                .await
                .with_context(|| format!("failed to start module '{}'", module.name()))?;
        }

        Ok(())
    }

    /// Stop modules in reverse registration order
    pub async fn stop_modules(&self) -> anyhow::Result<()> {
        tracing::info!("stopping {} modules", self.modules.len());

        for module in self.modules.iter().rev() {
            tracing::info!(module = module.name(), "stopping module");

            module
                .stop()
                .await
                .with_context(|| format!("failed to stop module '{}'", module.name()))?;
        }

        Ok(())
    }

    /// Collect all migrations from all modules
    pub fn collect_migrations(&self) -> Vec<(String, Migration)> {
        let mut migrations = Vec::new();

        for module in &self.modules {
            for migration in module.migrations() {
                migrations.push((module.name().to_string(), migration));
            }
        }

        // Sort by module name and migration ID for deterministic ordering
        migrations.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(b.1.id)));

        migrations
    }

    /// Apply every pending migration against the database
    pub async fn run_migrations(&self, db: &Database) -> anyhow::Result<Vec<String>> {
        let migrations = self.collect_migrations();
        tracing::info!("checking {} migrations", migrations.len());

        db.apply_migrations(&migrations)
            .await
            .with_context(|| "failed to apply migrations")
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use bookstore_db::{Direction, IndexSpec};
    use std::sync::Mutex;

    struct TestModule {
        name: &'static str,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl TestModule {
        fn record(&self, event: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, event));
        }
    }

    #[async_trait::async_trait]
    impl Module for TestModule {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn init(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
            self.record("init");
            Ok(())
        }

        fn migrations(&self) -> Vec<Migration> {
            vec![Migration {
                id: "001_init",
                collection: "test",
                indexes: vec![IndexSpec::new("name_1").key("name", Direction::Ascending)],
            }]
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.record("stop");
            Ok(())
        }
    }

    #[test]
    fn test_module_registry_creation() {
        let registry = ModuleRegistry::new();
        assert_eq!(registry.module_count(), 0);
        assert!(registry.collect_migrations().is_empty());
    }

    #[tokio::test]
    async fn test_module_lifecycle() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ModuleRegistry::new();
        for name in ["first", "second"] {
            registry.register(Arc::new(TestModule {
                name,
                events: events.clone(),
            }));
        }

        let settings = Settings::default();
        let db = Database::connect("mem://registry").await.unwrap();
        let ctx = InitCtx {
            settings: &settings,
            db: &db,
        };

        registry.init_modules(&ctx).await.unwrap();
        registry.start_modules(&ctx).await.unwrap();
        registry.stop_modules().await.unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec!["first:init", "second:init", "second:stop", "first:stop"]
        );
        assert!(registry.get_module("second").is_some());
    }

    #[tokio::test]
    async fn test_migrations_run_once_per_module() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(TestModule {
            name: "zeta",
            events: events.clone(),
        }));
        registry.register(Arc::new(TestModule {
            name: "alpha",
            events,
        }));

        let db = Database::connect("mem://registry").await.unwrap();
        let applied = registry.run_migrations(&db).await.unwrap();
        assert_eq!(applied, vec!["alpha.001_init", "zeta.001_init"]);
        assert!(registry.run_migrations(&db).await.unwrap().is_empty());
    }
}
