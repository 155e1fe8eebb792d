//! The start-up sequence and what it leaves behind.
//!
//! [`setup`] builds the host namespace, registers the `django_types` and
//! `django_enum` apps ahead of any project apps, runs every `ready()` hook
//! (which is where patches are applied), freezes the patch registry and
//! loads a backend for each configured database vendor.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use django_more_core::logging::planning_span;
use django_more_core::{AppConfig, AppRegistry, DjangoError, DjangoResult, ReadyContext, Settings};
use django_more_db::{host_namespace, load_backends, Backend, DatabaseBackendType, TypesConfig};
use django_more_enum::{register_operations, EnumConfig, EnumDetector};
use django_more_migrations::{
    arrange_for_graph, migration_file_path, questioner_from_settings, DatabaseSchemaEditor,
    MigrationAutodetector, MigrationExecutor, MigrationLoader, MigrationQuestioner,
    OperationRegistry, ProjectState, SerializableMigration,
};
use django_more_patchy::{Namespace, PatchRegistry};

/// Runs the start-up sequence with only the built-in apps.
pub fn setup(settings: Settings) -> DjangoResult<Runtime> {
    setup_with_apps(settings, Vec::new())
}

/// Runs the start-up sequence. `apps` are registered after the built-in
/// apps, so their `ready()` hooks see the host already patched.
pub fn setup_with_apps(settings: Settings, apps: Vec<Box<dyn AppConfig>>) -> DjangoResult<Runtime> {
    tracing::info!("Starting up with databases {:?}", settings.database_vendors());
    let namespace = host_namespace();
    let registry = Arc::new(PatchRegistry::new());

    let mut app_registry = AppRegistry::new();
    app_registry.register(Box::new(TypesConfig));
    app_registry.register(Box::new(EnumConfig));
    for app in apps {
        app_registry.register(app);
    }
    app_registry.populate(&ReadyContext::new(&namespace, &registry, &settings))?;
    registry.freeze();

    let backends = load_backends(&namespace, &registry, &settings.database_vendors())?;
    let mut operations = OperationRegistry::with_builtin();
    register_operations(&mut operations);

    Ok(Runtime {
        settings,
        namespace,
        registry,
        apps: app_registry,
        backends,
        operations,
    })
}

/// A started-up host: patched backends, installed apps and the operation
/// registry used to read migration history.
pub struct Runtime {
    settings: Settings,
    namespace: Namespace,
    registry: Arc<PatchRegistry>,
    apps: AppRegistry,
    backends: BTreeMap<DatabaseBackendType, Backend>,
    operations: OperationRegistry,
}

impl Runtime {
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn patch_registry(&self) -> &Arc<PatchRegistry> {
        &self.registry
    }

    pub fn apps(&self) -> &AppRegistry {
        &self.apps
    }

    pub fn operations(&self) -> &OperationRegistry {
        &self.operations
    }

    /// The backend of the database configured under `alias`.
    pub fn backend(&self, alias: &str) -> DjangoResult<&Backend> {
        let db = self.settings.databases.get(alias).ok_or_else(|| {
            DjangoError::ImproperlyConfigured(format!("no database configured as '{alias}'"))
        })?;
        DatabaseBackendType::from_vendor(db.vendor())
            .and_then(|backend_type| self.backends.get(&backend_type))
            .ok_or_else(|| {
                DjangoError::ImproperlyConfigured(format!(
                    "database '{alias}' uses unsupported engine '{}'",
                    db.engine
                ))
            })
    }

    pub fn schema_editor(&self, alias: &str) -> DjangoResult<DatabaseSchemaEditor> {
        Ok(DatabaseSchemaEditor::new(self.backend(alias)?.clone()))
    }

    pub fn executor(&self, alias: &str) -> DjangoResult<MigrationExecutor<DatabaseSchemaEditor>> {
        Ok(MigrationExecutor::new(self.schema_editor(alias)?))
    }

    /// An autodetector with the enum extension installed.
    pub fn autodetector(&self, from_state: ProjectState, to_state: ProjectState) -> MigrationAutodetector {
        MigrationAutodetector::new(from_state, to_state).with_extension(Box::new(EnumDetector))
    }

    /// The questioner the migration settings ask for.
    pub fn questioner(&self) -> Box<dyn MigrationQuestioner> {
        questioner_from_settings(&self.settings.migrations)
    }

    pub fn loader(&self) -> MigrationLoader {
        MigrationLoader::new(&self.settings.migrations.migrations_dir)
    }

    /// The state migration history on disk leads to.
    pub fn project_state(&self) -> DjangoResult<ProjectState> {
        let mut loader = self.loader();
        loader.load()?;
        loader.project_state(&self.operations, None)
    }

    /// Writes the migrations turning the history on disk into `to_state`
    /// and returns their paths.
    pub fn make_migrations(
        &self,
        to_state: ProjectState,
        questioner: &mut dyn MigrationQuestioner,
    ) -> DjangoResult<Vec<PathBuf>> {
        let dir = &self.settings.migrations.migrations_dir;
        let mut loader = MigrationLoader::new(dir);
        let graph = loader.load()?;
        let from_state = loader.project_state(&self.operations, None)?;

        let apps: BTreeSet<String> = from_state
            .models
            .keys()
            .chain(to_state.models.keys())
            .map(|(app, _)| app.clone())
            .collect();
        let span = planning_span(&apps.into_iter().collect::<Vec<_>>());
        let _guard = span.enter();

        let changes = self.autodetector(from_state, to_state).changes(questioner)?;
        if changes.is_empty() {
            tracing::info!("No changes detected");
            return Ok(Vec::new());
        }

        let mut written = Vec::new();
        for migration in arrange_for_graph(changes, &graph) {
            let path = migration_file_path(dir, &migration.app_label, &migration.name);
            SerializableMigration::from_migration(&migration)?.write_to_file(&path)?;
            tracing::info!("Wrote {} ({} operations)", path.display(), migration.operations.len());
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use django_more_core::DatabaseSettings;
    use django_more_db::FieldType;
    use django_more_enum::EnumDef;
    use django_more_migrations::{MigrationFieldDef, ModelState, NonInteractiveQuestioner};
    use serde_json::Value as Json;
    use tracing_subscriber::registry::LookupSpan;

    struct Shop;

    impl AppConfig for Shop {
        fn name(&self) -> &str {
            "project.shop"
        }

        fn ready(&self, ctx: &ReadyContext<'_>) -> DjangoResult<()> {
            // built-in apps are ready first
            assert!(django_more_enum::enum_patched(&ctx.patcher()));
            Ok(())
        }
    }

    fn postgres_settings() -> Settings {
        let mut settings = Settings::default();
        settings.databases.insert(
            "default".into(),
            DatabaseSettings {
                engine: "django.db.backends.postgresql".into(),
                ..DatabaseSettings::default()
            },
        );
        settings
    }

    // ── Start-up ──

    #[test]
    fn test_setup_installs_builtin_apps_first() {
        let runtime = setup_with_apps(postgres_settings(), vec![Box::new(Shop)]).unwrap();
        let labels: Vec<&str> = runtime.apps().get_app_configs().iter().map(|a| a.label()).collect();
        assert_eq!(labels, vec!["django_types", "django_enum", "shop"]);
        assert!(runtime.apps().is_ready());
    }

    #[test]
    fn test_setup_freezes_registry() {
        let runtime = setup(postgres_settings()).unwrap();
        assert!(runtime.patch_registry().is_frozen());
        let patcher = django_more_patchy::Patcher::new(runtime.namespace(), runtime.patch_registry());
        // already applied, so nothing is written
        assert!(matches!(django_more_enum::patch_enum(&patcher, runtime.settings()), Ok(false)));
        assert!(matches!(django_more_db::patch_types(&patcher), Ok(false)));
    }

    #[test]
    fn test_backend_by_alias() {
        let runtime = setup(postgres_settings()).unwrap();
        let backend = runtime.backend("default").unwrap();
        assert_eq!(backend.vendor(), "postgresql");
        assert!(backend.features().requires_enum_declaration);
        assert!(matches!(
            runtime.backend("replica"),
            Err(DjangoError::ImproperlyConfigured(_))
        ));
    }

    #[test]
    fn test_unsupported_engine() {
        let mut settings = Settings::default();
        settings.databases.insert(
            "default".into(),
            DatabaseSettings {
                engine: "django.db.backends.oracle".into(),
                ..DatabaseSettings::default()
            },
        );
        assert!(matches!(setup(settings), Err(DjangoError::ImproperlyConfigured(_))));
    }

    // ── Planning ──

    /// Says yes to everything and notes the spans each question is asked in.
    #[derive(Default)]
    struct SpanRecorder {
        defaults: HashMap<String, Json>,
        scopes: Vec<Vec<&'static str>>,
    }

    fn current_scope() -> Vec<&'static str> {
        // Read the current span before borrowing the dispatcher: nested
        // `get_default` calls see the no-op dispatcher.
        let current = tracing::Span::current().id();
        tracing::dispatcher::get_default(|dispatch| {
            let registry = dispatch.downcast_ref::<tracing_subscriber::Registry>()?;
            let id = current.clone()?;
            let span = registry.span(&id)?;
            Some(span.scope().map(|s| s.name()).collect())
        })
        .unwrap_or_default()
    }

    impl MigrationQuestioner for SpanRecorder {
        fn is_interactive(&self) -> bool {
            false
        }

        fn defaults(&self) -> &HashMap<String, Json> {
            &self.defaults
        }

        fn ask_boolean(&mut self, _key: &str, _prompt: &str, _default: bool) -> bool {
            self.scopes.push(current_scope());
            true
        }

        fn ask_choice(&mut self, _key: &str, _prompt: &str, _choices: &[String], default: usize) -> usize {
            default
        }

        fn ask_text(&mut self, _key: &str, _prompt: &str) -> Option<String> {
            None
        }
    }

    fn shop_state(db_type: &str) -> ProjectState {
        let def = EnumDef::new("Order.Status", "shop.models", [("OPEN", "open"), ("PAID", "paid")])
            .unwrap()
            .with_db_type(db_type)
            .into_type_def();
        let mut state = ProjectState::new();
        state.add_model(ModelState::new(
            "shop",
            "order",
            vec![
                MigrationFieldDef::new("id", FieldType::BigAutoField).primary_key(),
                MigrationFieldDef::custom("status", "enum", "")
                    .with_type_app_label("shop")
                    .with_type_def(def, None)
                    .unwrap(),
            ],
        ));
        state
    }

    #[test]
    fn test_questions_are_asked_inside_planning_span() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = postgres_settings();
        settings.migrations.migrations_dir = dir.path().to_path_buf();
        let runtime = setup(settings).unwrap();
        runtime
            .make_migrations(shop_state("shop_status"), &mut NonInteractiveQuestioner::default())
            .unwrap();

        let mut questioner = SpanRecorder::default();
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            runtime.make_migrations(shop_state("shop_state"), &mut questioner).unwrap();
        });
        assert_eq!(questioner.scopes.len(), 1);
        assert!(
            questioner.scopes[0].contains(&"makemigrations"),
            "asked outside planning: {:?}",
            questioner.scopes[0]
        );
    }
}
