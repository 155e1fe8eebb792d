//! Applies and reverts migrations through a schema editor.
//!
//! The [`MigrationExecutor`] turns a target into a [`MigrationPlan`] using
//! the graph and the [`MigrationRecorder`]'s applied set, then runs each
//! step inside its own transaction. States between operations are rebuilt
//! by replaying history, so backwards steps see the same states their
//! forwards run did.

use std::collections::{BTreeMap, BTreeSet};

use django_more_core::{DjangoError, DjangoResult};

use crate::loader::replay;
use crate::migration::{Migration, MigrationGraph, MigrationKey};
use crate::schema_editor::SchemaEditor;
use crate::state::ProjectState;

/// One migration to apply or revert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    pub migration: MigrationKey,
    pub backwards: bool,
}

impl MigrationStep {
    pub fn forward(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            migration: (app_label.into(), name.into()),
            backwards: false,
        }
    }

    pub fn backward(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            migration: (app_label.into(), name.into()),
            backwards: true,
        }
    }
}

/// An ordered list of steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(&mut self, step: MigrationStep) {
        self.steps.push(step);
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

/// Tracks which migrations have been applied.
#[derive(Debug, Clone, Default)]
pub struct MigrationRecorder {
    applied_migrations: BTreeSet<MigrationKey>,
}

impl MigrationRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, key: MigrationKey) {
        self.applied_migrations.insert(key);
    }

    pub fn unapply(&mut self, key: &MigrationKey) {
        self.applied_migrations.remove(key);
    }

    pub fn applied(&self) -> &BTreeSet<MigrationKey> {
        &self.applied_migrations
    }

    pub fn is_applied(&self, key: &MigrationKey) -> bool {
        self.applied_migrations.contains(key)
    }
}

/// Plans and runs migrations against a [`SchemaEditor`].
#[derive(Debug)]
pub struct MigrationExecutor<E> {
    editor: E,
    recorder: MigrationRecorder,
}

impl<E: SchemaEditor> MigrationExecutor<E> {
    pub fn new(editor: E) -> Self {
        Self::with_recorder(editor, MigrationRecorder::new())
    }

    pub fn with_recorder(editor: E, recorder: MigrationRecorder) -> Self {
        Self { editor, recorder }
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    pub fn into_editor(self) -> E {
        self.editor
    }

    pub fn recorder(&self) -> &MigrationRecorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut MigrationRecorder {
        &mut self.recorder
    }

    /// The steps reaching `target`: every unapplied migration when `None`,
    /// otherwise the unapplied ancestors of `target` or, when `target` is
    /// already applied, the applied migrations depending on it.
    pub fn make_plan(&self, graph: &MigrationGraph, target: Option<&MigrationKey>) -> DjangoResult<MigrationPlan> {
        let applied = self.recorder.applied();
        let mut plan = MigrationPlan::new();
        match target {
            None => {
                for key in graph.topological_order()? {
                    if !applied.contains(&key) {
                        plan.add_step(MigrationStep::forward(key.0, key.1));
                    }
                }
            }
            Some(target) if applied.contains(target) => {
                for key in graph.backwards_plan(target)? {
                    if &key != target && applied.contains(&key) {
                        plan.add_step(MigrationStep::backward(key.0, key.1));
                    }
                }
            }
            Some(target) => {
                for key in graph.forwards_plan(target)? {
                    if !applied.contains(&key) {
                        plan.add_step(MigrationStep::forward(key.0, key.1));
                    }
                }
            }
        }
        Ok(plan)
    }

    /// The steps unapplying every migration of `app_label`, along with
    /// anything depending on them.
    pub fn make_zero_plan(&self, graph: &MigrationGraph, app_label: &str) -> DjangoResult<MigrationPlan> {
        let applied = self.recorder.applied();
        let mut doomed = BTreeSet::new();
        for root in graph.root_nodes(app_label) {
            doomed.extend(graph.backwards_plan(&root)?);
        }
        let mut plan = MigrationPlan::new();
        for key in graph.topological_order()?.into_iter().rev() {
            if doomed.contains(&key) && applied.contains(&key) {
                plan.add_step(MigrationStep::backward(key.0, key.1));
            }
        }
        Ok(plan)
    }

    /// Runs `plan`, returning the project state of the applied set
    /// afterwards. A failing step is rolled back and stops the run.
    pub fn execute_plan(
        &mut self,
        plan: &MigrationPlan,
        graph: &MigrationGraph,
        migrations: &BTreeMap<MigrationKey, Migration>,
    ) -> DjangoResult<ProjectState> {
        let order = graph.topological_order()?;
        for step in &plan.steps {
            let migration = migrations.get(&step.migration).ok_or_else(|| {
                DjangoError::MigrationError(format!(
                    "Migration {}.{} is not loaded",
                    step.migration.0, step.migration.1
                ))
            })?;
            let before = self.applied_state(&order, migrations, Some(&step.migration))?;

            self.editor.begin();
            let result = if step.backwards {
                tracing::info!(migration = %migration, "unapplying");
                self.unapply_migration(migration, before)
            } else {
                tracing::info!(migration = %migration, "applying");
                self.apply_migration(migration, before)
            };
            if let Err(e) = result {
                tracing::error!(migration = %migration, error = %e, "migration failed");
                self.editor.rollback();
                return Err(e);
            }
            self.editor.commit();

            if step.backwards {
                self.recorder.unapply(&step.migration);
            } else {
                self.recorder.apply(step.migration.clone());
            }
        }
        self.applied_state(&order, migrations, None)
    }

    /// Replays the applied set, leaving out `except`.
    fn applied_state(
        &self,
        order: &[MigrationKey],
        migrations: &BTreeMap<MigrationKey, Migration>,
        except: Option<&MigrationKey>,
    ) -> DjangoResult<ProjectState> {
        let keys: Vec<MigrationKey> = order
            .iter()
            .filter(|key| self.recorder.is_applied(key) && Some(*key) != except)
            .cloned()
            .collect();
        replay(migrations, &keys)
    }

    fn apply_migration(&mut self, migration: &Migration, mut state: ProjectState) -> DjangoResult<()> {
        for op in &migration.operations {
            let from_state = state.clone();
            op.state_forwards(&migration.app_label, &mut state)?;
            op.database_forwards(&migration.app_label, &mut self.editor, &from_state, &state)?;
        }
        Ok(())
    }

    fn unapply_migration(&mut self, migration: &Migration, before: ProjectState) -> DjangoResult<()> {
        if let Some(op) = migration.operations.iter().find(|op| !op.reversible()) {
            return Err(DjangoError::MigrationError(format!(
                "Migration {migration} is not reversible: {}",
                op.describe()
            )));
        }
        let mut states = Vec::with_capacity(migration.operations.len() + 1);
        states.push(before);
        for op in &migration.operations {
            let mut next = states[states.len() - 1].clone();
            op.state_forwards(&migration.app_label, &mut next)?;
            states.push(next);
        }
        for (i, op) in migration.operations.iter().enumerate().rev() {
            op.database_backwards(&migration.app_label, &mut self.editor, &states[i + 1], &states[i])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::loader::MigrationLoader;
    use crate::operations::{AddField, CreateModel, RunSQL};
    use crate::schema_editor::DatabaseSchemaEditor;
    use crate::state::{MigrationFieldDef, ModelOptions};
    use django_more_db::{host_namespace, Backend, DatabaseBackendType, FieldType};
    use django_more_patchy::PatchRegistry;

    fn key(app: &str, name: &str) -> MigrationKey {
        (app.to_string(), name.to_string())
    }

    fn executor() -> MigrationExecutor<DatabaseSchemaEditor> {
        let backend = Backend::load(
            &host_namespace(),
            Arc::new(PatchRegistry::new()),
            DatabaseBackendType::PostgreSQL,
        )
        .unwrap();
        MigrationExecutor::new(DatabaseSchemaEditor::new(backend))
    }

    fn history() -> BTreeMap<MigrationKey, Migration> {
        let initial = Migration::new("blog", "0001_initial")
            .initial()
            .add_operation(Box::new(CreateModel {
                name: "post".into(),
                fields: vec![MigrationFieldDef::new("id", FieldType::BigAutoField).primary_key()],
                options: ModelOptions::default(),
            }));
        let title = Migration::new("blog", "0002_title")
            .depends_on("blog", "0001_initial")
            .add_operation(Box::new(AddField {
                model_name: "post".into(),
                field: MigrationFieldDef::new("title", FieldType::TextField),
            }));
        [initial, title].into_iter().map(|m| (m.key(), m)).collect()
    }

    fn graph(migrations: &BTreeMap<MigrationKey, Migration>) -> MigrationGraph {
        MigrationLoader::graph_from_migrations(migrations.values()).unwrap()
    }

    // ── Planning ──

    #[test]
    fn test_plan_everything() {
        let migrations = history();
        let plan = executor().make_plan(&graph(&migrations), None).unwrap();
        assert_eq!(
            plan.steps,
            vec![
                MigrationStep::forward("blog", "0001_initial"),
                MigrationStep::forward("blog", "0002_title"),
            ]
        );
    }

    #[test]
    fn test_plan_skips_applied() {
        let migrations = history();
        let mut ex = executor();
        ex.recorder_mut().apply(key("blog", "0001_initial"));
        let plan = ex.make_plan(&graph(&migrations), None).unwrap();
        assert_eq!(plan.steps, vec![MigrationStep::forward("blog", "0002_title")]);
    }

    #[test]
    fn test_plan_back_to_target() {
        let migrations = history();
        let mut ex = executor();
        ex.recorder_mut().apply(key("blog", "0001_initial"));
        ex.recorder_mut().apply(key("blog", "0002_title"));
        let plan = ex
            .make_plan(&graph(&migrations), Some(&key("blog", "0001_initial")))
            .unwrap();
        assert_eq!(plan.steps, vec![MigrationStep::backward("blog", "0002_title")]);

        let zero = ex.make_zero_plan(&graph(&migrations), "blog").unwrap();
        assert_eq!(
            zero.steps,
            vec![
                MigrationStep::backward("blog", "0002_title"),
                MigrationStep::backward("blog", "0001_initial"),
            ]
        );
    }

    #[test]
    fn test_plan_unknown_target() {
        let migrations = history();
        assert!(executor()
            .make_plan(&graph(&migrations), Some(&key("blog", "0009_nope")))
            .is_err());
    }

    // ── Execution ──

    #[test]
    fn test_execute_forwards_then_backwards() {
        let migrations = history();
        let g = graph(&migrations);
        let mut ex = executor();

        let plan = ex.make_plan(&g, None).unwrap();
        let state = ex.execute_plan(&plan, &g, &migrations).unwrap();
        assert!(state.get_model("blog", "post").unwrap().get_field("title").is_some());
        assert!(ex.recorder().is_applied(&key("blog", "0002_title")));

        let plan = ex.make_zero_plan(&g, "blog").unwrap();
        let state = ex.execute_plan(&plan, &g, &migrations).unwrap();
        assert!(state.get_model("blog", "post").is_none());
        assert!(ex.recorder().applied().is_empty());

        assert_eq!(
            ex.editor().collected_sql(),
            vec![
                "CREATE TABLE \"blog_post\" (\"id\" bigserial PRIMARY KEY)",
                "ALTER TABLE \"blog_post\" ADD COLUMN \"title\" text NOT NULL",
                "ALTER TABLE \"blog_post\" DROP COLUMN \"title\" CASCADE",
                "DROP TABLE \"blog_post\" CASCADE",
            ]
        );
        assert!(!ex.editor().in_transaction());
    }

    #[test]
    fn test_irreversible_migration_is_rolled_back() {
        let data = Migration::new("blog", "0001_data").add_operation(Box::new(RunSQL::new("SELECT 1", "")));
        let migrations: BTreeMap<_, _> = [(data.key(), data)].into_iter().collect();
        let g = graph(&migrations);
        let mut ex = executor();

        let plan = ex.make_plan(&g, None).unwrap();
        ex.execute_plan(&plan, &g, &migrations).unwrap();
        let plan = ex.make_zero_plan(&g, "blog").unwrap();
        let err = ex.execute_plan(&plan, &g, &migrations).unwrap_err();
        assert!(matches!(err, DjangoError::MigrationError(_)));
        assert!(ex.recorder().is_applied(&key("blog", "0001_data")));
        assert_eq!(ex.editor().collected_sql(), vec!["SELECT 1"]);
    }

    #[test]
    fn test_missing_migration_is_error() {
        let migrations = history();
        let g = graph(&migrations);
        let mut plan = MigrationPlan::new();
        plan.add_step(MigrationStep::forward("shop", "0001_initial"));
        assert!(executor().execute_plan(&plan, &g, &migrations).is_err());
    }
}
