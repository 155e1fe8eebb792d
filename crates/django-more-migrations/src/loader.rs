//! Loads migration history from disk and replays it into project state.
//!
//! Migrations live at `<migrations_dir>/<app_label>/<name>.json`. The
//! [`MigrationLoader`] reads every file, builds the [`MigrationGraph`], and
//! can replay history in dependency order to rebuild a [`ProjectState`].
//! Custom-type columns come back detached and are made live against the
//! types the replayed operations register.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use django_more_core::{DjangoError, DjangoResult};

use crate::migration::{Migration, MigrationGraph, MigrationKey};
use crate::serializer::{OperationRegistry, SerializableMigration};
use crate::state::ProjectState;

/// Discovers migration files and builds the graph between them.
#[derive(Debug, Clone)]
pub struct MigrationLoader {
    migrations_dir: PathBuf,
    disk: BTreeMap<MigrationKey, SerializableMigration>,
}

impl MigrationLoader {
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            disk: BTreeMap::new(),
        }
    }

    /// Reads every migration file and returns the validated graph.
    pub fn load(&mut self) -> DjangoResult<MigrationGraph> {
        self.discover()?;
        self.build_graph()
    }

    fn discover(&mut self) -> DjangoResult<()> {
        self.disk.clear();
        if !self.migrations_dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&self.migrations_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(app_label) = path.file_name().and_then(|n| n.to_str()) {
                let app_label = app_label.to_string();
                self.discover_app(&app_label, &path)?;
            }
        }
        tracing::debug!(
            dir = %self.migrations_dir.display(),
            count = self.disk.len(),
            "discovered migrations"
        );
        Ok(())
    }

    fn discover_app(&mut self, app_label: &str, app_dir: &Path) -> DjangoResult<()> {
        for entry in std::fs::read_dir(app_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|n| n.to_str()) else {
                continue;
            };
            let name = name.to_string();
            let migration = Self::parse_migration_file(app_label, &name, &path)?;
            self.disk.insert((app_label.to_string(), name), migration);
        }
        Ok(())
    }

    /// Reads one file. The file's location decides its app and name.
    fn parse_migration_file(app_label: &str, name: &str, path: &Path) -> DjangoResult<SerializableMigration> {
        let mut migration = SerializableMigration::read_from_file(path).map_err(|e| {
            DjangoError::MigrationError(format!("{}: {e}", path.display()))
        })?;
        if migration.app_label != app_label || migration.name != name {
            tracing::warn!(
                path = %path.display(),
                recorded = %format!("{}.{}", migration.app_label, migration.name),
                "migration file records a different name; using its location"
            );
            migration.app_label = app_label.to_string();
            migration.name = name.to_string();
        }
        Ok(migration)
    }

    fn build_graph(&self) -> DjangoResult<MigrationGraph> {
        let mut graph = MigrationGraph::new();
        for (key, migration) in &self.disk {
            graph.add_node(&key.0, &key.1, migration.initial);
        }
        for (key, migration) in &self.disk {
            for dep in &migration.dependencies {
                graph.add_dependency(key.clone(), dep.clone())?;
            }
        }
        graph.validate()?;
        Ok(graph)
    }

    /// The on-disk records, keyed by `(app_label, name)`.
    pub fn disk_migrations(&self) -> &BTreeMap<MigrationKey, SerializableMigration> {
        &self.disk
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Rebuilds every loaded migration's operations through `registry`.
    pub fn build_migrations(
        &self,
        registry: &OperationRegistry,
    ) -> DjangoResult<BTreeMap<MigrationKey, Migration>> {
        self.disk
            .iter()
            .map(|(key, record)| Ok((key.clone(), record.clone().into_migration(registry)?)))
            .collect()
    }

    /// The project state after applying history up to and including
    /// `target`, or all of it when `target` is `None`.
    pub fn project_state(
        &self,
        registry: &OperationRegistry,
        target: Option<&MigrationKey>,
    ) -> DjangoResult<ProjectState> {
        let graph = self.build_graph()?;
        let order = match target {
            Some(target) => graph.forwards_plan(target)?,
            None => graph.topological_order()?,
        };
        replay(&self.build_migrations(registry)?, &order)
    }

    /// A validated graph over in-memory migrations.
    pub fn graph_from_migrations<'m>(
        migrations: impl IntoIterator<Item = &'m Migration>,
    ) -> DjangoResult<MigrationGraph> {
        let migrations: Vec<&Migration> = migrations.into_iter().collect();
        let mut graph = MigrationGraph::new();
        for m in &migrations {
            graph.add_node(&m.app_label, &m.name, m.initial);
        }
        for m in &migrations {
            for dep in &m.dependencies {
                graph.add_dependency(m.key(), dep.clone())?;
            }
        }
        graph.validate()?;
        Ok(graph)
    }
}

/// Applies the state changes of `order`'s migrations to an empty state.
pub fn replay(migrations: &BTreeMap<MigrationKey, Migration>, order: &[MigrationKey]) -> DjangoResult<ProjectState> {
    replay_onto(ProjectState::new(), migrations, order)
}

/// Applies the state changes of `order`'s migrations to `state`.
pub fn replay_onto(
    mut state: ProjectState,
    migrations: &BTreeMap<MigrationKey, Migration>,
    order: &[MigrationKey],
) -> DjangoResult<ProjectState> {
    for key in order {
        let migration = migrations.get(key).ok_or_else(|| {
            DjangoError::MigrationError(format!("Migration {}.{} is not loaded", key.0, key.1))
        })?;
        migration.mutate_state(&mut state)?;
    }
    Ok(state)
}
