//! Migration file serialization and deserialization.
//!
//! Migration files are JSON. Each operation is stored as a record tagged
//! with its kind (`{"type": "AddField", ...}`); an [`OperationRegistry`]
//! maps kinds back to concrete operations, so extension crates can register
//! their own.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use django_more_core::{DjangoError, DjangoResult};

use crate::migration::{Migration, MigrationKey};
use crate::operations::{
    AddField, AlterField, CreateModel, DeleteModel, Operation, RemoveField, RenameField, RunSQL,
};

/// Serializes `op` as a record tagged with `kind`.
pub fn operation_record<T: Serialize>(kind: &str, op: &T) -> DjangoResult<Json> {
    let mut record = serde_json::to_value(op)?;
    match record.as_object_mut() {
        Some(map) => {
            map.insert("type".to_string(), Json::String(kind.to_string()));
            Ok(record)
        }
        None => Err(DjangoError::SerializationError(format!(
            "{kind} did not serialize to an object"
        ))),
    }
}

// ── OperationRegistry ───────────────────────────────────────────────────

type OperationFactory = Arc<dyn Fn(&Json) -> DjangoResult<Box<dyn Operation>> + Send + Sync>;

/// Maps operation kinds to the functions that rebuild them from records.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    factories: BTreeMap<String, OperationFactory>,
}

impl OperationRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry knowing the built-in model and field operations.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register::<CreateModel>("CreateModel");
        registry.register::<DeleteModel>("DeleteModel");
        registry.register::<AddField>("AddField");
        registry.register::<RemoveField>("RemoveField");
        registry.register::<AlterField>("AlterField");
        registry.register::<RenameField>("RenameField");
        registry.register::<RunSQL>("RunSQL");
        registry
    }

    /// Registers a serde-deserializable operation under `kind`.
    pub fn register<T>(&mut self, kind: impl Into<String>)
    where
        T: Operation + DeserializeOwned + 'static,
    {
        self.register_with(kind, |record| {
            let op: T = serde_json::from_value(record.clone())?;
            Ok(Box::new(op) as Box<dyn Operation>)
        });
    }

    /// Registers a custom factory under `kind`.
    pub fn register_with<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&Json) -> DjangoResult<Box<dyn Operation>> + Send + Sync + 'static,
    {
        let kind = kind.into();
        if self.factories.insert(kind.clone(), Arc::new(factory)).is_some() {
            tracing::debug!(kind = %kind, "operation kind re-registered");
        }
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Rebuilds an operation from its record.
    pub fn deserialize(&self, record: &Json) -> DjangoResult<Box<dyn Operation>> {
        let kind = record
            .get("type")
            .and_then(Json::as_str)
            .ok_or_else(|| DjangoError::SerializationError("operation record has no \"type\"".into()))?;
        let factory = self.factories.get(kind).ok_or_else(|| {
            DjangoError::SerializationError(format!("unknown operation type '{kind}'"))
        })?;
        factory(record)
    }
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ── SerializableMigration ───────────────────────────────────────────────

/// The on-disk form of a migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableMigration {
    /// The app label this migration belongs to.
    pub app_label: String,
    /// The migration name (e.g. "0001_initial").
    pub name: String,
    /// Dependencies as `[app_label, name]` pairs.
    #[serde(default)]
    pub dependencies: Vec<MigrationKey>,
    /// Whether this is the initial migration for the app.
    #[serde(default)]
    pub initial: bool,
    /// Operation records, in order.
    #[serde(default)]
    pub operations: Vec<Json>,
}

impl SerializableMigration {
    pub fn to_json(&self) -> DjangoResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            DjangoError::SerializationError(format!("Failed to serialize migration: {e}"))
        })
    }

    pub fn from_json(json: &str) -> DjangoResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            DjangoError::SerializationError(format!("Failed to deserialize migration: {e}"))
        })
    }

    /// Captures `migration` by deconstructing each operation.
    pub fn from_migration(migration: &Migration) -> DjangoResult<Self> {
        Ok(Self {
            app_label: migration.app_label.clone(),
            name: migration.name.clone(),
            dependencies: migration.dependencies.clone(),
            initial: migration.initial,
            operations: migration
                .operations
                .iter()
                .map(|op| op.deconstruct())
                .collect::<DjangoResult<_>>()?,
        })
    }

    /// Rebuilds the migration, resolving operation kinds through `registry`.
    pub fn into_migration(self, registry: &OperationRegistry) -> DjangoResult<Migration> {
        let operations = self
            .operations
            .iter()
            .map(|record| registry.deserialize(record))
            .collect::<DjangoResult<Vec<_>>>()
            .map_err(|e| {
                DjangoError::SerializationError(format!("{}.{}: {e}", self.app_label, self.name))
            })?;
        Ok(Migration {
            name: self.name,
            app_label: self.app_label,
            dependencies: self.dependencies,
            operations,
            initial: self.initial,
        })
    }

    pub fn write_to_file(&self, path: &Path) -> DjangoResult<()> {
        let json = self.to_json()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "wrote migration file");
        Ok(())
    }

    pub fn read_from_file(path: &Path) -> DjangoResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

/// A migration name: `0002_custom` or `0002_auto_YYYYMMDD_HHMM`.
pub fn generate_migration_name(number: u32, custom_name: Option<&str>) -> String {
    match custom_name {
        Some(name) => format!("{number:04}_{name}"),
        None => format!("{number:04}_auto_{}", chrono::Utc::now().format("%Y%m%d_%H%M")),
    }
}

/// The next free migration number for `app_label`, one past the highest
/// numbered JSON file in its directory.
pub fn next_migration_number(migrations_dir: &Path, app_label: &str) -> u32 {
    let Ok(entries) = std::fs::read_dir(migrations_dir.join(app_label)) else {
        return 1;
    };
    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
        .filter_map(|path| {
            let stem = path.file_stem()?.to_str()?.to_string();
            stem.split('_').next()?.parse::<u32>().ok()
        })
        .max()
        .unwrap_or(0)
        + 1
}

/// `<migrations_dir>/<app_label>/<name>.json`.
pub fn migration_file_path(migrations_dir: &Path, app_label: &str, name: &str) -> PathBuf {
    migrations_dir.join(app_label).join(format!("{name}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MigrationFieldDef, ModelOptions};
    use django_more_db::FieldType;
    use serde_json::json;

    fn initial() -> Migration {
        Migration::new("blog", "0001_initial")
            .initial()
            .add_operation(Box::new(CreateModel {
                name: "post".into(),
                fields: vec![
                    MigrationFieldDef::new("id", FieldType::BigAutoField).primary_key(),
                    MigrationFieldDef::new("title", FieldType::CharField).max_length(200),
                ],
                options: ModelOptions::default(),
            }))
            .add_operation(Box::new(RunSQL::new("SELECT 1", "SELECT 2")))
    }

    // ── Records ──

    #[test]
    fn test_operation_record_tags_kind() {
        let record = operation_record("DeleteModel", &DeleteModel { name: "post".into() }).unwrap();
        assert_eq!(record, json!({"type": "DeleteModel", "name": "post"}));
    }

    #[test]
    fn test_operation_record_rejects_scalars() {
        assert!(operation_record("Weird", &3).is_err());
    }

    // ── OperationRegistry ──

    #[test]
    fn test_builtin_registry() {
        let registry = OperationRegistry::with_builtin();
        assert!(registry.contains("AddField"));
        assert!(!registry.contains("CreateEnum"));
        assert_eq!(registry.kinds().count(), 7);
    }

    #[test]
    fn test_deserialize_unknown_kind() {
        let registry = OperationRegistry::with_builtin();
        let err = registry.deserialize(&json!({"type": "Nope"})).unwrap_err();
        assert!(err.to_string().contains("Nope"));
        assert!(registry.deserialize(&json!({"name": "x"})).is_err());
    }

    #[test]
    fn test_register_with_custom_factory() {
        let mut registry = OperationRegistry::new();
        registry.register_with("Noop", |_| Ok(Box::new(RunSQL::new("", "")) as Box<dyn Operation>));
        let op = registry.deserialize(&json!({"type": "Noop"})).unwrap();
        assert_eq!(op.kind(), "RunSQL");
    }

    // ── SerializableMigration ──

    #[test]
    fn test_from_and_into_migration() {
        let serial = SerializableMigration::from_migration(&initial()).unwrap();
        assert_eq!(serial.operations.len(), 2);
        assert_eq!(serial.operations[0]["type"], "CreateModel");

        let json = serial.to_json().unwrap();
        let back = SerializableMigration::from_json(&json).unwrap();
        assert_eq!(back, serial);

        let migration = back.into_migration(&OperationRegistry::with_builtin()).unwrap();
        assert!(migration.initial);
        assert_eq!(
            migration.operations.iter().map(|op| op.kind()).collect::<Vec<_>>(),
            vec!["CreateModel", "RunSQL"]
        );
    }

    #[test]
    fn test_into_migration_names_the_migration_on_error() {
        let serial = SerializableMigration {
            app_label: "blog".into(),
            name: "0002_x".into(),
            dependencies: vec![],
            initial: false,
            operations: vec![json!({"type": "CreateEnum"})],
        };
        let err = serial.into_migration(&OperationRegistry::with_builtin()).unwrap_err();
        assert!(err.to_string().contains("blog.0002_x"));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = migration_file_path(dir.path(), "blog", "0001_initial");
        let serial = SerializableMigration::from_migration(&initial()).unwrap();
        serial.write_to_file(&path).unwrap();
        assert_eq!(SerializableMigration::read_from_file(&path).unwrap(), serial);
        assert_eq!(next_migration_number(dir.path(), "blog"), 2);
        assert_eq!(next_migration_number(dir.path(), "shop"), 1);
    }

    // ── Naming ──

    #[test]
    fn test_generate_migration_name() {
        assert_eq!(generate_migration_name(3, Some("colours")), "0003_colours");
        let auto = generate_migration_name(12, None);
        assert!(auto.starts_with("0012_auto_"));
        assert_eq!(auto.len(), "0012_auto_20260101_1200".len());
    }
}
