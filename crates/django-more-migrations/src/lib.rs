//! # django-more-migrations
//!
//! The migration planner that custom types plug into: project state with a
//! custom type registry, model operations, schema editors, the autodetector
//! and its extension seam, questioners, and history replay.
//!
//! ## Modules
//!
//! - [`state`] - [`ProjectState`], [`ModelState`], [`MigrationFieldDef`] and the live view
//! - [`operations`] - The [`Operation`] trait and model/field operations
//! - [`schema_editor`] - [`SchemaEditor`] and the collecting [`DatabaseSchemaEditor`]
//! - [`questioner`] - [`MigrationQuestioner`] implementations
//! - [`autodetect`] - [`MigrationAutodetector`], extensions and dependency ordering
//! - [`migration`] - [`Migration`] and [`MigrationGraph`]
//! - [`serializer`] - Migration files and the [`OperationRegistry`]
//! - [`loader`] - [`MigrationLoader`] and history replay
//! - [`executor`] - [`MigrationExecutor`], plans and the recorder

#![allow(clippy::missing_const_for_fn)]

pub mod autodetect;
pub mod executor;
pub mod loader;
pub mod migration;
pub mod operations;
pub mod questioner;
pub mod schema_editor;
pub mod serializer;
pub mod state;

pub use autodetect::{
    arrange_for_graph, sort_operations, AutodetectorExtension, Changes, DetectionContext,
    MigrationAutodetector,
};
pub use executor::{MigrationExecutor, MigrationPlan, MigrationRecorder, MigrationStep};
pub use loader::{replay, replay_onto, MigrationLoader};
pub use migration::{Migration, MigrationGraph, MigrationKey};
pub use operations::{
    AddField, AlterField, CreateModel, DeleteModel, Operation, RemoveField, RenameField, RunSQL,
};
pub use questioner::{
    from_settings as questioner_from_settings, InteractiveQuestioner, MigrationQuestioner,
    NonInteractiveQuestioner,
};
pub use schema_editor::{field_db_type, DatabaseSchemaEditor, SchemaEditor, Statement};
pub use serializer::{
    generate_migration_name, migration_file_path, next_migration_number, operation_record,
    OperationRegistry, SerializableMigration,
};
pub use state::{MigrationFieldDef, ModelKey, ModelOptions, ModelState, ProjectState, StateApps};
