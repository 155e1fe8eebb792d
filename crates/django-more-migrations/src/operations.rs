//! Migration operations that describe schema changes.
//!
//! Each operation updates a [`ProjectState`] and, separately, issues the
//! matching statements through a [`SchemaEditor`] in either direction.
//! Operations also declare what they depend on and what they provide as
//! [`DependencyEdge`]s, which is how the autodetector orders them.

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use django_more_core::{DjangoError, DjangoResult};
use django_more_db::{DependencyEdge, FieldDependencies, Value};

use crate::schema_editor::SchemaEditor;
use crate::serializer::operation_record;
use crate::state::{MigrationFieldDef, ModelOptions, ModelState, ProjectState};

/// A single migration operation that can be applied forwards or backwards.
pub trait Operation: Send + Sync + fmt::Debug {
    /// The record kind this operation serializes under, e.g. `"AddField"`.
    fn kind(&self) -> &'static str;

    /// Returns a human-readable description of this operation.
    fn describe(&self) -> String;

    /// Applies this operation to `state`.
    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> DjangoResult<()>;

    /// Applies this operation to the database. `from_state` is the state
    /// before the operation, `to_state` the state after it.
    fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> DjangoResult<()>;

    /// Reverts this operation on the database. `from_state` is the state
    /// after the operation, `to_state` the state before it.
    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> DjangoResult<()>;

    fn reversible(&self) -> bool {
        true
    }

    /// What must exist (or be gone) before this operation runs.
    fn dependencies(&self, _app_label: &str) -> Vec<DependencyEdge> {
        Vec::new()
    }

    /// What this operation creates or deletes.
    fn provides(&self, _app_label: &str) -> Vec<DependencyEdge> {
        Vec::new()
    }

    /// The serialized record, `{"type": kind, ...}`.
    fn deconstruct(&self) -> DjangoResult<Json>;

    fn as_any(&self) -> &dyn Any;
}

fn model_in<'s>(
    state: &'s ProjectState,
    operation: &str,
    app_label: &str,
    name: &str,
) -> DjangoResult<&'s ModelState> {
    state.get_model(app_label, name).ok_or_else(|| {
        DjangoError::MigrationError(format!("{operation}: model {app_label}.{name} not found in state"))
    })
}

fn field_in<'s>(
    model: &'s ModelState,
    operation: &str,
    name: &str,
) -> DjangoResult<&'s MigrationFieldDef> {
    model.get_field(name).ok_or_else(|| {
        DjangoError::MigrationError(format!(
            "{operation}: field {}.{}.{name} not found in state",
            model.app_label, model.name
        ))
    })
}

fn field_dependencies(
    app_label: &str,
    model_name: &str,
    field: &MigrationFieldDef,
) -> Vec<DependencyEdge> {
    if !field.has_dependencies() {
        return Vec::new();
    }
    let own = DependencyEdge::created(app_label, model_name);
    field
        .get_dependencies()
        .into_iter()
        .filter(|edge| *edge != own)
        .collect()
}

// ── CreateModel ─────────────────────────────────────────────────────────

/// Creates a new database table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateModel {
    /// The model name.
    pub name: String,
    /// The fields for the new table.
    pub fields: Vec<MigrationFieldDef>,
    /// Model-level options.
    #[serde(default)]
    pub options: ModelOptions,
}

impl Operation for CreateModel {
    fn kind(&self) -> &'static str {
        "CreateModel"
    }

    fn describe(&self) -> String {
        format!("Create model {}", self.name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> DjangoResult<()> {
        let model = ModelState::new(app_label, &self.name, self.fields.clone())
            .with_options(self.options.clone());
        let key = model.key();
        state.add_model(model);
        state.make_model_live(&key)?;
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> DjangoResult<()> {
        editor.create_model(model_in(to_state, self.kind(), app_label, &self.name)?)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> DjangoResult<()> {
        editor.delete_model(model_in(from_state, self.kind(), app_label, &self.name)?)
    }

    fn dependencies(&self, app_label: &str) -> Vec<DependencyEdge> {
        let mut edges: Vec<DependencyEdge> = self
            .fields
            .iter()
            .flat_map(|f| field_dependencies(app_label, &self.name, f))
            .collect();
        edges.sort();
        edges.dedup();
        edges
    }

    fn provides(&self, app_label: &str) -> Vec<DependencyEdge> {
        vec![DependencyEdge::created(app_label, &self.name)]
    }

    fn deconstruct(&self) -> DjangoResult<Json> {
        operation_record(self.kind(), self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── DeleteModel ─────────────────────────────────────────────────────────

/// Drops a database table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteModel {
    /// The model name to delete.
    pub name: String,
}

impl Operation for DeleteModel {
    fn kind(&self) -> &'static str {
        "DeleteModel"
    }

    fn describe(&self) -> String {
        format!("Delete model {}", self.name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> DjangoResult<()> {
        state
            .remove_model(&(app_label.to_string(), self.name.clone()))
            .map(|_| ())
            .ok_or_else(|| {
                DjangoError::MigrationError(format!(
                    "{}: model {app_label}.{} not found in state",
                    self.kind(),
                    self.name
                ))
            })
    }

    fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> DjangoResult<()> {
        editor.delete_model(model_in(from_state, self.kind(), app_label, &self.name)?)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> DjangoResult<()> {
        editor.create_model(model_in(to_state, self.kind(), app_label, &self.name)?)
    }

    fn provides(&self, app_label: &str) -> Vec<DependencyEdge> {
        vec![DependencyEdge::deleted(app_label, &self.name)]
    }

    fn deconstruct(&self) -> DjangoResult<Json> {
        operation_record(self.kind(), self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── AddField ────────────────────────────────────────────────────────────

/// Adds a column to an existing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddField {
    /// The model name the field is being added to.
    pub model_name: String,
    /// The field to add.
    pub field: MigrationFieldDef,
}

impl Operation for AddField {
    fn kind(&self) -> &'static str {
        "AddField"
    }

    fn describe(&self) -> String {
        format!("Add field {} to {}", self.field.name, self.model_name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> DjangoResult<()> {
        let model = state
            .get_model_mut(app_label, &self.model_name)
            .ok_or_else(|| {
                DjangoError::MigrationError(format!(
                    "{}: model {app_label}.{} not found in state",
                    self.kind(),
                    self.model_name
                ))
            })?;
        model.fields.push(self.field.clone());
        let key = model.key();
        state.make_model_live(&key)?;
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> DjangoResult<()> {
        let model = model_in(to_state, self.kind(), app_label, &self.model_name)?;
        let field = field_in(model, self.kind(), &self.field.name)?;
        editor.add_field(model, field)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> DjangoResult<()> {
        let model = model_in(from_state, self.kind(), app_label, &self.model_name)?;
        let field = field_in(model, self.kind(), &self.field.name)?;
        editor.remove_field(model, field)
    }

    fn dependencies(&self, app_label: &str) -> Vec<DependencyEdge> {
        let mut edges = vec![DependencyEdge::created(app_label, &self.model_name)];
        edges.extend(field_dependencies(app_label, &self.model_name, &self.field));
        edges
    }

    fn provides(&self, app_label: &str) -> Vec<DependencyEdge> {
        vec![DependencyEdge::created(app_label, &self.model_name).with_field(&self.field.name)]
    }

    fn deconstruct(&self) -> DjangoResult<Json> {
        operation_record(self.kind(), self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── RemoveField ─────────────────────────────────────────────────────────

/// Removes a column from an existing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveField {
    /// The model name the field is being removed from.
    pub model_name: String,
    /// The name of the field to remove.
    pub field_name: String,
}

impl Operation for RemoveField {
    fn kind(&self) -> &'static str {
        "RemoveField"
    }

    fn describe(&self) -> String {
        format!("Remove field {} from {}", self.field_name, self.model_name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> DjangoResult<()> {
        if let Some(model) = state.get_model_mut(app_label, &self.model_name) {
            model.fields.retain(|f| f.name != self.field_name);
            let key = model.key();
            state.reload_model(&key);
        }
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> DjangoResult<()> {
        let model = model_in(from_state, self.kind(), app_label, &self.model_name)?;
        let field = field_in(model, self.kind(), &self.field_name)?;
        editor.remove_field(model, field)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> DjangoResult<()> {
        let model = model_in(to_state, self.kind(), app_label, &self.model_name)?;
        let field = field_in(model, self.kind(), &self.field_name)?;
        editor.add_field(model, field)
    }

    fn provides(&self, app_label: &str) -> Vec<DependencyEdge> {
        vec![DependencyEdge::deleted(app_label, &self.model_name).with_field(&self.field_name)]
    }

    fn deconstruct(&self) -> DjangoResult<Json> {
        operation_record(self.kind(), self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── AlterField ──────────────────────────────────────────────────────────

/// Alters a column on an existing table.
///
/// An altered field counts as both the removal of its old definition and
/// the creation of its new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlterField {
    /// The model name containing the field.
    pub model_name: String,
    /// The name of the field being altered.
    pub field_name: String,
    /// The new field definition.
    pub field: MigrationFieldDef,
}

impl Operation for AlterField {
    fn kind(&self) -> &'static str {
        "AlterField"
    }

    fn describe(&self) -> String {
        format!("Alter field {} on {}", self.field_name, self.model_name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> DjangoResult<()> {
        let Some(model) = state.get_model_mut(app_label, &self.model_name) else {
            return Ok(());
        };
        if let Some(f) = model.get_field_mut(&self.field_name) {
            *f = self.field.clone();
        }
        let key = model.key();
        state.make_model_live(&key)?;
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> DjangoResult<()> {
        let old_model = model_in(from_state, self.kind(), app_label, &self.model_name)?;
        let new_model = model_in(to_state, self.kind(), app_label, &self.model_name)?;
        let old = field_in(old_model, self.kind(), &self.field_name)?;
        let new = field_in(new_model, self.kind(), &self.field.name)?;
        editor.alter_field(new_model, old, new)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> DjangoResult<()> {
        self.database_forwards(app_label, editor, from_state, to_state)
    }

    fn dependencies(&self, app_label: &str) -> Vec<DependencyEdge> {
        field_dependencies(app_label, &self.model_name, &self.field)
    }

    fn provides(&self, app_label: &str) -> Vec<DependencyEdge> {
        vec![
            DependencyEdge::deleted(app_label, &self.model_name).with_field(&self.field_name),
            DependencyEdge::created(app_label, &self.model_name).with_field(&self.field.name),
        ]
    }

    fn deconstruct(&self) -> DjangoResult<Json> {
        operation_record(self.kind(), self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── RenameField ─────────────────────────────────────────────────────────

/// Renames a column on an existing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameField {
    /// The model name containing the field.
    pub model_name: String,
    /// The old field name.
    pub old_name: String,
    /// The new field name.
    pub new_name: String,
}

impl Operation for RenameField {
    fn kind(&self) -> &'static str {
        "RenameField"
    }

    fn describe(&self) -> String {
        format!(
            "Rename field {} to {} on {}",
            self.old_name, self.new_name, self.model_name
        )
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> DjangoResult<()> {
        let Some(model) = state.get_model_mut(app_label, &self.model_name) else {
            return Ok(());
        };
        if let Some(f) = model.get_field_mut(&self.old_name) {
            if f.column == f.name {
                f.column.clone_from(&self.new_name);
            }
            f.name.clone_from(&self.new_name);
        }
        let key = model.key();
        state.reload_model(&key);
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> DjangoResult<()> {
        let old_model = model_in(from_state, self.kind(), app_label, &self.model_name)?;
        let new_model = model_in(to_state, self.kind(), app_label, &self.model_name)?;
        let old = field_in(old_model, self.kind(), &self.old_name)?;
        let new = field_in(new_model, self.kind(), &self.new_name)?;
        editor.alter_field(new_model, old, new)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> DjangoResult<()> {
        let old_model = model_in(from_state, self.kind(), app_label, &self.model_name)?;
        let new_model = model_in(to_state, self.kind(), app_label, &self.model_name)?;
        let old = field_in(old_model, self.kind(), &self.new_name)?;
        let new = field_in(new_model, self.kind(), &self.old_name)?;
        editor.alter_field(new_model, old, new)
    }

    fn provides(&self, app_label: &str) -> Vec<DependencyEdge> {
        vec![
            DependencyEdge::deleted(app_label, &self.model_name).with_field(&self.old_name),
            DependencyEdge::created(app_label, &self.model_name).with_field(&self.new_name),
        ]
    }

    fn deconstruct(&self) -> DjangoResult<Json> {
        operation_record(self.kind(), self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── RunSQL ──────────────────────────────────────────────────────────────

/// Runs raw SQL in a migration.
///
/// Both forward and backward SQL must be provided for reversibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSQL {
    /// SQL to run in the forward direction.
    pub sql_forwards: String,
    /// SQL to run in the backward direction (empty string = irreversible).
    #[serde(default)]
    pub sql_backwards: String,
    /// Positional parameters for the forward SQL.
    #[serde(default)]
    pub params: Vec<Value>,
}

impl RunSQL {
    pub fn new(sql_forwards: impl Into<String>, sql_backwards: impl Into<String>) -> Self {
        Self {
            sql_forwards: sql_forwards.into(),
            sql_backwards: sql_backwards.into(),
            params: Vec::new(),
        }
    }
}

impl Operation for RunSQL {
    fn kind(&self) -> &'static str {
        "RunSQL"
    }

    fn describe(&self) -> String {
        "Run SQL".to_string()
    }

    fn state_forwards(&self, _app_label: &str, _state: &mut ProjectState) -> DjangoResult<()> {
        Ok(())
    }

    fn database_forwards(
        &self,
        _app_label: &str,
        editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> DjangoResult<()> {
        editor.execute(&self.sql_forwards, &self.params)
    }

    fn database_backwards(
        &self,
        _app_label: &str,
        editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> DjangoResult<()> {
        if self.sql_backwards.is_empty() {
            return Err(DjangoError::MigrationError(
                "RunSQL operation is not reversible (no backwards SQL provided)".into(),
            ));
        }
        editor.execute(&self.sql_backwards, &[])
    }

    fn reversible(&self) -> bool {
        !self.sql_backwards.is_empty()
    }

    fn deconstruct(&self) -> DjangoResult<Json> {
        operation_record(self.kind(), self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::schema_editor::DatabaseSchemaEditor;
    use django_more_db::{host_namespace, Backend, DatabaseBackendType, FieldType, OnDelete};
    use django_more_patchy::PatchRegistry;

    fn editor() -> DatabaseSchemaEditor {
        let backend = Backend::load(
            &host_namespace(),
            Arc::new(PatchRegistry::new()),
            DatabaseBackendType::PostgreSQL,
        )
        .unwrap();
        DatabaseSchemaEditor::new(backend)
    }

    fn create_post() -> CreateModel {
        CreateModel {
            name: "post".into(),
            fields: vec![
                MigrationFieldDef::new("id", FieldType::BigAutoField).primary_key(),
                MigrationFieldDef::new("title", FieldType::CharField).max_length(200),
            ],
            options: ModelOptions::default(),
        }
    }

    /// Applies `op` forwards, returning the state before and after.
    fn apply(op: &dyn Operation, state: &ProjectState) -> (ProjectState, ProjectState) {
        let from = state.clone();
        let mut to = state.clone();
        op.state_forwards("blog", &mut to).unwrap();
        (from, to)
    }

    fn with_post() -> ProjectState {
        let mut state = ProjectState::new();
        create_post().state_forwards("blog", &mut state).unwrap();
        state
    }

    // ── CreateModel / DeleteModel ──

    #[test]
    fn test_create_model_forwards_and_backwards() {
        let op = create_post();
        let (from, to) = apply(&op, &ProjectState::new());
        assert!(to.get_model("blog", "post").is_some());

        let mut e = editor();
        op.database_forwards("blog", &mut e, &from, &to).unwrap();
        op.database_backwards("blog", &mut e, &to, &from).unwrap();
        assert_eq!(e.collected().len(), 2);
        assert!(e.collected()[0].sql.starts_with("CREATE TABLE \"blog_post\""));
        assert_eq!(e.collected()[1].sql, "DROP TABLE \"blog_post\" CASCADE");
    }

    #[test]
    fn test_delete_model_missing_is_error() {
        let op = DeleteModel { name: "ghost".into() };
        let err = op.state_forwards("blog", &mut ProjectState::new()).unwrap_err();
        assert!(matches!(err, DjangoError::MigrationError(_)));
    }

    #[test]
    fn test_delete_model_backwards_recreates() {
        let op = DeleteModel { name: "post".into() };
        let (from, to) = apply(&op, &with_post());
        let mut e = editor();
        op.database_backwards("blog", &mut e, &to, &from).unwrap();
        assert!(e.collected()[0].sql.starts_with("CREATE TABLE"));
    }

    // ── Fields ──

    #[test]
    fn test_add_field() {
        let op = AddField {
            model_name: "post".into(),
            field: MigrationFieldDef::new("views", FieldType::IntegerField).default(0),
        };
        let (from, to) = apply(&op, &with_post());
        assert!(to.get_model("blog", "post").unwrap().get_field("views").is_some());
        assert!(from.get_model("blog", "post").unwrap().get_field("views").is_none());

        let mut e = editor();
        op.database_forwards("blog", &mut e, &from, &to).unwrap();
        op.database_backwards("blog", &mut e, &to, &from).unwrap();
        assert_eq!(
            e.collected_sql(),
            vec![
                "ALTER TABLE \"blog_post\" ADD COLUMN \"views\" integer DEFAULT 0 NOT NULL",
                "ALTER TABLE \"blog_post\" DROP COLUMN \"views\" CASCADE",
            ]
        );
    }

    #[test]
    fn test_add_field_to_missing_model() {
        let op = AddField {
            model_name: "ghost".into(),
            field: MigrationFieldDef::new("views", FieldType::IntegerField),
        };
        assert!(op.state_forwards("blog", &mut ProjectState::new()).is_err());
    }

    #[test]
    fn test_remove_field_backwards_restores_column() {
        let op = RemoveField {
            model_name: "post".into(),
            field_name: "title".into(),
        };
        let (from, to) = apply(&op, &with_post());
        let mut e = editor();
        op.database_forwards("blog", &mut e, &from, &to).unwrap();
        op.database_backwards("blog", &mut e, &to, &from).unwrap();
        assert_eq!(
            e.collected_sql(),
            vec![
                "ALTER TABLE \"blog_post\" DROP COLUMN \"title\" CASCADE",
                "ALTER TABLE \"blog_post\" ADD COLUMN \"title\" varchar(200) NOT NULL",
            ]
        );
    }

    #[test]
    fn test_alter_field_round_trip() {
        let op = AlterField {
            model_name: "post".into(),
            field_name: "title".into(),
            field: MigrationFieldDef::new("title", FieldType::TextField),
        };
        let (from, to) = apply(&op, &with_post());
        let mut e = editor();
        op.database_forwards("blog", &mut e, &from, &to).unwrap();
        op.database_backwards("blog", &mut e, &to, &from).unwrap();
        assert_eq!(
            e.collected_sql(),
            vec![
                "ALTER TABLE \"blog_post\" ALTER COLUMN \"title\" TYPE text",
                "ALTER TABLE \"blog_post\" ALTER COLUMN \"title\" TYPE varchar(200)",
            ]
        );
    }

    #[test]
    fn test_rename_field() {
        let op = RenameField {
            model_name: "post".into(),
            old_name: "title".into(),
            new_name: "headline".into(),
        };
        let (from, to) = apply(&op, &with_post());
        let field = to.get_model("blog", "post").unwrap().get_field("headline").unwrap();
        assert_eq!(field.column, "headline");

        let mut e = editor();
        op.database_forwards("blog", &mut e, &from, &to).unwrap();
        op.database_backwards("blog", &mut e, &to, &from).unwrap();
        assert_eq!(
            e.collected_sql(),
            vec![
                "ALTER TABLE \"blog_post\" RENAME COLUMN \"title\" TO \"headline\"",
                "ALTER TABLE \"blog_post\" RENAME COLUMN \"headline\" TO \"title\"",
            ]
        );
    }

    // ── RunSQL ──

    #[test]
    fn test_run_sql() {
        let op = RunSQL::new("UPDATE t SET a = 1", "");
        assert!(!op.reversible());
        let state = ProjectState::new();
        let mut e = editor();
        op.database_forwards("blog", &mut e, &state, &state).unwrap();
        assert!(op.database_backwards("blog", &mut e, &state, &state).is_err());
        assert_eq!(e.collected_sql(), vec!["UPDATE t SET a = 1"]);
    }

    // ── Dependencies ──

    #[test]
    fn test_create_model_dependencies() {
        let op = CreateModel {
            name: "comment".into(),
            fields: vec![
                MigrationFieldDef::new(
                    "post",
                    FieldType::ForeignKey {
                        to: "blog.post".into(),
                        on_delete: OnDelete::Cascade,
                        related_name: None,
                    },
                ),
                MigrationFieldDef::new(
                    "parent",
                    FieldType::ForeignKey {
                        to: "blog.comment".into(),
                        on_delete: OnDelete::Cascade,
                        related_name: None,
                    },
                ),
                MigrationFieldDef::custom("mood", "enum", "blog_enum_mood").with_type_app_label("blog"),
            ],
            options: ModelOptions::default(),
        };
        assert_eq!(
            op.dependencies("blog"),
            vec![
                DependencyEdge::type_created("blog", "blog_enum_mood"),
                DependencyEdge::created("blog", "post"),
            ]
        );
        assert_eq!(op.provides("blog"), vec![DependencyEdge::created("blog", "comment")]);
    }

    #[test]
    fn test_add_field_dependencies() {
        let op = AddField {
            model_name: "Post".into(),
            field: MigrationFieldDef::custom("mood", "enum", "blog_enum_mood").with_type_app_label("blog"),
        };
        assert_eq!(
            op.dependencies("blog"),
            vec![
                DependencyEdge::created("blog", "post"),
                DependencyEdge::type_created("blog", "blog_enum_mood"),
            ]
        );
        assert_eq!(
            op.provides("blog"),
            vec![DependencyEdge::created("blog", "post").with_field("mood")]
        );
    }

    #[test]
    fn test_deconstruct_records_kind() {
        let record = RemoveField {
            model_name: "post".into(),
            field_name: "title".into(),
        }
        .deconstruct()
        .unwrap();
        assert_eq!(record["type"], "RemoveField");
        assert_eq!(record["field_name"], "title");
    }
}
