//! Migration operations for enum types.
//!
//! Backends that declare enum types (`requires_enum_declaration`) get
//! `CREATE TYPE`, `DROP TYPE` and `ALTER TYPE` statements. Backends with
//! inline enum columns only need their columns re-rendered when values
//! change, and backends without enums store enum columns as text, so the
//! statements are skipped there.

use std::any::Any;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};

use django_more_core::{DjangoError, DjangoResult};
use django_more_db::{render, CustomTypeField, DependencyEdge, TypeDef};
use django_more_migrations::{
    field_db_type, operation_record, MigrationFieldDef, ModelState, Operation, OperationRegistry,
    ProjectState, SchemaEditor,
};

use crate::enum_def::EnumDef;

/// Registers the enum operation kinds so history replay can rebuild them.
pub fn register_operations(registry: &mut OperationRegistry) {
    registry.register::<CreateEnum>("CreateEnum");
    registry.register::<RemoveEnum>("RemoveEnum");
    registry.register::<RenameEnum>("RenameEnum");
    registry.register::<AlterEnum>("AlterEnum");
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// Renders a backend template, list parameters becoming placeholders, and
/// runs it.
fn execute_template(editor: &mut dyn SchemaEditor, name: &str, context: &Json) -> DjangoResult<()> {
    let template = editor.backend().sql(name)?;
    let empty = Map::new();
    let (sql, params) = render(&template, context.as_object().unwrap_or(&empty))?.into_parts();
    editor.execute(sql.trim_end(), &params)
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn enum_in<'s>(state: &'s ProjectState, operation: &str, type_name: &str) -> DjangoResult<&'s TypeDef> {
    state
        .get_type(type_name)
        .ok_or_else(|| DjangoError::type_not_found(operation, type_name))
}

fn as_enum<'d>(def: &'d TypeDef, operation: &str, type_name: &str) -> DjangoResult<&'d EnumDef> {
    EnumDef::downcast(def).ok_or_else(|| {
        DjangoError::MigrationError(format!("{operation}: type '{type_name}' is not an enum"))
    })
}

/// The app a type belongs to in `state`, defaulting to `app_label`.
fn owner(state: &ProjectState, type_name: &str, app_label: &str) -> String {
    state
        .type_app_label(type_name)
        .unwrap_or(app_label)
        .to_string()
}

/// Every column whose type is `type_name`.
fn columns_using<'s>(
    state: &'s ProjectState,
    type_name: &str,
) -> Vec<(&'s ModelState, &'s MigrationFieldDef)> {
    state
        .fields_with_type(type_name)
        .into_iter()
        .filter_map(|((app, model), field)| {
            let model = state.get_model(&app, &model)?;
            Some((model, model.get_field(&field)?))
        })
        .collect()
}

// ── RemovalPolicy ───────────────────────────────────────────────────────

/// What happens to rows holding a value removed from an enum.
///
/// Serializes as `CASCADE`, `PROTECT`, `SET_NULL`, `SET_DEFAULT`,
/// `SET(value)` or `DO_NOTHING`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RemovalPolicy {
    /// Delete the rows.
    Cascade,
    /// Refuse to migrate while such rows exist.
    Protect,
    SetNull,
    /// Set the column's default.
    SetDefault,
    /// Set an explicit value.
    Set(String),
    DoNothing,
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cascade => f.write_str("CASCADE"),
            Self::Protect => f.write_str("PROTECT"),
            Self::SetNull => f.write_str("SET_NULL"),
            Self::SetDefault => f.write_str("SET_DEFAULT"),
            Self::Set(value) => write!(f, "SET({value})"),
            Self::DoNothing => f.write_str("DO_NOTHING"),
        }
    }
}

impl FromStr for RemovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_uppercase().as_str() {
            "CASCADE" => Ok(Self::Cascade),
            "PROTECT" => Ok(Self::Protect),
            "SET_NULL" => Ok(Self::SetNull),
            "SET_DEFAULT" => Ok(Self::SetDefault),
            "DO_NOTHING" => Ok(Self::DoNothing),
            upper if upper.starts_with("SET(") && upper.ends_with(')') => {
                Ok(Self::Set(s[4..s.len() - 1].to_string()))
            }
            _ => Err(format!("unknown removal policy '{s}'")),
        }
    }
}

impl From<RemovalPolicy> for String {
    fn from(policy: RemovalPolicy) -> Self {
        policy.to_string()
    }
}

impl TryFrom<String> for RemovalPolicy {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ── CreateEnum ──────────────────────────────────────────────────────────

/// Declares a new enum type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEnum {
    pub db_type: String,
    /// Stored values, in order.
    pub values: Vec<String>,
}

impl CreateEnum {
    pub fn new<I, V>(db_type: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            db_type: db_type.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

impl Operation for CreateEnum {
    fn kind(&self) -> &'static str {
        "CreateEnum"
    }

    fn describe(&self) -> String {
        format!("Create enum type {}", self.db_type)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> DjangoResult<()> {
        if state.has_type(&self.db_type) {
            return Err(DjangoError::type_already_exists(self.kind(), &self.db_type));
        }
        let def = EnumDef::functional(app_label, &self.db_type, self.values.iter().cloned())?;
        state.add_type(&self.db_type, def.into_type_def(), Some(app_label));
        Ok(())
    }

    fn database_forwards(
        &self,
        _app_label: &str,
        editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> DjangoResult<()> {
        if !editor.features().requires_enum_declaration {
            return Ok(());
        }
        execute_template(
            editor,
            "sql_create_enum",
            &json!({ "enum_type": self.db_type, "values": self.values }),
        )
    }

    fn database_backwards(
        &self,
        _app_label: &str,
        editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> DjangoResult<()> {
        if !editor.features().requires_enum_declaration {
            return Ok(());
        }
        execute_template(editor, "sql_delete_enum", &json!({ "enum_type": self.db_type }))
    }

    fn provides(&self, app_label: &str) -> Vec<DependencyEdge> {
        vec![DependencyEdge::type_created(app_label, &self.db_type)]
    }

    fn deconstruct(&self) -> DjangoResult<Json> {
        operation_record(self.kind(), self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── RemoveEnum ──────────────────────────────────────────────────────────

/// A column that used a type when it was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    pub app_label: String,
    pub model_name: String,
    pub field_name: String,
}

/// Drops an enum type.
///
/// Runs after the columns listed in `fields` are gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveEnum {
    pub db_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldRef>,
}

impl RemoveEnum {
    pub fn new(db_type: impl Into<String>) -> Self {
        Self {
            db_type: db_type.into(),
            fields: Vec::new(),
        }
    }
}

impl Operation for RemoveEnum {
    fn kind(&self) -> &'static str {
        "RemoveEnum"
    }

    fn describe(&self) -> String {
        format!("Remove enum type {}", self.db_type)
    }

    fn state_forwards(&self, _app_label: &str, state: &mut ProjectState) -> DjangoResult<()> {
        if !state.has_type(&self.db_type) {
            return Err(DjangoError::type_not_found(self.kind(), &self.db_type));
        }
        state.remove_type(&self.db_type)?;
        Ok(())
    }

    fn database_forwards(
        &self,
        _app_label: &str,
        editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> DjangoResult<()> {
        if !editor.features().requires_enum_declaration {
            return Ok(());
        }
        execute_template(editor, "sql_delete_enum", &json!({ "enum_type": self.db_type }))
    }

    fn database_backwards(
        &self,
        _app_label: &str,
        editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> DjangoResult<()> {
        if !editor.features().requires_enum_declaration {
            return Ok(());
        }
        let def = enum_in(to_state, self.kind(), &self.db_type)?;
        let values = as_enum(def, self.kind(), &self.db_type)?.stored_values();
        execute_template(
            editor,
            "sql_create_enum",
            &json!({ "enum_type": self.db_type, "values": values }),
        )
    }

    fn dependencies(&self, _app_label: &str) -> Vec<DependencyEdge> {
        self.fields
            .iter()
            .map(|f| DependencyEdge::deleted(&f.app_label, &f.model_name).with_field(&f.field_name))
            .collect()
    }

    fn provides(&self, app_label: &str) -> Vec<DependencyEdge> {
        vec![DependencyEdge::type_deleted(app_label, &self.db_type)]
    }

    fn deconstruct(&self) -> DjangoResult<Json> {
        operation_record(self.kind(), self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── RenameEnum ──────────────────────────────────────────────────────────

/// Renames an enum type and repoints the columns using it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameEnum {
    pub old_type: String,
    pub new_type: String,
}

impl RenameEnum {
    pub fn new(old_type: impl Into<String>, new_type: impl Into<String>) -> Self {
        Self {
            old_type: old_type.into(),
            new_type: new_type.into(),
        }
    }

    /// The same rename in the other direction.
    #[must_use]
    pub fn swapped(&self) -> Self {
        Self::new(&self.new_type, &self.old_type)
    }
}

impl Operation for RenameEnum {
    fn kind(&self) -> &'static str {
        "RenameEnum"
    }

    fn describe(&self) -> String {
        format!("Rename enum type {} to {}", self.old_type, self.new_type)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> DjangoResult<()> {
        let def = enum_in(state, self.kind(), &self.old_type)?;
        if state.has_type(&self.new_type) {
            return Err(DjangoError::type_already_exists(self.kind(), &self.new_type));
        }
        let renamed = as_enum(def, self.kind(), &self.old_type)?
            .clone()
            .with_db_type(&self.new_type)
            .into_type_def();
        // the renamed type belongs to the app the rename runs in
        state.remove_type(&self.old_type)?;
        state.add_type(&self.new_type, renamed.clone(), Some(app_label));
        state.update_fields_with_type(&self.old_type, |field| {
            field.set_type_def(renamed.clone(), None)
        })?;
        Ok(())
    }

    /// Renames the type, then points every column of the renamed type in
    /// `to_state` at its new name.
    fn database_forwards(
        &self,
        _app_label: &str,
        editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> DjangoResult<()> {
        if !editor.features().requires_enum_declaration {
            return Ok(());
        }
        execute_template(
            editor,
            "sql_rename_enum",
            &json!({ "old_type": self.old_type, "enum_type": self.new_type }),
        )?;
        for (model, field) in columns_using(to_state, &self.new_type) {
            let table = editor.quote_name(&model.db_table())?;
            let changes = editor.sql_template(
                "sql_alter_column_type",
                &json!({ "column": editor.quote_name(&field.column)?, "type": self.new_type }),
            )?;
            let sql = editor.sql_template(
                "sql_alter_column",
                &json!({ "table": table, "changes": changes }),
            )?;
            editor.execute(&sql, &[])?;
        }
        Ok(())
    }

    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> DjangoResult<()> {
        self.swapped()
            .database_forwards(app_label, editor, from_state, to_state)
    }

    fn provides(&self, app_label: &str) -> Vec<DependencyEdge> {
        vec![
            DependencyEdge::type_created(app_label, &self.new_type),
            DependencyEdge::type_deleted(app_label, &self.old_type),
        ]
    }

    fn deconstruct(&self) -> DjangoResult<Json> {
        operation_record(self.kind(), self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── AlterEnum ───────────────────────────────────────────────────────────

/// Adds and removes values of an enum type.
///
/// Rows holding a removed value are dealt with by `on_delete` first; with
/// no policy the columns' own definitions decide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlterEnum {
    pub db_type: String,
    #[serde(default)]
    pub add_values: Vec<String>,
    #[serde(default)]
    pub remove_values: Vec<String>,
    #[serde(default)]
    pub on_delete: Option<RemovalPolicy>,
}

impl AlterEnum {
    pub fn new(db_type: impl Into<String>) -> Self {
        Self {
            db_type: db_type.into(),
            add_values: Vec::new(),
            remove_values: Vec::new(),
            on_delete: None,
        }
    }

    #[must_use]
    pub fn add_values<I: IntoIterator<Item = S>, S: Into<String>>(mut self, values: I) -> Self {
        self.add_values.extend(values.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn remove_values<I: IntoIterator<Item = S>, S: Into<String>>(mut self, values: I) -> Self {
        self.remove_values.extend(values.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn on_delete(mut self, policy: Option<RemovalPolicy>) -> Self {
        self.on_delete = policy;
        self
    }

    /// The opposite alteration, without a removal policy.
    #[must_use]
    pub fn inverse(&self) -> Self {
        Self {
            db_type: self.db_type.clone(),
            add_values: self.remove_values.clone(),
            remove_values: self.add_values.clone(),
            on_delete: None,
        }
    }

    fn apply_policy(
        &self,
        editor: &mut dyn SchemaEditor,
        policy: &RemovalPolicy,
        model: &ModelState,
        field: &MigrationFieldDef,
    ) -> DjangoResult<()> {
        let table = editor.quote_name(&model.db_table())?;
        let column = editor.quote_name(&field.column)?;
        let removed = &self.remove_values;
        match policy {
            RemovalPolicy::DoNothing => Ok(()),
            RemovalPolicy::Cascade => execute_template(
                editor,
                "sql_enum_delete_rows",
                &json!({ "table": table, "column": column, "values": removed }),
            ),
            RemovalPolicy::SetNull => execute_template(
                editor,
                "sql_enum_update_rows",
                &json!({ "table": table, "column": column, "value": "NULL", "values": removed }),
            ),
            RemovalPolicy::SetDefault => {
                let default = field.default.as_ref().ok_or_else(|| {
                    DjangoError::MigrationError(format!(
                        "{}: {}.{} has no default to set removed values of '{}' to",
                        self.kind(),
                        model.name,
                        field.name,
                        self.db_type
                    ))
                })?;
                execute_template(
                    editor,
                    "sql_enum_update_rows",
                    &json!({
                        "table": table,
                        "column": column,
                        "value": [default.to_json()],
                        "values": removed,
                    }),
                )
            }
            RemovalPolicy::Set(value) => execute_template(
                editor,
                "sql_enum_update_rows",
                &json!({ "table": table, "column": column, "value": [value], "values": removed }),
            ),
            RemovalPolicy::Protect => {
                // Inline enum columns are protected by the column change
                // itself: MODIFY fails on rows holding a removed value.
                if !editor.backend().has_sql("sql_enum_protect") {
                    return Ok(());
                }
                let values: Vec<String> = removed.iter().map(|v| quote_literal(v)).collect();
                execute_template(
                    editor,
                    "sql_enum_protect",
                    &json!({ "table": table, "column": column, "values": values.join(", ") }),
                )
            }
        }
    }

    /// Recreates the declared type with the values of `to_state` and moves
    /// every column over to it.
    fn rebuild_type(&self, editor: &mut dyn SchemaEditor, to_state: &ProjectState) -> DjangoResult<()> {
        let def = enum_in(to_state, self.kind(), &self.db_type)?;
        let values = as_enum(def, self.kind(), &self.db_type)?.stored_values();
        let old_type = format!("{}__old", self.db_type);

        execute_template(
            editor,
            "sql_rename_enum",
            &json!({ "old_type": self.db_type, "enum_type": old_type }),
        )?;
        execute_template(
            editor,
            "sql_create_enum",
            &json!({ "enum_type": self.db_type, "values": values }),
        )?;
        for (model, field) in columns_using(to_state, &self.db_type) {
            let table = editor.quote_name(&model.db_table())?;
            let changes = editor.sql_template(
                "sql_alter_column_type_using",
                &json!({ "column": editor.quote_name(&field.column)?, "type": self.db_type }),
            )?;
            let sql = editor.sql_template(
                "sql_alter_column",
                &json!({ "table": table, "changes": changes }),
            )?;
            editor.execute(&sql, &[])?;
        }
        execute_template(editor, "sql_delete_enum", &json!({ "enum_type": old_type }))
    }

    /// Re-renders every inline enum column of the type from `to_state`.
    fn alter_columns(&self, editor: &mut dyn SchemaEditor, to_state: &ProjectState) -> DjangoResult<()> {
        for (model, field) in columns_using(to_state, &self.db_type) {
            let new_type = field_db_type(editor.backend(), field)?;
            let (changes, params) = editor
                .backend()
                .alter_column_type_sql(&field.column, &new_type)?
                .into_parts();
            let sql = editor.sql_template(
                "sql_alter_column",
                &json!({ "table": editor.quote_name(&model.db_table())?, "changes": changes }),
            )?;
            editor.execute(&sql, &params)?;
        }
        Ok(())
    }
}

impl Operation for AlterEnum {
    fn kind(&self) -> &'static str {
        "AlterEnum"
    }

    fn describe(&self) -> String {
        format!(
            "Alter enum type {}: add {:?}, remove {:?}",
            self.db_type, self.add_values, self.remove_values
        )
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> DjangoResult<()> {
        let def = enum_in(state, self.kind(), &self.db_type)?;
        let altered = as_enum(def, self.kind(), &self.db_type)?
            .altered(&self.add_values, &self.remove_values)?
            .into_type_def();
        let owner = owner(state, &self.db_type, app_label);

        state.add_type(&self.db_type, altered.clone(), Some(&owner));
        state.update_fields_with_type(&self.db_type, |field| {
            field.set_type_def(altered.clone(), None)
        })?;
        Ok(())
    }

    fn database_forwards(
        &self,
        _app_label: &str,
        editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> DjangoResult<()> {
        let features = *editor.features();
        if !features.has_enum {
            return Ok(());
        }
        if let (Some(policy), false) = (&self.on_delete, self.remove_values.is_empty()) {
            for (model, field) in columns_using(from_state, &self.db_type) {
                self.apply_policy(editor, policy, model, field)?;
            }
        }

        if !features.requires_enum_declaration {
            return self.alter_columns(editor, to_state);
        }
        if self.remove_values.is_empty() {
            for value in &self.add_values {
                execute_template(
                    editor,
                    "sql_alter_enum",
                    &json!({
                        "enum_type": self.db_type,
                        "value": quote_literal(value),
                        "condition": "",
                    }),
                )?;
            }
            return Ok(());
        }
        self.rebuild_type(editor, to_state)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> DjangoResult<()> {
        self.inverse()
            .database_forwards(app_label, editor, from_state, to_state)
    }

    fn deconstruct(&self) -> DjangoResult<Json> {
        operation_record(self.kind(), self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
