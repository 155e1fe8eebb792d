//! Schema editors.
//!
//! The [`SchemaEditor`] trait is what operations talk to. It is built on a
//! single primitive, [`execute`](SchemaEditor::execute), plus DDL helpers
//! rendered from the loaded backend's `sql_*` templates and column SQL
//! methods, so start-up patches on the host backend classes show up in the
//! generated statements.
//!
//! [`DatabaseSchemaEditor`] collects statements instead of sending them to
//! a server.

use std::fmt;

use serde_json::{json, Map, Value as Json};

use django_more_core::{DjangoError, DjangoResult};
use django_more_db::template::render_sql;
use django_more_db::{
    render, Backend, ColumnSpec, CustomTypeField, DatabaseFeatures, DbType, FieldType, Value,
};

use crate::state::{MigrationFieldDef, ModelState};

/// A statement passed to [`SchemaEditor::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
            write!(f, "; params=[{}]", params.join(", "))?;
        }
        Ok(())
    }
}

/// Applies schema changes for one backend.
pub trait SchemaEditor {
    fn backend(&self) -> &Backend;

    /// Runs one statement with positional parameters.
    fn execute(&mut self, sql: &str, params: &[Value]) -> DjangoResult<()>;

    fn features(&self) -> &DatabaseFeatures {
        self.backend().features()
    }

    /// Opens a transaction when the backend can roll back DDL.
    fn begin(&mut self) {}

    fn commit(&mut self) {}

    /// Discards everything executed since [`begin`](Self::begin).
    fn rollback(&mut self) {}

    fn quote_name(&self, name: &str) -> DjangoResult<String> {
        self.backend().quote_name(name)
    }

    /// Renders a `sql_*` template of the backend's schema editor.
    fn sql_template(&self, name: &str, context: &Json) -> DjangoResult<String> {
        let template = self.backend().sql(name)?;
        let empty = Map::new();
        let context = context.as_object().unwrap_or(&empty);
        Ok(render_sql(&template, context)?)
    }

    /// The column definition for `field`: type, default and constraints.
    fn column_sql(&self, field: &MigrationFieldDef) -> DjangoResult<DbType> {
        let spec = ColumnSpec {
            db_type: field_db_type(self.backend(), field)?,
            null: field.null,
            primary_key: field.primary_key,
            unique: field.unique,
            default: field.default.clone(),
        };
        self.backend().column_sql(&spec)
    }

    /// `CREATE TABLE` for `model`.
    fn create_model(&mut self, model: &ModelState) -> DjangoResult<()> {
        let mut definitions = Vec::new();
        let mut params = Vec::new();
        let mut constraints = Vec::new();

        for field in &model.fields {
            let (sql, field_params) = self.column_sql(field)?.into_parts();
            definitions.push(format!("{} {sql}", self.quote_name(&field.column)?));
            params.extend(field_params);
            if let Some(fk) = self.foreign_key_sql(field)? {
                constraints.push(fk);
            }
        }
        for group in &model.options.unique_together {
            let columns = group
                .iter()
                .map(|name| {
                    let column = model.get_field(name).map_or(name.as_str(), |f| f.column.as_str());
                    self.quote_name(column)
                })
                .collect::<DjangoResult<Vec<_>>>()?;
            constraints.push(format!("UNIQUE ({})", columns.join(", ")));
        }
        definitions.extend(constraints);

        let sql = self.sql_template(
            "sql_create_table",
            &json!({
                "table": self.quote_name(&model.db_table())?,
                "definition": definitions.join(", "),
            }),
        )?;
        self.execute(&sql, &params)
    }

    /// `DROP TABLE` for `model`.
    fn delete_model(&mut self, model: &ModelState) -> DjangoResult<()> {
        let sql = self.sql_template(
            "sql_delete_table",
            &json!({ "table": self.quote_name(&model.db_table())? }),
        )?;
        self.execute(&sql, &[])
    }

    /// `ADD COLUMN` for `field`.
    fn add_field(&mut self, model: &ModelState, field: &MigrationFieldDef) -> DjangoResult<()> {
        let (mut definition, params) = self.column_sql(field)?.into_parts();
        if let Some(fk) = self.foreign_key_sql(field)? {
            definition = format!("{definition}, ADD {fk}");
        }
        let sql = self.sql_template(
            "sql_create_column",
            &json!({
                "table": self.quote_name(&model.db_table())?,
                "column": self.quote_name(&field.column)?,
                "definition": definition,
            }),
        )?;
        self.execute(&sql, &params)
    }

    /// `DROP COLUMN` for `field`.
    fn remove_field(&mut self, model: &ModelState, field: &MigrationFieldDef) -> DjangoResult<()> {
        let sql = self.sql_template(
            "sql_delete_column",
            &json!({
                "table": self.quote_name(&model.db_table())?,
                "column": self.quote_name(&field.column)?,
            }),
        )?;
        self.execute(&sql, &[])
    }

    /// Changes a column from `old` to `new`: renames it, then alters its
    /// type and nullability as needed.
    fn alter_field(
        &mut self,
        model: &ModelState,
        old: &MigrationFieldDef,
        new: &MigrationFieldDef,
    ) -> DjangoResult<()> {
        let table = self.quote_name(&model.db_table())?;
        if old.column != new.column {
            let sql = self.sql_template(
                "sql_rename_column",
                &json!({
                    "table": table,
                    "old_column": self.quote_name(&old.column)?,
                    "new_column": self.quote_name(&new.column)?,
                }),
            )?;
            self.execute(&sql, &[])?;
        }

        let old_type = field_db_type(self.backend(), old)?;
        let new_type = field_db_type(self.backend(), new)?;
        if old_type != new_type {
            let (changes, params) = self
                .backend()
                .alter_column_type_sql(&new.column, &new_type)?
                .into_parts();
            let sql = self.sql_template(
                "sql_alter_column",
                &json!({ "table": table, "changes": changes }),
            )?;
            self.execute(&sql, &params)?;
        }

        if old.null != new.null {
            let fragment = if new.null {
                "sql_alter_column_null"
            } else {
                "sql_alter_column_not_null"
            };
            let changes =
                self.sql_template(fragment, &json!({ "column": self.quote_name(&new.column)? }))?;
            let sql = self.sql_template(
                "sql_alter_column",
                &json!({ "table": table, "changes": changes }),
            )?;
            self.execute(&sql, &[])?;
        }
        Ok(())
    }

    /// The `FOREIGN KEY` clause for a relation field.
    fn foreign_key_sql(&self, field: &MigrationFieldDef) -> DjangoResult<Option<String>> {
        let FieldType::ForeignKey { to, on_delete, .. } = &field.field_type else {
            return Ok(None);
        };
        let sql = self.sql_template(
            "sql_create_fk",
            &json!({
                "column": self.quote_name(&field.column)?,
                "to_table": self.quote_name(&to.replace('.', "_").to_lowercase())?,
                "to_column": self.quote_name("id")?,
                "on_delete": on_delete.sql(),
            }),
        )?;
        Ok(Some(sql))
    }
}

/// The column type of `field` on `backend`.
///
/// Built-in field types render the backend's `data_types` entry; custom
/// type columns go through [`CustomTypeField::db_type`].
pub fn field_db_type(backend: &Backend, field: &MigrationFieldDef) -> DjangoResult<DbType> {
    if field.is_custom_type() {
        return field.db_type(backend, field.max_length);
    }
    let key = field.field_type.data_type_key();
    let template = backend.data_type(key).ok_or_else(|| {
        DjangoError::ConfigurationError(format!(
            "{} backend has no data type for '{key}'",
            backend.vendor()
        ))
    })?;
    let mut context = Map::new();
    context.insert("max_length".into(), json!(field.max_length.unwrap_or(255)));
    Ok(render(template, &context)?)
}

// ── Collecting editor ───────────────────────────────────────────────────

/// A schema editor that records statements rather than running them.
///
/// Transactions are honoured when the backend can roll back DDL: a
/// rollback drops the statements collected since the matching `begin`.
#[derive(Debug, Clone)]
pub struct DatabaseSchemaEditor {
    backend: Backend,
    collected: Vec<Statement>,
    savepoints: Vec<usize>,
}

impl DatabaseSchemaEditor {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            collected: Vec::new(),
            savepoints: Vec::new(),
        }
    }

    /// Statements executed so far.
    pub fn collected(&self) -> &[Statement] {
        &self.collected
    }

    /// The SQL text of every statement executed so far.
    pub fn collected_sql(&self) -> Vec<&str> {
        self.collected.iter().map(|s| s.sql.as_str()).collect()
    }

    /// Drains the collected statements.
    pub fn take_collected(&mut self) -> Vec<Statement> {
        std::mem::take(&mut self.collected)
    }

    pub fn in_transaction(&self) -> bool {
        !self.savepoints.is_empty()
    }
}

impl SchemaEditor for DatabaseSchemaEditor {
    fn backend(&self) -> &Backend {
        &self.backend
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> DjangoResult<()> {
        let statement = Statement::new(sql, params.to_vec());
        tracing::debug!("{} schema: {}", self.backend.vendor(), statement);
        self.collected.push(statement);
        Ok(())
    }

    fn begin(&mut self) {
        if self.backend.features().can_rollback_ddl {
            self.savepoints.push(self.collected.len());
        }
    }

    fn commit(&mut self) {
        self.savepoints.pop();
    }

    fn rollback(&mut self) {
        if let Some(mark) = self.savepoints.pop() {
            tracing::warn!(
                "Rolling back {} {} statements",
                self.collected.len() - mark,
                self.backend.vendor()
            );
            self.collected.truncate(mark);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use django_more_db::{host_namespace, patch_types, DatabaseBackendType, OnDelete};
    use django_more_patchy::{PatchRegistry, Patcher};

    fn editor(backend_type: DatabaseBackendType, patched: bool) -> DatabaseSchemaEditor {
        let ns = host_namespace();
        let registry = Arc::new(PatchRegistry::new());
        if patched {
            patch_types(&Patcher::new(&ns, &registry)).unwrap();
        }
        DatabaseSchemaEditor::new(Backend::load(&ns, registry, backend_type).unwrap())
    }

    fn pg() -> DatabaseSchemaEditor {
        editor(DatabaseBackendType::PostgreSQL, false)
    }

    fn post() -> ModelState {
        ModelState::new(
            "blog",
            "post",
            vec![
                MigrationFieldDef::new("id", FieldType::BigAutoField).primary_key(),
                MigrationFieldDef::new("title", FieldType::CharField).max_length(200),
            ],
        )
    }

    // ── Column types ──

    #[test]
    fn test_field_db_type_builtin() {
        let e = pg();
        let f = MigrationFieldDef::new("title", FieldType::CharField).max_length(80);
        assert_eq!(field_db_type(e.backend(), &f).unwrap().sql(), "varchar(80)");
        let f = MigrationFieldDef::new("body", FieldType::TextField);
        assert_eq!(field_db_type(e.backend(), &f).unwrap().sql(), "text");
    }

    #[test]
    fn test_custom_column_needs_patch() {
        let f = MigrationFieldDef::custom("state", "enum", "blog_enum_state").with_type_app_label("blog");
        let err = field_db_type(pg().backend(), &f).unwrap_err();
        assert!(matches!(err, DjangoError::ImproperlyConfigured(_)));

        let patched = editor(DatabaseBackendType::PostgreSQL, true);
        let f = f.max_length(12);
        assert_eq!(field_db_type(patched.backend(), &f).unwrap().sql(), "varchar(12)");
    }

    #[test]
    fn test_column_sql_constraints() {
        let e = pg();
        let f = MigrationFieldDef::new("slug", FieldType::CharField)
            .max_length(50)
            .unique()
            .default("draft");
        assert_eq!(
            e.column_sql(&f).unwrap().sql(),
            "varchar(50) DEFAULT 'draft' NOT NULL UNIQUE"
        );
    }

    // ── DDL ──

    #[test]
    fn test_create_model() {
        let mut e = pg();
        e.create_model(&post()).unwrap();
        assert_eq!(
            e.collected_sql(),
            vec![
                "CREATE TABLE \"blog_post\" (\"id\" bigserial PRIMARY KEY, \"title\" varchar(200) NOT NULL)"
            ]
        );
    }

    #[test]
    fn test_create_model_with_fk_and_unique_together() {
        let mut e = pg();
        let mut model = ModelState::new(
            "blog",
            "comment",
            vec![
                MigrationFieldDef::new("id", FieldType::BigAutoField).primary_key(),
                MigrationFieldDef::new(
                    "post",
                    FieldType::ForeignKey {
                        to: "blog.post".into(),
                        on_delete: OnDelete::Cascade,
                        related_name: None,
                    },
                )
                .column("post_id"),
                MigrationFieldDef::new("rank", FieldType::IntegerField),
            ],
        );
        model.options.unique_together = vec![vec!["post".into(), "rank".into()]];
        e.create_model(&model).unwrap();
        let sql = &e.collected()[0].sql;
        assert!(sql.contains(
            "FOREIGN KEY (\"post_id\") REFERENCES \"blog_post\" (\"id\") ON DELETE CASCADE"
        ));
        assert!(sql.contains("UNIQUE (\"post_id\", \"rank\")"));
    }

    #[test]
    fn test_delete_model() {
        let mut e = pg();
        e.delete_model(&post()).unwrap();
        assert_eq!(e.collected_sql(), vec!["DROP TABLE \"blog_post\" CASCADE"]);
    }

    #[test]
    fn test_add_and_remove_field() {
        let mut e = pg();
        let field = MigrationFieldDef::new("views", FieldType::IntegerField).default(0);
        e.add_field(&post(), &field).unwrap();
        e.remove_field(&post(), &field).unwrap();
        assert_eq!(
            e.collected_sql(),
            vec![
                "ALTER TABLE \"blog_post\" ADD COLUMN \"views\" integer DEFAULT 0 NOT NULL",
                "ALTER TABLE \"blog_post\" DROP COLUMN \"views\" CASCADE",
            ]
        );
    }

    #[test]
    fn test_alter_field() {
        let mut e = pg();
        let old = MigrationFieldDef::new("title", FieldType::CharField).max_length(200);
        let new = MigrationFieldDef::new("title", FieldType::TextField)
            .column("headline")
            .nullable();
        e.alter_field(&post(), &old, &new).unwrap();
        assert_eq!(
            e.collected_sql(),
            vec![
                "ALTER TABLE \"blog_post\" RENAME COLUMN \"title\" TO \"headline\"",
                "ALTER TABLE \"blog_post\" ALTER COLUMN \"headline\" TYPE text",
                "ALTER TABLE \"blog_post\" ALTER COLUMN \"headline\" DROP NOT NULL",
            ]
        );
    }

    #[test]
    fn test_mysql_alter_field_type() {
        let mut e = editor(DatabaseBackendType::MySQL, false);
        let old = MigrationFieldDef::new("title", FieldType::CharField).max_length(200);
        let new = MigrationFieldDef::new("title", FieldType::TextField);
        e.alter_field(&post(), &old, &new).unwrap();
        assert_eq!(
            e.collected_sql(),
            vec!["ALTER TABLE `blog_post` MODIFY `title` longtext"]
        );
    }

    // ── Transactions ──

    #[test]
    fn test_rollback_discards_statements() {
        let mut e = pg();
        e.execute("SELECT 1", &[]).unwrap();
        e.begin();
        assert!(e.in_transaction());
        e.execute("SELECT 2", &[]).unwrap();
        e.rollback();
        assert_eq!(e.collected_sql(), vec!["SELECT 1"]);
    }

    #[test]
    fn test_mysql_has_no_ddl_transactions() {
        let mut e = editor(DatabaseBackendType::MySQL, false);
        e.begin();
        assert!(!e.in_transaction());
        e.execute("SELECT 1", &[]).unwrap();
        e.rollback();
        assert_eq!(e.collected().len(), 1);
    }

    #[test]
    fn test_statement_display() {
        let s = Statement::new("CREATE TYPE t AS ENUM (%s)", vec![Value::from("a")]);
        assert_eq!(s.to_string(), "CREATE TYPE t AS ENUM (%s); params=[a]");
    }
}
