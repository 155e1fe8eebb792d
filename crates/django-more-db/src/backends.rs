//! The host backend class tree and the loaded view of one backend.
//!
//! [`host_namespace`] builds the patchable surface that start-up patches
//! are applied to: the base features, wrapper and schema editor classes
//! under `django.db.backends.base`, plus one lazily imported module set per
//! vendor. [`Backend::load`] reads a vendor's classes after patching and
//! keeps a live schema editor instance for the column SQL methods.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Value as Json};

use django_more_core::{DjangoError, DjangoResult};
use django_more_patchy::{
    Attr, Call, ClassRef, Instance, Method, Module, Namespace, PatchError, PatchRegistry,
};

use crate::template::{render_sql, DbType};
use crate::value::Value;

/// Root of the host's backend modules.
pub const BACKENDS_ROOT: &str = "django.db.backends";

/// Supported database vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DatabaseBackendType {
    PostgreSQL,
    SQLite,
    MySQL,
}

impl DatabaseBackendType {
    pub const ALL: [Self; 3] = [Self::PostgreSQL, Self::SQLite, Self::MySQL];

    /// The vendor name reported by the connection wrapper.
    pub const fn vendor(self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgresql",
            Self::SQLite => "sqlite",
            Self::MySQL => "mysql",
        }
    }

    /// The module name under `django.db.backends`.
    pub const fn module(self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgresql",
            Self::SQLite => "sqlite3",
            Self::MySQL => "mysql",
        }
    }

    /// Accepts vendor names and backend module names.
    pub fn from_vendor(name: &str) -> Option<Self> {
        match name {
            "postgresql" | "postgres" | "postgresql_psycopg2" => Some(Self::PostgreSQL),
            "sqlite" | "sqlite3" => Some(Self::SQLite),
            "mysql" => Some(Self::MySQL),
            _ => None,
        }
    }
}

impl fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.vendor())
    }
}

/// Capability flags of a loaded backend. Flags missing from the features
/// class read as `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseFeatures {
    pub can_rollback_ddl: bool,
    pub supports_custom_types: bool,
    pub has_enum: bool,
    pub requires_enum_declaration: bool,
}

impl DatabaseFeatures {
    fn from_class(class: &ClassRef) -> Self {
        let flag = |name: &str| class.get(name).and_then(|attr| attr.as_bool()).unwrap_or(false);
        Self {
            can_rollback_ddl: flag("can_rollback_ddl"),
            supports_custom_types: flag("supports_custom_types"),
            has_enum: flag("has_enum"),
            requires_enum_declaration: flag("requires_enum_declaration"),
        }
    }
}

/// What `column_sql` needs to know about a column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub db_type: DbType,
    pub null: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub default: Option<Value>,
}

impl ColumnSpec {
    pub fn new(db_type: DbType) -> Self {
        Self {
            db_type,
            null: false,
            primary_key: false,
            unique: false,
            default: None,
        }
    }

    /// Plain-string types go across as strings so unpatched hosts accept
    /// them; parameterized types go across in object form.
    fn to_json(&self) -> Json {
        json!({
            "type": type_json(&self.db_type),
            "null": self.null,
            "primary_key": self.primary_key,
            "unique": self.unique,
            "default": self.default.as_ref().map(Value::to_json),
        })
    }
}

fn type_json(db_type: &DbType) -> Json {
    if db_type.is_parameterized() {
        db_type.to_json()
    } else {
        Json::String(db_type.sql().to_string())
    }
}

// ── Host class tree ─────────────────────────────────────────────────────

/// Builds the host backend namespace.
///
/// Base modules are registered eagerly. Vendor modules are registered as
/// lazy loaders and are only built when something imports them.
pub fn host_namespace() -> Namespace {
    let namespace = Namespace::new();

    let features = ClassRef::builder("BaseDatabaseFeatures", "django.db.backends.base.features")
        .attr("can_rollback_ddl", false)
        .finish();
    let wrapper = ClassRef::builder("BaseDatabaseWrapper", "django.db.backends.base.base")
        .attr("vendor", "unknown")
        .attr("data_types", Attr::Map(Map::new()))
        .finish();
    let schema = base_schema_editor();

    namespace.register(Module::new("django.db.backends.base.features").with_class(features.clone()));
    namespace.register(Module::new("django.db.backends.base.base").with_class(wrapper.clone()));
    namespace.register(Module::new("django.db.backends.base.schema").with_class(schema.clone()));

    for backend_type in DatabaseBackendType::ALL {
        register_vendor(&namespace, backend_type, &features, &wrapper, &schema);
    }
    namespace
}

fn register_vendor(
    namespace: &Namespace,
    backend_type: DatabaseBackendType,
    features: &ClassRef,
    wrapper: &ClassRef,
    schema: &ClassRef,
) {
    let root = format!("{BACKENDS_ROOT}.{}", backend_type.module());

    let path = format!("{root}.features");
    let base = features.clone();
    let module_path = path.clone();
    namespace.register_lazy(path, move || {
        let class = ClassRef::builder("DatabaseFeatures", &module_path)
            .base(&base)
            .attr(
                "can_rollback_ddl",
                backend_type != DatabaseBackendType::MySQL,
            )
            .finish();
        Ok(Module::new(&module_path).with_class(class))
    });

    let path = format!("{root}.base");
    let base = wrapper.clone();
    let module_path = path.clone();
    namespace.register_lazy(path, move || {
        let class = ClassRef::builder("DatabaseWrapper", &module_path)
            .base(&base)
            .attr("vendor", backend_type.vendor())
            .attr("data_types", Attr::Map(vendor_data_types(backend_type)))
            .finish();
        Ok(Module::new(&module_path).with_class(class))
    });

    let path = format!("{root}.schema");
    let base = schema.clone();
    let module_path = path.clone();
    namespace.register_lazy(path, move || {
        let mut builder = ClassRef::builder("DatabaseSchemaEditor", &module_path).base(&base);
        if backend_type == DatabaseBackendType::MySQL {
            builder = builder
                .method(Method::instance("quote_name", |call, args| {
                    let name = str_arg(call, args, 0)?;
                    Ok(Json::String(quote_with(name, '`')))
                }))
                .attr("sql_alter_column_type", "MODIFY %(column)s %(type)s");
        }
        Ok(Module::new(&module_path).with_class(builder.finish()))
    });
}

fn vendor_data_types(backend_type: DatabaseBackendType) -> Map<String, Json> {
    let entries: &[(&str, &str)] = match backend_type {
        DatabaseBackendType::PostgreSQL => &[
            ("AutoField", "serial"),
            ("BigAutoField", "bigserial"),
            ("CharField", "varchar(%(max_length)s)"),
            ("TextField", "text"),
            ("IntegerField", "integer"),
            ("BigIntegerField", "bigint"),
            ("FloatField", "double precision"),
            ("BooleanField", "boolean"),
            ("DateField", "date"),
            ("DateTimeField", "timestamp with time zone"),
            ("UuidField", "uuid"),
            ("JsonField", "jsonb"),
            ("ForeignKey", "bigint"),
        ],
        DatabaseBackendType::SQLite => &[
            ("AutoField", "integer"),
            ("BigAutoField", "integer"),
            ("CharField", "varchar(%(max_length)s)"),
            ("TextField", "text"),
            ("IntegerField", "integer"),
            ("BigIntegerField", "bigint"),
            ("FloatField", "real"),
            ("BooleanField", "bool"),
            ("DateField", "date"),
            ("DateTimeField", "datetime"),
            ("UuidField", "char(32)"),
            ("JsonField", "text"),
            ("ForeignKey", "bigint"),
        ],
        DatabaseBackendType::MySQL => &[
            ("AutoField", "integer AUTO_INCREMENT"),
            ("BigAutoField", "bigint AUTO_INCREMENT"),
            ("CharField", "varchar(%(max_length)s)"),
            ("TextField", "longtext"),
            ("IntegerField", "integer"),
            ("BigIntegerField", "bigint"),
            ("FloatField", "double precision"),
            ("BooleanField", "bool"),
            ("DateField", "date"),
            ("DateTimeField", "datetime(6)"),
            ("UuidField", "char(32)"),
            ("JsonField", "json"),
            ("ForeignKey", "bigint"),
        ],
    };
    entries
        .iter()
        .map(|(key, template)| ((*key).to_string(), Json::String((*template).to_string())))
        .collect()
}

fn base_schema_editor() -> ClassRef {
    ClassRef::builder("BaseDatabaseSchemaEditor", "django.db.backends.base.schema")
        .attr("sql_create_table", "CREATE TABLE %(table)s (%(definition)s)")
        .attr("sql_delete_table", "DROP TABLE %(table)s CASCADE")
        .attr(
            "sql_create_column",
            "ALTER TABLE %(table)s ADD COLUMN %(column)s %(definition)s",
        )
        .attr(
            "sql_delete_column",
            "ALTER TABLE %(table)s DROP COLUMN %(column)s CASCADE",
        )
        .attr(
            "sql_rename_column",
            "ALTER TABLE %(table)s RENAME COLUMN %(old_column)s TO %(new_column)s",
        )
        .attr("sql_alter_column", "ALTER TABLE %(table)s %(changes)s")
        .attr("sql_alter_column_type", "ALTER COLUMN %(column)s TYPE %(type)s")
        .attr("sql_alter_column_null", "ALTER COLUMN %(column)s DROP NOT NULL")
        .attr("sql_alter_column_not_null", "ALTER COLUMN %(column)s SET NOT NULL")
        .attr(
            "sql_create_fk",
            "FOREIGN KEY (%(column)s) REFERENCES %(to_table)s (%(to_column)s) ON DELETE %(on_delete)s",
        )
        .method(Method::instance("quote_name", |call, args| {
            let name = str_arg(call, args, 0)?;
            Ok(Json::String(quote_with(name, '"')))
        }))
        .method(Method::instance("column_sql", |call, args| {
            let spec = object_arg(call, args, 0)?;
            let Some(mut sql) = spec.get("type").and_then(Json::as_str).map(str::to_string) else {
                return Err(PatchError::call(
                    call.method().qualname(),
                    "column type must be a plain SQL string",
                ));
            };
            if let Some(default) = spec.get("default").filter(|d| !d.is_null()) {
                sql.push_str(" DEFAULT ");
                sql.push_str(&sql_literal(default));
            }
            sql.push_str(&column_constraints_sql(spec));
            Ok(json!({ "sql": sql, "params": [] }))
        }))
        .method(Method::instance("_alter_column_type_sql", |call, args| {
            let column = str_arg(call, args, 0)?;
            let Some(new_type) = args.get(1).and_then(Json::as_str) else {
                return Err(PatchError::call(
                    call.method().qualname(),
                    "column type must be a plain SQL string",
                ));
            };
            let sql = alter_column_type(call, column, new_type)?;
            Ok(json!({ "sql": sql, "params": [] }))
        }))
        .finish()
}

// ── Helpers shared with the custom type patches ─────────────────────────

pub(crate) fn str_arg<'a>(call: &Call<'_>, args: &'a [Json], index: usize) -> Result<&'a str, PatchError> {
    args.get(index).and_then(Json::as_str).ok_or_else(|| {
        PatchError::call(
            call.method().qualname(),
            format!("argument {index} must be a string"),
        )
    })
}

pub(crate) fn object_arg<'a>(
    call: &Call<'_>,
    args: &'a [Json],
    index: usize,
) -> Result<&'a Map<String, Json>, PatchError> {
    args.get(index).and_then(Json::as_object).ok_or_else(|| {
        PatchError::call(
            call.method().qualname(),
            format!("argument {index} must be an object"),
        )
    })
}

/// Renders `sql_alter_column_type` on the receiver for `column`.
pub(crate) fn alter_column_type(
    call: &Call<'_>,
    column: &str,
    new_type: &str,
) -> Result<String, PatchError> {
    let template = call.get("sql_alter_column_type")?;
    let Some(template) = template.as_str() else {
        return Err(PatchError::call(
            call.method().qualname(),
            "sql_alter_column_type is not a string",
        ));
    };
    let quoted = call.call_method("quote_name", &[json!(column)])?;
    let mut context = Map::new();
    context.insert("column".into(), quoted);
    context.insert("type".into(), json!(new_type));
    render_sql(template, &context)
        .map_err(|err| PatchError::call(call.method().qualname(), err.to_string()))
}

/// ` PRIMARY KEY`, ` NULL` or ` NOT NULL`, then ` UNIQUE` when asked.
pub(crate) fn column_constraints_sql(spec: &Map<String, Json>) -> String {
    let flag = |name: &str| spec.get(name).and_then(Json::as_bool).unwrap_or(false);
    let mut sql = String::new();
    if flag("primary_key") {
        sql.push_str(" PRIMARY KEY");
    } else if flag("null") {
        sql.push_str(" NULL");
    } else {
        sql.push_str(" NOT NULL");
    }
    if flag("unique") && !flag("primary_key") {
        sql.push_str(" UNIQUE");
    }
    sql
}

fn quote_with(name: &str, quote: char) -> String {
    if name.starts_with(quote) && name.ends_with(quote) && name.len() > 1 {
        name.to_string()
    } else {
        format!("{quote}{name}{quote}")
    }
}

fn sql_literal(value: &Json) -> String {
    match value {
        Json::Null => "NULL".to_string(),
        Json::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Json::Number(n) => n.to_string(),
        Json::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

// ── Loaded backend ──────────────────────────────────────────────────────

/// One vendor's backend as seen after start-up patching.
#[derive(Debug, Clone)]
pub struct Backend {
    backend_type: DatabaseBackendType,
    features: DatabaseFeatures,
    data_types: BTreeMap<String, String>,
    editor: Instance,
    registry: Arc<PatchRegistry>,
}

impl Backend {
    /// Imports the vendor modules and reads their classes.
    pub fn load(
        namespace: &Namespace,
        registry: Arc<PatchRegistry>,
        backend_type: DatabaseBackendType,
    ) -> DjangoResult<Self> {
        let root = format!("{BACKENDS_ROOT}.{}", backend_type.module());
        let features = namespace.resolve_class(&format!("{root}.features.DatabaseFeatures"), None)?;
        let wrapper = namespace.resolve_class(&format!("{root}.base.DatabaseWrapper"), None)?;
        let editor = namespace.resolve_class(&format!("{root}.schema.DatabaseSchemaEditor"), None)?;

        let backend = Self {
            backend_type,
            features: DatabaseFeatures::from_class(&features),
            data_types: inherited_data_types(&wrapper),
            editor: editor.instantiate(),
            registry,
        };
        tracing::debug!(
            "Loaded {} backend: {:?}, {} data types",
            backend_type,
            backend.features,
            backend.data_types.len()
        );
        Ok(backend)
    }

    pub const fn backend_type(&self) -> DatabaseBackendType {
        self.backend_type
    }

    pub const fn vendor(&self) -> &'static str {
        self.backend_type.vendor()
    }

    pub const fn features(&self) -> &DatabaseFeatures {
        &self.features
    }

    pub const fn data_types(&self) -> &BTreeMap<String, String> {
        &self.data_types
    }

    pub fn data_type(&self, key: &str) -> Option<&str> {
        self.data_types.get(key).map(String::as_str)
    }

    /// A `sql_*` template from the schema editor class.
    pub fn sql(&self, name: &str) -> DjangoResult<String> {
        match self.editor.class().get(name) {
            Some(attr) => attr.as_str().map(str::to_string).ok_or_else(|| {
                DjangoError::ConfigurationError(format!(
                    "{} schema editor attribute '{name}' is a {}, not a template",
                    self.vendor(),
                    attr.kind()
                ))
            }),
            None => Err(DjangoError::ConfigurationError(format!(
                "{} schema editor has no template '{name}'",
                self.vendor()
            ))),
        }
    }

    pub fn has_sql(&self, name: &str) -> bool {
        self.editor.class().get(name).is_some()
    }

    /// Calls a schema editor method.
    pub fn call(&self, method: &str, args: &[Json]) -> DjangoResult<Json> {
        Ok(self.editor.call(&self.registry, method, args)?)
    }

    pub fn quote_name(&self, name: &str) -> DjangoResult<String> {
        let quoted = self.call("quote_name", &[json!(name)])?;
        quoted
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DjangoError::DatabaseError(format!("quote_name returned {quoted}")))
    }

    /// The column definition for `spec`.
    pub fn column_sql(&self, spec: &ColumnSpec) -> DjangoResult<DbType> {
        let result = self.call("column_sql", &[spec.to_json()])?;
        DbType::from_json(&result)
            .ok_or_else(|| DjangoError::DatabaseError(format!("column_sql returned {result}")))
    }

    /// The `ALTER COLUMN .. TYPE ..` fragment for `column`.
    pub fn alter_column_type_sql(&self, column: &str, db_type: &DbType) -> DjangoResult<DbType> {
        let result = self.call(
            "_alter_column_type_sql",
            &[json!(column), type_json(db_type)],
        )?;
        DbType::from_json(&result).ok_or_else(|| {
            DjangoError::DatabaseError(format!("_alter_column_type_sql returned {result}"))
        })
    }
}

/// `data_types` merged down the MRO, nearest class winning per key.
fn inherited_data_types(class: &ClassRef) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    for class in class.mro().iter().rev() {
        if let Some(Attr::Map(map)) = class.own("data_types") {
            for (key, value) in map {
                if let Some(template) = value.as_str() {
                    merged.insert(key, template.to_string());
                }
            }
        }
    }
    merged
}

/// The loaded backends for every configured database vendor.
pub fn load_backends(
    namespace: &Namespace,
    registry: &Arc<PatchRegistry>,
    vendors: &[String],
) -> DjangoResult<BTreeMap<DatabaseBackendType, Backend>> {
    vendors
        .iter()
        .map(|vendor| {
            let backend_type = DatabaseBackendType::from_vendor(vendor).ok_or_else(|| {
                DjangoError::ImproperlyConfigured(format!("unsupported database vendor '{vendor}'"))
            })?;
            Backend::load(namespace, registry.clone(), backend_type).map(|b| (backend_type, b))
        })
        .collect()
}
