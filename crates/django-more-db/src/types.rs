//! Custom database types.
//!
//! A custom type is a named, database-level type (an enumeration, for
//! example) that model fields can be declared against. Definitions
//! implement [`CustomType`]; fields that use them implement
//! [`CustomTypeField`], which is what the migration state and autodetector
//! work with. [`patch_types`] installs support for parameterized column
//! types on the host backend classes.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};

use django_more_core::{AppRegistry, DjangoError, DjangoResult};
use django_more_patchy::{AutoOptions, Call, ClassRef, Method, Module, PatchError, Patcher};

use crate::backends::{
    alter_column_type, column_constraints_sql, object_arg, str_arg, Backend, BACKENDS_ROOT,
};
use crate::template::{render, DbType};
use crate::value::Value;

/// Module the custom type patches are sourced from.
pub const TYPES_PATCHES: &str = "django_more.types.patches";

/// A custom type definition.
///
/// Definitions are immutable values shared by reference between state
/// snapshots.
pub trait CustomType: Send + Sync + fmt::Debug {
    /// Kind of type, e.g. `"enum"`. Used in default type names and as the
    /// backend `data_types` key.
    fn category(&self) -> &str;

    /// Qualified name of the definition within its module.
    fn qualname(&self) -> &str;

    /// Dotted path of the module declaring the definition.
    fn module_path(&self) -> &str;

    /// A type name declared on the definition itself.
    fn explicit_type_name(&self) -> Option<&str> {
        None
    }

    /// An app label declared on the definition itself.
    fn explicit_app_label(&self) -> Option<&str> {
        None
    }

    /// Stored values, in declaration order.
    fn values(&self) -> Vec<Value>;

    /// Extra `data_types` template parameters for this definition.
    fn db_type_parameters(&self, _backend: &Backend) -> Map<String, Json> {
        Map::new()
    }

    fn deconstruct(&self) -> Json;

    fn as_any(&self) -> &dyn Any;
}

/// A shared custom type definition.
pub type TypeDef = Arc<dyn CustomType>;

/// The resolved name and owning app of a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeIdentity {
    pub type_name: String,
    pub app_label: String,
}

/// `{app_label}_{category}_{qualname}`, lowercased, dots replaced.
///
/// # Examples
///
/// ```
/// use django_more_db::types::default_type_name;
///
/// assert_eq!(default_type_name("shop", "enum", "Order.Status"), "shop_enum_order_status");
/// ```
pub fn default_type_name(app_label: &str, category: &str, qualname: &str) -> String {
    format!(
        "{app_label}_{}_{}",
        category.to_lowercase(),
        qualname.to_lowercase()
    )
    .replace('.', "_")
}

/// Works out the type name and app label of `def`.
///
/// An explicit app label wins; otherwise `fallback_label`, then the app
/// whose name contains the definition's module.
pub fn resolve_type_identity(
    def: &dyn CustomType,
    fallback_label: Option<&str>,
    apps: Option<&AppRegistry>,
) -> DjangoResult<TypeIdentity> {
    let app_label = match (def.explicit_app_label(), fallback_label) {
        (Some(label), _) | (None, Some(label)) => label.to_string(),
        (None, None) => apps
            .and_then(|apps| apps.get_containing_app_config(def.module_path()))
            .map(|app| app.label().to_string())
            .ok_or_else(|| {
                DjangoError::ImproperlyConfigured(format!(
                    "type definition {}.{} doesn't declare an explicit app_label, \
                     and isn't in an application in INSTALLED_APPS",
                    def.module_path(),
                    def.qualname()
                ))
            })?,
    };
    let type_name = def.explicit_type_name().map_or_else(
        || default_type_name(&app_label, def.category(), def.qualname()),
        str::to_string,
    );
    Ok(TypeIdentity {
        type_name,
        app_label,
    })
}

// ── Dependencies ────────────────────────────────────────────────────────

/// What a [`DependencyEdge`] points at. Models and custom types live in
/// separate name spaces, so a type named like a model never satisfies
/// that model's edges.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EdgeTarget {
    #[default]
    Model,
    Type,
}

/// An ordering constraint between schema operations.
///
/// Depends on `owner_label.object_name` (and `field_name`, when set) having
/// been created (`created == true`) or deleted beforehand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub owner_label: String,
    pub object_name: String,
    pub field_name: Option<String>,
    pub created: bool,
    #[serde(default)]
    pub target: EdgeTarget,
}

impl DependencyEdge {
    pub fn created(owner_label: impl Into<String>, object_name: impl AsRef<str>) -> Self {
        Self {
            owner_label: owner_label.into(),
            object_name: object_name.as_ref().to_lowercase(),
            field_name: None,
            created: true,
            target: EdgeTarget::Model,
        }
    }

    pub fn deleted(owner_label: impl Into<String>, object_name: impl AsRef<str>) -> Self {
        Self {
            created: false,
            ..Self::created(owner_label, object_name)
        }
    }

    /// Custom type `type_name` of `owner_label` has been created.
    pub fn type_created(owner_label: impl Into<String>, type_name: impl AsRef<str>) -> Self {
        Self {
            target: EdgeTarget::Type,
            ..Self::created(owner_label, type_name)
        }
    }

    pub fn type_deleted(owner_label: impl Into<String>, type_name: impl AsRef<str>) -> Self {
        Self {
            target: EdgeTarget::Type,
            ..Self::deleted(owner_label, type_name)
        }
    }

    #[must_use]
    pub fn with_field(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }
}

impl fmt::Display for DependencyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.target == EdgeTarget::Type {
            f.write_str("type ")?;
        }
        write!(f, "{}.{}", self.owner_label, self.object_name)?;
        if let Some(field) = &self.field_name {
            write!(f, ".{field}")?;
        }
        f.write_str(if self.created { " (created)" } else { " (deleted)" })
    }
}

/// Uniform dependency declaration for anything field-like.
pub trait FieldDependencies {
    fn has_dependencies(&self) -> bool {
        false
    }

    fn get_dependencies(&self) -> Vec<DependencyEdge> {
        Vec::new()
    }
}

// ── Fields ──────────────────────────────────────────────────────────────

/// Somewhere custom type definitions can be looked up by type name.
pub trait TypeLookup {
    fn lookup_type(&self, type_name: &str) -> Option<TypeDef>;
}

impl TypeLookup for BTreeMap<String, TypeDef> {
    fn lookup_type(&self, type_name: &str) -> Option<TypeDef> {
        self.get(type_name).cloned()
    }
}

/// A model field whose column is a custom database type.
///
/// A field is *detached* when only its type name is known (it was rebuilt
/// from migration history) and *live* once a definition is attached.
pub trait CustomTypeField {
    fn category(&self) -> &str;

    fn type_name(&self) -> &str;

    fn type_app_label(&self) -> Option<&str>;

    fn type_def(&self) -> Option<&TypeDef>;

    /// Attaches a live definition. The definition's own metadata decides
    /// the type name and app label when it has any.
    fn set_type_def(&mut self, def: TypeDef, apps: Option<&AppRegistry>) -> DjangoResult<()>;

    fn is_live(&self) -> bool {
        self.type_def().is_some()
    }

    /// Resolves a detached field against `types`. Returns whether a
    /// definition was attached.
    fn make_live(&mut self, types: &dyn TypeLookup) -> DjangoResult<bool> {
        if self.is_live() {
            return Ok(false);
        }
        match types.lookup_type(self.type_name()) {
            Some(def) => {
                self.set_type_def(def, None)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The edge on the creation of this field's type.
    fn type_dependency(&self) -> Option<DependencyEdge> {
        self.type_app_label()
            .map(|label| DependencyEdge::type_created(label, self.type_name()))
    }

    /// Renders the column type from the backend's `data_types`, keyed by
    /// category and falling back to the `custom` entry.
    fn db_type(&self, backend: &Backend, max_length: Option<usize>) -> DjangoResult<DbType> {
        if !backend.features().supports_custom_types {
            return Err(DjangoError::ImproperlyConfigured(format!(
                "{} backend has no custom type support; column type '{}' needs patch_types",
                backend.vendor(),
                self.type_name()
            )));
        }
        let template = backend
            .data_type(self.category())
            .or_else(|| backend.data_type("custom"))
            .ok_or_else(|| {
                DjangoError::ConfigurationError(format!(
                    "{} backend has no data type for '{}' columns",
                    backend.vendor(),
                    self.category()
                ))
            })?;

        let mut context = Map::new();
        context.insert("type_name".into(), json!(self.type_name()));
        let values = self.type_def().map(|def| def.values()).unwrap_or_default();
        let longest = values.iter().map(|v| v.to_string().len()).max().unwrap_or(1);
        context.insert("max_length".into(), json!(max_length.unwrap_or(longest)));
        if let Some(def) = self.type_def() {
            context.extend(def.db_type_parameters(backend));
        }
        Ok(render(template, &context)?)
    }
}

// ── Start-up patches ────────────────────────────────────────────────────

/// Whether [`patch_types`] has been applied to this namespace.
pub fn types_patched(patcher: &Patcher<'_>) -> bool {
    patcher
        .namespace()
        .resolve_class("django.db.backends.base.features.BaseDatabaseFeatures", None)
        .ok()
        .and_then(|class| class.get("supports_custom_types"))
        .and_then(|attr| attr.as_bool())
        .unwrap_or(false)
}

/// Installs custom type support on the host backend classes.
///
/// Marks the base features with `supports_custom_types`, adds the
/// `custom` fallback data type and teaches the base schema editor to
/// handle parameterized column types. Returns `false` when already applied.
pub fn patch_types(patcher: &Patcher<'_>) -> DjangoResult<bool> {
    if types_patched(patcher) {
        tracing::debug!("Custom type patches already applied");
        return Ok(false);
    }
    tracing::info!("Applying custom type patches");

    patcher.namespace().register(types_patch_module());
    let p = patcher.target_root(BACKENDS_ROOT).source_root(TYPES_PATCHES);

    p.cls("base.features.BaseDatabaseFeatures", None)?.auto()?;
    p.cls("base.base.BaseDatabaseWrapper", None)?
        .merge(&["data_types"])?;
    p.cls("base.schema.BaseDatabaseSchemaEditor", None)?
        .auto_with(&AutoOptions::new().allow(["_alter_column_type_sql"]))?;
    Ok(true)
}

fn types_patch_module() -> Module {
    let features = ClassRef::builder("BaseDatabaseFeatures", TYPES_PATCHES)
        .attr("supports_custom_types", true)
        .finish();

    let wrapper = ClassRef::builder("BaseDatabaseWrapper", TYPES_PATCHES)
        .attr("data_types", json!({ "custom": "varchar(%(max_length)s)" }))
        .finish();

    let schema = ClassRef::builder("BaseDatabaseSchemaEditor", TYPES_PATCHES)
        .method(Method::instance("column_sql_parameterized", |call, args| {
            args.first()
                .and_then(DbType::from_json)
                .map(|db_type| db_type.to_json())
                .ok_or_else(|| PatchError::call(call.method().qualname(), "not a column type"))
        }))
        .method(Method::instance("column_sql", |call, args| {
            let spec = object_arg(call, args, 0)?;
            let column_type = spec.get("type").cloned().unwrap_or(Json::Null);
            if column_type.is_string() {
                return call.invoke_previous(args);
            }
            let db_type = parameterized(call, column_type)?;
            let (mut sql, mut params) = db_type.into_parts();
            if let Some(default) = spec.get("default").filter(|d| !d.is_null()) {
                sql.push_str(" DEFAULT %s");
                params.push(Value::from_json(default));
            }
            sql.push_str(&column_constraints_sql(spec));
            Ok(DbType::with_params(sql, params).to_json())
        }))
        .method(Method::instance("_alter_column_type_sql", |call, args| {
            let column = str_arg(call, args, 0)?;
            let new_type = args.get(1).cloned().unwrap_or(Json::Null);
            if new_type.is_string() {
                return call.invoke_previous(args);
            }
            let db_type = parameterized(call, new_type)?;
            let sql = alter_column_type(call, column, db_type.sql())?;
            Ok(DbType::with_params(sql, db_type.params().to_vec()).to_json())
        }))
        .finish();

    Module::new(TYPES_PATCHES)
        .with_class(features)
        .with_class(wrapper)
        .with_class(schema)
}

fn parameterized(
    call: &Call<'_>,
    column_type: Json,
) -> Result<DbType, PatchError> {
    let normalized = call.call_method("column_sql_parameterized", &[column_type])?;
    DbType::from_json(&normalized)
        .ok_or_else(|| PatchError::call(call.method().qualname(), "not a column type"))
}
