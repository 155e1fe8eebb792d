//! Start-up patches teaching the host backends about enum types.
//!
//! Every backend gets `has_enum` and `requires_enum_declaration` flags
//! (false unless overridden) and the row statements used when enum values
//! are removed. PostgreSQL declares enum types and gets the `CREATE TYPE`
//! family of templates; MySQL renders `enum(...)` columns inline.

use serde_json::json;

use django_more_core::{DjangoResult, Settings};
use django_more_db::backends::BACKENDS_ROOT;
use django_more_db::{patch_types, DatabaseBackendType};
use django_more_patchy::{ClassRef, Module, Patcher};

use crate::enum_def::ENUM_CATEGORY;

/// Module holding the enum patch sources.
pub const ENUM_PATCHES: &str = "django_more.enum.patches";

/// Whether [`patch_enum`] has been applied to the host namespace.
pub fn enum_patched(patcher: &Patcher<'_>) -> bool {
    patcher
        .namespace()
        .resolve_class("django.db.backends.base.schema.BaseDatabaseSchemaEditor", None)
        .ok()
        .is_some_and(|class| class.get("sql_enum_delete_rows").is_some())
}

/// Installs enum support on the backends of the configured vendors.
///
/// Applies [`patch_types`] first if needed. Returns `false` when the enum
/// patches were already applied.
pub fn patch_enum(patcher: &Patcher<'_>, settings: &Settings) -> DjangoResult<bool> {
    if enum_patched(patcher) {
        tracing::debug!("Enum patches already applied");
        return Ok(false);
    }
    patch_types(patcher)?;

    let vendors: Vec<DatabaseBackendType> = settings
        .database_vendors()
        .iter()
        .filter_map(|vendor| DatabaseBackendType::from_vendor(vendor))
        .collect();
    tracing::info!("Applying enum patches for {:?}", vendors);

    patcher.namespace().register(enum_patch_module());
    let p = patcher.target_root(BACKENDS_ROOT).source_root(ENUM_PATCHES);

    p.cls("base.features.BaseDatabaseFeatures", Some("BaseFeatures"))?
        .auto()?;
    p.cls("base.schema.BaseDatabaseSchemaEditor", Some("BaseSchemaEditor"))?
        .auto()?;

    for vendor in vendors {
        match vendor {
            DatabaseBackendType::PostgreSQL => {
                p.cls("postgresql.features.DatabaseFeatures", Some("PostgresFeatures"))?
                    .auto()?;
                p.cls("postgresql.base.DatabaseWrapper", Some("PostgresWrapper"))?
                    .merge(&["data_types"])?;
                p.cls("postgresql.schema.DatabaseSchemaEditor", Some("PostgresSchemaEditor"))?
                    .auto()?;
            }
            DatabaseBackendType::MySQL => {
                p.cls("mysql.features.DatabaseFeatures", Some("MySQLFeatures"))?
                    .auto()?;
                p.cls("mysql.base.DatabaseWrapper", Some("MySQLWrapper"))?
                    .merge(&["data_types"])?;
            }
            // enum columns stay text
            DatabaseBackendType::SQLite => {}
        }
    }
    Ok(true)
}

fn features(name: &str, has_enum: bool, requires_declaration: bool) -> ClassRef {
    ClassRef::builder(name, ENUM_PATCHES)
        .attr("has_enum", has_enum)
        .attr("requires_enum_declaration", requires_declaration)
        .finish()
}

fn enum_patch_module() -> Module {
    let base_schema = ClassRef::builder("BaseSchemaEditor", ENUM_PATCHES)
        .attr(
            "sql_enum_delete_rows",
            "DELETE FROM %(table)s WHERE %(column)s IN (%(values)s)",
        )
        .attr(
            "sql_enum_update_rows",
            "UPDATE %(table)s SET %(column)s = %(value)s WHERE %(column)s IN (%(values)s)",
        )
        .finish();

    let pg_wrapper = ClassRef::builder("PostgresWrapper", ENUM_PATCHES)
        .attr("data_types", json!({ ENUM_CATEGORY: "%(type_name)s" }))
        .finish();
    let pg_schema = ClassRef::builder("PostgresSchemaEditor", ENUM_PATCHES)
        .attr("sql_create_enum", "CREATE TYPE %(enum_type)s AS ENUM (%(values)s)")
        .attr("sql_delete_enum", "DROP TYPE %(enum_type)s")
        .attr(
            "sql_alter_enum",
            "ALTER TYPE %(enum_type)s ADD VALUE %(value)s %(condition)s",
        )
        .attr("sql_rename_enum", "ALTER TYPE %(old_type)s RENAME TO %(enum_type)s")
        .attr(
            "sql_alter_column_type_using",
            "ALTER COLUMN %(column)s TYPE %(type)s USING (%(column)s::text::%(type)s)",
        )
        .attr(
            "sql_enum_protect",
            "DO $$ BEGIN IF EXISTS (SELECT 1 FROM %(table)s WHERE %(column)s IN (%(values)s)) \
             THEN RAISE EXCEPTION 'removed enum values are still in use'; END IF; END $$",
        )
        .finish();

    let mysql_wrapper = ClassRef::builder("MySQLWrapper", ENUM_PATCHES)
        .attr("data_types", json!({ ENUM_CATEGORY: "enum(%(values)s)" }))
        .finish();

    Module::new(ENUM_PATCHES)
        .with_class(features("BaseFeatures", false, false))
        .with_class(base_schema)
        .with_class(features("PostgresFeatures", true, true))
        .with_class(pg_wrapper)
        .with_class(pg_schema)
        .with_class(features("MySQLFeatures", true, false))
        .with_class(mysql_wrapper)
}
