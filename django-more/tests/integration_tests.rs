//! End-to-end tests through the facade: settings from TOML, start-up,
//! making migrations into a directory and applying them per database.

use std::path::Path;

use django_more::core::settings_loader::from_toml_str;
use django_more::core::Settings;
use django_more::db::{FieldType, TypeDef};
use django_more::enums::EnumDef;
use django_more::migrations::{
    MigrationFieldDef, MigrationLoader, ModelState, NonInteractiveQuestioner, ProjectState,
};
use django_more::{setup, Runtime};

fn settings(dir: &Path) -> Settings {
    from_toml_str(&format!(
        r#"
        log_level = "debug"

        [databases.default]
        engine = "django.db.backends.postgresql"
        name = "shop"

        [databases.legacy]
        engine = "django.db.backends.mysql"

        [migrations]
        migrations_dir = "{}"

        [migrations.questioner_defaults]
        ask_rename_enum = true
        "#,
        dir.display()
    ))
    .unwrap()
}

fn status(db_type: &str, values: &[&str]) -> TypeDef {
    EnumDef::new("Order.Status", "shop.models", values.iter().map(|v| (v.to_uppercase(), *v)))
        .unwrap()
        .with_db_type(db_type)
        .into_type_def()
}

fn shop_state(def: &TypeDef) -> ProjectState {
    let mut state = ProjectState::new();
    state.add_model(ModelState::new(
        "shop",
        "order",
        vec![
            MigrationFieldDef::new("id", FieldType::BigAutoField).primary_key(),
            MigrationFieldDef::custom("status", "enum", "")
                .with_type_app_label("shop")
                .with_type_def(def.clone(), None)
                .unwrap(),
        ],
    ));
    state
}

fn apply_all(runtime: &Runtime, alias: &str) -> Vec<String> {
    let mut loader = runtime.loader();
    let graph = loader.load().unwrap();
    let migrations = loader.build_migrations(runtime.operations()).unwrap();
    let mut executor = runtime.executor(alias).unwrap();
    let plan = executor.make_plan(&graph, None).unwrap();
    executor.execute_plan(&plan, &graph, &migrations).unwrap();
    executor.editor().collected_sql().into_iter().map(String::from).collect()
}

// ── Start-up ────────────────────────────────────────────────────────────

#[test]
fn test_setup_from_toml() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = setup(settings(dir.path())).unwrap();
    assert!(runtime.apps().is_installed("django_types"));
    assert!(runtime.apps().is_installed("django_enum"));
    assert!(runtime.patch_registry().is_frozen());
    assert!(runtime.operations().contains("CreateEnum"));
    assert!(runtime.operations().contains("AlterEnum"));

    assert!(runtime.backend("default").unwrap().features().has_enum);
    let legacy = runtime.backend("legacy").unwrap();
    assert!(legacy.features().has_enum);
    assert!(!legacy.features().requires_enum_declaration);
}

#[test]
fn test_sqlite_gets_no_enum_support() {
    let runtime = setup(Settings::default()).unwrap();
    let backend = runtime.backend("default").unwrap();
    assert!(backend.features().supports_custom_types);
    assert!(!backend.features().has_enum);
}

// ── Making and applying migrations ──────────────────────────────────────

#[test]
fn test_make_and_apply_migrations() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = setup(settings(dir.path())).unwrap();

    let def = status("shop_status", &["open", "paid"]);
    let mut questioner = NonInteractiveQuestioner::default();
    let written = runtime.make_migrations(shop_state(&def), &mut questioner).unwrap();
    assert_eq!(written.len(), 1);
    assert!(written[0].ends_with("shop/0001_initial.json"));
    assert!(written[0].exists());

    let again = runtime.make_migrations(shop_state(&def), &mut questioner).unwrap();
    assert!(again.is_empty(), "history on disk should match the models");

    let pg = apply_all(&runtime, "default");
    assert_eq!(pg[0], "CREATE TYPE shop_status AS ENUM (%s, %s)");
    let mysql = apply_all(&runtime, "legacy");
    assert_eq!(mysql.len(), 1);
}

#[test]
fn test_configured_rename_answer() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = setup(settings(dir.path())).unwrap();
    let mut questioner = runtime.questioner();

    let before = status("shop_status", &["open", "paid"]);
    runtime.make_migrations(shop_state(&before), questioner.as_mut()).unwrap();
    let after = status("shop_state", &["open", "paid"]);
    let written = runtime.make_migrations(shop_state(&after), questioner.as_mut()).unwrap();
    assert_eq!(written.len(), 1);
    let name = written[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("0002_auto_"), "unexpected file {name}");

    let contents = std::fs::read_to_string(&written[0]).unwrap();
    assert!(contents.contains("RenameEnum"));
    assert!(!contents.contains("CreateEnum"));

    let state = runtime.project_state().unwrap();
    assert!(state.has_type("shop_state"));
    assert!(!state.has_type("shop_status"));

    let mut loader = MigrationLoader::new(dir.path());
    let graph = loader.load().unwrap();
    assert_eq!(graph.leaf_nodes("shop").len(), 1);
}

#[test]
fn test_empty_history() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = setup(settings(&dir.path().join("missing"))).unwrap();
    let state = runtime.project_state().unwrap();
    assert!(state.models.is_empty());
}
