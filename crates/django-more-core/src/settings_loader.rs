//! Settings loading from configuration files.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (overriding defaults).
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `DJANGO_DEBUG` | `debug` |
//! | `DJANGO_LOG_LEVEL` | `log_level` |
//! | `DJANGO_INSTALLED_APPS` | `installed_apps` (comma-separated) |
//! | `DJANGO_MIGRATIONS_INTERACTIVE` | `migrations.interactive` |
//! | `DJANGO_MIGRATIONS_DIR` | `migrations.migrations_dir` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use django_more_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file_with_env("config/settings.toml").unwrap();
//! ```

use std::path::{Path, PathBuf};

use crate::error::DjangoError;
use crate::settings::Settings;

/// Loads settings from a TOML string. Missing fields keep their defaults.
pub fn from_toml_str(toml_str: &str) -> Result<Settings, DjangoError> {
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| DjangoError::ConfigurationError(format!("Failed to parse TOML: {e}")))?;
    from_json_value(toml_to_json(toml_value), "TOML")
}

/// Loads settings from a TOML file.
pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Settings, DjangoError> {
    from_toml_str(&read(path.as_ref(), "TOML")?)
}

/// Loads settings from a TOML file and then applies environment overrides.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> Result<Settings, DjangoError> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a JSON string. Missing fields keep their defaults.
pub fn from_json_str(json_str: &str) -> Result<Settings, DjangoError> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| DjangoError::ConfigurationError(format!("Failed to parse JSON: {e}")))?;
    from_json_value(json_value, "JSON")
}

/// Loads settings from a JSON file.
pub fn from_json_file(path: impl AsRef<Path>) -> Result<Settings, DjangoError> {
    from_json_str(&read(path.as_ref(), "JSON")?)
}

/// Loads settings from a JSON file and then applies environment overrides.
pub fn from_json_file_with_env(path: impl AsRef<Path>) -> Result<Settings, DjangoError> {
    let mut settings = from_json_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from just environment variables (starting from defaults).
pub fn from_env() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies `DJANGO_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(val) = std::env::var("DJANGO_DEBUG") {
        settings.debug = parse_flag(&val);
    }

    if let Ok(val) = std::env::var("DJANGO_LOG_LEVEL") {
        settings.log_level = val;
    }

    if let Ok(val) = std::env::var("DJANGO_INSTALLED_APPS") {
        settings.installed_apps = val
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    if let Ok(val) = std::env::var("DJANGO_MIGRATIONS_INTERACTIVE") {
        settings.migrations.interactive = parse_flag(&val);
    }

    if let Ok(val) = std::env::var("DJANGO_MIGRATIONS_DIR") {
        settings.migrations.migrations_dir = PathBuf::from(val);
    }
}

/// Deep-merges two JSON values. `override_val` takes precedence.
pub fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = if let Some(base_v) = base_map.remove(&key) {
                    merge_json(base_v, override_v)
                } else {
                    override_v
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}

// ============================================================
// Helpers
// ============================================================

fn read(path: &Path, format: &str) -> Result<String, DjangoError> {
    std::fs::read_to_string(path).map_err(|e| {
        DjangoError::ConfigurationError(format!(
            "Failed to read {format} file '{}': {e}",
            path.display()
        ))
    })
}

fn from_json_value(value: serde_json::Value, format: &str) -> Result<Settings, DjangoError> {
    let default_json = serde_json::to_value(Settings::default()).map_err(|e| {
        DjangoError::ConfigurationError(format!("Failed to serialize default settings: {e}"))
    })?;
    let merged = merge_json(default_json, value);
    serde_json::from_value(merged).map_err(|e| {
        DjangoError::ConfigurationError(format!("Failed to deserialize settings from {format}: {e}"))
    })
}

fn parse_flag(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "true" | "1" | "yes")
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => {
            let map: serde_json::Map<String, serde_json::Value> = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── TOML loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_str_basic() {
        let toml = r#"
            debug = false
            log_level = "django_more=debug"
            installed_apps = ["django_more_types", "django_more_enum", "shop"]
        "#;
        let settings = from_toml_str(toml).unwrap();
        assert!(!settings.debug);
        assert_eq!(settings.log_level, "django_more=debug");
        assert_eq!(settings.installed_apps.len(), 3);
        // Defaults preserved
        assert!(settings.databases.contains_key("default"));
    }

    #[test]
    fn test_from_toml_str_databases() {
        let toml = r#"
            [databases.default]
            engine = "django.db.backends.postgresql"
            name = "shop"
            port = 5432
        "#;
        let settings = from_toml_str(toml).unwrap();
        let db = settings.databases.get("default").unwrap();
        assert_eq!(db.vendor(), "postgresql");
        assert_eq!(db.port, 5432);
    }

    #[test]
    fn test_from_toml_str_migrations() {
        let toml = r#"
            [migrations]
            interactive = true
            migrations_dir = "db/migrations"

            [migrations.questioner_defaults]
            ask_rename_enum = true
            ask_remove_enum_values = "SET_NULL"
        "#;
        let settings = from_toml_str(toml).unwrap();
        assert!(settings.migrations.interactive);
        assert_eq!(settings.migrations.migrations_dir, PathBuf::from("db/migrations"));
        assert_eq!(
            settings.migrations.questioner_defaults.get("ask_rename_enum"),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[test]
    fn test_from_toml_str_empty() {
        let settings = from_toml_str("").unwrap();
        assert!(settings.debug);
    }

    #[test]
    fn test_from_toml_str_invalid() {
        assert!(from_toml_str("[[invalid toml content").is_err());
    }

    // ── JSON loading ────────────────────────────────────────────────

    #[test]
    fn test_from_json_str_basic() {
        let json = r#"{"debug": false, "log_level": "debug"}"#;
        let settings = from_json_str(json).unwrap();
        assert!(!settings.debug);
        assert_eq!(settings.log_level, "debug");
    }

    #[test]
    fn test_from_json_str_invalid() {
        assert!(from_json_str("{invalid json").is_err());
    }

    // ── File loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "debug = false\n").unwrap();
        let settings = from_toml_file(&path).unwrap();
        assert!(!settings.debug);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"installed_apps": ["shop"]}"#).unwrap();
        let settings = from_json_file(&path).unwrap();
        assert_eq!(settings.installed_apps, vec!["shop"]);
    }

    #[test]
    fn test_from_toml_file_missing() {
        assert!(from_toml_file("/nonexistent/path/settings.toml").is_err());
    }

    // ── Environment variable overrides ──────────────────────────────

    #[test]
    fn test_apply_env_overrides_installed_apps() {
        let mut settings = Settings::default();
        std::env::set_var("DJANGO_INSTALLED_APPS", "django_more_enum, shop");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.installed_apps, vec!["django_more_enum", "shop"]);
        std::env::remove_var("DJANGO_INSTALLED_APPS");
    }

    #[test]
    fn test_apply_env_overrides_migrations_interactive() {
        let mut settings = Settings::default();
        std::env::set_var("DJANGO_MIGRATIONS_INTERACTIVE", "yes");
        apply_env_overrides(&mut settings);
        assert!(settings.migrations.interactive);
        std::env::remove_var("DJANGO_MIGRATIONS_INTERACTIVE");
    }

    #[test]
    fn test_apply_env_overrides_migrations_dir() {
        let mut settings = Settings::default();
        std::env::set_var("DJANGO_MIGRATIONS_DIR", "/tmp/migrations");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.migrations.migrations_dir, PathBuf::from("/tmp/migrations"));
        std::env::remove_var("DJANGO_MIGRATIONS_DIR");
    }

    // ── merge_json ──────────────────────────────────────────────────

    #[test]
    fn test_merge_json_nested() {
        let base = serde_json::json!({"a": {"x": 1, "y": 2}, "b": 1});
        let over = serde_json::json!({"a": {"y": 3}});
        assert_eq!(
            merge_json(base, over),
            serde_json::json!({"a": {"x": 1, "y": 3}, "b": 1})
        );
    }
}
