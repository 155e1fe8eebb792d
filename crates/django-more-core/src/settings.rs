//! Settings for django-more.
//!
//! [`Settings`] holds the configuration the start-up sequence and the
//! migration planner read; [`LazySettings`] is a globally-accessible,
//! lazily-initialized instance.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Database connection configuration.
///
/// Only `engine` matters to django-more: it selects which backend vendor
/// receives the custom type patches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// The database engine (e.g. `django.db.backends.postgresql`).
    pub engine: String,
    /// The database name (or file path for `SQLite`).
    pub name: String,
    /// The database user.
    pub user: String,
    /// The database host.
    pub host: String,
    /// The database port.
    pub port: u16,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            engine: "django.db.backends.sqlite3".to_string(),
            name: "db.sqlite3".to_string(),
            user: String::new(),
            host: String::new(),
            port: 0,
        }
    }
}

impl DatabaseSettings {
    /// The vendor name: the last component of the engine path.
    pub fn vendor(&self) -> &str {
        self.engine.rsplit('.').next().unwrap_or(&self.engine)
    }
}

/// Migration planning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    /// Whether the autodetector may prompt on the terminal.
    pub interactive: bool,
    /// Answers used by the non-interactive questioner, keyed by question
    /// (`ask_rename`, `ask_rename_enum`, `ask_remove_enum_values`).
    pub questioner_defaults: HashMap<String, serde_json::Value>,
    /// Directory holding `<app_label>/<name>.json` migration files.
    pub migrations_dir: PathBuf,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            interactive: false,
            questioner_defaults: HashMap::new(),
            migrations_dir: PathBuf::from("migrations"),
        }
    }
}

/// The complete set of settings.
///
/// # Examples
///
/// ```
/// use django_more_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(settings.debug);
/// assert_eq!(settings.log_level, "info");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // ── Core ─────────────────────────────────────────────────────────

    /// Whether debug mode is enabled.
    pub debug: bool,
    /// List of installed application dotted paths.
    pub installed_apps: Vec<String>,

    // ── Database ─────────────────────────────────────────────────────

    /// Database configurations, keyed by alias (e.g. "default").
    pub databases: BTreeMap<String, DatabaseSettings>,

    // ── Migrations ───────────────────────────────────────────────────

    /// Migration planner configuration.
    pub migrations: MigrationSettings,

    // ── Logging ──────────────────────────────────────────────────────

    /// The log level or filter directive (e.g. "info", "django_more=debug").
    pub log_level: String,

    // ── Escape hatch ─────────────────────────────────────────────────

    /// Custom settings that don't fit into the above categories.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut databases = BTreeMap::new();
        databases.insert("default".to_string(), DatabaseSettings::default());

        Self {
            debug: true,
            installed_apps: Vec::new(),
            databases,
            migrations: MigrationSettings::default(),
            log_level: "info".to_string(),
            extra: HashMap::new(),
        }
    }
}

impl Settings {
    /// Distinct vendor names of all configured databases.
    pub fn database_vendors(&self) -> Vec<String> {
        let mut vendors: Vec<String> = self
            .databases
            .values()
            .map(|db| db.vendor().to_string())
            .collect();
        vendors.sort();
        vendors.dedup();
        vendors
    }
}

/// A lazily-initialized, globally-accessible settings container.
///
/// Call [`configure`](LazySettings::configure) once at startup, then use
/// [`get`](LazySettings::get).
pub struct LazySettings {
    inner: OnceLock<Settings>,
}

impl Default for LazySettings {
    fn default() -> Self {
        Self::new()
    }
}

impl LazySettings {
    /// Creates a new, unconfigured `LazySettings`.
    pub const fn new() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    /// Configures the global settings. Must be called exactly once.
    ///
    /// # Panics
    ///
    /// Panics if settings have already been configured.
    pub fn configure(&self, settings: Settings) {
        self.inner
            .set(settings)
            .expect("Settings have already been configured");
    }

    /// Returns a reference to the configured settings.
    ///
    /// # Panics
    ///
    /// Panics if settings have not been configured.
    pub fn get(&self) -> &Settings {
        self.inner
            .get()
            .expect("Settings have not been configured. Call SETTINGS.configure() first.")
    }

    /// Returns `true` if settings have been configured.
    pub fn is_configured(&self) -> bool {
        self.inner.get().is_some()
    }
}

/// The global settings instance.
pub static SETTINGS: LazySettings = LazySettings::new();
