//! Application registry for django-more.
//!
//! [`AppConfig`] implementations apply their patches from
//! [`ready`](AppConfig::ready). [`AppRegistry::populate`] calls them in
//! registration order, which is the order patches are applied in.

use std::collections::HashMap;

use django_more_patchy::{Namespace, PatchRegistry, Patcher};

use crate::error::DjangoResult;
use crate::logging::patch_span;
use crate::settings::Settings;

/// What an app's `ready` hook gets to work with.
#[derive(Debug, Clone, Copy)]
pub struct ReadyContext<'a> {
    patcher: Patcher<'a>,
    settings: &'a Settings,
}

impl<'a> ReadyContext<'a> {
    pub const fn new(
        namespace: &'a Namespace,
        registry: &'a PatchRegistry,
        settings: &'a Settings,
    ) -> Self {
        Self {
            patcher: Patcher::new(namespace, registry),
            settings,
        }
    }

    /// An unrooted patcher over the host namespace.
    pub const fn patcher(&self) -> Patcher<'a> {
        self.patcher
    }

    pub const fn namespace(&self) -> &'a Namespace {
        self.patcher.namespace()
    }

    pub const fn registry(&self) -> &'a PatchRegistry {
        self.patcher.registry()
    }

    pub const fn settings(&self) -> &'a Settings {
        self.settings
    }
}

/// Configuration for an installed application.
///
/// # Examples
///
/// ```
/// use django_more_core::apps::AppConfig;
///
/// struct Shop;
///
/// impl AppConfig for Shop {
///     fn name(&self) -> &str { "myproject.shop" }
/// }
///
/// assert_eq!(Shop.label(), "shop");
/// ```
pub trait AppConfig: Send + Sync {
    /// Returns the full dotted path of the application.
    fn name(&self) -> &str;

    /// Returns a short label derived from the name (the last component).
    fn label(&self) -> &str {
        self.name().rsplit('.').next().unwrap_or_else(|| self.name())
    }

    /// Returns a human-readable name for the application.
    fn verbose_name(&self) -> &str {
        self.name()
    }

    /// Called once all apps are registered. Patches are applied here.
    fn ready(&self, _ctx: &ReadyContext<'_>) -> DjangoResult<()> {
        Ok(())
    }
}

/// The central registry of installed applications.
pub struct AppRegistry {
    apps: Vec<Box<dyn AppConfig>>,
    app_labels: HashMap<String, usize>,
    ready: bool,
}

impl Default for AppRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AppRegistry {
    /// Creates a new, empty `AppRegistry`.
    pub fn new() -> Self {
        Self {
            apps: Vec::new(),
            app_labels: HashMap::new(),
            ready: false,
        }
    }

    /// Registers an application.
    ///
    /// # Panics
    ///
    /// Panics if an application with the same label is already registered,
    /// or if [`populate`](AppRegistry::populate) has already been called.
    pub fn register(&mut self, app: Box<dyn AppConfig>) {
        assert!(
            !self.ready,
            "Cannot register apps after the registry has been populated"
        );

        let label = app.label().to_string();
        assert!(
            !self.app_labels.contains_key(&label),
            "Application with label '{label}' is already registered"
        );

        let index = self.apps.len();
        self.app_labels.insert(label, index);
        self.apps.push(app);
    }

    /// Returns the configuration for the app with the given label, if registered.
    pub fn get_app_config(&self, label: &str) -> Option<&dyn AppConfig> {
        self.app_labels
            .get(label)
            .map(|&idx| self.apps[idx].as_ref())
    }

    /// Returns the app whose dotted name is the longest prefix of
    /// `module_path`, if any.
    pub fn get_containing_app_config(&self, module_path: &str) -> Option<&dyn AppConfig> {
        self.apps
            .iter()
            .filter(|app| {
                let name = app.name();
                module_path == name
                    || module_path
                        .strip_prefix(name)
                        .is_some_and(|rest| rest.starts_with('.'))
            })
            .max_by_key(|app| app.name().len())
            .map(|app| app.as_ref())
    }

    /// Returns a slice of all registered app configurations.
    pub fn get_app_configs(&self) -> &[Box<dyn AppConfig>] {
        &self.apps
    }

    /// Calls `ready()` on each app in registration order, stopping at the
    /// first failure.
    ///
    /// # Panics
    ///
    /// Panics if `populate` has already been called.
    pub fn populate(&mut self, ctx: &ReadyContext<'_>) -> DjangoResult<()> {
        assert!(!self.ready, "AppRegistry has already been populated");

        for app in &self.apps {
            let span = patch_span(app.label());
            let _guard = span.enter();
            tracing::debug!("Running ready() for {}", app.name());
            app.ready(ctx)?;
        }

        self.ready = true;
        Ok(())
    }

    /// Returns `true` if the registry has been populated.
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// Returns `true` if an app with the given label is registered.
    pub fn is_installed(&self, label: &str) -> bool {
        self.app_labels.contains_key(label)
    }
}
