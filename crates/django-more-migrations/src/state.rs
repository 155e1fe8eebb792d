//! Project state snapshots.
//!
//! A [`ProjectState`] describes every model, field and custom type known at
//! one point of migration history. States are cloned, never edited in place
//! by the planner: each operation's `state_forwards` runs against a fresh
//! clone. Cloning copies the model and type maps; type definitions are
//! shared by reference.
//!
//! [`StateApps`] is the live view of a state, with custom-type fields
//! resolved against the state's types. It is only built on request
//! ([`ProjectState::derive_live_view`]) and, once built, follows every
//! type and model change made through the state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use django_more_core::{AppRegistry, DjangoError, DjangoResult};
use django_more_db::types::resolve_type_identity;
use django_more_db::{
    CustomTypeField, DependencyEdge, FieldDependencies, FieldType, TypeDef, TypeLookup, Value,
};

/// `(app_label, model_name)`.
pub type ModelKey = (String, String);

/// Options for a model, equivalent to Django's `class Meta`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    /// The explicit database table name, if set.
    pub db_table: Option<String>,
    /// Sets of fields that must be unique together.
    pub unique_together: Vec<Vec<String>>,
}

/// The state of a single model at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    /// The application label this model belongs to.
    pub app_label: String,
    /// The model name.
    pub name: String,
    /// The fields of this model, in declaration order.
    pub fields: Vec<MigrationFieldDef>,
    /// Model-level options.
    #[serde(default)]
    pub options: ModelOptions,
}

impl ModelState {
    /// Creates a new model state.
    pub fn new(
        app_label: impl Into<String>,
        name: impl Into<String>,
        fields: Vec<MigrationFieldDef>,
    ) -> Self {
        Self {
            app_label: app_label.into(),
            name: name.into(),
            fields,
            options: ModelOptions::default(),
        }
    }

    /// Sets model options.
    #[must_use]
    pub fn with_options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn key(&self) -> ModelKey {
        (self.app_label.clone(), self.name.clone())
    }

    /// Returns the database table name for this model.
    pub fn db_table(&self) -> String {
        self.options
            .db_table
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.app_label, self.name.to_lowercase()))
    }

    pub fn get_field(&self, name: &str) -> Option<&MigrationFieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn get_field_mut(&mut self, name: &str) -> Option<&mut MigrationFieldDef> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    /// Attaches definitions to every detached custom-type field that
    /// `types` knows. Returns how many fields became live.
    pub fn make_live(&mut self, types: &dyn TypeLookup) -> DjangoResult<usize> {
        let mut count = 0;
        for field in self.fields.iter_mut().filter(|f| f.is_custom_type()) {
            if field.make_live(types)? {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// A migration-friendly field definition.
///
/// Captures everything schema generation needs. Custom-type columns carry
/// the type name in their [`FieldType::Custom`] and, once live, the type
/// definition itself. The definition is never serialized: fields read back
/// from migration history are detached until made live against a state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationFieldDef {
    /// The field name.
    pub name: String,
    /// The database column name.
    pub column: String,
    /// The field type.
    pub field_type: FieldType,
    /// Whether this field is the primary key.
    #[serde(default)]
    pub primary_key: bool,
    /// Whether NULL is allowed.
    #[serde(default)]
    pub null: bool,
    /// Default value.
    #[serde(default)]
    pub default: Option<Value>,
    /// Whether a UNIQUE constraint is applied.
    #[serde(default)]
    pub unique: bool,
    /// Whether a database index should be created.
    #[serde(default)]
    pub db_index: bool,
    /// Maximum character length.
    #[serde(default)]
    pub max_length: Option<usize>,
    /// App owning the custom type, for custom-type columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_app_label: Option<String>,
    #[serde(skip)]
    type_def: Option<TypeDef>,
}

impl MigrationFieldDef {
    /// Creates a new migration field definition with sensible defaults.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        let column = name.clone();
        Self {
            name,
            column,
            field_type,
            primary_key: false,
            null: false,
            default: None,
            unique: false,
            db_index: false,
            max_length: None,
            type_app_label: None,
            type_def: None,
        }
    }

    /// A detached custom-type column.
    pub fn custom(
        name: impl Into<String>,
        category: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            FieldType::Custom {
                category: category.into(),
                type_name: type_name.into(),
            },
        )
    }

    /// Sets the database column name.
    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Marks this field as the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Allows NULL values.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    /// Sets the maximum character length.
    #[must_use]
    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Marks this field as having a UNIQUE constraint.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks this field as having a database index.
    #[must_use]
    pub fn db_index(mut self) -> Self {
        self.db_index = true;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_type_app_label(mut self, app_label: impl Into<String>) -> Self {
        self.type_app_label = Some(app_label.into());
        self
    }

    /// Attaches a live definition, see [`CustomTypeField::set_type_def`].
    pub fn with_type_def(mut self, def: TypeDef, apps: Option<&AppRegistry>) -> DjangoResult<Self> {
        self.set_type_def(def, apps)?;
        Ok(self)
    }

    pub const fn is_custom_type(&self) -> bool {
        matches!(self.field_type, FieldType::Custom { .. })
    }

    pub const fn is_relation(&self) -> bool {
        self.field_type.is_relation()
    }

    /// `(app_label, model_name)` of a foreign key target given as
    /// `"app.model"`.
    pub fn related_model(&self) -> Option<ModelKey> {
        match &self.field_type {
            FieldType::ForeignKey { to, .. } => to
                .split_once('.')
                .map(|(app, model)| (app.to_string(), model.to_string())),
            _ => None,
        }
    }
}

impl CustomTypeField for MigrationFieldDef {
    fn category(&self) -> &str {
        self.field_type.data_type_key()
    }

    fn type_name(&self) -> &str {
        self.field_type.custom_type_name().unwrap_or_default()
    }

    fn type_app_label(&self) -> Option<&str> {
        self.type_app_label.as_deref()
    }

    fn type_def(&self) -> Option<&TypeDef> {
        self.type_def.as_ref()
    }

    fn set_type_def(&mut self, def: TypeDef, apps: Option<&AppRegistry>) -> DjangoResult<()> {
        let FieldType::Custom { category, type_name } = &mut self.field_type else {
            return Err(DjangoError::ImproperlyConfigured(format!(
                "field '{}' is not a custom type column",
                self.name
            )));
        };
        if def.category() != category.as_str() {
            return Err(DjangoError::ImproperlyConfigured(format!(
                "field '{}' holds {category} values, not {}",
                self.name,
                def.category()
            )));
        }
        let identity = resolve_type_identity(def.as_ref(), self.type_app_label.as_deref(), apps)?;
        type_name.clone_from(&identity.type_name);
        self.type_app_label = Some(identity.app_label);
        self.type_def = Some(def);
        Ok(())
    }
}

impl FieldDependencies for MigrationFieldDef {
    fn has_dependencies(&self) -> bool {
        self.is_custom_type() || self.is_relation()
    }

    fn get_dependencies(&self) -> Vec<DependencyEdge> {
        let mut edges = Vec::new();
        if self.is_custom_type() {
            edges.extend(self.type_dependency());
        }
        if let Some((app, model)) = self.related_model() {
            edges.push(DependencyEdge::created(app, model));
        }
        edges
    }
}

// ── ProjectState ────────────────────────────────────────────────────────

/// A snapshot of the entire project's schema state at a point in time.
#[derive(Debug, Clone, Default)]
pub struct ProjectState {
    /// All models in the project, keyed by `(app_label, model_name)`.
    pub models: BTreeMap<ModelKey, ModelState>,
    db_types: BTreeMap<String, TypeDef>,
    type_apps: BTreeMap<String, String>,
    live: Option<StateApps>,
}

impl ProjectState {
    /// Creates a new empty project state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a model.
    pub fn add_model(&mut self, model: ModelState) {
        let key = model.key();
        self.models.insert(key.clone(), model);
        self.reload_model(&key);
    }

    pub fn remove_model(&mut self, key: &ModelKey) -> Option<ModelState> {
        let removed = self.models.remove(key);
        self.reload_model(key);
        removed
    }

    pub fn get_model(&self, app_label: &str, name: &str) -> Option<&ModelState> {
        self.models.get(&(app_label.to_string(), name.to_string()))
    }

    /// A model to edit. Call [`reload_model`](Self::reload_model) afterwards.
    pub fn get_model_mut(&mut self, app_label: &str, name: &str) -> Option<&mut ModelState> {
        self.models.get_mut(&(app_label.to_string(), name.to_string()))
    }

    /// Brings the live view's copy of a model up to date, if the live view
    /// has been built.
    pub fn reload_model(&mut self, key: &ModelKey) {
        if let Some(live) = self.live.as_mut() {
            live.reload_model(key, self.models.get(key));
        }
    }

    // ── Custom types ──

    pub fn db_types(&self) -> &BTreeMap<String, TypeDef> {
        &self.db_types
    }

    pub fn get_type(&self, type_name: &str) -> Option<&TypeDef> {
        self.db_types.get(type_name)
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.db_types.contains_key(type_name)
    }

    /// The app a type was added under, when known.
    pub fn type_app_label(&self, type_name: &str) -> Option<&str> {
        self.type_apps.get(type_name).map(String::as_str)
    }

    /// Registers `def` under `type_name`, replacing any previous entry.
    pub fn add_type(&mut self, type_name: impl Into<String>, def: TypeDef, app_label: Option<&str>) {
        let type_name = type_name.into();
        tracing::debug!("Adding type '{}' to state", type_name);
        if let Some(label) = app_label {
            self.type_apps.insert(type_name.clone(), label.to_string());
        }
        if let Some(live) = self.live.as_mut() {
            live.add_type(&type_name, def.clone(), app_label);
        }
        self.db_types.insert(type_name, def);
    }

    /// Unregisters `type_name`. Fails when the type is unknown.
    pub fn remove_type(&mut self, type_name: &str) -> DjangoResult<TypeDef> {
        let def = self
            .db_types
            .remove(type_name)
            .ok_or_else(|| DjangoError::type_not_found("remove_type", type_name))?;
        tracing::debug!("Removing type '{}' from state", type_name);
        self.type_apps.remove(type_name);
        if let Some(live) = self.live.as_mut() {
            live.remove_type(type_name);
        }
        Ok(def)
    }

    /// Every `(model, field name)` whose column is the custom type
    /// `type_name`.
    pub fn fields_with_type(&self, type_name: &str) -> Vec<(ModelKey, String)> {
        self.models
            .iter()
            .flat_map(|(key, model)| {
                model
                    .fields
                    .iter()
                    .filter(|f| f.is_custom_type() && f.type_name() == type_name)
                    .map(|f| (key.clone(), f.name.clone()))
            })
            .collect()
    }

    /// Runs `update` on every field using `type_name` and returns how many
    /// fields it touched.
    pub fn update_fields_with_type<F>(&mut self, type_name: &str, mut update: F) -> DjangoResult<usize>
    where
        F: FnMut(&mut MigrationFieldDef) -> DjangoResult<()>,
    {
        let targets = self.fields_with_type(type_name);
        for (key, field_name) in &targets {
            if let Some(field) = self
                .models
                .get_mut(key)
                .and_then(|model| model.get_field_mut(field_name))
            {
                update(field)?;
            }
        }
        let mut keys: Vec<&ModelKey> = targets.iter().map(|(key, _)| key).collect();
        keys.dedup();
        for key in keys {
            self.reload_model(key);
        }
        Ok(targets.len())
    }

    /// Registers the definition of every live custom-type field (of
    /// `category`, when given) whose type the state does not have yet.
    /// Returns the names added.
    pub fn seed_types_from_fields(&mut self, category: Option<&str>) -> Vec<String> {
        let mut found: BTreeMap<String, (TypeDef, Option<String>)> = BTreeMap::new();
        for field in self.models.values().flat_map(|m| m.fields.iter()) {
            if !field.is_custom_type() || category.is_some_and(|c| c != field.category()) {
                continue;
            }
            if let Some(def) = field.type_def() {
                if !self.db_types.contains_key(field.type_name()) {
                    found
                        .entry(field.type_name().to_string())
                        .or_insert_with(|| (def.clone(), field.type_app_label.clone()));
                }
            }
        }
        let names: Vec<String> = found.keys().cloned().collect();
        for (type_name, (def, app_label)) in found {
            self.add_type(type_name, def, app_label.as_deref());
        }
        names
    }

    /// Makes the custom-type fields of one model live against this state.
    pub fn make_model_live(&mut self, key: &ModelKey) -> DjangoResult<usize> {
        let Some(mut model) = self.models.remove(key) else {
            return Ok(0);
        };
        let result = model.make_live(&self.db_types);
        self.models.insert(key.clone(), model);
        self.reload_model(key);
        result
    }

    // ── Live view ──

    /// Builds the live view if needed and returns it.
    pub fn derive_live_view(&mut self) -> &StateApps {
        if self.live.is_none() {
            self.live = Some(StateApps::from_state(self));
        }
        self.live.get_or_insert_with(StateApps::default)
    }

    /// The live view, if it has been built.
    pub fn live_view(&self) -> Option<&StateApps> {
        self.live.as_ref()
    }

    pub fn has_live_view(&self) -> bool {
        self.live.is_some()
    }
}

impl TypeLookup for ProjectState {
    fn lookup_type(&self, type_name: &str) -> Option<TypeDef> {
        self.db_types.lookup_type(type_name)
    }
}

// ── StateApps ───────────────────────────────────────────────────────────

/// The live view of a [`ProjectState`].
///
/// Holds its own copies of the model and type maps, with every custom-type
/// field the types can resolve made live.
#[derive(Debug, Clone, Default)]
pub struct StateApps {
    models: BTreeMap<ModelKey, ModelState>,
    db_types: BTreeMap<String, TypeDef>,
    type_apps: BTreeMap<String, String>,
}

impl StateApps {
    fn from_state(state: &ProjectState) -> Self {
        let mut apps = Self {
            models: BTreeMap::new(),
            db_types: state.db_types.clone(),
            type_apps: state.type_apps.clone(),
        };
        for (key, model) in &state.models {
            apps.reload_model(key, Some(model));
        }
        apps
    }

    fn reload_model(&mut self, key: &ModelKey, model: Option<&ModelState>) {
        match model {
            Some(model) => {
                let mut live = model.clone();
                if let Err(err) = live.make_live(&self.db_types) {
                    tracing::warn!("Model {}.{} stays detached: {}", key.0, key.1, err);
                }
                self.models.insert(key.clone(), live);
            }
            None => {
                self.models.remove(key);
            }
        }
    }

    fn add_type(&mut self, type_name: &str, def: TypeDef, app_label: Option<&str>) {
        if let Some(label) = app_label {
            self.type_apps.insert(type_name.to_string(), label.to_string());
        }
        self.db_types.insert(type_name.to_string(), def);
        for model in self.models.values_mut() {
            if let Err(err) = model.make_live(&self.db_types) {
                tracing::warn!("Model {}.{} stays detached: {}", model.app_label, model.name, err);
            }
        }
    }

    fn remove_type(&mut self, type_name: &str) {
        self.db_types.remove(type_name);
        self.type_apps.remove(type_name);
    }

    pub fn get_model(&self, app_label: &str, name: &str) -> Option<&ModelState> {
        self.models.get(&(app_label.to_string(), name.to_string()))
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelState> {
        self.models.values()
    }

    pub fn db_types(&self) -> &BTreeMap<String, TypeDef> {
        &self.db_types
    }

    pub fn type_app_label(&self, type_name: &str) -> Option<&str> {
        self.type_apps.get(type_name).map(String::as_str)
    }

    /// Custom-type fields no definition could be found for.
    pub fn detached_fields(&self) -> Vec<(ModelKey, String)> {
        self.models
            .iter()
            .flat_map(|(key, model)| {
                model
                    .fields
                    .iter()
                    .filter(|f| f.is_custom_type() && !f.is_live())
                    .map(|f| (key.clone(), f.name.clone()))
            })
            .collect()
    }

    /// Whether every custom-type field resolved.
    pub fn is_resolved(&self) -> bool {
        self.detached_fields().is_empty()
    }
}

impl TypeLookup for StateApps {
    fn lookup_type(&self, type_name: &str) -> Option<TypeDef> {
        self.db_types.lookup_type(type_name)
    }
}
