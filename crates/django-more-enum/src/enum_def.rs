//! Enum type definitions.
//!
//! An [`EnumDef`] is an ordered list of members, each a symbolic name and
//! the value stored in the database. Readable values are what the database
//! holds; names are for code. Definitions rebuilt from migration history use
//! [`EnumDef::functional`], where every name equals its value.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};

use django_more_core::{DjangoError, DjangoResult};
use django_more_db::{Backend, CustomType, TypeDef, Value};

/// Category of enum types, also their `data_types` key.
pub const ENUM_CATEGORY: &str = "enum";

/// Module path given to definitions rebuilt from migration history.
pub const MIGRATIONS_MODULE: &str = "__migrations__";

/// One member of an enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumMember {
    pub name: String,
    pub value: String,
}

/// Metadata declared on the enum itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumMeta {
    /// Explicit database type name.
    pub db_type: Option<String>,
    /// Explicit owning app.
    pub app_label: Option<String>,
}

/// A member of a particular enum, as handed to and returned from fields.
///
/// Displays as `EnumName.MEMBER`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumValue {
    enum_path: String,
    pub name: String,
    pub value: String,
}

impl EnumValue {
    /// `module.qualname` of the enum this member belongs to.
    pub fn enum_path(&self) -> &str {
        &self.enum_path
    }

    pub fn enum_name(&self) -> &str {
        self.enum_path.rsplit('.').next().unwrap_or(&self.enum_path)
    }
}

impl fmt::Display for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.enum_name(), self.name)
    }
}

/// An enumeration usable as a database type.
///
/// # Examples
///
/// ```
/// use django_more_enum::EnumDef;
///
/// let status = EnumDef::new("Order.Status", "shop.models", [("OPEN", "open"), ("DONE", "done")])
///     .unwrap();
/// assert_eq!(status.get("DONE").unwrap().value, "done");
/// assert_eq!(status.from_value("open").unwrap().to_string(), "Status.OPEN");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    qualname: String,
    module_path: String,
    members: Vec<EnumMember>,
    meta: EnumMeta,
}

impl EnumDef {
    /// Builds a definition from `(name, value)` pairs in declaration order.
    /// Names and values must both be unique.
    pub fn new<I, N, V>(
        qualname: impl Into<String>,
        module_path: impl Into<String>,
        members: I,
    ) -> DjangoResult<Self>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        let qualname = qualname.into();
        let members: Vec<EnumMember> = members
            .into_iter()
            .map(|(name, value)| EnumMember {
                name: name.into(),
                value: value.into(),
            })
            .collect();
        check_unique(&qualname, &members)?;
        Ok(Self {
            qualname,
            module_path: module_path.into(),
            members,
            meta: EnumMeta::default(),
        })
    }

    /// The form migration history rebuilds: named after its database type,
    /// owned by `app_label`, with names equal to values.
    pub fn functional<I, V>(app_label: &str, type_name: &str, values: I) -> DjangoResult<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        Ok(Self::new(type_name, MIGRATIONS_MODULE, values.iter().map(|v| (v.clone(), v.clone())))?
            .with_db_type(type_name)
            .with_app_label(app_label))
    }

    #[must_use]
    pub fn with_db_type(mut self, db_type: impl Into<String>) -> Self {
        self.meta.db_type = Some(db_type.into());
        self
    }

    #[must_use]
    pub fn with_app_label(mut self, app_label: impl Into<String>) -> Self {
        self.meta.app_label = Some(app_label.into());
        self
    }

    pub const fn meta(&self) -> &EnumMeta {
        &self.meta
    }

    /// The enum's own name, without enclosing classes.
    pub fn name(&self) -> &str {
        self.qualname.rsplit('.').next().unwrap_or(&self.qualname)
    }

    /// `module.qualname`.
    pub fn path(&self) -> String {
        format!("{}.{}", self.module_path, self.qualname)
    }

    pub fn members(&self) -> &[EnumMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn member(&self, member: &EnumMember) -> EnumValue {
        EnumValue {
            enum_path: self.path(),
            name: member.name.clone(),
            value: member.value.clone(),
        }
    }

    /// The member called `name`.
    pub fn get(&self, name: &str) -> Option<EnumValue> {
        self.members
            .iter()
            .find(|m| m.name == name)
            .map(|m| self.member(m))
    }

    /// The member storing `value`.
    pub fn from_value(&self, value: &str) -> Option<EnumValue> {
        self.members
            .iter()
            .find(|m| m.value == value)
            .map(|m| self.member(m))
    }

    /// Every member, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = EnumValue> + '_ {
        self.members.iter().map(|m| self.member(m))
    }

    /// Whether `value` is a member of this enum.
    pub fn contains(&self, value: &EnumValue) -> bool {
        value.enum_path == self.path() && self.members.iter().any(|m| m.name == value.name)
    }

    /// Stored values in declaration order.
    pub fn stored_values(&self) -> Vec<String> {
        self.members.iter().map(|m| m.value.clone()).collect()
    }

    /// Stored values, ignoring order and names.
    pub fn value_set(&self) -> BTreeSet<String> {
        self.members.iter().map(|m| m.value.clone()).collect()
    }

    /// A copy without the members storing `remove` and with a member per
    /// value of `add` appended.
    pub fn altered(&self, add: &[String], remove: &[String]) -> DjangoResult<Self> {
        let mut members: Vec<EnumMember> = self
            .members
            .iter()
            .filter(|m| !remove.contains(&m.value))
            .cloned()
            .collect();
        members.extend(add.iter().map(|value| EnumMember {
            name: value.clone(),
            value: value.clone(),
        }));
        check_unique(&self.qualname, &members)?;
        Ok(Self {
            members,
            ..self.clone()
        })
    }

    pub fn into_type_def(self) -> TypeDef {
        Arc::new(self)
    }

    /// The enum behind a shared definition, if it is one.
    pub fn downcast(def: &TypeDef) -> Option<&Self> {
        def.as_any().downcast_ref::<Self>()
    }
}

fn check_unique(qualname: &str, members: &[EnumMember]) -> DjangoResult<()> {
    let mut names = BTreeSet::new();
    let mut values = BTreeSet::new();
    for member in members {
        if !names.insert(member.name.as_str()) {
            return Err(DjangoError::ImproperlyConfigured(format!(
                "enum {qualname}: duplicate member name '{}'",
                member.name
            )));
        }
        if !values.insert(member.value.as_str()) {
            return Err(DjangoError::ImproperlyConfigured(format!(
                "enum {qualname}: duplicate value '{}'",
                member.value
            )));
        }
    }
    Ok(())
}

impl CustomType for EnumDef {
    fn category(&self) -> &str {
        ENUM_CATEGORY
    }

    fn qualname(&self) -> &str {
        &self.qualname
    }

    fn module_path(&self) -> &str {
        &self.module_path
    }

    fn explicit_type_name(&self) -> Option<&str> {
        self.meta.db_type.as_deref()
    }

    fn explicit_app_label(&self) -> Option<&str> {
        self.meta.app_label.as_deref()
    }

    fn values(&self) -> Vec<Value> {
        self.members
            .iter()
            .map(|m| Value::String(m.value.clone()))
            .collect()
    }

    /// Inline enum columns list their values; declared types don't.
    fn db_type_parameters(&self, backend: &Backend) -> Map<String, Json> {
        let mut params = Map::new();
        let features = backend.features();
        if features.has_enum && !features.requires_enum_declaration {
            params.insert("values".into(), json!(self.stored_values()));
        }
        params
    }

    fn deconstruct(&self) -> Json {
        json!({
            "qualname": self.qualname,
            "module": self.module_path,
            "members": self.members,
            "db_type": self.meta.db_type,
            "app_label": self.meta.app_label,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
